//! Nullable chain index: scripted inclusion, ownership and posted bundles.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use whistle_protocol::graphql::Tag;
use whistle_protocol::{
    ChainIndex, IndexError, PostedBundle, PostedBundlePage, TransactionInclusion, TransportError,
};
use whistle_types::params::{BUNDLE_FORMAT_TAG, BUNDLE_VERSION, BUNDLE_VERSION_TAG};
use whistle_types::TxId;

#[derive(Default)]
struct State {
    inclusions: HashMap<TxId, TransactionInclusion>,
    owners: HashMap<TxId, String>,
    posted: HashMap<String, Vec<PostedBundle>>,
    failing: HashSet<TxId>,
    inclusion_queries: Vec<TxId>,
}

#[derive(Default)]
pub struct NullChainIndex {
    state: Mutex<State>,
}

impl NullChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().expect("null index lock poisoned"))
    }

    pub fn set_inclusion(&self, id: TxId, block_height: Option<u64>, bundled_in: Option<TxId>) {
        self.with(|s| {
            s.inclusions.insert(id, TransactionInclusion { block_height, bundled_in });
        });
    }

    pub fn set_owner(&self, id: TxId, address: impl Into<String>) {
        self.with(|s| {
            s.owners.insert(id, address.into());
        });
    }

    /// Queries about `id` fail with a transport error.
    pub fn fail_for(&self, id: TxId) {
        self.with(|s| {
            s.failing.insert(id);
        });
    }

    /// Record a bundle posted by `owner`, tagged as a current-version bundle.
    pub fn post_bundle(&self, owner: &str, id: TxId, block: u64) {
        self.post(
            owner,
            PostedBundle {
                id,
                block,
                tags: vec![
                    Tag {
                        name: BUNDLE_FORMAT_TAG.into(),
                        value: "binary".into(),
                    },
                    Tag {
                        name: BUNDLE_VERSION_TAG.into(),
                        value: BUNDLE_VERSION.into(),
                    },
                ],
            },
        );
    }

    pub fn post(&self, owner: &str, bundle: PostedBundle) {
        self.with(|s| {
            let list = s.posted.entry(owner.to_string()).or_default();
            list.push(bundle);
            list.sort_by_key(|b| b.block);
        });
    }

    pub fn inclusion_queries(&self) -> Vec<TxId> {
        self.with(|s| s.inclusion_queries.clone())
    }

    fn check(&self, id: &TxId) -> Result<(), IndexError> {
        if self.with(|s| s.failing.contains(id)) {
            return Err(IndexError::Transport(TransportError::Timeout {
                url: format!("null-index/{id}"),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainIndex for NullChainIndex {
    async fn transaction_inclusion(&self, id: &TxId) -> Result<Option<TransactionInclusion>, IndexError> {
        self.with(|s| s.inclusion_queries.push(*id));
        self.check(id)?;
        Ok(self.with(|s| s.inclusions.get(id).cloned()))
    }

    async fn owner_address(&self, id: &TxId) -> Result<Option<String>, IndexError> {
        self.check(id)?;
        Ok(self.with(|s| s.owners.get(id).cloned()))
    }

    /// Cursors are decimal positions into the owner's block-ordered list.
    async fn posted_bundles(
        &self,
        owner: &str,
        min_block: u64,
        page_size: u32,
        after: Option<&str>,
    ) -> Result<PostedBundlePage, IndexError> {
        let skip: usize = after.and_then(|c| c.parse().ok()).unwrap_or(0);
        let matching: Vec<PostedBundle> = self.with(|s| {
            s.posted
                .get(owner)
                .map(|list| list.iter().filter(|b| b.block >= min_block).cloned().collect())
                .unwrap_or_default()
        });
        let end = (skip + page_size as usize).min(matching.len());
        let bundles = matching.get(skip..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());
        Ok(PostedBundlePage { bundles, next_cursor })
    }
}
