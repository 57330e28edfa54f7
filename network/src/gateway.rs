//! [`ChainIndex`] over the gateway's GraphQL endpoint.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use whistle_protocol::graphql::{decode_response, GraphQlRequest, InclusionData, OwnerData, TransactionsData};
use whistle_protocol::{
    endpoints, ChainIndex, HttpTransport, IndexError, PostedBundle, PostedBundlePage, ProtocolError,
    TransactionInclusion,
};
use whistle_types::TxId;

use crate::peer_directory::normalize_url;
use crate::request::{post_with_retry, AttemptFailure, RetryPolicy};

pub struct GatewayIndex {
    transport: Arc<dyn HttpTransport>,
    graphql_url: String,
    policy: RetryPolicy,
}

impl GatewayIndex {
    pub fn new(transport: Arc<dyn HttpTransport>, gateway_url: &str, retries: u32) -> Self {
        Self {
            transport,
            graphql_url: endpoints::join(&normalize_url(gateway_url), endpoints::GRAPHQL),
            policy: RetryPolicy::new(retries, Duration::from_secs(30)),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn query<T: serde::de::DeserializeOwned>(&self, request: GraphQlRequest) -> Result<T, IndexError> {
        let body = request.to_json();
        let response = post_with_retry(self.transport.as_ref(), &self.graphql_url, &body, self.policy)
            .await
            .map_err(|failure| match failure {
                AttemptFailure::Transport(e) => IndexError::Transport(e),
                AttemptFailure::Status(r) => IndexError::Protocol(ProtocolError::UnexpectedStatus {
                    status: r.status,
                    url: self.graphql_url.clone(),
                }),
            })?;
        Ok(decode_response(&response.body)?)
    }
}

fn parse_id(raw: &str) -> Result<TxId, ProtocolError> {
    raw.parse()
        .map_err(|e| ProtocolError::Malformed(format!("transaction id {raw}: {e}")))
}

#[async_trait]
impl ChainIndex for GatewayIndex {
    async fn transaction_inclusion(&self, id: &TxId) -> Result<Option<TransactionInclusion>, IndexError> {
        let data: InclusionData = self.query(GraphQlRequest::inclusion(&id.to_base64url())).await?;
        let Some(node) = data.transaction else {
            return Ok(None);
        };
        let bundled_in = match node.bundled_in {
            Some(parent) => Some(parse_id(&parent.id)?),
            None => None,
        };
        Ok(Some(TransactionInclusion {
            block_height: node.block.map(|b| b.height),
            bundled_in,
        }))
    }

    async fn owner_address(&self, id: &TxId) -> Result<Option<String>, IndexError> {
        let data: OwnerData = self.query(GraphQlRequest::owner(&id.to_base64url())).await?;
        Ok(data.transaction.and_then(|t| t.owner).and_then(|o| o.address))
    }

    async fn posted_bundles(
        &self,
        owner: &str,
        min_block: u64,
        page_size: u32,
        after: Option<&str>,
    ) -> Result<PostedBundlePage, IndexError> {
        let data: TransactionsData = self
            .query(GraphQlRequest::posted_bundles(owner, min_block, page_size, after))
            .await?;
        let connection = data.transactions;
        let next_cursor = if connection.page_info.has_next_page {
            connection.edges.last().map(|e| e.cursor.clone())
        } else {
            None
        };
        let mut bundles = Vec::with_capacity(connection.edges.len());
        for edge in connection.edges {
            // pending transactions have no block yet; a later sync picks them up
            let Some(block) = edge.node.block else {
                continue;
            };
            bundles.push(PostedBundle {
                id: parse_id(&edge.node.id)?,
                block: block.height,
                tags: edge.node.tags,
            });
        }
        Ok(PostedBundlePage { bundles, next_cursor })
    }
}
