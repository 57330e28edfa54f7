//! Gateway GraphQL documents and response shapes.
//!
//! Queries pass ids and owners as variables rather than splicing them into
//! the document text.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ProtocolError;

pub const INCLUSION_QUERY: &str = "query($id: ID!) { transaction(id: $id) { block { height } bundledIn { id } } }";

pub const OWNER_QUERY: &str = "query($id: ID!) { transaction(id: $id) { owner { address } } }";

pub const POSTED_BUNDLES_QUERY: &str = "query($owners: [String!], $min: Int, $first: Int, $after: String) { \
transactions(owners: $owners, block: { min: $min }, sort: HEIGHT_ASC, first: $first, after: $after) { \
pageInfo { hasNextPage } edges { cursor node { id tags { name value } block { height } } } } }";

#[derive(Clone, Debug, Serialize)]
pub struct GraphQlRequest {
    pub query: &'static str,
    pub variables: serde_json::Value,
}

impl GraphQlRequest {
    pub fn inclusion(id: &str) -> Self {
        Self {
            query: INCLUSION_QUERY,
            variables: json!({ "id": id }),
        }
    }

    pub fn owner(id: &str) -> Self {
        Self {
            query: OWNER_QUERY,
            variables: json!({ "id": id }),
        }
    }

    pub fn posted_bundles(owner: &str, min_block: u64, first: u32, after: Option<&str>) -> Self {
        Self {
            query: POSTED_BUNDLES_QUERY,
            variables: json!({
                "owners": [owner],
                "min": min_block,
                "first": first,
                "after": after,
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({ "query": self.query, "variables": self.variables })
    }
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlErrorEntry {
    pub message: String,
}

/// Decode a GraphQL body, turning an `errors` array without data into an error.
pub fn decode_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    let resp: GraphQlResponse<T> = crate::codec::decode(body)?;
    match resp.data {
        Some(data) => Ok(data),
        None => {
            let messages: Vec<_> = resp.errors.into_iter().map(|e| e.message).collect();
            Err(ProtocolError::GraphQl(if messages.is_empty() {
                "response has no data".into()
            } else {
                messages.join("; ")
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeightRef {
    pub height: u64,
}

#[derive(Debug, Deserialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerRef {
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionNode {
    pub block: Option<HeightRef>,
    pub bundled_in: Option<IdRef>,
}

#[derive(Debug, Deserialize)]
pub struct InclusionData {
    pub transaction: Option<InclusionNode>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerNode {
    pub owner: Option<OwnerRef>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerData {
    pub transaction: Option<OwnerNode>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionNode {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub block: Option<HeightRef>,
}

#[derive(Debug, Deserialize)]
pub struct Edge {
    pub cursor: String,
    pub node: TransactionNode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConnection {
    pub page_info: PageInfo,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsData {
    pub transactions: TransactionConnection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusion_with_null_block() {
        let data: InclusionData = decode_response(
            br#"{"data":{"transaction":{"block":null,"bundledIn":{"id":"abc"}}}}"#,
        )
        .unwrap();
        let node = data.transaction.unwrap();
        assert!(node.block.is_none());
        assert_eq!(node.bundled_in.unwrap().id, "abc");
    }

    #[test]
    fn errors_without_data_surface() {
        let err = decode_response::<OwnerData>(br#"{"errors":[{"message":"rate limited"}]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn page_parses() {
        let body = br#"{"data":{"transactions":{"pageInfo":{"hasNextPage":true},"edges":[
            {"cursor":"c1","node":{"id":"x","tags":[{"name":"Bundle-Version","value":"2.0.0"}],"block":{"height":7}}}
        ]}}}"#;
        let data: TransactionsData = decode_response(body).unwrap();
        assert!(data.transactions.page_info.has_next_page);
        assert_eq!(data.transactions.edges[0].cursor, "c1");
        assert_eq!(data.transactions.edges[0].node.block.as_ref().unwrap().height, 7);
    }

    #[test]
    fn request_carries_variables() {
        let req = GraphQlRequest::posted_bundles("addr", 100, 100, None).to_json();
        assert_eq!(req["variables"]["owners"][0], "addr");
        assert_eq!(req["variables"]["min"], 100);
        assert!(req["variables"]["after"].is_null());
    }
}
