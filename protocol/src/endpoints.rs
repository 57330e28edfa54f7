//! Relative paths of the ledger node and bundler HTTP endpoints.

use whistle_types::TxId;

pub const INFO: &str = "/info";
pub const PEERS: &str = "/peers";
pub const GRAPHQL: &str = "/graphql";
/// Bundler endpoint returning its base64url-encoded signing public key.
pub const BUNDLER_PUBLIC_KEY: &str = "/public";

pub fn tx_offset(id: &TxId) -> String {
    format!("/tx/{id}/offset")
}

pub fn tx_status(id: &TxId) -> String {
    format!("/tx/{id}/status")
}

pub fn chunk(offset: u64) -> String {
    format!("/chunk/{offset}")
}

pub fn data_sync_record(start: u64, count: u32) -> String {
    format!("/data_sync_record/{start}/{count}")
}

/// Join a base URL (with or without trailing slash) and an absolute path.
pub fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
