/// Errors produced by the slot store, node resolver and drainer.
///
/// The protocol surface maps each variant to a `ReplyKind` exactly once, at the
/// coordinator boundary; no other layer is allowed to translate an `Error` into an
/// HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request body was structurally invalid (bad hex, wrong length, empty field).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The slot is held by a different client than the one attempting a conditional update.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No node in the cluster's inventory matches the requested client id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A Kubernetes API call failed for a reason the caller should retry.
    #[error("transient backend error: {source}")]
    Transient {
        #[from]
        source: kube::Error,
    },
}
