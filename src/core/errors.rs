use thiserror::Error;

/// Failure of a single retrieval against the scan platform.
///
/// Every variant except `MalformedRecord` aborts the retrieval that produced it.
/// Malformed records are dropped where they are found and never escape the
/// retriever.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("authorization failure: {0}")]
    Authorization(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("retrieval cancelled")]
    Cancelled,
}

impl FetchError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => FetchError::Authorization(message),
            500..=599 => FetchError::Network(format!("server error {}: {}", status, message)),
            _ => FetchError::Rejected { status, message },
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, FetchError::Authorization(_))
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("not logged in, run `vfdash login` first")]
    NotAuthenticated,

    #[error("{0} is not an admin; this command requires the admin role")]
    NotAdmin(String),

    #[error("backend returned an empty token")]
    EmptyToken,

    #[error("session store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
