use thiserror::Error;
use threadline_db::StoreError;
use threadline_types::models::{PrincipalId, ThreadId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store unreachable: {0}")]
    Transport(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl SyncError {
    /// Short machine-readable name, used by the transports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport",
            Self::PermissionDenied(_) => "permission_denied",
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::PermissionDenied(why) => Self::PermissionDenied(why),
            StoreError::InvalidPath(why) => Self::InvalidArgument(why),
            other => Self::Transport(other.to_string()),
        }
    }
}

pub fn require_principal(principal: Option<&PrincipalId>) -> Result<&PrincipalId, SyncError> {
    principal
        .filter(|p| !p.is_empty())
        .ok_or(SyncError::NotAuthenticated)
}

pub fn require_thread_id(thread_id: &ThreadId) -> Result<(), SyncError> {
    if thread_id.is_empty() {
        return Err(SyncError::InvalidArgument("thread id is empty".into()));
    }
    Ok(())
}
