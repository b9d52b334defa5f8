use std::fmt::{Display, Formatter};

use crate::cluster::ClusterError;
use crate::store::StoreError;

/// Engine-level error. Every variant carries a short category code via [`EngineError::code`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("{}", BatchFailures(.0))]
    Batch(Vec<(String, EngineError)>),
}

struct BatchFailures<'a>(&'a [(String, EngineError)]);

impl Display for BatchFailures<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} item(s) failed: ", self.0.len())?;
        for (i, (name, err)) in self.0.iter().enumerate() {
            if i > 0 { f.write_str("; ")?; }
            write!(f, "{name}: {err}")?;
        }
        Ok(())
    }
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
    pub fn conflict(msg: impl Into<String>) -> Self { Self::Conflict(msg.into()) }
    pub fn not_found(msg: impl Into<String>) -> Self { Self::NotFound(msg.into()) }
    pub fn internal(msg: impl Into<String>) -> Self { Self::Internal(msg.into()) }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Unsupported(_) => "unsupported",
            Self::Cluster(_) | Self::Store(_) | Self::Internal(_) => "internal",
            Self::Batch(_) => "batch",
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Cluster(c) => c.is_not_found(),
            _ => false,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::MultipleRows(what) => Self::Conflict(format!("multiple records match {what}")),
            StoreError::Duplicate(what) => Self::Conflict(format!("{what} already exists")),
            StoreError::Backend(msg) => Self::Store(msg),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self { Self::Internal(format!("serialization: {e}")) }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_by_category() {
        assert_eq!(EngineError::validation("x").code(), "bad_request");
        assert_eq!(EngineError::conflict("x").code(), "conflict");
        assert_eq!(EngineError::not_found("x").code(), "not_found");
        assert_eq!(EngineError::internal("x").code(), "internal");
        assert_eq!(EngineError::Cluster(ClusterError::Api("boom".into())).code(), "internal");
    }

    #[test]
    fn store_errors_map_to_engine_categories() {
        let e: EngineError = StoreError::MultipleRows("app/ns/a".into()).into();
        assert_eq!(e.code(), "conflict");
        let e: EngineError = StoreError::NotFound("app".into()).into();
        assert!(e.is_not_found());
        let e: EngineError = StoreError::Backend("io".into()).into();
        assert_eq!(e.code(), "internal");
    }

    #[test]
    fn batch_message_joins_items() {
        let e = EngineError::Batch(vec![
            ("a".into(), EngineError::validation("bad image")),
            ("b".into(), EngineError::conflict("exists")),
        ]);
        let s = e.to_string();
        assert!(s.starts_with("2 item(s) failed"), "{s}");
        assert!(s.contains("a: validation failed: bad image; b: conflict: exists"), "{s}");
    }
}
