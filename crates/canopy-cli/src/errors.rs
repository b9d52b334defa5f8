use std::fmt;

use control_plane::cluster::ClusterError;
use control_plane::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliErrorKind {
    #[error("usage error: {0}")] Usage(String),
    #[error("config error: {0}")] Config(String),
    #[error("runtime error: {0}")] Runtime(String),
    #[error("io error: {0}")] Io(String),
    #[error("network error: {0}")] Network(String),
    #[error("conflict: {0}")] Conflict(String),
    #[error("not found: {0}")] NotFound(String),
}

#[derive(Debug)]
pub struct CliError { pub kind: CliErrorKind, pub source: Option<anyhow::Error> }
impl fmt::Display for CliError { fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.kind.fmt(f) } }
impl std::error::Error for CliError { fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { self.source.as_ref().map(|e| e.as_ref() as _) } }

impl CliErrorKind {
    pub fn code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 10,
            Self::Runtime(_) => 20,
            Self::Io(_) => 30,
            Self::Network(_) => 40,
            Self::Conflict(_) => 50,
            Self::NotFound(_) => 60,
        }
    }
}

impl CliError {
    pub fn new(kind: CliErrorKind) -> Self { Self { kind, source: None } }
    pub fn with_source<E: Into<anyhow::Error>>(kind: CliErrorKind, err: E) -> Self { Self { kind, source: Some(err.into()) } }
}

impl From<std::io::Error> for CliError { fn from(e: std::io::Error) -> Self { Self::with_source(CliErrorKind::Io(e.to_string()), e) } }

fn kind_of(e: &EngineError) -> CliErrorKind {
    let msg = e.to_string();
    match e {
        EngineError::Validation(_) | EngineError::Unsupported(_) => CliErrorKind::Usage(msg),
        EngineError::Conflict(_) => CliErrorKind::Conflict(msg),
        EngineError::NotFound(_) => CliErrorKind::NotFound(msg),
        EngineError::Cluster(ClusterError::Connect(..)) => CliErrorKind::Network(msg),
        EngineError::Cluster(c) if c.is_not_found() => CliErrorKind::NotFound(msg),
        // A batch whose failures all share one category exits with that category.
        EngineError::Batch(failures) => {
            let codes: Vec<CliErrorKind> = failures.iter().map(|(_, f)| kind_of(f)).collect();
            match codes.first() {
                Some(first) if codes.iter().all(|k| k.code() == first.code()) => with_message(first, msg),
                _ => CliErrorKind::Runtime(msg),
            }
        }
        _ => CliErrorKind::Runtime(msg),
    }
}

fn with_message(kind: &CliErrorKind, msg: String) -> CliErrorKind {
    match kind {
        CliErrorKind::Usage(_) => CliErrorKind::Usage(msg),
        CliErrorKind::Config(_) => CliErrorKind::Config(msg),
        CliErrorKind::Runtime(_) => CliErrorKind::Runtime(msg),
        CliErrorKind::Io(_) => CliErrorKind::Io(msg),
        CliErrorKind::Network(_) => CliErrorKind::Network(msg),
        CliErrorKind::Conflict(_) => CliErrorKind::Conflict(msg),
        CliErrorKind::NotFound(_) => CliErrorKind::NotFound(msg),
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self { Self::with_source(kind_of(&e), e) }
}
