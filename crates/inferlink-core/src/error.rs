/// Errors surfaced by the inference protocol.
///
/// Construction mistakes are reported synchronously at the call that
/// detected them; `Execution` only ever arrives through a completed
/// response's status.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ServerError {
    /// Bad configuration or an unusable model repository.
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("{what} not ready after {attempts} attempts")]
    ReadinessTimeout { what: String, attempts: usize },

    #[error("unknown model '{model}' (version {version})")]
    InvalidModel { model: String, version: String },

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("unknown input '{0}'")]
    UnknownInput(String),

    #[error("unknown output '{0}'")]
    UnknownOutput(String),

    #[error("input '{0}' specified more than once")]
    DuplicateInput(String),

    #[error("no data bound for input '{0}'")]
    MissingInput(String),

    #[error("byte size mismatch for '{name}': expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("unexpected memory type for '{name}': expected {expected}, got {actual}")]
    UnexpectedMemoryType {
        name: String,
        expected: crate::MemoryType,
        actual: crate::MemoryType,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Submission not accepted; no completion will follow.
    #[error("request rejected: {0}")]
    SchedulingRejected(String),

    #[error("execution failed: {0}")]
    Execution(String),

    /// The engine dropped a completion without resolving it.
    #[error("engine dropped the completion for request {0}")]
    EngineDropped(u64),

    #[error("timed out waiting for completion of request {0}")]
    CompletionTimeout(u64),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(err.to_string())
    }
}

impl From<prost::DecodeError> for ServerError {
    fn from(err: prost::DecodeError) -> Self {
        ServerError::MalformedHeader(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
