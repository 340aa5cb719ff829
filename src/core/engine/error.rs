/// Классификация ошибок движка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Batch,
    Task,
    Executor,
    Environment,
    Transport,
    Payload,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Batch => "batch",
            ErrorCategory::Task => "task",
            ErrorCategory::Executor => "executor",
            ErrorCategory::Environment => "environment",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Payload => "payload",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Ошибки движка оптимизации. `Clone`, чтобы одна ошибка батча
/// доставлялась каждому ожидающему элементу
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Batch processing failed: {0}")]
    BatchProcessing(String),

    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    #[error("Task {task_id} failed after {attempts} attempts: {last_error}")]
    TaskRetriesExhausted {
        task_id: u64,
        attempts: u32,
        last_error: String,
    },

    #[error("Background execution is not supported in this environment")]
    UnsupportedEnvironment,

    #[error("Background executor failure: {0}")]
    ExecutorFailure(String),

    #[error("Batch returned {actual} results for {expected} items")]
    ResultMismatch { expected: usize, actual: usize },

    #[error("Result channel closed")]
    ChannelClosed,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::BatchProcessing(_) => ErrorCategory::Batch,
            EngineError::ResultMismatch { .. } => ErrorCategory::Batch,
            EngineError::TaskExecution(_) => ErrorCategory::Task,
            EngineError::TaskRetriesExhausted { .. } => ErrorCategory::Task,
            EngineError::ExecutorFailure(_) => ErrorCategory::Executor,
            EngineError::UnsupportedEnvironment => ErrorCategory::Environment,
            EngineError::Transport(_) => ErrorCategory::Transport,
            EngineError::InvalidPayload(_) => ErrorCategory::Payload,
            EngineError::ChannelClosed => ErrorCategory::Internal,
        }
    }

    /// Имеет ли смысл вызывающему повторить операцию
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::BatchProcessing(_)
                | EngineError::TaskExecution(_)
                | EngineError::TaskRetriesExhausted { .. }
                | EngineError::ExecutorFailure(_)
                | EngineError::Transport(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::InvalidPayload(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
