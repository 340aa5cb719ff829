use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::engine::error::EngineResult;

/// Операции, которые движок отдаёт криптографическому исполнителю
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Encrypt,
    Decrypt,
    EncryptPresence,
    BatchEncrypt,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Encrypt => "encrypt",
            TaskAction::Decrypt => "decrypt",
            TaskAction::EncryptPresence => "encrypt_presence",
            TaskAction::BatchEncrypt => "batch_encrypt",
        }
    }
}

/// Криптографический исполнитель задач.
///
/// Один и тот же интерфейс используется и в фоновом воркере, и при
/// выполнении в вызывающем контексте.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, action: TaskAction, payload: &Value) -> EngineResult<Value>;
}

/// Исполнитель из замыкания
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(TaskAction, &Value) -> EngineResult<Value> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskAction, &Value) -> EngineResult<Value> + Send + Sync + 'static,
{
    fn execute(&self, action: TaskAction, payload: &Value) -> EngineResult<Value> {
        (self.f)(action, payload)
    }
}

/// Выполнить задачу, перехватив панику исполнителя. `Err` содержит текст паники
pub(crate) fn execute_guarded(
    executor: &dyn TaskExecutor,
    action: TaskAction,
    payload: &Value,
) -> Result<EngineResult<Value>, String> {
    panic::catch_unwind(AssertUnwindSafe(|| executor.execute(action, payload)))
        .map_err(panic_message)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fn_executor_forwards_calls() {
        let executor = FnExecutor::new(|action, payload| {
            Ok(json!({ "action": action.as_str(), "echo": payload }))
        });

        let result = executor.execute(TaskAction::EncryptPresence, &json!(1)).unwrap();
        assert_eq!(result, json!({ "action": "encrypt_presence", "echo": 1 }));
    }

    #[test]
    fn guarded_execution_reports_panics() {
        let executor = FnExecutor::new(|_, _| -> EngineResult<Value> { panic!("key material missing") });

        let outcome = execute_guarded(&executor, TaskAction::Decrypt, &Value::Null);
        assert_eq!(outcome, Err("key material missing".to_string()));
    }

    #[test]
    fn action_serializes_as_snake_case() {
        assert_eq!(serde_json::to_value(TaskAction::BatchEncrypt).unwrap(), json!("batch_encrypt"));
    }
}
