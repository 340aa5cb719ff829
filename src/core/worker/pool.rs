use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info};

use crate::core::engine::error::{EngineError, EngineResult};
use crate::core::worker::executor::{execute_guarded, TaskAction, TaskExecutor};

/// Задача, переданная в фоновый воркер
#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub task_id: u64,
    pub action: TaskAction,
    pub payload: Arc<Value>,
}

/// События, которые воркеры шлют менеджеру
#[derive(Debug)]
pub enum WorkerEvent {
    Completed {
        generation: u64,
        task_id: u64,
        outcome: EngineResult<Value>,
        elapsed: Duration,
    },
    Crashed {
        generation: u64,
        worker_id: usize,
        task_id: u64,
        reason: String,
    },
}

/// Пул фоновых потоков одного поколения.
///
/// Потоки разбирают общую очередь задач. Когда пул удаляется, очередь
/// закрывается и потоки завершаются сами.
pub struct WorkerPool {
    generation: u64,
    size: usize,
    task_tx: flume::Sender<WorkerMessage>,
    task_rx: flume::Receiver<WorkerMessage>,
    events: flume::Sender<WorkerEvent>,
    executor: Arc<dyn TaskExecutor>,
}

impl WorkerPool {
    pub fn spawn(
        size: usize,
        generation: u64,
        executor: Arc<dyn TaskExecutor>,
        events: flume::Sender<WorkerEvent>,
    ) -> EngineResult<Self> {
        let (task_tx, task_rx) = flume::unbounded();
        let mut pool = Self {
            generation,
            size: 0,
            task_tx,
            task_rx,
            events,
            executor,
        };
        pool.ensure_size(size.max(1))?;

        info!("🧵 Worker pool generation {} started with {} threads", generation, pool.size);
        Ok(pool)
    }

    /// Догнать число потоков до `target`. Лишние потоки не останавливаются
    pub fn ensure_size(&mut self, target: usize) -> EngineResult<()> {
        while self.size < target {
            let worker_id = self.size;
            let rx = self.task_rx.clone();
            let events = self.events.clone();
            let executor = Arc::clone(&self.executor);
            let generation = self.generation;

            thread::Builder::new()
                .name(format!("crypto-worker-{}-{}", generation, worker_id))
                .spawn(move || worker_loop(worker_id, generation, rx, executor, events))
                .map_err(|e| {
                    error!("❌ Failed to spawn worker thread: {}", e);
                    EngineError::UnsupportedEnvironment
                })?;

            self.size += 1;
        }
        Ok(())
    }

    pub fn submit(&self, message: WorkerMessage) -> EngineResult<()> {
        self.task_tx
            .send(message)
            .map_err(|_| EngineError::ExecutorFailure("worker queue closed".to_string()))
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn worker_loop(
    worker_id: usize,
    generation: u64,
    rx: flume::Receiver<WorkerMessage>,
    executor: Arc<dyn TaskExecutor>,
    events: flume::Sender<WorkerEvent>,
) {
    while let Ok(message) = rx.recv() {
        let started = Instant::now();
        let event = match execute_guarded(executor.as_ref(), message.action, &message.payload) {
            Ok(outcome) => WorkerEvent::Completed {
                generation,
                task_id: message.task_id,
                outcome,
                elapsed: started.elapsed(),
            },
            Err(reason) => {
                error!(
                    "💥 Worker {}-{} crashed on task {}: {}",
                    generation, worker_id, message.task_id, reason
                );
                let _ = events.send(WorkerEvent::Crashed {
                    generation,
                    worker_id,
                    task_id: message.task_id,
                    reason,
                });
                return;
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }
    debug!("Worker {}-{} stopped", generation, worker_id);
}
