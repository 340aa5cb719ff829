use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::core::engine::context::EngineContext;
use crate::core::engine::error::{EngineError, EngineResult};
use crate::core::metrics::aggregator::WorkerOutcome;
use crate::core::metrics::window::MetricKind;
use crate::core::worker::executor::{execute_guarded, TaskAction, TaskExecutor};
use crate::core::worker::pool::{WorkerEvent, WorkerMessage, WorkerPool};

pub const DEFAULT_REINIT_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct OffloadOptions {
    /// Есть ли на платформе фоновое выполнение
    pub background_available: bool,
    /// Пауза перед пересозданием пула после падения воркера
    pub reinit_delay: Duration,
}

impl Default for OffloadOptions {
    fn default() -> Self {
        Self {
            background_available: true,
            reinit_delay: DEFAULT_REINIT_DELAY,
        }
    }
}

/// Чем завершилась задача для вызывающего
#[derive(Debug)]
enum Settlement {
    Done(EngineResult<Value>),
    RunInline { action: TaskAction, payload: Arc<Value> },
}

struct PendingTask {
    action: TaskAction,
    payload: Arc<Value>,
    retry_count: u32,
    responder: oneshot::Sender<Settlement>,
}

impl PendingTask {
    fn settle(self, settlement: Settlement) {
        // вызывающий мог уже уйти, результат тогда никому не нужен
        let _ = self.responder.send(settlement);
    }
}

#[derive(Default)]
struct OffloadState {
    in_flight: HashMap<u64, PendingTask>,
    pending: VecDeque<u64>,
    running: usize,
    pool: Option<WorkerPool>,
    generation: u64,
    reinitializing: bool,
}

#[derive(Default)]
struct OffloadCounters {
    dispatched: AtomicU64,
    attempts: AtomicU64,
    completed: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
    failed: AtomicU64,
    crashes: AtomicU64,
    processing_ms_total: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OffloadStats {
    pub running: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub generation: u64,
    /// Задачи, ушедшие в пул хотя бы раз
    pub dispatched: u64,
    /// Все отправки в пул, включая повторы
    pub attempts: u64,
    pub completed: u64,
    pub retries: u64,
    pub fallbacks: u64,
    pub failed: u64,
    pub crashes: u64,
    pub avg_processing_ms: f64,
}

/// Менеджер выноса криптографии в фоновые потоки.
///
/// Держит не больше `max_concurrency` задач в работе, остальные ждут в FIFO.
/// Неудачные задачи повторяются с паузой `retry_delay`, после исчерпания
/// попыток выполняются в вызывающем контексте (если это разрешено).
/// Падение воркера отклоняет все незавершённые задачи и пересоздаёт пул.
pub struct WorkerOffloadManager {
    ctx: EngineContext,
    executor: Arc<dyn TaskExecutor>,
    options: OffloadOptions,
    state: Mutex<OffloadState>,
    next_task_id: AtomicU64,
    counters: OffloadCounters,
}

impl WorkerOffloadManager {
    pub fn new(
        ctx: EngineContext,
        executor: Arc<dyn TaskExecutor>,
        options: OffloadOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            executor,
            options,
            state: Mutex::new(OffloadState::default()),
            next_task_id: AtomicU64::new(1),
            counters: OffloadCounters::default(),
        })
    }

    /// Выполнить задачу в фоне.
    ///
    /// Если фоновое выполнение выключено, задача выполняется сразу в
    /// вызывающем контексте. Если платформа его не поддерживает, то тоже
    /// inline при разрешённом fallback, иначе `UnsupportedEnvironment`.
    pub async fn dispatch(
        self: &Arc<Self>,
        action: TaskAction,
        payload: Value,
    ) -> EngineResult<Value> {
        let settings = self.ctx.config().worker;

        if !settings.enabled {
            return self.run_inline(action, &payload);
        }
        if !self.options.background_available {
            return self.without_background(action, &payload, settings.fallback_to_main_thread);
        }

        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock();

            if state.pool.is_none() && !state.reinitializing {
                if let Err(e) = self.start_pool(&mut state, settings.max_concurrency) {
                    drop(state);
                    warn!("⚠️ Background execution unavailable: {}", e);
                    return self.without_background(
                        action,
                        &payload,
                        settings.fallback_to_main_thread,
                    );
                }
            }

            state.in_flight.insert(
                task_id,
                PendingTask {
                    action,
                    payload: Arc::new(payload),
                    retry_count: 0,
                    responder: tx,
                },
            );
            state.pending.push_back(task_id);
            debug!("📥 Task {} ({}) queued", task_id, action.as_str());
            self.drain(&mut state);
        }

        match rx.await.map_err(|_| EngineError::ChannelClosed)? {
            Settlement::Done(result) => result,
            Settlement::RunInline { action, payload } => {
                info!("↩️ Task {} falls back to the calling context", task_id);
                self.run_inline(action, &payload)
            }
        }
    }

    pub fn stats(&self) -> OffloadStats {
        let (running, pending, in_flight, generation) = {
            let state = self.state.lock();
            (
                state.running,
                state.pending.len(),
                state.in_flight.len(),
                state.generation,
            )
        };

        let completed = self.counters.completed.load(Ordering::Relaxed);
        let total_ms = self.counters.processing_ms_total.load(Ordering::Relaxed);

        OffloadStats {
            running,
            pending,
            in_flight,
            generation,
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            completed,
            retries: self.counters.retries.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            crashes: self.counters.crashes.load(Ordering::Relaxed),
            avg_processing_ms: if completed > 0 {
                total_ms as f64 / completed as f64
            } else {
                0.0
            },
        }
    }

    /// Сбросить счётчики. Очередь и задачи в работе не трогаются
    pub fn reset_metrics(&self) {
        for counter in [
            &self.counters.dispatched,
            &self.counters.attempts,
            &self.counters.completed,
            &self.counters.retries,
            &self.counters.fallbacks,
            &self.counters.failed,
            &self.counters.crashes,
            &self.counters.processing_ms_total,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Остановить пул и отклонить все незавершённые задачи
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.pool = None;
        state.running = 0;
        state.pending.clear();
        let rejected = state.in_flight.len();
        for (_, task) in state.in_flight.drain() {
            task.settle(Settlement::Done(Err(EngineError::ExecutorFailure(
                "offload manager shut down".to_string(),
            ))));
        }
        info!("🛑 Offload manager stopped, {} tasks rejected", rejected);
    }

    fn without_background(
        &self,
        action: TaskAction,
        payload: &Value,
        fallback: bool,
    ) -> EngineResult<Value> {
        if fallback {
            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            self.ctx.metrics().record_worker_outcome(WorkerOutcome::FellBack);
            self.run_inline(action, payload)
        } else {
            Err(EngineError::UnsupportedEnvironment)
        }
    }

    fn run_inline(&self, action: TaskAction, payload: &Value) -> EngineResult<Value> {
        execute_guarded(self.executor.as_ref(), action, payload).unwrap_or_else(|reason| {
            Err(EngineError::TaskExecution(format!(
                "{} panicked: {}",
                action.as_str(),
                reason
            )))
        })
    }

    fn start_pool(self: &Arc<Self>, state: &mut OffloadState, size: usize) -> EngineResult<()> {
        let generation = state.generation + 1;
        let (events_tx, events_rx) = flume::unbounded();
        let pool = WorkerPool::spawn(size, generation, Arc::clone(&self.executor), events_tx)?;

        state.generation = generation;
        state.pool = Some(pool);

        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Ok(event) = events_rx.recv_async().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.handle_event(event);
            }
            debug!("Event listener for generation {} finished", generation);
        });

        Ok(())
    }

    /// Запустить задачи из очереди, пока есть свободные слоты
    fn drain(self: &Arc<Self>, state: &mut OffloadState) {
        let max = self.ctx.config().worker.max_concurrency.max(1);

        let Some(pool) = state.pool.as_mut() else {
            return;
        };
        if let Err(e) = pool.ensure_size(max) {
            warn!("⚠️ Worker pool could not grow to {}: {}", max, e);
        }

        while state.running < max {
            let Some(task_id) = state.pending.pop_front() else {
                break;
            };
            let Some(task) = state.in_flight.get(&task_id) else {
                continue;
            };

            let first_attempt = task.retry_count == 0;
            let message = WorkerMessage {
                task_id,
                action: task.action,
                payload: Arc::clone(&task.payload),
            };
            let submitted = match state.pool.as_ref() {
                Some(pool) => pool.submit(message),
                None => return,
            };

            match submitted {
                Ok(()) => {
                    state.running += 1;
                    self.counters.attempts.fetch_add(1, Ordering::Relaxed);
                    if first_attempt {
                        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!("🚀 Task {} dispatched ({} running)", task_id, state.running);
                }
                Err(e) => {
                    state.pending.push_front(task_id);
                    self.teardown(state, e.to_string());
                    return;
                }
            }
        }
    }

    fn handle_event(self: &Arc<Self>, event: WorkerEvent) {
        let mut state = self.state.lock();

        match event {
            WorkerEvent::Completed {
                generation,
                task_id,
                outcome,
                elapsed,
            } => {
                if generation != state.generation {
                    return;
                }
                state.running = state.running.saturating_sub(1);
                self.ctx
                    .metrics()
                    .record_duration(MetricKind::WorkerTaskTime, elapsed);

                match outcome {
                    Ok(value) => {
                        if let Some(task) = state.in_flight.remove(&task_id) {
                            self.counters.completed.fetch_add(1, Ordering::Relaxed);
                            self.counters
                                .processing_ms_total
                                .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
                            self.ctx.metrics().record_worker_outcome(WorkerOutcome::Succeeded);
                            task.settle(Settlement::Done(Ok(value)));
                        }
                    }
                    Err(e) => self.handle_failure(&mut state, task_id, e),
                }

                self.drain(&mut state);
            }
            WorkerEvent::Crashed {
                generation,
                worker_id,
                task_id,
                reason,
            } => {
                if generation != state.generation {
                    return;
                }
                error!(
                    "💥 Worker {} of generation {} crashed on task {}",
                    worker_id, generation, task_id
                );
                self.teardown(&mut state, reason);
            }
        }
    }

    fn handle_failure(self: &Arc<Self>, state: &mut OffloadState, task_id: u64, err: EngineError) {
        let settings = self.ctx.config().worker;

        let Some(task) = state.in_flight.get_mut(&task_id) else {
            return;
        };

        if task.retry_count < settings.max_retries {
            task.retry_count += 1;
            let attempt = task.retry_count;
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            self.ctx.metrics().record_worker_outcome(WorkerOutcome::Retried);
            warn!(
                "🔁 Task {} failed ({}), retry {}/{} in {:?}",
                task_id,
                err,
                attempt,
                settings.max_retries,
                settings.get_retry_delay()
            );

            let manager = Arc::clone(self);
            let delay = settings.get_retry_delay();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                manager.retry(task_id);
            });
            return;
        }

        let Some(task) = state.in_flight.remove(&task_id) else {
            return;
        };
        let attempts = task.retry_count + 1;

        if settings.fallback_to_main_thread {
            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            self.ctx.metrics().record_worker_outcome(WorkerOutcome::FellBack);
            warn!(
                "⚠️ Task {} exhausted {} attempts, running in the calling context",
                task_id, attempts
            );
            let (action, payload) = (task.action, Arc::clone(&task.payload));
            task.settle(Settlement::RunInline { action, payload });
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.ctx.metrics().record_worker_outcome(WorkerOutcome::Failed);
            error!("❌ Task {} failed after {} attempts: {}", task_id, attempts, err);
            task.settle(Settlement::Done(Err(EngineError::TaskRetriesExhausted {
                task_id,
                attempts,
                last_error: err.to_string(),
            })));
        }
    }

    /// Повторная попытка после паузы. Без свободного слота задача встаёт в начало очереди
    fn retry(self: &Arc<Self>, task_id: u64) {
        let mut state = self.state.lock();
        if !state.in_flight.contains_key(&task_id) {
            return;
        }
        state.pending.push_front(task_id);
        self.drain(&mut state);
    }

    /// Снести пул после падения: отклонить всё незавершённое и запланировать пересоздание
    fn teardown(self: &Arc<Self>, state: &mut OffloadState, reason: String) {
        self.counters.crashes.fetch_add(1, Ordering::Relaxed);
        state.pool = None;
        state.running = 0;
        state.pending.clear();

        let rejected = state.in_flight.len();
        for (_, task) in state.in_flight.drain() {
            task.settle(Settlement::Done(Err(EngineError::ExecutorFailure(
                reason.clone(),
            ))));
        }
        error!(
            "💥 Worker pool generation {} torn down, {} tasks rejected: {}",
            state.generation, rejected, reason
        );

        if state.reinitializing {
            return;
        }
        state.reinitializing = true;

        let weak = Arc::downgrade(self);
        let delay = self.options.reinit_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = weak.upgrade() {
                manager.reinitialize();
            }
        });
    }

    fn reinitialize(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.reinitializing = false;
        if state.pool.is_some() {
            return;
        }

        let size = self.ctx.config().worker.max_concurrency;
        match self.start_pool(&mut state, size) {
            Ok(()) => {
                info!("🔄 Worker pool reinitialized as generation {}", state.generation);
                self.drain(&mut state);
            }
            Err(e) => {
                error!("❌ Worker pool reinitialization failed: {}", e);
                state.pending.clear();
                for (_, task) in state.in_flight.drain() {
                    task.settle(Settlement::Done(Err(EngineError::ExecutorFailure(
                        e.to_string(),
                    ))));
                }
            }
        }
    }
}
