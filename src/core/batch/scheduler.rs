use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::engine::context::EngineContext;
use crate::core::engine::error::{EngineError, EngineResult};
use crate::core::metrics::window::MetricKind;

/// Задержка выше этого значения (мс) считается медленной сетью
const HIGH_LATENCY_MS: f64 = 200.0;
/// Задержка ниже этого значения (мс) считается быстрой сетью
const LOW_LATENCY_MS: f64 = 50.0;
/// Эффективность батчинга ниже этого процента считается плохой
const POOR_EFFICIENCY_PCT: f64 = 20.0;
const HIGH_LATENCY_FACTOR: f64 = 1.5;
const LOW_LATENCY_FACTOR: f64 = 0.6;
const POOR_EFFICIENCY_FACTOR: f64 = 0.5;
const MIN_FLUSH_DELAY: Duration = Duration::from_millis(10);

/// Результат обработки батча: по элементу на позицию либо одно значение на всех
#[derive(Debug, Clone)]
pub enum BatchOutput<R> {
    PerItem(Vec<R>),
    Shared(R),
}

pub type BatchFuture<R> = Pin<Box<dyn Future<Output = EngineResult<BatchOutput<R>>> + Send>>;
pub type BatchProcessor<T, R> = Arc<dyn Fn(Vec<T>) -> BatchFuture<R> + Send + Sync>;

struct QueuedItem<T, R> {
    payload: T,
    responder: oneshot::Sender<EngineResult<R>>,
}

struct BatchQueue<T, R> {
    items: Vec<QueuedItem<T, R>>,
    timer: Option<JoinHandle<()>>,
    processor: Option<BatchProcessor<T, R>>,
    cycle: u64,
}

impl<T, R> BatchQueue<T, R> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            timer: None,
            processor: None,
            cycle: 0,
        }
    }

    /// Забрать накопленные элементы; очередь сразу начинает новый цикл
    fn take_batch(&mut self) -> TakenBatch<T, R> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.cycle += 1;

        TakenBatch {
            items: std::mem::take(&mut self.items),
            processor: self.processor.clone(),
        }
    }
}

struct TakenBatch<T, R> {
    items: Vec<QueuedItem<T, R>>,
    processor: Option<BatchProcessor<T, R>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSchedulerStats {
    pub flushes: u64,
    pub items_processed: u64,
    pub failed_flushes: u64,
}

/// Планировщик батчей с именованными очередями и адаптивной задержкой сброса.
///
/// Состояния очереди: Empty -> Accumulating -> Flushing -> Empty. Элементы,
/// пришедшие во время Flushing, попадают в следующий цикл.
pub struct BatchScheduler<T, R> {
    ctx: EngineContext,
    queues: Mutex<HashMap<String, BatchQueue<T, R>>>,
    flushes: AtomicU64,
    items_processed: AtomicU64,
    failed_flushes: AtomicU64,
}

impl<T, R> BatchScheduler<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    pub fn new(ctx: EngineContext) -> Arc<Self> {
        info!("📦 BatchScheduler initialized");
        Arc::new(Self {
            ctx,
            queues: Mutex::new(HashMap::new()),
            flushes: AtomicU64::new(0),
            items_processed: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
        })
    }

    /// Поставить элемент в очередь `queue`. Future завершается результатом
    /// именно этого элемента из итогового батча.
    pub async fn submit<F, Fut>(self: &Arc<Self>, queue: &str, item: T, process: F) -> EngineResult<R>
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<BatchOutput<R>>> + Send + 'static,
    {
        let settings = self.ctx.config().batch;

        if !settings.enabled {
            return self.process_single(queue, item, process).await;
        }

        let processor: BatchProcessor<T, R> =
            Arc::new(move |items| -> BatchFuture<R> { Box::pin(process(items)) });
        let delay = self.adaptive_delay(queue);
        let (tx, rx) = oneshot::channel();

        let ready = {
            let mut queues = self.queues.lock();
            let state = queues.entry(queue.to_string()).or_insert_with(BatchQueue::new);

            state.items.push(QueuedItem {
                payload: item,
                responder: tx,
            });
            state.processor = Some(processor);

            if state.items.len() >= settings.max_items.max(1) {
                debug!("📦 Queue '{}' reached {} items, flushing immediately", queue, state.items.len());
                Some(state.take_batch())
            } else {
                if state.timer.is_none() {
                    state.timer = Some(self.arm_timer(queue.to_string(), state.cycle, delay));
                }
                None
            }
        };

        if let Some(batch) = ready {
            let this = Arc::clone(self);
            let name = queue.to_string();
            tokio::spawn(async move {
                this.run_flush(&name, batch).await;
            });
        }

        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    async fn process_single<F, Fut>(&self, queue: &str, item: T, process: F) -> EngineResult<R>
    where
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = EngineResult<BatchOutput<R>>>,
    {
        let started = Instant::now();
        let output = process(vec![item]).await?;
        self.ctx.metrics().record_unit_cost(queue, started.elapsed());

        match output {
            BatchOutput::Shared(result) => Ok(result),
            BatchOutput::PerItem(mut results) => {
                if results.len() != 1 {
                    return Err(EngineError::ResultMismatch {
                        expected: 1,
                        actual: results.len(),
                    });
                }
                Ok(results.remove(0))
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, queue: String, cycle: u64, delay: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(this) = weak.upgrade() {
                this.flush_cycle(&queue, cycle).await;
            }
        })
    }

    /// Сброс по таймеру. Цикл сверяется, чтобы не задеть уже начавшийся новый батч
    async fn flush_cycle(&self, queue: &str, cycle: u64) {
        let batch = {
            let mut queues = self.queues.lock();
            let Some(state) = queues.get_mut(queue) else {
                return;
            };
            if state.cycle != cycle {
                return;
            }
            // таймер и есть текущая задача, abort ей не нужен
            state.timer = None;
            state.take_batch()
        };

        self.run_flush(queue, batch).await;
    }

    /// Принудительно сбросить очередь и дождаться обработки
    pub async fn flush(&self, queue: &str) {
        let batch = {
            let mut queues = self.queues.lock();
            match queues.get_mut(queue) {
                Some(state) if !state.items.is_empty() => state.take_batch(),
                _ => return,
            }
        };

        self.run_flush(queue, batch).await;
    }

    async fn run_flush(&self, queue: &str, batch: TakenBatch<T, R>) {
        let TakenBatch { items, processor } = batch;
        if items.is_empty() {
            return;
        }

        let size = items.len();
        let (payloads, responders): (Vec<T>, Vec<_>) = items
            .into_iter()
            .map(|item| (item.payload, item.responder))
            .unzip();

        let Some(processor) = processor else {
            warn!("⚠️ Queue '{}' flushed without a processor", queue);
            for responder in responders {
                let _ = responder.send(Err(EngineError::BatchProcessing(
                    "no batch processor registered".to_string(),
                )));
            }
            return;
        };

        let started = Instant::now();
        let result = processor(payloads).await;
        let elapsed = started.elapsed();

        self.ctx.metrics().record_batch(queue, size, elapsed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.items_processed.fetch_add(size as u64, Ordering::Relaxed);

        match result {
            Ok(BatchOutput::PerItem(results)) => {
                let actual = results.len();
                if actual != size {
                    warn!("⚠️ Queue '{}': batch of {} returned {} results", queue, size, actual);
                }

                let mut results = results.into_iter();
                for responder in responders {
                    let outcome = results.next().ok_or(EngineError::ResultMismatch {
                        expected: size,
                        actual,
                    });
                    let _ = responder.send(outcome);
                }
            }
            Ok(BatchOutput::Shared(result)) => {
                for responder in responders {
                    let _ = responder.send(Ok(result.clone()));
                }
            }
            Err(e) => {
                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                warn!("❌ Queue '{}': batch of {} failed: {}", queue, size, e);
                for responder in responders {
                    let _ = responder.send(Err(e.clone()));
                }
            }
        }

        debug!("📦 Queue '{}' flushed {} items in {:?}", queue, size, elapsed);
    }

    /// Задержка сброса очереди `queue` по текущим метрикам.
    ///
    /// Медленная сеть увеличивает задержку (больше элементов в батче),
    /// быстрая сеть или плохая эффективность батчинга этой очереди уменьшают её.
    pub fn adaptive_delay(&self, queue: &str) -> Duration {
        let base = self.ctx.config().batch.get_max_wait();
        let metrics = self.ctx.metrics();

        let mut factor = 1.0;

        if metrics.window_len(MetricKind::MessageLatency) > 0 {
            let latency = metrics.average(MetricKind::MessageLatency);
            if latency > HIGH_LATENCY_MS {
                factor *= HIGH_LATENCY_FACTOR;
            } else if latency < LOW_LATENCY_MS {
                factor *= LOW_LATENCY_FACTOR;
            }
        }

        if metrics.batch_window_len(queue) > 0
            && metrics.batch_efficiency(queue) < POOR_EFFICIENCY_PCT
        {
            factor *= POOR_EFFICIENCY_FACTOR;
        }

        let ceiling = base * 2;
        let floor = (base / 4).max(MIN_FLUSH_DELAY).min(base);

        let millis = (base.as_millis() as f64 * factor).round() as u64;
        Duration::from_millis(millis).clamp(floor, ceiling)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, |state| state.items.len())
    }

    pub fn stats(&self) -> BatchSchedulerStats {
        BatchSchedulerStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchSettingsUpdate, OptimizationConfigUpdate};
    use tokio::time::Instant as TokioInstant;

    fn context(max_items: usize, max_wait_ms: u64) -> EngineContext {
        let ctx = EngineContext::test_context();
        ctx.update_config(&OptimizationConfigUpdate {
            batch: Some(BatchSettingsUpdate {
                enabled: Some(true),
                max_items: Some(max_items),
                max_wait_ms: Some(max_wait_ms),
            }),
            ..Default::default()
        });
        ctx
    }

    type FlushLog = Arc<Mutex<Vec<(Duration, Vec<u32>)>>>;

    fn echo_processor(
        log: FlushLog,
        start: TokioInstant,
    ) -> impl Fn(Vec<u32>) -> BatchFuture<u32> + Clone + Send + Sync + 'static {
        move |items: Vec<u32>| {
            let log = Arc::clone(&log);
            let fut: BatchFuture<u32> = Box::pin(async move {
                log.lock().push((start.elapsed(), items.clone()));
                Ok(BatchOutput::PerItem(items.iter().map(|i| i * 10).collect()))
            });
            fut
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_both_items_after_max_wait() {
        let scheduler = BatchScheduler::<u32, u32>::new(context(3, 100));
        let log: FlushLog = Arc::default();
        let start = TokioInstant::now();
        let process = echo_processor(Arc::clone(&log), start);

        let s = Arc::clone(&scheduler);
        let p = process.clone();
        let first = tokio::spawn(async move { s.submit("presence", 1, p).await });
        let s = Arc::clone(&scheduler);
        let second = tokio::spawn(async move { s.submit("presence", 2, process).await });

        tokio::time::sleep(Duration::from_millis(150)).await;

        {
            let flushes = log.lock();
            assert_eq!(flushes.len(), 1);
            let (at, items) = &flushes[0];
            assert_eq!(items, &vec![1, 2]);
            assert!(*at >= Duration::from_millis(100));
            assert!(*at < Duration::from_millis(150));
        }

        assert_eq!(first.await.unwrap(), Ok(10));
        assert_eq!(second.await.unwrap(), Ok(20));
        assert_eq!(scheduler.stats().flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_max_items_flushes_immediately_in_order() {
        let scheduler = BatchScheduler::<u32, u32>::new(context(3, 100));
        let log: FlushLog = Arc::default();
        let start = TokioInstant::now();
        let process = echo_processor(Arc::clone(&log), start);

        let mut handles = Vec::new();
        for item in [7, 8, 9] {
            let s = Arc::clone(&scheduler);
            let p = process.clone();
            handles.push(tokio::spawn(async move { s.submit("encrypt", item, p).await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(results, vec![70, 80, 90]);
        let flushes = log.lock();
        assert_eq!(flushes.len(), 1);
        assert!(flushes[0].0 < Duration::from_millis(100));
        assert_eq!(scheduler.queue_len("encrypt"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_rejects_every_item() {
        let scheduler = BatchScheduler::<u32, u32>::new(context(2, 50));
        let process = |_items: Vec<u32>| async {
            Err::<BatchOutput<u32>, _>(EngineError::BatchProcessing("executor down".into()))
        };

        let s = Arc::clone(&scheduler);
        let a = tokio::spawn(async move { s.submit("q", 1, process).await });
        let s = Arc::clone(&scheduler);
        let b = tokio::spawn(async move { s.submit("q", 2, process).await });

        let expected = Err(EngineError::BatchProcessing("executor down".into()));
        assert_eq!(a.await.unwrap(), expected);
        assert_eq!(b.await.unwrap(), expected);
        assert_eq!(scheduler.stats().failed_flushes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_result_is_delivered_to_all() {
        let scheduler = BatchScheduler::<u32, String>::new(context(2, 50));
        let process = |items: Vec<u32>| async move {
            Ok(BatchOutput::Shared(format!("ack:{}", items.len())))
        };

        let s = Arc::clone(&scheduler);
        let a = tokio::spawn(async move { s.submit("acks", 1, process).await });
        let s = Arc::clone(&scheduler);
        let b = tokio::spawn(async move { s.submit("acks", 2, process).await });

        assert_eq!(a.await.unwrap().unwrap(), "ack:2");
        assert_eq!(b.await.unwrap().unwrap(), "ack:2");
    }

    #[tokio::test(start_paused = true)]
    async fn short_result_rejects_trailing_items() {
        let scheduler = BatchScheduler::<u32, u32>::new(context(2, 50));
        let process = |_items: Vec<u32>| async move { Ok(BatchOutput::PerItem(vec![1])) };

        let s = Arc::clone(&scheduler);
        let a = tokio::spawn(async move { s.submit("q", 1, process).await });
        tokio::task::yield_now().await;
        let s = Arc::clone(&scheduler);
        let b = tokio::spawn(async move { s.submit("q", 2, process).await });

        assert_eq!(a.await.unwrap(), Ok(1));
        assert_eq!(
            b.await.unwrap(),
            Err(EngineError::ResultMismatch { expected: 2, actual: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_batching_processes_each_item_alone() {
        let ctx = context(10, 1000);
        ctx.update_config(&OptimizationConfigUpdate {
            batch: Some(BatchSettingsUpdate {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
        let scheduler = BatchScheduler::<u32, u32>::new(ctx);
        let log: FlushLog = Arc::default();
        let process = echo_processor(Arc::clone(&log), TokioInstant::now());

        assert_eq!(scheduler.submit("q", 4, process.clone()).await, Ok(40));
        assert_eq!(scheduler.submit("q", 5, process).await, Ok(50));

        let flushes = log.lock();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[0].1, vec![4]);
        assert_eq!(flushes[0].0, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_during_flush_start_a_new_batch() {
        let scheduler = BatchScheduler::<u32, u32>::new(context(2, 100));
        let log: FlushLog = Arc::default();
        let start = TokioInstant::now();
        let slow_log = Arc::clone(&log);
        let process = move |items: Vec<u32>| {
            let log = Arc::clone(&slow_log);
            async move {
                log.lock().push((start.elapsed(), items.clone()));
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(BatchOutput::PerItem(items))
            }
        };

        let mut handles = Vec::new();
        for item in [1, 2] {
            let s = Arc::clone(&scheduler);
            let p = process.clone();
            handles.push(tokio::spawn(async move { s.submit("q", item, p).await }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let s = Arc::clone(&scheduler);
        let p = process.clone();
        handles.push(tokio::spawn(async move { s.submit("q", 3, p).await }));

        for (handle, expected) in handles.into_iter().zip([1, 2, 3]) {
            assert_eq!(handle.await.unwrap(), Ok(expected));
        }

        let flushes = log.lock();
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[0].1, vec![1, 2]);
        assert_eq!(flushes[1].1, vec![3]);
        assert!(flushes[1].0 >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_flush_skips_timer() {
        let scheduler = BatchScheduler::<u32, u32>::new(context(10, 1000));
        let log: FlushLog = Arc::default();
        let process = echo_processor(Arc::clone(&log), TokioInstant::now());

        let s = Arc::clone(&scheduler);
        let pending = tokio::spawn(async move { s.submit("q", 6, process).await });
        tokio::task::yield_now().await;
        assert_eq!(scheduler.queue_len("q"), 1);

        scheduler.flush("q").await;
        assert_eq!(pending.await.unwrap(), Ok(60));
        assert_eq!(log.lock()[0].0, Duration::ZERO);
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[tokio::test]
    async fn adaptive_delay_follows_metrics() {
        let ctx = context(10, 200);
        let scheduler = BatchScheduler::<u32, u32>::new(ctx.clone());
        assert_eq!(scheduler.adaptive_delay("q"), ms(200));

        ctx.metrics().record(MetricKind::MessageLatency, 400.0);
        assert_eq!(scheduler.adaptive_delay("q"), ms(300));

        ctx.metrics().reset();
        ctx.metrics().record(MetricKind::MessageLatency, 10.0);
        assert_eq!(scheduler.adaptive_delay("q"), ms(120));

        // медленная сеть, но батчинг очереди неэффективен
        ctx.metrics().reset();
        ctx.metrics().record(MetricKind::MessageLatency, 400.0);
        ctx.metrics().record_unit_cost("q", ms(10));
        ctx.metrics().record_batch("q", 2, ms(40));
        assert_eq!(scheduler.adaptive_delay("q"), ms(150));
        // у соседней очереди своих данных нет
        assert_eq!(scheduler.adaptive_delay("other"), ms(300));

        // всё плохо сразу: упираемся в нижнюю границу
        ctx.metrics().reset();
        ctx.metrics().record(MetricKind::MessageLatency, 10.0);
        ctx.metrics().record_unit_cost("q", ms(10));
        ctx.metrics().record_batch("q", 2, ms(40));
        assert_eq!(scheduler.adaptive_delay("q"), ms(60));
    }

    #[tokio::test]
    async fn fast_end_to_end_timings_do_not_shrink_the_delay() {
        let ctx = context(10, 100);
        let scheduler = BatchScheduler::<u32, u32>::new(ctx.clone());

        // батч из 4 за 40мс при стоимости элемента 20мс: экономия 50%
        ctx.metrics().record_unit_cost("encrypt", ms(20));
        ctx.metrics().record_batch("encrypt", 4, ms(40));
        // попадания в кэш дают почти нулевое сквозное время шифрования
        for _ in 0..50 {
            ctx.metrics().record(MetricKind::EncryptionTime, 0.05);
        }

        assert_eq!(scheduler.adaptive_delay("encrypt"), ms(100));
    }

    async fn submit_round(
        scheduler: &Arc<BatchScheduler<u32, u32>>,
        items: &[u32],
        process: impl Fn(Vec<u32>) -> BatchFuture<u32> + Clone + Send + Sync + 'static,
    ) -> Duration {
        let round_start = TokioInstant::now();
        let mut handles = Vec::new();
        for &item in items {
            let s = Arc::clone(scheduler);
            let p = process.clone();
            handles.push(tokio::spawn(async move { s.submit("encrypt", item, p).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        round_start.elapsed()
    }

    /// Обработчик, тратящий `per_item` на каждый элемент и `fixed` на вызов
    fn costed_processor(
        log: FlushLog,
        start: TokioInstant,
        per_item: Duration,
        fixed: Duration,
    ) -> impl Fn(Vec<u32>) -> BatchFuture<u32> + Clone + Send + Sync + 'static {
        move |items: Vec<u32>| {
            let log = Arc::clone(&log);
            let fut: BatchFuture<u32> = Box::pin(async move {
                log.lock().push((start.elapsed(), items.clone()));
                tokio::time::sleep(fixed + per_item * items.len() as u32).await;
                Ok(BatchOutput::PerItem(items))
            });
            fut
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_high_latency_stretches_the_flush_timer() {
        let ctx = context(10, 100);
        ctx.metrics().record(MetricKind::MessageLatency, 300.0);
        let scheduler = BatchScheduler::<u32, u32>::new(ctx);
        let log: FlushLog = Arc::default();
        let start = TokioInstant::now();

        submit_round(&scheduler, &[1], echo_processor(Arc::clone(&log), start)).await;

        let flushes = log.lock();
        assert_eq!(flushes.len(), 1);
        assert!(flushes[0].0 >= ms(150), "flushed at {:?}", flushes[0].0);
        assert!(flushes[0].0 < ms(160));
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_poor_efficiency_shortens_the_flush_timer() {
        let ctx = context(10, 100);
        ctx.metrics().record_unit_cost("encrypt", ms(10));
        ctx.metrics().record_batch("encrypt", 3, ms(30));
        let scheduler = BatchScheduler::<u32, u32>::new(ctx);
        let log: FlushLog = Arc::default();
        let start = TokioInstant::now();

        submit_round(&scheduler, &[1, 2], echo_processor(Arc::clone(&log), start)).await;

        let flushes = log.lock();
        assert_eq!(flushes.len(), 1);
        assert!(flushes[0].0 >= ms(50), "flushed at {:?}", flushes[0].0);
        assert!(flushes[0].0 < ms(60));
    }

    #[tokio::test(start_paused = true)]
    async fn linear_cost_batches_shrink_their_own_delay() {
        let ctx = context(10, 100);
        let scheduler = BatchScheduler::<u32, u32>::new(ctx.clone());
        let log: FlushLog = Arc::default();
        let start = TokioInstant::now();
        let process = costed_processor(Arc::clone(&log), start, ms(20), Duration::ZERO);

        // одиночный сброс задаёт стоимость элемента
        submit_round(&scheduler, &[1], process.clone()).await;
        assert_eq!(ctx.metrics().unit_cost("encrypt").map(|c| c.round()), Some(20.0));
        assert_eq!(scheduler.adaptive_delay("encrypt"), ms(100));

        // пара обходится вдвое дороже одиночки, выигрыша нет
        let second = submit_round(&scheduler, &[2, 3], process.clone()).await;
        assert!(second >= ms(100));
        assert!(ctx.metrics().batch_efficiency("encrypt") < 20.0);
        assert_eq!(scheduler.adaptive_delay("encrypt"), ms(50));

        let third_start = start.elapsed();
        submit_round(&scheduler, &[4, 5], process).await;
        let flushes = log.lock();
        assert_eq!(flushes.len(), 3);
        assert_eq!(flushes[2].1, vec![4, 5]);
        let waited = flushes[2].0 - third_start;
        assert!(waited >= ms(50) && waited < ms(60), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn amortized_cost_batches_keep_the_base_delay() {
        let ctx = context(10, 100);
        let scheduler = BatchScheduler::<u32, u32>::new(ctx.clone());
        let log: FlushLog = Arc::default();
        let start = TokioInstant::now();
        let process = costed_processor(Arc::clone(&log), start, Duration::ZERO, ms(20));

        submit_round(&scheduler, &[1], process.clone()).await;
        submit_round(&scheduler, &[2, 3], process.clone()).await;
        assert!(ctx.metrics().batch_efficiency("encrypt") >= 20.0);
        assert_eq!(scheduler.adaptive_delay("encrypt"), ms(100));

        let third_start = start.elapsed();
        submit_round(&scheduler, &[4, 5], process).await;
        let flushes = log.lock();
        let waited = flushes[2].0 - third_start;
        assert!(waited >= ms(100) && waited < ms(110), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn unbatched_processing_feeds_the_unit_cost() {
        let ctx = context(10, 100);
        ctx.update_config(&OptimizationConfigUpdate {
            batch: Some(BatchSettingsUpdate {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
        let scheduler = BatchScheduler::<u32, u32>::new(ctx.clone());
        let log: FlushLog = Arc::default();
        let process = costed_processor(log, TokioInstant::now(), ms(30), Duration::ZERO);

        assert_eq!(scheduler.submit("encrypt", 9, process).await, Ok(9));
        assert_eq!(ctx.metrics().unit_cost("encrypt").map(|c| c.round()), Some(30.0));
        assert_eq!(ctx.metrics().batch_window_len("encrypt"), 0);
    }
}
