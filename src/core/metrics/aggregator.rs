use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::stats::SampleSummary;
use super::window::{MetricKind, MetricWindow};

pub const DEFAULT_WINDOW_CAPACITY: usize = 100;

/// Стоимость одной операции, если данных ещё нет (мс)
pub const DEFAULT_ITEM_COST_MS: f64 = 50.0;

/// Класс качества соединения. Носит рекомендательный характер
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl ConnectionQuality {
    /// Пороги: (задержка мс, потери %)
    const THRESHOLDS: [(f64, f64, ConnectionQuality); 3] = [
        (100.0, 1.0, ConnectionQuality::Excellent),
        (200.0, 3.0, ConnectionQuality::Good),
        (300.0, 5.0, ConnectionQuality::Fair),
    ];

    pub fn classify(latency_ms: f64, packet_loss_pct: f64) -> Self {
        Self::THRESHOLDS
            .iter()
            .find(|(latency, loss, _)| latency_ms <= *latency && packet_loss_pct <= *loss)
            .map(|(_, _, quality)| *quality)
            .unwrap_or(ConnectionQuality::Poor)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Poor => "poor",
        }
    }
}

/// Итог выполнения задачи в фоновом воркере
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Succeeded,
    Retried,
    FellBack,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerOutcomeCounts {
    pub succeeded: u64,
    pub retried: u64,
    pub fell_back: u64,
    pub failed: u64,
}

/// Снимок метрик для дашбордов
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub packet_loss: f64,
    pub connection_quality: ConnectionQuality,
    /// Эффективность батчинга по очередям (%)
    pub batch_efficiency: BTreeMap<String, f64>,
    pub averages: BTreeMap<&'static str, f64>,
    pub summaries: BTreeMap<&'static str, SampleSummary>,
    /// Возраст последнего значения каждого окна (мс)
    pub last_sample_age_ms: BTreeMap<&'static str, f64>,
    pub worker: WorkerOutcomeCounts,
}

/// Окна одной очереди батчей.
///
/// `sizes` и `times` описывают только сбросы из нескольких элементов.
/// `unit_costs` хранит время обработки одиночного элемента той же очереди:
/// сброс из одного элемента или обработка при выключенном батчинге.
struct QueueBatchWindows {
    sizes: MetricWindow,
    times: MetricWindow,
    unit_costs: MetricWindow,
}

impl QueueBatchWindows {
    fn new(capacity: usize) -> Self {
        Self {
            sizes: MetricWindow::new(capacity),
            times: MetricWindow::new(capacity),
            unit_costs: MetricWindow::new(capacity),
        }
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

/// Агрегатор метрик на скользящих окнах.
///
/// Никогда не возвращает ошибок: при отсутствии данных отдаёт нейтральные значения.
pub struct MetricsAggregator {
    windows: DashMap<MetricKind, MetricWindow>,
    batch_queues: DashMap<String, QueueBatchWindows>,
    window_capacity: usize,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    transmissions: AtomicU64,
    transmissions_lost: AtomicU64,
    worker_succeeded: AtomicU64,
    worker_retried: AtomicU64,
    worker_fell_back: AtomicU64,
    worker_failed: AtomicU64,
}

impl MetricsAggregator {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            batch_queues: DashMap::new(),
            window_capacity: window_capacity.max(1),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            transmissions: AtomicU64::new(0),
            transmissions_lost: AtomicU64::new(0),
            worker_succeeded: AtomicU64::new(0),
            worker_retried: AtomicU64::new(0),
            worker_fell_back: AtomicU64::new(0),
            worker_failed: AtomicU64::new(0),
        }
    }

    pub fn record(&self, kind: MetricKind, value: f64) {
        self.windows
            .entry(kind)
            .or_insert_with(|| MetricWindow::new(self.window_capacity))
            .push(value);
    }

    pub fn record_duration(&self, kind: MetricKind, elapsed: Duration) {
        self.record(kind, millis(elapsed));
    }

    /// Результат сброса очереди `queue`: попадает и в общие окна
    /// `BatchSize`/`BatchTime`, и в окна самой очереди
    pub fn record_batch(&self, queue: &str, size: usize, elapsed: Duration) {
        let ms = millis(elapsed);
        self.record(MetricKind::BatchSize, size as f64);
        self.record(MetricKind::BatchTime, ms);

        let mut windows = self.queue_windows(queue);
        if size <= 1 {
            windows.unit_costs.push(ms);
        } else {
            windows.sizes.push(size as f64);
            windows.times.push(ms);
        }
    }

    /// Время обработки одного элемента очереди вне батча
    pub fn record_unit_cost(&self, queue: &str, elapsed: Duration) {
        self.queue_windows(queue).unit_costs.push(millis(elapsed));
    }

    fn queue_windows(
        &self,
        queue: &str,
    ) -> dashmap::mapref::one::RefMut<'_, String, QueueBatchWindows> {
        self.batch_queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueBatchWindows::new(self.window_capacity))
    }

    pub fn record_cache_outcome(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_transmission(&self, delivered: bool) {
        self.transmissions.fetch_add(1, Ordering::Relaxed);
        if !delivered {
            self.transmissions_lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_worker_outcome(&self, outcome: WorkerOutcome) {
        let counter = match outcome {
            WorkerOutcome::Succeeded => &self.worker_succeeded,
            WorkerOutcome::Retried => &self.worker_retried,
            WorkerOutcome::FellBack => &self.worker_fell_back,
            WorkerOutcome::Failed => &self.worker_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn average(&self, kind: MetricKind) -> f64 {
        self.windows.get(&kind).map_or(0.0, |w| w.average())
    }

    pub fn window_len(&self, kind: MetricKind) -> usize {
        self.windows.get(&kind).map_or(0, |w| w.len())
    }

    /// Число сбросов очереди из нескольких элементов в окне
    pub fn batch_window_len(&self, queue: &str) -> usize {
        self.batch_queues.get(queue).map_or(0, |q| q.times.len())
    }

    /// Средняя стоимость одиночной обработки в очереди (мс)
    pub fn unit_cost(&self, queue: &str) -> Option<f64> {
        let windows = self.batch_queues.get(queue)?;
        if windows.unit_costs.is_empty() {
            return None;
        }
        Some(windows.unit_costs.average())
    }

    pub fn last_sample_age(&self, kind: MetricKind) -> Option<Duration> {
        self.windows.get(&kind)?.last_sample_age()
    }

    pub fn window_capacity(&self) -> usize {
        self.window_capacity
    }

    pub fn summary(&self, kind: MetricKind) -> Option<SampleSummary> {
        let values = self.windows.get(&kind)?.values();
        SampleSummary::from_samples(&values)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64 * 100.0
    }

    /// Оценка потерь пакетов в процентах
    pub fn packet_loss(&self) -> f64 {
        let total = self.transmissions.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.transmissions_lost.load(Ordering::Relaxed) as f64 / total as f64 * 100.0
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        if self.window_len(MetricKind::MessageLatency) == 0 {
            return ConnectionQuality::Good;
        }
        ConnectionQuality::classify(self.average(MetricKind::MessageLatency), self.packet_loss())
    }

    /// Эффективность батчинга очереди (%) относительно оценки поштучной обработки.
    ///
    /// Стоимость одного элемента берётся из одиночных обработок этой же очереди,
    /// либо `DEFAULT_ITEM_COST_MS`, если их ещё не было.
    pub fn batch_efficiency(&self, queue: &str) -> f64 {
        let Some(windows) = self.batch_queues.get(queue) else {
            return 0.0;
        };
        if windows.times.is_empty() {
            return 0.0;
        }

        let avg_batch_size = windows.sizes.average();
        if avg_batch_size <= 0.0 {
            return 0.0;
        }

        let per_item_cost = match windows.unit_costs.average() {
            cost if cost > 0.0 => cost,
            _ => DEFAULT_ITEM_COST_MS,
        };

        let estimated = per_item_cost * avg_batch_size;
        let actual = windows.times.average();

        ((estimated - actual) / estimated * 100.0).clamp(-100.0, 100.0)
    }

    pub fn worker_outcomes(&self) -> WorkerOutcomeCounts {
        WorkerOutcomeCounts {
            succeeded: self.worker_succeeded.load(Ordering::Relaxed),
            retried: self.worker_retried.load(Ordering::Relaxed),
            fell_back: self.worker_fell_back.load(Ordering::Relaxed),
            failed: self.worker_failed.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let mut averages = BTreeMap::new();
        let mut summaries = BTreeMap::new();
        let mut last_sample_age_ms = BTreeMap::new();

        for kind in MetricKind::ALL {
            averages.insert(kind.as_str(), self.average(kind));
            if let Some(summary) = self.summary(kind) {
                summaries.insert(kind.as_str(), summary);
            }
            if let Some(age) = self.last_sample_age(kind) {
                last_sample_age_ms.insert(kind.as_str(), millis(age));
            }
        }

        let queues: Vec<String> = self.batch_queues.iter().map(|q| q.key().clone()).collect();
        let batch_efficiency = queues
            .into_iter()
            .map(|queue| {
                let efficiency = self.batch_efficiency(&queue);
                (queue, efficiency)
            })
            .collect();

        PerformanceSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            packet_loss: self.packet_loss(),
            connection_quality: self.connection_quality(),
            batch_efficiency,
            averages,
            summaries,
            last_sample_age_ms,
            worker: self.worker_outcomes(),
        }
    }

    pub fn clear_cache_counters(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.windows.clear();
        self.batch_queues.clear();
        self.clear_cache_counters();
        for counter in [
            &self.transmissions,
            &self.transmissions_lost,
            &self.worker_succeeded,
            &self.worker_retried,
            &self.worker_fell_back,
            &self.worker_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        debug!("📊 Metrics aggregator reset");
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
