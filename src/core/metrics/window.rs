use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Виды метрик, для каждой хранится своё скользящее окно
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    EncryptionTime,
    DecryptionTime,
    MessageLatency,
    PresenceLatency,
    BatchSize,
    BatchTime,
    ReactionAdd,
    ReactionRemove,
    WorkerTaskTime,
}

impl MetricKind {
    pub const ALL: [MetricKind; 9] = [
        MetricKind::EncryptionTime,
        MetricKind::DecryptionTime,
        MetricKind::MessageLatency,
        MetricKind::PresenceLatency,
        MetricKind::BatchSize,
        MetricKind::BatchTime,
        MetricKind::ReactionAdd,
        MetricKind::ReactionRemove,
        MetricKind::WorkerTaskTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::EncryptionTime => "encryption_time",
            MetricKind::DecryptionTime => "decryption_time",
            MetricKind::MessageLatency => "message_latency",
            MetricKind::PresenceLatency => "presence_latency",
            MetricKind::BatchSize => "batch_size",
            MetricKind::BatchTime => "batch_time",
            MetricKind::ReactionAdd => "reaction_add",
            MetricKind::ReactionRemove => "reaction_remove",
            MetricKind::WorkerTaskTime => "worker_task_time",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub timestamp: Instant,
    pub value: f64,
}

/// Окно фиксированной ёмкости с вытеснением самого старого значения
#[derive(Debug, Clone)]
pub struct MetricWindow {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl MetricWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }

        self.samples.push_back(MetricSample {
            timestamp: Instant::now(),
            value,
        });
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.value).sum::<f64>() / self.samples.len() as f64
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn last(&self) -> Option<MetricSample> {
        self.samples.back().copied()
    }

    /// Сколько прошло с последнего записанного значения
    pub fn last_sample_age(&self) -> Option<Duration> {
        self.last().map(|sample| sample.timestamp.elapsed())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
