use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use tracing::{debug, warn};

use crate::core::engine::error::{EngineError, EngineResult};

/// Подтверждение доставки
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub bytes: usize,
    pub latency: Duration,
}

/// Канал доставки зашифрованных данных. Формат провода движку не важен
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: Bytes) -> EngineResult<Delivery>;
}

/// Транспорт с имитацией сети: случайная задержка и потери
pub struct SimulatedTransport {
    base_latency: Duration,
    jitter: Duration,
    loss_rate: f64,
    sent: AtomicU64,
    lost: AtomicU64,
}

impl SimulatedTransport {
    /// `loss_rate` приводится к [0, 1]; NaN означает сеть без потерь
    pub fn new(base_latency: Duration, jitter: Duration, loss_rate: f64) -> Self {
        let loss_rate = if loss_rate.is_nan() {
            warn!("⚠️ Loss rate is NaN, simulating a lossless network");
            0.0
        } else {
            loss_rate.clamp(0.0, 1.0)
        };

        Self {
            base_latency,
            jitter,
            loss_rate,
            sent: AtomicU64::new(0),
            lost: AtomicU64::new(0),
        }
    }

    /// Идеальная сеть без задержек и потерь
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0.0)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(&self, payload: Bytes) -> EngineResult<Delivery> {
        let (latency, dropped) = {
            let mut rng = rand::thread_rng();
            let jitter_ms = self.jitter.as_millis() as u64;
            let extra = if jitter_ms > 0 {
                Duration::from_millis(rng.gen_range(0..=jitter_ms))
            } else {
                Duration::ZERO
            };
            (self.base_latency + extra, rng.gen_bool(self.loss_rate))
        };

        tokio::time::sleep(latency).await;
        self.sent.fetch_add(1, Ordering::Relaxed);

        if dropped {
            self.lost.fetch_add(1, Ordering::Relaxed);
            warn!("📉 Packet of {} bytes lost in transit", payload.len());
            return Err(EngineError::Transport("packet lost".to_string()));
        }

        debug!("📤 Delivered {} bytes in {:?}", payload.len(), latency);
        Ok(Delivery {
            bytes: payload.len(),
            latency,
        })
    }
}
