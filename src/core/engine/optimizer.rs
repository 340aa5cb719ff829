use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{OptimizationConfig, OptimizationConfigUpdate};
use crate::core::batch::scheduler::{BatchOutput, BatchScheduler, BatchSchedulerStats};
use crate::core::cache::expiring_lru::ExpiringLruCache;
use crate::core::crypto::payload::{
    BatchEncryptRequest, BatchEncryptResponse, DecryptRequest, DecryptResponse, EncryptRequest,
    EncryptedPayload, PresenceRequest,
};
use crate::core::engine::context::EngineContext;
use crate::core::engine::error::{EngineError, EngineResult};
use crate::core::engine::fingerprint::fingerprint;
use crate::core::metrics::aggregator::PerformanceSnapshot;
use crate::core::metrics::window::MetricKind;
use crate::core::transport::simulated::{Delivery, Transport};
use crate::core::worker::executor::{TaskAction, TaskExecutor};
use crate::core::worker::offload_manager::{OffloadOptions, OffloadStats, WorkerOffloadManager};

pub const ENCRYPT_QUEUE: &str = "encrypt";
pub const PRESENCE_QUEUE: &str = "presence";

/// Тип реакции для метрик задержки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOp {
    Add,
    Remove,
}

impl ReactionOp {
    fn metric(self) -> MetricKind {
        match self {
            ReactionOp::Add => MetricKind::ReactionAdd,
            ReactionOp::Remove => MetricKind::ReactionRemove,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub size: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub encrypt: BatchSchedulerStats,
    pub presence: BatchSchedulerStats,
    /// Текущая адаптивная задержка сброса каждой очереди
    pub encrypt_delay_ms: u64,
    pub presence_delay_ms: u64,
}

/// Сводный отчёт для дашбордов
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub metrics: PerformanceSnapshot,
    pub cache: CacheReport,
    pub batch: BatchReport,
    pub worker: OffloadStats,
    pub config: OptimizationConfig,
}

/// Движок оптимизаций: кэш, батчинг и вынос криптографии в воркеры
/// поверх одного контекста конфигурации и метрик.
pub struct OptimizationEngine {
    ctx: EngineContext,
    cache: ExpiringLruCache<String, EncryptedPayload>,
    encrypt_batches: Arc<BatchScheduler<EncryptRequest, EncryptedPayload>>,
    presence_batches: Arc<BatchScheduler<PresenceRequest, EncryptedPayload>>,
    offload: Arc<WorkerOffloadManager>,
    transport: Arc<dyn Transport>,
}

impl OptimizationEngine {
    pub fn new(
        ctx: EngineContext,
        executor: Arc<dyn TaskExecutor>,
        transport: Arc<dyn Transport>,
        options: OffloadOptions,
    ) -> Self {
        let config = ctx.config();
        let cache = ExpiringLruCache::new(config.cache.max_size, Some(config.cache.get_ttl()));

        info!(
            "🚀 OptimizationEngine initialized: cache={} batch={} worker={}",
            config.cache.enabled, config.batch.enabled, config.worker.enabled
        );

        Self {
            cache,
            encrypt_batches: BatchScheduler::new(ctx.clone()),
            presence_batches: BatchScheduler::new(ctx.clone()),
            offload: WorkerOffloadManager::new(ctx.clone(), executor, options),
            transport,
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Зашифровать сообщение: кэш по отпечатку, затем батч и воркер
    pub async fn encrypt_message(
        &self,
        content: &str,
        recipients: &[String],
    ) -> EngineResult<EncryptedPayload> {
        let started = Instant::now();
        let config = self.ctx.config();
        let metrics = self.ctx.metrics();

        let key = fingerprint(TaskAction::Encrypt.as_str(), content, recipients);
        if config.cache.enabled {
            self.sync_cache_capacity(&config);
            if let Some(hit) = self.cache.get(&key) {
                metrics.record_cache_outcome(true);
                metrics.record_duration(MetricKind::EncryptionTime, started.elapsed());
                debug!("🎯 Encryption cache hit");
                return Ok(hit);
            }
            metrics.record_cache_outcome(false);
        }

        let request = EncryptRequest {
            content: content.to_string(),
            recipients: recipients.to_vec(),
        };
        let offload = Arc::clone(&self.offload);
        let sealed = self
            .encrypt_batches
            .submit(ENCRYPT_QUEUE, request, move |items| {
                encrypt_batch(Arc::clone(&offload), items)
            })
            .await?;

        if config.cache.enabled {
            self.cache
                .set_with_ttl(key, sealed.clone(), Some(config.cache.get_ttl()));
        }
        metrics.record_duration(MetricKind::EncryptionTime, started.elapsed());

        Ok(sealed)
    }

    /// Зашифровать обновление статуса присутствия
    pub async fn encrypt_presence(
        &self,
        status: &str,
        recipients: &[String],
    ) -> EngineResult<EncryptedPayload> {
        let started = Instant::now();
        let request = PresenceRequest {
            status: status.to_string(),
            recipients: recipients.to_vec(),
        };

        let offload = Arc::clone(&self.offload);
        let sealed = self
            .presence_batches
            .submit(PRESENCE_QUEUE, request, move |items| {
                encrypt_presence_batch(Arc::clone(&offload), items)
            })
            .await?;

        self.ctx
            .metrics()
            .record_duration(MetricKind::PresenceLatency, started.elapsed());
        Ok(sealed)
    }

    pub async fn decrypt_message(&self, ciphertext: &str, key: &str) -> EngineResult<String> {
        let started = Instant::now();
        let payload = serde_json::to_value(DecryptRequest {
            ciphertext: ciphertext.to_string(),
            key: key.to_string(),
        })?;

        let response: DecryptResponse =
            serde_json::from_value(self.offload.dispatch(TaskAction::Decrypt, payload).await?)?;

        self.ctx
            .metrics()
            .record_duration(MetricKind::DecryptionTime, started.elapsed());
        Ok(response.plaintext)
    }

    /// Отправить данные через транспорт, учитывая задержку и потери
    pub async fn transmit(&self, payload: Bytes) -> EngineResult<Delivery> {
        let started = Instant::now();
        let metrics = self.ctx.metrics();

        match self.transport.send(payload).await {
            Ok(delivery) => {
                metrics.record_transmission(true);
                metrics.record_duration(MetricKind::MessageLatency, started.elapsed());
                Ok(delivery)
            }
            Err(e) => {
                metrics.record_transmission(false);
                warn!("📉 Transmission failed: {}", e);
                Err(e)
            }
        }
    }

    /// Замерить операцию с реакцией
    pub async fn track_reaction<F, T>(&self, op: ReactionOp, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let result = operation.await;
        self.ctx
            .metrics()
            .record_duration(op.metric(), started.elapsed());
        result
    }

    pub fn performance_report(&self) -> PerformanceReport {
        PerformanceReport {
            metrics: self.ctx.metrics().snapshot(),
            cache: CacheReport {
                size: self.cache.size(),
                capacity: self.cache.capacity(),
            },
            batch: BatchReport {
                encrypt: self.encrypt_batches.stats(),
                presence: self.presence_batches.stats(),
                encrypt_delay_ms: self.encrypt_batches.adaptive_delay(ENCRYPT_QUEUE).as_millis()
                    as u64,
                presence_delay_ms: self.presence_batches.adaptive_delay(PRESENCE_QUEUE).as_millis()
                    as u64,
            },
            worker: self.offload.stats(),
            config: self.ctx.config(),
        }
    }

    pub fn clear_caches(&self) {
        self.cache.clear();
        self.ctx.metrics().clear_cache_counters();
        info!("🧹 Encryption cache cleared");
    }

    pub fn get_config(&self) -> OptimizationConfig {
        self.ctx.config()
    }

    pub fn update_config(&self, update: &OptimizationConfigUpdate) -> OptimizationConfig {
        let config = self.ctx.update_config(update);
        self.sync_cache_capacity(&config);
        config
    }

    pub fn shutdown(&self) {
        self.offload.shutdown();
    }

    fn sync_cache_capacity(&self, config: &OptimizationConfig) {
        let target = config.cache.max_size.max(1);
        if self.cache.capacity() != target {
            self.cache.resize(target);
        }
    }
}

async fn encrypt_batch(
    offload: Arc<WorkerOffloadManager>,
    items: Vec<EncryptRequest>,
) -> EngineResult<BatchOutput<EncryptedPayload>> {
    let payload = serde_json::to_value(BatchEncryptRequest { items })?;
    let response: BatchEncryptResponse =
        serde_json::from_value(offload.dispatch(TaskAction::BatchEncrypt, payload).await?)?;
    Ok(BatchOutput::PerItem(response.results))
}

/// Обновления присутствия уходят в воркеры параллельно, по задаче на элемент
async fn encrypt_presence_batch(
    offload: Arc<WorkerOffloadManager>,
    items: Vec<PresenceRequest>,
) -> EngineResult<BatchOutput<EncryptedPayload>> {
    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let payload: Value = serde_json::to_value(item)?;
        let offload = Arc::clone(&offload);
        handles.push(tokio::spawn(async move {
            offload.dispatch(TaskAction::EncryptPresence, payload).await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let value = handle
            .await
            .map_err(|e| EngineError::TaskExecution(format!("presence task aborted: {}", e)))??;
        results.push(serde_json::from_value(value)?);
    }
    Ok(BatchOutput::PerItem(results))
}
