use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::{OptimizationConfig, OptimizationConfigUpdate};
use crate::core::metrics::aggregator::MetricsAggregator;

/// Хранилище конфигурации оптимизаций. Последняя запись побеждает
pub struct ConfigStore {
    current: RwLock<OptimizationConfig>,
}

impl ConfigStore {
    pub fn new(initial: OptimizationConfig) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn get_config(&self) -> OptimizationConfig {
        self.current.read().clone()
    }

    pub fn update_config(&self, update: &OptimizationConfigUpdate) -> OptimizationConfig {
        let mut current = self.current.write();
        current.merge(update);
        info!(
            "⚙️ Optimization config updated: cache={} batch={} worker={}",
            current.cache.enabled, current.batch.enabled, current.worker.enabled
        );
        current.clone()
    }
}

/// Контекст движка: конфигурация и метрики, передаются каждому компоненту явно
#[derive(Clone)]
pub struct EngineContext {
    config: Arc<ConfigStore>,
    metrics: Arc<MetricsAggregator>,
}

impl EngineContext {
    pub fn new(config: OptimizationConfig, metrics_window: usize) -> Self {
        Self {
            config: Arc::new(ConfigStore::new(config)),
            metrics: Arc::new(MetricsAggregator::new(metrics_window)),
        }
    }

    pub fn config(&self) -> OptimizationConfig {
        self.config.get_config()
    }

    pub fn update_config(&self, update: &OptimizationConfigUpdate) -> OptimizationConfig {
        self.config.update_config(update)
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    #[cfg(test)]
    pub(crate) fn test_context() -> Self {
        Self::new(OptimizationConfig::low_latency(), 100)
    }
}
