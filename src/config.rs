use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Настройки кэша результатов шифрования
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub max_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        dotenv().ok();

        Self {
            enabled: env_or("ENGINE_CACHE_ENABLED", true),
            ttl_ms: env_or("ENGINE_CACHE_TTL_MS", 300_000),
            max_size: env_or("ENGINE_CACHE_MAX_SIZE", 1000),
        }
    }
}

impl CacheSettings {
    pub fn get_ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Настройки батчинга
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BatchSettings {
    pub enabled: bool,
    pub max_items: usize,
    pub max_wait_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        dotenv().ok();

        Self {
            enabled: env_or("ENGINE_BATCH_ENABLED", true),
            max_items: env_or("ENGINE_BATCH_MAX_ITEMS", 10),
            max_wait_ms: env_or("ENGINE_BATCH_MAX_WAIT_MS", 250),
        }
    }
}

impl BatchSettings {
    pub fn get_max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Настройки фоновых воркеров
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WorkerSettings {
    pub enabled: bool,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub fallback_to_main_thread: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        dotenv().ok();

        Self {
            enabled: env_or("ENGINE_WORKER_ENABLED", true),
            max_concurrency: env_or("ENGINE_WORKER_MAX_CONCURRENCY", num_cpus::get().clamp(1, 4)),
            max_retries: env_or("ENGINE_WORKER_MAX_RETRIES", 3),
            retry_delay_ms: env_or("ENGINE_WORKER_RETRY_DELAY_MS", 1000),
            fallback_to_main_thread: env_or("ENGINE_WORKER_FALLBACK", true),
        }
    }
}

impl WorkerSettings {
    pub fn get_retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Общая конфигурация оптимизаций. Читается всеми компонентами при каждом решении
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct OptimizationConfig {
    pub cache: CacheSettings,
    pub batch: BatchSettings,
    pub worker: WorkerSettings,
}

impl OptimizationConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Слить частичное обновление поле за полем
    pub fn merge(&mut self, update: &OptimizationConfigUpdate) {
        if let Some(cache) = &update.cache {
            cache.apply(&mut self.cache);
        }
        if let Some(batch) = &update.batch {
            batch.apply(&mut self.batch);
        }
        if let Some(worker) = &update.worker {
            worker.apply(&mut self.worker);
        }
    }

    /// Профиль для интерактивных сценариев: короткое окно батча (100мс, до 10 элементов),
    /// два воркера, два быстрых повтора и кэш на 100 записей
    pub fn low_latency() -> Self {
        Self {
            cache: CacheSettings {
                enabled: true,
                ttl_ms: 60_000,
                max_size: 100,
            },
            batch: BatchSettings {
                enabled: true,
                max_items: 10,
                max_wait_ms: 100,
            },
            worker: WorkerSettings {
                enabled: true,
                max_concurrency: 2,
                max_retries: 2,
                retry_delay_ms: 10,
                fallback_to_main_thread: true,
            },
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CacheSettingsUpdate {
    pub enabled: Option<bool>,
    pub ttl_ms: Option<u64>,
    pub max_size: Option<usize>,
}

impl CacheSettingsUpdate {
    fn apply(&self, target: &mut CacheSettings) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(ttl_ms) = self.ttl_ms {
            target.ttl_ms = ttl_ms;
        }
        if let Some(max_size) = self.max_size {
            target.max_size = max_size.max(1);
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BatchSettingsUpdate {
    pub enabled: Option<bool>,
    pub max_items: Option<usize>,
    pub max_wait_ms: Option<u64>,
}

impl BatchSettingsUpdate {
    fn apply(&self, target: &mut BatchSettings) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(max_items) = self.max_items {
            target.max_items = max_items.max(1);
        }
        if let Some(max_wait_ms) = self.max_wait_ms {
            target.max_wait_ms = max_wait_ms;
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WorkerSettingsUpdate {
    pub enabled: Option<bool>,
    pub max_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub fallback_to_main_thread: Option<bool>,
}

impl WorkerSettingsUpdate {
    fn apply(&self, target: &mut WorkerSettings) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(max_concurrency) = self.max_concurrency {
            target.max_concurrency = max_concurrency.max(1);
        }
        if let Some(max_retries) = self.max_retries {
            target.max_retries = max_retries;
        }
        if let Some(retry_delay_ms) = self.retry_delay_ms {
            target.retry_delay_ms = retry_delay_ms;
        }
        if let Some(fallback) = self.fallback_to_main_thread {
            target.fallback_to_main_thread = fallback;
        }
    }
}

/// Частичное обновление конфигурации: отсутствующие секции и поля не меняются
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct OptimizationConfigUpdate {
    pub cache: Option<CacheSettingsUpdate>,
    pub batch: Option<BatchSettingsUpdate>,
    pub worker: Option<WorkerSettingsUpdate>,
}

/// Конфигурация процесса
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub optimization: OptimizationConfig,
    pub metrics_window_capacity: usize,
    pub harness_iterations: usize,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        dotenv().ok();

        Self {
            optimization: OptimizationConfig::from_env(),
            metrics_window_capacity: env_or("ENGINE_METRICS_WINDOW", 100),
            harness_iterations: env_or("ENGINE_HARNESS_ITERATIONS", 20),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let opt = &self.optimization;

        if opt.cache.max_size == 0 {
            return Err(ConfigError::InvalidCacheConfig(
                "max_size cannot be zero".to_string()
            ));
        }

        if opt.cache.max_size > 1_000_000 {
            return Err(ConfigError::CacheSizeTooLarge);
        }

        if opt.batch.max_items == 0 {
            return Err(ConfigError::InvalidBatchConfig(
                "max_items cannot be zero".to_string()
            ));
        }

        if opt.batch.max_wait_ms > 60_000 {
            return Err(ConfigError::InvalidBatchConfig(
                format!("max_wait_ms ({}) cannot exceed 60000", opt.batch.max_wait_ms)
            ));
        }

        if opt.worker.max_concurrency == 0 || opt.worker.max_concurrency > 256 {
            return Err(ConfigError::InvalidWorkerConfig(
                format!("max_concurrency must be between 1 and 256, got {}", opt.worker.max_concurrency)
            ));
        }

        if self.metrics_window_capacity == 0 {
            return Err(ConfigError::InvalidMetricsWindow);
        }

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid cache configuration: {0}")]
    InvalidCacheConfig(String),
    #[error("Cache size too large")]
    CacheSizeTooLarge,
    #[error("Invalid batch configuration: {0}")]
    InvalidBatchConfig(String),
    #[error("Invalid worker configuration: {0}")]
    InvalidWorkerConfig(String),
    #[error("Metrics window capacity cannot be zero")]
    InvalidMetricsWindow,
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
}
