use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::time::{Duration, Instant};
use tracing::info;

use crate::core::engine::error::EngineResult;
use crate::core::metrics::stats::SampleSummary;

pub const BASELINE_STRATEGY: &str = "no optimization";

/// Какие оптимизации включены в прогоне
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OptimizationToggles {
    pub worker: bool,
    pub cache: bool,
    pub batch: bool,
}

impl OptimizationToggles {
    pub const NONE: Self = Self {
        worker: false,
        cache: false,
        batch: false,
    };

    pub const ALL: Self = Self {
        worker: true,
        cache: true,
        batch: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Encryption,
    Transmission,
    Decryption,
}

/// Исполнитель одного этапа синтетической операции
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run_stage(&self, stage: Stage, toggles: OptimizationToggles) -> EngineResult<()>;
}

/// Этапы со случайной стоимостью в фиксированных границах.
///
/// Базовые стоимости (мс): шифрование 40..=60, передача 30..=50,
/// расшифровка 20..=30. Воркер вдвое ускоряет криптографию, кэш с
/// вероятностью `CACHE_HIT_CHANCE` сводит шифрование к 2 мс, батчинг
/// снимает 30% стоимости передачи.
pub struct SimulatedStages {
    scale: f64,
}

const CACHE_HIT_CHANCE: f64 = 0.4;
const CACHE_HIT_COST_MS: f64 = 2.0;
const WORKER_FACTOR: f64 = 0.5;
const BATCH_FACTOR: f64 = 0.7;

impl SimulatedStages {
    pub fn new() -> Self {
        Self { scale: 1.0 }
    }

    /// Масштаб всех стоимостей, например 0.1 для быстрого прогона
    pub fn with_scale(scale: f64) -> Self {
        Self {
            scale: scale.max(0.0),
        }
    }

    fn stage_cost_ms(&self, stage: Stage, toggles: OptimizationToggles) -> f64 {
        let mut rng = rand::thread_rng();

        let cost = match stage {
            Stage::Encryption => {
                if toggles.cache && rng.gen_bool(CACHE_HIT_CHANCE) {
                    CACHE_HIT_COST_MS
                } else {
                    let base = rng.gen_range(40.0..=60.0);
                    if toggles.worker {
                        base * WORKER_FACTOR
                    } else {
                        base
                    }
                }
            }
            Stage::Transmission => {
                let base = rng.gen_range(30.0..=50.0);
                if toggles.batch {
                    base * BATCH_FACTOR
                } else {
                    base
                }
            }
            Stage::Decryption => {
                let base = rng.gen_range(20.0..=30.0);
                if toggles.worker {
                    base * WORKER_FACTOR
                } else {
                    base
                }
            }
        };

        cost * self.scale
    }
}

impl Default for SimulatedStages {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageRunner for SimulatedStages {
    async fn run_stage(&self, stage: Stage, toggles: OptimizationToggles) -> EngineResult<()> {
        let cost_ms = self.stage_cost_ms(stage, toggles);
        tokio::time::sleep(Duration::from_secs_f64(cost_ms / 1000.0)).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageSamples {
    pub encryption: Vec<f64>,
    pub transmission: Vec<f64>,
    pub decryption: Vec<f64>,
    pub total: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummaries {
    pub encryption: Option<SampleSummary>,
    pub transmission: Option<SampleSummary>,
    pub decryption: Option<SampleSummary>,
    pub total: Option<SampleSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceTestResult {
    pub toggles: OptimizationToggles,
    pub iterations: usize,
    pub samples: StageSamples,
    pub summary: StageSummaries,
}

impl PerformanceTestResult {
    pub fn mean_total_ms(&self) -> f64 {
        self.summary.total.map_or(0.0, |s| s.mean)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyComparison {
    pub name: String,
    pub mean_total_ms: f64,
    /// Улучшение средней сквозной задержки относительно базового прогона, %
    pub improvement_pct: f64,
    pub result: PerformanceTestResult,
}

async fn timed(
    stages: &dyn StageRunner,
    stage: Stage,
    toggles: OptimizationToggles,
) -> EngineResult<f64> {
    let started = Instant::now();
    stages.run_stage(stage, toggles).await?;
    Ok(started.elapsed().as_secs_f64() * 1000.0)
}

/// Прогнать `iterations` операций шифрование -> передача -> расшифровка
pub async fn run_performance_test(
    stages: &dyn StageRunner,
    toggles: OptimizationToggles,
    iterations: usize,
) -> EngineResult<PerformanceTestResult> {
    let mut samples = StageSamples::default();

    for _ in 0..iterations {
        let encryption = timed(stages, Stage::Encryption, toggles).await?;
        let transmission = timed(stages, Stage::Transmission, toggles).await?;
        let decryption = timed(stages, Stage::Decryption, toggles).await?;

        samples.encryption.push(encryption);
        samples.transmission.push(transmission);
        samples.decryption.push(decryption);
        samples.total.push(encryption + transmission + decryption);
    }

    let summary = StageSummaries {
        encryption: SampleSummary::from_samples(&samples.encryption),
        transmission: SampleSummary::from_samples(&samples.transmission),
        decryption: SampleSummary::from_samples(&samples.decryption),
        total: SampleSummary::from_samples(&samples.total),
    };

    Ok(PerformanceTestResult {
        toggles,
        iterations,
        samples,
        summary,
    })
}

/// Прогнать каждую стратегию и сравнить со стратегией `"no optimization"`.
///
/// Без базовой стратегии улучшение считается нулевым.
pub async fn compare_optimization_strategies(
    stages: &dyn StageRunner,
    strategies: &[(String, OptimizationToggles)],
    iterations: usize,
) -> EngineResult<Vec<StrategyComparison>> {
    let mut runs = Vec::with_capacity(strategies.len());
    for (name, toggles) in strategies {
        let result = run_performance_test(stages, *toggles, iterations).await?;
        info!(
            "📊 Strategy '{}': mean total {:.2}ms over {} iterations",
            name,
            result.mean_total_ms(),
            iterations
        );
        runs.push((name.clone(), result));
    }

    let baseline = runs
        .iter()
        .find(|(name, _)| name == BASELINE_STRATEGY)
        .map(|(_, result)| result.mean_total_ms());

    Ok(runs
        .into_iter()
        .map(|(name, result)| {
            let mean = result.mean_total_ms();
            let improvement_pct = match baseline {
                Some(base) if base > 0.0 => (base - mean) / base * 100.0,
                _ => 0.0,
            };
            StrategyComparison {
                name,
                mean_total_ms: mean,
                improvement_pct,
                result,
            }
        })
        .collect())
}

/// Базовый прогон, каждая оптимизация по отдельности и все вместе
pub fn default_strategies() -> Vec<(String, OptimizationToggles)> {
    vec![
        (BASELINE_STRATEGY.to_string(), OptimizationToggles::NONE),
        (
            "worker only".to_string(),
            OptimizationToggles {
                worker: true,
                ..OptimizationToggles::NONE
            },
        ),
        (
            "cache only".to_string(),
            OptimizationToggles {
                cache: true,
                ..OptimizationToggles::NONE
            },
        ),
        (
            "batch only".to_string(),
            OptimizationToggles {
                batch: true,
                ..OptimizationToggles::NONE
            },
        ),
        ("all optimizations".to_string(), OptimizationToggles::ALL),
    ]
}
