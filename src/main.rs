use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tracing::{error, info, warn};

use presence_engine::config::AppConfig;
use presence_engine::core::crypto::simulated::SimulatedCryptoExecutor;
use presence_engine::core::engine::context::EngineContext;
use presence_engine::core::engine::optimizer::{OptimizationEngine, ReactionOp};
use presence_engine::core::harness::performance::{
    compare_optimization_strategies, default_strategies, SimulatedStages,
};
use presence_engine::core::monitoring::logger::init_logging;
use presence_engine::core::transport::simulated::SimulatedTransport;
use presence_engine::core::worker::offload_manager::OffloadOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let app_config = AppConfig::from_env();
    init_logging(&app_config.log_level);

    if let Err(e) = app_config.validate() {
        error!("❌ Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("🚀 Starting optimization engine demo...");
    info!("📝 Configuration loaded:");
    info!(
        "  - Cache: enabled={} ttl={}ms max_size={}",
        app_config.optimization.cache.enabled,
        app_config.optimization.cache.ttl_ms,
        app_config.optimization.cache.max_size
    );
    info!(
        "  - Batch: enabled={} max_items={} max_wait={}ms",
        app_config.optimization.batch.enabled,
        app_config.optimization.batch.max_items,
        app_config.optimization.batch.max_wait_ms
    );
    info!(
        "  - Worker: enabled={} max_concurrency={} max_retries={}",
        app_config.optimization.worker.enabled,
        app_config.optimization.worker.max_concurrency,
        app_config.optimization.worker.max_retries
    );
    info!("  - Log level: {}", app_config.log_level);

    run_harness(&app_config).await?;
    run_engine_demo(app_config).await
}

async fn run_harness(app_config: &AppConfig) -> Result<()> {
    info!("📊 Comparing optimization strategies ({} iterations)...", app_config.harness_iterations);

    let stages = SimulatedStages::with_scale(0.2);
    let comparison =
        compare_optimization_strategies(&stages, &default_strategies(), app_config.harness_iterations)
            .await?;

    for entry in &comparison {
        info!(
            "  - {:<20} mean {:>7.2}ms  improvement {:>6.1}%",
            entry.name, entry.mean_total_ms, entry.improvement_pct
        );
    }
    Ok(())
}

async fn run_engine_demo(app_config: AppConfig) -> Result<()> {
    info!("🔧 Initializing optimization engine...");

    let ctx = EngineContext::new(app_config.optimization.clone(), app_config.metrics_window_capacity);
    let executor = Arc::new(
        SimulatedCryptoExecutor::new("demo-secret").with_work_cost(Duration::from_millis(5)),
    );
    let transport = Arc::new(SimulatedTransport::new(
        Duration::from_millis(20),
        Duration::from_millis(40),
        0.02,
    ));
    let engine = Arc::new(OptimizationEngine::new(
        ctx,
        executor,
        transport,
        OffloadOptions::default(),
    ));

    let recipients: Vec<String> = ["alice", "bob", "carol"].iter().map(|s| s.to_string()).collect();

    let mut handles = Vec::new();
    for i in 0..24 {
        let engine = Arc::clone(&engine);
        let recipients = recipients.clone();
        handles.push(tokio::spawn(async move {
            // каждый текст встречается трижды, поздние повторы берутся из кэша
            let content = format!("message #{}", i % 8);
            let sealed = engine.encrypt_message(&content, &recipients).await?;
            let delivery = engine.transmit(Bytes::from(sealed.ciphertext.clone())).await;
            if let Err(e) = delivery {
                warn!("⚠️ Message #{} was not delivered: {}", i, e);
            }
            let plain = engine.decrypt_message(&sealed.ciphertext, &sealed.key).await?;
            anyhow::ensure!(plain == content, "round trip mismatch for message #{}", i);
            Ok::<(), anyhow::Error>(())
        }));
    }

    for status in ["online", "away", "online"] {
        let sealed = engine.encrypt_presence(status, &recipients).await?;
        engine
            .track_reaction(ReactionOp::Add, engine.transmit(Bytes::from(sealed.ciphertext)))
            .await
            .ok();
    }

    for handle in handles {
        handle.await??;
    }

    let report = engine.performance_report();
    info!("📈 Performance report:\n{}", serde_json::to_string_pretty(&report)?);

    engine.shutdown();
    info!("✅ Demo finished");
    Ok(())
}
