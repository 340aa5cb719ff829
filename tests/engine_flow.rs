use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use presence_engine::config::{
    BatchSettingsUpdate, OptimizationConfig, OptimizationConfigUpdate, WorkerSettingsUpdate,
};
use presence_engine::core::crypto::simulated::SimulatedCryptoExecutor;
use presence_engine::core::engine::context::EngineContext;
use presence_engine::core::engine::error::EngineError;
use presence_engine::core::engine::optimizer::OptimizationEngine;
use presence_engine::core::metrics::window::MetricKind;
use presence_engine::core::transport::simulated::SimulatedTransport;
use presence_engine::core::worker::executor::{FnExecutor, TaskAction, TaskExecutor};
use presence_engine::core::worker::offload_manager::OffloadOptions;

fn build_engine(executor: Arc<dyn TaskExecutor>, options: OffloadOptions) -> Arc<OptimizationEngine> {
    Arc::new(OptimizationEngine::new(
        EngineContext::new(OptimizationConfig::low_latency(), 50),
        executor,
        Arc::new(SimulatedTransport::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            0.0,
        )),
        options,
    ))
}

fn simulated_engine() -> Arc<OptimizationEngine> {
    build_engine(
        Arc::new(SimulatedCryptoExecutor::new("integration")),
        OffloadOptions::default(),
    )
}

fn to(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn full_message_round_trip_reports_every_stage() {
    let engine = simulated_engine();

    let sealed = engine.encrypt_message("hi there", &to(&["a", "b"])).await.unwrap();
    engine
        .transmit(Bytes::from(sealed.ciphertext.clone()))
        .await
        .unwrap();
    let plain = engine
        .decrypt_message(&sealed.ciphertext, &sealed.key)
        .await
        .unwrap();
    assert_eq!(plain, "hi there");

    let report = engine.performance_report();
    for kind in ["encryption_time", "decryption_time", "message_latency", "batch_size", "batch_time"] {
        assert!(report.metrics.summaries.contains_key(kind), "missing {}", kind);
    }
    assert_eq!(report.metrics.averages["batch_size"], 1.0);
    assert!(report.worker.completed >= 2);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["config"]["batch"]["max_items"], 10);
}

#[tokio::test]
async fn two_messages_flush_together_after_the_wait() {
    let engine = simulated_engine();
    engine.update_config(&OptimizationConfigUpdate {
        batch: Some(BatchSettingsUpdate {
            max_items: Some(3),
            max_wait_ms: Some(100),
            ..Default::default()
        }),
        ..Default::default()
    });

    let started = std::time::Instant::now();
    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.encrypt_message("one", &to(&["x"])).await })
    };
    let second = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.encrypt_message("two", &to(&["x"])).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_ne!(first, second);
    assert!(started.elapsed() >= Duration::from_millis(90));

    let batch = engine.performance_report().batch.encrypt;
    assert_eq!(batch.flushes, 1);
    assert_eq!(batch.items_processed, 2);
}

#[tokio::test]
async fn executor_failure_surfaces_to_every_batched_caller() {
    let executor = FnExecutor::new(|action, _| match action {
        TaskAction::BatchEncrypt => Err(EngineError::TaskExecution("hsm offline".into())),
        _ => Ok(serde_json::Value::Null),
    });
    let engine = build_engine(Arc::new(executor), OffloadOptions::default());
    engine.update_config(&OptimizationConfigUpdate {
        batch: Some(BatchSettingsUpdate {
            max_items: Some(2),
            ..Default::default()
        }),
        worker: Some(WorkerSettingsUpdate {
            max_retries: Some(0),
            fallback_to_main_thread: Some(false),
            ..Default::default()
        }),
        ..Default::default()
    });

    let a = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.encrypt_message("a", &to(&["r"])).await })
    };
    let b = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.encrypt_message("b", &to(&["r"])).await })
    };

    let err_a = a.await.unwrap().unwrap_err();
    let err_b = b.await.unwrap().unwrap_err();
    assert_eq!(err_a, err_b);
    assert!(matches!(err_a, EngineError::TaskRetriesExhausted { attempts: 1, .. }));

    let report = engine.performance_report();
    assert_eq!(report.batch.encrypt.failed_flushes, 1);
    assert_eq!(report.cache.size, 0);
}

#[tokio::test]
async fn engine_without_background_threads_still_works() {
    let engine = build_engine(
        Arc::new(SimulatedCryptoExecutor::new("inline")),
        OffloadOptions {
            background_available: false,
            ..Default::default()
        },
    );

    let sealed = engine.encrypt_presence("away", &to(&["p"])).await.unwrap();
    assert_eq!(sealed.key, "p");

    let report = engine.performance_report();
    assert_eq!(report.worker.dispatched, 0);
    assert_eq!(report.worker.fallbacks, 1);
    assert_eq!(report.metrics.worker.fell_back, 1);
}

#[tokio::test]
async fn metrics_window_stays_bounded() {
    let engine = simulated_engine();
    let metrics = Arc::clone(engine.context().metrics());

    for i in 0..120 {
        metrics.record(MetricKind::MessageLatency, i as f64);
    }

    assert_eq!(metrics.window_len(MetricKind::MessageLatency), 50);
    // последние 50 значений: 70..=119
    assert_eq!(metrics.average(MetricKind::MessageLatency), 94.5);
}

#[tokio::test]
async fn linear_cost_encryption_shortens_its_own_flush_delay() {
    let engine = build_engine(
        Arc::new(
            SimulatedCryptoExecutor::new("adaptive").with_work_cost(Duration::from_millis(20)),
        ),
        OffloadOptions::default(),
    );

    // одиночная отправка задаёт стоимость элемента, окно батчей ещё пустое
    engine.encrypt_message("solo", &to(&["z"])).await.unwrap();
    assert_eq!(engine.performance_report().batch.encrypt_delay_ms, 100);

    for round in 0..2 {
        let pair: Vec<_> = (0..2)
            .map(|i| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine
                        .encrypt_message(&format!("pair-{}-{}", round, i), &to(&["z"]))
                        .await
                })
            })
            .collect();
        for handle in pair {
            handle.await.unwrap().unwrap();
        }
    }

    let report = engine.performance_report();
    assert_eq!(report.batch.encrypt.flushes, 3);
    assert_eq!(report.batch.encrypt.items_processed, 5);
    assert!(report.metrics.batch_efficiency["encrypt"] < 20.0);
    assert_eq!(report.batch.encrypt_delay_ms, 50);
    // очередь присутствия не наследует чужую статистику
    assert_eq!(report.batch.presence_delay_ms, 100);
}
