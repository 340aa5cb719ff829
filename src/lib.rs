pub mod config;

// CORE
pub mod core {
    pub mod engine {
        pub mod error;
        pub mod context;
        pub mod fingerprint;
        pub mod optimizer;
    }
    pub mod cache {
        pub mod expiring_lru;
    }
    pub mod metrics {
        pub mod window;
        pub mod stats;
        pub mod aggregator;
    }
    pub mod batch {
        pub mod scheduler;
    }
    pub mod worker {
        pub mod executor;
        pub mod pool;
        pub mod offload_manager;
    }
    pub mod crypto {
        pub mod payload;
        pub mod simulated;
    }
    pub mod transport {
        pub mod simulated;
    }
    pub mod harness {
        pub mod performance;
    }
    pub mod monitoring {
        pub mod logger;
    }
}
