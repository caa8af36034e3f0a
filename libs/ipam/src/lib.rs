pub mod config;
pub mod error;
pub mod ipconfig;
pub mod metrics;
pub mod nc;
pub mod pod;
pub mod pool;
pub mod store;
pub mod telemetry;
