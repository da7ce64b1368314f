pub mod cluster;
pub mod config;
pub mod error;
pub mod metrics;
pub mod remote;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
