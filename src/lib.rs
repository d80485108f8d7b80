pub mod chooser;
pub mod client;
pub mod config;
pub mod errors;
pub mod executor;
pub mod http_endpoint;
pub mod load_models;
pub mod metrics;
pub mod pacer;
pub mod percentiles;
pub mod report;
pub mod results;
pub mod runner;
pub mod throughput;
pub mod utils;
pub mod yaml_config;
