pub mod chunker;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod provider;
pub mod provider_factory;
pub mod providers;
pub mod registry;
pub mod session;
pub mod telemetry;
