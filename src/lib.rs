mod artifact;
mod model_service;
mod ort_service;
mod provisioning;
mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
