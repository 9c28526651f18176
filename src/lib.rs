mod camera;
mod cv;
mod decoder;
mod detector;
mod labels;
mod ort_detector;
mod pipeline;
mod routes;
mod server;
mod sink;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
