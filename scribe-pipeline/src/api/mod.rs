//! HTTP API handlers for scribe-pipeline

pub mod health;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use jobs::job_routes;
pub use sse::job_event_stream;
