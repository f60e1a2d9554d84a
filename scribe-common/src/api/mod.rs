//! API module for shared HTTP API functionality
//!
//! Request/response types exchanged between scribe-pipeline (server) and
//! scribe-client (poller). Contains ONLY plain serde types, no HTTP
//! framework dependencies.

pub mod types;

pub use types::{
    CancelResponse, ErrorDetail, ErrorResponse, JobResults, JobStatusResponse, PerformanceMetrics,
    TranscriptSegment, UploadResponse,
};
