//! scribe-client library
//!
//! Client side of the Scribe job pipeline: an HTTP client for the job
//! service and a poller that follows one job to a terminal state with
//! bounded retry on transient failures.

pub mod config;
pub mod error;
pub mod http;
pub mod poller;
pub mod retry;
pub mod source;

pub use error::{FetchError, PollError};
pub use http::HttpJobClient;
pub use poller::{JobPoller, PollEvent, PollHandle, PollOutcome, PollerConfig};
pub use retry::RetryPolicy;
pub use source::StatusSource;
