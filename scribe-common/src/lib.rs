//! # Scribe Common Library
//!
//! Shared code for the Scribe transcription services including:
//! - Job status state machine (`JobStatus`)
//! - API request/response types shared by server and client
//! - Event types (ScribeEvent enum) and the EventBus
//! - Configuration loading
//! - Logging initialization

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod status;

pub use error::{Error, Result};
pub use status::{JobId, JobStatus};
