//! Data models for scribe-pipeline
//!
//! - Job record and its patch/validation rules
//! - Audio upload and model collaborator payloads

pub mod audio;
pub mod job;

pub use audio::{AudioUpload, Diarization, SpeakerTurn, TimedText, Transcription};
pub use job::{Job, JobPatch, JobSpec, PatchError, ResultRef};
