//! # Download Module
//!
//! Fetches remote audio into the media directory and commits the results to
//! the catalog.
//!
//! ## Overview
//!
//! - [`DownloadOrchestrator`]: one cancellable task per job, with retry,
//!   admission control and throttled progress
//! - [`ProgressSampler`]: turns byte counts into progress samples
//! - [`file_name_for`]: media file naming from the URL or content type
//! - [`StreamResolver`]: external collaborator that turns a source reference
//!   into a downloadable URL

pub mod error;
pub mod filename;
pub mod orchestrator;
pub mod progress;
pub mod resolver;

pub use error::{DownloadError, Result};
pub use filename::{file_name_for, title_from_file_name};
pub use orchestrator::{DownloadOrchestrator, DownloadRequest};
pub use progress::ProgressSampler;
pub use resolver::{ResolvedStream, StreamResolver};
