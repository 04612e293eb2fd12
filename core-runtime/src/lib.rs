//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the offline audio core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//! - Observable state cells
//! - The serialized writer context used by the stores
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the logging conventions, the event broadcasting mechanism
//! and the single-writer discipline used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod state;
pub mod writer;

pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus};
pub use state::StateCell;
pub use writer::WriterContext;
