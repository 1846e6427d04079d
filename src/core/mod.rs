//! Core domain models for the forecasting pipeline
//!
//! This module defines the fundamental data structures that represent
//! pipelines, stages, artifacts, run results and the error taxonomy.

pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod severity;
pub mod stage;
pub mod state;

pub use artifact::*;
pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use severity::*;
pub use stage::*;
pub use state::*;
