//! Reconciliation pipeline for the ANS quarterly financial-statement archives.
//!
//! Archives are reduced to expense rows per reporting period, joined against the
//! operator registry, annotated with tax-id validity and rolled up per operator.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod validate;

pub use config::PipelineConfig;
pub use error::{ArchiveError, PipelineError};
