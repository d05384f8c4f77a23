//! Core types, field extraction, and shared utilities for the intelflow
//! pipeline.
//!
//! This crate provides:
//! - Topic enumeration and inbound frame parsing
//! - Dotted-path field extraction with empty-on-miss semantics
//! - The aggregate-store key scheme and day-bucket formatting
//! - The contribution-type vocabulary shared by the scorer and rank engine
//! - Prometheus metrics helpers
//! - Shared error types

mod contrib;
mod error;
mod fields;
pub mod keys;
pub mod metrics;
mod topic;

/// Attribute category that triggers geographic enrichment.
///
/// The comparison is case-sensitive: this is the exact enumerated value the
/// upstream system emits, not a free-text match.
pub const NETWORK_ACTIVITY_CATEGORY: &str = "Network activity";

pub use contrib::{normalize_category, ContributionType};
pub use error::{Error, Result};
pub use fields::{extract, render_record, FieldSpec, FieldValue};
pub use topic::{Frame, Topic};
