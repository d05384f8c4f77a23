//! Intelflow ingestion pipeline components.
//!
//! This crate provides the classification and aggregation pipeline for
//! topic-tagged threat-intelligence change events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Frame Sources  │  (frame files, stdin bridge)
//! └────────┬────────┘
//!          │ (topic, payload)
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  exhaustive topic match, event expansion
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────┐
//! │ ContributionPipeline │ RankEngine │ Geo │
//! └────────┬────────────────────────────────┘
//!          │ commutative ops / envelopes
//!          ▼
//! ┌─────────────────┐   ┌──────────────────┐
//! │ AggregateStore  │   │    Publisher     │
//! └─────────────────┘   └──────────────────┘
//! ```
//!
//! One frame is fully classified, expanded, scored, and published before
//! the next is read; the store facade only ever receives commutative,
//! fire-and-forget operations.

pub mod config;
pub mod contrib;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod publish;
pub mod rank;
pub mod source;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use config::Config;
pub use contrib::{ContributionPipeline, WeeklyActivity, SIGHTING_MULTIPLIER};
pub use dispatch::{DispatchStats, Dispatcher};
pub use geo::{GeoEnricher, GeoError, GeoResolver, ResolvedLocation, StaticResolver};
pub use publish::{ChannelPublisher, OutboundWriter};
pub use rank::{ContributionEvent, RankEngine, Requirement, WeeklyCounts};
pub use source::{FileSource, FrameSource, SourceOptions, SourceStats, StdinSource};
pub use store::{AggregateStore, MemoryPublisher, MemoryStore, Publisher, TracingPublisher};
