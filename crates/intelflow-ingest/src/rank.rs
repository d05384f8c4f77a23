//! Organisation rank-requirement ledger.
//!
//! Fourteen independently-expiring boolean flags per organisation, each a
//! declarative rule over the current contribution and its context. No rule
//! depends on another; a qualifying event idempotently re-arms the flag's
//! TTL. The required inputs — contribution type, event timestamp,
//! classification, and per-type weekly counts — are explicit parameters, so
//! the ledger never reads anything back from the store.

use crate::store::AggregateStore;
use chrono::Utc;
use intelflow_core::{keys, ContributionType};
use std::sync::Arc;
use std::time::Duration;

const ONE_DAY_SECS: u64 = 60 * 60 * 24;

/// Flag lifetime for once-a-year style requirements.
const YEAR: Duration = Duration::from_secs(ONE_DAY_SECS * 365);
/// Flag lifetime tied to the recency window.
const RECENT_WINDOW: Duration = Duration::from_secs(ONE_DAY_SECS * RECENT_DAYS as u64);
/// Flag lifetime for weekly-cadence requirements.
const REGULAR_WINDOW: Duration = Duration::from_secs(ONE_DAY_SECS * 7);

/// Age threshold, in days, separating recent events from aged ones.
const RECENT_DAYS: i64 = 31;
/// Weekly-activity threshold for the "heavy contributor" rules.
const HEAVY_COUNT: u64 = 10;

/// One qualifying contribution with its rank-relevant context.
#[derive(Debug, Clone)]
pub struct ContributionEvent {
    pub contrib_type: ContributionType,
    /// Epoch seconds of the underlying event (arrival time when the
    /// contribution carries no event context).
    pub event_timestamp: i64,
    /// Whether the underlying event carries a defined threat classification.
    pub is_classified: bool,
}

/// Rolling 7-day contribution counts for one organisation.
///
/// `attributes` covers attribute and object contributions together;
/// `proposals` covers proposals and discussions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeeklyCounts {
    pub sightings: u64,
    pub attributes: u64,
    pub proposals: u64,
    pub events: u64,
}

/// A satisfied requirement: rule id plus the lifetime of its flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub id: u8,
    pub ttl: Duration,
}

/// Evaluate the rule table. Pure function of its inputs.
///
/// `now` is epoch seconds; rules 4 and 5 compare the event's age in whole
/// days against the recency threshold (strictly greater), rules 10–14
/// compare weekly counts against the heavy-contributor threshold (strictly
/// greater).
pub fn satisfied_requirements(
    event: &ContributionEvent,
    weekly: &WeeklyCounts,
    now: i64,
) -> Vec<Requirement> {
    use ContributionType as Ct;

    let ty = event.contrib_type;
    let attr_like = matches!(ty, Ct::Attribute | Ct::Object);
    let proposal_like = matches!(ty, Ct::Proposal | Ct::Discussion);
    let age_days = (now - event.event_timestamp) / ONE_DAY_SECS as i64;
    let aged = age_days > RECENT_DAYS;

    let mut satisfied = Vec::new();
    let mut arm = |id: u8, ttl: Duration| satisfied.push(Requirement { id, ttl });

    if ty == Ct::Sighting {
        arm(1, YEAR);
    }
    if attr_like {
        arm(2, YEAR);
    }
    if proposal_like {
        arm(3, YEAR);
    }
    if ty == Ct::Sighting && aged {
        arm(4, RECENT_WINDOW);
    }
    if ty == Ct::Proposal && aged {
        arm(5, RECENT_WINDOW);
    }
    if ty == Ct::Event {
        arm(6, YEAR);
        arm(7, RECENT_WINDOW);
        arm(8, REGULAR_WINDOW);
    }
    if ty == Ct::Event && event.is_classified {
        arm(9, REGULAR_WINDOW);
    }
    if ty == Ct::Sighting && weekly.sightings > HEAVY_COUNT {
        arm(10, REGULAR_WINDOW);
    }
    if attr_like && weekly.attributes > HEAVY_COUNT {
        arm(11, REGULAR_WINDOW);
    }
    if ty == Ct::Proposal && weekly.proposals > HEAVY_COUNT {
        arm(12, REGULAR_WINDOW);
    }
    if ty == Ct::Event && weekly.events > HEAVY_COUNT {
        arm(13, REGULAR_WINDOW);
        if event.is_classified {
            arm(14, REGULAR_WINDOW);
        }
    }

    satisfied
}

/// Applies rank updates to the aggregate store.
pub struct RankEngine {
    store: Arc<dyn AggregateStore>,
}

impl RankEngine {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Credit `points` to the organisation's cumulative counter and arm the
    /// flag of every satisfied requirement.
    pub fn update(
        &self,
        org: &str,
        points: u64,
        event: &ContributionEvent,
        weekly: &WeeklyCounts,
    ) {
        self.store.incr(&keys::org_points(org), points);

        let now = Utc::now().timestamp();
        let satisfied = satisfied_requirements(event, weekly, now);
        for requirement in &satisfied {
            self.store
                .set_flag(&keys::org_requirement(org, requirement.id), requirement.ttl);
        }
        metrics::counter!("rank_requirements_set_total").increment(satisfied.len() as u64);
    }
}
