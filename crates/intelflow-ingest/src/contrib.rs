//! Contribution scoring and aggregation.
//!
//! Every qualifying attribute or sighting becomes one contribution record:
//! points from the configured reward table (normalized-category lookup,
//! default on miss) times a multiplier, credited to the owning organisation
//! across the daily aggregates, then handed to the rank engine together
//! with the organisation's rolling weekly activity.

use crate::config::Config;
use crate::rank::{ContributionEvent, RankEngine, WeeklyCounts};
use crate::store::{log_envelope, AggregateStore, Publisher};
use chrono::Utc;
use intelflow_core::{keys, normalize_category, ContributionType};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const WEEK_SECS: i64 = 7 * 24 * 60 * 60;

/// Multiplier applied to sighting contributions.
pub const SIGHTING_MULTIPLIER: u64 = 2;

/// Rolling 7-day contribution counts per organisation.
///
/// Maintained in-process: the dispatch loop is the only writer, so the
/// tracker is authoritative for this instance and the aggregate store never
/// has to answer a read. Timestamps older than the window are pruned
/// whenever an organisation's counts are requested.
#[derive(Default)]
pub struct WeeklyActivity {
    window: HashMap<String, PerType>,
}

#[derive(Default)]
struct PerType {
    sightings: VecDeque<i64>,
    attributes: VecDeque<i64>,
    proposals: VecDeque<i64>,
    events: VecDeque<i64>,
}

impl PerType {
    fn bucket(&mut self, ty: ContributionType) -> &mut VecDeque<i64> {
        use ContributionType as Ct;
        match ty {
            Ct::Sighting => &mut self.sightings,
            Ct::Attribute | Ct::Object => &mut self.attributes,
            Ct::Proposal | Ct::Discussion => &mut self.proposals,
            Ct::Event => &mut self.events,
        }
    }

    fn prune(&mut self, horizon: i64) {
        for bucket in [
            &mut self.sightings,
            &mut self.attributes,
            &mut self.proposals,
            &mut self.events,
        ] {
            while bucket.front().is_some_and(|&ts| ts < horizon) {
                bucket.pop_front();
            }
        }
    }
}

impl WeeklyActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one contribution at `now` (epoch seconds).
    pub fn record(&mut self, org: &str, ty: ContributionType, now: i64) {
        self.window
            .entry(org.to_string())
            .or_default()
            .bucket(ty)
            .push_back(now);
    }

    /// Counts within the trailing 7 days, pruning older entries.
    pub fn counts(&mut self, org: &str, now: i64) -> WeeklyCounts {
        match self.window.get_mut(org) {
            Some(per_type) => {
                per_type.prune(now - WEEK_SECS);
                WeeklyCounts {
                    sightings: per_type.sightings.len() as u64,
                    attributes: per_type.attributes.len() as u64,
                    proposals: per_type.proposals.len() as u64,
                    events: per_type.events.len() as u64,
                }
            }
            None => WeeklyCounts::default(),
        }
    }
}

/// CONTRIBUTION record published on the last-contributor channel.
#[derive(Debug, Serialize)]
struct ContributionRecord<'a> {
    org: &'a str,
    categ: &'a str,
    action: &'a str,
    epoch: i64,
}

/// Scores contributions and applies the daily aggregates.
pub struct ContributionPipeline {
    store: Arc<dyn AggregateStore>,
    publisher: Arc<dyn Publisher>,
    rank: RankEngine,
    default_points: u64,
    reward_points: HashMap<String, u64>,
    channel: String,
    feed_name: String,
    max_recent: usize,
    weekly: WeeklyActivity,
    recent: VecDeque<String>,
}

impl ContributionPipeline {
    pub fn new(
        config: &Config,
        feed_name: String,
        store: Arc<dyn AggregateStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            rank: RankEngine::new(Arc::clone(&store)),
            store,
            publisher,
            default_points: config.default_points,
            reward_points: config.reward_points.clone(),
            channel: config.channel_last_contributor.clone(),
            feed_name,
            max_recent: config.max_last_contributors,
            weekly: WeeklyActivity::new(),
            recent: VecDeque::new(),
        }
    }

    /// Score one contribution and apply every aggregate side effect.
    ///
    /// Returns the points credited.
    pub fn handle(
        &mut self,
        org: &str,
        categ: &str,
        action: &str,
        multiplier: u64,
        event: ContributionEvent,
    ) -> u64 {
        let normalized = normalize_category(categ);
        let base = self
            .reward_points
            .get(&normalized)
            .copied()
            .unwrap_or(self.default_points);
        let points = base * multiplier;

        let now = Utc::now();
        let today = now.date_naive();
        let epoch = now.timestamp();

        self.store
            .zincr(&keys::day_bucket(keys::CONTRIB_DAY, today), org, points as f64);
        // The category counter tracks activity volume, not weighted score
        self.store.zincr(
            &keys::category_bucket(today, &normalized),
            org,
            self.default_points as f64,
        );
        self.store.sadd(keys::CONTRIB_ALL_ORG, org);

        let last_key = keys::day_bucket(keys::CONTRIB_LAST, today);
        self.store.zadd(&last_key, org, epoch);
        self.store.expire_in(&last_key, keys::ONE_DAY);

        self.remember(org);
        self.weekly.record(org, event.contrib_type, epoch);
        let weekly = self.weekly.counts(org, epoch);
        self.rank.update(org, points, &event, &weekly);

        let record = ContributionRecord {
            org,
            categ,
            action,
            epoch,
        };
        self.publisher
            .publish(&self.channel, log_envelope("CONTRIBUTION", &record, &self.feed_name));

        metrics::counter!("contrib_records_total").increment(1);
        metrics::counter!("contrib_points_total").increment(points);

        points
    }

    /// The rolling recent-contributors set, most recent first.
    pub fn recent_contributors(&self) -> impl Iterator<Item = &str> {
        self.recent.iter().map(String::as_str)
    }

    fn remember(&mut self, org: &str) {
        if let Some(pos) = self.recent.iter().position(|o| o == org) {
            let _ = self.recent.remove(pos);
        }
        self.recent.push_front(org.to_string());
        self.recent.truncate(self.max_recent);
    }
}
