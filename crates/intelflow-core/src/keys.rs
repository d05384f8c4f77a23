//! Aggregate-store key scheme and day-bucket formatting.
//!
//! All daily counters share one key shape: `<family>:<YYYYMMDD>`, with the
//! date taken from the wall clock at the moment of the write. Keys never
//! embed raw payload data except the organisation name and the normalized
//! category, both of which are stable identifiers upstream.

use chrono::{Datelike, NaiveDate};
use std::time::Duration;

pub const ONE_DAY: Duration = Duration::from_secs(60 * 60 * 24);

/// Daily geo-coordinate counter (sorted set keyed by serialized lat/lon).
pub const GEO_COORD: &str = "GEO_COORD";
/// Daily per-country counter (sorted set keyed by ISO code).
pub const GEO_COUNTRY: &str = "GEO_COUNTRY";
/// Daily geospatial index of enriched positions.
pub const GEO_RAD: &str = "GEO_RAD";
/// Daily organisation→points sorted set.
pub const CONTRIB_DAY: &str = "CONTRIB_DAY";
/// Daily per-category contribution-count sorted set.
pub const CONTRIB_CATEG: &str = "CONTRIB_CATEG";
/// Daily timestamped contributor set; expires a day after creation.
pub const CONTRIB_LAST: &str = "CONTRIB_LAST";
/// Unbounded set of every organisation that ever contributed.
pub const CONTRIB_ALL_ORG: &str = "CONTRIB_ALL_ORG";

/// Format a calendar date as the `YYYYMMDD` day-bucket token, zero-padded.
pub fn day_key(date: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

/// `<family>:<YYYYMMDD>` bucket key.
pub fn day_bucket(family: &str, date: NaiveDate) -> String {
    format!("{}:{}", family, day_key(date))
}

/// `CONTRIB_CATEG:<YYYYMMDD>:<category>` — category must already be
/// normalized (lowercase, underscores).
pub fn category_bucket(date: NaiveDate, category: &str) -> String {
    format!("{}:{}:{}", CONTRIB_CATEG, day_key(date), category)
}

/// Per-organisation cumulative points counter.
pub fn org_points(org: &str) -> String {
    format!("CONTRIB_ORG:{org}:points")
}

/// Per-organisation expiring rank-requirement flag.
pub fn org_requirement(org: &str, id: u8) -> String {
    format!("CONTRIB_ORG:{org}:CONTRIB_REQ_{id}")
}
