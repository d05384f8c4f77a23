//! Geographic enrichment of network-indicator values.
//!
//! Attributes in the "Network activity" category carry an IP-like value.
//! The enricher resolves it to a location, rounds the coordinates to four
//! decimal places (~10 m), feeds three daily aggregates, and publishes a
//! denormalized record on the map channel. Resolver failures are per-value
//! and non-fatal: the rest of the event's processing proceeds untouched.

use crate::error::{Error, Result};
use crate::store::{AggregateStore, Publisher};
use chrono::Utc;
use intelflow_core::keys;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// Location record returned by a resolver, before rounding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    /// Country display name.
    pub country: String,
    /// ISO country code.
    pub iso_code: String,
    /// Most specific subdivision name (state, region, prefecture).
    pub subdivision: String,
    /// City display name.
    pub city: String,
}

/// Typed resolver failures, handled explicitly by the enricher.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum GeoError {
    /// The value is not a syntactically valid IP address.
    #[error("invalid address syntax: {0}")]
    InvalidAddress(String),

    /// Valid syntax, but the database has no entry for it.
    #[error("address not in database: {0}")]
    NotFound(String),
}

/// Resolves an IP-like string to a location.
pub trait GeoResolver: Send + Sync {
    fn resolve(&self, ip: &str) -> std::result::Result<ResolvedLocation, GeoError>;
}

/// A network prefix: an exact address or a CIDR block.
#[derive(Debug, Clone, Copy)]
struct Network {
    base: u128,
    prefix: u8,
    v4: bool,
}

impl Network {
    fn parse(s: &str) -> Option<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p.parse::<u8>().ok()?)),
            None => (s, None),
        };
        match addr.parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => {
                let prefix = prefix.unwrap_or(32);
                (prefix <= 32).then_some(Network {
                    base: u128::from(u32::from(v4)),
                    prefix,
                    v4: true,
                })
            }
            IpAddr::V6(v6) => {
                let prefix = prefix.unwrap_or(128);
                (prefix <= 128).then_some(Network {
                    base: u128::from(v6),
                    prefix,
                    v4: false,
                })
            }
        }
    }

    fn contains(&self, ip: IpAddr) -> bool {
        let (bits, width) = match (ip, self.v4) {
            (IpAddr::V4(v4), true) => (u128::from(u32::from(v4)), 32u32),
            (IpAddr::V6(v6), false) => (u128::from(v6), 128u32),
            _ => return false,
        };
        let shift = width - u32::from(self.prefix);
        if shift >= 128 {
            return true;
        }
        (bits >> shift) == (self.base >> shift)
    }
}

/// One row of the geo table file.
#[derive(Debug, Deserialize)]
struct TableEntry {
    /// Exact IP or CIDR prefix, e.g. `"198.51.100.7"` or `"203.0.113.0/24"`.
    network: String,
    #[serde(flatten)]
    location: ResolvedLocation,
}

/// Table-backed resolver loaded at startup.
///
/// Lives behind [`GeoResolver`] so a real geo database can be swapped in
/// without touching the enricher.
pub struct StaticResolver {
    entries: Vec<(Network, ResolvedLocation)>,
}

impl StaticResolver {
    /// A resolver with no entries: every valid address is `NotFound`.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Load a JSON array of `{network, latitude, longitude, ...}` rows.
    pub fn from_json(json: &str) -> Result<Self> {
        let rows: Vec<TableEntry> = serde_json::from_str(json)?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let network = Network::parse(&row.network)
                .ok_or_else(|| Error::GeoTable(format!("bad network: {}", row.network)))?;
            entries.push((network, row.location));
        }
        // Most specific prefix wins on lookup
        entries.sort_by(|a, b| b.0.prefix.cmp(&a.0.prefix));
        Ok(Self { entries })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let resolver = Self::from_json(&json)?;
        tracing::info!(
            entries = resolver.entries.len(),
            "geo table loaded from {}",
            path.display()
        );
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GeoResolver for StaticResolver {
    fn resolve(&self, ip: &str) -> std::result::Result<ResolvedLocation, GeoError> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| GeoError::InvalidAddress(ip.to_string()))?;
        self.entries
            .iter()
            .find(|(network, _)| network.contains(addr))
            .map(|(_, location)| location.clone())
            .ok_or_else(|| GeoError::NotFound(ip.to_string()))
    }
}

/// Round a coordinate to 4 decimal places (~10 m).
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Rounded coordinate pair. Serialization order (lat, then lon) is the
/// deterministic form used as the daily coordinate-counter key.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

/// Denormalized enrichment record published on the map channel.
#[derive(Debug, Serialize)]
struct MapRecord<'a> {
    coord: Coord,
    categ: &'a str,
    value: &'a str,
    country: &'a str,
    #[serde(rename = "specifName")]
    specif_name: &'a str,
    #[serde(rename = "cityName")]
    city_name: &'a str,
    #[serde(rename = "regionCode")]
    region_code: &'a str,
}

/// Enriches network-indicator values and fans out the aggregates.
pub struct GeoEnricher {
    resolver: Arc<dyn GeoResolver>,
    store: Arc<dyn AggregateStore>,
    publisher: Arc<dyn Publisher>,
    channel: String,
}

impl GeoEnricher {
    pub fn new(
        resolver: Arc<dyn GeoResolver>,
        store: Arc<dyn AggregateStore>,
        publisher: Arc<dyn Publisher>,
        channel: String,
    ) -> Self {
        Self {
            resolver,
            store,
            publisher,
            channel,
        }
    }

    /// Enrich `value` observed under `categ`.
    ///
    /// Returns whether an enrichment was produced. Resolver failures are
    /// logged and skipped; nothing is aggregated or published for them.
    pub fn enrich(&self, categ: &str, value: &str) -> bool {
        let location = match self.resolver.resolve(value) {
            Ok(location) => location,
            Err(GeoError::InvalidAddress(_)) => {
                metrics::counter!("geo_failures_total", "reason" => "invalid").increment(1);
                tracing::debug!(value, "cannot resolve: invalid address");
                return false;
            }
            Err(GeoError::NotFound(_)) => {
                metrics::counter!("geo_failures_total", "reason" => "not_found").increment(1);
                tracing::debug!(value, "address not in database");
                return false;
            }
        };

        let coord = Coord {
            lat: round4(location.latitude),
            lon: round4(location.longitude),
        };
        let today = Utc::now().date_naive();

        let coord_member = serde_json::to_string(&coord).unwrap_or_default();
        self.store
            .zincr(&keys::day_bucket(keys::GEO_COORD, today), &coord_member, 1.0);
        self.store.zincr(
            &keys::day_bucket(keys::GEO_COUNTRY, today),
            &location.iso_code,
            1.0,
        );

        let rad_member =
            serde_json::to_string(&serde_json::json!({"categ": categ, "value": value}))
                .unwrap_or_default();
        self.store.geo_add(
            &keys::day_bucket(keys::GEO_RAD, today),
            coord.lon,
            coord.lat,
            &rad_member,
        );

        let record = MapRecord {
            coord,
            categ,
            value,
            country: &location.country,
            specif_name: &location.subdivision,
            city_name: &location.city,
            region_code: &location.iso_code,
        };
        let payload = serde_json::to_value(&record).unwrap_or(serde_json::Value::Null);
        self.publisher.publish(&self.channel, payload);

        metrics::counter!("geo_enrichments_total").increment(1);
        true
    }
}
