//! Daemon configuration loaded from environment variables.

use intelflow_core::FieldSpec;
use std::collections::HashMap;

/// Resolved settings consumed by the dispatcher and its components.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default notification channel (attribute and keepalive records).
    pub channel_log: String,

    /// Channel for CONTRIBUTION records.
    pub channel_last_contributor: String,

    /// Channel for geo enrichment records.
    pub channel_map: String,

    /// Points awarded when a category has no entry in the reward table.
    pub default_points: u64,

    /// Per-category point values, keyed by normalized category.
    pub reward_points: HashMap<String, u64>,

    /// Bound on the in-process rolling recent-contributors set.
    pub max_last_contributors: usize,

    /// Ordered field specs rendered into each attribute log record.
    pub field_order: Vec<FieldSpec>,

    /// Separator used when a field spec joins several paths into one column.
    pub field_separator: String,
}

impl Default for Config {
    fn default() -> Self {
        let reward_points = [
            ("network_activity", 5),
            ("payload_delivery", 5),
            ("artifacts_dropped", 5),
            ("payload_installation", 5),
            ("persistence_mechanism", 3),
            ("external_analysis", 2),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let field_order = vec![
            FieldSpec::Path("Attribute.timestamp".to_string()),
            FieldSpec::Path("Event.Orgc.name".to_string()),
            FieldSpec::Joined(vec!["Event.id".to_string(), "Event.info".to_string()]),
            FieldSpec::Path("Attribute.category".to_string()),
            FieldSpec::Path("Attribute.type".to_string()),
            FieldSpec::Path("Attribute.value".to_string()),
        ];

        Self {
            channel_log: "intelflow:log".to_string(),
            channel_last_contributor: "intelflow:lastContributor".to_string(),
            channel_map: "intelflow:mapDispatch".to_string(),
            default_points: 1,
            reward_points,
            max_last_contributors: 1000,
            field_order,
            field_separator: ":".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional; unset variables keep their defaults.
    ///
    /// - `INTELFLOW_CHANNEL_LOG`: default notification channel
    /// - `INTELFLOW_CHANNEL_LAST_CONTRIBUTOR`: contribution-record channel
    /// - `INTELFLOW_CHANNEL_MAP`: geo enrichment channel
    /// - `INTELFLOW_DEFAULT_POINTS`: fallback reward (integer)
    /// - `INTELFLOW_REWARD_POINTS`: JSON object, normalized category → points
    /// - `INTELFLOW_MAX_LAST_CONTRIBUTORS`: rolling contributor-set bound
    /// - `INTELFLOW_FIELD_ORDER`: JSON array of paths or path-lists
    /// - `INTELFLOW_FIELD_SEPARATOR`: joined-field separator
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        if let Ok(v) = std::env::var("INTELFLOW_CHANNEL_LOG") {
            config.channel_log = v;
        }
        if let Ok(v) = std::env::var("INTELFLOW_CHANNEL_LAST_CONTRIBUTOR") {
            config.channel_last_contributor = v;
        }
        if let Ok(v) = std::env::var("INTELFLOW_CHANNEL_MAP") {
            config.channel_map = v;
        }
        if let Ok(v) = std::env::var("INTELFLOW_DEFAULT_POINTS") {
            config.default_points = v
                .parse()
                .map_err(|e| anyhow::anyhow!("INTELFLOW_DEFAULT_POINTS: {e}"))?;
        }
        if let Ok(v) = std::env::var("INTELFLOW_REWARD_POINTS") {
            config.reward_points = serde_json::from_str(&v)
                .map_err(|e| anyhow::anyhow!("INTELFLOW_REWARD_POINTS: {e}"))?;
        }
        if let Ok(v) = std::env::var("INTELFLOW_MAX_LAST_CONTRIBUTORS") {
            config.max_last_contributors = v
                .parse()
                .map_err(|e| anyhow::anyhow!("INTELFLOW_MAX_LAST_CONTRIBUTORS: {e}"))?;
        }
        if let Ok(v) = std::env::var("INTELFLOW_FIELD_ORDER") {
            config.field_order = serde_json::from_str(&v)
                .map_err(|e| anyhow::anyhow!("INTELFLOW_FIELD_ORDER: {e}"))?;
        }
        if let Ok(v) = std::env::var("INTELFLOW_FIELD_SEPARATOR") {
            config.field_separator = v;
        }

        tracing::info!(
            channel_log = %config.channel_log,
            channel_last_contributor = %config.channel_last_contributor,
            channel_map = %config.channel_map,
            default_points = config.default_points,
            reward_categories = config.reward_points.len(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Points for a normalized category, falling back to the default.
    pub fn points_for(&self, normalized_category: &str) -> u64 {
        self.reward_points
            .get(normalized_category)
            .copied()
            .unwrap_or(self.default_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize config tests that manipulate env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "INTELFLOW_CHANNEL_LOG",
        "INTELFLOW_CHANNEL_LAST_CONTRIBUTOR",
        "INTELFLOW_CHANNEL_MAP",
        "INTELFLOW_DEFAULT_POINTS",
        "INTELFLOW_REWARD_POINTS",
        "INTELFLOW_MAX_LAST_CONTRIBUTORS",
        "INTELFLOW_FIELD_ORDER",
        "INTELFLOW_FIELD_SEPARATOR",
    ];

    /// Helper to run config tests with isolated env vars.
    /// Uses a mutex to prevent concurrent env var races.
    fn with_env_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_MUTEX.lock().unwrap();

        let saved: Vec<_> = ENV_KEYS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
        for (k, v) in vars {
            std::env::set_var(k, v);
        }

        f();

        for (k, v) in &saved {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }
    }

    #[test]
    fn config_defaults() {
        with_env_vars(&[], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.channel_log, "intelflow:log");
            assert_eq!(config.default_points, 1);
            assert_eq!(config.max_last_contributors, 1000);
            assert_eq!(config.field_separator, ":");
            assert!(!config.field_order.is_empty());
        });
    }

    #[test]
    fn config_custom_values() {
        with_env_vars(
            &[
                ("INTELFLOW_CHANNEL_LOG", "feed:log"),
                ("INTELFLOW_DEFAULT_POINTS", "3"),
                ("INTELFLOW_REWARD_POINTS", r#"{"network_activity": 10}"#),
                ("INTELFLOW_FIELD_SEPARATOR", "-"),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.channel_log, "feed:log");
                assert_eq!(config.default_points, 3);
                assert_eq!(config.reward_points.len(), 1);
                assert_eq!(config.points_for("network_activity"), 10);
                assert_eq!(config.field_separator, "-");
            },
        );
    }

    #[test]
    fn config_field_order_from_env() {
        with_env_vars(
            &[(
                "INTELFLOW_FIELD_ORDER",
                r#"["Attribute.value", ["Event.id", "Event.info"]]"#,
            )],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.field_order.len(), 2);
            },
        );
    }

    #[test]
    fn config_rejects_bad_reward_table() {
        with_env_vars(&[("INTELFLOW_REWARD_POINTS", "not json")], || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn unknown_category_falls_back_to_default() {
        let config = Config::default();
        assert_eq!(config.points_for("never_seen"), config.default_points);
    }
}
