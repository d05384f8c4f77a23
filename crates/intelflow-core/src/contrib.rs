//! Contribution vocabulary shared by the scorer and the rank engine.

use std::fmt;

/// Kind of scored unit of work attributed to an organisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContributionType {
    Sighting,
    Attribute,
    Object,
    Proposal,
    Discussion,
    Event,
}

impl ContributionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionType::Sighting => "sighting",
            ContributionType::Attribute => "attribute",
            ContributionType::Object => "object",
            ContributionType::Proposal => "proposal",
            ContributionType::Discussion => "discussion",
            ContributionType::Event => "event",
        }
    }
}

impl fmt::Display for ContributionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a free-text category for reward lookups: lowercase, spaces
/// replaced with underscores.
pub fn normalize_category(categ: &str) -> String {
    categ.to_lowercase().replace(' ', "_")
}
