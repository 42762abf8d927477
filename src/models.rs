use serde::{Deserialize, Serialize};

/// One row of the canonical gazetteer. The (city, country, state) triple is
/// unique across the store; rows are never updated or deleted in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLocation {
    pub id: i64,
    pub city: String,
    pub country: String,
    pub country_code_iso2: String,
    pub country_code_iso3: String,
    pub state: String,
    pub state_code: Option<String>,
}

/// Fields for a gazetteer row about to be created by the synthesizer or the
/// seed loader. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    pub city: String,
    pub country: String,
    pub country_code_iso2: String,
    pub country_code_iso3: String,
    pub state: String,
    pub state_code: Option<String>,
}

/// Classified slots for one raw location string. A slot is filled at most
/// once; ISO code matches land in `country` as the resolved country name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slots {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Slots {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.state.is_none() && self.country.is_none()
    }
}

/// One raw location as it arrives in a posting payload: either a bare string
/// or a string paired with a remote flag precomputed upstream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LocationEntry {
    Plain(String),
    Tagged { text: String, remote: bool },
}

impl LocationEntry {
    pub fn text(&self) -> &str {
        match self {
            LocationEntry::Plain(text) => text,
            LocationEntry::Tagged { text, .. } => text,
        }
    }

    pub fn remote(&self) -> Option<bool> {
        match self {
            LocationEntry::Plain(_) => None,
            LocationEntry::Tagged { remote, .. } => Some(*remote),
        }
    }
}

/// A raw location string after annotation handling, carrying the remote flag
/// it inherits from the enclosing posting. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedLocation {
    pub text: String,
    pub remote: bool,
}

/// A persisted job posting, denormalized with its company name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub company: String,
    pub job_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub location_fallback: Option<String>,
    pub created_at: String,
}

/// One location attached to a job, with the per-association remote flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLocation {
    pub location: CanonicalLocation,
    pub remote: bool,
}
