use anyhow::Result;

use crate::models::{CanonicalLocation, NewLocation, Slots};

/// Read/append access to the canonical gazetteer. All lookups are exact-match
/// on already-normalized text and return the first hit under id-ascending
/// order, so results are deterministic across implementations.
pub trait GazetteerStore {
    fn find_by_city(&self, city: &str) -> Result<Option<CanonicalLocation>>;
    fn find_by_state(&self, state: &str) -> Result<Option<CanonicalLocation>>;
    fn find_by_country(&self, country: &str) -> Result<Option<CanonicalLocation>>;
    fn find_by_iso2(&self, code: &str) -> Result<Option<CanonicalLocation>>;
    fn find_by_iso3(&self, code: &str) -> Result<Option<CanonicalLocation>>;
    fn find_by_state_code(&self, code: &str) -> Result<Option<CanonicalLocation>>;

    /// Exact row for the unique (city, country, state) triple.
    fn find_exact(&self, city: &str, country: &str, state: &str)
    -> Result<Option<CanonicalLocation>>;

    /// First row matching the city together with the country slot, then the
    /// city together with the state slot. Conjunctions are tried in that
    /// order; unfilled slots are skipped.
    fn find_city_with(&self, city: &str, slots: &Slots) -> Result<Option<CanonicalLocation>> {
        if let Some(country) = &slots.country {
            if let Some(loc) = self.find_city_country(city, country)? {
                return Ok(Some(loc));
            }
        }
        if let Some(state) = &slots.state {
            if let Some(loc) = self.find_city_state(city, state)? {
                return Ok(Some(loc));
            }
        }
        Ok(None)
    }

    fn find_city_country(&self, city: &str, country: &str)
    -> Result<Option<CanonicalLocation>>;
    fn find_city_state(&self, city: &str, state: &str) -> Result<Option<CanonicalLocation>>;

    /// Loose match: first row agreeing with ANY filled slot (city OR state OR
    /// country), id ascending. A row can win on a single agreeing field even
    /// when its other fields differ from the input.
    fn find_any(&self, slots: &Slots) -> Result<Option<CanonicalLocation>>;

    /// Append a new row. On a (city, country, state) conflict the existing
    /// row is fetched and returned instead, so concurrent losers adopt the
    /// winner's record.
    fn insert(&self, new: &NewLocation) -> Result<CanonicalLocation>;
}

/// Donor lookup used by the record synthesizer: try one candidate value
/// against country, ISO2, ISO3, state, then state code, in that priority.
pub fn find_donor<G: GazetteerStore + ?Sized>(
    gaz: &G,
    value: &str,
) -> Result<Option<CanonicalLocation>> {
    if let Some(loc) = gaz.find_by_country(value)? {
        return Ok(Some(loc));
    }
    if let Some(loc) = gaz.find_by_iso2(value)? {
        return Ok(Some(loc));
    }
    if let Some(loc) = gaz.find_by_iso3(value)? {
        return Ok(Some(loc));
    }
    if let Some(loc) = gaz.find_by_state(value)? {
        return Ok(Some(loc));
    }
    gaz.find_by_state_code(value)
}
