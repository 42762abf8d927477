use anyhow::Result;

use crate::gazetteer::GazetteerStore;
use crate::models::Slots;

/// Classification result for one token sequence: the filled slots plus the
/// tokens that matched nothing, in input order. The first novel token is the
/// synthesizer's city candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    pub slots: Slots,
    pub novel: Vec<String>,
}

/// Classify normalized tokens left to right. Each token is tested in fixed
/// priority (city, state, country name, ISO2, ISO3) and lands in the first
/// unfilled slot it matches; a category whose slot is already filled is
/// skipped for that token. No backtracking: location strings run
/// city -> region -> country, and freezing earlier matches keeps a later
/// ambiguous token from overwriting them.
///
/// A bare 2-letter code that is both a state code somewhere and an ISO2
/// country code elsewhere ("CA") always reads as the ISO2 country here; the
/// rewriter is the only place that exception is handled.
pub fn classify<G>(gaz: &G, tokens: &[String]) -> Result<Classified>
where
    G: GazetteerStore + ?Sized,
{
    let mut out = Classified::default();

    for token in tokens {
        if out.slots.city.is_none() && gaz.find_by_city(token)?.is_some() {
            out.slots.city = Some(token.clone());
            continue;
        }
        if out.slots.state.is_none() && gaz.find_by_state(token)?.is_some() {
            out.slots.state = Some(token.clone());
            continue;
        }
        if out.slots.country.is_none() {
            if gaz.find_by_country(token)?.is_some() {
                out.slots.country = Some(token.clone());
                continue;
            }
            if let Some(loc) = gaz.find_by_iso2(token)? {
                out.slots.country = Some(loc.country);
                continue;
            }
            if let Some(loc) = gaz.find_by_iso3(token)? {
                out.slots.country = Some(loc.country);
                continue;
            }
        }
        out.novel.push(token.clone());
    }

    Ok(out)
}
