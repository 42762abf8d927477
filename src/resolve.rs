use std::collections::HashSet;

use anyhow::Result;
use thiserror::Error;

use crate::audit::AuditSink;
use crate::classify::{Classified, classify};
use crate::gazetteer::{GazetteerStore, find_donor};
use crate::models::{CanonicalLocation, JobLocation, LocationEntry, NewLocation, TaggedLocation};
use crate::{normalize, rewrite};

#[derive(Debug, Error)]
pub enum SynthesisError {
    /// No existing gazetteer row could donate country/state/ISO fields.
    #[error("no donor record among {0:?}")]
    DonorNotFound(Vec<String>),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// The result of resolving one raw location string: a reference to exactly
/// one canonical record, or the verbatim unresolved string. Never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Resolved {
        location: CanonicalLocation,
        remote: bool,
        synthesized: bool,
    },
    Unresolved {
        raw: String,
    },
}

/// Resolve one tagged raw location string against the gazetteer.
///
/// Rewrite, tokenize, classify, then:
/// - known city: conjunction lookups (city+country, city+state) when more
///   context is classified, otherwise the single-slot lookup; a miss hands
///   the city to the synthesizer;
/// - no known city but unrecognized tokens: the first such token is a city
///   candidate for synthesis;
/// - only state/country classified: loose OR match, first row by id. A row
///   can win on one agreeing field; this is relied on for bare-country input
///   and pinned by a regression test below;
/// - nothing classified: unresolved, logged to the unknown-locations stream.
pub fn resolve_one<G, A>(gaz: &G, audit: &A, loc: &TaggedLocation) -> Result<Outcome>
where
    G: GazetteerStore + ?Sized,
    A: AuditSink + ?Sized,
{
    let rewritten = rewrite::apply(&loc.text, loc.remote);
    let tokens = normalize::tokenize(&rewritten);
    if tokens.is_empty() {
        return Ok(unresolved(audit, &loc.text));
    }

    let classified = classify(gaz, &tokens)?;

    if let Some(city) = classified.slots.city.clone() {
        let hit = if classified.slots.country.is_some() || classified.slots.state.is_some() {
            gaz.find_city_with(&city, &classified.slots)?
        } else {
            gaz.find_any(&classified.slots)?
        };
        if let Some(location) = hit {
            return Ok(Outcome::Resolved { location, remote: loc.remote, synthesized: false });
        }
        return synthesize(gaz, audit, &city, &classified, loc);
    }

    if let Some(city) = classified.novel.first().cloned() {
        return synthesize(gaz, audit, &city, &classified, loc);
    }

    if !classified.slots.is_empty() {
        if let Some(location) = gaz.find_any(&classified.slots)? {
            return Ok(Outcome::Resolved { location, remote: loc.remote, synthesized: false });
        }
    }

    Ok(unresolved(audit, &loc.text))
}

fn unresolved<A: AuditSink + ?Sized>(audit: &A, raw: &str) -> Outcome {
    // An audit write failure must not fail the resolution itself.
    if let Err(e) = audit.record_unknown_location(raw) {
        eprintln!("audit write failed: {e:#}");
    }
    Outcome::Unresolved { raw: raw.to_string() }
}

fn synthesize<G, A>(
    gaz: &G,
    audit: &A,
    city: &str,
    classified: &Classified,
    loc: &TaggedLocation,
) -> Result<Outcome>
where
    G: GazetteerStore + ?Sized,
    A: AuditSink + ?Sized,
{
    match try_synthesize(gaz, city, classified) {
        Ok(location) => {
            if let Err(e) = audit.record_new_location(&loc.text, &location) {
                eprintln!("audit write failed: {e:#}");
            }
            Ok(Outcome::Resolved { location, remote: loc.remote, synthesized: true })
        }
        Err(SynthesisError::DonorNotFound(_)) => Ok(unresolved(audit, &loc.text)),
        Err(SynthesisError::Store(e)) => Err(e),
    }
}

/// Create a new canonical record for a novel city by borrowing fields from a
/// donor row. Donor candidates are the classified country, the classified
/// state, then the remaining unrecognized tokens; each candidate is tried
/// against country, ISO2, ISO3, state, and state code in that priority.
fn try_synthesize<G>(
    gaz: &G,
    city: &str,
    classified: &Classified,
) -> Result<CanonicalLocation, SynthesisError>
where
    G: GazetteerStore + ?Sized,
{
    let candidates = donor_candidates(city, classified);

    let mut donor = None;
    for candidate in &candidates {
        if let Some(found) = find_donor(gaz, candidate)? {
            donor = Some(found);
            break;
        }
    }
    let Some(donor) = donor else {
        return Err(SynthesisError::DonorNotFound(candidates));
    };

    let new = if city == "Remote" {
        // Remote postings pin both city and state to "Remote" and take the
        // country identity from the donor.
        NewLocation {
            city: "Remote".to_string(),
            country: donor.country,
            country_code_iso2: donor.country_code_iso2,
            country_code_iso3: donor.country_code_iso3,
            state: "Remote".to_string(),
            state_code: None,
        }
    } else {
        NewLocation {
            city: city.to_string(),
            country: donor.country,
            country_code_iso2: donor.country_code_iso2,
            country_code_iso3: donor.country_code_iso3,
            state: donor.state,
            state_code: donor.state_code,
        }
    };

    Ok(gaz.insert(&new)?)
}

fn donor_candidates(city: &str, classified: &Classified) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Some(country) = &classified.slots.country {
        candidates.push(country.clone());
    }
    if let Some(state) = &classified.slots.state {
        candidates.push(state.clone());
    }
    for token in &classified.novel {
        if token != city && !candidates.contains(token) {
            candidates.push(token.clone());
        }
    }
    candidates
}

/// Everything the engine produced for one posting: the de-duplicated set of
/// canonical references and the verbatim strings that failed.
#[derive(Debug, Default)]
pub struct PostingResolution {
    pub locations: Vec<JobLocation>,
    pub unresolved: Vec<String>,
    pub synthesized: usize,
}

/// Resolve a posting's raw location list: annotation handling first, then one
/// outcome per entry. Identical resolved references within the posting are
/// merged; every distinct failed string is preserved.
pub fn resolve_posting<G, A>(
    gaz: &G,
    audit: &A,
    entries: &[LocationEntry],
) -> Result<PostingResolution>
where
    G: GazetteerStore + ?Sized,
    A: AuditSink + ?Sized,
{
    let tagged = rewrite::prepare(entries);

    let mut result = PostingResolution::default();
    let mut seen: HashSet<i64> = HashSet::new();

    for loc in &tagged {
        match resolve_one(gaz, audit, loc)? {
            Outcome::Resolved { location, remote, synthesized } => {
                if seen.insert(location.id) {
                    if synthesized {
                        result.synthesized += 1;
                    }
                    result.locations.push(JobLocation { location, remote });
                }
            }
            Outcome::Unresolved { raw } => {
                if !result.unresolved.contains(&raw) {
                    result.unresolved.push(raw);
                }
            }
        }
    }

    Ok(result)
}
