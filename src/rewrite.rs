use crate::models::{LocationEntry, TaggedLocation};

/// Single-word entries that denote combined city/country or SAR entities.
/// These arrive without a comma and expand to a two-part "City, Country"
/// string before tokenization.
const CITY_STATES_AND_SAR: [(&str, &str); 7] = [
    ("Singapore", "Singapore, Singapore"),
    ("Monaco", "Monaco, Monaco"),
    ("Vatican City", "Vatican City, Vatican City"),
    ("San Marino", "San Marino, San Marino"),
    ("Luxembourg", "Luxembourg, Luxembourg"),
    ("Hong Kong", "Hong Kong, Hong Kong"),
    ("Macau", "Macau, Macau"),
];

const IN_OFFICE_MARKER: &str = "In-office locations:";
const REMOTE_MARKER: &str = "Remote location:";

fn annotation_value(entry: &str, marker: &str) -> Option<String> {
    if !entry.contains(marker) {
        return None;
    }
    entry.rsplit(':').next().map(|v| v.trim().to_string())
}

/// List-level pass over a posting's raw locations: pull out the in-office and
/// remote annotations, drop them from the list, and tag every remaining entry
/// with its remote flag. The remote annotation's value re-enters as a
/// synthetic "Remote, Remote, <Country>" entry; an upstream-precomputed
/// remote flag on an entry always wins over tagging.
pub fn prepare(entries: &[LocationEntry]) -> Vec<TaggedLocation> {
    let mut in_office: Option<String> = None;
    let mut remote_location: Option<String> = None;
    let mut rest: Vec<&LocationEntry> = Vec::new();

    for entry in entries {
        if let Some(value) = annotation_value(entry.text(), IN_OFFICE_MARKER) {
            in_office = Some(value);
        } else if let Some(value) = annotation_value(entry.text(), REMOTE_MARKER) {
            remote_location = Some(format!("Remote, Remote, {value}"));
        } else if !entry.text().trim().is_empty() {
            rest.push(entry);
        }
    }

    // Only an in-office annotation flips the default: everything that is not
    // the office location is implicitly remote.
    let default_remote = in_office.is_some();

    let mut tagged = Vec::new();
    let mut remote_matched = false;
    for entry in rest {
        let text = entry.text().trim().to_string();
        let loc = if let Some(remote) = entry.remote() {
            TaggedLocation { text, remote }
        } else if in_office.as_deref() == Some(text.as_str()) {
            TaggedLocation { text, remote: false }
        } else if remote_location
            .as_ref()
            .is_some_and(|r| r.ends_with(text.as_str()))
        {
            remote_matched = true;
            TaggedLocation {
                text: remote_location.clone().unwrap_or(text),
                remote: true,
            }
        } else {
            TaggedLocation { text, remote: default_remote }
        };
        tagged.push(loc);
    }

    // The annotated remote country is a location in its own right; keep it
    // when no list entry was rewritten to it.
    if let Some(remote) = remote_location {
        if !remote_matched {
            tagged.push(TaggedLocation { text: remote, remote: true });
        }
    }

    tagged
}

/// Per-string rewrites, applied once before classification. Reapplying to
/// already-rewritten text is a no-op.
pub fn apply(raw: &str, remote: bool) -> String {
    let mut s = raw.trim().to_string();

    // The gazetteer stores "GB" for the United Kingdom, never "UK".
    if s.contains("UK") {
        s = s.replace("UK", "GB");
    }

    // US state codes are not modeled at country level; a bare 2-letter token
    // ahead of the trailing "USA" would misclassify as a foreign ISO2 code.
    if s.contains("USA") {
        s = drop_bare_state_codes(&s);
    }

    if !s.contains(',') {
        for (name, expanded) in CITY_STATES_AND_SAR {
            if s == name {
                return expanded.to_string();
            }
        }
        if remote {
            return format!("Remote, Remote, {s}");
        }
    }

    s
}

fn is_bare_code(token: &str) -> bool {
    regex::Regex::new(r"^[A-Z]{2}$")
        .map(|re| re.is_match(token))
        .unwrap_or(false)
}

/// Drop 2-letter uppercase tokens that precede another token, i.e. sit
/// immediately before a comma.
fn drop_bare_state_codes(s: &str) -> String {
    let tokens: Vec<&str> = s.split(", ").collect();
    let last = tokens.len().saturating_sub(1);
    tokens
        .iter()
        .enumerate()
        .filter(|(i, t)| *i == last || !is_bare_code(t.trim()))
        .map(|(_, t)| *t)
        .collect::<Vec<_>>()
        .join(", ")
}
