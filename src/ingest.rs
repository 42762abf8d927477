use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::audit::AuditSink;
use crate::db::Database;
use crate::models::LocationEntry;
use crate::resolve;

/// One scraped posting as delivered by an extraction adapter. Locations are
/// either bare strings or `{"text": ..., "remote": ...}` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct PostingPayload {
    pub company: String,
    pub job_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub locations: Vec<LocationEntry>,
}

pub fn load_payload(path: &Path) -> Result<Vec<PostingPayload>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse payload file: {}", path.display()))
}

#[derive(Debug, Default)]
pub struct IngestStats {
    pub postings_seen: usize,
    pub postings_added: usize,
    pub postings_skipped: usize,
    pub locations_attached: usize,
    pub locations_synthesized: usize,
    pub locations_unresolved: usize,
    pub errors: usize,
}

impl IngestStats {
    fn merge(&mut self, other: &IngestStats) {
        self.postings_seen += other.postings_seen;
        self.postings_added += other.postings_added;
        self.postings_skipped += other.postings_skipped;
        self.locations_attached += other.locations_attached;
        self.locations_synthesized += other.locations_synthesized;
        self.locations_unresolved += other.locations_unresolved;
        self.errors += other.errors;
    }
}

/// Write one posting: existence check, location resolution, job row,
/// idempotent associations. The caller is expected to invoke this at most
/// once per distinct posting per run; the association writes stay safe if a
/// retry slips through anyway.
pub fn process_posting<A>(db: &Database, audit: &A, posting: &PostingPayload) -> Result<IngestStats>
where
    A: AuditSink + ?Sized,
{
    let mut stats = IngestStats { postings_seen: 1, ..Default::default() };

    if db.job_exists(&posting.company, &posting.job_id)? {
        stats.postings_skipped = 1;
        return Ok(stats);
    }

    let resolution = resolve::resolve_posting(db, audit, &posting.locations)?;

    let company_id = db.get_or_create_company(&posting.company)?;
    let fallback = if resolution.unresolved.is_empty() {
        None
    } else {
        Some(resolution.unresolved.join("; "))
    };
    let job_row = db.insert_job(
        company_id,
        &posting.job_id,
        posting.title.as_deref(),
        posting.url.as_deref(),
        fallback.as_deref(),
    )?;
    for attached in &resolution.locations {
        db.attach_location(job_row, attached.location.id, attached.remote)?;
    }

    stats.postings_added = 1;
    stats.locations_attached = resolution.locations.len();
    stats.locations_synthesized = resolution.synthesized;
    stats.locations_unresolved = resolution.unresolved.len();
    Ok(stats)
}

/// Run the pipeline over a batch of postings with a fixed worker pool. Each
/// posting is one unit of work; each worker opens its own connection against
/// the shared database file. Per-posting failures are counted and reported,
/// never fatal to the batch.
pub fn run<A>(
    db_path: &Path,
    payloads: &[PostingPayload],
    workers: usize,
    audit: &A,
    dry_run: bool,
) -> Result<IngestStats>
where
    A: AuditSink + Sync + ?Sized,
{
    if dry_run {
        let db = Database::open_at(db_path)?;
        let mut stats = IngestStats::default();
        for posting in payloads {
            stats.postings_seen += 1;
            if db.job_exists(&posting.company, &posting.job_id)? {
                stats.postings_skipped += 1;
            } else {
                println!("  would add {} / {}", posting.company, posting.job_id);
                stats.postings_added += 1;
            }
        }
        return Ok(stats);
    }

    let next = AtomicUsize::new(0);
    let workers = workers.clamp(1, payloads.len().max(1));

    let worker_stats = std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..workers {
            handles.push(scope.spawn(|| -> Result<IngestStats> {
                let db = Database::open_at(db_path)?;
                let mut local = IngestStats::default();
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(posting) = payloads.get(index) else {
                        break;
                    };
                    match process_posting(&db, audit, posting) {
                        Ok(stats) => local.merge(&stats),
                        Err(e) => {
                            // Store trouble is fatal for this posting only.
                            eprintln!(
                                "  {} / {}: {e:#}",
                                posting.company, posting.job_id
                            );
                            local.postings_seen += 1;
                            local.errors += 1;
                        }
                    }
                }
                Ok(local)
            }));
        }

        let mut collected = Vec::new();
        for handle in handles {
            collected.push(handle.join().map_err(|_| anyhow!("ingest worker panicked")));
        }
        collected
    });

    let mut total = IngestStats::default();
    for result in worker_stats {
        total.merge(&result??);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::memory::MemoryAuditSink;
    use crate::gazetteer::GazetteerStore;
    use crate::models::NewLocation;

    fn seeded_db(dir: &Path) -> Database {
        let db = Database::open_at(&dir.join("test.db")).unwrap();
        db.init().unwrap();
        for (city, country, iso2, iso3, state) in [
            ("Berlin", "Germany", "DE", "DEU", "Berlin"),
            ("London", "United Kingdom", "GB", "GBR", "England"),
            ("Austin", "United States", "US", "USA", "Texas"),
        ] {
            db.insert(&NewLocation {
                city: city.to_string(),
                country: country.to_string(),
                country_code_iso2: iso2.to_string(),
                country_code_iso3: iso3.to_string(),
                state: state.to_string(),
                state_code: None,
            })
            .unwrap();
        }
        db
    }

    fn payload(company: &str, job_id: &str, locations: &[&str]) -> PostingPayload {
        PostingPayload {
            company: company.to_string(),
            job_id: job_id.to_string(),
            title: Some("Engineer".to_string()),
            url: None,
            locations: locations
                .iter()
                .map(|l| LocationEntry::Plain(l.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_payload_accepts_plain_and_tagged_locations() {
        let parsed: Vec<PostingPayload> = serde_json::from_str(
            r#"[{
                "company": "Acme",
                "job_id": "42",
                "locations": ["London, UK", {"text": "Germany", "remote": true}]
            }]"#,
        )
        .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].locations.len(), 2);
        assert_eq!(parsed[0].locations[1].remote(), Some(true));
    }

    #[test]
    fn test_process_posting_writes_job_and_associations() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let audit = MemoryAuditSink::new();

        let stats = process_posting(
            &db,
            &audit,
            &payload("Acme", "42", &["London, UK", "Atlantis, Narnia"]),
        )
        .unwrap();
        assert_eq!(stats.postings_added, 1);
        assert_eq!(stats.locations_attached, 1);
        assert_eq!(stats.locations_unresolved, 1);

        let jobs = db.list_jobs(None).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].location_fallback.as_deref(), Some("Atlantis, Narnia"));

        let locations = db.job_locations(jobs[0].id).unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].location.city, "London");
        assert_eq!(audit.unknown_lines().len(), 1);
    }

    #[test]
    fn test_retry_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let audit = MemoryAuditSink::new();
        let posting = payload("Acme", "42", &["London, UK"]);

        assert_eq!(process_posting(&db, &audit, &posting).unwrap().postings_added, 1);
        assert_eq!(process_posting(&db, &audit, &posting).unwrap().postings_skipped, 1);

        let jobs = db.list_jobs(None).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(db.job_locations(jobs[0].id).unwrap().len(), 1);
    }

    #[test]
    fn test_run_processes_batch_across_workers() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let audit = MemoryAuditSink::new();

        let payloads = vec![
            payload("Acme", "1", &["London, UK"]),
            payload("Acme", "2", &["Berlin, Germany"]),
            payload("Globex", "1", &["Speyer, Germany", "Austin"]),
            payload("Globex", "2", &[]),
        ];

        let stats = run(db.path(), &payloads, 3, &audit, false).unwrap();
        assert_eq!(stats.postings_seen, 4);
        assert_eq!(stats.postings_added, 4);
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.locations_synthesized, 1);
        assert_eq!(db.list_jobs(None).unwrap().len(), 4);

        // A second run over the same batch skips everything.
        let again = run(db.path(), &payloads, 3, &audit, false).unwrap();
        assert_eq!(again.postings_added, 0);
        assert_eq!(again.postings_skipped, 4);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = seeded_db(dir.path());
        let audit = MemoryAuditSink::new();

        let payloads = vec![payload("Acme", "1", &["London, UK"])];
        let stats = run(db.path(), &payloads, 2, &audit, true).unwrap();
        assert_eq!(stats.postings_added, 1);
        assert!(db.list_jobs(None).unwrap().is_empty());
    }
}
