use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;

use crate::gazetteer::GazetteerStore;
use crate::models::{CanonicalLocation, JobLocation, JobRecord, NewLocation, Slots};
use crate::normalize;

const LOCATION_COLUMNS: &str =
    "id, city, country, country_code_iso2, country_code_iso3, state, state_code";

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        Self::open_at(&Self::default_path()?)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // Ingest workers share the file; WAL plus a generous busy timeout
        // lets concurrent writers queue instead of erroring.
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.busy_timeout(Duration::from_secs(30))?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: PathBuf::from(":memory:") })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobatlas") {
            Ok(proj_dirs.data_dir().join("jobatlas.db"))
        } else {
            Ok(PathBuf::from("jobatlas.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                city TEXT NOT NULL,
                country TEXT NOT NULL,
                country_code_iso2 TEXT NOT NULL,
                country_code_iso3 TEXT NOT NULL,
                state TEXT NOT NULL,
                state_code TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (city, country, state)
            );

            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                job_id TEXT NOT NULL,
                title TEXT,
                url TEXT,
                location_fallback TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (company_id, job_id)
            );

            CREATE TABLE IF NOT EXISTS job_locations (
                job_id INTEGER NOT NULL REFERENCES jobs(id),
                location_id INTEGER NOT NULL REFERENCES locations(id),
                remote INTEGER NOT NULL DEFAULT 0,
                UNIQUE (job_id, location_id)
            );

            CREATE INDEX IF NOT EXISTS idx_locations_city ON locations(city);
            CREATE INDEX IF NOT EXISTS idx_locations_country ON locations(country);
            CREATE INDEX IF NOT EXISTS idx_locations_state ON locations(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='locations'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobatlas init' first."));
        }
        Ok(())
    }

    // --- Company operations ---

    pub fn get_or_create_company(&self, name: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM companies WHERE name = ?1", [name], |row| row.get(0))
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn
            .execute("INSERT INTO companies (name) VALUES (?1)", [name])?;
        Ok(self.conn.last_insert_rowid())
    }

    // --- Job operations ---

    pub fn job_exists(&self, company: &str, job_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT j.id FROM jobs j
                 JOIN companies c ON j.company_id = c.id
                 WHERE c.name = ?1 AND j.job_id = ?2",
                params![company, job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_job(
        &self,
        company_id: i64,
        job_id: &str,
        title: Option<&str>,
        url: Option<&str>,
        location_fallback: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO jobs (company_id, job_id, title, url, location_fallback)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![company_id, job_id, title, url, location_fallback],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Idempotent: re-adding an existing (job, location) pair is a no-op, so
    /// upstream retries never produce duplicate association rows.
    pub fn attach_location(&self, job_row: i64, location_id: i64, remote: bool) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO job_locations (job_id, location_id, remote)
             VALUES (?1, ?2, ?3)",
            params![job_row, location_id, remote],
        )?;
        Ok(())
    }

    pub fn list_jobs(&self, company: Option<&str>) -> Result<Vec<JobRecord>> {
        let mut sql = String::from(
            "SELECT j.id, c.name, j.job_id, j.title, j.url, j.location_fallback, j.created_at
             FROM jobs j
             JOIN companies c ON j.company_id = c.id",
        );
        if company.is_some() {
            sql.push_str(" WHERE c.name = ?1");
        }
        sql.push_str(" ORDER BY j.id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(name) = company {
            stmt.query_map([name], Self::row_to_job)?
        } else {
            stmt.query_map([], Self::row_to_job)?
        };

        rows.collect::<Result<Vec<_>, _>>().context("Failed to list jobs")
    }

    pub fn get_job(&self, id: i64) -> Result<Option<JobRecord>> {
        self.conn
            .query_row(
                "SELECT j.id, c.name, j.job_id, j.title, j.url, j.location_fallback, j.created_at
                 FROM jobs j
                 JOIN companies c ON j.company_id = c.id
                 WHERE j.id = ?1",
                [id],
                Self::row_to_job,
            )
            .optional()
            .context("Failed to load job")
    }

    pub fn job_locations(&self, job_row: i64) -> Result<Vec<JobLocation>> {
        let mut stmt = self.conn.prepare(
            "SELECT l.id, l.city, l.country, l.country_code_iso2, l.country_code_iso3,
                    l.state, l.state_code, jl.remote
             FROM job_locations jl
             JOIN locations l ON jl.location_id = l.id
             WHERE jl.job_id = ?1
             ORDER BY l.id",
        )?;
        let rows = stmt.query_map([job_row], |row| {
            Ok(JobLocation { location: Self::row_to_location(row)?, remote: row.get(7)? })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load job locations")
    }

    // --- Gazetteer queries ---

    pub fn location_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?)
    }

    pub fn search_locations(&self, query: &str, limit: usize) -> Result<Vec<CanonicalLocation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LOCATION_COLUMNS} FROM locations
             WHERE city LIKE ?1 OR country LIKE ?1 OR state LIKE ?1
             ORDER BY id LIMIT ?2"
        ))?;
        let pattern = format!("{query}%");
        let rows = stmt.query_map(params![pattern, limit as i64], Self::row_to_location)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to search locations")
    }

    fn find_location_by(&self, field: &str, value: &str) -> Result<Option<CanonicalLocation>> {
        let sql =
            format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE {field} = ?1 ORDER BY id LIMIT 1");
        self.conn
            .query_row(&sql, [value], Self::row_to_location)
            .optional()
            .with_context(|| format!("Gazetteer lookup by {field} failed"))
    }

    fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<CanonicalLocation> {
        Ok(CanonicalLocation {
            id: row.get(0)?,
            city: row.get(1)?,
            country: row.get(2)?,
            country_code_iso2: row.get(3)?,
            country_code_iso3: row.get(4)?,
            state: row.get(5)?,
            state_code: row.get(6)?,
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        Ok(JobRecord {
            id: row.get(0)?,
            company: row.get(1)?,
            job_id: row.get(2)?,
            title: row.get(3)?,
            url: row.get(4)?,
            location_fallback: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    // --- Seed loading ---

    pub fn seed_from_csv(&self, path: &Path) -> Result<SeedStats> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open seed file: {}", path.display()))?;

        let tx = self.conn.unchecked_transaction()?;
        let mut stats = SeedStats::default();

        for record in reader.deserialize::<SeedRow>() {
            let row = match record {
                Ok(row) => row,
                Err(e) => {
                    eprintln!("  skipping malformed seed row: {e}");
                    stats.failed += 1;
                    continue;
                }
            };
            let city = normalize::normalize_token(&row.city);
            let country = normalize::normalize_token(&row.country);
            if city.is_empty() || country.is_empty() {
                stats.failed += 1;
                continue;
            }
            let changed = tx.execute(
                "INSERT INTO locations (city, country, country_code_iso2, country_code_iso3, state)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (city, country, state) DO NOTHING",
                params![
                    city,
                    country,
                    normalize::normalize_token(&row.iso2),
                    normalize::normalize_token(&row.iso3),
                    normalize::normalize_token(&row.state),
                ],
            )?;
            if changed == 0 {
                stats.duplicates += 1;
            } else {
                stats.inserted += 1;
            }
        }

        tx.commit()?;
        Ok(stats)
    }
}

/// One row of the gazetteer seed feed, keyed by the worldcities dataset
/// headers. Extra columns in the feed are ignored.
#[derive(Debug, Deserialize)]
struct SeedRow {
    #[serde(rename = "city_ascii")]
    city: String,
    country: String,
    iso2: String,
    iso3: String,
    #[serde(rename = "admin_name")]
    state: String,
}

#[derive(Debug, Default)]
pub struct SeedStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl GazetteerStore for Database {
    fn find_by_city(&self, city: &str) -> Result<Option<CanonicalLocation>> {
        self.find_location_by("city", city)
    }

    fn find_by_state(&self, state: &str) -> Result<Option<CanonicalLocation>> {
        self.find_location_by("state", state)
    }

    fn find_by_country(&self, country: &str) -> Result<Option<CanonicalLocation>> {
        self.find_location_by("country", country)
    }

    fn find_by_iso2(&self, code: &str) -> Result<Option<CanonicalLocation>> {
        self.find_location_by("country_code_iso2", code)
    }

    fn find_by_iso3(&self, code: &str) -> Result<Option<CanonicalLocation>> {
        self.find_location_by("country_code_iso3", code)
    }

    fn find_by_state_code(&self, code: &str) -> Result<Option<CanonicalLocation>> {
        self.find_location_by("state_code", code)
    }

    fn find_exact(
        &self,
        city: &str,
        country: &str,
        state: &str,
    ) -> Result<Option<CanonicalLocation>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {LOCATION_COLUMNS} FROM locations
                     WHERE city = ?1 AND country = ?2 AND state = ?3"
                ),
                params![city, country, state],
                Self::row_to_location,
            )
            .optional()
            .context("Gazetteer exact lookup failed")
    }

    fn find_city_country(&self, city: &str, country: &str) -> Result<Option<CanonicalLocation>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {LOCATION_COLUMNS} FROM locations
                     WHERE city = ?1 AND country = ?2 ORDER BY id LIMIT 1"
                ),
                params![city, country],
                Self::row_to_location,
            )
            .optional()
            .context("Gazetteer city+country lookup failed")
    }

    fn find_city_state(&self, city: &str, state: &str) -> Result<Option<CanonicalLocation>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {LOCATION_COLUMNS} FROM locations
                     WHERE city = ?1 AND state = ?2 ORDER BY id LIMIT 1"
                ),
                params![city, state],
                Self::row_to_location,
            )
            .optional()
            .context("Gazetteer city+state lookup failed")
    }

    /// OR across whichever slots are filled, built with plain conditional
    /// branching; first row in id order wins.
    fn find_any(&self, slots: &Slots) -> Result<Option<CanonicalLocation>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<&str> = Vec::new();

        if let Some(city) = &slots.city {
            clauses.push(format!("city = ?{}", values.len() + 1));
            values.push(city);
        }
        if let Some(state) = &slots.state {
            clauses.push(format!("state = ?{}", values.len() + 1));
            values.push(state);
        }
        if let Some(country) = &slots.country {
            clauses.push(format!("country = ?{}", values.len() + 1));
            values.push(country);
        }
        if clauses.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT {LOCATION_COLUMNS} FROM locations WHERE {} ORDER BY id LIMIT 1",
            clauses.join(" OR ")
        );
        self.conn
            .query_row(&sql, rusqlite::params_from_iter(values), Self::row_to_location)
            .optional()
            .context("Gazetteer loose lookup failed")
    }

    /// Conflict-safe append: the uniqueness invariant is re-checked by the
    /// UNIQUE constraint at insert time, and a losing writer re-reads the
    /// winner's row.
    fn insert(&self, new: &NewLocation) -> Result<CanonicalLocation> {
        self.conn.execute(
            "INSERT INTO locations (city, country, country_code_iso2, country_code_iso3, state, state_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (city, country, state) DO NOTHING",
            params![
                new.city,
                new.country,
                new.country_code_iso2,
                new.country_code_iso3,
                new.state,
                new.state_code
            ],
        )?;
        self.find_exact(&new.city, &new.country, &new.state)?.ok_or_else(|| {
            anyhow!("location row missing after insert: {}, {}, {}", new.city, new.country, new.state)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn new_location(city: &str, country: &str, state: &str) -> NewLocation {
        NewLocation {
            city: city.to_string(),
            country: country.to_string(),
            country_code_iso2: "XX".to_string(),
            country_code_iso3: "XXX".to_string(),
            state: state.to_string(),
            state_code: None,
        }
    }

    #[test]
    fn test_insert_is_conflict_safe() {
        let db = db();
        let first = db.insert(&new_location("Berlin", "Germany", "Berlin")).unwrap();
        let second = db.insert(&new_location("Berlin", "Germany", "Berlin")).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(db.location_count().unwrap(), 1);
    }

    #[test]
    fn test_unique_triple_allows_same_city_elsewhere() {
        let db = db();
        db.insert(&new_location("Springfield", "United States", "Illinois")).unwrap();
        db.insert(&new_location("Springfield", "United States", "Missouri")).unwrap();
        assert_eq!(db.location_count().unwrap(), 2);
    }

    #[test]
    fn test_lookups_return_first_row_by_id() {
        let db = db();
        let berlin = db.insert(&new_location("Berlin", "Germany", "Berlin")).unwrap();
        db.insert(&new_location("Munich", "Germany", "Bavaria")).unwrap();

        let hit = db.find_by_country("Germany").unwrap().unwrap();
        assert_eq!(hit.id, berlin.id);

        let any = db
            .find_any(&Slots { country: Some("Germany".into()), ..Default::default() })
            .unwrap()
            .unwrap();
        assert_eq!(any.id, berlin.id);
    }

    #[test]
    fn test_find_any_matches_on_any_filled_slot() {
        let db = db();
        db.insert(&new_location("Berlin", "Germany", "Berlin")).unwrap();
        let slots = Slots {
            city: Some("Nowhere".into()),
            state: None,
            country: Some("Germany".into()),
        };
        assert!(db.find_any(&slots).unwrap().is_some());
        assert!(db.find_any(&Slots::default()).unwrap().is_none());
    }

    #[test]
    fn test_attach_location_is_idempotent() {
        let db = db();
        let loc = db.insert(&new_location("Berlin", "Germany", "Berlin")).unwrap();
        let company = db.get_or_create_company("Acme").unwrap();
        let job = db.insert_job(company, "j-1", Some("Engineer"), None, None).unwrap();

        db.attach_location(job, loc.id, true).unwrap();
        db.attach_location(job, loc.id, true).unwrap();

        let attached = db.job_locations(job).unwrap();
        assert_eq!(attached.len(), 1);
        assert!(attached[0].remote);
    }

    #[test]
    fn test_job_exists_and_company_reuse() {
        let db = db();
        assert!(!db.job_exists("Acme", "j-1").unwrap());

        let company = db.get_or_create_company("Acme").unwrap();
        assert_eq!(db.get_or_create_company("Acme").unwrap(), company);

        db.insert_job(company, "j-1", None, None, None).unwrap();
        assert!(db.job_exists("Acme", "j-1").unwrap());
        assert!(!db.job_exists("Acme", "j-2").unwrap());
        assert!(!db.job_exists("Other", "j-1").unwrap());
    }

    #[test]
    fn test_seed_from_csv_normalizes_and_deduplicates() {
        let db = db();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "city,city_ascii,country,iso2,iso3,admin_name").unwrap();
        writeln!(file, "São Paulo,Sao Paulo,Brazil,BR,BRA,São Paulo").unwrap();
        writeln!(file, "Berlin,Berlin,Germany,DE,DEU,Berlin").unwrap();
        writeln!(file, "Berlin,Berlin,Germany,DE,DEU,Berlin").unwrap();
        writeln!(file, ",,Nowhere,XX,XXX,").unwrap();

        let stats = db.seed_from_csv(file.path()).unwrap();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.failed, 1);

        let sao = db.find_by_city("Sao Paulo").unwrap().unwrap();
        assert_eq!(sao.state, "Sao Paulo");
        assert_eq!(db.location_count().unwrap(), 2);
    }

    #[test]
    fn test_list_jobs_filters_by_company() {
        let db = db();
        let acme = db.get_or_create_company("Acme").unwrap();
        let globex = db.get_or_create_company("Globex").unwrap();
        db.insert_job(acme, "a-1", Some("Engineer"), None, None).unwrap();
        db.insert_job(globex, "g-1", Some("Analyst"), None, Some("Atlantis")).unwrap();

        assert_eq!(db.list_jobs(None).unwrap().len(), 2);
        let filtered = db.list_jobs(Some("Globex")).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].location_fallback.as_deref(), Some("Atlantis"));
    }
}
