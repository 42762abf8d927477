use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::CanonicalLocation;

/// Append-only record of synthesized and unresolved locations, kept for
/// offline curation of the gazetteer. Injected into the resolver so
/// deployments choose the backing storage.
pub trait AuditSink {
    /// One line per synthesized canonical record: raw input + the fields the
    /// synthesizer produced.
    fn record_new_location(&self, raw: &str, loc: &CanonicalLocation) -> Result<()>;

    /// One line per total resolution failure: raw input only.
    fn record_unknown_location(&self, raw: &str) -> Result<()>;
}

/// File-backed sink appending human-readable lines to two text files,
/// `new_locations.txt` and `unknown_locations.txt`.
pub struct FileAuditSink {
    new_path: PathBuf,
    unknown_path: PathBuf,
}

impl FileAuditSink {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            new_path: dir.join("new_locations.txt"),
            unknown_path: dir.join("unknown_locations.txt"),
        }
    }

    fn append_line(path: &Path, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit file: {}", path.display()))?;
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(file, "{stamp} {line}")
            .with_context(|| format!("Failed to append to audit file: {}", path.display()))?;
        Ok(())
    }
}

impl Default for FileAuditSink {
    fn default() -> Self {
        Self::in_dir(Path::new("."))
    }
}

impl AuditSink for FileAuditSink {
    fn record_new_location(&self, raw: &str, loc: &CanonicalLocation) -> Result<()> {
        Self::append_line(
            &self.new_path,
            &format!(
                "added {}, {}, {} ({}/{}) from \"{}\"",
                loc.city, loc.state, loc.country, loc.country_code_iso2, loc.country_code_iso3, raw
            ),
        )
    }

    fn record_unknown_location(&self, raw: &str) -> Result<()> {
        Self::append_line(&self.unknown_path, &format!("unable to resolve \"{raw}\""))
    }
}

#[cfg(test)]
pub mod memory {
    use std::sync::Mutex;

    use super::*;

    /// Test sink capturing both streams in memory.
    #[derive(Default)]
    pub struct MemoryAuditSink {
        new_lines: Mutex<Vec<String>>,
        unknown_lines: Mutex<Vec<String>>,
    }

    impl MemoryAuditSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn new_lines(&self) -> Vec<String> {
            self.new_lines.lock().unwrap().clone()
        }

        pub fn unknown_lines(&self) -> Vec<String> {
            self.unknown_lines.lock().unwrap().clone()
        }
    }

    impl AuditSink for MemoryAuditSink {
        fn record_new_location(&self, raw: &str, loc: &CanonicalLocation) -> Result<()> {
            self.new_lines
                .lock()
                .unwrap()
                .push(format!("{raw} -> {}, {}, {}", loc.city, loc.state, loc.country));
            Ok(())
        }

        fn record_unknown_location(&self, raw: &str) -> Result<()> {
            self.unknown_lines.lock().unwrap().push(raw.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> CanonicalLocation {
        CanonicalLocation {
            id: 1,
            city: "Speyer".into(),
            country: "Germany".into(),
            country_code_iso2: "DE".into(),
            country_code_iso3: "DEU".into(),
            state: "Berlin".into(),
            state_code: None,
        }
    }

    #[test]
    fn test_file_sink_appends_to_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::in_dir(dir.path());

        sink.record_new_location("Speyer, Germany", &location()).unwrap();
        sink.record_new_location("Speyer, Germany", &location()).unwrap();
        sink.record_unknown_location("Atlantis, Narnia").unwrap();

        let new = std::fs::read_to_string(dir.path().join("new_locations.txt")).unwrap();
        assert_eq!(new.lines().count(), 2);
        assert!(new.contains("Speyer, Berlin, Germany (DE/DEU)"));
        assert!(new.contains("from \"Speyer, Germany\""));

        let unknown = std::fs::read_to_string(dir.path().join("unknown_locations.txt")).unwrap();
        assert_eq!(unknown.lines().count(), 1);
        assert!(unknown.contains("unable to resolve \"Atlantis, Narnia\""));
    }
}
