//! File-backed `Repository` implementation for the command-line runner.
//!
//! A build is a directory with `accounts.json`, `reps.json`,
//! `opportunities.json`, and `config.json`, each holding a single JSON array
//! (or object, for the config) — no pagination, since it all lives on disk
//! already. `fetch_*_page` therefore always returns the whole collection on
//! the first call and `None` as the next cursor.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use territory_core::config::LPConfiguration;
use territory_core::entities::{Account, Assignment, Opportunity, Rep};
use territory_data::{Page, Repository, RepositoryError, RepositoryResult};

pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, name: &str) -> RepositoryResult<T> {
        let path: PathBuf = self.root.join(name);
        let bytes = std::fs::read(&path)
            .map_err(|e| RepositoryError::Permanent(format!("reading {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RepositoryError::Permanent(format!("parsing {}: {e}", path.display())))
    }

    fn output_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn whole_page<T>(rows: Vec<T>) -> Page<T> {
    Page {
        rows,
        next_cursor: None,
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn fetch_accounts_page(
        &self,
        _build_id: &str,
        cursor: Option<&str>,
    ) -> RepositoryResult<Page<Account>> {
        if cursor.is_some() {
            return Ok(whole_page(Vec::new()));
        }
        Ok(whole_page(self.read_json::<Vec<Account>>("accounts.json")?))
    }

    async fn fetch_reps_page(
        &self,
        _build_id: &str,
        cursor: Option<&str>,
    ) -> RepositoryResult<Page<Rep>> {
        if cursor.is_some() {
            return Ok(whole_page(Vec::new()));
        }
        Ok(whole_page(self.read_json::<Vec<Rep>>("reps.json")?))
    }

    async fn fetch_opportunities_page(
        &self,
        _build_id: &str,
        cursor: Option<&str>,
    ) -> RepositoryResult<Page<Opportunity>> {
        if cursor.is_some() {
            return Ok(whole_page(Vec::new()));
        }
        Ok(whole_page(
            self.read_json::<Vec<Opportunity>>("opportunities.json")?,
        ))
    }

    async fn fetch_config(&self, _build_id: &str) -> RepositoryResult<LPConfiguration> {
        self.read_json("config.json")
    }

    async fn persist_assignments(
        &self,
        _build_id: &str,
        assignments: &[Assignment],
    ) -> RepositoryResult<()> {
        let json = serde_json::to_vec_pretty(assignments)
            .map_err(|e| RepositoryError::Permanent(format!("serializing assignments: {e}")))?;
        std::fs::write(self.output_path("assignments.json"), json)
            .map_err(|e| RepositoryError::Permanent(format!("writing assignments.json: {e}")))
    }

    async fn persist_telemetry(&self, row_json: &str) -> RepositoryResult<()> {
        use std::io::Write;
        let path: &Path = &self.output_path("telemetry.ndjson");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| RepositoryError::Permanent(format!("opening {}: {e}", path.display())))?;
        writeln!(file, "{row_json}")
            .map_err(|e| RepositoryError::Permanent(format!("appending to {}: {e}", path.display())))
    }
}
