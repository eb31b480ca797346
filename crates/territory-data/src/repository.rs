//! Repository contract (§6.2, component C9).
//!
//! The underlying store is abstract and pageable; the loader only ever talks
//! to this trait, never to a concrete database or HTTP client. Implementors
//! own cursor semantics, retries at the transport layer are out of scope here
//! (the loader applies its own retry policy around calls to this trait, see
//! [`crate::loader`]).

use async_trait::async_trait;
use territory_core::config::LPConfiguration;
use territory_core::entities::{Account, Opportunity, Rep};

/// One page of rows plus an opaque cursor for the next page, or `None` when
/// exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Transient failure, distinguished from a permanent one so the loader knows
/// whether to retry (§5: "transient" = network error or server-side timeout
/// code).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("transient repository error: {0}")]
    Transient(String),
    #[error("permanent repository error: {0}")]
    Permanent(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Transient(_))
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// External data store contract consumed by the loader and orchestrator.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn fetch_accounts_page(
        &self,
        build_id: &str,
        cursor: Option<&str>,
    ) -> RepositoryResult<Page<Account>>;

    async fn fetch_reps_page(
        &self,
        build_id: &str,
        cursor: Option<&str>,
    ) -> RepositoryResult<Page<Rep>>;

    async fn fetch_opportunities_page(
        &self,
        build_id: &str,
        cursor: Option<&str>,
    ) -> RepositoryResult<Page<Opportunity>>;

    async fn fetch_config(&self, build_id: &str) -> RepositoryResult<LPConfiguration>;

    /// Batched persistence of final assignments. The engine does not retain
    /// assignments after this call (§3.4).
    async fn persist_assignments(
        &self,
        build_id: &str,
        assignments: &[territory_core::entities::Assignment],
    ) -> RepositoryResult<()>;

    /// Fire-and-forget telemetry write; failures here never abort a run
    /// (§4.8, §7).
    async fn persist_telemetry(&self, row_json: &str) -> RepositoryResult<()>;
}
