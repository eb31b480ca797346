//! territory-data: repository contract and the concurrent data loader.

pub mod loader;
pub mod repository;

pub use loader::{account_size_tier, eligible_rep_ids, load_build, LoadedBuildData, SizeTier, MAX_CONCURRENT_REQUESTS};
pub use repository::{Page, Repository, RepositoryError, RepositoryResult};
