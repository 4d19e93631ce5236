//! Job status and log stores for Kiln.
//!
//! Provides implementations of the [`JobStore`](kiln_core::store::JobStore)
//! and [`LogStore`](kiln_core::store::LogStore) contracts:
//! - In-memory stores for tests and single-process setups
//! - A filesystem log store
//! - A PostgreSQL job store

pub mod error;
pub mod fs;
pub mod memory;
pub mod postgres;

pub use error::{DbError, DbResult};
pub use fs::FsLogStore;
pub use memory::{MemoryJobStore, MemoryLogStore};
pub use postgres::{PgJobStore, create_pool, run_migrations};

use kiln_core::store::JobPage;
use kiln_core::{AnnotationFilter, JobStatus};

/// Filter and page jobs already ordered by name.
pub(crate) fn page_of<'a>(
    jobs: impl Iterator<Item = &'a JobStatus>,
    filters: &[AnnotationFilter],
    start: usize,
    limit: usize,
) -> JobPage {
    let matching: Vec<&JobStatus> = jobs
        .filter(|job| AnnotationFilter::all_match(filters, &job.annotations))
        .collect();
    let limit = if limit == 0 { usize::MAX } else { limit };

    JobPage {
        total: matching.len(),
        jobs: matching
            .into_iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect(),
    }
}
