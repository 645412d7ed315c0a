use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use thiserror::Error;

use crate::search::{IndexAdmin, SearchError};
use crate::source::{Collection, SourceError, SourceStore};

#[derive(Debug, Error)]
pub enum IndexerError {
	#[error("failed reading source rows: {0}")]
	Source(#[from] SourceError),
	#[error("failed writing to search index: {0}")]
	Search(#[from] SearchError),
}

/// Outcome of one successful resync; feeds logs and metrics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResyncStats {
	pub documents: u64,
	pub batches: u32,
}

/// Rebuilds one collection's index from the source of truth. Idempotent and
/// safe to invoke repeatedly. Implemented by `HttpIndexer` and any test
/// doubles.
#[async_trait]
pub trait Indexer: Send + Sync + 'static {
	async fn resync(&self, collection: &Collection) -> Result<ResyncStats, IndexerError>;
}

/// Field every source row carries and the index uses as its primary key.
const PRIMARY_KEY: &str = "id";

/// Full resync over the search service's HTTP API: ensure the index exists,
/// clear its documents, then stream source pages into the documents endpoint
/// in batches. Batches are sequential; the first error aborts the resync.
pub struct HttpIndexer {
	source: Arc<dyn SourceStore>,
	search: Arc<dyn IndexAdmin>,
	batch_size: u32,
}

impl HttpIndexer {
	pub fn new(source: Arc<dyn SourceStore>, search: Arc<dyn IndexAdmin>, batch_size: u32) -> Self {
		Self {
			source,
			search,
			// A zero batch size would loop forever on a non-empty table.
			batch_size: batch_size.max(1),
		}
	}
}

#[async_trait]
impl Indexer for HttpIndexer {
	async fn resync(&self, collection: &Collection) -> Result<ResyncStats, IndexerError> {
		debug!("resync of '{}' starting", collection);

		self.search.ensure_index(collection, PRIMARY_KEY).await?;
		self.search.clear_documents(collection).await?;

		let mut stats = ResyncStats::default();
		let mut offset = 0u64;
		loop {
			let page = self
				.source
				.fetch_page(collection, offset, self.batch_size)
				.await?;
			if page.is_empty() {
				break;
			}

			self.search.add_documents(collection, &page).await?;

			let read = page.len() as u64;
			stats.documents += read;
			stats.batches += 1;
			offset += read;

			// A short page means the table is exhausted; skip the extra
			// round-trip for the empty tail.
			if read < self.batch_size as u64 {
				break;
			}
		}

		info!(
			"resync of '{}' complete: {} documents in {} batches",
			collection, stats.documents, stats.batches
		);
		Ok(stats)
	}
}
