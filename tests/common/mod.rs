/// Common test doubles and helpers for reconciler tests.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use forseti::indexer::{Indexer, IndexerError, ResyncStats};
use forseti::observability::MetricsRegistry;
use forseti::reconcile::Reconciler;
use forseti::search::{IndexHealth, IndexStats, SearchError, SearchIndex};
use forseti::source::{Collection, SourceError, SourceStore};

/// Source double with fixed per-collection counts; records which
/// collections were counted.
pub struct MockSource {
	counts: HashMap<String, u64>,
	fail: bool,
	pub count_calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockSource {
	pub fn new(counts: &[(&str, u64)]) -> Arc<Self> {
		Arc::new(Self {
			counts: counts
				.iter()
				.map(|(name, n)| (name.to_string(), *n))
				.collect(),
			fail: false,
			count_calls: Mutex::new(Vec::new()),
		})
	}

	pub fn failing() -> Arc<Self> {
		Arc::new(Self {
			counts: HashMap::new(),
			fail: true,
			count_calls: Mutex::new(Vec::new()),
		})
	}
}

#[async_trait]
impl SourceStore for MockSource {
	async fn ping(&self) -> Result<(), SourceError> {
		if self.fail {
			return Err(SourceError::Database(sqlx::Error::PoolTimedOut));
		}
		Ok(())
	}

	async fn count(&self, collection: &Collection) -> Result<u64, SourceError> {
		self.count_calls
			.lock()
			.unwrap()
			.push(collection.as_str().to_string());
		if self.fail {
			return Err(SourceError::Database(sqlx::Error::PoolTimedOut));
		}
		Ok(self.counts.get(collection.as_str()).copied().unwrap_or(0))
	}

	async fn fetch_page(
		&self,
		_collection: &Collection,
		_offset: u64,
		_limit: u32,
	) -> Result<Vec<Value>, SourceError> {
		Ok(Vec::new())
	}
}

/// Search service double. `None` for a collection means the index does not
/// exist; absent collections report zero documents.
pub struct MockIndex {
	health: Result<IndexHealth, ()>,
	stats: HashMap<String, Option<u64>>,
	fail_stats: bool,
	pub stats_calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockIndex {
	pub fn available(stats: &[(&str, Option<u64>)]) -> Arc<Self> {
		Arc::new(Self {
			health: Ok(IndexHealth::Available),
			stats: stats
				.iter()
				.map(|(name, n)| (name.to_string(), *n))
				.collect(),
			fail_stats: false,
			stats_calls: Mutex::new(Vec::new()),
		})
	}

	pub fn unavailable(status: &str) -> Arc<Self> {
		Arc::new(Self {
			health: Ok(IndexHealth::Unavailable(status.to_string())),
			stats: HashMap::new(),
			fail_stats: false,
			stats_calls: Mutex::new(Vec::new()),
		})
	}

	pub fn health_error() -> Arc<Self> {
		Arc::new(Self {
			health: Err(()),
			stats: HashMap::new(),
			fail_stats: false,
			stats_calls: Mutex::new(Vec::new()),
		})
	}

	pub fn stats_error() -> Arc<Self> {
		Arc::new(Self {
			health: Ok(IndexHealth::Available),
			stats: HashMap::new(),
			fail_stats: true,
			stats_calls: Mutex::new(Vec::new()),
		})
	}
}

#[async_trait]
impl SearchIndex for MockIndex {
	async fn health(&self) -> Result<IndexHealth, SearchError> {
		match &self.health {
			Ok(health) => Ok(health.clone()),
			Err(()) => Err(SearchError::Api {
				code: "internal".to_string(),
				message: "health probe exploded".to_string(),
			}),
		}
	}

	async fn stats(&self, collection: &Collection) -> Result<IndexStats, SearchError> {
		self.stats_calls
			.lock()
			.unwrap()
			.push(collection.as_str().to_string());
		if self.fail_stats {
			return Err(SearchError::Api {
				code: "internal".to_string(),
				message: "stats exploded".to_string(),
			});
		}
		match self.stats.get(collection.as_str()).copied().flatten() {
			Some(n) => Ok(IndexStats {
				number_of_documents: n,
				is_indexing: false,
			}),
			None if self.stats.get(collection.as_str()).is_some() => {
				Err(SearchError::IndexNotFound)
			}
			None => Ok(IndexStats {
				number_of_documents: 0,
				is_indexing: false,
			}),
		}
	}
}

/// Indexer double recording resync calls; collections listed in `fail`
/// error instead. Optionally sleeps to simulate a slow rebuild.
#[derive(Default)]
pub struct MockIndexer {
	pub calls: Mutex<Vec<String>>,
	fail: HashSet<String>,
	delay_ms: u64,
}

#[allow(dead_code)]
impl MockIndexer {
	pub fn arc() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn failing_on(names: &[&str]) -> Arc<Self> {
		Arc::new(Self {
			fail: names.iter().map(|n| n.to_string()).collect(),
			..Self::default()
		})
	}

	pub fn slow(delay_ms: u64) -> Arc<Self> {
		Arc::new(Self {
			delay_ms,
			..Self::default()
		})
	}
}

#[async_trait]
impl Indexer for MockIndexer {
	async fn resync(&self, collection: &Collection) -> Result<ResyncStats, IndexerError> {
		if self.delay_ms > 0 {
			sleep(Duration::from_millis(self.delay_ms)).await;
		}
		self.calls
			.lock()
			.unwrap()
			.push(collection.as_str().to_string());
		if self.fail.contains(collection.as_str()) {
			return Err(IndexerError::Search(SearchError::Api {
				code: "internal".to_string(),
				message: "resync exploded".to_string(),
			}));
		}
		Ok(ResyncStats {
			documents: 1,
			batches: 1,
		})
	}
}

#[allow(dead_code)]
pub fn collections(names: &[&str]) -> Vec<Collection> {
	names
		.iter()
		.map(|name| Collection::new(name).expect("valid collection name"))
		.collect()
}

/// A reconciler wired with mocks and a fresh metrics registry.
#[allow(dead_code)]
pub fn reconciler(
	collections: Vec<Collection>,
	source: Arc<MockSource>,
	index: Arc<MockIndex>,
	indexer: Arc<MockIndexer>,
	rebuild_delay_ms: u64,
) -> Reconciler {
	Reconciler::new(
		collections,
		source,
		index,
		indexer,
		Arc::new(MetricsRegistry::new()),
		Duration::from_millis(rebuild_delay_ms),
	)
}

/// Check if Docker integration tests are enabled via environment variable.
/// Returns true if RUN_DOCKER_INTEGRATION_TESTS is set.
#[allow(dead_code)]
pub fn is_docker_test_enabled() -> bool {
	std::env::var("RUN_DOCKER_INTEGRATION_TESTS").is_ok()
}

/// Skip the test with a message if Docker integration tests are not enabled.
#[allow(dead_code)]
pub fn check_docker_enabled() -> bool {
	if !is_docker_test_enabled() {
		eprintln!("Skipping Docker integration test; set RUN_DOCKER_INTEGRATION_TESTS=1 to enable");
		return false;
	}
	true
}

/// Wait for Postgres to accept connections with a maximum retry count.
#[allow(dead_code)]
pub async fn wait_for_postgres(
	connection_string: &str,
	max_retries: u32,
) -> Result<sqlx::PgPool, String> {
	let mut attempts = 0;
	loop {
		match sqlx::PgPool::connect(connection_string).await {
			Ok(pool) => return Ok(pool),
			Err(e) => {
				attempts += 1;
				if attempts >= max_retries {
					return Err(format!(
						"Postgres did not become ready after {} attempts: {}",
						max_retries, e
					));
				}
				sleep(Duration::from_secs(1)).await;
			}
		}
	}
}
