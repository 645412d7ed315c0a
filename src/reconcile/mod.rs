pub mod handler;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::indexer::Indexer;
use crate::observability::MetricsRegistry;
use crate::search::{IndexHealth, SearchError, SearchIndex};
use crate::source::{Collection, SourceStore};

/// Per-collection outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
	InSync,
	Resynced,
	ResyncScheduled,
	ResyncFailed,
	IndexUnavailable,
}

/// How the pass as a whole ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Disposition {
	/// Feature flag off or connection settings missing; nothing was called.
	Disabled,
	/// The health gate failed; no counts were taken.
	IndexUnavailable,
	/// A collaborator error stopped the pass before any resync decision.
	Aborted(String),
	Completed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
	pub collection: Collection,
	pub source_count: Option<u64>,
	pub index_count: Option<u64>,
	pub outcome: SyncOutcome,
}

/// Aggregate result of one pass. Always returned; errors are folded in,
/// never propagated.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
	pub started_at: DateTime<Utc>,
	pub elapsed_ms: u64,
	pub disposition: Disposition,
	pub statuses: Vec<CollectionStatus>,
}

impl PassReport {
	fn new(started_at: DateTime<Utc>, disposition: Disposition) -> Self {
		Self {
			started_at,
			elapsed_ms: 0,
			disposition,
			statuses: Vec::new(),
		}
	}
}

#[derive(Default)]
struct SlotState {
	generation: u64,
	begun: bool,
	handle: Option<JoinHandle<()>>,
}

/// Single-slot holder for the delayed full-rebuild task: at most one timer
/// is pending at any time, and arming a new one replaces (and aborts) the
/// previous one. Once a rebuild has begun executing it leaves the slot and
/// runs as a unit; only pending timers are cancellable.
struct RebuildSlot {
	state: StdMutex<SlotState>,
}

impl RebuildSlot {
	fn new() -> Self {
		Self {
			state: StdMutex::new(SlotState::default()),
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Invalidate any pending timer and hand out the generation the next
	/// rebuild task must present. Returns (generation, cancelled_previous).
	fn next_generation(&self) -> (u64, bool) {
		let mut state = self.lock();
		let cancelled = match state.handle.take() {
			Some(prev) if !prev.is_finished() => {
				prev.abort();
				true
			}
			_ => false,
		};
		state.generation += 1;
		state.begun = false;
		(state.generation, cancelled)
	}

	/// Park the spawned task's handle in the slot. A stale generation means
	/// a newer timer superseded this one between spawn and attach; the task
	/// is aborted instead.
	fn attach(&self, generation: u64, handle: JoinHandle<()>) {
		let mut state = self.lock();
		if state.generation != generation {
			handle.abort();
		} else if !state.begun {
			state.handle = Some(handle);
		}
	}

	/// Called by the rebuild task after its delay. True means the task is
	/// still current and may execute; it leaves the slot so a later cancel
	/// cannot interrupt it mid-flight.
	fn begin(&self, generation: u64) -> bool {
		let mut state = self.lock();
		if state.generation == generation {
			state.begun = true;
			state.handle = None;
			true
		} else {
			false
		}
	}

	/// Cancel the pending timer, if any. Returns whether one was cancelled.
	fn cancel(&self) -> bool {
		let mut state = self.lock();
		state.generation += 1;
		match state.handle.take() {
			Some(handle) if !handle.is_finished() => {
				handle.abort();
				true
			}
			_ => false,
		}
	}
}

impl Drop for RebuildSlot {
	fn drop(&mut self) {
		// Backstop so no exit path leaves a timer dangling.
		if let Some(handle) = self.lock().handle.take() {
			handle.abort();
		}
	}
}

struct Inner {
	collections: Vec<Collection>,
	source: Arc<dyn SourceStore>,
	index: Arc<dyn SearchIndex>,
	indexer: Arc<dyn Indexer>,
	metrics: Arc<MetricsRegistry>,
	rebuild_delay: Duration,
	// One pass runs to completion before the next starts; concurrent
	// triggers queue here.
	pass_gate: Mutex<()>,
	slot: Arc<RebuildSlot>,
}

/// Compares authoritative record counts against indexed document counts for
/// a fixed set of collections and requests resyncs where they diverge.
///
/// `reconcile` is infallible by contract: every failure mode is logged and
/// folded into the returned [`PassReport`].
pub struct Reconciler {
	inner: Option<Inner>,
}

impl Reconciler {
	pub fn new(
		collections: Vec<Collection>,
		source: Arc<dyn SourceStore>,
		index: Arc<dyn SearchIndex>,
		indexer: Arc<dyn Indexer>,
		metrics: Arc<MetricsRegistry>,
		rebuild_delay: Duration,
	) -> Self {
		Self {
			inner: Some(Inner {
				collections,
				source,
				index,
				indexer,
				metrics,
				rebuild_delay,
				pass_gate: Mutex::new(()),
				slot: Arc::new(RebuildSlot::new()),
			}),
		}
	}

	/// An inert reconciler: feature flag off, or flag on with the search
	/// connection settings missing. `reconcile` is a pure no-op.
	pub fn disabled() -> Self {
		Self { inner: None }
	}

	pub fn is_enabled(&self) -> bool {
		self.inner.is_some()
	}

	/// Run one reconciliation pass across all configured collections.
	pub async fn reconcile(&self) -> PassReport {
		let started_at = Utc::now();
		let Some(inner) = &self.inner else {
			return PassReport::new(started_at, Disposition::Disabled);
		};

		let _gate = inner.pass_gate.lock().await;
		let start = Instant::now();
		inner.metrics.passes_total.inc();

		let mut report = inner.pass().await;
		report.started_at = started_at;
		report.elapsed_ms = start.elapsed().as_millis() as u64;
		inner
			.metrics
			.pass_duration_seconds
			.observe(start.elapsed().as_secs_f64());
		if !matches!(report.disposition, Disposition::Completed) {
			inner.metrics.passes_failed_total.inc();
		}
		report
	}

	/// Cancel any pending delayed rebuild. Called on every shutdown path; a
	/// rebuild that already started executing is left to finish as a unit.
	pub fn shutdown(&self) {
		if let Some(inner) = &self.inner {
			if inner.slot.cancel() {
				inner.metrics.rebuilds_cancelled_total.inc();
				info!("cancelled pending full rebuild before exit");
			}
		}
	}
}

impl Inner {
	async fn pass(&self) -> PassReport {
		let now = Utc::now();

		// Health gate: no counts and no resyncs unless the search service
		// answers and reports available.
		match self.index.health().await {
			Ok(IndexHealth::Available) => {}
			Ok(IndexHealth::Unavailable(status)) => {
				error!("search service not available (status: {})", status);
				return self.unavailable_report(now);
			}
			Err(e) => {
				error!("search service health check failed: {}", e);
				return self.unavailable_report(now);
			}
		}

		// Probe every collection concurrently; all probes complete before
		// any resync decision is made.
		let probes = self.collections.iter().map(|collection| {
			let source = &self.source;
			let index = &self.index;
			async move {
				let (source_count, index_stats) =
					tokio::join!(source.count(collection), index.stats(collection));
				(collection.clone(), source_count, index_stats)
			}
		});
		let probed = join_all(probes).await;

		let mut observed: Vec<(Collection, u64, Option<u64>)> = Vec::with_capacity(probed.len());
		let mut any_missing = false;
		for (collection, source_count, index_stats) in probed {
			let source_count = match source_count {
				Ok(n) => n,
				Err(e) => {
					error!("source count for '{}' failed: {}", collection, e);
					return PassReport::new(
						now,
						Disposition::Aborted(format!("source unavailable: {}", e)),
					);
				}
			};
			let index_count = match index_stats {
				Ok(stats) => Some(stats.number_of_documents),
				Err(SearchError::IndexNotFound) => {
					any_missing = true;
					None
				}
				Err(e) => {
					error!("index stats for '{}' failed: {}", collection, e);
					return PassReport::new(
						now,
						Disposition::Aborted(format!("index stats failed: {}", e)),
					);
				}
			};

			self.metrics
				.source_documents
				.with_label_values(&[collection.as_str()])
				.set(source_count as i64);
			self.metrics
				.index_documents
				.with_label_values(&[collection.as_str()])
				.set(index_count.map_or(-1, |n| n as i64));

			debug!(
				"'{}': {} records in the database, {} indexed",
				collection,
				source_count,
				index_count.map_or("none".to_string(), |n| n.to_string())
			);
			observed.push((collection, source_count, index_count));
		}

		// A missing index means a fresh search service: schedule one delayed
		// rebuild of every collection instead of per-collection resyncs.
		if any_missing {
			self.schedule_full_rebuild();
			let statuses = observed
				.into_iter()
				.map(|(collection, source_count, index_count)| CollectionStatus {
					collection,
					source_count: Some(source_count),
					index_count,
					outcome: SyncOutcome::ResyncScheduled,
				})
				.collect();
			return PassReport {
				started_at: now,
				elapsed_ms: 0,
				disposition: Disposition::Completed,
				statuses,
			};
		}

		let mut statuses = Vec::with_capacity(observed.len());
		for (collection, source_count, index_count) in observed {
			let indexed = index_count.unwrap_or(0);
			let outcome = if source_count == indexed {
				debug!("'{}' in sync ({} documents)", collection, source_count);
				SyncOutcome::InSync
			} else {
				debug!(
					"'{}' out of sync ({} vs {}), resyncing",
					collection, source_count, indexed
				);
				match self.indexer.resync(&collection).await {
					Ok(stats) => {
						info!(
							"resynced '{}': {} documents in {} batches",
							collection, stats.documents, stats.batches
						);
						self.metrics.resyncs_total.inc();
						SyncOutcome::Resynced
					}
					Err(e) => {
						error!("resync of '{}' failed: {}", collection, e);
						self.metrics.resync_failures_total.inc();
						SyncOutcome::ResyncFailed
					}
				}
			};
			statuses.push(CollectionStatus {
				collection,
				source_count: Some(source_count),
				index_count,
				outcome,
			});
		}

		PassReport {
			started_at: now,
			elapsed_ms: 0,
			disposition: Disposition::Completed,
			statuses,
		}
	}

	fn unavailable_report(&self, now: DateTime<Utc>) -> PassReport {
		let statuses = self
			.collections
			.iter()
			.map(|collection| CollectionStatus {
				collection: collection.clone(),
				source_count: None,
				index_count: None,
				outcome: SyncOutcome::IndexUnavailable,
			})
			.collect();
		PassReport {
			started_at: now,
			elapsed_ms: 0,
			disposition: Disposition::IndexUnavailable,
			statuses,
		}
	}

	/// Arm the single-slot delayed rebuild covering all collections. Any
	/// previously pending timer is cancelled first, so re-arming never
	/// duplicates work.
	fn schedule_full_rebuild(&self) {
		let (generation, cancelled_previous) = self.slot.next_generation();
		if cancelled_previous {
			self.metrics.rebuilds_cancelled_total.inc();
		}

		let slot = Arc::clone(&self.slot);
		let indexer = Arc::clone(&self.indexer);
		let metrics = Arc::clone(&self.metrics);
		let collections = self.collections.clone();
		let delay = self.rebuild_delay;

		let handle = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			if !slot.begin(generation) {
				return;
			}

			info!("rebuilding all {} collections", collections.len());
			for collection in &collections {
				match indexer.resync(collection).await {
					Ok(stats) => {
						info!(
							"rebuilt '{}': {} documents in {} batches",
							collection, stats.documents, stats.batches
						);
					}
					Err(e) => {
						// No automatic retry on this path; an operator has
						// to step in.
						error!(
							"full rebuild failed on '{}': {}; try restarting the service",
							collection, e
						);
						metrics.rebuilds_failed_total.inc();
						return;
					}
				}
			}
			metrics.rebuilds_completed_total.inc();
		});
		self.slot.attach(generation, handle);

		self.metrics.rebuilds_scheduled_total.inc();
		warn!(
			"index missing; scheduled full rebuild of all collections in {:?}",
			delay
		);
	}
}
