use prometheus::{
	Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Reconciliation pass metrics
	pub passes_total: IntCounter,
	pub passes_failed_total: IntCounter,
	pub pass_duration_seconds: Histogram,

	// Resync metrics
	pub resyncs_total: IntCounter,
	pub resync_failures_total: IntCounter,

	// Delayed full-rebuild metrics
	pub rebuilds_scheduled_total: IntCounter,
	pub rebuilds_cancelled_total: IntCounter,
	pub rebuilds_completed_total: IntCounter,
	pub rebuilds_failed_total: IntCounter,

	// Per-collection document counts as of the last pass, labeled by collection
	pub source_documents: IntGaugeVec,
	pub index_documents: IntGaugeVec,
}

impl MetricsRegistry {
	pub fn new() -> Self {
		let registry = Registry::new();

		let passes_total = IntCounter::with_opts(Opts::new(
			"forseti_passes_total",
			"Total number of reconciliation passes started",
		))
		.unwrap();

		let passes_failed_total = IntCounter::with_opts(Opts::new(
			"forseti_passes_failed_total",
			"Reconciliation passes that ended unavailable or aborted",
		))
		.unwrap();

		let pass_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"forseti_pass_duration_seconds",
				"Duration of reconciliation passes in seconds",
			)
			.buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
		)
		.unwrap();

		let resyncs_total = IntCounter::with_opts(Opts::new(
			"forseti_resyncs_total",
			"Immediate per-collection resyncs completed",
		))
		.unwrap();

		let resync_failures_total = IntCounter::with_opts(Opts::new(
			"forseti_resync_failures_total",
			"Immediate per-collection resyncs that failed",
		))
		.unwrap();

		let rebuilds_scheduled_total = IntCounter::with_opts(Opts::new(
			"forseti_rebuilds_scheduled_total",
			"Delayed full rebuilds scheduled after a missing index",
		))
		.unwrap();

		let rebuilds_cancelled_total = IntCounter::with_opts(Opts::new(
			"forseti_rebuilds_cancelled_total",
			"Pending full rebuilds cancelled before firing",
		))
		.unwrap();

		let rebuilds_completed_total = IntCounter::with_opts(Opts::new(
			"forseti_rebuilds_completed_total",
			"Delayed full rebuilds that completed every collection",
		))
		.unwrap();

		let rebuilds_failed_total = IntCounter::with_opts(Opts::new(
			"forseti_rebuilds_failed_total",
			"Delayed full rebuilds that failed partway",
		))
		.unwrap();

		let source_documents = IntGaugeVec::new(
			Opts::new(
				"forseti_source_documents",
				"Authoritative record count observed in the last pass",
			),
			&["collection"],
		)
		.unwrap();

		let index_documents = IntGaugeVec::new(
			Opts::new(
				"forseti_index_documents",
				"Indexed document count observed in the last pass (-1 when the index is missing)",
			),
			&["collection"],
		)
		.unwrap();

		// Register all metrics
		registry.register(Box::new(passes_total.clone())).unwrap();
		registry
			.register(Box::new(passes_failed_total.clone()))
			.unwrap();
		registry
			.register(Box::new(pass_duration_seconds.clone()))
			.unwrap();
		registry.register(Box::new(resyncs_total.clone())).unwrap();
		registry
			.register(Box::new(resync_failures_total.clone()))
			.unwrap();
		registry
			.register(Box::new(rebuilds_scheduled_total.clone()))
			.unwrap();
		registry
			.register(Box::new(rebuilds_cancelled_total.clone()))
			.unwrap();
		registry
			.register(Box::new(rebuilds_completed_total.clone()))
			.unwrap();
		registry
			.register(Box::new(rebuilds_failed_total.clone()))
			.unwrap();
		registry
			.register(Box::new(source_documents.clone()))
			.unwrap();
		registry
			.register(Box::new(index_documents.clone()))
			.unwrap();

		Self {
			registry,
			passes_total,
			passes_failed_total,
			pass_duration_seconds,
			resyncs_total,
			resync_failures_total,
			rebuilds_scheduled_total,
			rebuilds_cancelled_total,
			rebuilds_completed_total,
			rebuilds_failed_total,
			source_documents,
			index_documents,
		}
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::error!("failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize the shared metrics registry
pub fn init_metrics() -> Arc<MetricsRegistry> {
	Arc::new(MetricsRegistry::new())
}
