use std::sync::Arc;

use crate::observability::MetricsRegistry;
use crate::reconcile::Reconciler;
use crate::search::SearchIndex;
use crate::source::SourceStore;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// `index` is `None` when the reconciler runs disabled (feature flag off or
/// connection settings missing); the health endpoint then only checks the
/// source side.
#[derive(Clone)]
pub struct AppState {
	pub reconciler: Arc<Reconciler>,
	pub source: Arc<dyn SourceStore>,
	pub index: Option<Arc<dyn SearchIndex>>,
	pub metrics: Arc<MetricsRegistry>,
}
