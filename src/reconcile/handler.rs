use axum::Json;
use axum::extract::State;

use crate::reconcile::PassReport;
use crate::state::AppState;

/// `POST /reconcile`: run one pass and return the report. Always 200; the
/// report's disposition carries the outcome.
pub async fn reconcile_handler(State(state): State<AppState>) -> Json<PassReport> {
	Json(state.reconciler.reconcile().await)
}
