use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::search::IndexHealth;

/// Health endpoint: 200 OK when the source answers a ping and the search
/// service (when configured) reports available, otherwise 503 naming the
/// side that failed.
pub async fn healthz(State(state): State<crate::state::AppState>) -> impl IntoResponse {
	if let Err(e) = state.source.ping().await {
		return (
			StatusCode::SERVICE_UNAVAILABLE,
			format!("source error: {}", e),
		)
			.into_response();
	}

	if let Some(index) = &state.index {
		match index.health().await {
			Ok(IndexHealth::Available) => {}
			Ok(IndexHealth::Unavailable(status)) => {
				return (
					StatusCode::SERVICE_UNAVAILABLE,
					format!("index unavailable: {}", status),
				)
					.into_response();
			}
			Err(e) => {
				return (
					StatusCode::SERVICE_UNAVAILABLE,
					format!("index error: {}", e),
				)
					.into_response();
			}
		}
	}

	(StatusCode::OK, "OK").into_response()
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<crate::state::AppState>) -> impl IntoResponse {
	let metrics_text = state.metrics.encode();
	(StatusCode::OK, metrics_text).into_response()
}
