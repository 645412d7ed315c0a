pub mod config;
pub mod devops;
pub mod health;
pub mod indexer;
pub mod observability;
pub mod reconcile;
pub mod search;
pub mod source;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use log::{debug, error, info, warn};

use crate::config::Settings;
use crate::indexer::HttpIndexer;
use crate::reconcile::{Disposition, Reconciler};
use crate::search::{SearchClient, SearchIndex};
use crate::source::{Collection, PgSourceStore, SourceStore};
use crate::state::AppState;

/// Wired application: collaborators plus the reconciler, ready to serve or
/// to run a single pass.
pub struct App {
	pub settings: Settings,
	pub state: AppState,
}

/// Wire collaborators from settings. Missing search settings with the flag
/// on produce a disabled reconciler, not an error; the database pool is lazy
/// so this never blocks on connectivity.
pub fn build(settings: Settings) -> Result<App> {
	let metrics = observability::init_metrics();

	let source: Arc<dyn SourceStore> = Arc::new(
		PgSourceStore::connect_lazy(settings.database_url.as_str())
			.context("failed to build database pool")?,
	);

	let (reconciler, index): (Arc<Reconciler>, Option<Arc<dyn SearchIndex>>) =
		if settings.search_configured() {
			let collections = settings
				.collections
				.iter()
				.map(|name| Collection::new(name))
				.collect::<Result<Vec<_>, _>>()
				.context("invalid collection name in configuration")?;

			let client = Arc::new(SearchClient::new(
				&settings.search_host,
				&settings.search_api_key,
				Duration::from_millis(settings.request_timeout_ms),
			)?);
			let indexer = Arc::new(HttpIndexer::new(
				Arc::clone(&source),
				client.clone(),
				settings.resync_batch_size,
			));
			let reconciler = Reconciler::new(
				collections,
				Arc::clone(&source),
				client.clone(),
				indexer,
				Arc::clone(&metrics),
				Duration::from_millis(settings.rebuild_delay_ms),
			);
			(Arc::new(reconciler), Some(client))
		} else {
			if settings.search_enabled {
				warn!(
					"search is enabled but the search host or api key is missing; reconciler disabled"
				);
			}
			(Arc::new(Reconciler::disabled()), None)
		};

	Ok(App {
		settings,
		state: AppState {
			reconciler,
			source,
			index,
			metrics,
		},
	})
}

pub async fn run() -> Result<()> {
	let settings = config::load().context("failed to load configuration")?;
	observability::init_logging(settings.log_level, &settings.log_dir)
		.context("failed to initialize logging")?;

	let app = build(settings)?;
	let settings = &app.settings;

	if app.state.reconciler.is_enabled() {
		info!(
			"reconciler enabled for collections [{}], pass every {}s",
			settings.collections.join(", "),
			settings.reconcile_interval_secs
		);
	} else {
		info!("reconciler disabled");
	}

	// Periodic trigger; the first tick fires immediately so a fresh deploy
	// reconciles on boot.
	let ticker = if app.state.reconciler.is_enabled() && settings.reconcile_interval_secs > 0 {
		let reconciler = Arc::clone(&app.state.reconciler);
		let every = Duration::from_secs(settings.reconcile_interval_secs);
		Some(tokio::spawn(async move {
			let mut tick = tokio::time::interval(every);
			loop {
				tick.tick().await;
				let report = reconciler.reconcile().await;
				debug!("periodic pass finished: {:?}", report.disposition);
			}
		}))
	} else {
		None
	};

	let router = Router::new()
		.route("/healthz", get(health::healthz))
		.route("/metrics", get(health::metrics_handler))
		.route("/reconcile", post(reconcile::handler::reconcile_handler))
		.with_state(app.state.clone());

	let addr = format!("{}:{}", settings.host, settings.port);
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.with_context(|| format!("failed to bind {}", addr))?;
	info!("forseti listening on {}", addr);

	axum::serve(listener, router)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("server error")?;

	if let Some(handle) = ticker {
		handle.abort();
	}
	// Exit hook: a pending scheduled rebuild must never fire against a
	// torn-down connection.
	app.state.reconciler.shutdown();
	info!("forseti stopped");
	Ok(())
}

/// One reconciliation pass, report printed as JSON. Returns the process
/// exit code: 0 for Completed/Disabled, 1 otherwise.
pub async fn check() -> Result<i32> {
	let settings = config::load().context("failed to load configuration")?;
	let _ = observability::init_logging(settings.log_level, &settings.log_dir);

	let app = build(settings)?;
	let report = app.state.reconciler.reconcile().await;
	println!("{}", serde_json::to_string_pretty(&report)?);

	// A one-shot check cannot await a delayed rebuild; cancel it so the
	// process exits cleanly. The running service is the place rebuilds fire.
	app.state.reconciler.shutdown();

	Ok(match report.disposition {
		Disposition::Completed | Disposition::Disabled => 0,
		Disposition::IndexUnavailable | Disposition::Aborted(_) => 1,
	})
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("failed to listen for shutdown signal: {}", e);
		return;
	}
	info!("shutdown signal received");
}
