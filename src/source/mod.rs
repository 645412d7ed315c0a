use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use thiserror::Error;

/// Upper bound on collection names; matches both Postgres identifier limits
/// and MeiliSearch index uid limits with room to spare.
pub const MAX_COLLECTION_NAME_LEN: usize = 64;

/// A named record set that exists both as a Postgres table and as a search
/// index uid.
///
/// Names are validated on construction (`[a-z][a-z0-9_]*`, at most
/// [`MAX_COLLECTION_NAME_LEN`] bytes), the safe intersection of unquoted
/// Postgres identifiers and MeiliSearch index uids. Validation is what makes
/// interpolating the name into a `SELECT COUNT(*)` statement safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct Collection(String);

impl Collection {
	pub fn new(name: &str) -> Result<Self, SourceError> {
		let valid = !name.is_empty()
			&& name.len() <= MAX_COLLECTION_NAME_LEN
			&& name.chars().next().is_some_and(|c| c.is_ascii_lowercase())
			&& name
				.chars()
				.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

		if valid {
			Ok(Self(name.to_string()))
		} else {
			Err(SourceError::InvalidCollection(name.to_string()))
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for Collection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Error)]
pub enum SourceError {
	#[error("invalid collection name '{0}'")]
	InvalidCollection(String),
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("failed to decode row as JSON: {0}")]
	Decode(#[from] serde_json::Error),
}

/// Boundary to the authoritative datastore. Implemented by `PgSourceStore`
/// and any test doubles.
#[async_trait]
pub trait SourceStore: Send + Sync + 'static {
	/// Lightweight ping to verify DB connectivity / readiness.
	async fn ping(&self) -> Result<(), SourceError>;

	/// Authoritative record count for one collection.
	async fn count(&self, collection: &Collection) -> Result<u64, SourceError>;

	/// One page of records, ordered by `id`, as JSON objects. Used by the
	/// bulk resync path; every row carries an `id` field (the index primary
	/// key).
	async fn fetch_page(
		&self,
		collection: &Collection,
		offset: u64,
		limit: u32,
	) -> Result<Vec<Value>, SourceError>;
}

/// Postgres-backed source store over a shared `sqlx::PgPool`.
pub struct PgSourceStore {
	pool: PgPool,
}

impl PgSourceStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Connect helper using a DATABASE_URL-like string. The pool is lazy so
	/// construction succeeds even when the database is not up yet.
	pub fn connect_lazy(database_url: &str) -> Result<Self, SourceError> {
		let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy(database_url)?;
		Ok(Self::new(pool))
	}
}

#[async_trait]
impl SourceStore for PgSourceStore {
	async fn ping(&self) -> Result<(), SourceError> {
		// We don't need the returned row; success indicates connectivity.
		sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
		Ok(())
	}

	async fn count(&self, collection: &Collection) -> Result<u64, SourceError> {
		// The collection name is validated at construction; it is the only
		// value interpolated into the statement.
		let sql = format!("SELECT COUNT(*) FROM {}", collection.as_str());
		let n: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
		Ok(n.max(0) as u64)
	}

	async fn fetch_page(
		&self,
		collection: &Collection,
		offset: u64,
		limit: u32,
	) -> Result<Vec<Value>, SourceError> {
		let sql = format!(
			"SELECT row_to_json(t) AS doc FROM (SELECT * FROM {} ORDER BY id OFFSET $1 LIMIT $2) t",
			collection.as_str()
		);
		let rows = sqlx::query(&sql)
			.bind(offset as i64)
			.bind(limit as i64)
			.fetch_all(&self.pool)
			.await?;

		let mut docs = Vec::with_capacity(rows.len());
		for row in rows {
			let doc: Value = row.try_get("doc")?;
			docs.push(doc);
		}
		Ok(docs)
	}
}
