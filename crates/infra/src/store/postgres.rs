//! Postgres-backed stock store.
//!
//! `stock_record` holds one row per product; `stock_movement` is the append-only
//! ledger. A movement commit is a single transaction: the record row is written
//! under its version predicate, then the movement row is inserted.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent first insert of a record |
//! | Database (check constraint violation) | `23514` | `Constraint` | Negative quantity, inconsistent thresholds |
//! | Database (foreign key violation) | `23503` | `Constraint` | Movement without a record row |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | Other | N/A | `Unavailable` | Network errors, pool closed, etc. |
//!
//! Version mismatches never reach the database as errors: the guarded
//! `INSERT .. ON CONFLICT DO NOTHING` / `UPDATE .. WHERE version = $n` simply
//! affect zero rows, which is reported as `Conflict`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};

use stockledger_core::{ActorId, ExpectedVersion, ProductId};
use stockledger_inventory::{MovementId, MovementKind, StockMovement, StockRecord, Thresholds};

use super::query::{LedgerOrder, MovementFilter, MovementPage, Pagination};
use super::r#trait::{CommittedMovement, MovementCommit, RecordHistory, StockStore, StoreError};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS stock_record (
        product_id         UUID PRIMARY KEY,
        quantity           BIGINT NOT NULL CHECK (quantity >= 0),
        min_threshold      BIGINT NOT NULL CHECK (min_threshold >= 0),
        critical_threshold BIGINT NOT NULL CHECK (critical_threshold >= 0),
        version            BIGINT NOT NULL CHECK (version > 0),
        updated_at         TIMESTAMPTZ NOT NULL,
        CHECK (critical_threshold <= min_threshold)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_movement (
        id                BIGSERIAL PRIMARY KEY,
        product_id        UUID NOT NULL REFERENCES stock_record (product_id),
        kind              TEXT NOT NULL CHECK (kind IN ('ENTRY', 'EXIT', 'ADJUSTMENT')),
        quantity_delta    BIGINT NOT NULL,
        previous_quantity BIGINT NOT NULL CHECK (previous_quantity >= 0),
        new_quantity      BIGINT NOT NULL CHECK (new_quantity >= 0),
        reason            TEXT NOT NULL,
        reference         TEXT,
        actor_id          UUID NOT NULL,
        created_at        TIMESTAMPTZ NOT NULL,
        CHECK (new_quantity = previous_quantity + quantity_delta)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS stock_movement_product_ledger_idx ON stock_movement (product_id, created_at, id)",
    "CREATE INDEX IF NOT EXISTS stock_movement_ledger_idx ON stock_movement (created_at, id)",
];

const MOVEMENT_COLUMNS: &str = "id, product_id, kind, quantity_delta, previous_quantity, \
     new_quantity, reason, reference, actor_id, created_at";

const MOVEMENT_FILTER: &str = r#"
    ($1::uuid IS NULL OR product_id = $1)
    AND ($2::text IS NULL OR kind = $2)
    AND ($3::timestamptz IS NULL OR created_at >= $3)
    AND ($4::timestamptz IS NULL OR created_at <= $4)
"#;

/// Postgres-backed stock store.
///
/// Per-product writers serialize on the `stock_record` row: the version
/// predicate admits exactly one writer per version, and the movement insert
/// happens while that row lock is held, so ledger order per product matches
/// commit order.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: Arc<PgPool>,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool and make sure the tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StockStore for PostgresStockStore {
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn load_record(&self, product_id: ProductId) -> Result<Option<StockRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT product_id, quantity, min_threshold, critical_threshold, version, updated_at
            FROM stock_record
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_record", e))?;

        row.map(|row| decode_record(&row)).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_records(&self) -> Result<Vec<StockRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity, min_threshold, critical_threshold, version, updated_at
            FROM stock_record
            ORDER BY product_id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_records", e))?;

        rows.iter().map(decode_record).collect()
    }

    /// Write the record under its version predicate and append the movement,
    /// in one transaction.
    #[instrument(
        skip(self, commit),
        fields(
            product_id = %commit.product_id(),
            kind = %commit.movement.kind,
            expected = ?commit.expected,
            movement_id = tracing::field::Empty
        ),
        err
    )]
    async fn commit_movement(&self, commit: MovementCommit) -> Result<CommittedMovement, StoreError> {
        let product_id = commit.product_id();
        let planned = commit.movement;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let record_row = match commit.expected {
            ExpectedVersion::Absent => sqlx::query(
                r#"
                INSERT INTO stock_record
                    (product_id, quantity, min_threshold, critical_threshold, version, updated_at)
                VALUES ($1, $2, $3, $4, 1, clock_timestamp())
                ON CONFLICT (product_id) DO NOTHING
                RETURNING product_id, quantity, min_threshold, critical_threshold, version, updated_at
                "#,
            )
            .bind(product_id.as_uuid())
            .bind(planned.new_quantity)
            .bind(commit.thresholds.min())
            .bind(commit.thresholds.critical())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_record", e))?,
            ExpectedVersion::Exact(version) => sqlx::query(
                r#"
                UPDATE stock_record
                SET quantity = $2, version = version + 1, updated_at = clock_timestamp()
                WHERE product_id = $1 AND version = $3 AND quantity = $4
                RETURNING product_id, quantity, min_threshold, critical_threshold, version, updated_at
                "#,
            )
            .bind(product_id.as_uuid())
            .bind(planned.new_quantity)
            .bind(version_param(product_id, version)?)
            .bind(planned.previous_quantity)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("update_record", e))?,
        };

        let Some(record_row) = record_row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "stock record {product_id}: expected {:?} no longer holds",
                commit.expected
            )));
        };
        let record = decode_record(&record_row)?;
        let created_at = record.updated_at().unwrap_or_else(Utc::now);

        let movement_row = sqlx::query(&format!(
            r#"
            INSERT INTO stock_movement
                (product_id, kind, quantity_delta, previous_quantity, new_quantity,
                 reason, reference, actor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {MOVEMENT_COLUMNS}
            "#
        ))
        .bind(product_id.as_uuid())
        .bind(planned.kind.as_str())
        .bind(planned.quantity_delta)
        .bind(planned.previous_quantity)
        .bind(planned.new_quantity)
        .bind(&planned.reason)
        .bind(planned.reference.as_deref())
        .bind(planned.actor_id.as_uuid())
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        let movement = decode_movement(&movement_row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("movement_id", movement.id.0);
        Ok(CommittedMovement { record, movement })
    }

    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn save_thresholds(
        &self,
        product_id: ProductId,
        thresholds: Thresholds,
    ) -> Result<StockRecord, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO stock_record
                (product_id, quantity, min_threshold, critical_threshold, version, updated_at)
            VALUES ($1, 0, $2, $3, 1, clock_timestamp())
            ON CONFLICT (product_id) DO UPDATE SET
                min_threshold = EXCLUDED.min_threshold,
                critical_threshold = EXCLUDED.critical_threshold,
                version = stock_record.version + 1,
                updated_at = clock_timestamp()
            RETURNING product_id, quantity, min_threshold, critical_threshold, version, updated_at
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(thresholds.min())
        .bind(thresholds.critical())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_thresholds", e))?;

        decode_record(&row)
    }

    #[instrument(skip(self), err)]
    async fn query_movements(
        &self,
        filter: &MovementFilter,
        order: LedgerOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let count_row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM stock_movement WHERE {MOVEMENT_FILTER}"
        ))
        .bind(filter.product_id.map(|p| *p.as_uuid()))
        .bind(filter.kind.map(MovementKind::as_str))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_movements", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| StoreError::Corrupt(format!("failed to read count: {e}")))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movement
            WHERE {MOVEMENT_FILTER}
            ORDER BY {}
            LIMIT $5 OFFSET $6
            "#,
            order_clause(order)
        ))
        .bind(filter.product_id.map(|p| *p.as_uuid()))
        .bind(filter.kind.map(MovementKind::as_str))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_movements", e))?;

        let movements = rows.iter().map(decode_movement).collect::<Result<_, _>>()?;
        Ok(MovementPage::new(movements, pagination, total.max(0) as u64))
    }

    #[instrument(skip(self), err)]
    async fn scan_movements(
        &self,
        filter: &MovementFilter,
        order: LedgerOrder,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movement
            WHERE {MOVEMENT_FILTER}
            ORDER BY {}
            "#,
            order_clause(order)
        ))
        .bind(filter.product_id.map(|p| *p.as_uuid()))
        .bind(filter.kind.map(MovementKind::as_str))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("scan_movements", e))?;

        rows.iter().map(decode_movement).collect()
    }

    /// Both reads run in one `REPEATABLE READ` transaction, so they share a
    /// snapshot.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    async fn load_with_history(&self, product_id: ProductId) -> Result<RecordHistory, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let record_row = sqlx::query(
            r#"
            SELECT product_id, quantity, min_threshold, critical_threshold, version, updated_at
            FROM stock_record
            WHERE product_id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_record", e))?;

        let movement_rows = sqlx::query(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM stock_movement
            WHERE product_id = $1
            ORDER BY {}
            "#,
            order_clause(LedgerOrder::OldestFirst)
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("scan_movements", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(RecordHistory {
            record: record_row.map(|row| decode_record(&row)).transpose()?,
            movements: movement_rows.iter().map(decode_movement).collect::<Result<_, _>>()?,
        })
    }
}

/// Row versions are `BIGINT`; a version past `i64::MAX` cannot have come from
/// this table.
fn version_param(product_id: ProductId, version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| {
        StoreError::Corrupt(format!("stock record {product_id}: version {version} out of range"))
    })
}

fn order_clause(order: LedgerOrder) -> &'static str {
    match order {
        LedgerOrder::NewestFirst => "created_at DESC, id DESC",
        LedgerOrder::OldestFirst => "created_at ASC, id ASC",
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23514") | Some("23503") => StoreError::Constraint(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {operation}: {err}"))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}

fn decode_record(row: &PgRow) -> Result<StockRecord, StoreError> {
    let row = StockRecordRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to read stock_record row: {e}")))?;
    row.try_into()
}

fn decode_movement(row: &PgRow) -> Result<StockMovement, StoreError> {
    let row = MovementRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to read stock_movement row: {e}")))?;
    row.try_into()
}

// SQLx row types

#[derive(Debug)]
struct StockRecordRow {
    product_id: uuid::Uuid,
    quantity: i64,
    min_threshold: i64,
    critical_threshold: i64,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for StockRecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockRecordRow {
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            min_threshold: row.try_get("min_threshold")?,
            critical_threshold: row.try_get("critical_threshold")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<StockRecordRow> for StockRecord {
    type Error = StoreError;

    fn try_from(row: StockRecordRow) -> Result<Self, Self::Error> {
        let product_id = ProductId::from_uuid(row.product_id);
        let corrupt = |e: stockledger_core::DomainError| {
            StoreError::Corrupt(format!("stock record {product_id}: {e}"))
        };
        let thresholds = Thresholds::new(row.min_threshold, row.critical_threshold).map_err(corrupt)?;
        let version = u64::try_from(row.version)
            .map_err(|_| StoreError::Corrupt(format!("stock record {product_id}: negative version")))?;
        StockRecord::restore(product_id, row.quantity, thresholds, version, Some(row.updated_at))
            .map_err(corrupt)
    }
}

#[derive(Debug)]
struct MovementRow {
    id: i64,
    product_id: uuid::Uuid,
    kind: String,
    quantity_delta: i64,
    previous_quantity: i64,
    new_quantity: i64,
    reason: String,
    reference: Option<String>,
    actor_id: uuid::Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            kind: row.try_get("kind")?,
            quantity_delta: row.try_get("quantity_delta")?,
            previous_quantity: row.try_get("previous_quantity")?,
            new_quantity: row.try_get("new_quantity")?,
            reason: row.try_get("reason")?,
            reference: row.try_get("reference")?,
            actor_id: row.try_get("actor_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = StoreError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let kind: MovementKind = row
            .kind
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("stock movement {}: {e}", row.id)))?;
        let id = u64::try_from(row.id)
            .map_err(|_| StoreError::Corrupt(format!("stock movement id {} out of range", row.id)))?;
        Ok(StockMovement {
            id: MovementId(id),
            product_id: ProductId::from_uuid(row.product_id),
            kind,
            quantity_delta: row.quantity_delta,
            previous_quantity: row.previous_quantity,
            new_quantity: row.new_quantity,
            reason: row.reason,
            reference: row.reference,
            actor_id: ActorId::from_uuid(row.actor_id),
            created_at: row.created_at,
        })
    }
}
