use async_trait::async_trait;
use common::{CorrelationId, OrderId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventId, EventLogError, EventQuery, EventType, FulfillmentEvent, Result,
    log::{EventLog, EventStream, validate_events_for_append},
};

const SELECT_COLUMNS: &str =
    "SELECT id, order_id, event_type, payload, correlation_id, user_id, timestamp FROM fulfillment_events";

/// PostgreSQL-backed event log implementation.
///
/// Log order is the `seq` column, assigned by the database on insert.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<FulfillmentEvent> {
        let event_type: String = row.try_get("event_type")?;

        Ok(FulfillmentEvent {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            event_type: event_type.parse()?,
            payload: row.try_get("payload")?,
            correlation_id: row
                .try_get::<Option<Uuid>, _>("correlation_id")?
                .map(CorrelationId::from_uuid),
            user_id: row
                .try_get::<Option<Uuid>, _>("user_id")?
                .map(UserId::from_uuid),
            timestamp: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    async fn append(&self, events: Vec<FulfillmentEvent>) -> Result<()> {
        validate_events_for_append(&events)?;

        let mut tx = self.pool.begin().await?;

        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO fulfillment_events (id, order_id, event_type, payload, correlation_id, user_id, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.id.as_uuid())
            .bind(event.order_id.map(|id| id.as_uuid()))
            .bind(event.event_type.as_str())
            .bind(&event.payload)
            .bind(event.correlation_id.map(|id| id.as_uuid()))
            .bind(event.user_id.map(|id| id.as_uuid()))
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("fulfillment_events_id_key")
                {
                    return EventLogError::DuplicateEvent(event.id);
                }
                EventLogError::Database(e)
            })?;
        }

        tx.commit().await?;
        metrics::counter!("event_log_appends_total").increment(events.len() as u64);
        Ok(())
    }

    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<FulfillmentEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE order_id = $1 ORDER BY seq ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<FulfillmentEvent>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.order_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND order_id = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.correlation_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND correlation_id = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp <= ${param_count}"));
        }

        sql.push_str(" ORDER BY seq ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.order_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(event_types) = query.event_types {
            let names: Vec<String> = event_types.iter().map(|t| t.as_str().to_string()).collect();
            sqlx_query = sqlx_query.bind(names);
        }
        if let Some(correlation_id) = query.correlation_id {
            sqlx_query = sqlx_query.bind(correlation_id.as_uuid());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn get_events_by_type(&self, event_type: EventType) -> Result<Vec<FulfillmentEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE event_type = $1 ORDER BY seq ASC"
        ))
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        // Rows are buffered: a borrowed sqlx stream cannot outlive `&self`.
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"))
            .fetch_all(&self.pool)
            .await?;

        let events = rows.into_iter().map(Self::row_to_event);
        Ok(Box::pin(stream::iter(events)))
    }

    async fn event_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fulfillment_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
