//! Emergencies as JSONB documents in Postgres, with change feed over
//! `LISTEN/NOTIFY`.

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use sqlx::PgPool;
use sqlx::postgres::PgListener;

use super::{EmergencyScope, EmergencyStore, Subscription};
use crate::error::CoordError;
use crate::models::{Emergency, EmergencyStatus};

const NOTIFY_CHANNEL: &str = "emergency_changes";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS emergencies (
    emergency_id TEXT PRIMARY KEY,
    attendee_id  TEXT NOT NULL,
    group_id     TEXT NOT NULL,
    status       TEXT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL,
    doc          JSONB NOT NULL
)
"#;

fn status_label(status: EmergencyStatus) -> &'static str {
    match status {
        EmergencyStatus::Active => "Active",
        EmergencyStatus::InProgress => "InProgress",
        EmergencyStatus::Resolved => "Resolved",
    }
}

fn decode_all(docs: Vec<String>) -> Result<Vec<Emergency>, CoordError> {
    docs.iter()
        .map(|d| serde_json::from_str(d).map_err(CoordError::from))
        .collect()
}

#[derive(Clone)]
pub struct PgEmergencyStore {
    pool: PgPool,
}

impl PgEmergencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), CoordError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS emergencies_open_by_attendee \
             ON emergencies (attendee_id) WHERE status <> 'Resolved'",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS emergencies_open_by_created \
             ON emergencies (created_at) WHERE status <> 'Resolved'",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EmergencyStore for PgEmergencyStore {
    async fn get(&self, emergency_id: &str) -> Result<Option<Emergency>, CoordError> {
        let doc: Option<String> =
            sqlx::query_scalar("SELECT doc::text FROM emergencies WHERE emergency_id = $1")
                .bind(emergency_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(doc.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn list_open(&self, scope: &EmergencyScope) -> Result<Vec<Emergency>, CoordError> {
        let docs: Vec<String> = match scope {
            EmergencyScope::All => sqlx::query_scalar(
                "SELECT doc::text FROM emergencies \
                 WHERE status <> 'Resolved' ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?,
            EmergencyScope::Group(group_id) => {
                sqlx::query_scalar(
                    "SELECT doc::text FROM emergencies \
                     WHERE group_id = $1 AND status <> 'Resolved' ORDER BY created_at",
                )
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        decode_all(docs)
    }

    async fn find_open_for_attendee(
        &self,
        attendee_id: &str,
    ) -> Result<Option<Emergency>, CoordError> {
        let doc: Option<String> = sqlx::query_scalar(
            "SELECT doc::text FROM emergencies \
             WHERE attendee_id = $1 AND status <> 'Resolved' \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(attendee_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn put(&self, emergency: Emergency) -> Result<(), CoordError> {
        let doc = serde_json::to_string(&emergency)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO emergencies (emergency_id, attendee_id, group_id, status, created_at, doc)
            VALUES ($1, $2, $3, $4, $5, $6::jsonb)
            ON CONFLICT (emergency_id)
            DO UPDATE SET status = EXCLUDED.status, doc = EXCLUDED.doc
            "#,
        )
        .bind(&emergency.emergency_id)
        .bind(&emergency.attendee_id)
        .bind(&emergency.group_id)
        .bind(status_label(emergency.status))
        .bind(emergency.created_at)
        .bind(doc)
        .execute(&mut *tx)
        .await?;

        // Delivered on commit.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(&emergency.group_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn subscribe(&self, scope: EmergencyScope) -> Result<Subscription<Emergency>, CoordError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        let initial = self.list_open(&scope).await?;

        let store = self.clone();
        let scope_filter = scope.clone();
        let updates = listener
            .into_stream()
            .filter_map(move |notification| {
                let relevant = match (&notification, &scope_filter) {
                    (Ok(_), EmergencyScope::All) => true,
                    (Ok(n), EmergencyScope::Group(group_id)) => n.payload() == group_id.as_str(),
                    (Err(_), _) => true,
                };
                let outcome = notification.map(|_| ()).map_err(CoordError::from);
                async move { relevant.then_some(outcome) }
            })
            .then(move |outcome| {
                let store = store.clone();
                let scope = scope.clone();
                async move {
                    outcome?;
                    store.list_open(&scope).await
                }
            });
        let closed = stream::once(async {
            tracing::warn!("emergency change feed closed by postgres");
            Err(CoordError::UpstreamUnavailable("emergency feed closed".into()))
        });

        Ok(stream::once(async move { Ok(initial) })
            .chain(updates)
            .chain(closed)
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_match_serde_names() {
        for status in [
            EmergencyStatus::Active,
            EmergencyStatus::InProgress,
            EmergencyStatus::Resolved,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json.trim_matches('"'), status_label(status));
        }
    }
}
