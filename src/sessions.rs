// src/sessions.rs
//
// `active_sessions` bookkeeping: each login is one row holding the hash of the
// bearer token. A user keeps at most `max_active_sessions` live rows; the
// oldest are revoked with reason `evicted` so the polling client can tell an
// eviction apart from a plain expiry.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{generate_access_token, hash_access_token};
use crate::error::ApiError;

pub const REVOKE_REASON_EVICTED: &str = "evicted";
pub const REVOKE_REASON_LOGOUT: &str = "logout";
pub const REVOKE_REASON_PASSWORD: &str = "password_changed";

/// Revoked or expired rows are kept this long for the "you were signed out" answer.
const RETAIN_DEAD_SESSIONS_HOURS: i64 = 24;

#[derive(Debug)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub evicted: u64,
}

pub async fn issue_session(
    db: &PgPool,
    user_id: Uuid,
    device_name: Option<&str>,
    ttl_hours: i64,
    max_active: i64,
) -> Result<IssuedSession, ApiError> {
    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    let mut tx = db.begin().await?;

    let (session_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO active_sessions (user_id, token_hash, device_name, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(&token_hash)
    .bind(device_name)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    // Keep the newest `max_active` live sessions (the one above included).
    let evicted = sqlx::query(
        r#"
        UPDATE active_sessions
        SET revoked_at = now(), revoke_reason = $3
        WHERE id IN (
            SELECT id
            FROM active_sessions
            WHERE user_id = $1
              AND revoked_at IS NULL
              AND expires_at > now()
            ORDER BY created_at DESC, id DESC
            OFFSET $2
        )
        "#,
    )
    .bind(user_id)
    .bind(max_active)
    .bind(REVOKE_REASON_EVICTED)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    if evicted > 0 {
        tracing::info!(%user_id, evicted, "older sessions evicted by new login");
    }

    Ok(IssuedSession {
        session_id,
        access_token,
        expires_at,
        evicted,
    })
}

pub async fn revoke_session(db: &PgPool, session_id: Uuid, reason: &str) -> Result<bool, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE active_sessions
        SET revoked_at = now(), revoke_reason = $2
        WHERE id = $1 AND revoked_at IS NULL
        "#,
    )
    .bind(session_id)
    .bind(reason)
    .execute(db)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Revoke every live session of `user_id`, optionally sparing one.
pub async fn revoke_user_sessions<'e, E>(
    executor: E,
    user_id: Uuid,
    keep: Option<Uuid>,
    reason: &str,
) -> Result<u64, ApiError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let res = sqlx::query(
        r#"
        UPDATE active_sessions
        SET revoked_at = now(), revoke_reason = $3
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND ($2::uuid IS NULL OR id <> $2)
        "#,
    )
    .bind(user_id)
    .bind(keep)
    .bind(reason)
    .execute(executor)
    .await?;
    Ok(res.rows_affected())
}

pub async fn purge_dead_sessions(db: &PgPool) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"
        DELETE FROM active_sessions
        WHERE COALESCE(revoked_at, expires_at) < now() - make_interval(hours => $1)
        "#,
    )
    .bind(RETAIN_DEAD_SESSIONS_HOURS as i32)
    .execute(db)
    .await?;
    Ok(res.rows_affected())
}

/// Background sweeper. This is the only work the service does on its own.
pub fn spawn_sweeper(db: PgPool, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match purge_dead_sessions(&db).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(purged = n, "dead sessions purged"),
                Err(e) => tracing::warn!(error = %e, "session sweep failed"),
            }
        }
    })
}
