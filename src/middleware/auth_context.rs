use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use chrono::{DateTime, Utc};
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::AppState;
use crate::permissions::Role;
use crate::sessions::REVOKE_REASON_EVICTED;

/// Request-scoped tenant and identity context. Every clinic-scoped query is
/// filtered by `clinic_id` taken from here, never from the request body.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub clinic_id: Option<Uuid>,
    pub clinic_slug: Option<String>,
    pub session_id: Uuid,
}

impl AuthContext {
    /// The caller's clinic. Super-admins have none and are sent to the platform area.
    pub fn require_clinic(&self) -> Result<Uuid, ApiError> {
        self.clinic_id.ok_or_else(|| {
            ApiError::Forbidden(
                "PLATFORM_ONLY",
                "Platform yöneticileri klinik ekranlarını kullanamaz".into(),
            )
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_id: Uuid,
    user_id: Uuid,
    role: Role,
    clinic_id: Option<Uuid>,
    clinic_slug: Option<String>,
    clinic_active: Option<bool>,
    user_active: bool,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    revoke_reason: Option<String>,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT s.id AS session_id, s.user_id, u.role,
                       u.clinic_id, c.slug AS clinic_slug, c.is_active AS clinic_active,
                       u.is_active AS user_active,
                       s.expires_at, s.revoked_at, s.revoke_reason
                FROM active_sessions s
                JOIN users u ON u.id = s.user_id
                LEFT JOIN clinics c ON c.id = u.clinic_id
                WHERE s.token_hash = $1
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(ApiError::session_expired)?;

            if row.revoked_at.is_some() {
                return Err(match row.revoke_reason.as_deref() {
                    Some(REVOKE_REASON_EVICTED) => ApiError::session_evicted(),
                    _ => ApiError::session_expired(),
                });
            }
            if row.expires_at <= Utc::now() || !row.user_active {
                return Err(ApiError::session_expired());
            }
            if row.clinic_active == Some(false) {
                return Err(ApiError::Forbidden(
                    "CLINIC_DISABLED",
                    "Kliniğinizin hesabı pasif durumda".into(),
                ));
            }

            // best-effort
            let _ = sqlx::query("UPDATE active_sessions SET last_seen_at = now() WHERE id = $1")
                .bind(row.session_id)
                .execute(&state.db)
                .await;

            Ok(AuthContext {
                user_id: row.user_id,
                role: row.role,
                clinic_id: row.clinic_id,
                clinic_slug: row.clinic_slug,
                session_id: row.session_id,
            })
        }
    }
}
