// src/routes/auth_routes.rs

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{hash_password, validate_new_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData},
    navigation::landing_path,
    permissions::{Capability, Role},
    sessions::{self, REVOKE_REASON_LOGOUT, REVOKE_REASON_PASSWORD},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        // polled by the panel about once a minute
        .route("/session", get(session_status))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{session_id}/revoke", post(revoke_own_session))
        .route("/change-password", post(change_password))
}

/* =========================
   DTOs
   ========================= */

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClinicBrief {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
    pub clinic: Option<ClinicBrief>,
    pub capabilities: &'static [Capability],
    pub landing_path: String,
    /// Older sessions of this account signed out by this login.
    pub evicted_sessions: u64,
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: UserProfile,
    pub clinic: Option<ClinicBrief>,
    pub capabilities: &'static [Capability],
    pub landing_path: String,
    pub session_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub valid: bool,
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionRow,
    pub current: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordData {
    pub ok: bool,
    pub revoked_sessions: u64,
}

#[derive(Debug, sqlx::FromRow)]
struct LoginUserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: Role,
    is_active: bool,
    clinic_id: Option<Uuid>,
    clinic_name: Option<String>,
    clinic_slug: Option<String>,
    clinic_active: Option<bool>,
}

impl LoginUserRow {
    fn clinic(&self) -> Option<ClinicBrief> {
        match (self.clinic_id, &self.clinic_name, &self.clinic_slug) {
            (Some(id), Some(name), Some(slug)) => Some(ClinicBrief {
                id,
                name: name.clone(),
                slug: slug.clone(),
            }),
            _ => None,
        }
    }

    fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }
}

const USER_WITH_CLINIC: &str = r#"
    SELECT u.id, u.name, u.email, u.password_hash, u.role, u.is_active,
           u.clinic_id, c.name AS clinic_name, c.slug AS clinic_slug, c.is_active AS clinic_active
    FROM users u
    LEFT JOIN clinics c ON c.id = u.clinic_id
"#;

/* =========================
   Handlers
   ========================= */

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiOk<LoginData>>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("E-posta ve şifre zorunludur"));
    }

    let user: LoginUserRow = sqlx::query_as::<_, LoginUserRow>(&format!("{USER_WITH_CLINIC} WHERE u.email = $1"))
        .bind(&email)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(ApiError::invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash) {
        tracing::info!(%email, "login rejected: bad password");
        return Err(ApiError::invalid_credentials());
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("ACCOUNT_DISABLED", "Hesabınız pasif durumda".into()));
    }
    if user.clinic_active == Some(false) {
        return Err(ApiError::Forbidden("CLINIC_DISABLED", "Kliniğinizin hesabı pasif durumda".into()));
    }

    let issued = sessions::issue_session(
        &state.db,
        user.id,
        req.device_name.as_deref().map(str::trim).filter(|d| !d.is_empty()),
        state.session_ttl_hours,
        state.max_active_sessions,
    )
    .await?;

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "login");

    Ok(Json(ApiOk::new(LoginData {
        access_token: issued.access_token,
        expires_at: issued.expires_at,
        clinic: user.clinic(),
        capabilities: user.role.capabilities(),
        landing_path: landing_path(user.role, user.clinic_slug.as_deref()),
        user: user.profile(),
        evicted_sessions: issued.evicted,
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    if !sessions::revoke_session(&state.db, auth.session_id, REVOKE_REASON_LOGOUT).await? {
        return Err(ApiError::session_expired());
    }
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<MeData>>, ApiError> {
    let user: LoginUserRow = sqlx::query_as::<_, LoginUserRow>(&format!("{USER_WITH_CLINIC} WHERE u.id = $1"))
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk::new(MeData {
        clinic: user.clinic(),
        capabilities: user.role.capabilities(),
        landing_path: landing_path(user.role, user.clinic_slug.as_deref()),
        user: user.profile(),
        session_id: auth.session_id,
    })))
}

/// Cheap validity check for the polling client. Rejections (expired, evicted) come from the extractor.
pub async fn session_status(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<SessionStatus>>, ApiError> {
    let expires_at: DateTime<Utc> = sqlx::query_scalar("SELECT expires_at FROM active_sessions WHERE id = $1")
        .bind(auth.session_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(ApiError::session_expired)?;

    Ok(Json(ApiOk::new(SessionStatus {
        valid: true,
        session_id: auth.session_id,
        expires_at,
    })))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<SessionView>>>, ApiError> {
    let rows: Vec<SessionRow> = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT id, device_name, created_at, last_seen_at, expires_at
        FROM active_sessions
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND expires_at > now()
        ORDER BY created_at DESC
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await?;

    let sessions = rows
        .into_iter()
        .map(|session| SessionView {
            current: session.id == auth.session_id,
            session,
        })
        .collect();
    Ok(Json(ApiOk::new(sessions)))
}

pub async fn revoke_own_session(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE active_sessions
        SET revoked_at = now(), revoke_reason = $3
        WHERE id = $1 AND user_id = $2 AND revoked_at IS NULL
        "#,
    )
    .bind(session_id)
    .bind(auth.user_id)
    .bind(REVOKE_REASON_LOGOUT)
    .execute(&state.db)
    .await?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Oturum"));
    }
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<ChangePasswordData>>, ApiError> {
    validate_new_password(&req.new_password, Some(&req.confirm_password))?;

    let current_hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
        .bind(auth.user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.current_password, &current_hash) {
        return Err(ApiError::BadRequest("WRONG_PASSWORD", "Mevcut şifre hatalı".into()));
    }

    let new_hash = hash_password(&req.new_password)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(auth.user_id)
        .bind(&new_hash)
        .execute(&mut *tx)
        .await?;
    let revoked =
        sessions::revoke_user_sessions(&mut *tx, auth.user_id, Some(auth.session_id), REVOKE_REASON_PASSWORD).await?;
    tx.commit().await?;

    tracing::info!(user_id = %auth.user_id, revoked, "password changed");
    Ok(Json(ApiOk::new(ChangePasswordData {
        ok: true,
        revoked_sessions: revoked,
    })))
}
