// src/routes/user_routes.rs

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{generate_temp_password, hash_password, validate_new_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{validate_email, ApiOk, AppState, OkData},
    permissions::{Capability, Role, authorize, can_manage_role},
    sessions::{self, REVOKE_REASON_PASSWORD},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/doctors", get(list_doctors))
        .route("/admin/users", post(create_user))
        .route("/admin/users/reset-password", post(reset_password))
        .route("/admin/users/{user_id}", patch(update_user).delete(delete_user))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserPublicRow {
    pub id: Uuid,
    pub clinic_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const USER_COLUMNS: &str = "id, clinic_id, name, email, role, is_active, created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsersView {
    Directory,
    #[serde(rename = "self")]
    OwnAccount,
}

#[derive(Debug, Serialize)]
pub struct UsersData {
    pub view: UsersView,
    pub users: Vec<UserPublicRow>,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    /// Platform operators only; clinic admins always see their own clinic.
    pub clinic_id: Option<Uuid>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DoctorOption {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    /// Required when a platform operator creates clinic staff.
    pub clinic_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordData {
    pub user_id: Uuid,
    /// Shown once to the admin, who hands it to the user.
    pub temporary_password: String,
    pub revoked_sessions: u64,
}

/* =========================
   Validation
   ========================= */

fn validate_name(name: &str) -> Result<String, ApiError> {
    let n = name.trim();
    if n.chars().count() < 2 {
        return Err(ApiError::validation("Ad soyad en az 2 karakter olmalı"));
    }
    Ok(n.to_string())
}

/// Only user managers see the directory; everyone else gets their own account.
fn users_view(role: Role) -> UsersView {
    if role.can(Capability::ManageUsers) {
        UsersView::Directory
    } else {
        UsersView::OwnAccount
    }
}

/// Plan quota check; `None` means unlimited.
fn check_plan_limit(limit: Option<i32>, current: i64, what: &str) -> Result<(), ApiError> {
    match limit {
        Some(max) if current >= i64::from(max) => Err(ApiError::Conflict(
            "PLAN_LIMIT",
            format!("Paketinizin {what} sınırına ulaşıldı ({max})"),
        )),
        _ => Ok(()),
    }
}

/// Clinic the new or edited account belongs to, as seen by the actor.
fn target_clinic(auth: &AuthContext, requested: Option<Uuid>, role: Role) -> Result<Option<Uuid>, ApiError> {
    if role == Role::SuperAdmin {
        if auth.role != Role::SuperAdmin {
            return Err(ApiError::forbidden());
        }
        return Ok(None);
    }
    match auth.clinic_id {
        Some(own) => Ok(Some(own)),
        None => requested
            .map(Some)
            .ok_or_else(|| ApiError::validation("Kullanıcının kliniği seçilmeli")),
    }
}

async fn load_user(state: &AppState, auth: &AuthContext, user_id: Uuid) -> Result<UserPublicRow, ApiError> {
    let user: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND ($2::uuid IS NULL OR clinic_id = $2)"
    ))
    .bind(user_id)
    .bind(auth.clinic_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Kullanıcı"))?;

    if !can_manage_role(auth.role, user.role) {
        return Err(ApiError::forbidden());
    }
    Ok(user)
}

async fn enforce_plan(state: &AppState, clinic_id: Uuid, role: Role) -> Result<(), ApiError> {
    let (max_users, max_doctors, users, doctors): (Option<i32>, Option<i32>, i64, i64) = sqlx::query_as(
        r#"
        SELECT p.max_users, p.max_doctors,
               (SELECT COUNT(*) FROM users u WHERE u.clinic_id = c.id AND u.is_active),
               (SELECT COUNT(*) FROM users u WHERE u.clinic_id = c.id AND u.is_active
                  AND u.role IN ('DOCTOR', 'ADMIN_DOCTOR'))
        FROM clinics c
        LEFT JOIN subscription_plans p ON p.id = c.plan_id
        WHERE c.id = $1
        "#,
    )
    .bind(clinic_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Klinik"))?;

    check_plan_limit(max_users, users, "kullanıcı")?;
    if role.is_doctor() {
        check_plan_limit(max_doctors, doctors, "doktor")?;
    }
    Ok(())
}

/* =========================
   Handlers
   ========================= */

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListUsersQuery>,
) -> Result<Json<ApiOk<UsersData>>, ApiError> {
    if users_view(auth.role) == UsersView::OwnAccount {
        let me: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(auth.user_id)
        .fetch_one(&state.db)
        .await?;
        return Ok(Json(ApiOk::new(UsersData {
            view: UsersView::OwnAccount,
            users: vec![me],
        })));
    }

    let clinic_filter = auth.clinic_id.or(q.clinic_id);
    let users: Vec<UserPublicRow> = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users
        WHERE ($1::uuid IS NULL OR clinic_id = $1)
        ORDER BY is_active DESC, name
        LIMIT 500
        "#
    ))
    .bind(clinic_filter)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiOk::new(UsersData {
        view: UsersView::Directory,
        users,
    })))
}

/// Active treating doctors of the caller's clinic, for appointment forms.
pub async fn list_doctors(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<DoctorOption>>>, ApiError> {
    authorize(&auth, Capability::ViewAppointments)?;
    let clinic_id = auth.require_clinic()?;

    let doctors: Vec<DoctorOption> = sqlx::query_as::<_, DoctorOption>(
        r#"
        SELECT id, name
        FROM users
        WHERE clinic_id = $1
          AND is_active
          AND role IN ('DOCTOR', 'ADMIN_DOCTOR')
        ORDER BY name
        "#,
    )
    .bind(clinic_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiOk::new(doctors)))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    authorize(&auth, Capability::ManageUsers)?;

    let name = validate_name(&req.name)?;
    let email = validate_email(&req.email)?;
    validate_new_password(&req.password, None)?;
    if !can_manage_role(auth.role, req.role) {
        return Err(ApiError::forbidden());
    }
    let clinic_id = target_clinic(&auth, req.clinic_id, req.role)?;
    let is_active = req.is_active.unwrap_or(true);

    if let (Some(clinic_id), true) = (clinic_id, is_active) {
        enforce_plan(&state, clinic_id, req.role).await?;
    }

    let password_hash = hash_password(&req.password)?;

    let user: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        INSERT INTO users (clinic_id, name, email, password_hash, role, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(clinic_id)
    .bind(&name)
    .bind(&email)
    .bind(&password_hash)
    .bind(req.role)
    .bind(is_active)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(..) => ApiError::Conflict("EMAIL_TAKEN", "Bu e-posta adresi zaten kayıtlı".into()),
        other => other,
    })?;

    tracing::info!(actor = %auth.user_id, user_id = %user.id, role = user.role.as_str(), "user created");
    Ok(Json(ApiOk::new(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<ApiOk<UserPublicRow>>, ApiError> {
    authorize(&auth, Capability::ManageUsers)?;
    let existing = load_user(&state, &auth, user_id).await?;

    let name = match req.name.as_deref() {
        Some(n) => validate_name(n)?,
        None => existing.name.clone(),
    };
    let email = match req.email.as_deref() {
        Some(e) => validate_email(e)?,
        None => existing.email.clone(),
    };
    let role = req.role.unwrap_or(existing.role);
    if !can_manage_role(auth.role, role) || (role == Role::SuperAdmin) != (existing.role == Role::SuperAdmin) {
        return Err(ApiError::forbidden());
    }
    let is_active = req.is_active.unwrap_or(existing.is_active);

    if user_id == auth.user_id && (!is_active || role != existing.role) {
        return Err(ApiError::BadRequest(
            "SELF_LOCKOUT",
            "Kendi rolünüzü değiştiremez veya hesabınızı pasifleştiremezsiniz".into(),
        ));
    }

    if let Some(clinic_id) = existing.clinic_id {
        let activating = is_active && !existing.is_active;
        let becoming_doctor = is_active && role.is_doctor() && !(existing.is_active && existing.role.is_doctor());
        if activating || becoming_doctor {
            enforce_plan(&state, clinic_id, role).await?;
        }
    }

    let mut tx = state.db.begin().await?;
    let updated: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        UPDATE users
        SET name = $2, email = $3, role = $4, is_active = $5
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(&name)
    .bind(&email)
    .bind(role)
    .bind(is_active)
    .fetch_one(&mut *tx)
    .await?;

    if !is_active && existing.is_active {
        sessions::revoke_user_sessions(&mut *tx, user_id, None, sessions::REVOKE_REASON_LOGOUT).await?;
    }
    tx.commit().await?;

    tracing::info!(actor = %auth.user_id, %user_id, "user updated");
    Ok(Json(ApiOk::new(updated)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    authorize(&auth, Capability::ManageUsers)?;
    if user_id == auth.user_id {
        return Err(ApiError::BadRequest("SELF_LOCKOUT", "Kendi hesabınızı silemezsiniz".into()));
    }
    load_user(&state, &auth, user_id).await?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&state.db)
        .await?;

    tracing::info!(actor = %auth.user_id, %user_id, "user deleted");
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

pub async fn reset_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<ApiOk<ResetPasswordData>>, ApiError> {
    authorize(&auth, Capability::ManageUsers)?;
    load_user(&state, &auth, req.user_id).await?;

    let temporary_password = generate_temp_password();
    let password_hash = hash_password(&temporary_password)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(req.user_id)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await?;
    let revoked = sessions::revoke_user_sessions(&mut *tx, req.user_id, None, REVOKE_REASON_PASSWORD).await?;
    tx.commit().await?;

    tracing::info!(actor = %auth.user_id, user_id = %req.user_id, revoked, "password reset by admin");
    Ok(Json(ApiOk::new(ResetPasswordData {
        user_id: req.user_id,
        temporary_password,
        revoked_sessions: revoked,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role, clinic_id: Option<Uuid>) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            clinic_id,
            clinic_slug: None,
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Ayşe Yılmaz ").unwrap(), "Ayşe Yılmaz");
        assert!(validate_name("A").is_err());
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn test_plan_limit() {
        assert!(check_plan_limit(None, 1_000, "kullanıcı").is_ok());
        assert!(check_plan_limit(Some(3), 2, "kullanıcı").is_ok());
        let err = check_plan_limit(Some(3), 3, "kullanıcı").unwrap_err();
        assert_eq!(err.code(), "PLAN_LIMIT");
    }

    #[test]
    fn test_clinic_admin_creates_in_own_clinic() {
        let own = Uuid::new_v4();
        let admin = ctx(Role::Admin, Some(own));
        assert_eq!(target_clinic(&admin, Some(Uuid::new_v4()), Role::Doctor).unwrap(), Some(own));
        assert!(target_clinic(&admin, None, Role::SuperAdmin).is_err());
    }

    #[test]
    fn test_platform_operator_must_pick_clinic() {
        let root = ctx(Role::SuperAdmin, None);
        assert!(target_clinic(&root, None, Role::Admin).is_err());
        let clinic = Uuid::new_v4();
        assert_eq!(target_clinic(&root, Some(clinic), Role::Admin).unwrap(), Some(clinic));
        assert_eq!(target_clinic(&root, None, Role::SuperAdmin).unwrap(), None);
    }

    #[test]
    fn test_users_page_view_per_role() {
        for role in [Role::SuperAdmin, Role::Admin, Role::AdminDoctor] {
            assert_eq!(users_view(role), UsersView::Directory, "{role:?}");
        }
        for role in [Role::Doctor, Role::Assistant, Role::Reception, Role::Finance] {
            assert_eq!(users_view(role), UsersView::OwnAccount, "{role:?}");
        }
    }

    #[test]
    fn test_self_view_wire_name() {
        assert_eq!(serde_json::to_string(&UsersView::OwnAccount).unwrap(), "\"self\"");
        assert_eq!(serde_json::to_string(&UsersView::Directory).unwrap(), "\"directory\"");
    }
}
