// src/routes/platform_routes.rs
//
// Super-admin area: tenants, subscription plans, automation toggles.

use axum::{
    extract::{Path, State},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as DbJson;
use uuid::Uuid;

use crate::{
    auth::{hash_password, validate_new_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{clean, deserialize_double_option, validate_email, ApiOk, AppState, WorkingHours},
    n8n::WorkflowSummary,
    navigation::PLATFORM_ROOT,
    permissions::{authorize, Capability, Role},
    routes::clinic_routes::validate_working_hours,
    sessions::{self, REVOKE_REASON_LOGOUT},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/clinics", get(list_clinics).post(create_clinic))
        .route("/admin/clinics/automation", post(set_automation))
        .route("/admin/clinics/{clinic_id}", patch(update_clinic))
        .route("/admin/plans", get(list_plans).post(create_plan))
        .route("/admin/plans/{plan_id}", patch(update_plan))
        .route("/admin/n8n/workflows", get(list_workflows))
}

/* =========================
   DTOs
   ========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClinicSummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub plan_id: Option<Uuid>,
    pub plan_code: Option<String>,
    pub credit_balance: i64,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub user_count: i64,
    pub created_at: DateTime<Utc>,
}

const CLINIC_SUMMARY_SELECT: &str = r#"
    SELECT c.id, c.name, c.slug, c.is_active, c.plan_id, p.code AS plan_code,
           c.credit_balance, c.trial_ends_at,
           (SELECT COUNT(*) FROM users u WHERE u.clinic_id = c.id) AS user_count,
           c.created_at
    FROM clinics c
    LEFT JOIN subscription_plans p ON p.id = c.plan_id
"#;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub monthly_price_cents: i64,
    pub max_users: Option<i32>,
    pub max_doctors: Option<i32>,
    pub is_active: bool,
}

const PLAN_COLUMNS: &str = "id, code, name, monthly_price_cents, max_users, max_doctors, is_active";

#[derive(Debug, Deserialize)]
pub struct FirstAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateClinicRequest {
    pub name: String,
    pub slug: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub plan_code: Option<String>,
    pub trial_days: Option<i64>,
    pub utc_offset_minutes: Option<i32>,
    pub working_hours: Option<WorkingHours>,
    pub admin: Option<FirstAdmin>,
}

#[derive(Debug, Serialize)]
pub struct CreatedClinic {
    pub clinic: ClinicSummary,
    pub admin_user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClinicRequest {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub plan_code: Option<Option<String>>,
    pub is_active: Option<bool>,
    /// Added to the balance; negative values deduct.
    pub credit_delta: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub trial_ends_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub code: String,
    pub name: String,
    pub monthly_price_cents: i64,
    pub max_users: Option<i32>,
    pub max_doctors: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub monthly_price_cents: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub max_users: Option<Option<i32>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub max_doctors: Option<Option<i32>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AutomationRequest {
    pub clinic_id: Uuid,
    pub automation_key: String,
    pub enabled: bool,
    pub n8n_workflow_id: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AutomationRow {
    pub clinic_id: Uuid,
    pub automation_key: String,
    pub enabled: bool,
    pub n8n_workflow_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/* =========================
   Validation
   ========================= */

const RESERVED_SLUGS: &[&str] = &[PLATFORM_ROOT, "api", "admin", "login", "home"];

fn validate_slug(raw: &str) -> Result<String, ApiError> {
    let slug = raw.trim().to_lowercase();
    let shape_ok = (3..=48).contains(&slug.len())
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--");
    if !shape_ok {
        return Err(ApiError::validation(
            "Kısa ad 3-48 karakter olmalı; küçük harf, rakam ve tek tire içerebilir",
        ));
    }
    if RESERVED_SLUGS.contains(&slug.as_str()) {
        return Err(ApiError::validation("Bu kısa ad kullanılamaz"));
    }
    Ok(slug)
}

fn validate_key(raw: &str, what: &str) -> Result<String, ApiError> {
    let key = raw.trim().to_lowercase();
    if !(2..=64).contains(&key.len()) || !key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(ApiError::validation(format!(
            "{what} 2-64 karakter olmalı; küçük harf, rakam ve alt çizgi içerebilir"
        )));
    }
    Ok(key)
}

fn validate_limit(limit: Option<i32>) -> Result<Option<i32>, ApiError> {
    match limit {
        Some(n) if n < 1 => Err(ApiError::validation("Limit en az 1 olmalı")),
        other => Ok(other),
    }
}

fn validate_price(cents: i64) -> Result<i64, ApiError> {
    if cents < 0 {
        return Err(ApiError::validation("Fiyat negatif olamaz"));
    }
    Ok(cents)
}

/// UTC offsets in use stay within -12:00..+14:00.
fn validate_offset(minutes: i32) -> Result<i32, ApiError> {
    if !(-12 * 60..=14 * 60).contains(&minutes) {
        return Err(ApiError::validation("Saat dilimi farkı geçersiz"));
    }
    Ok(minutes)
}

/// New balance after a platform adjustment; never below zero.
fn apply_credit_delta(balance: i64, delta: Option<i64>) -> Result<i64, ApiError> {
    balance
        .checked_add(delta.unwrap_or(0))
        .filter(|b| *b >= 0)
        .ok_or_else(|| ApiError::validation("Kredi bakiyesi negatife düşemez"))
}

async fn plan_id_by_code(state: &AppState, code: &str) -> Result<Uuid, ApiError> {
    sqlx::query_scalar("SELECT id FROM subscription_plans WHERE code = $1")
        .bind(code.trim().to_lowercase())
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Paket"))
}

async fn fetch_clinic(state: &AppState, clinic_id: Uuid) -> Result<ClinicSummary, ApiError> {
    sqlx::query_as::<_, ClinicSummary>(&format!("{CLINIC_SUMMARY_SELECT} WHERE c.id = $1"))
        .bind(clinic_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Klinik"))
}

/* =========================
   Clinics
   ========================= */

pub async fn list_clinics(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ClinicSummary>>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;
    let clinics: Vec<ClinicSummary> =
        sqlx::query_as::<_, ClinicSummary>(&format!("{CLINIC_SUMMARY_SELECT} ORDER BY c.created_at DESC"))
            .fetch_all(&state.db)
            .await?;
    Ok(Json(ApiOk::new(clinics)))
}

pub async fn create_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateClinicRequest>,
) -> Result<Json<ApiOk<CreatedClinic>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;

    let name = clean(Some(req.name.as_str())).ok_or_else(|| ApiError::validation("Klinik adı zorunludur"))?;
    let slug = validate_slug(&req.slug)?;
    let working_hours = req.working_hours.unwrap_or_default();
    validate_working_hours(&working_hours)?;
    let utc_offset_minutes = validate_offset(req.utc_offset_minutes.unwrap_or(180))?;
    let trial_ends_at = match req.trial_days {
        Some(d) if !(1..=365).contains(&d) => {
            return Err(ApiError::validation("Deneme süresi 1 ile 365 gün arasında olmalı"));
        }
        Some(d) => Some(Utc::now() + Duration::days(d)),
        None => None,
    };
    let admin = match &req.admin {
        Some(a) => {
            validate_new_password(&a.password, None)?;
            let admin_name = clean(Some(a.name.as_str())).ok_or_else(|| ApiError::validation("Yönetici adı zorunludur"))?;
            Some((admin_name, validate_email(&a.email)?, hash_password(&a.password)?))
        }
        None => None,
    };
    let plan_id = match req.plan_code.as_deref() {
        Some(code) => Some(plan_id_by_code(&state, code).await?),
        None => None,
    };

    let mut tx = state.db.begin().await?;
    let clinic_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO clinics (name, slug, phone, email, address, working_hours, plan_id, trial_ends_at, utc_offset_minutes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(&name)
    .bind(&slug)
    .bind(clean(req.phone.as_deref()))
    .bind(clean(req.email.as_deref()))
    .bind(clean(req.address.as_deref()))
    .bind(DbJson(&working_hours))
    .bind(plan_id)
    .bind(trial_ends_at)
    .bind(utc_offset_minutes)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(..) => ApiError::Conflict("SLUG_TAKEN", "Bu kısa ad başka bir klinikte kullanılıyor".into()),
        other => other,
    })?;

    let admin_user_id = match admin {
        Some((admin_name, email, password_hash)) => {
            let id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO users (clinic_id, name, email, password_hash, role)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(clinic_id)
            .bind(&admin_name)
            .bind(&email)
            .bind(&password_hash)
            .bind(Role::Admin)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match ApiError::from(e) {
                ApiError::Conflict(..) => ApiError::Conflict("EMAIL_TAKEN", "Bu e-posta adresi zaten kayıtlı".into()),
                other => other,
            })?;
            Some(id)
        }
        None => None,
    };
    tx.commit().await?;

    tracing::info!(%clinic_id, %slug, actor = %auth.user_id, "clinic created");
    Ok(Json(ApiOk::new(CreatedClinic {
        clinic: fetch_clinic(&state, clinic_id).await?,
        admin_user_id,
    })))
}

pub async fn update_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(clinic_id): Path<Uuid>,
    Json(req): Json<UpdateClinicRequest>,
) -> Result<Json<ApiOk<ClinicSummary>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;
    let requested_plan = match req.plan_code.as_ref() {
        Some(Some(code)) => Some(Some(plan_id_by_code(&state, code).await?)),
        Some(None) => Some(None),
        None => None,
    };

    let mut tx = state.db.begin().await?;
    // Row lock: concurrent adjustments apply one after the other.
    let (was_active, balance, current_plan, current_trial): (bool, i64, Option<Uuid>, Option<DateTime<Utc>>) =
        sqlx::query_as(
            "SELECT is_active, credit_balance, plan_id, trial_ends_at FROM clinics WHERE id = $1 FOR UPDATE",
        )
        .bind(clinic_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Klinik"))?;
    let plan_id = requested_plan.unwrap_or(current_plan);
    let trial_ends_at = req.trial_ends_at.unwrap_or(current_trial);
    let is_active = req.is_active.unwrap_or(was_active);
    let credit_balance = apply_credit_delta(balance, req.credit_delta)?;

    sqlx::query(
        r#"
        UPDATE clinics
        SET plan_id = $2, is_active = $3, credit_balance = $4, trial_ends_at = $5
        WHERE id = $1
        "#,
    )
    .bind(clinic_id)
    .bind(plan_id)
    .bind(is_active)
    .bind(credit_balance)
    .bind(trial_ends_at)
    .execute(&mut *tx)
    .await?;

    if was_active && !is_active {
        let user_ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE clinic_id = $1")
            .bind(clinic_id)
            .fetch_all(&mut *tx)
            .await?;
        for user_id in user_ids {
            sessions::revoke_user_sessions(&mut *tx, user_id, None, REVOKE_REASON_LOGOUT).await?;
        }
    }
    tx.commit().await?;

    tracing::info!(%clinic_id, is_active, credit_balance, actor = %auth.user_id, "clinic updated by platform");
    Ok(Json(ApiOk::new(fetch_clinic(&state, clinic_id).await?)))
}

pub async fn set_automation(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<AutomationRequest>,
) -> Result<Json<ApiOk<AutomationRow>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;
    let key = validate_key(&req.automation_key, "Otomasyon anahtarı")?;

    let row: AutomationRow = sqlx::query_as::<_, AutomationRow>(
        r#"
        INSERT INTO clinic_automations (clinic_id, automation_key, enabled, n8n_workflow_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (clinic_id, automation_key) DO UPDATE
        SET enabled = EXCLUDED.enabled,
            n8n_workflow_id = COALESCE(EXCLUDED.n8n_workflow_id, clinic_automations.n8n_workflow_id),
            updated_at = now()
        RETURNING clinic_id, automation_key, enabled, n8n_workflow_id, updated_at
        "#,
    )
    .bind(req.clinic_id)
    .bind(&key)
    .bind(req.enabled)
    .bind(clean(req.n8n_workflow_id.as_deref()))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(clinic_id = %req.clinic_id, %key, enabled = req.enabled, "automation toggled");
    Ok(Json(ApiOk::new(row)))
}

/* =========================
   Plans
   ========================= */

pub async fn list_plans(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<PlanRow>>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;
    let plans: Vec<PlanRow> = sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {PLAN_COLUMNS} FROM subscription_plans ORDER BY monthly_price_cents, code"
    ))
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiOk::new(plans)))
}

pub async fn create_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePlanRequest>,
) -> Result<Json<ApiOk<PlanRow>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;
    let code = validate_key(&req.code, "Paket kodu")?;
    let name = clean(Some(req.name.as_str())).ok_or_else(|| ApiError::validation("Paket adı zorunludur"))?;

    let plan: PlanRow = sqlx::query_as::<_, PlanRow>(&format!(
        r#"
        INSERT INTO subscription_plans (code, name, monthly_price_cents, max_users, max_doctors)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {PLAN_COLUMNS}
        "#
    ))
    .bind(&code)
    .bind(&name)
    .bind(validate_price(req.monthly_price_cents)?)
    .bind(validate_limit(req.max_users)?)
    .bind(validate_limit(req.max_doctors)?)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(ApiOk::new(plan)))
}

pub async fn update_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_id): Path<Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<Json<ApiOk<PlanRow>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;
    let existing: PlanRow = sqlx::query_as::<_, PlanRow>(&format!(
        "SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = $1"
    ))
    .bind(plan_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Paket"))?;

    let name = match req.name.as_deref() {
        Some(n) => clean(Some(n)).ok_or_else(|| ApiError::validation("Paket adı zorunludur"))?,
        None => existing.name,
    };
    let price = match req.monthly_price_cents {
        Some(p) => validate_price(p)?,
        None => existing.monthly_price_cents,
    };
    let max_users = match req.max_users {
        Some(m) => validate_limit(m)?,
        None => existing.max_users,
    };
    let max_doctors = match req.max_doctors {
        Some(m) => validate_limit(m)?,
        None => existing.max_doctors,
    };

    let plan: PlanRow = sqlx::query_as::<_, PlanRow>(&format!(
        r#"
        UPDATE subscription_plans
        SET name = $2, monthly_price_cents = $3, max_users = $4, max_doctors = $5, is_active = $6
        WHERE id = $1
        RETURNING {PLAN_COLUMNS}
        "#
    ))
    .bind(plan_id)
    .bind(&name)
    .bind(price)
    .bind(max_users)
    .bind(max_doctors)
    .bind(req.is_active.unwrap_or(existing.is_active))
    .fetch_one(&state.db)
    .await?;

    Ok(Json(ApiOk::new(plan)))
}

/* =========================
   n8n
   ========================= */

pub async fn list_workflows(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<WorkflowSummary>>>, ApiError> {
    authorize(&auth, Capability::ManagePlatform)?;
    let directory = state.workflows.as_ref().ok_or_else(|| {
        ApiError::Unavailable("N8N_NOT_CONFIGURED", "Otomasyon sunucusu yapılandırılmamış".into())
    })?;

    let workflows = directory.list_workflows().await.map_err(|e| {
        tracing::warn!(error = %e, "n8n workflow listing failed");
        ApiError::Unavailable("N8N_UNAVAILABLE", "Otomasyon sunucusuna ulaşılamadı".into())
    })?;
    Ok(Json(ApiOk::new(workflows)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert_eq!(validate_slug(" Gulus-Dis ").unwrap(), "gulus-dis");
        assert!(validate_slug("ab").is_err());
        assert!(validate_slug("-gulus").is_err());
        assert!(validate_slug("gulus--dis").is_err());
        assert!(validate_slug("güluş").is_err());
        assert!(validate_slug("platform").is_err());
    }

    #[test]
    fn keys_and_limits() {
        assert_eq!(validate_key("Appointment_Reminder", "x").unwrap(), "appointment_reminder");
        assert!(validate_key("a", "x").is_err());
        assert!(validate_key("with space", "x").is_err());
        assert_eq!(validate_limit(None).unwrap(), None);
        assert!(validate_limit(Some(0)).is_err());
        assert!(validate_price(-1).is_err());
    }

    #[test]
    fn credit_adjustments_apply_to_the_locked_balance() {
        // two adjustments in sequence on the same row: +50 then -30
        let after_first = apply_credit_delta(100, Some(50)).unwrap();
        assert_eq!(apply_credit_delta(after_first, Some(-30)).unwrap(), 120);
        assert_eq!(apply_credit_delta(100, None).unwrap(), 100);
        assert_eq!(apply_credit_delta(30, Some(-30)).unwrap(), 0);
        assert!(apply_credit_delta(30, Some(-31)).is_err());
        assert!(apply_credit_delta(i64::MAX, Some(1)).is_err());
    }

    #[test]
    fn offsets() {
        assert_eq!(validate_offset(180).unwrap(), 180);
        assert!(validate_offset(15 * 60).is_err());
    }
}
