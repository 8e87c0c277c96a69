// src/routes/clinic_routes.rs

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as DbJson;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{clean, ApiOk, AppState, WorkingHours},
    permissions::{authorize, Capability},
    scheduling,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/clinic", get(get_clinic).patch(update_clinic))
}

/* =========================
   Shared clinic settings
   ========================= */

/// The per-clinic settings the scheduling, calendar and report handlers need.
#[derive(Debug, Clone)]
pub struct ClinicSettings {
    pub working_hours: WorkingHours,
    pub utc_offset_minutes: i32,
}

impl ClinicSettings {
    pub fn now(&self) -> NaiveDateTime {
        scheduling::clinic_now(self.utc_offset_minutes)
    }
}

pub async fn load_settings(state: &AppState, clinic_id: Uuid) -> Result<ClinicSettings, ApiError> {
    let (working_hours, utc_offset_minutes): (DbJson<WorkingHours>, i32) = sqlx::query_as(
        "SELECT working_hours, utc_offset_minutes FROM clinics WHERE id = $1",
    )
    .bind(clinic_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Klinik"))?;

    Ok(ClinicSettings {
        working_hours: working_hours.0,
        utc_offset_minutes,
    })
}

/* =========================
   DTOs
   ========================= */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClinicRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub working_hours: DbJson<WorkingHours>,
    pub utc_offset_minutes: i32,
    pub credit_balance: i64,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub plan_code: Option<String>,
    pub plan_name: Option<String>,
}

const CLINIC_SELECT: &str = r#"
    SELECT c.id, c.name, c.slug, c.phone, c.email, c.address, c.working_hours,
           c.utc_offset_minutes, c.credit_balance, c.trial_ends_at,
           p.code AS plan_code, p.name AS plan_name
    FROM clinics c
    LEFT JOIN subscription_plans p ON p.id = c.plan_id
    WHERE c.id = $1
"#;

#[derive(Debug, Serialize)]
pub struct ClinicContext {
    pub clinic: ClinicRow,
    pub automations: Vec<String>,
    pub capabilities: &'static [Capability],
    pub trial_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClinicRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub working_hours: Option<WorkingHours>,
}

/* =========================
   Validation
   ========================= */

pub fn validate_working_hours(wh: &WorkingHours) -> Result<(), ApiError> {
    const NAMES: [&str; 7] = ["Pazartesi", "Salı", "Çarşamba", "Perşembe", "Cuma", "Cumartesi", "Pazar"];
    for (day, name) in wh.days().into_iter().zip(NAMES) {
        if day.enabled && day.hours() <= 0.0 {
            return Err(ApiError::validation(format!(
                "{name} için çalışma saatleri geçersiz (SS:DD, kapanış açılıştan sonra olmalı)"
            )));
        }
    }
    Ok(())
}

/* =========================
   Handlers
   ========================= */

async fn load_context(state: &AppState, auth: &AuthContext, clinic_id: Uuid) -> Result<ClinicContext, ApiError> {
    let clinic: ClinicRow = sqlx::query_as::<_, ClinicRow>(CLINIC_SELECT)
        .bind(clinic_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Klinik"))?;

    let automations: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT automation_key
        FROM clinic_automations
        WHERE clinic_id = $1 AND enabled
        ORDER BY automation_key
        "#,
    )
    .bind(clinic_id)
    .fetch_all(&state.db)
    .await?;

    let trial_active = clinic.trial_ends_at.is_some_and(|t| t > Utc::now());
    Ok(ClinicContext {
        clinic,
        automations,
        capabilities: auth.role.capabilities(),
        trial_active,
    })
}

pub async fn get_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<ClinicContext>>, ApiError> {
    let clinic_id = auth.require_clinic()?;
    Ok(Json(ApiOk::new(load_context(&state, &auth, clinic_id).await?)))
}

pub async fn update_clinic(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateClinicRequest>,
) -> Result<Json<ApiOk<ClinicContext>>, ApiError> {
    authorize(&auth, Capability::ManageClinicSettings)?;
    let clinic_id = auth.require_clinic()?;

    let name = match req.name.as_deref().map(str::trim) {
        Some("") => return Err(ApiError::validation("Klinik adı boş olamaz")),
        Some(n) if n.chars().count() > 128 => {
            return Err(ApiError::validation("Klinik adı en fazla 128 karakter olabilir"));
        }
        other => other.map(str::to_string),
    };
    if let Some(wh) = &req.working_hours {
        validate_working_hours(wh)?;
    }

    // Contact fields: absent keeps, empty string clears.
    sqlx::query(
        r#"
        UPDATE clinics
        SET name          = COALESCE($2, name),
            phone         = CASE WHEN $3::text IS NULL THEN phone ELSE NULLIF($3, '') END,
            email         = CASE WHEN $4::text IS NULL THEN email ELSE NULLIF($4, '') END,
            address       = CASE WHEN $5::text IS NULL THEN address ELSE NULLIF($5, '') END,
            working_hours = COALESCE($6, working_hours)
        WHERE id = $1
        "#,
    )
    .bind(clinic_id)
    .bind(name)
    .bind(req.phone.as_deref().map(|p| clean(Some(p)).unwrap_or_default()))
    .bind(req.email.as_deref().map(|e| clean(Some(e)).unwrap_or_default()))
    .bind(req.address.as_deref().map(|a| clean(Some(a)).unwrap_or_default()))
    .bind(req.working_hours.map(DbJson))
    .execute(&state.db)
    .await?;

    tracing::info!(%clinic_id, actor = %auth.user_id, "clinic settings updated");
    Ok(Json(ApiOk::new(load_context(&state, &auth, clinic_id).await?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DayHours;

    #[test]
    fn default_hours_are_valid() {
        assert!(validate_working_hours(&WorkingHours::default()).is_ok());
    }

    #[test]
    fn enabled_day_needs_sane_range() {
        let mut wh = WorkingHours::default();
        wh.tuesday = DayHours { open: "18:00".into(), close: "09:00".into(), enabled: true };
        let err = validate_working_hours(&wh).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_, ref m) if m.starts_with("Salı")));

        wh.tuesday.enabled = false;
        assert!(validate_working_hours(&wh).is_ok());
    }
}
