// src/routes/appointment_routes.rs

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    calendar::{self, CalendarOptions, CalendarRow, CalendarView},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{clean, deserialize_double_option, ApiOk, AppState, AppointmentStatus, Channel, OkData},
    patients::{self, PatientInput},
    permissions::{authorize, Capability, Role},
    routes::{clinic_routes::load_settings, patient_routes::upsert_patient},
    scheduling::{self, ConflictWarning, Slot},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/treatments", get(list_treatments))
        .route("/appointments/calendar", get(get_calendar))
        .route("/appointments/conflicts", post(check_conflicts))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).patch(update_appointment).delete(delete_appointment),
        )
        .route("/appointments/{appointment_id}/status", post(set_status))
}

/* ============================================================
   Rows and DTOs
   ============================================================ */

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub patient_phone: String,
    pub doctor_id: Option<Uuid>,
    pub doctor_name: Option<String>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub channel: Channel,
    pub treatment_type: Option<String>,
    pub patient_note: Option<String>,
    pub doctor_note: Option<String>,
    pub reminder_minutes_before: Option<i32>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT a.id, a.patient_id, p.name AS patient_name, p.phone AS patient_phone,
           a.doctor_id, d.name AS doctor_name,
           a.start_at, a.end_at, a.duration_minutes, a.status, a.channel,
           a.treatment_type, a.patient_note, a.doctor_note,
           a.reminder_minutes_before, a.tags, a.created_at, a.updated_at
    FROM appointments a
    JOIN patients p ON p.id = a.patient_id
    LEFT JOIN users d ON d.id = a.doctor_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct SlotRow {
    id: Uuid,
    doctor_id: Option<Uuid>,
    start_at: NaiveDateTime,
    end_at: NaiveDateTime,
    status: AppointmentStatus,
}

impl From<SlotRow> for Slot {
    fn from(r: SlotRow) -> Self {
        Slot {
            id: Some(r.id),
            doctor_id: r.doctor_id,
            start: r.start_at,
            end: r.end_at,
            status: r.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SavedAppointment {
    pub appointment: AppointmentRow,
    /// Advisory only; the save already happened.
    pub conflict_warning: Option<ConflictWarning>,
    /// Set when an inline new patient was inserted rather than matched by phone.
    pub patient_created: bool,
}

#[derive(Debug, Serialize)]
pub struct TreatmentOption {
    pub name: &'static str,
    pub duration_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Option<Uuid>,
    pub new_patient: Option<PatientInput>,
    pub doctor_id: Option<Uuid>,
    pub start_at: NaiveDateTime,
    pub duration_minutes: Option<i32>,
    pub treatment_type: Option<String>,
    pub status: Option<AppointmentStatus>,
    /// "IPTAL" marks a past appointment as cancelled.
    pub result: Option<String>,
    pub channel: Option<Channel>,
    pub patient_note: Option<String>,
    pub doctor_note: Option<String>,
    pub reminder_minutes_before: Option<i32>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub doctor_id: Option<Option<Uuid>>,
    pub start_at: Option<NaiveDateTime>,
    pub duration_minutes: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub treatment_type: Option<Option<String>>,
    pub status: Option<AppointmentStatus>,
    pub result: Option<String>,
    pub channel: Option<Channel>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub patient_note: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub doctor_note: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub reminder_minutes_before: Option<Option<i32>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckRequest {
    pub doctor_id: Option<Uuid>,
    pub start_at: NaiveDateTime,
    pub duration_minutes: Option<i32>,
    pub treatment_type: Option<String>,
    /// The appointment being edited, so it does not collide with itself.
    pub appointment_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ConflictCheck {
    pub duration_minutes: u32,
    pub end_at: NaiveDateTime,
    pub conflict_warning: Option<ConflictWarning>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub start: NaiveDate,
    pub days: Option<u32>,
    pub doctor_id: Option<Uuid>,
    pub row_height: Option<f64>,
}

pub const MAX_LIST_DAYS: i64 = 31;
pub const MAX_CALENDAR_DAYS: u32 = 7;

/* ============================================================
   Helpers
   ============================================================ */

fn day_bounds(from: NaiveDate, days: i64) -> (NaiveDateTime, NaiveDateTime) {
    let start = from.and_time(NaiveTime::MIN);
    (start, start + Duration::days(days))
}

fn validate_calendar_query(q: &CalendarQuery) -> Result<(u32, f64), ApiError> {
    scheduling::ensure_supported_date(q.start)?;
    let days = q.days.unwrap_or(MAX_CALENDAR_DAYS);
    if !(1..=MAX_CALENDAR_DAYS).contains(&days) {
        return Err(ApiError::validation("Gün sayısı 1 ile 7 arasında olmalı"));
    }
    let row_height = q.row_height.unwrap_or(calendar::DEFAULT_ROW_HEIGHT_PX);
    if !(16.0..=240.0).contains(&row_height) {
        return Err(ApiError::validation("Satır yüksekliği 16 ile 240 piksel arasında olmalı"));
    }
    Ok((days, row_height))
}

async fn fetch_appointment(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    appointment_id: Uuid,
) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!("{APPOINTMENT_SELECT} WHERE a.id = $1 AND a.clinic_id = $2"))
        .bind(appointment_id)
        .bind(clinic_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| ApiError::not_found("Randevu"))
}

/// The doctor must be an active treating doctor of this clinic.
async fn ensure_doctor(conn: &mut PgConnection, clinic_id: Uuid, doctor_id: Uuid) -> Result<(), ApiError> {
    let role: Option<Role> = sqlx::query_scalar(
        "SELECT role FROM users WHERE id = $1 AND clinic_id = $2 AND is_active",
    )
    .bind(doctor_id)
    .bind(clinic_id)
    .fetch_optional(&mut *conn)
    .await?;

    match role {
        Some(r) if r.is_doctor() => Ok(()),
        Some(_) => Err(ApiError::validation("Seçilen kullanıcı doktor değil")),
        None => Err(ApiError::validation("Doktor bulunamadı")),
    }
}

/// Overlapping live appointments of the candidate's doctor on its day.
async fn detect_conflicts(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    candidate: &Slot,
) -> Result<Option<ConflictWarning>, ApiError> {
    let Some(doctor_id) = candidate.doctor_id else {
        return Ok(None);
    };
    let (day_start, day_end) = day_bounds(candidate.start.date(), 1);

    let rows: Vec<SlotRow> = sqlx::query_as::<_, SlotRow>(
        r#"
        SELECT id, doctor_id, start_at, end_at, status
        FROM appointments
        WHERE clinic_id = $1
          AND doctor_id = $2
          AND start_at >= $3 AND start_at < $4
        "#,
    )
    .bind(clinic_id)
    .bind(doctor_id)
    .bind(day_start)
    .bind(day_end)
    .fetch_all(&mut *conn)
    .await?;

    let existing: Vec<Slot> = rows.into_iter().map(Slot::from).collect();
    let warning = scheduling::conflict_warning(scheduling::find_conflicts(candidate, &existing));
    if let Some(w) = &warning {
        tracing::info!(
            %clinic_id,
            %doctor_id,
            conflicts = w.conflicting_appointment_ids.len(),
            "appointment overlaps doctor's schedule"
        );
    }
    Ok(warning)
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn list_treatments(auth: AuthContext) -> Result<Json<ApiOk<Vec<TreatmentOption>>>, ApiError> {
    authorize(&auth, Capability::ViewAppointments)?;
    let options = scheduling::TREATMENT_DURATIONS
        .iter()
        .map(|&(name, duration_minutes)| TreatmentOption { name, duration_minutes })
        .collect();
    Ok(Json(ApiOk::new(options)))
}

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    authorize(&auth, Capability::ViewAppointments)?;
    let clinic_id = auth.require_clinic()?;

    let today = load_settings(&state, clinic_id).await?.now().date();
    let from = scheduling::ensure_supported_date(q.from.unwrap_or(today))?;
    let to = scheduling::ensure_supported_date(q.to.unwrap_or(from))?;
    let days = (to - from).num_days() + 1;
    if !(1..=MAX_LIST_DAYS).contains(&days) {
        return Err(ApiError::validation("Tarih aralığı 1 ile 31 gün arasında olmalı"));
    }
    let (start, end) = day_bounds(from, days);

    let rows: Vec<AppointmentRow> = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        {APPOINTMENT_SELECT}
        WHERE a.clinic_id = $1
          AND a.start_at >= $2 AND a.start_at < $3
          AND ($4::uuid IS NULL OR a.doctor_id = $4)
          AND ($5::uuid IS NULL OR a.patient_id = $5)
          AND ($6::text IS NULL OR a.status = $6)
        ORDER BY a.start_at, a.id
        "#
    ))
    .bind(clinic_id)
    .bind(start)
    .bind(end)
    .bind(q.doctor_id)
    .bind(q.patient_id)
    .bind(q.status)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiOk::new(rows)))
}

pub async fn get_calendar(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<ApiOk<CalendarView>>, ApiError> {
    authorize(&auth, Capability::ViewAppointments)?;
    let clinic_id = auth.require_clinic()?;
    let (days, row_height_px) = validate_calendar_query(&q)?;
    let settings = load_settings(&state, clinic_id).await?;

    let (start, end) = day_bounds(q.start, i64::from(days));
    let rows: Vec<CalendarRow> = sqlx::query_as::<_, CalendarRow>(
        r#"
        SELECT id, patient_id, doctor_id, start_at, end_at, status, channel, treatment_type, patient_note
        FROM appointments
        WHERE clinic_id = $1
          AND start_at >= $2 AND start_at < $3
          AND ($4::uuid IS NULL OR doctor_id = $4)
        ORDER BY start_at
        "#,
    )
    .bind(clinic_id)
    .bind(start)
    .bind(end)
    .bind(q.doctor_id)
    .fetch_all(&state.db)
    .await?;

    let mut patient_ids: Vec<Uuid> = rows.iter().map(|r| r.patient_id).collect();
    patient_ids.sort_unstable();
    patient_ids.dedup();
    let mut doctor_ids: Vec<Uuid> = rows.iter().filter_map(|r| r.doctor_id).collect();
    doctor_ids.sort_unstable();
    doctor_ids.dedup();

    let patient_names: HashMap<Uuid, String> =
        sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM patients WHERE clinic_id = $1 AND id = ANY($2)")
            .bind(clinic_id)
            .bind(&patient_ids)
            .fetch_all(&state.db)
            .await?
            .into_iter()
            .collect();
    let doctor_names: HashMap<Uuid, String> =
        sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM users WHERE clinic_id = $1 AND id = ANY($2)")
            .bind(clinic_id)
            .bind(&doctor_ids)
            .fetch_all(&state.db)
            .await?
            .into_iter()
            .collect();

    let (h, m) = calendar::DEFAULT_GRID_START;
    let grid_start = settings
        .working_hours
        .earliest_open()
        .or_else(|| NaiveTime::from_hms_opt(h, m, 0))
        .unwrap_or(NaiveTime::MIN);

    let view = calendar::build_calendar(
        &rows,
        &patient_names,
        &doctor_names,
        &CalendarOptions {
            start: q.start,
            days,
            grid_start,
            row_height_px,
        },
    );
    Ok(Json(ApiOk::new(view)))
}

pub async fn check_conflicts(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ConflictCheckRequest>,
) -> Result<Json<ApiOk<ConflictCheck>>, ApiError> {
    authorize(&auth, Capability::ViewAppointments)?;
    let clinic_id = auth.require_clinic()?;

    let duration_minutes = scheduling::resolve_duration(req.treatment_type.as_deref(), req.duration_minutes);
    let end_at = scheduling::compute_end(req.start_at, duration_minutes)?;
    let candidate = Slot {
        id: req.appointment_id,
        doctor_id: req.doctor_id,
        start: req.start_at,
        end: end_at,
        status: AppointmentStatus::Pending,
    };

    let mut conn = state.db.acquire().await?;
    let conflict_warning = detect_conflicts(&mut conn, clinic_id, &candidate).await?;

    Ok(Json(ApiOk::new(ConflictCheck {
        duration_minutes,
        end_at,
        conflict_warning,
    })))
}

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiOk<SavedAppointment>>, ApiError> {
    authorize(&auth, Capability::ManageAppointments)?;
    let clinic_id = auth.require_clinic()?;
    let settings = load_settings(&state, clinic_id).await?;
    let now = settings.now();

    // Everything is validated before the first write.
    let new_patient = match (req.patient_id, req.new_patient) {
        (Some(_), Some(_)) => {
            return Err(ApiError::validation("Mevcut hasta veya yeni hasta bilgisinden yalnızca biri gönderilmeli"));
        }
        (None, None) => return Err(ApiError::validation("Randevu için hasta seçilmeli")),
        (Some(_), None) => None,
        (None, Some(input)) => {
            if !auth.role.can(Capability::ManagePatients) {
                return Err(ApiError::forbidden());
            }
            Some(patients::validate_patient(input, now.date())?)
        }
    };
    let requested = scheduling::requested_status(req.status)?;
    let reminder = scheduling::validate_reminder(req.reminder_minutes_before)?;
    let tags = scheduling::clean_tags(req.tags.unwrap_or_default())?;
    let treatment_type = clean(req.treatment_type.as_deref());

    let duration = scheduling::resolve_duration(treatment_type.as_deref(), req.duration_minutes);
    let end_at = scheduling::compute_end(req.start_at, duration)?;
    let status = scheduling::derive_status(end_at, now, requested, req.result.as_deref());

    let mut tx = state.db.begin().await?;

    let (patient_id, patient_created) = match (req.patient_id, &new_patient) {
        (_, Some(p)) => upsert_patient(&mut tx, clinic_id, p).await?,
        (Some(id), None) => {
            let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM patients WHERE id = $1 AND clinic_id = $2")
                .bind(id)
                .bind(clinic_id)
                .fetch_optional(&mut *tx)
                .await?;
            (exists.ok_or_else(|| ApiError::not_found("Hasta"))?, false)
        }
        (None, None) => return Err(ApiError::validation("Randevu için hasta seçilmeli")),
    };

    if let Some(doctor_id) = req.doctor_id {
        ensure_doctor(&mut tx, clinic_id, doctor_id).await?;
    }

    let candidate = Slot {
        id: None,
        doctor_id: req.doctor_id,
        start: req.start_at,
        end: end_at,
        status,
    };
    let conflict_warning = if status == AppointmentStatus::Cancelled {
        None
    } else {
        detect_conflicts(&mut tx, clinic_id, &candidate).await?
    };

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointments
            (clinic_id, patient_id, doctor_id, start_at, end_at, duration_minutes, status, channel,
             treatment_type, patient_note, doctor_note, reminder_minutes_before, tags, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING id
        "#,
    )
    .bind(clinic_id)
    .bind(patient_id)
    .bind(req.doctor_id)
    .bind(req.start_at)
    .bind(end_at)
    .bind(duration as i32)
    .bind(status)
    .bind(req.channel.unwrap_or(Channel::Phone))
    .bind(&treatment_type)
    .bind(clean(req.patient_note.as_deref()))
    .bind(clean(req.doctor_note.as_deref()))
    .bind(reminder)
    .bind(&tags)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;

    let appointment = fetch_appointment(&mut tx, clinic_id, appointment_id).await?;
    tx.commit().await?;

    if status != requested {
        tracing::info!(%appointment_id, ?requested, ?status, "status derived from end time");
    }

    Ok(Json(ApiOk::new(SavedAppointment {
        appointment,
        conflict_warning,
        patient_created,
    })))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    authorize(&auth, Capability::ViewAppointments)?;
    let clinic_id = auth.require_clinic()?;
    let mut conn = state.db.acquire().await?;
    Ok(Json(ApiOk::new(fetch_appointment(&mut conn, clinic_id, appointment_id).await?)))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<SavedAppointment>>, ApiError> {
    authorize(&auth, Capability::ManageAppointments)?;
    let clinic_id = auth.require_clinic()?;
    let now = load_settings(&state, clinic_id).await?.now();

    let requested = req.status.map(|s| scheduling::requested_status(Some(s))).transpose()?;
    let tags = req.tags.map(scheduling::clean_tags).transpose()?;
    let reminder = req
        .reminder_minutes_before
        .map(scheduling::validate_reminder)
        .transpose()?;

    let mut tx = state.db.begin().await?;
    let existing = fetch_appointment(&mut tx, clinic_id, appointment_id).await?;

    let doctor_id = req.doctor_id.unwrap_or(existing.doctor_id);
    if let Some(d) = doctor_id.filter(|d| Some(*d) != existing.doctor_id) {
        ensure_doctor(&mut tx, clinic_id, d).await?;
    }

    let new_treatment = req.treatment_type.as_ref().map(|t| clean(t.as_deref()));
    let treatment_type = new_treatment.clone().unwrap_or_else(|| existing.treatment_type.clone());
    let duration = scheduling::next_duration(
        existing.treatment_type.as_deref(),
        existing.duration_minutes,
        new_treatment.as_ref().and_then(|t| t.as_deref()),
        req.duration_minutes,
    );
    let start_at = req.start_at.unwrap_or(existing.start_at);
    let end_at = scheduling::compute_end(start_at, duration)?;

    let status = scheduling::status_on_save(end_at, now, requested, existing.status, req.result.as_deref());
    if status != existing.status {
        tracing::info!(%appointment_id, from = ?existing.status, to = ?status, "status re-derived on edit");
    }

    let candidate = Slot {
        id: Some(appointment_id),
        doctor_id,
        start: start_at,
        end: end_at,
        status,
    };
    let conflict_warning = if status == AppointmentStatus::Cancelled {
        None
    } else {
        detect_conflicts(&mut tx, clinic_id, &candidate).await?
    };

    sqlx::query(
        r#"
        UPDATE appointments
        SET doctor_id = $3, start_at = $4, end_at = $5, duration_minutes = $6, status = $7,
            channel = $8, treatment_type = $9, patient_note = $10, doctor_note = $11,
            reminder_minutes_before = $12, tags = $13, updated_at = now()
        WHERE id = $1 AND clinic_id = $2
        "#,
    )
    .bind(appointment_id)
    .bind(clinic_id)
    .bind(doctor_id)
    .bind(start_at)
    .bind(end_at)
    .bind(duration as i32)
    .bind(status)
    .bind(req.channel.unwrap_or(existing.channel))
    .bind(&treatment_type)
    .bind(match req.patient_note {
        Some(n) => clean(n.as_deref()),
        None => existing.patient_note.clone(),
    })
    .bind(match req.doctor_note {
        Some(n) => clean(n.as_deref()),
        None => existing.doctor_note.clone(),
    })
    .bind(reminder.unwrap_or(existing.reminder_minutes_before))
    .bind(tags.unwrap_or_else(|| existing.tags.clone()))
    .execute(&mut *tx)
    .await?;

    let appointment = fetch_appointment(&mut tx, clinic_id, appointment_id).await?;
    tx.commit().await?;

    Ok(Json(ApiOk::new(SavedAppointment {
        appointment,
        conflict_warning,
        patient_created: false,
    })))
}

pub async fn set_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    authorize(&auth, Capability::ManageAppointments)?;
    let clinic_id = auth.require_clinic()?;
    let now = load_settings(&state, clinic_id).await?.now();

    let mut conn = state.db.acquire().await?;
    let existing = fetch_appointment(&mut conn, clinic_id, appointment_id).await?;
    scheduling::validate_manual_status(existing.start_at, now, req.status)?;

    sqlx::query("UPDATE appointments SET status = $3, updated_at = now() WHERE id = $1 AND clinic_id = $2")
        .bind(appointment_id)
        .bind(clinic_id)
        .bind(req.status)
        .execute(&mut *conn)
        .await?;

    tracing::info!(%appointment_id, from = ?existing.status, to = ?req.status, "appointment status changed");
    Ok(Json(ApiOk::new(fetch_appointment(&mut conn, clinic_id, appointment_id).await?)))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    authorize(&auth, Capability::ManageAppointments)?;
    let clinic_id = auth.require_clinic()?;

    let payments: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE appointment_id = $1 AND clinic_id = $2")
            .bind(appointment_id)
            .bind(clinic_id)
            .fetch_one(&state.db)
            .await?;
    if payments > 0 {
        return Err(ApiError::Conflict(
            "HAS_PAYMENTS",
            "Ödeme planı bulunan randevu silinemez, iptal edebilirsiniz".into(),
        ));
    }

    let res = sqlx::query("DELETE FROM appointments WHERE id = $1 AND clinic_id = $2")
        .bind(appointment_id)
        .bind(clinic_id)
        .execute(&state.db)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("Randevu"));
    }

    tracing::info!(%appointment_id, actor = %auth.user_id, "appointment deleted");
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(days: Option<u32>, row_height: Option<f64>) -> CalendarQuery {
        CalendarQuery {
            start: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            days,
            doctor_id: None,
            row_height,
        }
    }

    #[test]
    fn calendar_window_limits() {
        assert_eq!(validate_calendar_query(&query(None, None)).unwrap(), (7, calendar::DEFAULT_ROW_HEIGHT_PX));
        assert_eq!(validate_calendar_query(&query(Some(1), Some(48.0))).unwrap(), (1, 48.0));
        assert!(validate_calendar_query(&query(Some(0), None)).is_err());
        assert!(validate_calendar_query(&query(Some(8), None)).is_err());
        assert!(validate_calendar_query(&query(None, Some(4.0))).is_err());

        let mut far = query(None, None);
        far.start = NaiveDate::MAX;
        assert_eq!(validate_calendar_query(&far).unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[test]
    fn day_bounds_cover_whole_days() {
        let (start, end) = day_bounds(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 2);
        assert_eq!(start.to_string(), "2025-03-10 00:00:00");
        assert_eq!(end.to_string(), "2025-03-12 00:00:00");
    }

    #[test]
    fn create_request_accepts_inline_patient() {
        let req: CreateAppointmentRequest = serde_json::from_value(serde_json::json!({
            "new_patient": { "name": "Ali Veli", "phone": "0532 123 45 67" },
            "doctor_id": null,
            "start_at": "2025-03-10T09:30:00",
            "treatment_type": "Dolgu",
            "channel": "whatsapp",
            "tags": ["acil"]
        }))
        .unwrap();
        assert!(req.patient_id.is_none());
        assert_eq!(req.new_patient.unwrap().phone, "0532 123 45 67");
        assert_eq!(req.channel, Some(Channel::Whatsapp));
    }

    #[test]
    fn update_request_tells_unassign_from_untouched() {
        let unassign: UpdateAppointmentRequest = serde_json::from_str(r#"{"doctor_id": null}"#).unwrap();
        assert_eq!(unassign.doctor_id, Some(None));
        let untouched: UpdateAppointmentRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(untouched.doctor_id, None);
    }
}
