// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{clean, deserialize_double_option, validate_email, ApiOk, AppState},
    patients::{
        self, HistoryAppointment, HistoryPayment, HistorySummary, NewPatient, PatientInput, PhoneLookup,
    },
    permissions::{authorize, Capability},
    routes::clinic_routes::load_settings,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(search_patients).post(create_patient))
        .route("/patients/lookup", get(lookup_by_phone))
        .route("/patients/{patient_id}", get(get_patient).patch(update_patient))
        .route("/patients/{patient_id}/history", get(get_history))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PatientRow {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub national_id: Option<String>,
    pub medical_alert: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

const PATIENT_COLUMNS: &str = "id, name, phone, email, birth_date, national_id, medical_alert, notes, created_at";

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PatientPage {
    pub patients: Vec<PatientRow>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub phone: String,
}

#[derive(Debug, Serialize)]
pub struct UpsertedPatient {
    pub patient: PatientRow,
    /// False when the phone already belonged to a patient of this clinic.
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePatientRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub birth_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub national_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub medical_alert: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct PatientHistory {
    pub patient: PatientRow,
    pub appointments: Vec<HistoryAppointment>,
    /// Absent for roles without access to payments.
    pub payments: Option<Vec<HistoryPayment>>,
    pub summary: HistorySummary,
}

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;
pub const MAX_PAGE: i64 = 100_000;

/// `(page, per_page, offset)`, clamped so the offset cannot overflow.
fn page_bounds(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page, (page - 1) * per_page)
}

/// `%term%` with LIKE metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

/// Digits of a search term when it looks like part of a phone number.
fn phone_fragment(term: &str) -> Option<String> {
    let digits: String = term.chars().filter(char::is_ascii_digit).collect();
    let only_phone_chars = term.chars().all(|c| c.is_ascii_digit() || " +-().".contains(c));
    let national = digits.trim_start_matches("90").trim_start_matches('0');
    (only_phone_chars && national.len() >= 3).then(|| national.to_string())
}

/// Insert or reuse the clinic's patient with this phone. Returns the id and
/// whether a row was created. Gaps in an existing record are filled, nothing
/// is overwritten.
pub async fn upsert_patient(
    conn: &mut PgConnection,
    clinic_id: Uuid,
    p: &NewPatient,
) -> Result<(Uuid, bool), ApiError> {
    let (id, created): (Uuid, bool) = sqlx::query_as(
        r#"
        INSERT INTO patients (clinic_id, name, phone, email, birth_date, national_id, medical_alert, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (clinic_id, phone) DO UPDATE
        SET email         = COALESCE(patients.email, EXCLUDED.email),
            birth_date    = COALESCE(patients.birth_date, EXCLUDED.birth_date),
            national_id   = COALESCE(patients.national_id, EXCLUDED.national_id),
            medical_alert = COALESCE(patients.medical_alert, EXCLUDED.medical_alert)
        RETURNING id, (xmax = 0) AS created
        "#,
    )
    .bind(clinic_id)
    .bind(&p.name)
    .bind(&p.phone)
    .bind(&p.email)
    .bind(p.birth_date)
    .bind(&p.national_id)
    .bind(&p.medical_alert)
    .bind(&p.notes)
    .fetch_one(&mut *conn)
    .await?;

    if created {
        tracing::debug!(%clinic_id, patient_id = %id, "patient created");
    }
    Ok((id, created))
}

async fn fetch_patient(state: &AppState, clinic_id: Uuid, patient_id: Uuid) -> Result<PatientRow, ApiError> {
    sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1 AND clinic_id = $2"
    ))
    .bind(patient_id)
    .bind(clinic_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Hasta"))
}

/* =========================
   Handlers
   ========================= */

pub async fn search_patients(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<PatientPage>>, ApiError> {
    authorize(&auth, Capability::ViewPatients)?;
    let clinic_id = auth.require_clinic()?;
    let (page, per_page, offset) = page_bounds(q.page, q.per_page);

    let term = clean(q.query.as_deref());
    let name_like = term.as_deref().map(like_pattern);
    let phone_like = term.as_deref().and_then(phone_fragment).map(|d| like_pattern(&d));

    const FILTER: &str = r#"
        WHERE clinic_id = $1
          AND ($2::text IS NULL
               OR name ILIKE $2
               OR national_id = $4
               OR ($3::text IS NOT NULL AND phone LIKE $3))
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM patients {FILTER}"))
        .bind(clinic_id)
        .bind(&name_like)
        .bind(&phone_like)
        .bind(&term)
        .fetch_one(&state.db)
        .await?;

    let patients: Vec<PatientRow> = sqlx::query_as::<_, PatientRow>(&format!(
        "SELECT {PATIENT_COLUMNS} FROM patients {FILTER} ORDER BY name, created_at LIMIT $5 OFFSET $6"
    ))
    .bind(clinic_id)
    .bind(&name_like)
    .bind(&phone_like)
    .bind(&term)
    .bind(per_page)
    .bind(offset)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ApiOk::new(PatientPage {
        patients,
        total,
        page,
        per_page,
    })))
}

pub async fn lookup_by_phone(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<LookupQuery>,
) -> Result<Json<ApiOk<PhoneLookup>>, ApiError> {
    authorize(&auth, Capability::ViewPatients)?;
    let clinic_id = auth.require_clinic()?;
    let phone = patients::normalize_phone(&q.phone)?;

    let existing: Option<(Uuid, String)> =
        sqlx::query_as("SELECT id, name FROM patients WHERE clinic_id = $1 AND phone = $2")
            .bind(clinic_id)
            .bind(&phone)
            .fetch_optional(&state.db)
            .await?;

    Ok(Json(ApiOk::new(PhoneLookup::from_match(phone, existing))))
}

pub async fn create_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<PatientInput>,
) -> Result<Json<ApiOk<UpsertedPatient>>, ApiError> {
    authorize(&auth, Capability::ManagePatients)?;
    let clinic_id = auth.require_clinic()?;
    let settings = load_settings(&state, clinic_id).await?;
    let patient = patients::validate_patient(req, settings.now().date())?;

    let mut conn = state.db.acquire().await?;
    let (patient_id, created) = upsert_patient(&mut conn, clinic_id, &patient).await?;
    drop(conn);

    Ok(Json(ApiOk::new(UpsertedPatient {
        patient: fetch_patient(&state, clinic_id, patient_id).await?,
        created,
    })))
}

pub async fn get_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    authorize(&auth, Capability::ViewPatients)?;
    let clinic_id = auth.require_clinic()?;
    Ok(Json(ApiOk::new(fetch_patient(&state, clinic_id, patient_id).await?)))
}

pub async fn update_patient(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<ApiOk<PatientRow>>, ApiError> {
    authorize(&auth, Capability::ManagePatients)?;
    let clinic_id = auth.require_clinic()?;
    let existing = fetch_patient(&state, clinic_id, patient_id).await?;
    let today = load_settings(&state, clinic_id).await?.now().date();

    let name = match req.name.as_deref() {
        Some(n) => patients::validate_patient_name(n)?,
        None => existing.name,
    };
    let phone = match req.phone.as_deref() {
        Some(p) => patients::normalize_phone(p)?,
        None => existing.phone,
    };
    let email = match req.email {
        Some(e) => clean(e.as_deref()).map(|e| validate_email(&e)).transpose()?,
        None => existing.email,
    };
    let birth_date = match req.birth_date {
        Some(d) => d.map(|d| patients::validate_birth_date(d, today)).transpose()?,
        None => existing.birth_date,
    };
    let national_id = match req.national_id {
        Some(id) => clean(id.as_deref())
            .map(|id| patients::validate_national_id(&id))
            .transpose()?,
        None => existing.national_id,
    };
    let medical_alert = match req.medical_alert {
        Some(m) => clean(m.as_deref()),
        None => existing.medical_alert,
    };
    let notes = match req.notes {
        Some(n) => clean(n.as_deref()),
        None => existing.notes,
    };

    let updated: PatientRow = sqlx::query_as::<_, PatientRow>(&format!(
        r#"
        UPDATE patients
        SET name = $3, phone = $4, email = $5, birth_date = $6,
            national_id = $7, medical_alert = $8, notes = $9
        WHERE id = $1 AND clinic_id = $2
        RETURNING {PATIENT_COLUMNS}
        "#
    ))
    .bind(patient_id)
    .bind(clinic_id)
    .bind(&name)
    .bind(&phone)
    .bind(&email)
    .bind(birth_date)
    .bind(&national_id)
    .bind(&medical_alert)
    .bind(&notes)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(..) => ApiError::Conflict(
            "PHONE_TAKEN",
            "Bu telefon numarası başka bir hastaya kayıtlı".into(),
        ),
        other => other,
    })?;

    Ok(Json(ApiOk::new(updated)))
}

pub async fn get_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<PatientHistory>>, ApiError> {
    authorize(&auth, Capability::ViewPatients)?;
    let clinic_id = auth.require_clinic()?;
    let patient = fetch_patient(&state, clinic_id, patient_id).await?;
    let settings = load_settings(&state, clinic_id).await?;

    let appointments: Vec<HistoryAppointment> = sqlx::query_as::<_, HistoryAppointment>(
        r#"
        SELECT id, doctor_id, start_at, end_at, status, treatment_type, doctor_note
        FROM appointments
        WHERE clinic_id = $1 AND patient_id = $2
        ORDER BY start_at DESC
        "#,
    )
    .bind(clinic_id)
    .bind(patient_id)
    .fetch_all(&state.db)
    .await?;

    let payments = if auth.role.can(Capability::ViewPayments) {
        let rows: Vec<HistoryPayment> = sqlx::query_as::<_, HistoryPayment>(
            r#"
            SELECT id, appointment_id, amount_cents, status, due_date
            FROM payments
            WHERE clinic_id = $1 AND patient_id = $2
            ORDER BY due_date DESC
            "#,
        )
        .bind(clinic_id)
        .bind(patient_id)
        .fetch_all(&state.db)
        .await?;
        Some(rows)
    } else {
        None
    };

    let summary = patients::summarize_history(
        &appointments,
        payments.as_deref().unwrap_or_default(),
        settings.now(),
    );

    Ok(Json(ApiOk::new(PatientHistory {
        patient,
        appointments,
        payments,
        summary,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_clamped() {
        assert_eq!(page_bounds(None, None), (1, DEFAULT_PER_PAGE, 0));
        assert_eq!(page_bounds(Some(0), Some(1_000)), (1, MAX_PER_PAGE, 0));
        assert_eq!(page_bounds(Some(3), Some(0)), (3, 1, 2));
        assert_eq!(page_bounds(Some(i64::MIN), None), (1, DEFAULT_PER_PAGE, 0));
        let (page, per_page, offset) = page_bounds(Some(i64::MAX), Some(i64::MAX));
        assert_eq!((page, per_page), (MAX_PAGE, MAX_PER_PAGE));
        assert_eq!(offset, (MAX_PAGE - 1) * MAX_PER_PAGE);
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(like_pattern("ali"), "%ali%");
        assert_eq!(like_pattern("50%_a\\b"), "%50\\%\\_a\\\\b%");
    }

    #[test]
    fn phone_fragments() {
        assert_eq!(phone_fragment("0532 123").as_deref(), Some("532123"));
        assert_eq!(phone_fragment("+90 532").as_deref(), Some("532"));
        assert_eq!(phone_fragment("Ali 532"), None);
        assert_eq!(phone_fragment("12"), None);
        assert_eq!(phone_fragment("000"), None);
    }
}
