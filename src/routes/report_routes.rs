// src/routes/report_routes.rs

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState},
    permissions::{authorize, Capability},
    reporting::{self, Period, Report, ReportAppointment, ReportPayment, ReportWindow},
    routes::clinic_routes::load_settings,
    scheduling::ensure_supported_date,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/reports", get(get_report))
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub period: Option<Period>,
    pub date: Option<NaiveDate>,
}

/// An explicit `from`/`to` range wins over `period`; with neither the
/// current week is reported.
fn resolve_window(q: &ReportQuery, today: NaiveDate) -> Result<ReportWindow, ApiError> {
    let window = match (q.from, q.to) {
        (Some(from), Some(to)) => ReportWindow { from, to },
        (Some(_), None) | (None, Some(_)) => {
            return Err(ApiError::validation("Başlangıç ve bitiş tarihi birlikte verilmeli"));
        }
        (None, None) => ReportWindow::for_period(q.period.unwrap_or(Period::Week), q.date.unwrap_or(today)),
    };

    ensure_supported_date(window.from)?;
    ensure_supported_date(window.to)?;
    if window.to < window.from {
        return Err(ApiError::validation("Bitiş tarihi başlangıçtan önce olamaz"));
    }
    if window.len_days() > reporting::MAX_WINDOW_DAYS {
        return Err(ApiError::validation(format!(
            "Rapor aralığı en fazla {} gün olabilir",
            reporting::MAX_WINDOW_DAYS
        )));
    }
    Ok(window)
}

pub async fn get_report(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ReportQuery>,
) -> Result<Json<ApiOk<Report>>, ApiError> {
    authorize(&auth, Capability::ViewReports)?;
    let clinic_id = auth.require_clinic()?;
    let settings = load_settings(&state, clinic_id).await?;
    let window = resolve_window(&q, settings.now().date())?;

    let start = window.from.and_time(NaiveTime::MIN);
    let end = window.to.and_time(NaiveTime::MIN) + Duration::days(1);

    let appointments: Vec<ReportAppointment> = sqlx::query_as::<_, ReportAppointment>(
        r#"
        SELECT id, patient_id, doctor_id, start_at, status, channel
        FROM appointments
        WHERE clinic_id = $1 AND start_at >= $2 AND start_at < $3
        "#,
    )
    .bind(clinic_id)
    .bind(start)
    .bind(end)
    .fetch_all(&state.db)
    .await?;

    let payments: Vec<ReportPayment> = sqlx::query_as::<_, ReportPayment>(
        r#"
        SELECT amount_cents, status, method
        FROM payments
        WHERE clinic_id = $1 AND due_date BETWEEN $2 AND $3
        "#,
    )
    .bind(clinic_id)
    .bind(window.from)
    .bind(window.to)
    .fetch_all(&state.db)
    .await?;

    let mut patient_ids: Vec<Uuid> = appointments.iter().map(|a| a.patient_id).collect();
    patient_ids.sort_unstable();
    patient_ids.dedup();

    // First record date per patient in clinic wall-clock.
    let patient_created: HashMap<Uuid, NaiveDate> = sqlx::query_as::<_, (Uuid, NaiveDate)>(
        r#"
        SELECT p.id,
               LEAST(
                   (p.created_at AT TIME ZONE 'UTC' + make_interval(mins => c.utc_offset_minutes))::date,
                   COALESCE((SELECT MIN(a.start_at)::date FROM appointments a WHERE a.patient_id = p.id), 'infinity'::date)
               )
        FROM patients p
        JOIN clinics c ON c.id = p.clinic_id
        WHERE p.clinic_id = $1 AND p.id = ANY($2)
        "#,
    )
    .bind(clinic_id)
    .bind(&patient_ids)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .collect();

    let doctor_names: HashMap<Uuid, String> =
        sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM users WHERE clinic_id = $1")
            .bind(clinic_id)
            .fetch_all(&state.db)
            .await?
            .into_iter()
            .collect();

    let report = reporting::aggregate(
        window,
        &appointments,
        &payments,
        &patient_created,
        &doctor_names,
        &settings.working_hours,
    );
    Ok(Json(ApiOk::new(report)))
}
