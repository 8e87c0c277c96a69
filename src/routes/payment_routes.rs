// src/routes/payment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{clean, deserialize_double_option, ApiOk, AppState, OkData, PaymentMethod, PaymentStatus},
    payments::{self, CreatePaymentPlanRequest, LedgerSummary, PaymentRow},
    permissions::{authorize, Capability},
    routes::clinic_routes::load_settings,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments", get(list_payments).post(create_payment))
        .route("/payments/{payment_id}", patch(update_payment).delete(delete_payment))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PaymentListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub payment: PaymentRow,
    pub patient_name: String,
    pub appointment_start_at: chrono::NaiveDateTime,
}

const PAYMENT_SELECT: &str = r#"
    SELECT pm.id, pm.appointment_id, pm.patient_id, pm.amount_cents, pm.method, pm.status,
           pm.due_date, pm.paid_at, pm.note, pm.created_at,
           p.name AS patient_name, a.start_at AS appointment_start_at
    FROM payments pm
    JOIN patients p ON p.id = pm.patient_id
    JOIN appointments a ON a.id = pm.appointment_id
"#;

#[derive(Debug, Deserialize)]
pub struct PaymentQuery {
    pub status: Option<PaymentStatus>,
    pub patient_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    /// Due-date window, inclusive.
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct PaymentLedger {
    pub payments: Vec<PaymentListItem>,
    pub summary: LedgerSummary,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub status: Option<PaymentStatus>,
    pub amount_cents: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub method: Option<PaymentMethod>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub note: Option<Option<String>>,
}

const LEDGER_LIMIT: i64 = 1000;

/// Amount and due date are frozen once a line is closed.
fn check_update(current: PaymentStatus, req: &UpdatePaymentRequest) -> Result<PaymentStatus, ApiError> {
    let next = req.status.unwrap_or(current);
    if !current.can_transition_to(next) {
        return Err(ApiError::BadRequest(
            "INVALID_TRANSITION",
            "Bu ödeme durumu değiştirilemez".into(),
        ));
    }
    if !current.is_open() && (req.amount_cents.is_some() || req.due_date.is_some()) {
        return Err(ApiError::BadRequest(
            "PAYMENT_CLOSED",
            "Kapanmış ödemenin tutarı veya vadesi değiştirilemez".into(),
        ));
    }
    if let Some(amount) = req.amount_cents {
        payments::validate_amount(amount)?;
    }
    Ok(next)
}

async fn fetch_payment(state: &AppState, clinic_id: Uuid, payment_id: Uuid) -> Result<PaymentListItem, ApiError> {
    sqlx::query_as::<_, PaymentListItem>(&format!("{PAYMENT_SELECT} WHERE pm.id = $1 AND pm.clinic_id = $2"))
        .bind(payment_id)
        .bind(clinic_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Ödeme"))
}

pub async fn list_payments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<PaymentQuery>,
) -> Result<Json<ApiOk<PaymentLedger>>, ApiError> {
    authorize(&auth, Capability::ViewPayments)?;
    let clinic_id = auth.require_clinic()?;
    if let (Some(from), Some(to)) = (q.from, q.to) {
        if to < from {
            return Err(ApiError::validation("Bitiş tarihi başlangıçtan önce olamaz"));
        }
    }
    let today = load_settings(&state, clinic_id).await?.now().date();

    let items: Vec<PaymentListItem> = sqlx::query_as::<_, PaymentListItem>(&format!(
        r#"
        {PAYMENT_SELECT}
        WHERE pm.clinic_id = $1
          AND ($2::text IS NULL OR pm.status = $2)
          AND ($3::uuid IS NULL OR pm.patient_id = $3)
          AND ($4::uuid IS NULL OR pm.appointment_id = $4)
          AND ($5::date IS NULL OR pm.due_date >= $5)
          AND ($6::date IS NULL OR pm.due_date <= $6)
        ORDER BY pm.due_date, pm.created_at
        LIMIT $7
        "#
    ))
    .bind(clinic_id)
    .bind(q.status)
    .bind(q.patient_id)
    .bind(q.appointment_id)
    .bind(q.from)
    .bind(q.to)
    .bind(LEDGER_LIMIT)
    .fetch_all(&state.db)
    .await?;

    let rows: Vec<PaymentRow> = items.iter().map(|i| i.payment.clone()).collect();
    let summary = payments::summarize(&rows, today);

    Ok(Json(ApiOk::new(PaymentLedger { payments: items, summary })))
}

pub async fn create_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePaymentPlanRequest>,
) -> Result<Json<ApiOk<PaymentListItem>>, ApiError> {
    authorize(&auth, Capability::ManagePayments)?;
    let clinic_id = auth.require_clinic()?;
    let plan = payments::validate_plan(req)?;

    let patient_id: Uuid = sqlx::query_scalar("SELECT patient_id FROM appointments WHERE id = $1 AND clinic_id = $2")
        .bind(plan.appointment_id)
        .bind(clinic_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Randevu"))?;

    let payment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO payments (clinic_id, appointment_id, patient_id, amount_cents, method, status, due_date, paid_at, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $6 = 'paid' THEN now() END, $8)
        RETURNING id
        "#,
    )
    .bind(clinic_id)
    .bind(plan.appointment_id)
    .bind(patient_id)
    .bind(plan.amount_cents)
    .bind(plan.method)
    .bind(plan.status)
    .bind(plan.due_date)
    .bind(&plan.note)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(%payment_id, amount_cents = plan.amount_cents, status = ?plan.status, "payment plan created");
    Ok(Json(ApiOk::new(fetch_payment(&state, clinic_id, payment_id).await?)))
}

pub async fn update_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(payment_id): Path<Uuid>,
    Json(req): Json<UpdatePaymentRequest>,
) -> Result<Json<ApiOk<PaymentListItem>>, ApiError> {
    authorize(&auth, Capability::ManagePayments)?;
    let clinic_id = auth.require_clinic()?;
    let existing = fetch_payment(&state, clinic_id, payment_id).await?.payment;
    let next = check_update(existing.status, &req)?;

    let note = match req.note {
        Some(n) => clean(n.as_deref()),
        None => existing.note.clone(),
    };

    sqlx::query(
        r#"
        UPDATE payments
        SET status = $3, amount_cents = $4, due_date = $5, method = $6, note = $7,
            paid_at = CASE
                WHEN $3 = 'paid' AND paid_at IS NULL THEN now()
                WHEN $3 <> 'paid' THEN NULL
                ELSE paid_at
            END
        WHERE id = $1 AND clinic_id = $2
        "#,
    )
    .bind(payment_id)
    .bind(clinic_id)
    .bind(next)
    .bind(req.amount_cents.unwrap_or(existing.amount_cents))
    .bind(req.due_date.unwrap_or(existing.due_date))
    .bind(req.method.unwrap_or(existing.method))
    .bind(&note)
    .execute(&state.db)
    .await?;

    if next != existing.status {
        tracing::info!(%payment_id, from = ?existing.status, to = ?next, "payment status changed");
    }
    Ok(Json(ApiOk::new(fetch_payment(&state, clinic_id, payment_id).await?)))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    authorize(&auth, Capability::ManagePayments)?;
    let clinic_id = auth.require_clinic()?;
    let existing = fetch_payment(&state, clinic_id, payment_id).await?.payment;

    if existing.status == PaymentStatus::Paid {
        return Err(ApiError::Conflict(
            "PAYMENT_CLOSED",
            "Tahsil edilmiş ödeme silinemez".into(),
        ));
    }

    sqlx::query("DELETE FROM payments WHERE id = $1 AND clinic_id = $2")
        .bind(payment_id)
        .bind(clinic_id)
        .execute(&state.db)
        .await?;

    tracing::info!(%payment_id, actor = %auth.user_id, "payment deleted");
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: Option<PaymentStatus>, amount: Option<i64>) -> UpdatePaymentRequest {
        UpdatePaymentRequest {
            status,
            amount_cents: amount,
            due_date: None,
            method: None,
            note: None,
        }
    }

    #[test]
    fn open_lines_can_be_settled() {
        assert_eq!(check_update(PaymentStatus::Planned, &update(Some(PaymentStatus::Paid), None)).unwrap(), PaymentStatus::Paid);
        assert_eq!(check_update(PaymentStatus::Partial, &update(None, Some(5_000))).unwrap(), PaymentStatus::Partial);
    }

    #[test]
    fn closed_lines_are_frozen() {
        let err = check_update(PaymentStatus::Paid, &update(Some(PaymentStatus::Planned), None)).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        let err = check_update(PaymentStatus::Cancelled, &update(None, Some(100))).unwrap_err();
        assert_eq!(err.code(), "PAYMENT_CLOSED");
    }

    #[test]
    fn amount_is_revalidated() {
        assert!(check_update(PaymentStatus::Planned, &update(None, Some(0))).is_err());
    }
}
