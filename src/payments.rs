// src/payments.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{PaymentMethod, PaymentStatus};

impl PaymentStatus {
    /// planned -> partial | paid | cancelled, partial -> paid | cancelled.
    /// Paid and cancelled rows are closed.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        self == next
            || matches!(
                (self, next),
                (Planned, Partial) | (Planned, Paid) | (Planned, Cancelled) | (Partial, Paid) | (Partial, Cancelled)
            )
    }

    pub fn is_open(self) -> bool {
        matches!(self, PaymentStatus::Planned | PaymentStatus::Partial)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentPlanRequest {
    pub appointment_id: Option<Uuid>,
    pub amount_cents: Option<i64>,
    pub due_date: Option<NaiveDate>,
    pub method: Option<PaymentMethod>,
    pub status: Option<PaymentStatus>,
    pub note: Option<String>,
}

#[derive(Debug, PartialEq)]
pub struct PaymentPlan {
    pub appointment_id: Uuid,
    pub amount_cents: i64,
    pub due_date: NaiveDate,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub note: Option<String>,
}

/// Largest single payment line accepted (10 million TRY in kuruş).
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000;

pub fn validate_amount(amount_cents: i64) -> Result<i64, ApiError> {
    if amount_cents <= 0 {
        return Err(ApiError::validation("Tutar sıfırdan büyük olmalı"));
    }
    if amount_cents > MAX_AMOUNT_CENTS {
        return Err(ApiError::validation("Tutar çok yüksek"));
    }
    Ok(amount_cents)
}

/// A plan needs an appointment, a positive amount and a due date; without an
/// appointment the request is never submitted.
pub fn validate_plan(req: CreatePaymentPlanRequest) -> Result<PaymentPlan, ApiError> {
    let appointment_id = req.appointment_id.ok_or_else(|| {
        ApiError::BadRequest("APPOINTMENT_REQUIRED", "Ödeme planı için randevu seçmelisiniz".into())
    })?;
    let amount_cents = validate_amount(
        req.amount_cents
            .ok_or_else(|| ApiError::validation("Tutar girilmeli"))?,
    )?;
    let due_date = req
        .due_date
        .ok_or_else(|| ApiError::validation("Vade tarihi girilmeli"))?;

    let status = req.status.unwrap_or(PaymentStatus::Planned);
    if status == PaymentStatus::Cancelled {
        return Err(ApiError::validation("İptal durumunda ödeme oluşturulamaz"));
    }

    Ok(PaymentPlan {
        appointment_id,
        amount_cents,
        due_date,
        method: req.method.unwrap_or(PaymentMethod::Cash),
        status,
        note: crate::models::clean(req.note.as_deref()),
    })
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentRow {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub due_date: NaiveDate,
    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
    pub note: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct LedgerSummary {
    pub count: u32,
    pub planned_cents: i64,
    pub partial_cents: i64,
    pub paid_cents: i64,
    pub cancelled_cents: i64,
    pub overdue_count: u32,
    pub overdue_cents: i64,
}

pub fn summarize(rows: &[PaymentRow], today: NaiveDate) -> LedgerSummary {
    rows.iter().fold(LedgerSummary::default(), |mut s, p| {
        s.count += 1;
        match p.status {
            PaymentStatus::Planned => s.planned_cents += p.amount_cents,
            PaymentStatus::Partial => s.partial_cents += p.amount_cents,
            PaymentStatus::Paid => s.paid_cents += p.amount_cents,
            PaymentStatus::Cancelled => s.cancelled_cents += p.amount_cents,
        }
        if p.status.is_open() && p.due_date < today {
            s.overdue_count += 1;
            s.overdue_cents += p.amount_cents;
        }
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, d).unwrap()
    }

    fn req() -> CreatePaymentPlanRequest {
        CreatePaymentPlanRequest {
            appointment_id: Some(Uuid::new_v4()),
            amount_cents: Some(150_000),
            due_date: Some(date(30)),
            method: None,
            status: None,
            note: Some("  ".into()),
        }
    }

    #[test]
    fn plan_defaults() {
        let plan = validate_plan(req()).unwrap();
        assert_eq!(plan.status, Planned);
        assert_eq!(plan.method, PaymentMethod::Cash);
        assert_eq!(plan.note, None);
    }

    #[test]
    fn plan_requires_appointment_first() {
        let err = validate_plan(CreatePaymentPlanRequest { appointment_id: None, amount_cents: None, ..req() }).unwrap_err();
        assert_eq!(err.code(), "APPOINTMENT_REQUIRED");
    }

    #[test]
    fn plan_requires_positive_amount_and_due_date() {
        assert!(validate_plan(CreatePaymentPlanRequest { amount_cents: Some(0), ..req() }).is_err());
        assert!(validate_plan(CreatePaymentPlanRequest { amount_cents: Some(-5), ..req() }).is_err());
        assert!(validate_plan(CreatePaymentPlanRequest { amount_cents: None, ..req() }).is_err());
        assert!(validate_plan(CreatePaymentPlanRequest { due_date: None, ..req() }).is_err());
        assert!(validate_plan(CreatePaymentPlanRequest { status: Some(Cancelled), ..req() }).is_err());
    }

    #[test]
    fn transitions() {
        assert!(Planned.can_transition_to(Partial));
        assert!(Planned.can_transition_to(Paid));
        assert!(Partial.can_transition_to(Paid));
        assert!(Partial.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Planned));
        assert!(!Cancelled.can_transition_to(Paid));
        assert!(!Partial.can_transition_to(Planned));
    }

    fn row(cents: i64, status: PaymentStatus, due: u32) -> PaymentRow {
        PaymentRow {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            amount_cents: cents,
            method: PaymentMethod::Card,
            status,
            due_date: date(due),
            paid_at: None,
            note: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn ledger_summary() {
        let rows = vec![row(100, Planned, 1), row(200, Partial, 20), row(300, Paid, 1), row(400, Cancelled, 1)];
        let s = summarize(&rows, date(10));
        assert_eq!(s.count, 4);
        assert_eq!((s.planned_cents, s.partial_cents, s.paid_cents, s.cancelled_cents), (100, 200, 300, 400));
        assert_eq!((s.overdue_count, s.overdue_cents), (1, 100));
    }
}
