// src/patients.rs

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AppointmentStatus, PaymentStatus};

/// Normalise a Turkish phone number to its 10-digit national form
/// (`5321234567`). Accepts spaces, dashes, dots, parentheses and the
/// `+90`, `0090`, `90` or `0` prefixes.
pub fn normalize_phone(raw: &str) -> Result<String, ApiError> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    let digits = compact
        .strip_prefix('+')
        .or_else(|| compact.strip_prefix("00"))
        .unwrap_or(&compact);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::validation("Telefon numarası yalnızca rakam içermeli"));
    }

    let national = match digits.len() {
        12 if digits.starts_with("90") => &digits[2..],
        11 if digits.starts_with('0') => &digits[1..],
        10 => digits,
        _ => {
            return Err(ApiError::validation(
                "Telefon numarası 10 haneli olmalı (ör. 532 123 45 67)",
            ));
        }
    };

    if national.starts_with('0') {
        return Err(ApiError::validation("Geçersiz telefon numarası"));
    }
    Ok(national.to_string())
}

/// Answer of a phone lookup before creating an appointment.
#[derive(Debug, Serialize, PartialEq)]
pub struct PhoneLookup {
    pub phone: String,
    pub found: bool,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub is_new_patient: bool,
}

impl PhoneLookup {
    pub fn from_match(phone: String, existing: Option<(Uuid, String)>) -> Self {
        match existing {
            Some((id, name)) => Self {
                phone,
                found: true,
                patient_id: Some(id),
                patient_name: Some(name),
                is_new_patient: false,
            },
            None => Self {
                phone,
                found: false,
                patient_id: None,
                patient_name: None,
                is_new_patient: true,
            },
        }
    }
}

pub fn validate_national_id(raw: &str) -> Result<String, ApiError> {
    let id = raw.trim();
    if id.len() != 11 || !id.chars().all(|c| c.is_ascii_digit()) || id.starts_with('0') {
        return Err(ApiError::validation("T.C. kimlik numarası 11 haneli olmalı"));
    }
    Ok(id.to_string())
}

#[derive(Debug, Deserialize)]
pub struct PatientInput {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub national_id: Option<String>,
    pub medical_alert: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPatient {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub national_id: Option<String>,
    pub medical_alert: Option<String>,
    pub notes: Option<String>,
}

pub fn validate_patient_name(raw: &str) -> Result<String, ApiError> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.chars().count() < 2 {
        return Err(ApiError::validation("Hasta adı en az 2 karakter olmalı"));
    }
    Ok(name)
}

pub fn validate_birth_date(date: NaiveDate, today: NaiveDate) -> Result<NaiveDate, ApiError> {
    crate::scheduling::ensure_supported_date(date)?;
    if date > today {
        return Err(ApiError::validation("Doğum tarihi gelecekte olamaz"));
    }
    Ok(date)
}

pub fn validate_patient(input: PatientInput, today: NaiveDate) -> Result<NewPatient, ApiError> {
    Ok(NewPatient {
        name: validate_patient_name(&input.name)?,
        phone: normalize_phone(&input.phone)?,
        email: crate::models::clean(input.email.as_deref())
            .map(|e| crate::models::validate_email(&e))
            .transpose()?,
        birth_date: input.birth_date.map(|d| validate_birth_date(d, today)).transpose()?,
        national_id: crate::models::clean(input.national_id.as_deref())
            .map(|id| validate_national_id(&id))
            .transpose()?,
        medical_alert: crate::models::clean(input.medical_alert.as_deref()),
        notes: crate::models::clean(input.notes.as_deref()),
    })
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryAppointment {
    pub id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub treatment_type: Option<String>,
    pub doctor_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HistoryPayment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub due_date: NaiveDate,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct HistorySummary {
    pub total_appointments: u32,
    pub completed_visits: u32,
    pub no_shows: u32,
    pub cancelled: u32,
    pub upcoming: u32,
    pub first_visit_at: Option<NaiveDateTime>,
    pub last_visit_at: Option<NaiveDateTime>,
    pub billed_cents: i64,
    pub paid_cents: i64,
    pub outstanding_cents: i64,
    pub overdue_payments: u32,
}

pub fn summarize_history(
    appointments: &[HistoryAppointment],
    payments: &[HistoryPayment],
    now: NaiveDateTime,
) -> HistorySummary {
    let mut s = HistorySummary::default();

    for a in appointments {
        s.total_appointments += 1;
        match a.status {
            AppointmentStatus::Completed => {
                s.completed_visits += 1;
                s.first_visit_at = Some(s.first_visit_at.map_or(a.start_at, |f| f.min(a.start_at)));
                s.last_visit_at = Some(s.last_visit_at.map_or(a.start_at, |l| l.max(a.start_at)));
            }
            AppointmentStatus::NoShow => s.no_shows += 1,
            AppointmentStatus::Cancelled => s.cancelled += 1,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed if a.start_at >= now => s.upcoming += 1,
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => {}
        }
    }

    let today = now.date();
    for p in payments {
        match p.status {
            PaymentStatus::Cancelled => {}
            PaymentStatus::Paid => {
                s.billed_cents += p.amount_cents;
                s.paid_cents += p.amount_cents;
            }
            PaymentStatus::Planned | PaymentStatus::Partial => {
                s.billed_cents += p.amount_cents;
                s.outstanding_cents += p.amount_cents;
                if p.due_date < today {
                    s.overdue_payments += 1;
                }
            }
        }
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_formats_normalise_to_national() {
        for raw in ["0532 123 45 67", "+90 (532) 123-45-67", "905321234567", "5321234567", "0090.532.123.45.67"] {
            assert_eq!(normalize_phone(raw).unwrap(), "5321234567", "{raw}");
        }
    }

    #[test]
    fn bad_phones_are_rejected() {
        for raw in ["", "abc", "532123", "05321234567890", "+1 555 0100", "00 000 000 00"] {
            assert!(normalize_phone(raw).is_err(), "{raw}");
        }
    }

    #[test]
    fn lookup_flags_new_patient_only_without_match() {
        let id = Uuid::new_v4();
        let hit = PhoneLookup::from_match("5321234567".into(), Some((id, "Ali Veli".into())));
        assert!(hit.found);
        assert!(!hit.is_new_patient);
        assert_eq!(hit.patient_id, Some(id));

        let miss = PhoneLookup::from_match("5321234567".into(), None);
        assert!(!miss.found);
        assert!(miss.is_new_patient);
        assert_eq!(miss.patient_id, None);
    }

    #[test]
    fn national_id_shape() {
        assert!(validate_national_id("10000000146").is_ok());
        assert!(validate_national_id("01234567890").is_err());
        assert!(validate_national_id("1234").is_err());
    }

    fn input(name: &str, phone: &str) -> PatientInput {
        PatientInput {
            name: name.into(),
            phone: phone.into(),
            email: Some(" Ali@Example.com ".into()),
            birth_date: None,
            national_id: Some("".into()),
            medical_alert: None,
            notes: Some("  ".into()),
        }
    }

    #[test]
    fn patient_input_is_normalised() {
        let today = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        let p = validate_patient(input("  Ali   Veli ", "0532 123 45 67"), today).unwrap();
        assert_eq!(p.name, "Ali Veli");
        assert_eq!(p.phone, "5321234567");
        assert_eq!(p.email.as_deref(), Some("ali@example.com"));
        assert_eq!(p.national_id, None);
        assert_eq!(p.notes, None);
    }

    #[test]
    fn patient_input_rejections() {
        let today = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        assert!(validate_patient(input("A", "5321234567"), today).is_err());
        assert!(validate_patient(input("Ali Veli", "123"), today).is_err());

        let mut future = input("Ali Veli", "5321234567");
        future.birth_date = NaiveDate::from_ymd_opt(2030, 1, 1);
        assert!(validate_patient(future, today).is_err());

        let mut ancient = input("Ali Veli", "5321234567");
        ancient.birth_date = Some(NaiveDate::MIN);
        assert!(validate_patient(ancient, today).is_err());

        let mut bad_email = input("Ali Veli", "5321234567");
        bad_email.email = Some("ali@".into());
        assert_eq!(validate_patient(bad_email, today).unwrap_err().code(), "VALIDATION_ERROR");

        let mut bad_id = input("Ali Veli", "5321234567");
        bad_id.national_id = Some("123".into());
        assert!(validate_patient(bad_id, today).is_err());
    }

    fn at(month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn visit(start: NaiveDateTime, status: AppointmentStatus) -> HistoryAppointment {
        HistoryAppointment {
            id: Uuid::new_v4(),
            doctor_id: None,
            start_at: start,
            end_at: start + chrono::Duration::minutes(30),
            status,
            treatment_type: None,
            doctor_note: None,
        }
    }

    fn payment(cents: i64, status: PaymentStatus, due: NaiveDateTime) -> HistoryPayment {
        HistoryPayment {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            amount_cents: cents,
            status,
            due_date: due.date(),
        }
    }

    #[test]
    fn history_counts_and_money() {
        use AppointmentStatus::*;
        let now = at(3, 15);
        let appointments = vec![
            visit(at(1, 10), Completed),
            visit(at(2, 10), Completed),
            visit(at(2, 20), NoShow),
            visit(at(3, 1), Cancelled),
            visit(at(3, 20), Confirmed),
            visit(at(3, 10), Pending),
        ];
        let payments = vec![
            payment(200_000, PaymentStatus::Paid, at(1, 10)),
            payment(100_000, PaymentStatus::Planned, at(3, 1)),
            payment(50_000, PaymentStatus::Partial, at(4, 1)),
            payment(75_000, PaymentStatus::Cancelled, at(2, 1)),
        ];

        let s = summarize_history(&appointments, &payments, now);
        assert_eq!(s.total_appointments, 6);
        assert_eq!((s.completed_visits, s.no_shows, s.cancelled, s.upcoming), (2, 1, 1, 1));
        assert_eq!(s.first_visit_at, Some(at(1, 10)));
        assert_eq!(s.last_visit_at, Some(at(2, 10)));
        assert_eq!(s.billed_cents, 350_000);
        assert_eq!(s.paid_cents, 200_000);
        assert_eq!(s.outstanding_cents, 150_000);
        assert_eq!(s.overdue_payments, 1);
    }

    #[test]
    fn empty_history() {
        assert_eq!(summarize_history(&[], &[], at(1, 1)), HistorySummary::default());
    }
}
