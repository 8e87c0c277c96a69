// src/scheduling.rs
//
// Appointment slot rules: treatment durations, end-time computation, per-doctor
// overlap detection and the status forced on save. All functions are pure;
// `routes::appointment_routes` loads the rows and calls into here.
//
// Times are clinic wall-clock (`NaiveDateTime`); the clinic's UTC offset is
// applied once when computing "now".

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::AppointmentStatus;

pub const DEFAULT_DURATION_MINUTES: u32 = 30;
pub const MAX_DURATION_MINUTES: u32 = 8 * 60;

/// Result label that turns a past appointment into a cancellation.
pub const RESULT_CANCELLED: &str = "IPTAL";

pub const TREATMENT_DURATIONS: &[(&str, u32)] = &[
    ("Muayene", 30),
    ("Kontrol", 15),
    ("Dolgu", 45),
    ("Kanal Tedavisi", 60),
    ("Diş Çekimi", 30),
    ("Diş Taşı Temizliği", 30),
    ("İmplant", 90),
    ("Protez", 45),
    ("Ortodonti Kontrol", 20),
    ("Beyazlatma", 60),
    ("Çocuk Diş Hekimliği", 30),
];

pub fn treatment_duration(treatment: &str) -> Option<u32> {
    let wanted = treatment.trim().to_lowercase();
    TREATMENT_DURATIONS
        .iter()
        .find(|(name, _)| name.to_lowercase() == wanted)
        .map(|(_, minutes)| *minutes)
}

fn usable(minutes: Option<i32>) -> Option<u32> {
    minutes
        .and_then(|m| u32::try_from(m).ok())
        .filter(|m| (1..=MAX_DURATION_MINUTES).contains(m))
}

/// Explicit positive duration wins, then the treatment table, then 30 minutes.
pub fn resolve_duration(treatment: Option<&str>, explicit_minutes: Option<i32>) -> u32 {
    usable(explicit_minutes)
        .or_else(|| treatment.and_then(treatment_duration))
        .unwrap_or(DEFAULT_DURATION_MINUTES)
}

/// Duration after an edit. A manually set duration survives until the
/// treatment type changes; a treatment change without an explicit duration
/// falls back to the table.
pub fn next_duration(
    current_treatment: Option<&str>,
    current_minutes: i32,
    new_treatment: Option<&str>,
    new_minutes: Option<i32>,
) -> u32 {
    if let Some(m) = usable(new_minutes) {
        return m;
    }
    let changed = match (current_treatment, new_treatment) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => old.trim() != new.trim(),
    };
    if changed {
        resolve_duration(new_treatment, None)
    } else {
        usable(Some(current_minutes)).unwrap_or(DEFAULT_DURATION_MINUTES)
    }
}

pub fn minutes_since_midnight(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

/// Calendar years accepted from requests. Window arithmetic on these dates
/// stays far from chrono's limits.
pub const MIN_SUPPORTED_YEAR: i32 = 1900;
pub const MAX_SUPPORTED_YEAR: i32 = 9999;

pub fn ensure_supported_date(date: NaiveDate) -> Result<NaiveDate, ApiError> {
    if !(MIN_SUPPORTED_YEAR..=MAX_SUPPORTED_YEAR).contains(&date.year()) {
        return Err(ApiError::validation(format!(
            "Tarih {MIN_SUPPORTED_YEAR} ile {MAX_SUPPORTED_YEAR} yılları arasında olmalı"
        )));
    }
    Ok(date)
}

pub fn compute_end(start: NaiveDateTime, duration_minutes: u32) -> Result<NaiveDateTime, ApiError> {
    ensure_supported_date(start.date())?;
    start
        .checked_add_signed(Duration::minutes(i64::from(duration_minutes)))
        .ok_or_else(|| ApiError::validation("Randevu bitiş saati hesaplanamadı"))
}

/// Half-open `[start, end)` overlap; touching intervals do not overlap.
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && a_end > b_start
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub status: AppointmentStatus,
}

impl Slot {
    /// `[start, end)` in minutes from the start day's midnight.
    fn minute_range(&self) -> (i64, i64) {
        let start = minutes_since_midnight(self.start.time());
        (start, start + (self.end - self.start).num_minutes())
    }
}

/// Ids of rows in `existing` that collide with `candidate`: same doctor, same
/// day, not cancelled, not the candidate itself. Unassigned appointments never
/// conflict.
pub fn find_conflicts(candidate: &Slot, existing: &[Slot]) -> Vec<Uuid> {
    let Some(doctor) = candidate.doctor_id else {
        return vec![];
    };
    let (start, end) = candidate.minute_range();

    existing
        .iter()
        .filter(|other| other.doctor_id == Some(doctor))
        .filter(|other| other.start.date() == candidate.start.date())
        .filter(|other| other.status != AppointmentStatus::Cancelled)
        .filter(|other| candidate.id.is_none() || other.id != candidate.id)
        .filter(|other| {
            let (o_start, o_end) = other.minute_range();
            intervals_overlap(start, end, o_start, o_end)
        })
        .filter_map(|other| other.id)
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConflictWarning {
    pub message: String,
    pub conflicting_appointment_ids: Vec<Uuid>,
}

pub fn conflict_warning(conflicting: Vec<Uuid>) -> Option<ConflictWarning> {
    if conflicting.is_empty() {
        return None;
    }
    Some(ConflictWarning {
        message: format!(
            "Bu doktorun seçilen saat aralığında {} başka randevusu var",
            conflicting.len()
        ),
        conflicting_appointment_ids: conflicting,
    })
}

/// Status persisted on save. A past appointment is completed unless the
/// operator's result says `IPTAL`; a future one keeps the requested status.
pub fn derive_status(
    end: NaiveDateTime,
    now: NaiveDateTime,
    requested: AppointmentStatus,
    result: Option<&str>,
) -> AppointmentStatus {
    if end < now {
        match result.map(|r| r.trim().to_uppercase()) {
            Some(r) if r == RESULT_CANCELLED => AppointmentStatus::Cancelled,
            _ => AppointmentStatus::Completed,
        }
    } else {
        requested
    }
}

/// Status written by an edit. Every save re-applies `derive_status`; when the
/// form sends no status the current one is kept if it is a form status and
/// falls back to pending otherwise. An operator cancellation, or a no-show on
/// a slot that is still past, survives an edit that carries neither a status
/// nor a result.
pub fn status_on_save(
    end: NaiveDateTime,
    now: NaiveDateTime,
    requested: Option<AppointmentStatus>,
    current: AppointmentStatus,
    result: Option<&str>,
) -> AppointmentStatus {
    let has_result = result.is_some_and(|r| !r.trim().is_empty());
    if requested.is_none() && !has_result {
        match current {
            AppointmentStatus::Cancelled => return current,
            AppointmentStatus::NoShow if end < now => return current,
            _ => {}
        }
    }
    let selected = requested.unwrap_or(match current {
        AppointmentStatus::Pending | AppointmentStatus::Confirmed => current,
        _ => AppointmentStatus::Pending,
    });
    derive_status(end, now, selected, result)
}

/// Status the operator may pick on the create / edit form.
pub fn requested_status(status: Option<AppointmentStatus>) -> Result<AppointmentStatus, ApiError> {
    match status.unwrap_or(AppointmentStatus::Pending) {
        s @ (AppointmentStatus::Pending | AppointmentStatus::Confirmed) => Ok(s),
        _ => Err(ApiError::validation("Randevu durumu yalnızca beklemede veya onaylandı seçilebilir")),
    }
}

/// Explicit status change from the appointment detail. Visits cannot be
/// closed as completed or no-show before they start.
pub fn validate_manual_status(
    start: NaiveDateTime,
    now: NaiveDateTime,
    next: AppointmentStatus,
) -> Result<(), ApiError> {
    match next {
        AppointmentStatus::Completed | AppointmentStatus::NoShow if start > now => Err(ApiError::validation(
            "Henüz başlamamış bir randevu tamamlandı veya gelmedi olarak işaretlenemez",
        )),
        _ => Ok(()),
    }
}

pub const MAX_TAGS: usize = 10;

/// Trimmed, de-duplicated tags, first occurrence kept.
pub fn clean_tags(tags: Vec<String>) -> Result<Vec<String>, ApiError> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            continue;
        }
        if tag.chars().count() > 32 {
            return Err(ApiError::validation("Etiketler en fazla 32 karakter olabilir"));
        }
        out.push(tag.to_string());
    }
    if out.len() > MAX_TAGS {
        return Err(ApiError::validation(format!("En fazla {MAX_TAGS} etiket eklenebilir")));
    }
    Ok(out)
}

/// Reminder lead time, at most one week.
pub fn validate_reminder(minutes: Option<i32>) -> Result<Option<i32>, ApiError> {
    match minutes {
        Some(m) if !(0..=7 * 24 * 60).contains(&m) => {
            Err(ApiError::validation("Hatırlatma süresi 0 ile 10080 dakika arasında olmalı"))
        }
        other => Ok(other),
    }
}

/// Current wall-clock time at a clinic `utc_offset_minutes` east of UTC.
pub fn clinic_now(utc_offset_minutes: i32) -> NaiveDateTime {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset).naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn slot(doctor: Option<Uuid>, start: NaiveDateTime, minutes: u32) -> Slot {
        Slot {
            id: Some(Uuid::new_v4()),
            doctor_id: doctor,
            start,
            end: compute_end(start, minutes).unwrap(),
            status: AppointmentStatus::Confirmed,
        }
    }

    #[test]
    fn overlap_is_half_open() {
        assert!(!intervals_overlap(540, 570, 570, 600));
        assert!(!intervals_overlap(570, 600, 540, 570));
        assert!(intervals_overlap(540, 600, 570, 630));
        assert!(intervals_overlap(540, 600, 550, 560));
        assert!(intervals_overlap(550, 560, 540, 600));
    }

    #[test]
    fn adjacent_appointments_do_not_conflict() {
        let doctor = Some(Uuid::new_v4());
        let a = slot(doctor, at(9, 0), 30);
        let b = slot(doctor, at(9, 30), 30);
        assert!(find_conflicts(&b, &[a.clone()]).is_empty());
        assert!(find_conflicts(&a, &[b]).is_empty());
    }

    #[test]
    fn overlapping_same_doctor_conflicts() {
        let doctor = Some(Uuid::new_v4());
        let existing = slot(doctor, at(9, 0), 60);
        let candidate = Slot { id: None, ..slot(doctor, at(9, 45), 30) };
        assert_eq!(find_conflicts(&candidate, &[existing.clone()]), vec![existing.id.unwrap()]);
    }

    #[test]
    fn other_doctor_other_day_and_cancelled_are_ignored() {
        let doctor = Some(Uuid::new_v4());
        let candidate = slot(doctor, at(10, 0), 30);

        let other_doctor = slot(Some(Uuid::new_v4()), at(10, 0), 30);
        let next_day = slot(doctor, at(10, 0) + Duration::days(1), 30);
        let mut cancelled = slot(doctor, at(10, 0), 30);
        cancelled.status = AppointmentStatus::Cancelled;

        assert!(find_conflicts(&candidate, &[other_doctor, next_day, cancelled]).is_empty());
    }

    #[test]
    fn unassigned_doctor_is_exempt() {
        let existing = slot(None, at(9, 0), 60);
        let candidate = slot(None, at(9, 0), 60);
        assert!(find_conflicts(&candidate, &[existing]).is_empty());
    }

    #[test]
    fn editing_does_not_conflict_with_itself() {
        let doctor = Some(Uuid::new_v4());
        let original = slot(doctor, at(11, 0), 30);
        let moved = Slot { start: at(11, 15), end: at(11, 45), ..original.clone() };
        assert!(find_conflicts(&moved, &[original]).is_empty());
    }

    #[test]
    fn treatment_table_and_defaults() {
        assert_eq!(treatment_duration("Kanal Tedavisi"), Some(60));
        assert_eq!(treatment_duration("  dolgu "), Some(45));
        assert_eq!(treatment_duration("Bilinmeyen"), None);

        assert_eq!(resolve_duration(Some("İmplant"), None), 90);
        assert_eq!(resolve_duration(Some("İmplant"), Some(40)), 40);
        assert_eq!(resolve_duration(Some("Bilinmeyen"), None), DEFAULT_DURATION_MINUTES);
        assert_eq!(resolve_duration(None, Some(0)), DEFAULT_DURATION_MINUTES);
        assert_eq!(resolve_duration(None, Some(-15)), DEFAULT_DURATION_MINUTES);
    }

    #[test]
    fn manual_duration_survives_until_treatment_changes() {
        // operator overrode Dolgu (45) to 50 earlier
        assert_eq!(next_duration(Some("Dolgu"), 50, None, None), 50);
        assert_eq!(next_duration(Some("Dolgu"), 50, Some("Dolgu"), None), 50);
        assert_eq!(next_duration(Some("Dolgu"), 50, Some("Kontrol"), None), 15);
        assert_eq!(next_duration(Some("Dolgu"), 50, Some("Kontrol"), Some(25)), 25);
        assert_eq!(next_duration(None, 0, None, None), DEFAULT_DURATION_MINUTES);
    }

    #[test]
    fn end_time_from_duration() {
        assert_eq!(compute_end(at(9, 45), 30).unwrap(), at(10, 15));
        assert_eq!(minutes_since_midnight(at(9, 45).time()), 585);
    }

    #[test]
    fn far_dates_are_rejected_instead_of_overflowing() {
        let far = NaiveDate::MAX.and_hms_opt(23, 59, 0).unwrap();
        let err = compute_end(far, 30).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(compute_end(NaiveDate::MIN.and_hms_opt(0, 0, 0).unwrap(), 30).is_err());

        let last = NaiveDate::from_ymd_opt(MAX_SUPPORTED_YEAR, 12, 31).unwrap();
        assert_eq!(ensure_supported_date(last).unwrap(), last);
        assert!(ensure_supported_date(NaiveDate::from_ymd_opt(10_000, 1, 1).unwrap()).is_err());
        assert!(ensure_supported_date(NaiveDate::from_ymd_opt(1899, 12, 31).unwrap()).is_err());
        assert_eq!(
            compute_end(last.and_hms_opt(23, 50, 0).unwrap(), 30).unwrap(),
            NaiveDate::from_ymd_opt(10_000, 1, 1).unwrap().and_hms_opt(0, 20, 0).unwrap()
        );
    }

    #[test]
    fn every_edit_re_derives_status() {
        let now = at(12, 0);
        let past_end = at(10, 30);
        let future_end = at(15, 0);
        use AppointmentStatus::*;

        // note-only edit of a past pending visit
        assert_eq!(status_on_save(past_end, now, None, Pending, None), Completed);
        // completed visit moved to a future slot
        assert_eq!(status_on_save(future_end, now, None, Completed, None), Pending);
        assert_eq!(status_on_save(future_end, now, None, NoShow, None), Pending);
        assert_eq!(status_on_save(future_end, now, None, Confirmed, None), Confirmed);
        assert_eq!(status_on_save(future_end, now, Some(Confirmed), Pending, None), Confirmed);
        assert_eq!(status_on_save(past_end, now, None, Confirmed, Some("IPTAL")), Cancelled);
    }

    #[test]
    fn operator_closures_survive_plain_edits() {
        let now = at(12, 0);
        use AppointmentStatus::*;
        assert_eq!(status_on_save(at(15, 0), now, None, Cancelled, None), Cancelled);
        assert_eq!(status_on_save(at(10, 30), now, None, Cancelled, None), Cancelled);
        assert_eq!(status_on_save(at(10, 30), now, None, NoShow, Some(" ")), NoShow);
        assert_eq!(status_on_save(at(15, 0), now, Some(Pending), Cancelled, None), Pending);
    }

    #[test]
    fn past_appointment_is_completed_unless_iptal() {
        let now = at(12, 0);
        let end = at(10, 30);
        assert_eq!(derive_status(end, now, AppointmentStatus::Pending, None), AppointmentStatus::Completed);
        assert_eq!(derive_status(end, now, AppointmentStatus::Confirmed, Some("")), AppointmentStatus::Completed);
        assert_eq!(derive_status(end, now, AppointmentStatus::Pending, Some("IPTAL")), AppointmentStatus::Cancelled);
        assert_eq!(derive_status(end, now, AppointmentStatus::Pending, Some(" iptal ")), AppointmentStatus::Cancelled);
    }

    #[test]
    fn future_appointment_keeps_requested_status() {
        let now = at(8, 0);
        let end = at(10, 30);
        assert_eq!(derive_status(end, now, AppointmentStatus::Confirmed, Some("IPTAL")), AppointmentStatus::Confirmed);
        assert_eq!(derive_status(end, now, AppointmentStatus::Pending, None), AppointmentStatus::Pending);
    }

    #[test]
    fn warning_only_when_conflicting() {
        assert_eq!(conflict_warning(vec![]), None);
        let id = Uuid::new_v4();
        let w = conflict_warning(vec![id]).unwrap();
        assert_eq!(w.conflicting_appointment_ids, vec![id]);
    }

    #[test]
    fn form_status_is_pending_or_confirmed() {
        assert_eq!(requested_status(None).unwrap(), AppointmentStatus::Pending);
        assert_eq!(requested_status(Some(AppointmentStatus::Confirmed)).unwrap(), AppointmentStatus::Confirmed);
        assert!(requested_status(Some(AppointmentStatus::NoShow)).is_err());
        assert!(requested_status(Some(AppointmentStatus::Completed)).is_err());
    }

    #[test]
    fn no_show_only_after_start() {
        let now = at(12, 0);
        assert!(validate_manual_status(at(11, 0), now, AppointmentStatus::NoShow).is_ok());
        assert!(validate_manual_status(at(13, 0), now, AppointmentStatus::NoShow).is_err());
        assert!(validate_manual_status(at(13, 0), now, AppointmentStatus::Completed).is_err());
        assert!(validate_manual_status(at(13, 0), now, AppointmentStatus::Cancelled).is_ok());
    }

    #[test]
    fn tags_are_cleaned() {
        let tags = clean_tags(vec![" acil ".into(), "".into(), "ACIL".into(), "sigorta".into()]).unwrap();
        assert_eq!(tags, vec!["acil".to_string(), "sigorta".to_string()]);
        assert!(clean_tags((0..11).map(|i| format!("t{i}")).collect()).is_err());
        assert!(clean_tags(vec!["x".repeat(33)]).is_err());
    }

    #[test]
    fn reminder_bounds() {
        assert_eq!(validate_reminder(None).unwrap(), None);
        assert_eq!(validate_reminder(Some(60)).unwrap(), Some(60));
        assert!(validate_reminder(Some(-1)).is_err());
        assert!(validate_reminder(Some(20_000)).is_err());
    }
}
