// src/calendar.rs
//
// Day/week grid read model. Raw appointment rows plus bulk-loaded names go in,
// view-ready columns with pixel offsets come out. No I/O here.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AppointmentStatus, Channel};
use crate::scheduling::{self, Slot};

pub const DEFAULT_ROW_HEIGHT_PX: f64 = 64.0;
pub const DEFAULT_GRID_START: (u32, u32) = (8, 0);

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CalendarRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub channel: Channel,
    pub treatment_type: Option<String>,
    pub patient_note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CalendarOptions {
    pub start: NaiveDate,
    pub days: u32,
    pub grid_start: NaiveTime,
    pub row_height_px: f64,
}

#[derive(Debug, Serialize)]
pub struct CalendarView {
    pub start: NaiveDate,
    pub grid_start: NaiveTime,
    pub row_height_px: f64,
    pub days: Vec<CalendarDay>,
}

#[derive(Debug, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub events: Vec<CalendarEvent>,
}

#[derive(Debug, Serialize)]
pub struct CalendarEvent {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    pub doctor_id: Option<Uuid>,
    pub doctor_name: Option<String>,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub channel: Channel,
    pub treatment_type: Option<String>,
    pub patient_note: Option<String>,
    pub day_index: usize,
    pub offset_minutes: i64,
    pub top_px: f64,
    pub height_px: f64,
    /// Another live appointment of the same doctor overlaps this one.
    pub double_booked: bool,
}

pub fn px(minutes: i64, row_height_px: f64) -> f64 {
    minutes as f64 / 60.0 * row_height_px
}

pub fn build_calendar(
    rows: &[CalendarRow],
    patient_names: &HashMap<Uuid, String>,
    doctor_names: &HashMap<Uuid, String>,
    opts: &CalendarOptions,
) -> CalendarView {
    let mut days: Vec<CalendarDay> = (0..opts.days)
        .map(|i| CalendarDay {
            date: opts.start + Duration::days(i64::from(i)),
            events: vec![],
        })
        .collect();

    let slots: Vec<Slot> = rows
        .iter()
        .map(|r| Slot {
            id: Some(r.id),
            doctor_id: r.doctor_id,
            start: r.start_at,
            end: r.end_at,
            status: r.status,
        })
        .collect();

    let grid_start_minutes = scheduling::minutes_since_midnight(opts.grid_start);

    for (row, slot) in rows.iter().zip(&slots) {
        let day_index = (row.start_at.date() - opts.start).num_days();
        let Ok(day_index) = usize::try_from(day_index) else {
            continue;
        };
        let Some(day) = days.get_mut(day_index) else {
            continue;
        };

        let double_booked = row.status != AppointmentStatus::Cancelled
            && !scheduling::find_conflicts(slot, &slots).is_empty();

        let offset_minutes = scheduling::minutes_since_midnight(row.start_at.time()) - grid_start_minutes;
        let duration_minutes = (row.end_at - row.start_at).num_minutes().max(0);

        day.events.push(CalendarEvent {
            appointment_id: row.id,
            patient_id: row.patient_id,
            patient_name: patient_names
                .get(&row.patient_id)
                .cloned()
                .unwrap_or_else(|| "Bilinmeyen hasta".to_string()),
            doctor_id: row.doctor_id,
            doctor_name: row.doctor_id.and_then(|d| doctor_names.get(&d).cloned()),
            start_at: row.start_at,
            end_at: row.end_at,
            status: row.status,
            channel: row.channel,
            treatment_type: row.treatment_type.clone(),
            patient_note: row.patient_note.clone(),
            day_index,
            offset_minutes,
            top_px: px(offset_minutes, opts.row_height_px),
            height_px: px(duration_minutes, opts.row_height_px),
            double_booked,
        });
    }

    for day in &mut days {
        day.events.sort_by_key(|e| (e.start_at, e.appointment_id));
    }

    CalendarView {
        start: opts.start,
        grid_start: opts.grid_start,
        row_height_px: opts.row_height_px,
        days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn row(doctor: Option<Uuid>, date: NaiveDate, h: u32, m: u32, minutes: i64) -> CalendarRow {
        let start = date.and_hms_opt(h, m, 0).unwrap();
        CalendarRow {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: doctor,
            start_at: start,
            end_at: start + Duration::minutes(minutes),
            status: AppointmentStatus::Confirmed,
            channel: Channel::Phone,
            treatment_type: Some("Dolgu".into()),
            patient_note: None,
        }
    }

    fn opts(days: u32) -> CalendarOptions {
        CalendarOptions {
            start: day(10),
            days,
            grid_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            row_height_px: 60.0,
        }
    }

    #[test]
    fn offsets_are_relative_to_grid_start() {
        let r = row(None, day(10), 9, 30, 45);
        let mut patients = HashMap::new();
        patients.insert(r.patient_id, "Ayşe Yılmaz".to_string());

        let view = build_calendar(&[r], &patients, &HashMap::new(), &opts(1));
        let ev = &view.days[0].events[0];
        assert_eq!(ev.offset_minutes, 90);
        assert_eq!(ev.top_px, 90.0);
        assert_eq!(ev.height_px, 45.0);
        assert_eq!(ev.patient_name, "Ayşe Yılmaz");
        assert_eq!(ev.doctor_name, None);
    }

    #[test]
    fn week_view_buckets_by_day_and_drops_outside_rows() {
        let rows = vec![
            row(None, day(12), 10, 0, 30),
            row(None, day(10), 11, 0, 30),
            row(None, day(10), 9, 0, 30),
            row(None, day(20), 9, 0, 30),
            row(None, day(9), 9, 0, 30),
        ];
        let view = build_calendar(&rows, &HashMap::new(), &HashMap::new(), &opts(7));
        assert_eq!(view.days.len(), 7);
        assert_eq!(view.days[0].events.len(), 2);
        assert!(view.days[0].events[0].start_at < view.days[0].events[1].start_at);
        assert_eq!(view.days[2].events[0].day_index, 2);
        let total: usize = view.days.iter().map(|d| d.events.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn flags_double_booking_per_doctor() {
        let doctor = Uuid::new_v4();
        let a = row(Some(doctor), day(10), 9, 0, 60);
        let b = row(Some(doctor), day(10), 9, 30, 30);
        let c = row(Some(doctor), day(10), 10, 0, 30);
        let mut doctors = HashMap::new();
        doctors.insert(doctor, "Dt. Mehmet".to_string());

        let view = build_calendar(&[a, b, c], &HashMap::new(), &doctors, &opts(1));
        let flags: Vec<bool> = view.days[0].events.iter().map(|e| e.double_booked).collect();
        assert_eq!(flags, vec![true, true, false]);
        assert_eq!(view.days[0].events[0].doctor_name.as_deref(), Some("Dt. Mehmet"));
    }
}
