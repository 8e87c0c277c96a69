// src/reporting.rs
//
// Operational report over a bounded window (day / week / month). The route
// fetches the rows; `aggregate` folds them in one pass.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AppointmentStatus, Channel, PaymentMethod, PaymentStatus, WorkingHours};

/// Bookable half-hour slots per working hour, the occupancy denominator.
pub const SLOTS_PER_HOUR: f64 = 2.0;
pub const MAX_WINDOW_DAYS: i64 = 62;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub from: NaiveDate,
    /// inclusive
    pub to: NaiveDate,
}

impl ReportWindow {
    pub fn for_period(period: Period, date: NaiveDate) -> Self {
        match period {
            Period::Day => Self { from: date, to: date },
            Period::Week => {
                let back = Duration::days(i64::from(date.weekday().num_days_from_monday()));
                let from = date.checked_sub_signed(back).unwrap_or(NaiveDate::MIN);
                let to = from.checked_add_signed(Duration::days(6)).unwrap_or(NaiveDate::MAX);
                Self { from, to }
            }
            Period::Month => {
                let from = date.with_day(1).unwrap_or(date);
                let next = if from.month() == 12 {
                    NaiveDate::from_ymd_opt(from.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(from.year(), from.month() + 1, 1)
                };
                let to = next.and_then(|n| n.pred_opt()).unwrap_or(NaiveDate::MAX);
                Self { from, to }
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.from.iter_days().take_while(move |d| *d <= self.to)
    }

    pub fn len_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportAppointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub start_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub channel: Channel,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportPayment {
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct DayStats {
    pub date: NaiveDate,
    pub pending: u32,
    pub confirmed: u32,
    pub completed: u32,
    pub cancelled: u32,
    pub no_show: u32,
    pub total: u32,
    pub occupancy_pct: f64,
}

impl DayStats {
    fn bump(&mut self, status: AppointmentStatus) {
        match status {
            AppointmentStatus::Pending => self.pending += 1,
            AppointmentStatus::Confirmed => self.confirmed += 1,
            AppointmentStatus::Completed => self.completed += 1,
            AppointmentStatus::Cancelled => self.cancelled += 1,
            AppointmentStatus::NoShow => self.no_show += 1,
        }
        self.total += 1;
    }

    fn occupying(&self) -> u32 {
        self.total - self.cancelled
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ChannelStats {
    pub channel: Channel,
    pub count: u32,
    pub percentage: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DoctorStats {
    pub doctor_id: Uuid,
    pub doctor_name: String,
    pub total: u32,
    pub completed: u32,
    pub no_show: u32,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct PatientMix {
    pub new_patients: u32,
    pub existing_patients: u32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MoneyBucket<K> {
    pub key: K,
    pub count: u32,
    pub amount_cents: i64,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct PaymentTotals {
    pub by_status: Vec<MoneyBucket<PaymentStatus>>,
    pub by_method: Vec<MoneyBucket<PaymentMethod>>,
    pub collected_cents: i64,
    pub outstanding_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub window: ReportWindow,
    pub total_appointments: u32,
    pub by_day: Vec<DayStats>,
    pub by_channel: Vec<ChannelStats>,
    pub by_doctor: Vec<DoctorStats>,
    pub patients: PatientMix,
    pub payments: PaymentTotals,
}

/// Percentage with one decimal.
pub fn percent(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (f64::from(part) * 1000.0 / f64::from(whole)).round() / 10.0
}

pub fn occupancy_pct(booked: u32, working_hours: f64) -> f64 {
    let slots = working_hours * SLOTS_PER_HOUR;
    if slots <= 0.0 {
        return 0.0;
    }
    (f64::from(booked) / slots * 1000.0).round() / 10.0
}

fn money<K: Ord + Copy>(acc: BTreeMap<K, (u32, i64)>) -> Vec<MoneyBucket<K>> {
    acc.into_iter()
        .map(|(key, (count, amount_cents))| MoneyBucket { key, count, amount_cents })
        .collect()
}

/// `patient_created` maps each patient to the clinic-local date of its first record.
pub fn aggregate(
    window: ReportWindow,
    appointments: &[ReportAppointment],
    payments: &[ReportPayment],
    patient_created: &HashMap<Uuid, NaiveDate>,
    doctor_names: &HashMap<Uuid, String>,
    working_hours: &WorkingHours,
) -> Report {
    let mut by_day: BTreeMap<NaiveDate, DayStats> = window
        .days()
        .map(|date| (date, DayStats { date, ..DayStats::default() }))
        .collect();
    let mut by_channel: BTreeMap<Channel, u32> = Channel::ALL.iter().map(|c| (*c, 0)).collect();
    let mut by_doctor: BTreeMap<Uuid, DoctorStats> = BTreeMap::new();
    let mut patients_seen: HashSet<Uuid> = HashSet::new();
    let mut mix = PatientMix::default();
    let mut total = 0u32;

    for appt in appointments {
        let date = appt.start_at.date();
        let Some(day) = by_day.get_mut(&date) else {
            continue;
        };
        total += 1;
        day.bump(appt.status);
        *by_channel.entry(appt.channel).or_default() += 1;

        if let Some(doctor_id) = appt.doctor_id {
            let stats = by_doctor.entry(doctor_id).or_insert_with(|| DoctorStats {
                doctor_id,
                doctor_name: doctor_names
                    .get(&doctor_id)
                    .cloned()
                    .unwrap_or_else(|| "Bilinmeyen doktor".to_string()),
                total: 0,
                completed: 0,
                no_show: 0,
            });
            stats.total += 1;
            match appt.status {
                AppointmentStatus::Completed => stats.completed += 1,
                AppointmentStatus::NoShow => stats.no_show += 1,
                _ => {}
            }
        }

        if patients_seen.insert(appt.patient_id) {
            match patient_created.get(&appt.patient_id) {
                Some(created) if window.contains(*created) => mix.new_patients += 1,
                _ => mix.existing_patients += 1,
            }
        }
    }

    for day in by_day.values_mut() {
        let hours = working_hours.day(day.date.weekday()).hours();
        day.occupancy_pct = occupancy_pct(day.occupying(), hours);
    }

    let mut status_acc: BTreeMap<PaymentStatus, (u32, i64)> = BTreeMap::new();
    let mut method_acc: BTreeMap<PaymentMethod, (u32, i64)> = BTreeMap::new();
    let mut totals = PaymentTotals::default();
    for p in payments {
        let s = status_acc.entry(p.status).or_default();
        s.0 += 1;
        s.1 += p.amount_cents;
        match p.status {
            PaymentStatus::Paid => {
                totals.collected_cents += p.amount_cents;
                let m = method_acc.entry(p.method).or_default();
                m.0 += 1;
                m.1 += p.amount_cents;
            }
            PaymentStatus::Planned | PaymentStatus::Partial => totals.outstanding_cents += p.amount_cents,
            PaymentStatus::Cancelled => {}
        }
    }
    totals.by_status = money(status_acc);
    totals.by_method = money(method_acc);

    let mut by_doctor: Vec<DoctorStats> = by_doctor.into_values().collect();
    by_doctor.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.doctor_name.cmp(&b.doctor_name)));

    Report {
        window,
        total_appointments: total,
        by_day: by_day.into_values().collect(),
        by_channel: by_channel
            .into_iter()
            .map(|(channel, count)| ChannelStats {
                channel,
                count,
                percentage: percent(count, total),
            })
            .collect(),
        by_doctor,
        patients: mix,
        payments: totals,
    }
}
