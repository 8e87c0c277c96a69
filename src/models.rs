use std::sync::Arc;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ApiError;
use crate::n8n::WorkflowDirectory;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub max_active_sessions: i64,
    pub workflows: Option<Arc<dyn WorkflowDirectory>>,
}

/* -------------------------
   Response envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

/* -------------------------
   Domain enums (stored as text)
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum Channel {
    Web,
    Whatsapp,
    Phone,
    WalkIn,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Web, Channel::Whatsapp, Channel::Phone, Channel::WalkIn];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PaymentStatus {
    Planned,
    Partial,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Other,
}

/* -------------------------
   Working hours (clinics.working_hours JSONB)
--------------------------*/

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayHours {
    /// "HH:MM", clinic wall clock
    pub open: String,
    pub close: String,
    pub enabled: bool,
}

impl DayHours {
    fn parsed(&self) -> Option<(NaiveTime, NaiveTime)> {
        let open = NaiveTime::parse_from_str(self.open.trim(), "%H:%M").ok()?;
        let close = NaiveTime::parse_from_str(self.close.trim(), "%H:%M").ok()?;
        (close > open).then_some((open, close))
    }

    /// Open hours for the day; 0 when closed or malformed.
    pub fn hours(&self) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.parsed()
            .map(|(open, close)| (close - open).num_minutes() as f64 / 60.0)
            .unwrap_or(0.0)
    }

    pub fn open_time(&self) -> Option<NaiveTime> {
        if !self.enabled {
            return None;
        }
        self.parsed().map(|(open, _)| open)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkingHours {
    pub monday: DayHours,
    pub tuesday: DayHours,
    pub wednesday: DayHours,
    pub thursday: DayHours,
    pub friday: DayHours,
    pub saturday: DayHours,
    pub sunday: DayHours,
}

impl Default for WorkingHours {
    fn default() -> Self {
        let weekday = DayHours {
            open: "09:00".into(),
            close: "18:00".into(),
            enabled: true,
        };
        Self {
            monday: weekday.clone(),
            tuesday: weekday.clone(),
            wednesday: weekday.clone(),
            thursday: weekday.clone(),
            friday: weekday,
            saturday: DayHours {
                open: "09:00".into(),
                close: "14:00".into(),
                enabled: true,
            },
            sunday: DayHours {
                open: "09:00".into(),
                close: "14:00".into(),
                enabled: false,
            },
        }
    }
}

impl WorkingHours {
    pub fn day(&self, weekday: Weekday) -> &DayHours {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    pub fn days(&self) -> [&DayHours; 7] {
        [
            &self.monday,
            &self.tuesday,
            &self.wednesday,
            &self.thursday,
            &self.friday,
            &self.saturday,
            &self.sunday,
        ]
    }

    pub fn earliest_open(&self) -> Option<NaiveTime> {
        self.days().into_iter().filter_map(DayHours::open_time).min()
    }
}

/* -------------------------
   Helpers
--------------------------*/

/// Distinguishes an absent PATCH field (`None`) from an explicit `null` (`Some(None)`).
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trim and drop empty strings.
pub fn clean(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Lower-cased address; used for logins and patient contact details alike.
pub fn validate_email(email: &str) -> Result<String, ApiError> {
    let e = email.trim().to_lowercase();
    let valid = match e.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid || e.contains(char::is_whitespace) {
        return Err(ApiError::validation("Geçerli bir e-posta adresi girin"));
    }
    Ok(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_hours_handles_closed_and_malformed() {
        let wh = WorkingHours::default();
        assert_eq!(wh.day(Weekday::Mon).hours(), 9.0);
        assert_eq!(wh.day(Weekday::Sat).hours(), 5.0);
        assert_eq!(wh.day(Weekday::Sun).hours(), 0.0);

        let broken = DayHours { open: "9am".into(), close: "18:00".into(), enabled: true };
        assert_eq!(broken.hours(), 0.0);
        let inverted = DayHours { open: "18:00".into(), close: "09:00".into(), enabled: true };
        assert_eq!(inverted.hours(), 0.0);
    }

    #[test]
    fn earliest_open_skips_disabled_days() {
        let mut wh = WorkingHours::default();
        wh.sunday = DayHours { open: "07:00".into(), close: "10:00".into(), enabled: false };
        wh.friday.open = "08:30".into();
        assert_eq!(wh.earliest_open(), NaiveTime::from_hms_opt(8, 30, 0));
    }

    #[test]
    fn status_and_channel_wire_names() {
        assert_eq!(serde_json::to_string(&AppointmentStatus::NoShow).unwrap(), "\"no_show\"");
        assert_eq!(serde_json::to_string(&Channel::WalkIn).unwrap(), "\"walk_in\"");
        let s: PaymentStatus = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(s, PaymentStatus::Partial);
    }

    #[test]
    fn email_shape() {
        assert_eq!(validate_email(" Doktor@Klinik.COM ").unwrap(), "doktor@klinik.com");
        assert!(validate_email("doktor").is_err());
        assert!(validate_email("@klinik.com").is_err());
        assert!(validate_email("doktor@klinik").is_err());
        assert!(validate_email("dok tor@klinik.com").is_err());
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_double_option")]
        note: Option<Option<String>>,
    }

    #[test]
    fn double_option_tells_null_from_missing() {
        let p: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(p.note, None);
        let p: Patch = serde_json::from_str(r#"{"note":null}"#).unwrap();
        assert_eq!(p.note, Some(None));
        let p: Patch = serde_json::from_str(r#"{"note":"x"}"#).unwrap();
        assert_eq!(p.note, Some(Some("x".into())));
    }
}
