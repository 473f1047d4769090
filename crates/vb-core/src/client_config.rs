//! User-controlled automation policy
//!
//! Mutated by subscriber requests and by the engine itself (one-shot charge
//! limit, extension safety floor, "once" schedules), persisted through a
//! `ConfigStore` and read on every cycle.

use chrono::{NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Charge limit value meaning "no limit armed"
pub const CHARGE_LIMIT_DISABLED: u8 = 100;

/// Time of day in local wall-clock time, serialized as "HH:MM"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleTime {
    hour: u8,
    minute: u8,
}

impl ScheduleTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, PolicyError> {
        if hour > 23 || minute > 59 {
            return Err(PolicyError::ScheduleTime(format!("{:02}:{:02}", hour, minute)));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// True during the whole configured minute
    pub fn matches(&self, now: &NaiveDateTime) -> bool {
        now.hour() == u32::from(self.hour) && now.minute() == u32::from(self.minute)
    }
}

impl TryFrom<String> for ScheduleTime {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let invalid = || PolicyError::ScheduleTime(value.clone());
        let (hour, minute) = value.split_once(':').ok_or_else(invalid)?;
        let hour = hour.trim().parse().map_err(|_| invalid())?;
        let minute = minute.trim().parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl From<ScheduleTime> for String {
    fn from(value: ScheduleTime) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Set of enabled weekdays, bit 0 = Monday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekdayMask(u8);

impl WeekdayMask {
    pub const ALL: WeekdayMask = WeekdayMask(0b0111_1111);
    pub const NONE: WeekdayMask = WeekdayMask(0);

    pub fn from_days(days: &[Weekday]) -> Self {
        Self(
            days.iter()
                .fold(0, |mask, day| mask | (1 << day.num_days_from_monday())),
        )
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for WeekdayMask {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Stop charging once SOC reaches this value; 100 disables the limit
    #[serde(default = "default_charge_limit")]
    pub charge_limit_pct: u8,

    /// Keep re-starting climatisation when the vehicle's own timer ends
    #[serde(default)]
    pub climatisation_extend: bool,

    #[serde(default)]
    pub climatisation_at: Option<ScheduleTime>,

    #[serde(default)]
    pub climatisation_weekdays: WeekdayMask,

    /// Fire the climatisation schedule once regardless of weekday, then clear it
    #[serde(default)]
    pub climatisation_once: bool,

    #[serde(default)]
    pub charging_at: Option<ScheduleTime>,

    #[serde(default)]
    pub charging_once: bool,
}

fn default_charge_limit() -> u8 {
    CHARGE_LIMIT_DISABLED
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            charge_limit_pct: CHARGE_LIMIT_DISABLED,
            climatisation_extend: false,
            climatisation_at: None,
            climatisation_weekdays: WeekdayMask::ALL,
            climatisation_once: false,
            charging_at: None,
            charging_once: false,
        }
    }
}

impl ClientConfig {
    pub fn charge_limit_armed(&self) -> bool {
        self.charge_limit_pct < CHARGE_LIMIT_DISABLED
    }

    pub fn disarm_charge_limit(&mut self) {
        self.charge_limit_pct = CHARGE_LIMIT_DISABLED;
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.charge_limit_pct == 0 || self.charge_limit_pct > CHARGE_LIMIT_DISABLED {
            return Err(PolicyError::ChargeLimit(self.charge_limit_pct));
        }
        Ok(())
    }
}
