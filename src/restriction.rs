use crate::store::{KeyValueStore, keys};
use crate::{Error, Result};
use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Largest configurable daily allowance (a whole day)
pub const MAX_DAILY_LIMIT_MINUTES: u32 = 24 * 60;

const USAGE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Bedtime window and daily allowance, plus today's usage counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionSchedule {
    pub bedtime_enabled: bool,
    pub bedtime_start: NaiveTime,
    pub bedtime_end: NaiveTime,
    /// 0 means unlimited
    pub daily_limit_minutes: u32,
    pub usage_today: u32,
    pub usage_date: Option<NaiveDate>,
}

impl Default for RestrictionSchedule {
    fn default() -> Self {
        Self {
            bedtime_enabled: false,
            bedtime_start: hm(21, 0),
            bedtime_end: hm(7, 0),
            daily_limit_minutes: 0,
            usage_today: 0,
            usage_date: None,
        }
    }
}

impl RestrictionSchedule {
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        let defaults = Self::default();
        let get = |key: &str| store.get_u64(keys::SETTINGS, key);
        let time = |hour_key: &str, minute_key: &str, default: NaiveTime| {
            clamped_time(
                get(hour_key).unwrap_or(default.hour() as u64),
                get(minute_key).unwrap_or(default.minute() as u64),
            )
        };

        Self {
            bedtime_enabled: store
                .get_bool(keys::SETTINGS, keys::BEDTIME_ENABLED)
                .unwrap_or(defaults.bedtime_enabled),
            bedtime_start: time(
                keys::BEDTIME_START_HOUR,
                keys::BEDTIME_START_MINUTE,
                defaults.bedtime_start,
            ),
            bedtime_end: time(
                keys::BEDTIME_END_HOUR,
                keys::BEDTIME_END_MINUTE,
                defaults.bedtime_end,
            ),
            daily_limit_minutes: get(keys::MAX_DAILY_MINUTES)
                .map(|m| m.min(MAX_DAILY_LIMIT_MINUTES as u64) as u32)
                .unwrap_or(defaults.daily_limit_minutes),
            usage_today: store
                .get_u64(keys::USAGE, keys::DAILY_USAGE_MINUTES)
                .map(|m| m.min(u32::MAX as u64) as u32)
                .unwrap_or(0),
            usage_date: store
                .get_str(keys::USAGE, keys::USAGE_DATE)
                .and_then(|s| NaiveDate::parse_from_str(&s, USAGE_DATE_FORMAT).ok()),
        }
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        store.put_bool(keys::SETTINGS, keys::BEDTIME_ENABLED, self.bedtime_enabled);
        store.put_u64(keys::SETTINGS, keys::BEDTIME_START_HOUR, self.bedtime_start.hour() as u64);
        store.put_u64(keys::SETTINGS, keys::BEDTIME_START_MINUTE, self.bedtime_start.minute() as u64);
        store.put_u64(keys::SETTINGS, keys::BEDTIME_END_HOUR, self.bedtime_end.hour() as u64);
        store.put_u64(keys::SETTINGS, keys::BEDTIME_END_MINUTE, self.bedtime_end.minute() as u64);
        store.put_u64(keys::SETTINGS, keys::MAX_DAILY_MINUTES, self.daily_limit_minutes as u64);
        self.save_usage(store);
    }

    pub fn save_usage<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        store.put_u64(keys::USAGE, keys::DAILY_USAGE_MINUTES, self.usage_today as u64);
        match self.usage_date {
            Some(date) => store.put_str(
                keys::USAGE,
                keys::USAGE_DATE,
                &date.format(USAGE_DATE_FORMAT).to_string(),
            ),
            None => store.remove(keys::USAGE, keys::USAGE_DATE),
        }
    }

    /// True if either a bedtime or a daily limit is in force
    pub fn has_restrictions(&self) -> bool {
        self.bedtime_enabled || self.daily_limit_minutes > 0
    }

    /// Start a new usage day if `today` differs from the stored date
    ///
    /// While clock tampering is flagged the counter is never reset: setting the
    /// date forward must not refill the allowance. Returns `true` if the
    /// schedule changed.
    pub fn roll_over(&mut self, today: NaiveDate, tampering: bool) -> bool {
        if self.usage_date == Some(today) {
            return false;
        }

        if tampering && self.usage_date.is_some() {
            debug!("Date changed while clock tampering is flagged, keeping usage counter");
            return false;
        }

        if self.usage_today > 0 {
            info!("New usage day {}, resetting {} minutes of usage", today, self.usage_today);
        }
        self.usage_today = 0;
        self.usage_date = Some(today);
        true
    }

    /// Add `minutes` to today's usage, starting a new day first if needed
    pub fn record_usage(&mut self, minutes: u32, today: NaiveDate, tampering: bool) {
        self.roll_over(today, tampering);
        self.usage_today = self.usage_today.saturating_add(minutes);
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Build a time of day, clamping out-of-range components
fn clamped_time(hour: u64, minute: u64) -> NaiveTime {
    hm(hour.min(23) as u32, minute.min(59) as u32)
}

fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Whether `now` falls in the window `[start, end)`
///
/// `start > end` means the window crosses midnight. `start == end` is empty.
pub fn is_within_window(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    let (start, end, now) = (
        minutes_since_midnight(start),
        minutes_since_midnight(end),
        minutes_since_midnight(now),
    );

    if start > end {
        now >= start || now < end
    } else {
        start <= now && now < end
    }
}

/// Derived restriction flags at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionStatus {
    pub is_during_bedtime: bool,
    pub is_over_daily_limit: bool,
    pub usage_today_minutes: u32,
    /// `None` when there is no daily limit
    pub remaining_minutes: Option<u32>,
}

/// Computes bedtime and daily-limit state
pub struct RestrictionEvaluator;

impl RestrictionEvaluator {
    /// Evaluate `schedule` at local time `now`
    ///
    /// Under suspected clock tampering every configured restriction reads as
    /// active, whatever the clock says.
    pub fn evaluate(
        schedule: &RestrictionSchedule,
        now: NaiveTime,
        tampering: bool,
    ) -> RestrictionStatus {
        let limit = schedule.daily_limit_minutes;
        let remaining_minutes = (limit > 0).then(|| limit.saturating_sub(schedule.usage_today));

        if tampering && schedule.has_restrictions() {
            return RestrictionStatus {
                is_during_bedtime: true,
                is_over_daily_limit: true,
                usage_today_minutes: schedule.usage_today,
                remaining_minutes: remaining_minutes.map(|_| 0),
            };
        }

        RestrictionStatus {
            is_during_bedtime: schedule.bedtime_enabled
                && is_within_window(schedule.bedtime_start, schedule.bedtime_end, now),
            is_over_daily_limit: limit > 0 && schedule.usage_today >= limit,
            usage_today_minutes: schedule.usage_today,
            remaining_minutes,
        }
    }
}

/// How aggressively content is filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFilterLevel {
    Off,
    Light,
    #[default]
    Moderate,
    Strict,
}

impl ContentFilterLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentFilterLevel::Off => "off",
            ContentFilterLevel::Light => "light",
            ContentFilterLevel::Moderate => "moderate",
            ContentFilterLevel::Strict => "strict",
        }
    }

    /// Decode a stored tag, falling back to the default for unknown values
    pub fn from_tag_or_default(tag: &str) -> Self {
        tag.parse().unwrap_or_else(|e| {
            warn!("{}, using {}", e, Self::default());
            Self::default()
        })
    }
}

impl fmt::Display for ContentFilterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentFilterLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(ContentFilterLevel::Off),
            "light" => Ok(ContentFilterLevel::Light),
            "moderate" => Ok(ContentFilterLevel::Moderate),
            "strict" => Ok(ContentFilterLevel::Strict),
            _ => Err(Error::UnknownFilterLevel(s.to_string())),
        }
    }
}

/// Feature blocks the guardian can toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentControls {
    pub block_dms: bool,
    pub block_explore: bool,
    pub block_posting: bool,
    pub require_approval_for_follows: bool,
    pub content_filter_level: ContentFilterLevel,
}

impl ContentControls {
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Self {
        let flag = |key: &str| store.get_bool(keys::SETTINGS, key).unwrap_or(false);

        Self {
            block_dms: flag(keys::BLOCK_DMS),
            block_explore: flag(keys::BLOCK_EXPLORE),
            block_posting: flag(keys::BLOCK_POSTING),
            require_approval_for_follows: flag(keys::REQUIRE_APPROVAL_FOR_FOLLOWS),
            content_filter_level: store
                .get_str(keys::SETTINGS, keys::CONTENT_FILTER_LEVEL)
                .map(|tag| ContentFilterLevel::from_tag_or_default(&tag))
                .unwrap_or_default(),
        }
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        store.put_bool(keys::SETTINGS, keys::BLOCK_DMS, self.block_dms);
        store.put_bool(keys::SETTINGS, keys::BLOCK_EXPLORE, self.block_explore);
        store.put_bool(keys::SETTINGS, keys::BLOCK_POSTING, self.block_posting);
        store.put_bool(
            keys::SETTINGS,
            keys::REQUIRE_APPROVAL_FOR_FOLLOWS,
            self.require_approval_for_follows,
        );
        store.put_str(
            keys::SETTINGS,
            keys::CONTENT_FILTER_LEVEL,
            self.content_filter_level.as_str(),
        );
    }
}

/// Partial settings change; `None` fields are left as they are
///
/// Out-of-range values are clamped: hours to 0-23, minutes to 0-59, the daily
/// limit to 0-1440.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub daily_limit_minutes: Option<u32>,
    pub bedtime_enabled: Option<bool>,
    pub bedtime_start_hour: Option<u32>,
    pub bedtime_start_minute: Option<u32>,
    pub bedtime_end_hour: Option<u32>,
    pub bedtime_end_minute: Option<u32>,
    pub block_dms: Option<bool>,
    pub block_explore: Option<bool>,
    pub block_posting: Option<bool>,
    pub require_approval_for_follows: Option<bool>,
    pub content_filter_level: Option<ContentFilterLevel>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, schedule: &mut RestrictionSchedule, controls: &mut ContentControls) {
        if let Some(limit) = self.daily_limit_minutes {
            schedule.daily_limit_minutes = limit.min(MAX_DAILY_LIMIT_MINUTES);
        }
        if let Some(enabled) = self.bedtime_enabled {
            schedule.bedtime_enabled = enabled;
        }

        schedule.bedtime_start = clamped_time(
            self.bedtime_start_hour.unwrap_or(schedule.bedtime_start.hour()) as u64,
            self.bedtime_start_minute.unwrap_or(schedule.bedtime_start.minute()) as u64,
        );
        schedule.bedtime_end = clamped_time(
            self.bedtime_end_hour.unwrap_or(schedule.bedtime_end.hour()) as u64,
            self.bedtime_end_minute.unwrap_or(schedule.bedtime_end.minute()) as u64,
        );

        if let Some(v) = self.block_dms {
            controls.block_dms = v;
        }
        if let Some(v) = self.block_explore {
            controls.block_explore = v;
        }
        if let Some(v) = self.block_posting {
            controls.block_posting = v;
        }
        if let Some(v) = self.require_approval_for_follows {
            controls.require_approval_for_follows = v;
        }
        if let Some(level) = self.content_filter_level {
            controls.content_filter_level = level;
        }
    }
}
