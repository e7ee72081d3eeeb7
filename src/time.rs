//! Minute clock. Every timestamp the engine stores is whole minutes since the
//! Unix epoch, in UTC.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// Text form accepted for explicit times and used by the debug dump.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// When a query happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum When<'a> {
    #[default]
    Now,
    /// Minutes since the epoch.
    Minute(u32),
    At(DateTime<Utc>),
    /// `yyyy-MM-dd HH:mm:ss`, UTC. Empty means now.
    Text(&'a str),
}

impl<'a> When<'a> {
    pub fn minute(self) -> Result<u32> {
        match self {
            When::Now => Ok(now_minute()),
            When::Minute(m) => Ok(m),
            When::At(at) => Ok(minute_of(&at)),
            When::Text(s) if s.trim().is_empty() => Ok(now_minute()),
            When::Text(s) => parse_minute(s),
        }
    }
}

impl From<u32> for When<'_> {
    fn from(m: u32) -> Self {
        When::Minute(m)
    }
}

impl From<DateTime<Utc>> for When<'_> {
    fn from(at: DateTime<Utc>) -> Self {
        When::At(at)
    }
}

impl<'a> From<&'a str> for When<'a> {
    fn from(s: &'a str) -> Self {
        When::Text(s)
    }
}

pub fn now_minute() -> u32 {
    minute_of(&Utc::now())
}

pub fn minute_of(at: &DateTime<Utc>) -> u32 {
    at.timestamp().div_euclid(60).clamp(0, u32::MAX as i64) as u32
}

pub fn parse_minute(s: &str) -> Result<u32> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| Error::parse("date", s))?;
    Ok(minute_of(&naive.and_utc()))
}

/// Bucket width for window histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    #[default]
    Minute,
    Hour,
    Day,
    Week,
}

impl Unit {
    pub fn minutes(self) -> u32 {
        match self {
            Unit::Minute => 1,
            Unit::Hour => 60,
            Unit::Day => 60 * 24,
            Unit::Week => 60 * 24 * 7,
        }
    }

    /// Start of the bucket holding `minute`.
    pub fn floor(self, minute: u32) -> u32 {
        minute - minute % self.minutes()
    }
}

impl std::str::FromStr for Unit {
    type Err = Error;

    /// Case-insensitive first letter: `m`, `h`, `d` or `w`.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('M') => Ok(Unit::Minute),
            Some('H') => Ok(Unit::Hour),
            Some('D') => Ok(Unit::Day),
            Some('W') => Ok(Unit::Week),
            _ => Err(Error::parse("unit", s)),
        }
    }
}

/// Render a minute timestamp as `yyyy-MM-dd HH:mm:ss`.
pub fn format_minute(minute: u32) -> String {
    match DateTime::<Utc>::from_timestamp(minute as i64 * 60, 0) {
        Some(at) => at.format(DATE_FORMAT).to_string(),
        None => minute.to_string(),
    }
}
