use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use std::ops::Deref;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DurationError {
    #[error("xs:duration must start with 'P': {0}")]
    MissingDesignator(String),

    #[error("negative durations are not supported: {0}")]
    Negative(String),

    #[error("year and month components are not supported: {0}")]
    Calendar(String),

    #[error("invalid xs:duration: {0}")]
    Invalid(String),
}

/// `xs:duration` restricted to the day/time components ONVIF clients send
/// (`PT60S`, `PT1M30S`, `P1DT2H`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XsDuration {
    duration: Duration
}

impl XsDuration {
    pub const fn from_secs(secs: u64) -> Self {
        Self{duration: Duration::from_secs(secs)}
    }

    pub fn as_duration(&self) -> Duration {
        self.duration
    }

    /// `None` when the duration does not fit chrono's range.
    pub fn as_chrono(&self) -> Option<chrono::Duration> {
        chrono::Duration::from_std(self.duration).ok()
    }
}

impl From<Duration> for XsDuration {
    fn from(d: Duration) -> Self {
        Self{duration: d}
    }
}

impl From<XsDuration> for Duration {
    fn from(d: XsDuration) -> Self {
        d.duration
    }
}

impl Deref for XsDuration {
    type Target = Duration;
    fn deref(&self) -> &Self::Target {
        &self.duration
    }
}

impl PartialEq<Duration> for XsDuration {
    fn eq(&self, other: &Duration) -> bool {
        PartialEq::eq(&self.duration, other)
    }
}

impl FromStr for XsDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('-') {
            return Err(DurationError::Negative(s.to_owned()));
        }
        let rest = s.strip_prefix('P').ok_or_else(|| DurationError::MissingDesignator(s.to_owned()))?;
        if rest.is_empty() || rest == "T" {
            return Err(DurationError::Invalid(s.to_owned()));
        }

        let (date, time) = match rest.split_once('T') {
            Some((date, time)) => {
                if time.is_empty() {
                    return Err(DurationError::Invalid(s.to_owned()));
                }
                (date, Some(time))
            }
            None => (rest, None)
        };

        let invalid = || DurationError::Invalid(s.to_owned());
        let mut millis: u64 = 0;

        for (value, unit) in components(date).ok_or_else(invalid)? {
            let part = match unit {
                'D' => whole(value, 86_400_000),
                'Y' | 'M' => return Err(DurationError::Calendar(s.to_owned())),
                _ => None,
            };
            millis = part.and_then(|p| millis.checked_add(p)).ok_or_else(invalid)?;
        }

        if let Some(time) = time {
            for (value, unit) in components(time).ok_or_else(invalid)? {
                let part = match unit {
                    'H' => whole(value, 3_600_000),
                    'M' => whole(value, 60_000),
                    'S' => seconds(value),
                    _ => None,
                };
                millis = part.and_then(|p| millis.checked_add(p)).ok_or_else(invalid)?;
            }
        }

        Ok(Duration::from_millis(millis).into())
    }
}

fn whole(value: &str, unit_millis: u64) -> Option<u64> {
    value.parse::<u64>().ok()?.checked_mul(unit_millis)
}

fn seconds(value: &str) -> Option<u64> {
    let secs: f64 = value.parse().ok()?;
    let millis = (secs * 1000.0).round();
    if !millis.is_finite() || millis < 0.0 || millis >= u64::MAX as f64 {
        return None;
    }
    Some(millis as u64)
}

// "1DT" style leftovers and empty numbers are rejected by returning None.
fn components(part: &str) -> Option<Vec<(&str, char)>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in part.char_indices() {
        if c.is_ascii_alphabetic() {
            if i == start {
                return None;
            }
            out.push((&part[start..i], c));
            start = i + c.len_utf8();
        }
    }
    if start != part.len() {
        return None;
    }
    Some(out)
}

impl fmt::Display for XsDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.duration.subsec_millis();
        if millis == 0 {
            write!(f, "PT{}S", self.duration.as_secs())
        } else {
            write!(f, "PT{}.{:03}S", self.duration.as_secs(), millis)
        }
    }
}

impl Serialize for XsDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for XsDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
