use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const MS_PER_SEC: i64 = 1_000;
const MS_PER_MIN: i64 = 60 * MS_PER_SEC;
const MS_PER_HOUR: i64 = 60 * MS_PER_MIN;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;
/// Calendar approximation, per the timeframe grammar's `mo`/`y` units.
const MS_PER_MONTH_APPROX: i64 = 30 * MS_PER_DAY;
const MS_PER_YEAR_APPROX: i64 = 365 * MS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeframeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeframeUnit {
    fn as_str(&self) -> &'static str {
        match self {
            TimeframeUnit::Second => "s",
            TimeframeUnit::Minute => "m",
            TimeframeUnit::Hour => "h",
            TimeframeUnit::Day => "d",
            TimeframeUnit::Week => "w",
            TimeframeUnit::Month => "mo",
            TimeframeUnit::Year => "y",
        }
    }

    fn unit_ms(&self) -> i64 {
        match self {
            TimeframeUnit::Second => MS_PER_SEC,
            TimeframeUnit::Minute => MS_PER_MIN,
            TimeframeUnit::Hour => MS_PER_HOUR,
            TimeframeUnit::Day => MS_PER_DAY,
            TimeframeUnit::Week => MS_PER_WEEK,
            TimeframeUnit::Month => MS_PER_MONTH_APPROX,
            TimeframeUnit::Year => MS_PER_YEAR_APPROX,
        }
    }
}

/// A parsed `<int><unit>` timeframe, e.g. `1m`, `5m`, `1h`, `1d`.
/// `period_ms` is derived once at parse time and carried from then on;
/// nothing downstream re-parses the string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    count: u32,
    unit: TimeframeUnit,
    period_ms: i64,
}

impl Timeframe {
    pub const ONE_MINUTE: Timeframe = Timeframe { count: 1, unit: TimeframeUnit::Minute, period_ms: MS_PER_MIN };

    pub fn new(count: u32, unit: TimeframeUnit) -> Self {
        let period_ms = count as i64 * unit.unit_ms();
        Self { count, unit, period_ms }
    }

    pub fn period_ms(&self) -> i64 {
        self.period_ms
    }

    pub fn is_one_minute(&self) -> bool {
        self.period_ms == MS_PER_MIN
    }

    pub fn unit(&self) -> TimeframeUnit {
        self.unit
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Bucket start for timestamp `t`, per the resampler's bucket
    /// assignment rule.
    pub fn bucket_start(&self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.period_ms)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split_at = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| format!("timeframe '{s}' has no unit"))?;
        let (count_part, unit_part) = s.split_at(split_at);
        let count: u32 = count_part.parse().map_err(|_| format!("timeframe '{s}' has an invalid count"))?;
        if count == 0 {
            return Err(format!("timeframe '{s}' has a zero count"));
        }
        let unit = match unit_part {
            "s" => TimeframeUnit::Second,
            "m" => TimeframeUnit::Minute,
            "h" => TimeframeUnit::Hour,
            "d" => TimeframeUnit::Day,
            "w" => TimeframeUnit::Week,
            "mo" => TimeframeUnit::Month,
            "y" => TimeframeUnit::Year,
            other => return Err(format!("timeframe '{s}' has an unrecognized unit '{other}'")),
        };
        Ok(Timeframe::new(count, unit))
    }
}

impl Serialize for Timeframe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timeframe::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_timeframes() {
        assert_eq!(Timeframe::from_str("1m").unwrap().period_ms(), 60_000);
        assert_eq!(Timeframe::from_str("5m").unwrap().period_ms(), 300_000);
        assert_eq!(Timeframe::from_str("1h").unwrap().period_ms(), 3_600_000);
        assert_eq!(Timeframe::from_str("1d").unwrap().period_ms(), 86_400_000);
    }

    #[test]
    fn month_and_year_use_calendar_approximations() {
        assert_eq!(Timeframe::from_str("1mo").unwrap().period_ms(), 30 * MS_PER_DAY);
        assert_eq!(Timeframe::from_str("1y").unwrap().period_ms(), 365 * MS_PER_DAY);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Timeframe::from_str("m5").is_err());
        assert!(Timeframe::from_str("0m").is_err());
        assert!(Timeframe::from_str("5x").is_err());
        assert!(Timeframe::from_str("").is_err());
    }

    #[test]
    fn round_trips_through_display() {
        let tf = Timeframe::from_str("15m").unwrap();
        assert_eq!(tf.to_string(), "15m");
    }

    #[test]
    fn bucket_start_aligns_down() {
        let tf = Timeframe::from_str("5m").unwrap();
        assert_eq!(tf.bucket_start(299_999), 0);
        assert_eq!(tf.bucket_start(300_000), 300_000);
    }
}
