//! Shared pipeline types: timeframes and resampling methods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Target bar interval for resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1min")]
    Min1,
    #[serde(rename = "2min")]
    Min2,
    #[serde(rename = "5min")]
    Min5,
    #[serde(rename = "15min")]
    Min15,
    #[serde(rename = "30min")]
    Min30,
    #[serde(rename = "1H")]
    Hour1,
    #[serde(rename = "2H")]
    Hour2,
    #[serde(rename = "4H")]
    Hour4,
    #[serde(rename = "6H")]
    Hour6,
    #[serde(rename = "12H")]
    Hour12,
    #[serde(rename = "1D")]
    Day1,
    #[serde(rename = "1W")]
    Week1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 12] = [
        Timeframe::Min1,
        Timeframe::Min2,
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Min30,
        Timeframe::Hour1,
        Timeframe::Hour2,
        Timeframe::Hour4,
        Timeframe::Hour6,
        Timeframe::Hour12,
        Timeframe::Day1,
        Timeframe::Week1,
    ];

    /// Label used in dataset keys, file names, and configuration.
    pub fn label(self) -> &'static str {
        match self {
            Timeframe::Min1 => "1min",
            Timeframe::Min2 => "2min",
            Timeframe::Min5 => "5min",
            Timeframe::Min15 => "15min",
            Timeframe::Min30 => "30min",
            Timeframe::Hour1 => "1H",
            Timeframe::Hour2 => "2H",
            Timeframe::Hour4 => "4H",
            Timeframe::Hour6 => "6H",
            Timeframe::Hour12 => "12H",
            Timeframe::Day1 => "1D",
            Timeframe::Week1 => "1W",
        }
    }

    /// Bucket width as a polars duration string.
    pub fn every(self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min2 => "2m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour2 => "2h",
            Timeframe::Hour4 => "4h",
            Timeframe::Hour6 => "6h",
            Timeframe::Hour12 => "12h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "1w",
        }
    }

    /// Bucket width in milliseconds.
    pub fn duration_ms(self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Timeframe::Min1 => MINUTE,
            Timeframe::Min2 => 2 * MINUTE,
            Timeframe::Min5 => 5 * MINUTE,
            Timeframe::Min15 => 15 * MINUTE,
            Timeframe::Min30 => 30 * MINUTE,
            Timeframe::Hour1 => 60 * MINUTE,
            Timeframe::Hour2 => 120 * MINUTE,
            Timeframe::Hour4 => 240 * MINUTE,
            Timeframe::Hour6 => 360 * MINUTE,
            Timeframe::Hour12 => 720 * MINUTE,
            Timeframe::Day1 => 1_440 * MINUTE,
            Timeframe::Week1 => 10_080 * MINUTE,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.label().to_lowercase() == lowered)
            .ok_or_else(|| EngineError::InvalidTimeframe(s.to_string()))
    }
}

/// How OHLCV buckets are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResampleMethod {
    /// first/max/min/last/sum aggregation.
    #[default]
    Standard,
    /// Standard aggregation plus a volume-weighted average price column.
    Vwap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_labels_round_trip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.label().parse::<Timeframe>().unwrap(), tf);
        }
    }

    #[test]
    fn timeframe_parse_is_case_insensitive() {
        assert_eq!("1h".parse::<Timeframe>().unwrap(), Timeframe::Hour1);
        assert_eq!("1MIN".parse::<Timeframe>().unwrap(), Timeframe::Min1);
        assert!("3h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn timeframe_serializes_as_label() {
        let json = serde_json::to_string(&Timeframe::Hour4).unwrap();
        assert_eq!(json, "\"4H\"");
        let back: Timeframe = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Timeframe::Hour4);
    }

    #[test]
    fn durations_are_increasing() {
        let mut last = 0;
        for tf in Timeframe::ALL {
            assert!(tf.duration_ms() > last);
            last = tf.duration_ms();
        }
    }
}
