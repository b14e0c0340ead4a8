/// Core data types for the resampling and analytics pipeline.
///
/// These types are the immutable artifacts exchanged between pipeline stages
/// and published to query/visualization collaborators.
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::str::FromStr;

/// A single trade event handed to the engine by the tick normalizer.
///
/// Immutable once created; consumed, never mutated.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tick {
    /// Exchange timestamp of the trade.
    pub time: DateTime<Utc>,
    /// Instrument symbol (e.g. "btcusdt").
    pub symbol: SmolStr,
    /// Execution price, must be finite and > 0.
    pub price: f64,
    /// Trade size in base units, must be finite and > 0.
    pub quantity: f64,
}

impl Tick {
    pub fn new(
        time: DateTime<Utc>,
        symbol: impl Into<SmolStr>,
        price: f64,
        quantity: f64,
    ) -> Self {
        Self {
            time,
            symbol: symbol.into(),
            price,
            quantity,
        }
    }

    /// Check price/quantity are finite and strictly positive.
    pub fn is_well_formed(&self) -> bool {
        self.price.is_finite()
            && self.price > 0.0
            && self.quantity.is_finite()
            && self.quantity > 0.0
            && !self.symbol.is_empty()
    }
}

/// Fixed bar duration, stored as whole milliseconds.
///
/// Parses from the compact labels used across the system ("1s", "1m", "5m", "1h").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe(u64);

impl Timeframe {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000)
    }

    pub const fn from_mins(mins: u64) -> Self {
        Self(mins * 60_000)
    }

    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_time_delta(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.0 as i64)
    }

    /// Align a timestamp down to the start of its bucket.
    pub fn bucket_start(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let tf = self.0 as i64;
        let ms = time.timestamp_millis();
        let aligned = ms - ms.rem_euclid(tf);
        DateTime::from_timestamp_millis(aligned).unwrap_or(time)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = self.0;
        if ms % 3_600_000 == 0 {
            write!(f, "{}h", ms / 3_600_000)
        } else if ms % 60_000 == 0 {
            write!(f, "{}m", ms / 60_000)
        } else if ms % 1_000 == 0 {
            write!(f, "{}s", ms / 1_000)
        } else {
            write!(f, "{ms}ms")
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, multiplier) = if let Some(digits) = s.strip_suffix("ms") {
            (digits, 1)
        } else if let Some(digits) = s.strip_suffix('h') {
            (digits, 3_600_000)
        } else if let Some(digits) = s.strip_suffix('m') {
            (digits, 60_000)
        } else if let Some(digits) = s.strip_suffix('s') {
            (digits, 1_000)
        } else {
            return Err(format!("unrecognised timeframe label: {s}"));
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("unrecognised timeframe label: {s}"))?;
        if value == 0 {
            return Err(format!("zero-length timeframe: {s}"));
        }
        Ok(Self(value * multiplier))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(value: Timeframe) -> Self {
        value.to_string()
    }
}

/// Time-bucketed OHLCV aggregate.
///
/// Created open on the first tick in a new bucket, mutated in place by
/// subsequent ticks in the same bucket, immutable once `complete` is set.
///
/// Invariants: `low <= {open, close} <= high`, `volume` is the sum of
/// contributing quantities, and `bucket_start` is an exact multiple of the
/// timeframe length.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Bar {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub complete: bool,
}

impl Bar {
    /// Open a new bar from the first tick of a bucket.
    pub fn open_from(tick: &Tick, timeframe: Timeframe) -> Self {
        let bucket_start = timeframe.bucket_start(tick.time);
        Self {
            symbol: tick.symbol.clone(),
            timeframe,
            bucket_start,
            bucket_end: bucket_start + timeframe.as_time_delta(),
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.quantity,
            complete: false,
        }
    }

    /// Fold another tick from the same bucket into this open bar.
    pub fn apply(&mut self, tick: &Tick) {
        debug_assert!(!self.complete);
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        self.close = tick.price;
        self.volume += tick.quantity;
    }
}

/// Identity of a tracked pair at a given timeframe, e.g. `btcusdt-ethusdt@1m`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, derive_more::Display,
)]
pub struct PairId(SmolStr);

impl PairId {
    pub fn new(symbol_a: &str, symbol_b: &str, timeframe: Timeframe) -> Self {
        Self(SmolStr::new(format!("{symbol_a}-{symbol_b}@{timeframe}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A tracked pair of instruments resampled at one timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PairSpec {
    pub symbol_a: SmolStr,
    pub symbol_b: SmolStr,
    pub timeframe: Timeframe,
}

impl PairSpec {
    pub fn id(&self) -> PairId {
        PairId::new(&self.symbol_a, &self.symbol_b, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(secs * 1_000).unwrap()
    }

    #[test]
    fn test_timeframe_parse_round_trip() {
        for label in ["1s", "1m", "5m", "30s", "1h", "250ms"] {
            let tf: Timeframe = label.parse().unwrap();
            assert_eq!(tf.to_string(), label, "round trip failed for {label}");
        }
    }

    #[test]
    fn test_timeframe_parse_invalid() {
        assert!("".parse::<Timeframe>().is_err());
        assert!("1x".parse::<Timeframe>().is_err());
        assert!("0m".parse::<Timeframe>().is_err());
        assert!("m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_bucket_alignment() {
        let tf = Timeframe::from_secs(60);
        let t = DateTime::from_timestamp_millis(90_500).unwrap();
        assert_eq!(tf.bucket_start(t).timestamp_millis(), 60_000);

        // Exact boundary stays put
        let t = DateTime::from_timestamp_millis(120_000).unwrap();
        assert_eq!(tf.bucket_start(t).timestamp_millis(), 120_000);
    }

    #[test]
    fn test_tick_well_formed() {
        let good = Tick::new(time(1), "btcusdt", 100.0, 1.0);
        assert!(good.is_well_formed());

        assert!(!Tick::new(time(1), "btcusdt", 0.0, 1.0).is_well_formed());
        assert!(!Tick::new(time(1), "btcusdt", -1.0, 1.0).is_well_formed());
        assert!(!Tick::new(time(1), "btcusdt", f64::NAN, 1.0).is_well_formed());
        assert!(!Tick::new(time(1), "btcusdt", 100.0, 0.0).is_well_formed());
        assert!(!Tick::new(time(1), "", 100.0, 1.0).is_well_formed());
    }

    #[test]
    fn test_bar_open_and_apply() {
        let tf = Timeframe::from_secs(1);
        let mut bar = Bar::open_from(&Tick::new(time(0), "btcusdt", 100.0, 1.0), tf);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.bucket_start.timestamp_millis(), 0);
        assert_eq!(bar.bucket_end.timestamp_millis(), 1_000);

        bar.apply(&Tick::new(time(0), "btcusdt", 101.0, 2.0));
        bar.apply(&Tick::new(time(0), "btcusdt", 99.0, 1.0));

        assert_eq!(bar.high, 101.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 99.0);
        assert_eq!(bar.volume, 4.0);
        assert!(bar.low <= bar.open && bar.open <= bar.high);
        assert!(bar.low <= bar.close && bar.close <= bar.high);
    }

    #[test]
    fn test_pair_id_display() {
        let id = PairId::new("btcusdt", "ethusdt", Timeframe::from_mins(1));
        assert_eq!(id.to_string(), "btcusdt-ethusdt@1m");
    }
}
