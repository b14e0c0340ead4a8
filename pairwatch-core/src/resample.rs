//! Tick-to-bar resampling.
//!
//! Buckets ticks per (symbol, timeframe) into OHLCV bars using tick
//! timestamps (not wall clock) for bucket boundaries. Empty buckets produce
//! no bar at all: nothing is ever synthesized or interpolated.

use crate::{
    error::IngestionError,
    event::{Bar, Tick, Timeframe},
};
use fnv::FnvHashMap;
use smol_str::SmolStr;
use tracing::trace;

/// Outcome of folding one tick into one (symbol, timeframe) aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// First tick seen for this bucket series; a bar is now open.
    BarOpened,
    /// Tick folded into the currently open bar.
    BarUpdated,
    /// Tick opened a new bucket; the previously open bar is complete.
    BarCompleted(Bar),
}

/// Maintains at most one open bar for a single (symbol, timeframe).
///
/// Each aggregator is exclusively owned by the ingestion stage and shares no
/// mutable state with any other instance.
#[derive(Debug, Clone)]
pub struct BarAggregator {
    timeframe: Timeframe,
    max_clock_skew_ms: u64,
    open: Option<Bar>,
    last_tick_ms: Option<i64>,
}

impl BarAggregator {
    pub fn new(timeframe: Timeframe, max_clock_skew_ms: u64) -> Self {
        Self {
            timeframe,
            max_clock_skew_ms,
            open: None,
            last_tick_ms: None,
        }
    }

    /// The in-progress bar, visible only to the owning writer.
    pub fn open_bar(&self) -> Option<&Bar> {
        self.open.as_ref()
    }

    pub fn ingest(&mut self, tick: &Tick) -> Result<IngestOutcome, IngestionError> {
        let tick_ms = tick.time.timestamp_millis();

        // Skew is a jump beyond the bound from the last observed tick, not a
        // quiet gap: empty buckets roll the bar normally. The rejected
        // timestamp becomes the new reference, so a stream that keeps
        // printing at the new time level is accepted from the next tick on.
        if let Some(last_tick_ms) = self.last_tick_ms {
            if tick_ms - last_tick_ms > self.max_clock_skew_ms as i64 {
                self.last_tick_ms = Some(tick_ms);
                return Err(IngestionError::ClockSkew {
                    tick_ms,
                    last_tick_ms,
                });
            }
            self.last_tick_ms = Some(last_tick_ms.max(tick_ms));
        } else {
            self.last_tick_ms = Some(tick_ms);
        }

        let bucket_start = self.timeframe.bucket_start(tick.time);

        let Some(open) = self.open.as_mut() else {
            self.open = Some(Bar::open_from(tick, self.timeframe));
            return Ok(IngestOutcome::BarOpened);
        };

        if bucket_start == open.bucket_start {
            open.apply(tick);
            return Ok(IngestOutcome::BarUpdated);
        }

        if bucket_start < open.bucket_start {
            // A bar for that bucket has already been superseded; never mutate it.
            return Err(IngestionError::LateArrival {
                symbol: tick.symbol.to_string(),
                timeframe: self.timeframe,
            });
        }

        // Roll the bucket: finalize the open bar and open a new one.
        open.complete = true;
        let completed = open.clone();
        *open = Bar::open_from(tick, self.timeframe);

        trace!(
            symbol = %completed.symbol,
            timeframe = %completed.timeframe,
            close = completed.close,
            volume = completed.volume,
            "bar completed"
        );
        Ok(IngestOutcome::BarCompleted(completed))
    }
}

/// Per-timeframe rejections for an otherwise accepted tick.
pub type TimeframeRejection = (Timeframe, IngestionError);

/// Result of routing one accepted tick through every configured timeframe.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    /// Bars completed by this tick, at most one per timeframe.
    pub completed: Vec<Bar>,
    /// Timeframes that rejected the tick (late arrival or clock skew).
    pub rejections: Vec<TimeframeRejection>,
}

/// Routes ticks to one [`BarAggregator`] per observed (symbol, timeframe).
///
/// Aggregators are created lazily on a symbol's first tick; the set of
/// timeframes is fixed at construction.
#[derive(Debug)]
pub struct Resampler {
    timeframes: Vec<Timeframe>,
    max_clock_skew_ms: u64,
    aggregators: FnvHashMap<(SmolStr, Timeframe), BarAggregator>,
}

impl Resampler {
    pub fn new(timeframes: Vec<Timeframe>, max_clock_skew_ms: u64) -> Self {
        Self {
            timeframes,
            max_clock_skew_ms,
            aggregators: FnvHashMap::default(),
        }
    }

    /// Ingest one tick.
    ///
    /// `Err` means the tick was rejected wholesale as malformed before any
    /// aggregator was touched. `Ok` means it was accepted, with any
    /// per-timeframe rejections reported alongside the completed bars.
    pub fn ingest(&mut self, tick: &Tick) -> Result<IngestReport, IngestionError> {
        if !tick.is_well_formed() {
            return Err(IngestionError::MalformedTick(format!(
                "symbol={} price={} quantity={}",
                tick.symbol, tick.price, tick.quantity
            )));
        }

        let mut report = IngestReport::default();
        for &timeframe in &self.timeframes {
            let aggregator = self
                .aggregators
                .entry((tick.symbol.clone(), timeframe))
                .or_insert_with(|| BarAggregator::new(timeframe, self.max_clock_skew_ms));

            match aggregator.ingest(tick) {
                Ok(IngestOutcome::BarCompleted(bar)) => report.completed.push(bar),
                Ok(_) => {}
                Err(reason) => report.rejections.push((timeframe, reason)),
            }
        }
        Ok(report)
    }

    /// In-progress bar for a (symbol, timeframe), if any.
    pub fn open_bar(&self, symbol: &str, timeframe: Timeframe) -> Option<&Bar> {
        self.aggregators
            .get(&(SmolStr::new(symbol), timeframe))
            .and_then(BarAggregator::open_bar)
    }
}
