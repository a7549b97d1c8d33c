//! Candle batch processing
//!
//! Raw candle batches from the gateway are validated, coerced into typed
//! candles, sorted strictly ascending, and optionally gap-filled. A batch
//! that fails validation is reported to the scanner as a skip signal for
//! that market; it never aborts the tick.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone};
use tracing::{debug, warn};

use crate::time_utils::kst;
use crate::types::Candle;
use crate::upbit::RawCandle;

/// Most synthetic candles inserted into a single gap
const MAX_GAP_FILL: usize = 10;

/// Result of candle batch validation
#[derive(Debug, Clone)]
pub struct CandleValidationReport {
    pub is_valid: bool,
    pub total_candles: usize,
    pub valid_candles: usize,
    pub missing_data_points: usize,
    pub gaps_detected: usize,
    pub data_quality_score: f64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CandleValidationReport {
    fn empty_batch() -> Self {
        CandleValidationReport {
            is_valid: false,
            total_candles: 0,
            valid_candles: 0,
            missing_data_points: 0,
            gaps_detected: 0,
            data_quality_score: 0.0,
            warnings: Vec::new(),
            errors: vec!["no candle data provided".to_string()],
        }
    }
}

/// Candle data processor for a fixed candle period
#[derive(Debug, Clone)]
pub struct CandleProcessor {
    candle_unit: u32,
}

impl CandleProcessor {
    pub fn new(candle_unit: u32) -> Self {
        Self { candle_unit }
    }

    fn expected_gap(&self) -> Duration {
        Duration::minutes(self.candle_unit as i64)
    }

    fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
        // The venue sends naive KST timestamps like "2024-03-04T09:05:00"
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .and_then(|naive| kst().from_local_datetime(&naive).single())
    }

    /// Validate a raw batch, producing a quality report
    pub fn validate(&self, raw_candles: &[RawCandle], market: &str) -> CandleValidationReport {
        if raw_candles.is_empty() {
            return CandleValidationReport::empty_batch();
        }

        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        let mut valid_candles = 0usize;
        let mut missing_data_points = 0usize;
        let mut gaps_detected = 0usize;
        let mut previous_timestamp: Option<DateTime<FixedOffset>> = None;

        for (i, candle) in raw_candles.iter().enumerate() {
            let mut candle_valid = true;

            let required_present = candle.candle_date_time_kst.is_some()
                && candle.opening_price.is_some()
                && candle.high_price.is_some()
                && candle.low_price.is_some()
                && candle.trade_price.is_some()
                && candle.candle_acc_trade_volume.is_some();

            if !required_present {
                errors.push(format!("missing required field in candle {}", i));
                missing_data_points += 1;
                continue;
            }

            let open = candle.opening_price.unwrap();
            let high = candle.high_price.unwrap();
            let low = candle.low_price.unwrap();
            let close = candle.trade_price.unwrap();
            let volume = candle.candle_acc_trade_volume.unwrap();

            if high < low {
                errors.push(format!("high < low in candle {}", i));
                candle_valid = false;
            }
            if open <= 0.0 || high <= 0.0 || low <= 0.0 || close <= 0.0 {
                errors.push(format!("non-positive price in candle {}", i));
                candle_valid = false;
            }
            if volume < 0.0 {
                errors.push(format!("negative volume in candle {}", i));
                candle_valid = false;
            }
            if open < low || open > high {
                warnings.push(format!("open outside high-low range in candle {}", i));
            }
            if close < low || close > high {
                warnings.push(format!("close outside high-low range in candle {}", i));
            }

            match Self::parse_timestamp(candle.candle_date_time_kst.as_deref().unwrap()) {
                Some(timestamp) => {
                    if let Some(prev) = previous_timestamp {
                        if timestamp <= prev {
                            warnings.push(format!(
                                "timestamp out of order at candle {}: {} <= {}",
                                i, timestamp, prev
                            ));
                        } else if timestamp - prev
                            > self.expected_gap() + self.expected_gap() / 2
                        {
                            gaps_detected += 1;
                        }
                    }
                    previous_timestamp = Some(timestamp);
                }
                None => {
                    errors.push(format!("unparseable timestamp in candle {}", i));
                    candle_valid = false;
                }
            }

            if candle_valid {
                valid_candles += 1;
            }
        }

        let total_candles = raw_candles.len();
        let completeness = valid_candles as f64 / total_candles as f64;
        let data_quality_score =
            (completeness - 0.1 * gaps_detected as f64).clamp(0.0, 1.0);

        let is_valid = errors.is_empty()
            && valid_candles as f64 >= total_candles as f64 * 0.9
            && data_quality_score >= 0.7;

        debug!(
            market,
            total_candles,
            valid_candles,
            gaps_detected,
            quality = data_quality_score,
            is_valid,
            "candle batch validated"
        );

        CandleValidationReport {
            is_valid,
            total_candles,
            valid_candles,
            missing_data_points,
            gaps_detected,
            data_quality_score,
            warnings,
            errors,
        }
    }

    /// Coerce raw candles into typed candles, dropping anything malformed
    fn clean(&self, raw_candles: &[RawCandle]) -> Vec<Candle> {
        raw_candles
            .iter()
            .filter_map(|raw| {
                let timestamp = Self::parse_timestamp(raw.candle_date_time_kst.as_deref()?)?;
                let candle = Candle::new_unchecked(
                    timestamp,
                    raw.opening_price?,
                    raw.high_price?,
                    raw.low_price?,
                    raw.trade_price?,
                    raw.candle_acc_trade_volume?,
                );
                candle.is_valid().then_some(candle)
            })
            .collect()
    }

    /// Sort strictly ascending by open time, collapsing duplicates
    fn sort(&self, mut candles: Vec<Candle>) -> Vec<Candle> {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        candles
    }

    /// Insert up to [`MAX_GAP_FILL`] synthetic zero-volume candles per gap,
    /// forward-filling the previous candle's prices
    fn fill_gaps(&self, candles: Vec<Candle>) -> Vec<Candle> {
        if candles.len() < 2 {
            return candles;
        }

        let expected = self.expected_gap();
        let mut filled = Vec::with_capacity(candles.len());

        for window in candles.windows(2) {
            let current = &window[0];
            let next = &window[1];
            filled.push(current.clone());

            let gap = next.timestamp - current.timestamp;
            if gap > expected + expected / 2 {
                let missing = (gap.num_seconds() / expected.num_seconds() - 1) as usize;
                for j in 1..=missing.min(MAX_GAP_FILL) {
                    let mut synthetic = current.clone();
                    synthetic.timestamp = current.timestamp + expected * j as i32;
                    synthetic.volume = 0.0;
                    filled.push(synthetic);
                }
            }
        }
        filled.push(candles.last().expect("len >= 2").clone());
        filled
    }

    /// Complete processing pipeline: validate, clean, sort, optionally fill
    pub fn process(
        &self,
        raw_candles: &[RawCandle],
        market: &str,
        fill_missing: bool,
    ) -> (Vec<Candle>, CandleValidationReport) {
        let report = self.validate(raw_candles, market);

        if !report.is_valid {
            warn!(
                market,
                errors = report.errors.len(),
                quality = report.data_quality_score,
                "candle batch failed validation"
            );
        }

        let mut candles = self.sort(self.clean(raw_candles));
        if fill_missing {
            candles = self.fill_gaps(candles);
        }

        (candles, report)
    }
}
