//! Candidate scanner and scoring engine
//!
//! Filters the tradable universe, fans data collection out to the gateway,
//! computes features, applies the hard filters and ranks by composite
//! score. Stateless: every invocation reads fresh snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::data::{CandleProcessor, FeatureCalculator, FeatureVector};
use crate::time_utils::kst_now;
use crate::types::Market;
use crate::upbit::{OrderbookSnapshot, RawCandle, UpbitClient};

/// Result of one market scan
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub candidates: Vec<FeatureVector>,
    pub total_markets: usize,
    pub processed_markets: usize,
    pub filtered_markets: usize,
    pub scan_duration_seconds: f64,
    pub timestamp: DateTime<FixedOffset>,
}

/// Market scanner for identifying trading candidates
pub struct CandidateScanner {
    config: Config,
    client: Arc<UpbitClient>,
    feature_calculator: FeatureCalculator,
    candle_processor: CandleProcessor,
}

impl CandidateScanner {
    pub fn new(config: Config, client: Arc<UpbitClient>) -> Self {
        let feature_calculator = FeatureCalculator::new(config.scanner.clone());
        let candle_processor = CandleProcessor::new(config.scanner.candle_unit);
        Self {
            config,
            client,
            feature_calculator,
            candle_processor,
        }
    }

    /// Universe selection: KRW quote, no warning flags, priority markets
    /// first, then alphabetical fill up to the scan cap
    pub async fn tradable_markets(&self) -> Result<Vec<String>, crate::upbit::UpbitError> {
        let all_markets = self.client.get_markets().await?;

        let mut priority_found = Vec::new();
        let mut rest = Vec::new();

        for info in &all_markets {
            if !info.market.starts_with("KRW-") {
                continue;
            }
            if self.config.symbols.exclude_warning && info.has_warning() {
                debug!(market = %info.market, "excluded warning market");
                continue;
            }

            if self.config.symbols.priority_markets.contains(&info.market) {
                priority_found.push(info.market.clone());
            } else {
                rest.push(info.market.clone());
            }
        }

        let mut selected = priority_found;
        let remaining = self
            .config
            .symbols
            .max_markets_to_scan
            .saturating_sub(selected.len());
        rest.sort();
        selected.extend(rest.into_iter().take(remaining));

        info!(
            total = all_markets.len(),
            selected = selected.len(),
            cap = self.config.symbols.max_markets_to_scan,
            "universe selection complete"
        );

        Ok(selected)
    }

    /// Concurrent data fan-out: per-market candles, one reference series,
    /// one orderbook batch. Partial failures drop the market, not the tick.
    async fn collect_market_data(
        &self,
        markets: &[String],
    ) -> (
        HashMap<String, Vec<RawCandle>>,
        Vec<RawCandle>,
        HashMap<String, OrderbookSnapshot>,
    ) {
        let scanner = &self.config.scanner;

        let candles = self
            .client
            .get_multiple_candles(markets, scanner.candle_unit, scanner.candle_count)
            .await;

        let reference = match self
            .client
            .get_candles(
                &scanner.rs_reference_symbol,
                scanner.candle_unit,
                scanner.candle_count,
                None,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "reference series fetch failed, RS degrades to raw return");
                Vec::new()
            }
        };

        let orderbooks = match self.client.get_orderbook(markets).await {
            Ok(books) => books.into_iter().map(|b| (b.market.clone(), b)).collect(),
            Err(e) => {
                warn!(error = %e, "orderbook fetch failed, depth/spread filters will reject");
                HashMap::new()
            }
        };

        (candles, reference, orderbooks)
    }

    /// Candle-process each market and compute its feature vector
    fn compute_features(
        &self,
        candle_data: &HashMap<String, Vec<RawCandle>>,
        reference_raw: &[RawCandle],
        orderbooks: &HashMap<String, OrderbookSnapshot>,
        now: DateTime<FixedOffset>,
    ) -> Vec<FeatureVector> {
        let (reference_candles, _) =
            self.candle_processor
                .process(reference_raw, &self.config.scanner.rs_reference_symbol, false);

        let mut results = Vec::new();
        for (market_code, raw) in candle_data {
            let (candles, report) = self.candle_processor.process(raw, market_code, false);
            if !report.is_valid {
                debug!(
                    market = %market_code,
                    quality = report.data_quality_score,
                    "skipping market on data quality"
                );
                continue;
            }

            let market = Market::new(market_code);
            if let Some(features) = self.feature_calculator.calculate_all(
                &market,
                &candles,
                &reference_candles,
                orderbooks.get(market_code),
                now,
            ) {
                results.push(features);
            } else {
                debug!(market = %market_code, "feature calculation skipped market");
            }
        }
        results
    }

    /// Hard filters then rank by final score descending
    fn filter_and_rank(&self, features: Vec<FeatureVector>) -> (usize, Vec<FeatureVector>) {
        let mut passed: Vec<FeatureVector> = features
            .into_iter()
            .filter(|fv| {
                let failed = self.feature_calculator.failed_filters(fv);
                if failed.is_empty() {
                    true
                } else {
                    debug!(market = %fv.market, failed = failed.join(", "), "filtered out");
                    false
                }
            })
            .collect();

        passed.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let filtered_count = passed.len();
        passed.truncate(self.config.scanner.candidate_count);
        (filtered_count, passed)
    }

    /// Perform a complete market scan
    pub async fn scan(&self) -> Result<ScanResult, crate::upbit::UpbitError> {
        let started = Instant::now();
        let scan_id = Uuid::new_v4();
        let now = kst_now();
        info!(%scan_id, "starting market scan");

        let markets = self.tradable_markets().await?;
        if markets.is_empty() {
            warn!(%scan_id, "no tradable markets found");
            return Ok(ScanResult {
                candidates: Vec::new(),
                total_markets: 0,
                processed_markets: 0,
                filtered_markets: 0,
                scan_duration_seconds: started.elapsed().as_secs_f64(),
                timestamp: now,
            });
        }

        let (candle_data, reference, orderbooks) = self.collect_market_data(&markets).await;
        let features = self.compute_features(&candle_data, &reference, &orderbooks, now);
        let processed_markets = features.len();
        let (filtered_markets, candidates) = self.filter_and_rank(features);

        let scan_duration_seconds = started.elapsed().as_secs_f64();
        info!(
            %scan_id,
            total = markets.len(),
            processed = processed_markets,
            filtered = filtered_markets,
            selected = candidates.len(),
            duration_s = scan_duration_seconds,
            "market scan complete"
        );
        for candidate in &candidates {
            info!(
                %scan_id,
                market = %candidate.market,
                score = candidate.final_score,
                rvol = candidate.rvol,
                rs = candidate.relative_strength,
                "scan candidate"
            );
        }

        Ok(ScanResult {
            candidates,
            total_markets: markets.len(),
            processed_markets,
            filtered_markets,
            scan_duration_seconds,
            timestamp: now,
        })
    }
}
