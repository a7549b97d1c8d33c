//! Market data processing: candle validation and feature calculation

pub mod candles;
pub mod features;

pub use candles::{CandleProcessor, CandleValidationReport};
pub use features::{FeatureCalculator, FeatureVector};
