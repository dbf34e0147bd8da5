pub mod openai;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::{COST_PER_1K_INPUT_TOKENS, COST_PER_1K_OUTPUT_TOKENS};
use crate::error::DescribeError;

/// The answer for one frame, with token accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescription {
    pub description: String,
    pub cost_usd: f64,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A service that can describe a frame.
pub trait Describer {
    /// Model identifier reported in run summaries.
    fn model(&self) -> &str;

    fn describe(&self, image: &RgbImage, prompt: &str) -> Result<FrameDescription, DescribeError>;
}

/// Token prices of one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    /// USD per 1K prompt tokens.
    pub input_per_1k: f64,
    /// USD per 1K completion tokens.
    pub output_per_1k: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            input_per_1k: COST_PER_1K_INPUT_TOKENS,
            output_per_1k: COST_PER_1K_OUTPUT_TOKENS,
        }
    }
}

impl CostModel {
    /// Estimated cost in USD, rounded to 5 decimals.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let raw = input_tokens as f64 / 1000.0 * self.input_per_1k
            + output_tokens as f64 / 1000.0 * self.output_per_1k;
        (raw * 1e5).round() / 1e5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prices_match_gpt_4o_mini() {
        let cost = CostModel::default();
        // 1M input tokens cost $0.15, 1M output tokens $0.60.
        assert!((cost.cost(1_000_000, 0) - 0.15).abs() < 1e-9);
        assert!((cost.cost(0, 1_000_000) - 0.60).abs() < 1e-9);
    }

    #[test]
    fn cost_is_rounded_to_five_decimals() {
        let cost = CostModel {
            input_per_1k: 1.0,
            output_per_1k: 0.0,
        };
        assert_eq!(cost.cost(123, 0), 0.123);
        let cost = CostModel {
            input_per_1k: 0.0123456,
            output_per_1k: 0.0,
        };
        assert_eq!(cost.cost(1000, 0), 0.01235);
    }

    #[test]
    fn no_tokens_costs_nothing() {
        assert_eq!(CostModel::default().cost(0, 0), 0.0);
    }
}
