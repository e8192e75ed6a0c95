//! Token usage accounting
//!
//! Providers report usage piecemeal: one event may carry input tokens, a later
//! one output and reasoning tokens, another only cached tokens. [`TokenUsage`]
//! keeps every counter optional so "not reported" is distinguishable from zero,
//! and [`TokenUsage::merge`] folds any number of partial reports into a running
//! total whose result does not depend on arrival order or grouping.
//!
//! ```rust
//! use agent_turn::TokenUsage;
//!
//! let prompt = TokenUsage::new().with_input_tokens(12);
//! let completion = TokenUsage::new().with_output_tokens(30).with_reasoning_tokens(8);
//!
//! let total = prompt.merge(&completion);
//! assert_eq!(total.input_tokens, Some(12));
//! assert_eq!(total.output_tokens, Some(30));
//! assert_eq!(total.cached_tokens, None);
//! ```

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Accounting counters reported by a generation provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

impl TokenUsage {
    /// A usage value with every counter absent (the merge identity)
    pub const fn new() -> Self {
        Self {
            input_tokens: None,
            output_tokens: None,
            total_tokens: None,
            cached_tokens: None,
            reasoning_tokens: None,
        }
    }

    pub fn with_input_tokens(mut self, tokens: u64) -> Self {
        self.input_tokens = Some(tokens);
        self
    }

    pub fn with_output_tokens(mut self, tokens: u64) -> Self {
        self.output_tokens = Some(tokens);
        self
    }

    pub fn with_total_tokens(mut self, tokens: u64) -> Self {
        self.total_tokens = Some(tokens);
        self
    }

    pub fn with_cached_tokens(mut self, tokens: u64) -> Self {
        self.cached_tokens = Some(tokens);
        self
    }

    pub fn with_reasoning_tokens(mut self, tokens: u64) -> Self {
        self.reasoning_tokens = Some(tokens);
        self
    }

    /// True when no counter was reported
    pub fn is_empty(&self) -> bool {
        *self == Self::new()
    }

    /// Combine two reports field by field.
    ///
    /// A field is `None` only when both sides are `None`; otherwise present
    /// values are summed with an absent side counting as zero. Sums saturate
    /// at `u64::MAX` rather than wrapping.
    pub fn merge(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: merge_field(self.input_tokens, other.input_tokens),
            output_tokens: merge_field(self.output_tokens, other.output_tokens),
            total_tokens: merge_field(self.total_tokens, other.total_tokens),
            cached_tokens: merge_field(self.cached_tokens, other.cached_tokens),
            reasoning_tokens: merge_field(self.reasoning_tokens, other.reasoning_tokens),
        }
    }

    /// Merge into a running total that may not exist yet.
    pub fn merge_optional(
        running: Option<TokenUsage>,
        next: Option<TokenUsage>,
    ) -> Option<TokenUsage> {
        match (running, next) {
            (None, None) => None,
            (Some(usage), None) | (None, Some(usage)) => Some(usage),
            (Some(a), Some(b)) => Some(a.merge(&b)),
        }
    }
}

fn merge_field(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        self.merge(&rhs)
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = self.merge(&rhs);
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::new(), |acc, usage| acc.merge(&usage))
    }
}
