//! Model usage statistics and the shared call budget across roles.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Usage counters reported by a step executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelStats {
    pub instance_cost: f64,
    pub tokens_sent: u64,
    pub tokens_received: u64,
    pub api_calls: u64,
}

impl Add for ModelStats {
    type Output = ModelStats;

    fn add(mut self, rhs: ModelStats) -> ModelStats {
        self += rhs;
        self
    }
}

impl AddAssign for ModelStats {
    fn add_assign(&mut self, rhs: ModelStats) {
        self.instance_cost += rhs.instance_cost;
        self.tokens_sent += rhs.tokens_sent;
        self.tokens_received += rhs.tokens_received;
        self.api_calls += rhs.api_calls;
    }
}

impl Sum for ModelStats {
    fn sum<I: Iterator<Item = ModelStats>>(iter: I) -> ModelStats {
        iter.fold(ModelStats::default(), Add::add)
    }
}

/// Call allowance left for a role after earlier roles consumed `consumed` calls.
///
/// `None` is unlimited. A finite limit never goes below zero; a zero
/// allowance makes the role's first model call fail with `BudgetExhausted`.
pub fn remaining_calls(limit: Option<u64>, consumed: u64) -> Option<u64> {
    limit.map(|limit| limit.saturating_sub(consumed))
}
