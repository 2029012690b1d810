use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::types::Points;

/// Sole owner of the running point total and its cap.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupplyAccountant {
    max_supply: Points,
    total_supply: Points,
}

impl SupplyAccountant {
    pub fn new(max_supply: Points) -> Self {
        Self {
            max_supply,
            total_supply: 0,
        }
    }

    pub fn max_supply(&self) -> Points {
        self.max_supply
    }

    pub fn total_supply(&self) -> Points {
        self.total_supply
    }

    pub fn try_increase(&mut self, amount: Points) -> Result<Points> {
        let next = self
            .total_supply
            .checked_add(amount)
            .filter(|next| *next <= self.max_supply)
            .ok_or(LedgerError::SupplyExceeded {
                requested: amount,
                total: self.total_supply,
                max: self.max_supply,
            })?;
        self.total_supply = next;
        Ok(next)
    }

    /// Callers guarantee `amount <= total_supply`; anything else is a bug in
    /// the engine, not a recoverable condition.
    pub fn decrease(&mut self, amount: Points) -> Points {
        assert!(
            amount <= self.total_supply,
            "supply decrease of {amount} exceeds total {}",
            self.total_supply
        );
        self.total_supply -= amount;
        self.total_supply
    }
}
