//! Gas meters used by the admission pipeline and the execution engine.
//!
//! A meter is either infinite (setup work, genesis, block hooks) or bounded by the gas
//! limit the transaction declared. Running past the bound is reported through an explicit
//! [OutOfGas] value returned from [GasMeter::consume_gas]; the caller decides where to convert
//! it into a user facing error.
use log::debug;

use crate::common::Gas;

/// Raised by a meter when a consumption would exceed its limit.
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
#[error("out of gas in location: {descriptor}; limit: {limit}, wanted: {wanted}")]
pub struct OutOfGas {
    pub descriptor: String,
    pub limit: Gas,
    pub wanted: Gas,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GasMeter {
    limit: Option<Gas>,
    consumed: Gas,
}

impl GasMeter {
    pub fn new(limit: Gas) -> Self {
        Self {
            limit: Some(limit),
            consumed: 0,
        }
    }

    pub fn infinite() -> Self {
        Self {
            limit: None,
            consumed: 0,
        }
    }

    #[inline(always)]
    pub fn is_infinite(&self) -> bool {
        self.limit.is_none()
    }

    /// The limit of the meter; `Gas::MAX` when infinite.
    #[inline(always)]
    pub fn limit(&self) -> Gas {
        self.limit.unwrap_or(Gas::MAX)
    }

    #[inline(always)]
    pub fn gas_consumed(&self) -> Gas {
        self.consumed
    }

    pub fn gas_consumed_to_limit(&self) -> Gas {
        match self.limit {
            Some(limit) if self.consumed > limit => limit,
            _ => self.consumed,
        }
    }

    pub fn gas_remaining(&self) -> Gas {
        self.limit().saturating_sub(self.consumed)
    }

    pub fn is_past_limit(&self) -> bool {
        matches!(self.limit, Some(limit) if self.consumed > limit)
    }

    pub fn is_out_of_gas(&self) -> bool {
        matches!(self.limit, Some(limit) if self.consumed >= limit)
    }

    /// Charge `amount` against the meter. A bounded meter still records the consumption when
    /// it fails so that `gas_consumed` reports what was wanted.
    pub fn consume_gas(
        &mut self, amount: Gas, descriptor: &str,
    ) -> Result<(), OutOfGas> {
        let limit = match self.limit {
            Some(limit) => limit,
            None => {
                self.consumed = self.consumed.saturating_add(amount);
                return Ok(())
            }
        };
        let wanted = match self.consumed.checked_add(amount) {
            Some(wanted) => wanted,
            None => {
                debug!("gas overflow: {} + {} ({})", self.consumed, amount, descriptor);
                self.consumed = Gas::MAX;
                return Err(OutOfGas {
                    descriptor: descriptor.into(),
                    limit,
                    wanted: Gas::MAX,
                })
            }
        };
        self.consumed = wanted;
        if wanted > limit {
            debug!("Out of Gas: {} > {} ({})", wanted, limit, descriptor);
            return Err(OutOfGas {
                descriptor: descriptor.into(),
                limit,
                wanted,
            })
        }
        Ok(())
    }

    pub fn refund_gas(&mut self, amount: Gas, descriptor: &str) {
        if amount > self.consumed {
            debug!("refund {} exceeds consumed gas ({})", amount, descriptor);
        }
        self.consumed = self.consumed.saturating_sub(amount)
    }
}
