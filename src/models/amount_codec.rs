use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::rail_core::types::TokenId;
use crate::token_registry::TokenRegistry;

#[derive(Debug, serde::Serialize)]
pub struct ClientAmount {
    pub token: String,
    pub amount: Decimal,
}

/// AmountCodec converts between client-facing decimal amounts (e.g. "1.5
/// FIL") and the internal integer units the ledger accounts in.
///
/// # Key Features
/// - **Precision Enforcement**: client inputs must not exceed the token's
///   `display_decimals`.
/// - **Safe Arithmetic**: checked operations, no silent overflow.
/// - **Rounding**: client output is rounded toward zero to
///   `display_decimals`.
pub struct AmountCodec {
    registry: Arc<TokenRegistry>,
}

impl AmountCodec {
    pub fn new(registry: Arc<TokenRegistry>) -> Self {
        Self { registry }
    }

    /// Converts a client-facing Decimal amount to internal integer units.
    ///
    /// # Errors
    /// * If the token is unknown.
    /// * If the amount exceeds the allowed `display_decimals` precision.
    /// * If the conversion overflows or the amount is negative.
    pub fn to_internal_amount(
        &self,
        token_name: &str,
        amount: Decimal,
    ) -> Result<(TokenId, u128), String> {
        let info = self
            .registry
            .get_info(token_name)
            .ok_or_else(|| format!("Unknown token: {}", token_name))?;

        // Validate input precision
        // Example: display_decimals 2 admits 1.25, rejects 1.255.
        if amount.normalize().scale() > info.display_decimals {
            return Err(format!(
                "Amount {} exceeds max precision {}",
                amount, info.display_decimals
            ));
        }

        let multiplier = Decimal::from(
            10_u64
                .checked_pow(info.decimals)
                .ok_or("Decimals too large, overflow")?,
        );
        let result = amount
            .checked_mul(multiplier)
            .ok_or_else(|| format!("Amount overflow: {}", amount))?
            .round();

        let raw_amount = result
            .to_u128()
            .ok_or_else(|| format!("Amount overflow or negative: {}", result))?;

        Ok((info.id, raw_amount))
    }

    /// Converts internal integer units to a client-facing Decimal, rounded
    /// toward zero to `display_decimals`.
    ///
    /// Returns `None` if the token is unknown or the value does not fit the
    /// decimal range.
    pub fn to_client_amount(&self, token_id: TokenId, amount: u128) -> Option<Decimal> {
        let info = self.registry.get_info_by_id(token_id)?;
        let mantissa = i128::try_from(amount).ok()?;
        let exact = Decimal::try_from_i128_with_scale(mantissa, info.decimals).ok()?;
        Some(exact.round_dp_with_strategy(
            info.display_decimals,
            rust_decimal::RoundingStrategy::ToZero,
        ))
    }

    pub fn to_client_amount_struct(&self, token_id: TokenId, amount: u128) -> Option<ClientAmount> {
        let name = self.registry.get_name(token_id)?.clone();
        Some(ClientAmount { token: name, amount: self.to_client_amount(token_id, amount)? })
    }
}
