use crate::constants::{is_allowed_currency, MAX_AMOUNT_LIMIT};
use crate::error::VaultError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A currency-tagged, fixed-point amount. Never backed by a float — amounts
/// are compared and serialized as exact decimals (spec's "Decimal money"
/// guidance).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

/// A three-letter ISO-4217 code, validated against the vault's allowlist.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn parse(code: &str) -> Result<Self, VaultError> {
        if !is_allowed_currency(code) {
            return Err(VaultError::invalid_input(format!("unsupported currency: {code}")));
        }
        let upper = code.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).expect("currency bytes are always ASCII")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Money {
    /// Parses an amount + currency, enforcing scale-2 and the vault-wide
    /// maximum (spec §4.3: `amount_limit`/`max_amount` bounds).
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, VaultError> {
        if amount.is_sign_negative() {
            return Err(VaultError::invalid_input("amount must not be negative"));
        }
        if amount.scale() > 2 {
            return Err(VaultError::invalid_input("amount must have at most 2 decimal places"));
        }
        let max = Decimal::from_str(MAX_AMOUNT_LIMIT).expect("constant parses");
        if amount > max {
            return Err(VaultError::invalid_input(format!("amount exceeds maximum of {max}")));
        }
        Ok(Self { amount: amount.round_dp(2), currency })
    }

    pub fn parse(amount: &str, currency: &str) -> Result<Self, VaultError> {
        let decimal = Decimal::from_str(amount)
            .map_err(|_| VaultError::invalid_input(format!("invalid amount: {amount}")))?;
        Self::new(decimal, Currency::parse(currency)?)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// `true` if `other` fits within this amount as an upper bound, same
    /// currency. Used by the dispatcher's scope checks.
    pub fn covers(&self, other: &Money) -> bool {
        self.currency == other.currency && self.amount >= other.amount
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

impl fmt::Debug for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Money({} {})", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_amount() {
        let m = Money::parse("100.00", "USD").unwrap();
        assert_eq!(m.to_string(), "100.00 USD");
    }

    #[test]
    fn rejects_unknown_currency() {
        assert!(Money::parse("10.00", "ZZZ").is_err());
    }

    #[test]
    fn rejects_negative_amount() {
        assert!(Money::parse("-1.00", "USD").is_err());
    }

    #[test]
    fn rejects_excess_scale() {
        assert!(Money::parse("10.001", "USD").is_err());
    }

    #[test]
    fn rejects_over_max() {
        assert!(Money::parse("1000000.00", "USD").is_err());
    }

    #[test]
    fn zero_is_valid_but_flagged_zero() {
        let m = Money::parse("0.00", "USD").unwrap();
        assert!(m.is_zero());
    }

    #[test]
    fn covers_checks_currency_and_amount() {
        let limit = Money::parse("100.00", "USD").unwrap();
        let spend = Money::parse("50.00", "USD").unwrap();
        assert!(limit.covers(&spend));
        assert!(!spend.covers(&limit));
        let eur = Money::parse("50.00", "EUR").unwrap();
        assert!(!limit.covers(&eur));
    }
}
