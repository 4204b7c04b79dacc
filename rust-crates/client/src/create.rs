use crate::{
    format::MON_DECIMALS,
    pool::TICKETS_PER_POOL,
};
use web3::types::U256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DepositError {
    #[error("Enter a deposit amount.")]
    Empty,
    #[error("Invalid amount.")]
    Invalid,
    #[error("Minimum deposit is 0.01 MON.")]
    BelowMinimum,
    #[error("Maximum deposit is 10,000 MON.")]
    AboveMaximum,
    #[error("Deposit must be evenly divisible by 100 (for ticket pricing).")]
    NotDivisible,
}

pub fn min_deposit() -> U256 {
    U256::exp10(MON_DECIMALS - 2)
}

pub fn max_deposit() -> U256 {
    U256::from(10_000) * U256::exp10(MON_DECIMALS)
}

/// Parse a decimal MON amount such as `1`, `0.5` or `.25` into wei.
pub fn parse_mon(text: &str) -> Option<U256> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty())
        || !is_digits(whole)
        || !is_digits(fraction)
        || fraction.len() > MON_DECIMALS
    {
        return None;
    }
    let whole = if whole.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(whole).ok()?
    };
    let fraction = if fraction.is_empty() {
        U256::zero()
    } else {
        U256::from_dec_str(fraction).ok()? * U256::exp10(MON_DECIMALS - fraction.len())
    };
    whole
        .checked_mul(U256::exp10(MON_DECIMALS))?
        .checked_add(fraction)
}

/// Check a deposit entered as text and return it in wei.
pub fn validate_deposit(text: &str) -> Result<U256, DepositError> {
    if text.trim().is_empty() {
        return Err(DepositError::Empty);
    }
    let deposit = parse_mon(text).ok_or(DepositError::Invalid)?;
    if deposit.is_zero() {
        return Err(DepositError::Invalid);
    }
    if deposit < min_deposit() {
        return Err(DepositError::BelowMinimum);
    }
    if deposit > max_deposit() {
        return Err(DepositError::AboveMaximum);
    }
    if !(deposit % U256::from(TICKETS_PER_POOL)).is_zero() {
        return Err(DepositError::NotDivisible);
    }
    Ok(deposit)
}

/// Figures shown before a pool is created. The contract computes the real split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreationPreview {
    pub deposit: U256,
    pub ticket_price: U256,
    pub prize_pool: U256,
    pub creator_fee: U256,
}

impl CreationPreview {
    pub fn for_deposit(deposit: U256) -> Self {
        Self {
            deposit,
            ticket_price: deposit / U256::from(TICKETS_PER_POOL),
            prize_pool: deposit * U256::from(90) / U256::from(100),
            creator_fee: deposit * U256::from(8) / U256::from(100),
        }
    }
}
