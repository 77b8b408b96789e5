use anchor_lang::prelude::*;
use anchor_lang::solana_program::native_token::LAMPORTS_PER_SOL;
use std::panic::Location;

use crate::state::KinlendError;
use crate::MAX_BASIS_POINTS;

pub trait SafeMath: Sized {
    fn safe_add(self, rhs: Self) -> Result<Self>;
    fn safe_sub(self, rhs: Self) -> Result<Self>;
    fn safe_mul(self, rhs: Self) -> Result<Self>;
    fn safe_div(self, rhs: Self) -> Result<Self>;
}

macro_rules! checked_impl {
    ($t:ty) => {
        impl SafeMath for $t {
            #[track_caller]
            #[inline(always)]
            fn safe_add(self, rhs: $t) -> Result<$t> {
                match self.checked_add(rhs) {
                    Some(result) => Ok(result),
                    None => {
                        let caller = Location::caller();
                        msg!("Math overflow at {}:{}", caller.file(), caller.line());
                        Err(KinlendError::MathOverflow.into())
                    }
                }
            }

            #[track_caller]
            #[inline(always)]
            fn safe_sub(self, rhs: $t) -> Result<$t> {
                match self.checked_sub(rhs) {
                    Some(result) => Ok(result),
                    None => {
                        let caller = Location::caller();
                        msg!("Math underflow at {}:{}", caller.file(), caller.line());
                        Err(KinlendError::MathOverflow.into())
                    }
                }
            }

            #[track_caller]
            #[inline(always)]
            fn safe_mul(self, rhs: $t) -> Result<$t> {
                match self.checked_mul(rhs) {
                    Some(result) => Ok(result),
                    None => {
                        let caller = Location::caller();
                        msg!("Math overflow at {}:{}", caller.file(), caller.line());
                        Err(KinlendError::MathOverflow.into())
                    }
                }
            }

            #[track_caller]
            #[inline(always)]
            fn safe_div(self, rhs: $t) -> Result<$t> {
                match self.checked_div(rhs) {
                    Some(result) => Ok(result),
                    None => {
                        let caller = Location::caller();
                        msg!("Division error at {}:{}", caller.file(), caller.line());
                        Err(KinlendError::MathOverflow.into())
                    }
                }
            }
        }
    };
}

checked_impl!(i32);
checked_impl!(u64);
checked_impl!(u128);
checked_impl!(i64);

/// Value of `collateral` lamports in USDC base units, given a price with 6 decimals
/// per whole SOL.
pub fn collateral_value(collateral: u64, price: u64) -> Result<u128> {
    (collateral as u128)
        .safe_mul(price as u128)?
        .safe_div(LAMPORTS_PER_SOL as u128)
}

/// Collateralization ratio in basis points. A loan of zero is treated as infinitely
/// collateralized.
pub fn collateral_ratio_bps(collateral: u64, loan_amount: u64, price: u64) -> Result<u64> {
    if loan_amount == 0 {
        return Ok(u64::MAX);
    }
    let ratio = (collateral as u128)
        .safe_mul(price as u128)?
        .safe_mul(MAX_BASIS_POINTS as u128)?
        .safe_div(LAMPORTS_PER_SOL as u128)?
        .safe_div(loan_amount as u128)?;
    Ok(u64::try_from(ratio).unwrap_or(u64::MAX))
}

/// `collateral * price >= loan_amount * ratio_bps`, compared without rounding.
pub fn meets_collateral_ratio(
    collateral: u64,
    loan_amount: u64,
    price: u64,
    ratio_bps: u64,
) -> Result<bool> {
    let value = (collateral as u128)
        .safe_mul(price as u128)?
        .safe_mul(MAX_BASIS_POINTS as u128)?;
    let required = (loan_amount as u128)
        .safe_mul(ratio_bps as u128)?
        .safe_mul(LAMPORTS_PER_SOL as u128)?;
    Ok(value >= required)
}

pub fn is_liquidatable(
    collateral: u64,
    loan_amount: u64,
    price: u64,
    liquidation_threshold_bps: u64,
) -> Result<bool> {
    Ok(!meets_collateral_ratio(
        collateral,
        loan_amount,
        price,
        liquidation_threshold_bps,
    )?)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepaymentSplit {
    pub principal: u64,
    pub interest: u64,
    pub protocol_fee: u64,
}

impl RepaymentSplit {
    pub fn to_lender(&self) -> Result<u64> {
        self.principal.safe_add(self.interest)
    }

    pub fn total_due(&self) -> Result<u64> {
        self.to_lender()?.safe_add(self.protocol_fee)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiquidationSplit {
    pub to_lender: u64,
    pub protocol_fee: u64,
}

pub fn liquidation_split(collateral: u64, liquidation_fee_bps: u64) -> Result<LiquidationSplit> {
    let protocol_fee = (collateral as u128)
        .safe_mul(liquidation_fee_bps as u128)?
        .safe_div(MAX_BASIS_POINTS as u128)? as u64;
    Ok(LiquidationSplit {
        to_lender: collateral.safe_sub(protocol_fee)?,
        protocol_fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOL_AT_200: u64 = 200_000_000;
    const SOL_AT_100: u64 = 100_000_000;

    #[test]
    fn origination_ratio_is_exact_at_150_percent() {
        assert!(meets_collateral_ratio(7_500_000, 1_000_000, SOL_AT_200, 15_000).unwrap());
        assert!(!meets_collateral_ratio(7_499_999, 1_000_000, SOL_AT_200, 15_000).unwrap());
        assert!(!meets_collateral_ratio(7_500_000, 1_000_000, SOL_AT_100, 15_000).unwrap());
    }

    #[test]
    fn ratio_in_bps() {
        assert_eq!(collateral_ratio_bps(7_500_000, 1_000_000, SOL_AT_200).unwrap(), 15_000);
        assert_eq!(collateral_ratio_bps(7_500_000, 1_000_000, SOL_AT_100).unwrap(), 7_500);
        assert_eq!(collateral_ratio_bps(1, 0, SOL_AT_100).unwrap(), u64::MAX);
    }

    #[test]
    fn collateral_value_in_usdc_units() {
        // 7.5M lamports at $200 = $1.5
        assert_eq!(collateral_value(7_500_000, SOL_AT_200).unwrap(), 1_500_000);
    }

    #[test]
    fn liquidation_starts_below_threshold() {
        // 110% of 1 USDC at $200 needs 5.5M lamports
        assert!(!is_liquidatable(5_500_000, 1_000_000, SOL_AT_200, 11_000).unwrap());
        assert!(is_liquidatable(5_499_999, 1_000_000, SOL_AT_200, 11_000).unwrap());
        assert!(is_liquidatable(7_500_000, 1_000_000, SOL_AT_100, 11_000).unwrap());
    }

    #[test]
    fn liquidation_fee_comes_out_of_collateral() {
        let split = liquidation_split(7_500_000, 500).unwrap();
        assert_eq!(split.protocol_fee, 375_000);
        assert_eq!(split.to_lender, 7_125_000);
    }

    #[test]
    fn repayment_totals() {
        let split = RepaymentSplit {
            principal: 1_000_000,
            interest: 40_000,
            protocol_fee: 10_000,
        };
        assert_eq!(split.to_lender().unwrap(), 1_040_000);
        assert_eq!(split.total_due().unwrap(), 1_050_000);
    }

    #[test]
    fn overflow_is_reported() {
        assert!(u64::MAX.safe_add(1).is_err());
        assert!(0u64.safe_sub(1).is_err());
        assert!(1u128.safe_div(0).is_err());
    }
}
