use anchor_lang::prelude::*;

use crate::engine::{load_config, LendingEngine};
use crate::loan::release_collateral;
use crate::math::{is_liquidatable, liquidation_split};
use crate::oracle::{validate_quote, PriceOracle};
use crate::state::*;

impl LendingEngine {
    /// Hands the whole collateral to the lender once the repayment deadline has passed.
    pub fn claim_collateral(&mut self, lender: &Pubkey, loan_request: &Pubkey) -> Result<()> {
        self.transact(|tx| {
            let loan: LoanRequestState = tx.load(loan_request)?;
            let recorded_lender = loan.lender.ok_or(KinlendError::LoanNotFunded)?;
            require_keys_eq!(recorded_lender, *lender, KinlendError::Unauthorized);

            let now = tx.clock().unix_timestamp;
            let deadline = loan.repayment_time.ok_or(KinlendError::LoanNotFunded)?;
            require!(now >= deadline, KinlendError::LoanNotExpired);

            release_collateral(tx, loan_request, &loan, lender, 0)?;

            msg!(
                "Collateral of {} claimed by {}: {} lamports",
                loan_request,
                lender,
                loan.collateral
            );
            emit!(CollateralClaimed {
                loan_request: *loan_request,
                borrower: loan.borrower,
                lender: *lender,
                collateral: loan.collateral,
                timestamp: now,
            });
            Ok(())
        })
    }

    /// Closes a funded loan whose collateral fell below the liquidation threshold.
    /// The liquidation fee stays with the protocol, the rest goes to the lender.
    pub fn liquidate_loan<P: PriceOracle>(
        &mut self,
        lender: &Pubkey,
        loan_request: &Pubkey,
        price_feed: &P,
    ) -> Result<()> {
        self.transact(|tx| {
            let config = load_config(tx)?;
            let loan: LoanRequestState = tx.load(loan_request)?;
            let recorded_lender = loan.lender.ok_or(KinlendError::LoanNotFunded)?;
            require_keys_eq!(recorded_lender, *lender, KinlendError::Unauthorized);

            let now = tx.clock().unix_timestamp;
            let price = validate_quote(&price_feed.quote()?, now, &config.params)?;
            require!(
                is_liquidatable(
                    loan.collateral,
                    loan.loan_amount,
                    price,
                    config.params.liquidation_threshold_bps
                )?,
                KinlendError::CannotLiquidateYet
            );

            let split = liquidation_split(loan.collateral, config.params.liquidation_fee_bps)?;
            release_collateral(tx, loan_request, &loan, lender, split.protocol_fee)?;

            msg!(
                "Loan {} liquidated at price {}: {} lamports to lender, {} to protocol",
                loan_request,
                price,
                split.to_lender,
                split.protocol_fee
            );
            emit!(LoanLiquidated {
                loan_request: *loan_request,
                borrower: loan.borrower,
                lender: *lender,
                price,
                collateral_to_lender: split.to_lender,
                protocol_fee: split.protocol_fee,
                timestamp: now,
            });
            Ok(())
        })
    }
}

#[event]
pub struct CollateralClaimed {
    pub loan_request: Pubkey,
    pub borrower: Pubkey,
    pub lender: Pubkey,
    pub collateral: u64,
    pub timestamp: i64,
}

#[event]
pub struct LoanLiquidated {
    pub loan_request: Pubkey,
    pub borrower: Pubkey,
    pub lender: Pubkey,
    pub price: u64,
    pub collateral_to_lender: u64,
    pub protocol_fee: u64,
    pub timestamp: i64,
}
