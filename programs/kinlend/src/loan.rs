use anchor_lang::prelude::*;

use crate::address::{
    collateral_vault_address, loan_registry_address, loan_request_address,
    protocol_vault_address,
};
use crate::engine::{deregister_loan, load_config, save_registry, LendingEngine};
use crate::ledger::TokenLedger;
use crate::math::{collateral_value, meets_collateral_ratio, RepaymentSplit, SafeMath};
use crate::oracle::{validate_quote, PriceOracle};
use crate::state::*;
use crate::store::Transition;

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateLoanRequestArgs {
    pub loan_id: u64,
    pub loan_amount: u64, // USDC base units
    pub collateral: u64,  // lamports
    pub duration_days: u64,
}

impl LendingEngine {
    /// Escrows `args.collateral` lamports from the borrower and publishes an unfunded
    /// request. The collateral must cover the configured minimum ratio at the
    /// current oracle price.
    pub fn create_loan_request<P: PriceOracle>(
        &mut self,
        borrower: &Pubkey,
        args: CreateLoanRequestArgs,
        price_feed: &P,
    ) -> Result<Pubkey> {
        self.transact(|tx| {
            require!(
                args.loan_amount > 0 && args.collateral > 0,
                KinlendError::InvalidAmount
            );
            require!(args.duration_days > 0, KinlendError::InvalidDuration);

            let config = load_config(tx)?;
            let (registry_key, _) = loan_registry_address();
            let mut registry: LoanRegistryState = tx.load(&registry_key)?;

            let (loan_key, loan_bump) = loan_request_address(borrower, args.loan_id);
            require!(!tx.exists(&loan_key), KinlendError::AlreadyInitialized);

            let now = tx.clock().unix_timestamp;
            let price = validate_quote(&price_feed.quote()?, now, &config.params)?;
            require!(
                meets_collateral_ratio(
                    args.collateral,
                    args.loan_amount,
                    price,
                    config.params.min_collateral_ratio_bps
                )?,
                KinlendError::InsufficientCollateral
            );

            let (vault_key, vault_bump) = collateral_vault_address(&loan_key);
            let loan = LoanRequestState {
                loan_id: args.loan_id,
                borrower: *borrower,
                lender: None,
                loan_amount: args.loan_amount,
                collateral: args.collateral,
                duration_days: args.duration_days,
                created_at: now,
                funded_at: None,
                repayment_time: None,
                loan_mint: None,
                interest_rate_bps: config.params.interest_rate_bps,
                protocol_fee_bps: config.params.protocol_fee_bps,
                collateral_vault: vault_key,
                bump: loan_bump,
            };
            // The deadline has to be representable before anyone can fund it.
            loan.deadline()?;

            tx.init(&loan_key, &loan, LoanRequestState::SIZE)?;
            tx.init(
                &vault_key,
                &CollateralVaultState {
                    loan_request: loan_key,
                    collateral: args.collateral,
                    bump: vault_bump,
                },
                CollateralVaultState::SIZE,
            )?;
            tx.transfer_lamports(borrower, &vault_key, args.collateral)?;

            registry.register(loan_key)?;
            save_registry(tx, &registry_key, &registry)?;

            msg!(
                "Loan request {} created: {} USDC against {} lamports worth {} USDC",
                loan_key,
                args.loan_amount,
                args.collateral,
                collateral_value(args.collateral, price)?
            );
            emit!(LoanRequested {
                loan_request: loan_key,
                borrower: *borrower,
                loan_id: args.loan_id,
                loan_amount: args.loan_amount,
                collateral: args.collateral,
                duration_days: args.duration_days,
                timestamp: now,
            });
            Ok(loan_key)
        })
    }

    /// Transfers the principal from the lender to the borrower in the configured mint.
    pub fn fund_loan(&mut self, lender: &Pubkey, loan_request: &Pubkey) -> Result<()> {
        self.transact(|tx| {
            let config = load_config(tx)?;
            let mut loan: LoanRequestState = tx.load(loan_request)?;
            require!(loan.lender.is_none(), KinlendError::LoanAlreadyFunded);

            let now = tx.clock().unix_timestamp;
            let deadline = loan.deadline()?;
            require!(now < deadline, KinlendError::LoanExpired);

            tx.transfer(&config.usdc_mint, lender, &loan.borrower, loan.loan_amount)?;

            loan.lender = Some(*lender);
            loan.funded_at = Some(now);
            loan.repayment_time = Some(deadline);
            loan.loan_mint = Some(config.usdc_mint);
            tx.save(loan_request, &loan)?;

            msg!(
                "Loan request {} funded by {}, due at {}",
                loan_request,
                lender,
                deadline
            );
            emit!(LoanFunded {
                loan_request: *loan_request,
                borrower: loan.borrower,
                lender: *lender,
                loan_amount: loan.loan_amount,
                repayment_time: deadline,
                timestamp: now,
            });
            Ok(())
        })
    }

    /// Pays principal and interest to the lender and the protocol fee to the vault,
    /// then hands the full collateral back to the borrower.
    pub fn repay_loan(&mut self, borrower: &Pubkey, loan_id: u64) -> Result<()> {
        self.transact(|tx| {
            // The address is derived from the caller, so only the borrower reaches it.
            let (loan_key, _) = loan_request_address(borrower, loan_id);
            let loan: LoanRequestState = tx.load(&loan_key)?;
            let lender = loan.lender.ok_or(KinlendError::LoanNotFunded)?;
            let mint = loan.loan_mint.ok_or(KinlendError::LoanNotFunded)?;

            let now = tx.clock().unix_timestamp;
            let deadline = loan.repayment_time.ok_or(KinlendError::LoanNotFunded)?;
            require!(now <= deadline, KinlendError::LoanExpired);

            let split = RepaymentSplit {
                principal: loan.loan_amount,
                interest: loan.interest()?,
                protocol_fee: loan.protocol_fee()?,
            };
            tx.transfer(&mint, borrower, &lender, split.to_lender()?)?;

            if split.protocol_fee > 0 {
                let (vault_key, _) = protocol_vault_address();
                let mut vault: ProtocolVaultState = tx.load(&vault_key)?;
                tx.transfer(&mint, borrower, &vault_key, split.protocol_fee)?;
                vault.usdc_fees = vault.usdc_fees.safe_add(split.protocol_fee)?;
                tx.save(&vault_key, &vault)?;
            }

            release_collateral(tx, &loan_key, &loan, borrower, 0)?;

            msg!(
                "Loan request {} repaid: {} to lender, {} protocol fee",
                loan_key,
                split.to_lender()?,
                split.protocol_fee
            );
            emit!(LoanRepaid {
                loan_request: loan_key,
                borrower: *borrower,
                lender,
                principal: split.principal,
                interest: split.interest,
                protocol_fee: split.protocol_fee,
                timestamp: now,
            });
            Ok(())
        })
    }

    pub fn cancel_loan_request(&mut self, borrower: &Pubkey, loan_id: u64) -> Result<()> {
        self.transact(|tx| {
            let (loan_key, _) = loan_request_address(borrower, loan_id);
            let loan: LoanRequestState = tx.load(&loan_key)?;
            require!(loan.lender.is_none(), KinlendError::CannotCancelFundedLoan);

            release_collateral(tx, &loan_key, &loan, borrower, 0)?;

            msg!("Loan request {} cancelled", loan_key);
            emit!(LoanRequestCancelled {
                loan_request: loan_key,
                borrower: *borrower,
                collateral: loan.collateral,
                timestamp: tx.clock().unix_timestamp,
            });
            Ok(())
        })
    }
}

/// Empties the collateral vault and closes both loan records. `protocol_fee` lamports
/// go to the protocol vault and the rest of the collateral to `recipient`; whatever
/// the two accounts still hold afterwards returns to the borrower.
pub(crate) fn release_collateral(
    tx: &mut Transition<'_>,
    loan_key: &Pubkey,
    loan: &LoanRequestState,
    recipient: &Pubkey,
    protocol_fee: u64,
) -> Result<()> {
    let (vault_key, _) = collateral_vault_address(loan_key);
    require_keys_eq!(
        loan.collateral_vault,
        vault_key,
        KinlendError::InvalidCollateralVault
    );
    let vault: CollateralVaultState = tx.load(&vault_key)?;
    require_keys_eq!(
        vault.loan_request,
        *loan_key,
        KinlendError::InvalidCollateralVault
    );

    if protocol_fee > 0 {
        let (protocol_vault_key, _) = protocol_vault_address();
        let mut protocol_vault: ProtocolVaultState = tx.load(&protocol_vault_key)?;
        tx.transfer_lamports(&vault_key, &protocol_vault_key, protocol_fee)?;
        protocol_vault.collateral_fees = protocol_vault.collateral_fees.safe_add(protocol_fee)?;
        tx.save(&protocol_vault_key, &protocol_vault)?;
    }
    let payout = vault.collateral.safe_sub(protocol_fee)?;
    tx.transfer_lamports(&vault_key, recipient, payout)?;

    tx.close(&vault_key, &loan.borrower)?;
    tx.close(loan_key, &loan.borrower)?;
    deregister_loan(tx, loan_key)
}

#[event]
pub struct LoanRequested {
    pub loan_request: Pubkey,
    pub borrower: Pubkey,
    pub loan_id: u64,
    pub loan_amount: u64,
    pub collateral: u64,
    pub duration_days: u64,
    pub timestamp: i64,
}

#[event]
pub struct LoanFunded {
    pub loan_request: Pubkey,
    pub borrower: Pubkey,
    pub lender: Pubkey,
    pub loan_amount: u64,
    pub repayment_time: i64,
    pub timestamp: i64,
}

#[event]
pub struct LoanRepaid {
    pub loan_request: Pubkey,
    pub borrower: Pubkey,
    pub lender: Pubkey,
    pub principal: u64,
    pub interest: u64,
    pub protocol_fee: u64,
    pub timestamp: i64,
}

#[event]
pub struct LoanRequestCancelled {
    pub loan_request: Pubkey,
    pub borrower: Pubkey,
    pub collateral: u64,
    pub timestamp: i64,
}
