use anchor_lang::prelude::*;

use crate::math::SafeMath;
use crate::{MAX_BASIS_POINTS, SECONDS_PER_DAY};

/// Protocol-wide settings. One instance lives at the `config` address.
#[account]
#[derive(Debug, PartialEq, Eq)]
pub struct ConfigState {
    pub authority: Pubkey,
    pub usdc_mint: Pubkey, // accepted loan currency
    pub params: ProtocolParams,
    pub bump: u8,
}

impl ConfigState {
    pub const SIZE: usize = 8 + // discriminator
        32 + // authority
        32 + // usdc_mint
        ProtocolParams::SIZE +
        1;   // bump
}

/// Risk and fee parameters, all ratios in basis points.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Collateral value a new request must carry, e.g. 15_000 = 150%.
    pub min_collateral_ratio_bps: u64,
    /// A funded loan below this ratio can be liquidated.
    pub liquidation_threshold_bps: u64,
    /// Interest paid to the lender on repayment.
    pub interest_rate_bps: u64,
    /// USDC skimmed into the protocol vault on repayment.
    pub protocol_fee_bps: u64,
    /// Collateral skimmed into the protocol vault on liquidation.
    pub liquidation_fee_bps: u64,
    pub max_price_age_secs: u64,
    /// Widest accepted oracle confidence interval relative to price.
    pub max_confidence_bps: u64,
}

impl ProtocolParams {
    pub const SIZE: usize = 8 * 7;

    pub fn validate(&self) -> Result<()> {
        require!(
            self.liquidation_threshold_bps >= MAX_BASIS_POINTS,
            KinlendError::InvalidConfig
        );
        require!(
            self.min_collateral_ratio_bps > self.liquidation_threshold_bps,
            KinlendError::InvalidConfig
        );
        for bps in [
            self.interest_rate_bps,
            self.protocol_fee_bps,
            self.liquidation_fee_bps,
            self.max_confidence_bps,
        ] {
            require!(bps <= MAX_BASIS_POINTS, KinlendError::InvalidConfig);
        }
        require!(self.max_price_age_secs > 0, KinlendError::InvalidConfig);
        Ok(())
    }
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            min_collateral_ratio_bps: 15_000,
            liquidation_threshold_bps: 11_000,
            interest_rate_bps: 400,
            protocol_fee_bps: 100,
            liquidation_fee_bps: 500,
            max_price_age_secs: 60,
            max_confidence_bps: 200,
        }
    }
}

/// Partial parameter update; `None` keeps the current value.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, Default)]
pub struct UpdateParamsArgs {
    pub min_collateral_ratio_bps: Option<u64>,
    pub liquidation_threshold_bps: Option<u64>,
    pub interest_rate_bps: Option<u64>,
    pub protocol_fee_bps: Option<u64>,
    pub liquidation_fee_bps: Option<u64>,
    pub max_price_age_secs: Option<u64>,
    pub max_confidence_bps: Option<u64>,
}

impl UpdateParamsArgs {
    pub fn apply(&self, params: &ProtocolParams) -> ProtocolParams {
        ProtocolParams {
            min_collateral_ratio_bps: self
                .min_collateral_ratio_bps
                .unwrap_or(params.min_collateral_ratio_bps),
            liquidation_threshold_bps: self
                .liquidation_threshold_bps
                .unwrap_or(params.liquidation_threshold_bps),
            interest_rate_bps: self.interest_rate_bps.unwrap_or(params.interest_rate_bps),
            protocol_fee_bps: self.protocol_fee_bps.unwrap_or(params.protocol_fee_bps),
            liquidation_fee_bps: self
                .liquidation_fee_bps
                .unwrap_or(params.liquidation_fee_bps),
            max_price_age_secs: self.max_price_age_secs.unwrap_or(params.max_price_age_secs),
            max_confidence_bps: self.max_confidence_bps.unwrap_or(params.max_confidence_bps),
        }
    }
}

/// Public directory of open loan requests. A single list that grows and shrinks
/// with its account in place of fixed-size registry pages.
#[account]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoanRegistryState {
    pub loan_requests: Vec<Pubkey>, // open requests, oldest first
    pub total_loans: u64,           // lifetime count, never decremented
    pub bump: u8,
}

impl LoanRegistryState {
    pub fn space(open_loans: usize) -> usize {
        8 + // discriminator
        4 + 32 * open_loans + // loan_requests
        8 + // total_loans
        1   // bump
    }

    pub fn register(&mut self, loan_request: Pubkey) -> Result<()> {
        require!(
            !self.loan_requests.contains(&loan_request),
            KinlendError::AlreadyInitialized
        );
        self.total_loans = self.total_loans.safe_add(1)?;
        self.loan_requests.push(loan_request);
        Ok(())
    }

    pub fn deregister(&mut self, loan_request: &Pubkey) -> Result<()> {
        let index = self
            .loan_requests
            .iter()
            .position(|key| key == loan_request)
            .ok_or(KinlendError::NotFoundInRegistry)?;
        self.loan_requests.remove(index);
        Ok(())
    }
}

#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoanStatus {
    Requested,
    Funded,
}

#[account]
#[derive(Debug, PartialEq, Eq)]
pub struct LoanRequestState {
    pub loan_id: u64,
    pub borrower: Pubkey,
    pub lender: Option<Pubkey>,
    pub loan_amount: u64,   // USDC base units
    pub collateral: u64,    // lamports, fixed at creation
    pub duration_days: u64,
    pub created_at: i64,
    pub funded_at: Option<i64>,
    pub repayment_time: Option<i64>, // deadline, set on funding
    pub loan_mint: Option<Pubkey>,   // mint the loan was funded in
    pub interest_rate_bps: u64,      // locked at creation
    pub protocol_fee_bps: u64,       // locked at creation
    pub collateral_vault: Pubkey,
    pub bump: u8,
}

impl LoanRequestState {
    pub const SIZE: usize = 8 + // discriminator
        8 +  // loan_id
        32 + // borrower
        1 + 32 + // lender
        8 +  // loan_amount
        8 +  // collateral
        8 +  // duration_days
        8 +  // created_at
        1 + 8 +  // funded_at
        1 + 8 +  // repayment_time
        1 + 32 + // loan_mint
        8 +  // interest_rate_bps
        8 +  // protocol_fee_bps
        32 + // collateral_vault
        1;   // bump

    pub fn status(&self) -> LoanStatus {
        match self.lender {
            Some(_) => LoanStatus::Funded,
            None => LoanStatus::Requested,
        }
    }

    /// Deadline counted from creation, not from funding.
    pub fn deadline(&self) -> Result<i64> {
        let days = i64::try_from(self.duration_days)
            .map_err(|_| error!(KinlendError::MathOverflow))?;
        let duration = days.safe_mul(SECONDS_PER_DAY)?;
        self.created_at.safe_add(duration)
    }

    pub fn interest(&self) -> Result<u64> {
        bps_of(self.loan_amount, self.interest_rate_bps)
    }

    pub fn protocol_fee(&self) -> Result<u64> {
        bps_of(self.loan_amount, self.protocol_fee_bps)
    }
}

/// Escrow for one loan's collateral. The account's lamports are the escrowed balance.
#[account]
#[derive(Debug, PartialEq, Eq)]
pub struct CollateralVaultState {
    pub loan_request: Pubkey,
    pub collateral: u64,
    pub bump: u8,
}

impl CollateralVaultState {
    pub const SIZE: usize = 8 + 32 + 8 + 1;
}

/// Fee escrow. Lamport fees sit on this account, USDC fees on its token account.
#[account]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProtocolVaultState {
    pub collateral_fees: u64,
    pub usdc_fees: u64,
    pub bump: u8,
}

impl ProtocolVaultState {
    pub const SIZE: usize = 8 + 8 + 8 + 1;
}

fn bps_of(amount: u64, bps: u64) -> Result<u64> {
    let value = (amount as u128)
        .safe_mul(bps as u128)?
        .safe_div(MAX_BASIS_POINTS as u128)?;
    u64::try_from(value).map_err(|_| error!(KinlendError::MathOverflow))
}

#[error_code]
pub enum KinlendError {
    #[msg("Signer is not allowed to perform this action")]
    Unauthorized,
    #[msg("Account is already initialized")]
    AlreadyInitialized,
    #[msg("Loan is already funded")]
    LoanAlreadyFunded,
    #[msg("Loan request is not funded yet")]
    LoanNotFunded,
    #[msg("A funded loan cannot be cancelled")]
    CannotCancelFundedLoan,
    #[msg("Loan has not reached its repayment deadline")]
    LoanNotExpired,
    #[msg("Loan repayment deadline has passed")]
    LoanExpired,
    #[msg("Collateral is above the liquidation threshold")]
    CannotLiquidateYet,
    #[msg("Insufficient collateral")]
    InsufficientCollateral,
    #[msg("Price feed is stale")]
    StalePriceFeed,
    #[msg("Price feed confidence interval is too wide")]
    UnreliablePriceFeed,
    #[msg("Price must be greater than zero")]
    InvalidPrice,
    #[msg("Insufficient funds")]
    InsufficientFunds,
    #[msg("Amount must be greater than zero")]
    InvalidAmount,
    #[msg("Duration must be at least one day")]
    InvalidDuration,
    #[msg("Invalid protocol configuration")]
    InvalidConfig,
    #[msg("Account is not an initialized token mint")]
    InvalidMint,
    #[msg("Loan request not found in the registry")]
    NotFoundInRegistry,
    #[msg("Collateral vault does not belong to the loan request")]
    InvalidCollateralVault,
    #[msg("Math overflow")]
    MathOverflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        ProtocolParams::default().validate().unwrap();
    }

    #[test]
    fn threshold_must_sit_below_origination_ratio() {
        let params = ProtocolParams {
            liquidation_threshold_bps: 15_000,
            ..ProtocolParams::default()
        };
        assert!(params.validate().is_err());

        let params = ProtocolParams {
            liquidation_threshold_bps: 9_000,
            ..ProtocolParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn fees_are_capped_at_full_amount() {
        let params = ProtocolParams {
            liquidation_fee_bps: 10_001,
            ..ProtocolParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn update_args_only_touch_given_fields() {
        let current = ProtocolParams::default();
        let updated = UpdateParamsArgs {
            protocol_fee_bps: Some(250),
            ..Default::default()
        }
        .apply(&current);

        assert_eq!(updated.protocol_fee_bps, 250);
        assert_eq!(updated.interest_rate_bps, current.interest_rate_bps);
        assert_eq!(updated.min_collateral_ratio_bps, current.min_collateral_ratio_bps);
    }

    #[test]
    fn registry_counter_survives_deregistration() {
        let mut registry = LoanRegistryState::default();
        let first = Pubkey::new_unique();
        let second = Pubkey::new_unique();

        registry.register(first).unwrap();
        registry.register(second).unwrap();
        registry.deregister(&first).unwrap();

        assert_eq!(registry.total_loans, 2);
        assert_eq!(registry.loan_requests, vec![second]);
        assert!(registry.deregister(&first).is_err());
    }

    #[test]
    fn deadline_counts_from_creation() {
        let loan = LoanRequestState {
            loan_id: 1,
            borrower: Pubkey::new_unique(),
            lender: None,
            loan_amount: 1_000_000,
            collateral: 7_500_000,
            duration_days: 30,
            created_at: 1_000,
            funded_at: None,
            repayment_time: None,
            loan_mint: None,
            interest_rate_bps: 400,
            protocol_fee_bps: 100,
            collateral_vault: Pubkey::new_unique(),
            bump: 255,
        };

        assert_eq!(loan.deadline().unwrap(), 1_000 + 30 * 86_400);
        assert_eq!(loan.interest().unwrap(), 40_000);
        assert_eq!(loan.protocol_fee().unwrap(), 10_000);
        assert_eq!(loan.status(), LoanStatus::Requested);
    }
}
