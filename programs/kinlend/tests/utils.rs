#![allow(dead_code)]

use anchor_lang::error::Error;
use anchor_lang::prelude::*;
use anchor_lang::solana_program::native_token::LAMPORTS_PER_SOL;

use kinlend::{
    address::loan_request_address, AccountStore, CreateLoanRequestArgs, LendingEngine,
    MockPriceOracle, ProtocolParams,
};

// Constants
pub const START_TIME: i64 = 1_700_000_000;
pub const DAY: i64 = 86_400;
pub const SOL_AT_200: i64 = 200_000_000;
pub const SOL_AT_100: i64 = 100_000_000;

pub const LOAN_AMOUNT: u64 = 1_000_000; // 1 USDC
pub const COLLATERAL: u64 = 7_500_000; // 150% at $200
pub const DURATION_DAYS: u64 = 30;

pub const BORROWER_SOL: u64 = 10 * LAMPORTS_PER_SOL;
pub const LENDER_USDC: u64 = 10_000_000;

pub struct TestEnv {
    pub engine: LendingEngine,
    pub admin: Pubkey,
    pub usdc_mint: Pubkey,
    pub mint_authority: Pubkey,
    pub borrower: Pubkey,
    pub lender: Pubkey,
}

/// Engine with config, registry and protocol vault in place, a funded borrower
/// and a lender holding USDC.
pub fn setup() -> TestEnv {
    setup_with(ProtocolParams::default(), true)
}

pub fn setup_with(params: ProtocolParams, create_protocol_vault: bool) -> TestEnv {
    let mut store = AccountStore::new();
    store.set_unix_timestamp(START_TIME);

    let usdc_mint = Pubkey::new_unique();
    let mint_authority = Pubkey::new_unique();
    store.create_mint(&usdc_mint, &mint_authority, 6).unwrap();

    let admin = Pubkey::new_unique();
    let borrower = Pubkey::new_unique();
    let lender = Pubkey::new_unique();
    store.airdrop(&borrower, BORROWER_SOL).unwrap();
    store
        .mint_tokens(&usdc_mint, &mint_authority, &lender, LENDER_USDC)
        .unwrap();

    let mut engine = LendingEngine::new(store);
    engine.init_config(&admin, &usdc_mint, params).unwrap();
    engine.create_loan_registry(&admin).unwrap();
    if create_protocol_vault {
        engine.create_protocol_vault(&admin).unwrap();
    }

    TestEnv {
        engine,
        admin,
        usdc_mint,
        mint_authority,
        borrower,
        lender,
    }
}

impl TestEnv {
    pub fn now(&self) -> i64 {
        self.engine.store().clock().unix_timestamp
    }

    /// Fresh oracle quote at the current clock.
    pub fn price(&self, price: i64) -> MockPriceOracle {
        MockPriceOracle::usd(price, self.now())
    }

    pub fn warp_days(&mut self, days: i64) {
        self.engine.store_mut().warp(days * DAY);
    }

    pub fn lamports(&self, owner: &Pubkey) -> u64 {
        self.engine.store().lamports(owner)
    }

    pub fn usdc(&self, owner: &Pubkey) -> u64 {
        self.engine.store().token_balance(&self.usdc_mint, owner)
    }

    pub fn mint_usdc(&mut self, to: &Pubkey, amount: u64) {
        let (mint, authority) = (self.usdc_mint, self.mint_authority);
        self.engine
            .store_mut()
            .mint_tokens(&mint, &authority, to, amount)
            .unwrap();
    }

    pub fn loan_key(&self, loan_id: u64) -> Pubkey {
        loan_request_address(&self.borrower, loan_id).0
    }

    /// Creates the standard 1 USDC request at $200.
    pub fn create_loan(&mut self, loan_id: u64) -> Pubkey {
        let borrower = self.borrower;
        let oracle = self.price(SOL_AT_200);
        self.engine
            .create_loan_request(&borrower, loan_args(loan_id), &oracle)
            .unwrap()
    }

    pub fn create_funded_loan(&mut self, loan_id: u64) -> Pubkey {
        let loan = self.create_loan(loan_id);
        let lender = self.lender;
        self.engine.fund_loan(&lender, &loan).unwrap();
        loan
    }
}

pub fn loan_args(loan_id: u64) -> CreateLoanRequestArgs {
    CreateLoanRequestArgs {
        loan_id,
        loan_amount: LOAN_AMOUNT,
        collateral: COLLATERAL,
        duration_days: DURATION_DAYS,
    }
}

pub fn assert_error<T: std::fmt::Debug>(result: Result<T>, expected: impl Into<Error>) {
    let err = result.expect_err("call should have failed");
    assert_eq!(err, expected.into());
}
