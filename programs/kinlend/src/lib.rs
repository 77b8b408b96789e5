// Summary: Kinlend lending engine. Borrowers escrow SOL lamports and request USDC
// loans, lenders fund them, and loans end by repayment, cancellation, liquidation
// below the threshold, or a collateral claim after the deadline. Records use the
// same program addresses and Anchor layouts as the on-chain program and run on an
// in-process account store with all-or-nothing transitions.
//
// NOTE: Prices are USD with 6 decimals per whole SOL (200_000_000 = $200).

use anchor_lang::prelude::*;

pub mod address;
pub mod engine;
pub mod ledger;
pub mod liquidation;
pub mod loan;
pub mod math;
pub mod oracle;
pub mod state;
pub mod store;

pub use engine::LendingEngine;
pub use ledger::TokenLedger;
pub use loan::CreateLoanRequestArgs;
pub use oracle::{MockPriceOracle, PriceOracle, PriceQuote, PythPriceFeed};
pub use state::*;
pub use store::{AccountStore, StoredAccount, Transition};

declare_id!("CqzdqFZSNhvPUjPUKT141iQNvBcUzMjRgmWJ6MTWF21c");

pub const CONFIG_SEED: &[u8] = b"config";
pub const LOAN_REGISTRY_SEED: &[u8] = b"loan_registry";
pub const LOAN_REQUEST_SEED: &[u8] = b"loan_request";
pub const COLLATERAL_VAULT_SEED: &[u8] = b"collateral_vault";
pub const PROTOCOL_VAULT_SEED: &[u8] = b"protocol_vault";

pub const MAX_BASIS_POINTS: u64 = 10_000;
pub const SECONDS_PER_DAY: i64 = 86_400;
pub const USD_DECIMALS: u32 = 6; // oracle prices are normalized to this

/// Pyth SOL/USD price feed.
pub const SOL_USD_FEED_ID: &str =
    "0xef0d8b6fda2ceba41da15d4095d1da392a0d2f8ed0c6c7bc0f4cfac8c280b56d";
