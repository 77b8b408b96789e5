use anchor_lang::error::ErrorCode;
use anchor_lang::prelude::*;
use anchor_lang::AccountDeserialize;
use pyth_solana_receiver_sdk::price_update::{get_feed_id_from_hex, PriceUpdateV2, VerificationLevel};

use crate::math::SafeMath;
use crate::state::{KinlendError, ProtocolParams};
use crate::store::AccountStore;
use crate::{MAX_BASIS_POINTS, USD_DECIMALS};

/// Raw oracle reading: `price * 10^exponent` USD per whole collateral unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: i64,
    pub conf: u64,
    pub exponent: i32,
    pub publish_time: i64,
}

pub trait PriceOracle {
    fn quote(&self) -> Result<PriceQuote>;
}

/// Validates a quote against the configured staleness and confidence bounds and
/// returns the price scaled to `USD_DECIMALS` (e.g. $200 = 200_000_000).
pub fn validate_quote(quote: &PriceQuote, now: i64, params: &ProtocolParams) -> Result<u64> {
    require_gt!(quote.price, 0, KinlendError::InvalidPrice);

    let max_age = i64::try_from(params.max_price_age_secs).unwrap_or(i64::MAX);
    require!(
        quote.publish_time.saturating_add(max_age) >= now,
        KinlendError::StalePriceFeed
    );

    let price = quote.price as u128;
    let max_conf = price
        .safe_mul(params.max_confidence_bps as u128)?
        .safe_div(MAX_BASIS_POINTS as u128)?;
    require!(
        (quote.conf as u128) <= max_conf,
        KinlendError::UnreliablePriceFeed
    );

    let scaled = scale_to_decimals(price, quote.exponent, USD_DECIMALS)?;
    require_gt!(scaled, 0, KinlendError::InvalidPrice);
    u64::try_from(scaled).map_err(|_| error!(KinlendError::MathOverflow))
}

fn scale_to_decimals(value: u128, exponent: i32, decimals: u32) -> Result<u128> {
    let shift = exponent.safe_add(decimals as i32)?;
    let factor = 10u128
        .checked_pow(shift.unsigned_abs())
        .ok_or_else(|| error!(KinlendError::MathOverflow))?;
    if shift >= 0 {
        value.safe_mul(factor)
    } else {
        value.safe_div(factor)
    }
}

/// Fixed quote for tests and local tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockPriceOracle {
    pub quote: PriceQuote,
}

impl MockPriceOracle {
    /// A price already expressed with `USD_DECIMALS`, e.g. 200_000_000 for $200.
    pub fn usd(price: i64, publish_time: i64) -> Self {
        Self {
            quote: PriceQuote {
                price,
                conf: 0,
                exponent: -(USD_DECIMALS as i32),
                publish_time,
            },
        }
    }

    pub fn with_confidence(mut self, conf: u64) -> Self {
        self.quote.conf = conf;
        self
    }
}

impl PriceOracle for MockPriceOracle {
    fn quote(&self) -> Result<PriceQuote> {
        Ok(self.quote)
    }
}

/// Reads a Pyth `PriceUpdateV2` account posted by the Pyth receiver program.
pub struct PythPriceFeed {
    update: PriceUpdateV2,
    feed_id: [u8; 32],
}

impl PythPriceFeed {
    pub fn load(store: &AccountStore, address: &Pubkey, feed_id_hex: &str) -> Result<Self> {
        let account = store
            .get_account(address)
            .ok_or_else(|| error!(ErrorCode::AccountNotInitialized))?;
        require_keys_eq!(
            account.owner,
            pyth_solana_receiver_sdk::ID,
            ErrorCode::ConstraintOwner
        );
        let update = PriceUpdateV2::try_deserialize(&mut account.data.as_slice())?;
        let feed_id = get_feed_id_from_hex(feed_id_hex)?;
        Ok(Self { update, feed_id })
    }

    pub fn sol_usd(store: &AccountStore, address: &Pubkey) -> Result<Self> {
        Self::load(store, address, crate::SOL_USD_FEED_ID)
    }
}

impl PriceOracle for PythPriceFeed {
    fn quote(&self) -> Result<PriceQuote> {
        require!(
            matches!(self.update.verification_level, VerificationLevel::Full),
            KinlendError::UnreliablePriceFeed
        );
        let price = self.update.get_price_unchecked(&self.feed_id)?;
        Ok(PriceQuote {
            price: price.price,
            conf: price.conf,
            exponent: price.exponent,
            publish_time: price.publish_time,
        })
    }
}
