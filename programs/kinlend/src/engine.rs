use anchor_lang::prelude::*;

use crate::address::{
    collateral_vault_address, config_address, loan_registry_address, protocol_vault_address,
};
use crate::ledger::TokenLedger;
use crate::math::{collateral_ratio_bps, SafeMath};
use crate::oracle::{validate_quote, PriceOracle};
use crate::state::*;
use crate::store::{AccountStore, Transition};

/// Entry point for every protocol transition. Each call runs inside one
/// `Transition` and either commits all of its effects or none.
#[derive(Debug, Default)]
pub struct LendingEngine {
    store: AccountStore,
}

impl LendingEngine {
    pub fn new(store: AccountStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut AccountStore {
        &mut self.store
    }

    pub(crate) fn transact<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transition<'_>) -> Result<T>,
    {
        let (value, writes) = {
            let mut tx = self.store.begin();
            let value = f(&mut tx)?;
            (value, tx.into_writes())
        };
        self.store.commit(writes);
        Ok(value)
    }

    /// Creates the protocol config. `admin` becomes the authority for all later updates.
    pub fn init_config(
        &mut self,
        admin: &Pubkey,
        usdc_mint: &Pubkey,
        params: ProtocolParams,
    ) -> Result<Pubkey> {
        self.transact(|tx| {
            let (config_key, bump) = config_address();
            require!(!tx.exists(&config_key), KinlendError::AlreadyInitialized);
            require!(tx.is_token_mint(usdc_mint), KinlendError::InvalidMint);
            params.validate()?;

            let config = ConfigState {
                authority: *admin,
                usdc_mint: *usdc_mint,
                params,
                bump,
            };
            tx.init(&config_key, &config, ConfigState::SIZE)?;

            msg!("Config initialized: authority {}, usdc mint {}", admin, usdc_mint);
            emit_config_updated(&config, tx.clock().unix_timestamp);
            Ok(config_key)
        })
    }

    /// Replaces the accepted loan currency. Loans already funded keep their own mint.
    pub fn update_config(&mut self, caller: &Pubkey, new_usdc_mint: &Pubkey) -> Result<()> {
        self.transact(|tx| {
            let (config_key, _) = config_address();
            let mut config: ConfigState = tx.load(&config_key)?;
            require_keys_eq!(*caller, config.authority, KinlendError::Unauthorized);
            require!(tx.is_token_mint(new_usdc_mint), KinlendError::InvalidMint);

            config.usdc_mint = *new_usdc_mint;
            tx.save(&config_key, &config)?;

            msg!("USDC mint updated to {}", new_usdc_mint);
            emit_config_updated(&config, tx.clock().unix_timestamp);
            Ok(())
        })
    }

    pub fn update_params(&mut self, caller: &Pubkey, args: UpdateParamsArgs) -> Result<()> {
        self.transact(|tx| {
            let (config_key, _) = config_address();
            let mut config: ConfigState = tx.load(&config_key)?;
            require_keys_eq!(*caller, config.authority, KinlendError::Unauthorized);

            let params = args.apply(&config.params);
            params.validate()?;
            config.params = params;
            tx.save(&config_key, &config)?;

            msg!(
                "Params updated: min ratio {} bps, liquidation threshold {} bps",
                params.min_collateral_ratio_bps,
                params.liquidation_threshold_bps
            );
            emit_config_updated(&config, tx.clock().unix_timestamp);
            Ok(())
        })
    }

    pub fn create_loan_registry(&mut self, payer: &Pubkey) -> Result<Pubkey> {
        self.transact(|tx| {
            let (registry_key, bump) = loan_registry_address();
            tx.init(
                &registry_key,
                &LoanRegistryState {
                    loan_requests: Vec::new(),
                    total_loans: 0,
                    bump,
                },
                LoanRegistryState::space(0),
            )?;
            msg!("Loan registry created by {}", payer);
            Ok(registry_key)
        })
    }

    pub fn create_protocol_vault(&mut self, payer: &Pubkey) -> Result<Pubkey> {
        self.transact(|tx| {
            let (vault_key, bump) = protocol_vault_address();
            tx.init(
                &vault_key,
                &ProtocolVaultState {
                    bump,
                    ..ProtocolVaultState::default()
                },
                ProtocolVaultState::SIZE,
            )?;
            msg!("Protocol vault created by {}", payer);
            Ok(vault_key)
        })
    }

    /// Moves collected fees out of the protocol vault. USDC leaves in `mint`, which
    /// may be a mint the config has since replaced, bounded by what the vault holds
    /// in it.
    pub fn withdraw_protocol_fees(
        &mut self,
        authority: &Pubkey,
        recipient: &Pubkey,
        mint: &Pubkey,
        lamports: u64,
        usdc_amount: u64,
    ) -> Result<()> {
        self.transact(|tx| {
            let config = load_config(tx)?;
            require_keys_eq!(*authority, config.authority, KinlendError::Unauthorized);

            let (vault_key, _) = protocol_vault_address();
            let mut vault: ProtocolVaultState = tx.load(&vault_key)?;
            require!(
                vault.collateral_fees >= lamports && vault.usdc_fees >= usdc_amount,
                KinlendError::InsufficientFunds
            );

            tx.transfer_lamports(&vault_key, recipient, lamports)?;
            if usdc_amount > 0 {
                require!(
                    tx.balance_of(mint, &vault_key)? >= usdc_amount,
                    KinlendError::InsufficientFunds
                );
                tx.transfer(mint, &vault_key, recipient, usdc_amount)?;
            }

            vault.collateral_fees = vault.collateral_fees.safe_sub(lamports)?;
            vault.usdc_fees = vault.usdc_fees.safe_sub(usdc_amount)?;
            tx.save(&vault_key, &vault)?;

            msg!(
                "Withdrew {} lamports and {} USDC ({}) of protocol fees to {}",
                lamports,
                usdc_amount,
                mint,
                recipient
            );
            emit!(ProtocolFeesWithdrawn {
                authority: *authority,
                recipient: *recipient,
                mint: *mint,
                lamports,
                usdc_amount,
                timestamp: tx.clock().unix_timestamp,
            });
            Ok(())
        })
    }

    pub fn config(&self) -> Result<ConfigState> {
        self.store.load(&config_address().0)
    }

    pub fn loan_registry(&self) -> Result<LoanRegistryState> {
        self.store.load(&loan_registry_address().0)
    }

    pub fn protocol_vault(&self) -> Result<ProtocolVaultState> {
        self.store.load(&protocol_vault_address().0)
    }

    pub fn loan_request(&self, address: &Pubkey) -> Result<LoanRequestState> {
        self.store.load(address)
    }

    pub fn collateral_vault(&self, loan_request: &Pubkey) -> Result<CollateralVaultState> {
        self.store.load(&collateral_vault_address(loan_request).0)
    }

    /// Open requests in creation order.
    pub fn open_loan_requests(&self) -> Result<Vec<Pubkey>> {
        Ok(self.loan_registry()?.loan_requests)
    }

    /// Current collateralization of a loan in basis points at the oracle price.
    pub fn collateralization_bps<P: PriceOracle>(
        &self,
        loan_request: &Pubkey,
        price_feed: &P,
    ) -> Result<u64> {
        let config = self.config()?;
        let loan = self.loan_request(loan_request)?;
        let price = validate_quote(
            &price_feed.quote()?,
            self.store.clock().unix_timestamp,
            &config.params,
        )?;
        collateral_ratio_bps(loan.collateral, loan.loan_amount, price)
    }
}

pub(crate) fn load_config(tx: &Transition<'_>) -> Result<ConfigState> {
    tx.load(&config_address().0)
}

pub(crate) fn deregister_loan(tx: &mut Transition<'_>, loan_request: &Pubkey) -> Result<()> {
    let (registry_key, _) = loan_registry_address();
    let mut registry: LoanRegistryState = tx.load(&registry_key)?;
    registry.deregister(loan_request)?;
    save_registry(tx, &registry_key, &registry)
}

/// Resizes the registry account to its current entry count before writing it.
pub(crate) fn save_registry(
    tx: &mut Transition<'_>,
    registry_key: &Pubkey,
    registry: &LoanRegistryState,
) -> Result<()> {
    tx.realloc(
        registry_key,
        LoanRegistryState::space(registry.loan_requests.len()),
    )?;
    tx.save(registry_key, registry)
}

fn emit_config_updated(config: &ConfigState, timestamp: i64) {
    emit!(ConfigUpdated {
        authority: config.authority,
        usdc_mint: config.usdc_mint,
        params: config.params,
        timestamp,
    });
}

#[event]
pub struct ConfigUpdated {
    pub authority: Pubkey,
    pub usdc_mint: Pubkey,
    pub params: ProtocolParams,
    pub timestamp: i64,
}

#[event]
pub struct ProtocolFeesWithdrawn {
    pub authority: Pubkey,
    pub recipient: Pubkey,
    pub mint: Pubkey,
    pub lamports: u64,
    pub usdc_amount: u64,
    pub timestamp: i64,
}
