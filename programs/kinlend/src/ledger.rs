use anchor_lang::prelude::*;
use anchor_lang::solana_program::program_option::COption;
use anchor_lang::solana_program::program_pack::Pack;
use anchor_spl::token::spl_token;
use spl_token::error::TokenError;
use spl_token::state::{Account as TokenAccountState, AccountState, Mint as MintState};

use crate::address::token_account_address;
use crate::store::{AccountStore, StoredAccount, Transition};

/// Fungible-token ledger for the loan currency.
pub trait TokenLedger {
    fn transfer(&mut self, mint: &Pubkey, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<()>;

    fn mint_to(&mut self, mint: &Pubkey, authority: &Pubkey, to: &Pubkey, amount: u64) -> Result<()>;

    fn balance_of(&self, mint: &Pubkey, owner: &Pubkey) -> Result<u64>;
}

fn token_error(error: TokenError) -> Error {
    ProgramError::from(error).into()
}

impl Transition<'_> {
    pub fn create_mint(&mut self, mint: &Pubkey, authority: &Pubkey, decimals: u8) -> Result<()> {
        if self.account(mint).map_or(false, |account| account.is_initialized()) {
            return Err(token_error(TokenError::AlreadyInUse));
        }
        let state = MintState {
            mint_authority: COption::Some(*authority),
            supply: 0,
            decimals,
            is_initialized: true,
            freeze_authority: COption::None,
        };
        let mut data = vec![0u8; MintState::LEN];
        MintState::pack(state, &mut data)?;
        self.write_spl_account(mint, data);
        Ok(())
    }

    pub fn is_token_mint(&self, mint: &Pubkey) -> bool {
        self.read_mint(mint).is_ok()
    }

    fn read_mint(&self, mint: &Pubkey) -> Result<MintState> {
        let account = self
            .account(mint)
            .filter(|account| account.owner == spl_token::ID)
            .ok_or_else(|| token_error(TokenError::InvalidMint))?;
        MintState::unpack(&account.data).map_err(|_| token_error(TokenError::InvalidMint))
    }

    fn read_token_account(&self, address: &Pubkey) -> Result<Option<TokenAccountState>> {
        match self.account(address) {
            Some(account) if account.owner == spl_token::ID => {
                Ok(Some(TokenAccountState::unpack(&account.data)?))
            }
            _ => Ok(None),
        }
    }

    fn write_token_account(&mut self, address: &Pubkey, state: TokenAccountState) -> Result<()> {
        let mut data = vec![0u8; TokenAccountState::LEN];
        TokenAccountState::pack(state, &mut data)?;
        self.write_spl_account(address, data);
        Ok(())
    }

    fn write_spl_account(&mut self, address: &Pubkey, data: Vec<u8>) {
        let lamports = self.lamports(address);
        self.put_account(
            address,
            StoredAccount {
                lamports,
                owner: spl_token::ID,
                data,
            },
        );
    }

    /// Loads the owner's token account, creating an empty one when missing.
    fn token_account_or_default(
        &self,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<(Pubkey, TokenAccountState)> {
        let address = token_account_address(owner, mint);
        let state = match self.read_token_account(&address)? {
            Some(state) => state,
            None => TokenAccountState {
                mint: *mint,
                owner: *owner,
                state: AccountState::Initialized,
                ..TokenAccountState::default()
            },
        };
        if state.mint != *mint {
            return Err(token_error(TokenError::MintMismatch));
        }
        if state.is_frozen() {
            return Err(token_error(TokenError::AccountFrozen));
        }
        Ok((address, state))
    }
}

impl TokenLedger for Transition<'_> {
    fn transfer(&mut self, mint: &Pubkey, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<()> {
        self.read_mint(mint)?;

        let source_address = token_account_address(from, mint);
        let mut source = self
            .read_token_account(&source_address)?
            .ok_or_else(|| token_error(TokenError::UninitializedState))?;
        if source.mint != *mint {
            return Err(token_error(TokenError::MintMismatch));
        }
        if source.owner != *from {
            return Err(token_error(TokenError::OwnerMismatch));
        }
        if source.is_frozen() {
            return Err(token_error(TokenError::AccountFrozen));
        }
        if source.amount < amount {
            return Err(token_error(TokenError::InsufficientFunds));
        }
        if from == to || amount == 0 {
            return Ok(());
        }

        let (destination_address, mut destination) = self.token_account_or_default(mint, to)?;
        source.amount -= amount;
        destination.amount = destination
            .amount
            .checked_add(amount)
            .ok_or_else(|| token_error(TokenError::Overflow))?;

        self.write_token_account(&source_address, source)?;
        self.write_token_account(&destination_address, destination)
    }

    fn mint_to(&mut self, mint: &Pubkey, authority: &Pubkey, to: &Pubkey, amount: u64) -> Result<()> {
        let mut mint_state = self.read_mint(mint)?;
        if mint_state.mint_authority != COption::Some(*authority) {
            return Err(token_error(TokenError::OwnerMismatch));
        }

        let (destination_address, mut destination) = self.token_account_or_default(mint, to)?;
        mint_state.supply = mint_state
            .supply
            .checked_add(amount)
            .ok_or_else(|| token_error(TokenError::Overflow))?;
        destination.amount = destination
            .amount
            .checked_add(amount)
            .ok_or_else(|| token_error(TokenError::Overflow))?;

        let mut data = vec![0u8; MintState::LEN];
        MintState::pack(mint_state, &mut data)?;
        self.write_spl_account(mint, data);
        self.write_token_account(&destination_address, destination)
    }

    fn balance_of(&self, mint: &Pubkey, owner: &Pubkey) -> Result<u64> {
        let address = token_account_address(owner, mint);
        Ok(self
            .read_token_account(&address)?
            .filter(|state| state.mint == *mint)
            .map_or(0, |state| state.amount))
    }
}

/// Harness-side token helpers; each call is its own committed transition.
impl AccountStore {
    pub fn create_mint(&mut self, mint: &Pubkey, authority: &Pubkey, decimals: u8) -> Result<()> {
        let writes = {
            let mut tx = self.begin();
            tx.create_mint(mint, authority, decimals)?;
            tx.into_writes()
        };
        self.commit(writes);
        Ok(())
    }

    pub fn mint_tokens(
        &mut self,
        mint: &Pubkey,
        authority: &Pubkey,
        to: &Pubkey,
        amount: u64,
    ) -> Result<()> {
        let writes = {
            let mut tx = self.begin();
            tx.mint_to(mint, authority, to, amount)?;
            tx.into_writes()
        };
        self.commit(writes);
        Ok(())
    }

    pub fn token_balance(&self, mint: &Pubkey, owner: &Pubkey) -> u64 {
        self.begin().balance_of(mint, owner).unwrap_or(0)
    }
}
