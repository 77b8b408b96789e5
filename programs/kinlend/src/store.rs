use std::collections::{BTreeMap, HashMap};

use anchor_lang::error::ErrorCode;
use anchor_lang::prelude::*;
use anchor_lang::solana_program::system_program;
use anchor_lang::{AccountDeserialize, AccountSerialize, Owner};

use crate::math::SafeMath;
use crate::state::KinlendError;

/// Lamports, owner and raw data of one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredAccount {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: Vec<u8>,
}

impl StoredAccount {
    pub fn system(lamports: u64) -> Self {
        Self {
            lamports,
            owner: system_program::ID,
            data: Vec::new(),
        }
    }

    /// Holds program data, as opposed to a bare lamport balance.
    pub fn is_initialized(&self) -> bool {
        !self.data.is_empty()
    }
}

/// In-process account storage with a substrate clock.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: HashMap<Pubkey, StoredAccount>,
    clock: Clock,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_account(&self, address: &Pubkey) -> Option<&StoredAccount> {
        self.accounts.get(address)
    }

    pub fn set_account(&mut self, address: Pubkey, account: StoredAccount) {
        self.accounts.insert(address, account);
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.accounts.get(address).map_or(0, |account| account.lamports)
    }

    pub fn airdrop(&mut self, address: &Pubkey, lamports: u64) -> Result<()> {
        let account = self
            .accounts
            .entry(*address)
            .or_insert_with(|| StoredAccount::system(0));
        account.lamports = account.lamports.safe_add(lamports)?;
        Ok(())
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn set_unix_timestamp(&mut self, unix_timestamp: i64) {
        self.clock.unix_timestamp = unix_timestamp;
    }

    pub fn warp(&mut self, seconds: i64) {
        self.clock.unix_timestamp = self.clock.unix_timestamp.saturating_add(seconds);
        self.clock.slot = self.clock.slot.saturating_add(1);
    }

    pub fn load<T: AccountDeserialize + Owner>(&self, address: &Pubkey) -> Result<T> {
        deserialize_account(self.get_account(address))
    }

    pub fn begin(&self) -> Transition<'_> {
        Transition {
            store: self,
            writes: BTreeMap::new(),
        }
    }

    /// Applies the staged writes of a finished transition in one step.
    pub fn commit(&mut self, writes: BTreeMap<Pubkey, Option<StoredAccount>>) {
        for (address, write) in writes {
            match write {
                Some(account) => {
                    self.accounts.insert(address, account);
                }
                None => {
                    self.accounts.remove(&address);
                }
            }
        }
    }
}

fn deserialize_account<T: AccountDeserialize + Owner>(
    account: Option<&StoredAccount>,
) -> Result<T> {
    let account = account
        .filter(|account| account.is_initialized())
        .ok_or_else(|| error!(ErrorCode::AccountNotInitialized))?;
    require_keys_eq!(
        account.owner,
        T::owner(),
        ErrorCode::AccountOwnedByWrongProgram
    );
    T::try_deserialize(&mut account.data.as_slice())
}

/// Copy-on-write view of the store. Nothing is visible to the store until the
/// staged writes are committed, so a failed transition leaves no trace.
pub struct Transition<'a> {
    store: &'a AccountStore,
    writes: BTreeMap<Pubkey, Option<StoredAccount>>,
}

impl<'a> Transition<'a> {
    pub fn clock(&self) -> &Clock {
        self.store.clock()
    }

    pub fn account(&self, address: &Pubkey) -> Option<&StoredAccount> {
        match self.writes.get(address) {
            Some(staged) => staged.as_ref(),
            None => self.store.get_account(address),
        }
    }

    pub fn exists(&self, address: &Pubkey) -> bool {
        self.account(address)
            .map_or(false, |account| account.is_initialized())
    }

    pub fn lamports(&self, address: &Pubkey) -> u64 {
        self.account(address).map_or(0, |account| account.lamports)
    }

    pub fn load<T: AccountDeserialize + Owner>(&self, address: &Pubkey) -> Result<T> {
        deserialize_account(self.account(address))
    }

    /// Creates a program account of `space` bytes. Lamports already sitting on the
    /// address are kept.
    pub fn init<T: AccountSerialize + Owner>(
        &mut self,
        address: &Pubkey,
        record: &T,
        space: usize,
    ) -> Result<()> {
        require!(!self.exists(address), KinlendError::AlreadyInitialized);
        let data = serialize_record(record, space)?;
        let account = self.account_mut(address);
        account.owner = T::owner();
        account.data = data;
        Ok(())
    }

    /// Overwrites a record in place. The account keeps its size, so a record that
    /// has grown needs a `realloc` first.
    pub fn save<T: AccountSerialize + Owner>(&mut self, address: &Pubkey, record: &T) -> Result<()> {
        let account = self
            .account(address)
            .filter(|account| account.is_initialized())
            .ok_or_else(|| error!(ErrorCode::AccountNotInitialized))?;
        require_keys_eq!(
            account.owner,
            T::owner(),
            ErrorCode::AccountOwnedByWrongProgram
        );
        let data = serialize_record(record, account.data.len())?;
        self.account_mut(address).data = data;
        Ok(())
    }

    /// Resizes a program account, zero-filling any new bytes.
    pub fn realloc(&mut self, address: &Pubkey, space: usize) -> Result<()> {
        require!(self.exists(address), ErrorCode::AccountNotInitialized);
        self.account_mut(address).data.resize(space, 0);
        Ok(())
    }

    /// Closes an account, sending whatever lamports it still holds to `destination`.
    pub fn close(&mut self, address: &Pubkey, destination: &Pubkey) -> Result<u64> {
        let remaining = self.lamports(address);
        if remaining > 0 {
            self.transfer_lamports(address, destination, remaining)?;
        }
        self.writes.insert(*address, None);
        Ok(remaining)
    }

    pub fn transfer_lamports(&mut self, from: &Pubkey, to: &Pubkey, amount: u64) -> Result<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        let available = self.lamports(from);
        require!(available >= amount, KinlendError::InsufficientFunds);

        self.account_mut(from).lamports = available.safe_sub(amount)?;
        let credited = self.lamports(to).safe_add(amount)?;
        self.account_mut(to).lamports = credited;
        Ok(())
    }

    pub(crate) fn put_account(&mut self, address: &Pubkey, account: StoredAccount) {
        self.writes.insert(*address, Some(account));
    }

    fn account_mut(&mut self, address: &Pubkey) -> &mut StoredAccount {
        let store = self.store;
        self.writes
            .entry(*address)
            .or_insert_with(|| store.get_account(address).cloned())
            .get_or_insert_with(|| StoredAccount::system(0))
    }

    pub fn into_writes(self) -> BTreeMap<Pubkey, Option<StoredAccount>> {
        self.writes
    }
}

fn serialize_record<T: AccountSerialize>(record: &T, space: usize) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(space);
    record.try_serialize(&mut data)?;
    require!(data.len() <= space, ErrorCode::AccountDidNotSerialize);
    data.resize(space, 0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{LoanRegistryState, ProtocolVaultState};

    #[test]
    fn staged_writes_stay_invisible_until_commit() {
        let mut store = AccountStore::new();
        let payer = Pubkey::new_unique();
        let vault = Pubkey::new_unique();
        store.airdrop(&payer, 10).unwrap();

        let writes = {
            let mut tx = store.begin();
            tx.init(&vault, &ProtocolVaultState::default(), ProtocolVaultState::SIZE)
                .unwrap();
            tx.transfer_lamports(&payer, &vault, 4).unwrap();
            assert_eq!(tx.lamports(&vault), 4);
            assert_eq!(store.lamports(&vault), 0);
            tx.into_writes()
        };
        store.commit(writes);

        assert_eq!(store.lamports(&payer), 6);
        assert_eq!(store.lamports(&vault), 4);
        assert_eq!(
            store.load::<ProtocolVaultState>(&vault).unwrap(),
            ProtocolVaultState::default()
        );
    }

    #[test]
    fn init_rejects_existing_record() {
        let store = AccountStore::new();
        let address = Pubkey::new_unique();
        let mut tx = store.begin();

        tx.init(&address, &ProtocolVaultState::default(), ProtocolVaultState::SIZE)
            .unwrap();
        let err = tx
            .init(&address, &ProtocolVaultState::default(), ProtocolVaultState::SIZE)
            .unwrap_err();
        assert_eq!(err, KinlendError::AlreadyInitialized.into());
    }

    #[test]
    fn closed_accounts_cannot_be_loaded() {
        let mut store = AccountStore::new();
        let address = Pubkey::new_unique();
        let destination = Pubkey::new_unique();

        let writes = {
            let mut tx = store.begin();
            tx.init(&address, &ProtocolVaultState::default(), ProtocolVaultState::SIZE)
                .unwrap();
            tx.into_writes()
        };
        store.commit(writes);
        store.airdrop(&address, 3).unwrap();

        let writes = {
            let mut tx = store.begin();
            assert_eq!(tx.close(&address, &destination).unwrap(), 3);
            assert!(tx.load::<ProtocolVaultState>(&address).is_err());
            tx.into_writes()
        };
        store.commit(writes);

        assert!(store.get_account(&address).is_none());
        assert_eq!(store.lamports(&destination), 3);
    }

    #[test]
    fn overdraft_is_rejected() {
        let store = AccountStore::new();
        let mut tx = store.begin();
        let err = tx
            .transfer_lamports(&Pubkey::new_unique(), &Pubkey::new_unique(), 1)
            .unwrap_err();
        assert_eq!(err, KinlendError::InsufficientFunds.into());
    }

    #[test]
    fn system_accounts_are_not_records() {
        let mut store = AccountStore::new();
        let wallet = Pubkey::new_unique();
        store.airdrop(&wallet, 1).unwrap();

        assert!(store.load::<ProtocolVaultState>(&wallet).is_err());
    }

    #[test]
    fn records_must_fit_their_space() {
        let store = AccountStore::new();
        let address = Pubkey::new_unique();
        let mut tx = store.begin();

        let err = tx
            .init(&address, &ProtocolVaultState::default(), ProtocolVaultState::SIZE - 1)
            .unwrap_err();
        assert_eq!(err, ErrorCode::AccountDidNotSerialize.into());
        assert!(!tx.exists(&address));

        tx.init(&address, &ProtocolVaultState::default(), ProtocolVaultState::SIZE)
            .unwrap();
        assert_eq!(tx.account(&address).unwrap().data.len(), ProtocolVaultState::SIZE);
    }

    #[test]
    fn growing_record_needs_realloc() {
        let store = AccountStore::new();
        let address = Pubkey::new_unique();
        let mut tx = store.begin();

        let mut registry = LoanRegistryState::default();
        tx.init(&address, &registry, LoanRegistryState::space(0)).unwrap();

        registry.register(Pubkey::new_unique()).unwrap();
        let err = tx.save(&address, &registry).unwrap_err();
        assert_eq!(err, ErrorCode::AccountDidNotSerialize.into());

        tx.realloc(&address, LoanRegistryState::space(1)).unwrap();
        tx.save(&address, &registry).unwrap();
        assert_eq!(tx.load::<LoanRegistryState>(&address).unwrap(), registry);
    }
}
