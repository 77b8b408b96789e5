//! Program-derived addresses. Clients derive the same keys before submitting a call.

use anchor_lang::prelude::*;
use anchor_spl::associated_token::get_associated_token_address;

use crate::{
    COLLATERAL_VAULT_SEED, CONFIG_SEED, LOAN_REGISTRY_SEED, LOAN_REQUEST_SEED,
    PROTOCOL_VAULT_SEED,
};

pub fn config_address() -> (Pubkey, u8) {
    Pubkey::find_program_address(&[CONFIG_SEED], &crate::ID)
}

pub fn loan_registry_address() -> (Pubkey, u8) {
    Pubkey::find_program_address(&[LOAN_REGISTRY_SEED], &crate::ID)
}

pub fn protocol_vault_address() -> (Pubkey, u8) {
    Pubkey::find_program_address(&[PROTOCOL_VAULT_SEED], &crate::ID)
}

pub fn loan_request_address(borrower: &Pubkey, loan_id: u64) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[LOAN_REQUEST_SEED, borrower.as_ref(), &loan_id.to_le_bytes()],
        &crate::ID,
    )
}

pub fn collateral_vault_address(loan_request: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[COLLATERAL_VAULT_SEED, loan_request.as_ref()], &crate::ID)
}

/// Token account holding `owner`'s balance of `mint`.
pub fn token_account_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address(owner, mint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loan_addresses_are_scoped_by_borrower_and_id() {
        let alice = Pubkey::new_unique();
        let bob = Pubkey::new_unique();

        assert_eq!(loan_request_address(&alice, 1), loan_request_address(&alice, 1));
        assert_ne!(loan_request_address(&alice, 1).0, loan_request_address(&alice, 2).0);
        assert_ne!(loan_request_address(&alice, 1).0, loan_request_address(&bob, 1).0);
    }

    #[test]
    fn vault_follows_its_loan_request() {
        let (loan, _) = loan_request_address(&Pubkey::new_unique(), 7);
        let (vault, bump) = collateral_vault_address(&loan);

        let expected = Pubkey::create_program_address(
            &[COLLATERAL_VAULT_SEED, loan.as_ref(), &[bump]],
            &crate::ID,
        )
        .unwrap();
        assert_eq!(vault, expected);
    }

    #[test]
    fn singletons_are_distinct() {
        let config = config_address().0;
        let registry = loan_registry_address().0;
        let vault = protocol_vault_address().0;

        assert_ne!(config, registry);
        assert_ne!(registry, vault);
        assert_ne!(config, vault);
    }
}
