//! Royalty balances owed to original publishers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::RegistryError;
use crate::role::Principal;

/// Receiver of withdrawn royalties. Called after the balance is cleared.
pub trait Payee {
    fn pay(&mut self, to: &Principal, amount: u64) -> Result<(), RegistryError>;
}

#[derive(Debug, Default)]
pub struct RoyaltyLedger {
    balances: Mutex<HashMap<Principal, u64>>,
    charges: Mutex<HashMap<Principal, u64>>,
    withdrawing: AtomicBool,
}

/// Clears the in-progress flag when the withdrawal ends, however it ends.
struct WithdrawGuard<'a>(&'a AtomicBool);

impl Drop for WithdrawGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RoyaltyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, publisher: &Principal, amount: u64) -> Result<(), RegistryError> {
        let mut balances = self.balances.lock().map_err(|_| RegistryError::Poisoned)?;
        let balance = balances.entry(publisher.clone()).or_default();
        *balance = balance.saturating_add(amount);
        debug!(%publisher, amount, balance = *balance, "Credited royalty");
        Ok(())
    }

    /// Charge `payer` for republishing content and credit `publisher` the same amount.
    pub fn charge(
        &self,
        payer: &Principal,
        publisher: &Principal,
        amount: u64,
    ) -> Result<(), RegistryError> {
        {
            let mut charges = self.charges.lock().map_err(|_| RegistryError::Poisoned)?;
            let charged = charges.entry(payer.clone()).or_default();
            *charged = charged.saturating_add(amount);
        }
        self.credit(publisher, amount)
    }

    /// Total charged to `payer` so far.
    pub fn charged(&self, payer: &Principal) -> Result<u64, RegistryError> {
        let charges = self.charges.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(charges.get(payer).copied().unwrap_or(0))
    }

    pub fn balance(&self, publisher: &Principal) -> Result<u64, RegistryError> {
        let balances = self.balances.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(balances.get(publisher).copied().unwrap_or(0))
    }

    /// Pay out the whole balance of `publisher`.
    ///
    /// The balance is zeroed before `payee` is called, and a payee that calls
    /// back into `withdraw` gets `Reentrancy`. A failed payment restores the
    /// balance.
    pub fn withdraw(
        &self,
        publisher: &Principal,
        payee: &mut dyn Payee,
    ) -> Result<u64, RegistryError> {
        if self.withdrawing.swap(true, Ordering::AcqRel) {
            return Err(RegistryError::Reentrancy);
        }
        let _guard = WithdrawGuard(&self.withdrawing);

        let amount = {
            let mut balances = self.balances.lock().map_err(|_| RegistryError::Poisoned)?;
            balances.remove(publisher).unwrap_or(0)
        };
        if amount == 0 {
            return Ok(0);
        }

        if let Err(err) = payee.pay(publisher, amount) {
            self.credit(publisher, amount)?;
            return Err(err);
        }

        info!(%publisher, amount, "Withdrew royalties");
        Ok(amount)
    }
}
