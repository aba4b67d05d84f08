//! Trusted destination guard
//!
//! The agent may only pay addresses the owner has approved. This is the
//! security boundary of the whole system: a compromised agent key can at
//! worst move funds between the owner's own vault, the savings contract and
//! vendors the owner trusts.
//!
//! Destinations fall into three groups:
//! - **vault** (exactly one, implicitly trusted)
//! - **savings contract** (zero or one, implicitly trusted)
//! - **trusted vendors** (explicitly added)
//!
//! The set only grows. Vendor removal belongs to the on-chain vendor registry.

use crate::models::address::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Rationale returned for every denied destination
pub const UNTRUSTED_DESTINATION_REASON: &str =
    "Agent wallet can only send to your vault, the savings contract or trusted vendors";

/// Why a destination was allowed or denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationReason {
    OwnVault,
    TrustedDestination,
    Untrusted,
}

impl DestinationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationReason::OwnVault => "own vault",
            DestinationReason::TrustedDestination => "trusted destination",
            DestinationReason::Untrusted => UNTRUSTED_DESTINATION_REASON,
        }
    }
}

impl fmt::Display for DestinationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a candidate destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub allowed: bool,
    pub reason: DestinationReason,
}

/// Allow-list of addresses the agent may pay
///
/// # Example
/// ```
/// use sentinel_core_rs::{Address, DestinationGuard};
///
/// let vault = Address::parse("0x1111111111111111111111111111111111111111").unwrap();
/// let mut guard = DestinationGuard::new(vault);
/// guard.add_trusted_vendor("0x2222222222222222222222222222222222222222");
///
/// assert!(guard.classify("0x1111111111111111111111111111111111111111").allowed);
/// assert!(guard.classify("0x2222222222222222222222222222222222222222").allowed);
/// assert!(!guard.classify("0x3333333333333333333333333333333333333333").allowed);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationGuard {
    vault: Address,
    #[serde(default)]
    savings_contract: Option<Address>,
    #[serde(default)]
    trusted_vendors: BTreeSet<String>,
}

impl DestinationGuard {
    pub fn new(vault: Address) -> Self {
        Self {
            vault,
            savings_contract: None,
            trusted_vendors: BTreeSet::new(),
        }
    }

    pub fn with_savings_contract(mut self, contract: Option<Address>) -> Self {
        self.savings_contract = contract;
        self
    }

    pub fn vault(&self) -> &Address {
        &self.vault
    }

    pub fn savings_contract(&self) -> Option<&Address> {
        self.savings_contract.as_ref()
    }

    /// Set (or replace) the savings contract
    pub fn set_savings_contract(&mut self, contract: Address) {
        self.savings_contract = Some(contract);
    }

    /// Trust one more vendor; returns false if it was already trusted
    pub fn add_trusted_vendor(&mut self, address: &str) -> bool {
        self.trusted_vendors.insert(normalize(address))
    }

    /// Trust every vendor in `addresses` (additive; never removes)
    pub fn set_trusted_vendors<I, S>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            self.trusted_vendors.insert(normalize(address.as_ref()));
        }
    }

    /// Trusted vendor addresses in sorted order
    pub fn trusted_vendors(&self) -> impl Iterator<Item = &str> {
        self.trusted_vendors.iter().map(String::as_str)
    }

    pub fn trusted_vendor_count(&self) -> usize {
        self.trusted_vendors.len()
    }

    /// Classify a destination
    ///
    /// Order matters only for the reason string: the vault wins over an
    /// identical vendor entry.
    pub fn classify(&self, address: &str) -> Classification {
        let candidate = normalize(address);

        if self.vault.as_str() == candidate {
            return Classification {
                allowed: true,
                reason: DestinationReason::OwnVault,
            };
        }

        let is_savings = self
            .savings_contract
            .as_ref()
            .is_some_and(|contract| contract.as_str() == candidate);

        if is_savings || self.trusted_vendors.contains(&candidate) {
            return Classification {
                allowed: true,
                reason: DestinationReason::TrustedDestination,
            };
        }

        Classification {
            allowed: false,
            reason: DestinationReason::Untrusted,
        }
    }

    pub fn is_allowed(&self, address: &str) -> bool {
        self.classify(address).allowed
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> DestinationGuard {
        DestinationGuard::new(
            Address::parse("0x1111111111111111111111111111111111111111").unwrap(),
        )
    }

    #[test]
    fn test_vault_reason_wins_over_vendor_entry() {
        let mut g = guard();
        g.add_trusted_vendor("0x1111111111111111111111111111111111111111");
        assert_eq!(
            g.classify("0x1111111111111111111111111111111111111111").reason,
            DestinationReason::OwnVault
        );
    }

    #[test]
    fn test_add_trusted_vendor_reports_duplicates() {
        let mut g = guard();
        assert!(g.add_trusted_vendor("0xABABABABABABABABABABABABABABABABABABABAB"));
        assert!(!g.add_trusted_vendor("0xabababababababababababababababababababab"));
        assert_eq!(g.trusted_vendor_count(), 1);
    }

    #[test]
    fn test_set_trusted_vendors_is_additive() {
        let mut g = guard();
        g.add_trusted_vendor("0x2222222222222222222222222222222222222222");
        g.set_trusted_vendors(["0x3333333333333333333333333333333333333333"]);
        assert!(g.is_allowed("0x2222222222222222222222222222222222222222"));
        assert!(g.is_allowed("0x3333333333333333333333333333333333333333"));
    }

    #[test]
    fn test_denied_reason_is_fixed() {
        let c = guard().classify("0x9999999999999999999999999999999999999999");
        assert!(!c.allowed);
        assert_eq!(c.reason.as_str(), UNTRUSTED_DESTINATION_REASON);
    }
}
