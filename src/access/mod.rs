use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::types::Principal;

/// Ownership state. Only one candidate can ever be pending because the
/// pending variant holds exactly one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Ownership {
    Stable {
        owner: Principal,
    },
    TransferPending {
        owner: Principal,
        candidate: Principal,
    },
}

impl Ownership {
    pub fn owner(&self) -> &Principal {
        match self {
            Ownership::Stable { owner } | Ownership::TransferPending { owner, .. } => owner,
        }
    }

    pub fn candidate(&self) -> Option<&Principal> {
        match self {
            Ownership::Stable { .. } => None,
            Ownership::TransferPending { candidate, .. } => Some(candidate),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessController {
    ownership: Ownership,
    blacklist: BTreeSet<Principal>,
}

impl AccessController {
    pub fn new(owner: impl Into<Principal>) -> Self {
        Self {
            ownership: Ownership::Stable {
                owner: owner.into(),
            },
            blacklist: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> &Principal {
        self.ownership.owner()
    }

    pub fn pending_owner(&self) -> Option<&Principal> {
        self.ownership.candidate()
    }

    pub fn is_blacklisted(&self, principal: &str) -> bool {
        self.blacklist.contains(principal)
    }

    pub fn blacklisted(&self) -> impl Iterator<Item = &Principal> {
        self.blacklist.iter()
    }

    pub fn authorize(&self, principal: &str) -> bool {
        self.owner() == principal && !self.is_blacklisted(principal)
    }

    pub fn ensure_authorized(&self, principal: &str) -> Result<()> {
        if self.authorize(principal) {
            Ok(())
        } else {
            Err(LedgerError::NotAuthorized {
                principal: principal.to_string(),
            })
        }
    }

    pub fn propose(&mut self, caller: &str, candidate: &str) -> Result<()> {
        self.ensure_authorized(caller)?;
        match &self.ownership {
            Ownership::TransferPending { candidate, .. } => Err(LedgerError::TransferInProgress {
                candidate: candidate.clone(),
            }),
            Ownership::Stable { owner } => {
                self.ownership = Ownership::TransferPending {
                    owner: owner.clone(),
                    candidate: candidate.to_string(),
                };
                Ok(())
            }
        }
    }

    /// Completes a pending transfer. Returns the previous owner.
    pub fn confirm(&mut self, caller: &str) -> Result<Principal> {
        let not_authorized = || LedgerError::NotAuthorized {
            principal: caller.to_string(),
        };
        if self.is_blacklisted(caller) {
            return Err(not_authorized());
        }
        match &self.ownership {
            Ownership::TransferPending { owner, candidate } if candidate == caller => {
                let previous = owner.clone();
                self.ownership = Ownership::Stable {
                    owner: candidate.clone(),
                };
                Ok(previous)
            }
            _ => Err(not_authorized()),
        }
    }

    /// Withdraws a pending proposal. Returns the withdrawn candidate.
    pub fn cancel(&mut self, caller: &str) -> Result<Principal> {
        self.ensure_authorized(caller)?;
        match &self.ownership {
            Ownership::Stable { .. } => Err(LedgerError::NoTransferPending),
            Ownership::TransferPending { owner, candidate } => {
                let withdrawn = candidate.clone();
                self.ownership = Ownership::Stable {
                    owner: owner.clone(),
                };
                Ok(withdrawn)
            }
        }
    }

    /// Returns `true` if the target was newly added.
    pub fn blacklist(&mut self, caller: &str, target: &str) -> Result<bool> {
        self.ensure_authorized(caller)?;
        if self.owner() == target {
            return Err(LedgerError::CannotBlacklistOwner {
                owner: target.to_string(),
            });
        }
        Ok(self.blacklist.insert(target.to_string()))
    }
}
