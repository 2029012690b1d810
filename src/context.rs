use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{Principal, Timestamp};

/// What the hosting environment tells the ledger about one invocation.
pub trait CallContext {
    fn caller(&self) -> &str;
    fn now(&self) -> Timestamp;
}

/// A single call made by `caller` at time `now`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub caller: Principal,
    pub now: Timestamp,
}

impl Invocation {
    pub fn new(caller: impl Into<Principal>, now: Timestamp) -> Self {
        Self {
            caller: caller.into(),
            now,
        }
    }
}

impl CallContext for Invocation {
    fn caller(&self) -> &str {
        &self.caller
    }

    fn now(&self) -> Timestamp {
        self.now
    }
}

pub fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
