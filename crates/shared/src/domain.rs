use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel stored as `current` until the user picks or deploys an instance.
pub const NO_CONTRACT_SELECTED: &str = "<No Contract selected>";

macro_rules! text_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

// Addresses compare exactly as written; no checksum or case folding.
text_newtype!(Address);
text_newtype!(TxHash);

impl Address {
    pub fn placeholder() -> Self {
        Self(NO_CONTRACT_SELECTED.to_string())
    }

    pub fn is_placeholder(&self) -> bool {
        self.0 == NO_CONTRACT_SELECTED
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Deploy,
    SetGreeting,
    Withdraw,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::SetGreeting => "set_greeting",
            Self::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Idle,
    InFlight,
    Rejected,
    Confirmed,
}

/// Durable record of known contract instances, persisted as a single JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub addresses: Vec<Address>,
    pub current: Address,
}

impl Default for AddressRecord {
    fn default() -> Self {
        Self {
            addresses: vec![Address::placeholder()],
            current: Address::placeholder(),
        }
    }
}

impl AddressRecord {
    /// The selected instance, or `None` while the placeholder or a blank
    /// address is selected.
    pub fn selected(&self) -> Option<&Address> {
        let blank = self.current.as_str().trim().is_empty();
        (!blank && !self.current.is_placeholder()).then_some(&self.current)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.iter().any(|known| known == address)
    }
}

/// Locally mirrored contract reads, tagged with the binding generation they belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorState {
    pub generation: Option<Generation>,
    pub greeting: Option<String>,
    pub balance_wei: Option<String>,
    pub owner: Option<Address>,
}

impl MirrorState {
    pub fn for_generation(generation: Generation) -> Self {
        Self {
            generation: Some(generation),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.greeting.is_none() && self.balance_wei.is_none() && self.owner.is_none()
    }
}
