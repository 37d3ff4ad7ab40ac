//! Type-safe string identifier wrappers.
//!
//! Every entity in the world has a strongly-typed ID so that an agent id
//! cannot be passed where a land id is expected. IDs are plain strings on
//! the wire (`A12`, `LAND_A1_001`, `ORG000003`) and in snapshots, so each
//! wrapper serializes transparently.
//!
//! Identifiers are allocated by the world owner from monotonic counters;
//! the formatting helpers live next to each type.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Return the inner [`String`].
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

define_id! {
    /// Unique identifier for an agent (`A<n>`).
    AgentId
}

define_id! {
    /// Unique identifier for an organization (`ORG<nnnnnn>`).
    OrgId
}

define_id! {
    /// Unique identifier for a land claim (`LAND_<owner>_<nnn>`).
    LandId
}

define_id! {
    /// Unique identifier for a law (`LAW<nnnnnn>`).
    LawId
}

define_id! {
    /// Unique identifier for a contract (`C<nnnnnn>`).
    ContractId
}

define_id! {
    /// Unique identifier for a pending trade (`TR<n>`).
    TradeId
}

define_id! {
    /// Unique identifier for a movement or work task (`K<n>`).
    TaskId
}

define_id! {
    /// Unique identifier for a dropped item stack (`IT<n>`).
    ItemEntityId
}

define_id! {
    /// Unique identifier for a bulletin board post (`P<nnnnnn>`).
    PostId
}

define_id! {
    /// Unique identifier for a finished structure.
    StructureId
}

impl AgentId {
    /// Format the id for the `n`-th agent.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("A{n}"))
    }
}

impl OrgId {
    /// Format the id for the `n`-th organization.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("ORG{n:06}"))
    }

    /// The counter value behind a generated id, if this is one.
    pub fn ordinal(&self) -> Option<u64> {
        self.0.strip_prefix("ORG")?.parse().ok()
    }
}

impl LandId {
    /// Format the id for the `n`-th claim, owned by `owner`.
    pub fn from_counter(owner: &str, n: u64) -> Self {
        Self(format!("LAND_{owner}_{n:03}"))
    }
}

impl LawId {
    /// Format the id for the `n`-th law.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("LAW{n:06}"))
    }
}

impl ContractId {
    /// Format the id for the `n`-th contract.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("C{n:06}"))
    }
}

impl TradeId {
    /// Format the id for the `n`-th trade.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("TR{n}"))
    }
}

impl TaskId {
    /// Format the id for the `n`-th task.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("K{n}"))
    }
}

impl ItemEntityId {
    /// Format the id for the `n`-th dropped stack.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("IT{n}"))
    }
}

impl PostId {
    /// Format the id for the `n`-th board post.
    pub fn from_counter(n: u64) -> Self {
        Self(format!("P{n:06}"))
    }
}
