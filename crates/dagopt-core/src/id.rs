//! Strongly-typed identifiers used across the optimizer.
//!
//! Graph nodes, connections, and candidate plans are addressed by dense
//! per-run counters, never by raw integers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
            /// Position in the arena that issued this id.
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// Front-end operator identity.
new_id!(OpId);
// Optimizer graph arena ids.
new_id!(NodeId);
new_id!(ConnectionId);
// Candidate plan identity (unique within one enumeration run).
new_id!(PlanId);
