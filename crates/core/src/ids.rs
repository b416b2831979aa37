// Entity identifiers
//
// Integer-backed newtypes so a puzzle id can never be passed where a solver id
// is expected. They serialize as bare integers.

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

entity_id!(
    /// Identifier of a puzzle.
    PuzzleId
);
entity_id!(
    /// Identifier of a round.
    RoundId
);
entity_id!(
    /// Identifier of a solver.
    SolverId
);
