//! Surrogate identifiers for definition rows.
//!
//! Every node and edge of a blueprint graph is addressed by an opaque integer
//! key rather than a reference, so the same IDs appear unchanged in history
//! and log rows.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                $name(raw)
            }
        }
    };
}

surrogate_id!(
    /// Identifies a blueprint definition.
    BlueprintId
);
surrogate_id!(
    /// Identifies a state within a blueprint.
    StateId
);
surrogate_id!(
    /// Identifies a transition within a blueprint.
    TransitionId
);
surrogate_id!(
    /// Identifies a transition action.
    ActionId
);
surrogate_id!(
    /// Identifies a transition requirement.
    RequirementId
);
surrogate_id!(
    /// Identifies an SLA definition.
    SlaId
);
surrogate_id!(
    /// Identifies an SLA escalation rule.
    EscalationId
);
surrogate_id!(
    /// Identifies a business record governed by a blueprint.
    RecordId
);
surrogate_id!(
    /// Identifies the user (or automation) performing a transition.
    ActorId
);
