//! Transfer variance handling.
//!
//! A transfer line commits a quantity at creation; the operator enters the
//! quantity actually received at the destination when validating. When the two
//! differ, the policy decides what each side of the move sees.

use serde::{Deserialize, Serialize};

use stockmaster_core::{DomainError, Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferVariancePolicy {
    /// Source loses the committed quantity, destination gains the received
    /// quantity; the difference is booked as an explicit adjustment so the
    /// ledger still explains both snapshots.
    #[default]
    PreserveCommitted,
    /// Both sides move the received quantity; variance stays on the line.
    FollowReceived,
}

impl core::str::FromStr for TransferVariancePolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "preserve_committed" => Ok(Self::PreserveCommitted),
            "follow_received" => Ok(Self::FollowReceived),
            other => Err(DomainError::validation(format!(
                "unknown transfer variance policy '{other}'"
            ))),
        }
    }
}

/// What one transfer line does to stock and the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub source_decrement: Quantity,
    pub destination_increment: Quantity,
    /// Quantity of the single `internal` entry.
    pub internal_quantity: Quantity,
    /// Committed but never arrived: adjustment on the source's decrease side.
    pub shortfall_at_source: Option<Quantity>,
    /// Arrived beyond the commitment: adjustment on the destination's increase side.
    pub surplus_at_destination: Option<Quantity>,
    /// `received − committed`.
    pub variance: Quantity,
}

impl TransferVariancePolicy {
    pub fn plan(self, committed: Quantity, received: Quantity) -> TransferPlan {
        let variance = received - committed;
        match self {
            TransferVariancePolicy::FollowReceived => TransferPlan {
                source_decrement: received,
                destination_increment: received,
                internal_quantity: received,
                shortfall_at_source: None,
                surplus_at_destination: None,
                variance,
            },
            TransferVariancePolicy::PreserveCommitted => TransferPlan {
                source_decrement: committed,
                destination_increment: received,
                internal_quantity: committed.min(received),
                shortfall_at_source: variance.is_negative().then(|| variance.abs()),
                surplus_at_destination: variance.is_positive().then_some(variance),
                variance,
            },
        }
    }
}

impl TransferPlan {
    /// Net ledger effect on the source: internal + shortfall.
    pub fn source_ledger_total(&self) -> Quantity {
        self.internal_quantity + self.shortfall_at_source.unwrap_or(Quantity::ZERO)
    }

    /// Net ledger effect on the destination: internal + surplus.
    pub fn destination_ledger_total(&self) -> Quantity {
        self.internal_quantity + self.surplus_at_destination.unwrap_or(Quantity::ZERO)
    }
}
