use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// Card identity as reported by the card (hex string, stable for its lifetime)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(transparent)]
pub struct CardId(pub String);

impl CardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CardId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Which of a card's two proposals an operation targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Incoming, Direction::Outgoing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" | "IncomingTransferProposal" => Ok(Direction::Incoming),
            "outgoing" | "OutgoingTransferProposal" => Ok(Direction::Outgoing),
            other => Err(format!("unknown proposal direction: {other}")),
        }
    }
}

/// Per-phonon validation outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Unvalidated,
    Validating,
    Valid,
    NotValid,
}

/// Aggregate status of a transfer proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Unvalidated,
    Validating,
    Validated,
    HasErrors,
    Transferring,
    Transferred,
}

impl ProposalStatus {
    /// Work is outstanding against the device.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ProposalStatus::Validating | ProposalStatus::Transferring)
    }

    /// Decline/cancel is offered in every state but these two.
    pub fn can_decline(&self) -> bool {
        !matches!(
            self,
            ProposalStatus::Transferring | ProposalStatus::Transferred
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Unvalidated => "unvalidated",
            ProposalStatus::Validating => "validating",
            ProposalStatus::Validated => "validated",
            ProposalStatus::HasErrors => "has_errors",
            ProposalStatus::Transferring => "transferring",
            ProposalStatus::Transferred => "transferred",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&ProposalStatus::HasErrors).unwrap();
        assert_eq!(json, "\"has_errors\"");
        let parsed: ValidationStatus = serde_json::from_str("\"not_valid\"").unwrap();
        assert_eq!(parsed, ValidationStatus::NotValid);
    }

    #[test]
    fn direction_parses_both_spellings() {
        assert_eq!("incoming".parse::<Direction>().unwrap(), Direction::Incoming);
        assert_eq!(
            "OutgoingTransferProposal".parse::<Direction>().unwrap(),
            Direction::Outgoing
        );
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn short_card_id() {
        assert_eq!(CardId::from("04e0d5eb884a73cf").short(), "04e0d5eb");
        assert_eq!(CardId::from("abc").short(), "abc");
    }

    #[test]
    fn decline_not_offered_mid_transfer() {
        assert!(ProposalStatus::HasErrors.can_decline());
        assert!(!ProposalStatus::Transferring.can_decline());
        assert!(!ProposalStatus::Transferred.can_decline());
    }
}
