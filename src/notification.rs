//! Aggregation lifecycle notification tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Event tag carried in the `type` field of unsolicited messages.
///
/// Serialized as its snake_case wire name. Parsing accepts exact wire names
/// only; prefixes such as `"start"` or `"started"` are rejected.
///
/// ```
/// use cloud_messenger::Notification;
///
/// let tag: Notification = "participant_joined".parse().unwrap();
/// assert_eq!(tag, Notification::ParticipantJoined);
/// assert_eq!(tag.to_string(), "participant_joined");
/// assert!("started".parse::<Notification>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    AggregatorStarted,
    AggregatorStopped,
    ParticipantJoined,
    ParticipantUpdated,
    ParticipantLeft,
}

impl Notification {
    pub const ALL: [Notification; 5] = [
        Notification::AggregatorStarted,
        Notification::AggregatorStopped,
        Notification::ParticipantJoined,
        Notification::ParticipantUpdated,
        Notification::ParticipantLeft,
    ];

    /// Wire name of the tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Notification::AggregatorStarted => "aggregator_started",
            Notification::AggregatorStopped => "aggregator_stopped",
            Notification::ParticipantJoined => "participant_joined",
            Notification::ParticipantUpdated => "participant_updated",
            Notification::ParticipantLeft => "participant_left",
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Notification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Notification::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| Error::Codec(format!("unknown notification: {s}")))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_wire_names_match_serde() {
        // ---
        for tag in Notification::ALL {
            let json = serde_json::to_value(tag).unwrap();
            assert_eq!(json, serde_json::Value::String(tag.to_string()));
            assert_eq!(tag.as_str().parse::<Notification>().unwrap(), tag);
        }
    }

    #[test]
    fn test_partial_names_rejected() {
        // ---
        for bad in ["start", "started", "aggregator", "Participant_Joined", ""] {
            assert!(bad.parse::<Notification>().is_err(), "{bad}");
        }
    }

    #[test]
    fn test_membership() {
        // ---
        let lifecycle = [Notification::AggregatorStarted, Notification::AggregatorStopped];
        assert!(lifecycle.contains(&"aggregator_started".parse().unwrap()));
        assert!(!lifecycle.contains(&"participant_joined".parse().unwrap()));
    }
}
