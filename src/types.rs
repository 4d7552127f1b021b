//! Common types used throughout the matchmaking service

use crate::error::MatchmakingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for proposed matches
pub type MatchId = String;

/// Game queue a ticket waits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueType {
    #[serde(rename = "cs2queue")]
    Cs2,
    #[serde(rename = "d2queue")]
    Dota2,
    #[serde(rename = "lcqueue")]
    Lichess,
}

impl QueueType {
    pub fn all() -> [QueueType; 3] {
        [QueueType::Cs2, QueueType::Dota2, QueueType::Lichess]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Cs2 => "cs2queue",
            QueueType::Dota2 => "d2queue",
            QueueType::Lichess => "lcqueue",
        }
    }

    /// Name of the score-ordered index backing this queue
    pub fn index_name(&self) -> String {
        format!("players_{}", self.as_str())
    }

    /// Chess tickets only match others with identical time control and stake
    pub fn requires_compatibility(&self) -> bool {
        matches!(self, QueueType::Lichess)
    }

    pub fn requires_payment(&self) -> bool {
        matches!(self, QueueType::Lichess)
    }

    /// Team size actually used for this queue given the configured one
    pub fn effective_team_size(&self, configured: usize) -> usize {
        match self {
            QueueType::Lichess => 1,
            _ => configured,
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = MatchmakingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cs2queue" => Ok(QueueType::Cs2),
            "d2queue" => Ok(QueueType::Dota2),
            "lcqueue" => Ok(QueueType::Lichess),
            other => Err(MatchmakingError::UnknownQueue {
                queue: other.to_string(),
            }),
        }
    }
}

/// Stake class of a chess game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collateral {
    Showdown,
    Practice,
}

impl fmt::Display for Collateral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collateral::Showdown => write!(f, "showdown"),
            Collateral::Practice => write!(f, "practice"),
        }
    }
}

/// Attributes two tickets must share exactly before they can be windowed together
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompatibilityData {
    /// Clock time in minutes
    #[serde(alias = "interval")]
    pub time: u32,
    /// Increment per move in seconds
    pub increment: u32,
    pub collateral: Collateral,
}

impl CompatibilityData {
    pub fn bucket_key(&self) -> String {
        format!("{}_{}_{}", self.time, self.increment, self.collateral)
    }
}

/// One player waiting in one queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub player_id: PlayerId,
    pub score: f64,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub compatibility: Option<CompatibilityData>,
    #[serde(default = "Utc::now")]
    pub joined_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(player_id: impl Into<PlayerId>, score: f64, wallet_address: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            score,
            wallet_address: wallet_address.into(),
            compatibility: None,
            joined_at: Utc::now(),
        }
    }

    pub fn with_compatibility(mut self, compatibility: CompatibilityData) -> Self {
        self.compatibility = Some(compatibility);
        self
    }

    pub fn joined_at(mut self, joined_at: DateTime<Utc>) -> Self {
        self.joined_at = joined_at;
        self
    }

    /// How long this ticket has been waiting at `now`
    pub fn waited(&self, now: DateTime<Utc>) -> Duration {
        (now - self.joined_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Side of a proposed match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

/// A player's answer to a match-found prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Acceptance {
    Pending,
    Accepted,
    Declined,
}

// Older records store the answer as an integer option: 0 declined, 1 pending, 2 accepted.
impl<'de> Deserialize<'de> for Acceptance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Code(i64),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Code(0) => Ok(Acceptance::Declined),
            Repr::Code(1) => Ok(Acceptance::Pending),
            Repr::Code(2) => Ok(Acceptance::Accepted),
            Repr::Code(code) => Err(serde::de::Error::custom(format!(
                "unknown acceptance code {}",
                code
            ))),
            Repr::Name(name) => match name.as_str() {
                "pending" => Ok(Acceptance::Pending),
                "accepted" => Ok(Acceptance::Accepted),
                "declined" => Ok(Acceptance::Declined),
                other => Err(serde::de::Error::custom(format!(
                    "unknown acceptance '{}'",
                    other
                ))),
            },
        }
    }
}

/// Output of a successful evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub match_id: MatchId,
    pub queue: QueueType,
    pub team_a: Vec<Ticket>,
    pub team_b: Vec<Ticket>,
    pub quality: f64,
}

impl MatchCandidate {
    /// Every ticket in the match tagged with its team
    pub fn players(&self) -> impl Iterator<Item = (Team, &Ticket)> {
        self.team_a
            .iter()
            .map(|t| (Team::A, t))
            .chain(self.team_b.iter().map(|t| (Team::B, t)))
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players().map(|(_, t)| t.player_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.team_a.len() + self.team_b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-player status stored under a match id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPlayerRecord {
    #[serde(alias = "id")]
    pub player_id: PlayerId,
    pub queue: QueueType,
    pub team: Team,
    pub score: f64,
    #[serde(alias = "option")]
    pub acceptance: Acceptance,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub txn_hash: Option<String>,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub compatibility: Option<CompatibilityData>,
}

impl MatchPlayerRecord {
    pub fn from_ticket(queue: QueueType, team: Team, ticket: &Ticket) -> Self {
        Self {
            player_id: ticket.player_id.clone(),
            queue,
            team,
            score: ticket.score,
            acceptance: Acceptance::Pending,
            paid: false,
            txn_hash: None,
            wallet_address: ticket.wallet_address.clone(),
            compatibility: ticket.compatibility.clone(),
        }
    }

    /// Fresh ticket carrying the player's original score and compatibility data
    pub fn to_ticket(&self) -> Ticket {
        Ticket {
            player_id: self.player_id.clone(),
            score: self.score,
            wallet_address: self.wallet_address.clone(),
            compatibility: self.compatibility.clone(),
            joined_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Where a player currently stands with respect to proposed matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserState {
    #[default]
    NoState,
    MatchFound,
    MatchAccepted,
    PaymentPending,
    Paid,
    RejoinQueue,
}

impl UserState {
    /// States that pin the player to a live lifecycle
    pub fn is_in_match(&self) -> bool {
        matches!(
            self,
            UserState::MatchFound
                | UserState::MatchAccepted
                | UserState::PaymentPending
                | UserState::Paid
        )
    }
}

/// Per-player pointer into at most one active lifecycle
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGlobalState {
    #[serde(default)]
    pub state: UserState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<MatchId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,
}

impl UserGlobalState {
    pub fn in_match(state: UserState, match_id: &str, expiry_time: DateTime<Utc>) -> Self {
        Self {
            state,
            match_id: Some(match_id.to_string()),
            expiry_time: Some(expiry_time),
        }
    }

    pub fn rejoin_queue() -> Self {
        Self {
            state: UserState::RejoinQueue,
            match_id: None,
            expiry_time: None,
        }
    }

    pub fn is_in_match(&self) -> bool {
        self.state.is_in_match()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_type_parsing() {
        assert_eq!("lcqueue".parse::<QueueType>().unwrap(), QueueType::Lichess);
        assert_eq!("d2queue".parse::<QueueType>().unwrap(), QueueType::Dota2);
        assert!(matches!(
            "pongqueue".parse::<QueueType>(),
            Err(MatchmakingError::UnknownQueue { .. })
        ));
        assert_eq!(QueueType::Cs2.index_name(), "players_cs2queue");
    }

    #[test]
    fn test_lichess_is_always_one_versus_one() {
        assert_eq!(QueueType::Lichess.effective_team_size(5), 1);
        assert_eq!(QueueType::Cs2.effective_team_size(5), 5);
        assert!(QueueType::Lichess.requires_payment());
        assert!(!QueueType::Dota2.requires_payment());
    }

    #[test]
    fn test_bucket_key_format() {
        let data = CompatibilityData {
            time: 5,
            increment: 3,
            collateral: Collateral::Showdown,
        };
        assert_eq!(data.bucket_key(), "5_3_showdown");
    }

    #[test]
    fn test_record_decodes_legacy_option_field() {
        let raw = r#"{"id":"p1","queue":"cs2queue","team":"A","score":1200.0,"option":2,"paid":false,"walletAddress":"0xabc"}"#;
        let record = MatchPlayerRecord::from_json(raw).unwrap();
        assert_eq!(record.player_id, "p1");
        assert_eq!(record.acceptance, Acceptance::Accepted);
        assert_eq!(record.txn_hash, None);
        assert!(record.compatibility.is_none());
    }

    #[test]
    fn test_record_ignores_unknown_fields() {
        let raw = r#"{"playerId":"p2","queue":"lcqueue","team":"B","score":900.0,"acceptance":"declined","apiKey":"x"}"#;
        let record = MatchPlayerRecord::from_json(raw).unwrap();
        assert_eq!(record.acceptance, Acceptance::Declined);
        assert!(!record.paid);
    }

    #[test]
    fn test_record_rejects_garbage() {
        assert!(MatchPlayerRecord::from_json("not json").is_err());
        let bad_code = r#"{"playerId":"p","queue":"cs2queue","team":"A","score":1.0,"acceptance":7}"#;
        assert!(MatchPlayerRecord::from_json(bad_code).is_err());
    }

    #[test]
    fn test_record_to_ticket_keeps_original_score() {
        let ticket = Ticket::new("p3", 1432.5, "0xdef").with_compatibility(CompatibilityData {
            time: 3,
            increment: 0,
            collateral: Collateral::Practice,
        });
        let record = MatchPlayerRecord::from_ticket(QueueType::Lichess, Team::B, &ticket);
        let requeued = record.to_ticket();
        assert_eq!(requeued.score, 1432.5);
        assert_eq!(requeued.wallet_address, "0xdef");
        assert_eq!(requeued.compatibility, ticket.compatibility);
    }

    #[test]
    fn test_user_state_wire_names() {
        let state = UserGlobalState::rejoin_queue();
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"state":"rejoinQueue"}"#);
        assert!(!state.is_in_match());
        assert!(UserState::PaymentPending.is_in_match());
    }
}
