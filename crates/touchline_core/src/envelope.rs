//! Event envelope types.
//!
//! On the wire an envelope is a header plus two optional members,
//! `Fixture` and `AmericanFootballMatchState`. In memory the payload is a
//! tagged union; the conversion lives in the private wire structs below.

use crate::error::{DecodeError, DecodeResult};
use crate::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Envelope header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Header {
    /// Upstream redelivery counter
    pub retry: i64,
    /// Message identifier
    pub message_guid: String,
    /// Time the message was emitted upstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_stamp_utc: Option<DateTime<Utc>>,
}

impl Header {
    /// Create a header with a guid and timestamp
    #[must_use]
    pub fn new(message_guid: impl Into<String>, time_stamp_utc: DateTime<Utc>) -> Self {
        Self {
            retry: 0,
            message_guid: message_guid.into(),
            time_stamp_utc: Some(time_stamp_utc),
        }
    }
}

/// Side a competitor plays on.
///
/// Unrecognized `HomeAway` strings decode as [`Role::Unknown`] and encode
/// back as `"Unknown"`; the original text is not kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Home team
    Home,
    /// Away team
    Away,
    /// Anything else the feed sends
    #[default]
    #[serde(other)]
    Unknown,
}

/// A team taking part in a fixture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Competitor {
    /// Competitor ID
    pub id: i64,
    /// Display name
    pub name: String,
    /// Home or away
    pub home_away: Role,
}

impl Competitor {
    /// Create a new competitor
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>, home_away: Role) -> Self {
        Self {
            id,
            name: name.into(),
            home_away,
        }
    }
}

/// Fixture snapshot payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FixtureSnapshot {
    /// Fixture ID
    pub id: i64,
    /// Competitors in feed order
    pub competitors: Vec<Competitor>,
    /// Fixture status as sent by the feed
    pub status: String,
    /// Scheduled start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time_utc: Option<DateTime<Utc>>,
}

impl FixtureSnapshot {
    /// Name of the competitor playing the given role.
    ///
    /// When the feed lists a role twice the last entry wins. An empty name
    /// counts as missing.
    #[must_use]
    pub fn team_name(&self, role: Role) -> Option<&str> {
        self.competitors
            .iter()
            .filter(|c| c.home_away == role)
            .next_back()
            .map(|c| c.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// Running score
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Score {
    /// Away points
    pub away: i64,
    /// Home points
    pub home: i64,
    /// Whether the score is confirmed by officials
    pub is_confirmed: bool,
}

/// Game period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Period {
    /// Period type, e.g. `Quarter`
    #[serde(rename = "Type")]
    pub period_type: String,
    /// Period number
    pub number: i64,
}

/// Game clock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GameTime {
    /// Clock display value
    pub clock: String,
    /// Whether the clock is running
    pub is_running: bool,
    /// Last clock update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_utc: Option<DateTime<Utc>>,
}

/// Match state update payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MatchStateUpdate {
    /// Score
    pub score: Score,
    /// Period
    pub period: Period,
    /// Game clock
    pub game_time: GameTime,
    /// Fixture this update belongs to
    pub fixture_id: String,
}

/// Payload variant carried by an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Fixture snapshot
    Fixture(FixtureSnapshot),
    /// American football match state
    MatchState(MatchStateUpdate),
}

impl Payload {
    /// Kind of this payload
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::Fixture(_) => PayloadKind::Fixture,
            Self::MatchState(_) => PayloadKind::MatchState,
        }
    }
}

/// Payload discriminant, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Fixture snapshot
    Fixture,
    /// Match state update
    MatchState,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixture => write!(f, "Fixture"),
            Self::MatchState => write!(f, "MatchState"),
        }
    }
}

/// Header plus at most one payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Header
    pub header: Header,
    /// Payload, `None` when the feed sent neither variant
    pub payload: Option<Payload>,
}

impl EventEnvelope {
    /// Create an envelope
    #[must_use]
    pub fn new(header: Header, payload: Option<Payload>) -> Self {
        Self { header, payload }
    }

    /// Envelope carrying a fixture snapshot
    #[must_use]
    pub fn fixture(header: Header, fixture: FixtureSnapshot) -> Self {
        Self::new(header, Some(Payload::Fixture(fixture)))
    }

    /// Envelope carrying a match state update
    #[must_use]
    pub fn match_state(header: Header, state: MatchStateUpdate) -> Self {
        Self::new(header, Some(Payload::MatchState(state)))
    }

    /// Decode from JSON bytes
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or carries both payloads
    pub fn from_json(data: &[u8]) -> DecodeResult<Self> {
        let wire: WireEnvelope = serde_json::from_slice(data)?;
        wire.into_envelope()
    }

    /// Kind of the payload, if any
    #[must_use]
    pub fn kind(&self) -> Option<PayloadKind> {
        self.payload.as_ref().map(Payload::kind)
    }

    /// Header timestamp, `None` when unset or the zero instant
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        time::non_zero(self.header.time_stamp_utc)
    }

    /// Overwrite the header timestamp
    pub fn stamp(&mut self, ts: DateTime<Utc>) {
        self.header.time_stamp_utc = Some(ts);
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireEnvelope {
    #[serde(default)]
    header: Header,
    #[serde(default)]
    american_football_match_state: Option<MatchStateUpdate>,
    #[serde(default)]
    fixture: Option<FixtureSnapshot>,
}

impl WireEnvelope {
    fn into_envelope(self) -> DecodeResult<EventEnvelope> {
        let payload = match (self.fixture, self.american_football_match_state) {
            (Some(_), Some(_)) => return Err(DecodeError::AmbiguousPayload),
            (Some(fixture), None) => Some(Payload::Fixture(fixture)),
            (None, Some(state)) => Some(Payload::MatchState(state)),
            (None, None) => None,
        };
        Ok(EventEnvelope::new(self.header, payload))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireEnvelopeRef<'a> {
    header: &'a Header,
    #[serde(skip_serializing_if = "Option::is_none")]
    american_football_match_state: Option<&'a MatchStateUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixture: Option<&'a FixtureSnapshot>,
}

impl Serialize for EventEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (fixture, state) = match &self.payload {
            Some(Payload::Fixture(f)) => (Some(f), None),
            Some(Payload::MatchState(s)) => (None, Some(s)),
            None => (None, None),
        };
        WireEnvelopeRef {
            header: &self.header,
            american_football_match_state: state,
            fixture,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireEnvelope::deserialize(deserializer)?
            .into_envelope()
            .map_err(serde::de::Error::custom)
    }
}
