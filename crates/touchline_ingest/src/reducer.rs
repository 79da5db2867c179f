//! Latest-state reducer.
//!
//! Maps each envelope to the fields of its fixture record and upserts them.
//! Writes are last-write-wins: the incoming timestamp is never compared with
//! what the record already holds.

use crate::store::{FieldMap, FieldValue, StateStore, StoreError};
use std::sync::Arc;
use touchline_core::time::format_optional;
use touchline_core::{EventEnvelope, FixtureSnapshot, MatchStateUpdate, Payload, Role};
use tracing::Span;

/// Stored field names
pub mod fields {
    /// Home team display name
    pub const HOME_TEAM: &str = "home_team";
    /// Away team display name
    pub const AWAY_TEAM: &str = "away_team";
    /// Fixture status
    pub const FIXTURE_STATUS: &str = "fixture_status";
    /// Scheduled start, RFC 3339
    pub const START_TIME: &str = "start_time";
    /// Away score
    pub const AWAY_SCORE: &str = "away";
    /// Home score
    pub const HOME_SCORE: &str = "home";
    /// Whether the score is confirmed
    pub const SCORE_CONFIRMED: &str = "is_confirmed";
    /// Period number
    pub const PERIOD_NUMBER: &str = "period_num";
    /// Period type
    pub const PERIOD_TYPE: &str = "period_type";
    /// Whether the game clock is running
    pub const CLOCK_RUNNING: &str = "is_running";
    /// Envelope header timestamp, RFC 3339
    pub const EVENT_TIMESTAMP: &str = "timestamp";
}

/// Record key for a fixture id
#[must_use]
pub fn fixture_key(id: impl std::fmt::Display) -> String {
    format!("fixture:{id}")
}

/// Reducer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReduceError {
    /// Envelope carries no recognized payload
    #[error("unknown message type")]
    UnknownMessageType,

    /// Payload is structurally valid but incomplete
    #[error("fixture {fixture_id}: {reason}")]
    Validation {
        /// Fixture the payload describes
        fixture_id: String,
        /// What is missing
        reason: String,
    },

    /// Store rejected the upsert
    #[error("failed to store latest state: {0}")]
    Store(#[from] StoreError),
}

impl ReduceError {
    /// Whether the error is a client-side validation failure
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Record written by one ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    /// Record key
    pub key: String,
    /// Fields that were upserted
    pub fields: FieldMap,
}

fn insert(fields: &mut FieldMap, name: &str, value: impl Into<FieldValue>) {
    fields.insert(name.to_string(), value.into());
}

/// Fields projected from a fixture snapshot
///
/// # Errors
///
/// Returns [`ReduceError::Validation`] if no competitor plays Home or none plays Away
pub fn fixture_fields(
    fixture: &FixtureSnapshot,
    event_timestamp: &str,
) -> Result<StoredState, ReduceError> {
    let missing = |role: &str| ReduceError::Validation {
        fixture_id: fixture.id.to_string(),
        reason: format!("no {role} team in fixture"),
    };
    let home = fixture.team_name(Role::Home).ok_or_else(|| missing("home"))?;
    let away = fixture.team_name(Role::Away).ok_or_else(|| missing("away"))?;

    let mut out = FieldMap::new();
    insert(&mut out, fields::HOME_TEAM, home);
    insert(&mut out, fields::AWAY_TEAM, away);
    insert(&mut out, fields::FIXTURE_STATUS, fixture.status.as_str());
    insert(&mut out, fields::START_TIME, format_optional(fixture.start_time_utc));
    insert(&mut out, fields::EVENT_TIMESTAMP, event_timestamp);

    Ok(StoredState {
        key: fixture_key(fixture.id),
        fields: out,
    })
}

/// Fields projected from a match state update
#[must_use]
pub fn match_state_fields(state: &MatchStateUpdate, event_timestamp: &str) -> StoredState {
    let mut out = FieldMap::new();
    insert(&mut out, fields::AWAY_SCORE, state.score.away);
    insert(&mut out, fields::HOME_SCORE, state.score.home);
    insert(&mut out, fields::SCORE_CONFIRMED, state.score.is_confirmed);
    insert(&mut out, fields::PERIOD_NUMBER, state.period.number);
    insert(&mut out, fields::PERIOD_TYPE, state.period.period_type.as_str());
    insert(&mut out, fields::CLOCK_RUNNING, state.game_time.is_running);
    insert(&mut out, fields::EVENT_TIMESTAMP, event_timestamp);

    StoredState {
        key: fixture_key(&state.fixture_id),
        fields: out,
    }
}

/// Folds envelopes into the latest-state store
pub struct StateReducer {
    store: Arc<dyn StateStore>,
    span: Span,
}

impl StateReducer {
    /// Create a reducer over the given store
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            span: Span::none(),
        }
    }

    /// Emit events under the given span
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Project one envelope and upsert the result
    ///
    /// # Errors
    ///
    /// Returns error if the envelope has no payload, fails validation, or
    /// the store rejects the write. Nothing is written on error.
    pub async fn ingest(&self, envelope: &EventEnvelope) -> Result<StoredState, ReduceError> {
        let event_timestamp = format_optional(envelope.header.time_stamp_utc);
        let guid = envelope.header.message_guid.as_str();

        let state = match &envelope.payload {
            Some(Payload::Fixture(fixture)) => fixture_fields(fixture, &event_timestamp)
                .inspect_err(|e| {
                    tracing::warn!(parent: &self.span, guid, error = %e, "rejected fixture");
                })?,
            Some(Payload::MatchState(update)) => match_state_fields(update, &event_timestamp),
            None => {
                tracing::error!(parent: &self.span, guid, "unknown message type received");
                return Err(ReduceError::UnknownMessageType);
            }
        };

        self.store
            .upsert_fields(&state.key, state.fields.clone())
            .await
            .inspect_err(|e| {
                tracing::error!(parent: &self.span, key = %state.key, error = %e, "upsert failed");
            })?;

        tracing::info!(
            parent: &self.span,
            key = %state.key,
            guid,
            fields = state.fields.len(),
            "stored latest state"
        );
        Ok(state)
    }
}

impl std::fmt::Debug for StateReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateReducer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use touchline_core::{Competitor, GameTime, Header, Period, Score};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn reducer() -> (StateReducer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (StateReducer::new(store.clone()), store)
    }

    fn snapshot(competitors: Vec<Competitor>) -> EventEnvelope {
        EventEnvelope::fixture(
            Header::new("fx-1", ts("2024-09-16T00:00:00Z")),
            FixtureSnapshot {
                id: 1,
                competitors,
                status: "Scheduled".to_string(),
                start_time_utc: Some(ts("2024-09-16T20:25:00.500Z")),
            },
        )
    }

    fn update(guid: &str, at: &str, home: i64, away: i64) -> EventEnvelope {
        EventEnvelope::match_state(
            Header::new(guid, ts(at)),
            MatchStateUpdate {
                score: Score {
                    away,
                    home,
                    is_confirmed: true,
                },
                period: Period {
                    period_type: "Quarter".to_string(),
                    number: 2,
                },
                game_time: GameTime {
                    clock: "05:00".to_string(),
                    is_running: true,
                    last_updated_utc: None,
                },
                fixture_id: "1".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_fixture_snapshot() {
        let (reducer, store) = reducer();
        let envelope = snapshot(vec![
            Competitor::new(10, "Rams", Role::Home),
            Competitor::new(20, "Chargers", Role::Away),
        ]);

        let stored = reducer.ingest(&envelope).await.unwrap();
        assert_eq!(stored.key, "fixture:1");

        let record = store.fields("fixture:1").await.unwrap().unwrap();
        assert_eq!(record[fields::HOME_TEAM], "Rams".into());
        assert_eq!(record[fields::AWAY_TEAM], "Chargers".into());
        assert_eq!(record[fields::FIXTURE_STATUS], "Scheduled".into());
        assert_eq!(record[fields::START_TIME], "2024-09-16T20:25:00Z".into());
        assert_eq!(record[fields::EVENT_TIMESTAMP], "2024-09-16T00:00:00Z".into());
    }

    #[tokio::test]
    async fn test_fixture_missing_team_writes_nothing() {
        let (reducer, store) = reducer();
        let envelope = snapshot(vec![Competitor::new(20, "Chargers", Role::Away)]);

        let err = reducer.ingest(&envelope).await.unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (reducer, store) = reducer();
        reducer
            .ingest(&update("m-1", "2024-09-16T21:00:00Z", 14, 7))
            .await
            .unwrap();
        reducer
            .ingest(&update("m-2", "2024-09-16T20:00:00Z", 3, 0))
            .await
            .unwrap();

        let record = store.fields("fixture:1").await.unwrap().unwrap();
        let expected = match_state_fields(
            match &update("m-2", "2024-09-16T20:00:00Z", 3, 0).payload {
                Some(Payload::MatchState(u)) => u,
                _ => unreachable!(),
            },
            "2024-09-16T20:00:00Z",
        );
        assert_eq!(record, expected.fields);
        assert_eq!(record[fields::HOME_SCORE], FieldValue::Int(3));
    }

    #[tokio::test]
    async fn test_variants_share_record() {
        let (reducer, store) = reducer();
        reducer
            .ingest(&snapshot(vec![
                Competitor::new(10, "Rams", Role::Home),
                Competitor::new(20, "Chargers", Role::Away),
            ]))
            .await
            .unwrap();
        reducer
            .ingest(&update("m-1", "2024-09-16T21:00:00Z", 7, 0))
            .await
            .unwrap();

        let record = store.fields("fixture:1").await.unwrap().unwrap();
        assert_eq!(record[fields::HOME_TEAM], "Rams".into());
        assert_eq!(record[fields::HOME_SCORE], FieldValue::Int(7));
        assert_eq!(record[fields::EVENT_TIMESTAMP], "2024-09-16T21:00:00Z".into());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_message_type() {
        let (reducer, store) = reducer();
        let envelope = EventEnvelope::new(Header::new("x", ts("2024-09-16T00:00:00Z")), None);

        let err = reducer.ingest(&envelope).await.unwrap_err();
        assert_eq!(err, ReduceError::UnknownMessageType);
        assert_eq!(err.to_string(), "unknown message type");
        assert!(store.is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl StateStore for BrokenStore {
        async fn upsert_fields(&self, _: &str, _: FieldMap) -> Result<(), StoreError> {
            Err(StoreError::Backend {
                reason: "disk full".to_string(),
            })
        }

        async fn fields(&self, _: &str) -> Result<Option<FieldMap>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_store_failure() {
        let reducer = StateReducer::new(Arc::new(BrokenStore));
        let err = reducer
            .ingest(&update("m-1", "2024-09-16T21:00:00Z", 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ReduceError::Store(_)));
        assert!(!err.is_validation());
    }
}
