//! Game-history collaborator: one record per resolved round, consumed by the
//! rest of the platform after the fact.
//!
//! Recording is fire-and-forget from the engine's point of view: a failure
//! here is logged by the caller and never rolls back settlement.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;
use wager_domain::{GameKind, RoundAmounts, RoundId, RoundOutcome, SessionId, TokenKind, TraceId};

#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub session_id: SessionId,
    pub round_id: RoundId,
    pub round_no: u32,
    pub game_kind: GameKind,
    pub token: TokenKind,
    pub outcome: RoundOutcome,
    pub amounts: RoundAmounts,
    pub resolved_at: DateTime<Utc>,
    pub trace_id: TraceId,
}

#[async_trait]
pub trait RoundHistorySink: Send + Sync {
    async fn record_round(&self, record: &RoundRecord) -> Result<(), HistoryStoreError>;
}

#[derive(Debug, Default)]
pub struct NoopRoundHistorySink;

#[async_trait]
impl RoundHistorySink for NoopRoundHistorySink {
    async fn record_round(&self, _record: &RoundRecord) -> Result<(), HistoryStoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRoundHistorySink {
    records: Arc<Mutex<Vec<RoundRecord>>>,
}

impl InMemoryRoundHistorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RoundRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn records_len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RoundHistorySink for InMemoryRoundHistorySink {
    async fn record_round(&self, record: &RoundRecord) -> Result<(), HistoryStoreError> {
        self.records
            .lock()
            .map_err(|_| HistoryStoreError::LockPoisoned)?
            .push(record.clone());
        Ok(())
    }
}

/// Postgres-backed sink for deployments where the platform's history table
/// lives in the same database.
#[derive(Debug, Clone)]
pub struct PgRoundHistorySink {
    pool: PgPool,
}

impl PgRoundHistorySink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RoundHistorySink for PgRoundHistorySink {
    async fn record_round(&self, record: &RoundRecord) -> Result<(), HistoryStoreError> {
        let outcome_json = serde_json::to_value(&record.outcome)
            .map_err(|e| HistoryStoreError::Serialization(e.to_string()))?;
        let amounts_json = serde_json::to_value(&record.amounts)
            .map_err(|e| HistoryStoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO round_history (
                round_history_id, session_id, round_id, round_no, game_kind,
                token, outcome_json, amounts_json, resolved_at, trace_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (round_id) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(record.session_id.0)
        .bind(record.round_id.0)
        .bind(i32::try_from(record.round_no).unwrap_or(i32::MAX))
        .bind(match record.game_kind {
            GameKind::Simultaneous => "simultaneous",
            GameKind::Sequential => "sequential",
        })
        .bind(&record.token.0)
        .bind(outcome_json)
        .bind(amounts_json)
        .bind(record.resolved_at)
        .bind(record.trace_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| HistoryStoreError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wager_domain::{Amount, UserId};

    fn sample_record() -> RoundRecord {
        RoundRecord {
            session_id: SessionId::new(),
            round_id: RoundId::new(),
            round_no: 1,
            game_kind: GameKind::Simultaneous,
            token: TokenKind::new("points"),
            outcome: RoundOutcome::Won {
                winner: UserId::new(),
                by_forfeit: false,
            },
            amounts: RoundAmounts {
                creator_stake: Amount(100),
                challenger_stake: Amount(100),
                payout: Amount(200),
            },
            resolved_at: Utc::now(),
            trace_id: TraceId::new(),
        }
    }

    #[tokio::test]
    async fn in_memory_sink_accumulates_records() {
        let sink = InMemoryRoundHistorySink::new();
        sink.record_round(&sample_record()).await.expect("record");
        sink.record_round(&sample_record()).await.expect("record");
        assert_eq!(sink.records_len(), 2);
    }

    #[tokio::test]
    async fn noop_sink_accepts_anything() {
        NoopRoundHistorySink
            .record_round(&sample_record())
            .await
            .expect("record");
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = sample_record();
        let json = serde_json::to_string(&record).expect("serialize");
        let back: RoundRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }
}
