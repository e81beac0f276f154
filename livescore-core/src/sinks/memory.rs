//! In-process sink implementations.
//!
//! Each store can be told to fail its next N writes, which is how the
//! redelivery path is exercised without real outages.

use super::{
    EventDocumentStore, EventSearchIndex, LIVE_MATCHES_KEY, MatchRow, MatchStore,
    PlayerStatsStore, ScoreCache, ScoreSnapshot, SinkError,
};
use async_trait::async_trait;
use livescore_sdk::objects::{EventEnvelope, PlayerUpdate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// Countdown of injected failures.
#[derive(Debug, Default)]
struct FaultSwitch {
    remaining: AtomicU32,
}

impl FaultSwitch {
    fn arm(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    fn check(&self, sink: &'static str) -> Result<(), SinkError> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(SinkError::Unavailable {
                sink,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Relational match rows.
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    rows: RwLock<HashMap<i64, MatchRow>>,
    faults: FaultSwitch,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(rows: impl IntoIterator<Item = MatchRow>) -> Self {
        let rows = rows.into_iter().map(|row| (row.match_id, row)).collect();
        Self {
            rows: RwLock::new(rows),
            faults: FaultSwitch::default(),
        }
    }

    pub async fn insert(&self, row: MatchRow) {
        self.rows.write().await.insert(row.match_id, row);
    }

    pub async fn row(&self, match_id: i64) -> Option<MatchRow> {
        self.rows.read().await.get(&match_id).cloned()
    }

    /// Fail the next `count` calls, reads included.
    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn get_match(&self, match_id: i64) -> Result<Option<MatchRow>, SinkError> {
        self.faults.check("match store")?;
        Ok(self.rows.read().await.get(&match_id).cloned())
    }

    async fn update_match(&self, row: &MatchRow) -> Result<(), SinkError> {
        self.faults.check("match store")?;
        if let Some(existing) = self.rows.write().await.get_mut(&row.match_id) {
            existing.home_score = row.home_score;
            existing.away_score = row.away_score;
            existing.minute = row.minute;
            existing.status = row.status;
            existing.updated_at = row.updated_at;
        }
        Ok(())
    }
}

/// Event documents keyed by event id.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, EventEnvelope>>,
    writes: AtomicU64,
    faults: FaultSwitch,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, event_id: Uuid) -> Option<EventEnvelope> {
        self.documents.read().await.get(&event_id).cloned()
    }

    /// Successful writes, repeats included.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }
}

#[async_trait]
impl EventDocumentStore for MemoryDocumentStore {
    async fn upsert_event(&self, event: &EventEnvelope) -> Result<(), SinkError> {
        self.faults.check("document store")?;
        self.documents
            .write()
            .await
            .insert(event.event_id, event.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Search documents keyed by event id, stored as their JSON source.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    documents: RwLock<HashMap<Uuid, serde_json::Value>>,
    faults: FaultSwitch,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn source(&self, event_id: Uuid) -> Option<serde_json::Value> {
        self.documents.read().await.get(&event_id).cloned()
    }

    /// Ids of indexed events for one match.
    pub async fn match_events(&self, match_id: i64) -> Vec<Uuid> {
        self.documents
            .read()
            .await
            .iter()
            .filter(|(_, source)| source["matchId"] == match_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }
}

#[async_trait]
impl EventSearchIndex for MemorySearchIndex {
    async fn index_event(&self, event: &EventEnvelope) -> Result<(), SinkError> {
        self.faults.check("search index")?;
        let source = serde_json::to_value(event)?;
        self.documents.write().await.insert(event.event_id, source);
        Ok(())
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// String cache with TTL plus sorted sets. The live-match index is the
/// sorted set under [`LIVE_MATCHES_KEY`].
#[derive(Debug, Default)]
pub struct MemoryScoreCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// set key -> (member -> score)
    sorted_sets: RwLock<HashMap<String, HashMap<i64, i64>>>,
    faults: FaultSwitch,
}

impl MemoryScoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired snapshot under `key`.
    pub async fn get_score(&self, key: &str) -> Result<Option<ScoreSnapshot>, SinkError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                Ok(Some(serde_json::from_str(&entry.value)?))
            }
            _ => Ok(None),
        }
    }

    /// Members of the sorted set `key`, highest score first.
    pub async fn ranked(&self, key: &str) -> Vec<i64> {
        let sets = self.sorted_sets.read().await;
        let Some(set) = sets.get(key) else {
            return Vec::new();
        };
        let mut ranked: Vec<(i64, i64)> = set.iter().map(|(id, score)| (*id, *score)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(id, _)| id).collect()
    }

    /// Live match ids, most recently touched first.
    pub async fn live_matches(&self) -> Vec<i64> {
        self.ranked(LIVE_MATCHES_KEY).await
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }
}

#[async_trait]
impl ScoreCache for MemoryScoreCache {
    async fn set_score(
        &self,
        key: &str,
        snapshot: &ScoreSnapshot,
        ttl: Duration,
    ) -> Result<(), SinkError> {
        self.faults.check("score cache")?;
        let value = serde_json::to_string(snapshot)?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn touch_live(&self, match_id: i64, at: OffsetDateTime) -> Result<(), SinkError> {
        self.faults.check("score cache")?;
        self.sorted_sets
            .write()
            .await
            .entry(LIVE_MATCHES_KEY.to_string())
            .or_default()
            .insert(match_id, at.unix_timestamp());
        Ok(())
    }

    async fn remove_live(&self, match_id: i64) -> Result<(), SinkError> {
        self.faults.check("score cache")?;
        let mut sets = self.sorted_sets.write().await;
        if let Some(live) = sets.get_mut(LIVE_MATCHES_KEY) {
            live.remove(&match_id);
            if live.is_empty() {
                sets.remove(LIVE_MATCHES_KEY);
            }
        }
        Ok(())
    }
}

/// Latest statistics per (player, match).
#[derive(Debug, Default)]
pub struct MemoryPlayerStats {
    latest: RwLock<HashMap<(i64, i64), PlayerUpdate>>,
    faults: FaultSwitch,
}

impl MemoryPlayerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self, player_id: i64, match_id: i64) -> Option<PlayerUpdate> {
        self.latest
            .read()
            .await
            .get(&(player_id, match_id))
            .cloned()
    }

    pub fn fail_next(&self, count: u32) {
        self.faults.arm(count);
    }
}

#[async_trait]
impl PlayerStatsStore for MemoryPlayerStats {
    async fn record(&self, update: &PlayerUpdate) -> Result<(), SinkError> {
        self.faults.check("player stats")?;
        let mut latest = self.latest.write().await;
        let key = (update.player_id, update.match_id);
        let newer = latest
            .get(&key)
            .is_none_or(|current| current.timestamp <= update.timestamp);
        if newer {
            latest.insert(key, update.clone());
        }
        Ok(())
    }
}
