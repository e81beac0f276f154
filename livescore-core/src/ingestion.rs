//! Ingestion fan-out: applies consumed messages to the storage sinks.
//!
//! Every write is keyed so that re-applying a redelivered message leaves the
//! sinks unchanged.

use crate::broker::BrokerError;
use crate::config::CacheConfig;
use crate::consumer::{ConsumerPipeline, MessageHandler};
use crate::sinks::{
    EventDocumentStore, EventSearchIndex, MatchStore, PlayerStatsStore, ScoreCache, ScoreSnapshot,
    SinkError, score_cache_key,
};
use async_trait::async_trait;
use livescore_sdk::objects::{EventEnvelope, PlayerUpdate, ScoreUpdate};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// One or both event sinks failed. The other may have been written.
    #[error("fan-out of event {event_id} failed in {} sink(s): {}", .errors.len(), join_errors(.errors))]
    PartialFanout {
        event_id: Uuid,
        errors: Vec<SinkError>,
    },
}

fn join_errors(errors: &[SinkError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The storage collaborators of the ingestion side.
#[derive(Clone)]
pub struct Sinks {
    pub matches: Arc<dyn MatchStore>,
    pub documents: Arc<dyn EventDocumentStore>,
    pub search: Arc<dyn EventSearchIndex>,
    pub cache: Arc<dyn ScoreCache>,
    pub players: Arc<dyn PlayerStatsStore>,
}

pub struct IngestionFanout {
    sinks: Sinks,
    config: CacheConfig,
}

impl IngestionFanout {
    pub fn new(sinks: Sinks, config: CacheConfig) -> Self {
        Self { sinks, config }
    }

    /// Start one loop per ingest topic on `pipeline`.
    pub async fn attach(self: Arc<Self>, pipeline: &mut ConsumerPipeline) -> Result<(), BrokerError> {
        pipeline
            .spawn_topic::<EventEnvelope, _>(self.clone())
            .await?;
        pipeline.spawn_topic::<ScoreUpdate, _>(self.clone()).await?;
        pipeline.spawn_topic::<PlayerUpdate, _>(self).await?;
        Ok(())
    }

    /// Write `event` to the document store and the search index.
    ///
    /// Both writes are attempted even if one fails.
    #[instrument(skip_all, fields(event_id = %event.event_id, match_id = event.match_id))]
    pub async fn apply_event(&self, event: &EventEnvelope) -> Result<(), IngestError> {
        let (stored, indexed) = tokio::join!(
            self.sinks.documents.upsert_event(event),
            self.sinks.search.index_event(event),
        );
        let errors: Vec<SinkError> = [stored, indexed]
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if errors.is_empty() {
            debug!(event_type = %event.event_type, "Event stored and indexed");
            Ok(())
        } else {
            Err(IngestError::PartialFanout {
                event_id: event.event_id,
                errors,
            })
        }
    }

    /// Overwrite the match row, refresh the cached snapshot and maintain the
    /// live index.
    #[instrument(skip_all, fields(match_id = update.match_id, status = %update.status))]
    pub async fn apply_score(&self, update: &ScoreUpdate) -> Result<(), IngestError> {
        match self.sinks.matches.get_match(update.match_id).await? {
            Some(mut row) => {
                row.apply_score(update, OffsetDateTime::now_utc());
                self.sinks.matches.update_match(&row).await?;
            }
            None => debug!("No stored row for match, skipping relational update"),
        }

        let key = score_cache_key(update.match_id);
        self.sinks
            .cache
            .set_score(&key, &ScoreSnapshot::from(update), self.config.score_ttl)
            .await?;

        if update.status.is_in_play() {
            self.sinks
                .cache
                .touch_live(update.match_id, update.timestamp)
                .await?;
        } else {
            self.sinks.cache.remove_live(update.match_id).await?;
        }
        Ok(())
    }

    pub async fn apply_player_update(&self, update: &PlayerUpdate) -> Result<(), IngestError> {
        self.sinks.players.record(update).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<EventEnvelope> for IngestionFanout {
    type Error = IngestError;

    async fn handle(&self, event: EventEnvelope) -> Result<(), IngestError> {
        self.apply_event(&event).await
    }
}

#[async_trait]
impl MessageHandler<ScoreUpdate> for IngestionFanout {
    type Error = IngestError;

    async fn handle(&self, update: ScoreUpdate) -> Result<(), IngestError> {
        self.apply_score(&update).await
    }
}

#[async_trait]
impl MessageHandler<PlayerUpdate> for IngestionFanout {
    type Error = IngestError;

    async fn handle(&self, update: PlayerUpdate) -> Result<(), IngestError> {
        self.apply_player_update(&update).await
    }
}
