use crate::entities::MatchStatus;
use crate::framework::DatabaseProcessor;
use crate::sinks::{MatchRow, MatchStore, SinkError};
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MatchRecord {
    pub match_id: i64,
    pub league_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub scheduled_time: OffsetDateTime,
    pub status: MatchStatus,
    pub home_score: i32,
    pub away_score: i32,
    pub minute: i32,
    pub venue: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

fn non_negative(value: i32, column: &str, match_id: i64) -> Result<u32, SinkError> {
    u32::try_from(value)
        .map_err(|_| SinkError::OutOfRange(format!("matches.{column} = {value} for match {match_id}")))
}

fn to_column(value: u32, column: &str, match_id: i64) -> Result<i32, SinkError> {
    i32::try_from(value)
        .map_err(|_| SinkError::OutOfRange(format!("{column} = {value} for match {match_id}")))
}

impl TryFrom<MatchRecord> for MatchRow {
    type Error = SinkError;

    fn try_from(record: MatchRecord) -> Result<Self, SinkError> {
        let id = record.match_id;
        Ok(MatchRow {
            match_id: record.match_id,
            league_id: record.league_id,
            home_team_id: record.home_team_id,
            away_team_id: record.away_team_id,
            scheduled_time: record.scheduled_time,
            status: record.status.into(),
            home_score: non_negative(record.home_score, "home_score", id)?,
            away_score: non_negative(record.away_score, "away_score", id)?,
            minute: non_negative(record.minute, "minute", id)?,
            venue: record.venue,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
/// Fetch one match row by id.
pub struct GetMatch {
    pub match_id: i64,
}

impl Processor<GetMatch> for DatabaseProcessor {
    type Output = Option<MatchRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMatch")]
    async fn process(&self, query: GetMatch) -> Result<Option<MatchRecord>, sqlx::Error> {
        let record = sqlx::query_as::<_, MatchRecord>(
            r#"
            SELECT
                match_id, league_id, home_team_id, away_team_id, scheduled_time,
                status, home_score, away_score, minute, venue, created_at, updated_at
            FROM matches
            WHERE match_id = $1
            "#,
        )
        .bind(query.match_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }
}

#[derive(Debug, Clone)]
/// Overwrite the live fields of a match row.
///
/// Last writer wins; there is no version check. Returns the number of rows
/// updated, which is 0 for an unknown match.
pub struct UpdateMatchScore {
    pub match_id: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub minute: i32,
    pub status: MatchStatus,
}

impl Processor<UpdateMatchScore> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateMatchScore")]
    async fn process(&self, update: UpdateMatchScore) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE matches
            SET home_score = $2, away_score = $3, minute = $4, status = $5, updated_at = now()
            WHERE match_id = $1
            "#,
        )
        .bind(update.match_id)
        .bind(update.home_score)
        .bind(update.away_score)
        .bind(update.minute)
        .bind(update.status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Insert multiple match rows in a single query.
///
/// Uses QueryBuilder for bulk insert with ON CONFLICT DO NOTHING, so existing
/// rows keep their scores. Returns the number of rows actually inserted.
pub struct InsertManyMatches {
    pub rows: Vec<MatchRecord>,
}

impl Processor<InsertManyMatches> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertManyMatches")]
    async fn process(&self, insert: InsertManyMatches) -> Result<u64, sqlx::Error> {
        if insert.rows.is_empty() {
            return Ok(0);
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO matches \
             (match_id, league_id, home_team_id, away_team_id, scheduled_time, status, \
              home_score, away_score, minute, venue) ",
        );
        query_builder.push_values(insert.rows, |mut b, row| {
            b.push_bind(row.match_id)
                .push_bind(row.league_id)
                .push_bind(row.home_team_id)
                .push_bind(row.away_team_id)
                .push_bind(row.scheduled_time)
                .push_bind(row.status)
                .push_bind(row.home_score)
                .push_bind(row.away_score)
                .push_bind(row.minute)
                .push_bind(row.venue);
        });
        query_builder.push(" ON CONFLICT (match_id) DO NOTHING");

        let result = query_builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// [`MatchStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgMatchStore {
    db: DatabaseProcessor,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db.pool
    }

    /// Insert rows that do not exist yet.
    pub async fn seed(&self, rows: &[MatchRow]) -> Result<u64, SinkError> {
        let rows = rows
            .iter()
            .map(|row| {
                Ok(MatchRecord {
                    match_id: row.match_id,
                    league_id: row.league_id,
                    home_team_id: row.home_team_id,
                    away_team_id: row.away_team_id,
                    scheduled_time: row.scheduled_time,
                    status: row.status.into(),
                    home_score: to_column(row.home_score, "home_score", row.match_id)?,
                    away_score: to_column(row.away_score, "away_score", row.match_id)?,
                    minute: to_column(row.minute, "minute", row.match_id)?,
                    venue: row.venue.clone(),
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                })
            })
            .collect::<Result<Vec<_>, SinkError>>()?;
        Ok(self.db.process(InsertManyMatches { rows }).await?)
    }
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn get_match(&self, match_id: i64) -> Result<Option<MatchRow>, SinkError> {
        self.db
            .process(GetMatch { match_id })
            .await?
            .map(MatchRow::try_from)
            .transpose()
    }

    async fn update_match(&self, row: &MatchRow) -> Result<(), SinkError> {
        let updated = self
            .db
            .process(UpdateMatchScore {
                match_id: row.match_id,
                home_score: to_column(row.home_score, "home_score", row.match_id)?,
                away_score: to_column(row.away_score, "away_score", row.match_id)?,
                minute: to_column(row.minute, "minute", row.match_id)?,
                status: row.status.into(),
            })
            .await?;
        if updated == 0 {
            tracing::debug!(match_id = row.match_id, "No match row to update");
        }
        Ok(())
    }
}
