#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{
    Judge, JudgeAssignment, Poll, PollOption, Question, VoteRecord, DEFAULT_MAX_SCORE,
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("column {column} holds an unreadable value: {value}")]
    Corrupt { column: &'static str, value: String },
}

/// Read side of the hosted backend, as seen by the aggregator.
#[async_trait]
pub trait VoteSource: Send + Sync {
    async fn fetch_poll(&self, poll_id: Uuid) -> Result<Poll, BackendError>;

    /// Questions of a poll in position order.
    async fn fetch_questions(&self, poll_id: Uuid) -> Result<Vec<Question>, BackendError>;

    async fn fetch_options(&self, question_ids: &[Uuid]) -> Result<Vec<PollOption>, BackendError>;

    async fn fetch_votes(&self, poll_id: Uuid) -> Result<Vec<VoteRecord>, BackendError>;

    async fn fetch_judge_assignments(
        &self,
        poll_id: Uuid,
    ) -> Result<Vec<JudgeAssignment>, BackendError>;

    /// Notifies once per vote inserted for `poll_id` until cancelled.
    async fn subscribe_vote_inserts(&self, poll_id: Uuid) -> Result<Subscription, BackendError>;
}

/// A live feed of vote-insert notifications. The forwarding task is
/// aborted when the subscription is cancelled or dropped.
pub struct Subscription {
    notifications: mpsc::UnboundedReceiver<()>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(notifications: mpsc::UnboundedReceiver<()>, task: JoinHandle<()>) -> Self {
        Self {
            notifications,
            task,
        }
    }

    /// Waits for the next insert. Returns false once the feed has ended.
    pub async fn notified(&mut self) -> bool {
        self.notifications.recv().await.is_some()
    }

    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct Database {
    pool: PgPool,
    notify_channel: String,
}

impl Database {
    pub async fn new(
        db_url: &str,
        max_connections: u32,
        notify_channel: &str,
    ) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        info!("Connected to database ({} max connections)", max_connections);

        Ok(Self {
            pool,
            notify_channel: notify_channel.to_string(),
        })
    }

    // Tables and the insert trigger, for local development databases.
    pub async fn init_schema(&self) -> Result<(), BackendError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                poll_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                max_score INTEGER,
                activated_at TIMESTAMPTZ,
                duration_minutes INTEGER,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS questions (
                id UUID PRIMARY KEY,
                poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                image_url TEXT,
                position INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS options (
                id UUID PRIMARY KEY,
                question_id UUID NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                image_url TEXT,
                base_score INTEGER,
                position INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS judges (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                access_code TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS poll_judges (
                poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
                judge_id UUID NOT NULL REFERENCES judges(id) ON DELETE CASCADE,
                access_code TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (poll_id, judge_id)
            )
            "#,
            // No foreign keys on question/option: votes outlive deleted schema rows.
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                id UUID PRIMARY KEY,
                poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
                question_id UUID NOT NULL,
                option_id UUID,
                score_value INTEGER,
                rank_order INTEGER,
                judge_id UUID,
                device_fingerprint TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS votes_poll_id_idx ON votes (poll_id)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        let notify_fn = format!(
            r#"
            CREATE OR REPLACE FUNCTION suffragium_notify_vote() RETURNS trigger AS $$
            BEGIN
                PERFORM pg_notify('{}', NEW.poll_id::text);
                RETURN NEW;
            END;
            $$ LANGUAGE plpgsql
            "#,
            self.notify_channel
        );
        sqlx::query(&notify_fn).execute(&self.pool).await?;
        sqlx::query("DROP TRIGGER IF EXISTS votes_notify_insert ON votes")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TRIGGER votes_notify_insert
            AFTER INSERT ON votes
            FOR EACH ROW EXECUTE FUNCTION suffragium_notify_vote()
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema initialised (notify channel '{}')", self.notify_channel);
        Ok(())
    }
}

fn parse_column<T: std::str::FromStr>(
    row: &PgRow,
    column: &'static str,
) -> Result<T, BackendError> {
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|_| BackendError::Corrupt { column, value: raw })
}

fn poll_from_row(row: &PgRow) -> Result<Poll, BackendError> {
    Ok(Poll {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        poll_type: parse_column(row, "poll_type")?,
        status: parse_column(row, "status")?,
        max_score: row
            .try_get::<Option<i32>, _>("max_score")?
            .unwrap_or(DEFAULT_MAX_SCORE),
        activated_at: row.try_get::<Option<DateTime<Utc>>, _>("activated_at")?,
        duration_minutes: row.try_get("duration_minutes")?,
    })
}

fn question_from_row(row: &PgRow) -> Result<Question, BackendError> {
    Ok(Question {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        text: row.try_get("text")?,
        image_url: row.try_get("image_url")?,
        position: row.try_get("position")?,
    })
}

fn option_from_row(row: &PgRow) -> Result<PollOption, BackendError> {
    Ok(PollOption {
        id: row.try_get("id")?,
        question_id: row.try_get("question_id")?,
        text: row.try_get("text")?,
        image_url: row.try_get("image_url")?,
        base_score: row.try_get("base_score")?,
        position: row.try_get("position")?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<JudgeAssignment, BackendError> {
    Ok(JudgeAssignment {
        judge: Judge {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            access_code: row.try_get("access_code")?,
        },
        poll_access_code: row.try_get("poll_access_code")?,
    })
}

fn vote_from_row(row: &PgRow) -> Result<VoteRecord, BackendError> {
    Ok(VoteRecord {
        id: row.try_get("id")?,
        poll_id: row.try_get("poll_id")?,
        question_id: row.try_get("question_id")?,
        option_id: row.try_get("option_id")?,
        score_value: row.try_get("score_value")?,
        rank_order: row.try_get("rank_order")?,
        judge_id: row.try_get("judge_id")?,
        device_fingerprint: row.try_get("device_fingerprint")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl VoteSource for Database {
    async fn fetch_poll(&self, poll_id: Uuid) -> Result<Poll, BackendError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, poll_type, status, max_score, activated_at, duration_minutes
            FROM polls
            WHERE id = $1
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| BackendError::NotFound(format!("poll {}", poll_id)))?;

        poll_from_row(&row)
    }

    async fn fetch_questions(&self, poll_id: Uuid) -> Result<Vec<Question>, BackendError> {
        sqlx::query(
            r#"
            SELECT id, poll_id, text, image_url, position
            FROM questions
            WHERE poll_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(question_from_row)
        .collect()
    }

    async fn fetch_options(&self, question_ids: &[Uuid]) -> Result<Vec<PollOption>, BackendError> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query(
            r#"
            SELECT id, question_id, text, image_url, base_score, position
            FROM options
            WHERE question_id = ANY($1)
            ORDER BY position, id
            "#,
        )
        .bind(question_ids)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(option_from_row)
        .collect()
    }

    async fn fetch_votes(&self, poll_id: Uuid) -> Result<Vec<VoteRecord>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT id, poll_id, question_id, option_id, score_value, rank_order,
                   judge_id, device_fingerprint, created_at
            FROM votes
            WHERE poll_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        debug!("Fetched {} vote rows for poll {}", rows.len(), poll_id);
        rows.iter().map(vote_from_row).collect()
    }

    async fn fetch_judge_assignments(
        &self,
        poll_id: Uuid,
    ) -> Result<Vec<JudgeAssignment>, BackendError> {
        sqlx::query(
            r#"
            SELECT j.id, j.name, j.access_code, pj.access_code AS poll_access_code
            FROM poll_judges pj
            JOIN judges j ON j.id = pj.judge_id
            WHERE pj.poll_id = $1
            ORDER BY pj.created_at, j.name
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(assignment_from_row)
        .collect()
    }

    async fn subscribe_vote_inserts(&self, poll_id: Uuid) -> Result<Subscription, BackendError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.notify_channel).await?;
        info!(
            "Listening on '{}' for votes on poll {}",
            self.notify_channel, poll_id
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let wanted = poll_id.to_string();
        let task = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if notification.payload() != wanted {
                            continue;
                        }
                        if tx.send(()).is_err() {
                            break; // Receiver gone
                        }
                    }
                    Err(e) => {
                        error!("Vote notification listener for poll {} failed: {}", wanted, e);
                        break;
                    }
                }
            }
            warn!("Vote notification listener for poll {} stopped", wanted);
        });

        Ok(Subscription::new(rx, task))
    }
}
