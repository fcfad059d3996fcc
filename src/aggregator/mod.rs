use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::db::{BackendError, VoteSource};
use crate::models::{Poll, PollType};
use crate::voting::ranking::{rank_sections, RankedSection};
use crate::voting::{compute_tally, AggregateSet, SkippedVote};

/// What a `FetchFailure` names when the vote-insert feed is lost.
pub const VOTE_FEED: &str = "vote feed";

/// The only error that leaves the aggregator. Transport errors are
/// flattened into it so presentation never sees a driver type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    #[error("could not fetch {what} for poll {poll_id}: {reason}")]
    FetchFailure {
        poll_id: Uuid,
        what: &'static str,
        reason: String,
    },
}

impl AggregateError {
    /// True when live updates are degraded rather than a snapshot failing.
    pub fn is_feed_failure(&self) -> bool {
        match self {
            AggregateError::FetchFailure { what, .. } => *what == VOTE_FEED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    NoVotesYet,
    Tallied,
}

/// Display-ready results of one recomputation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub poll: Poll,
    pub state: ResultState,
    pub sections: Vec<RankedSection>,
    pub total_votes: u64,
    pub skipped: Vec<SkippedVote>,
    pub computed_at: DateTime<Utc>,
}

impl ResultSet {
    pub fn new(poll: Poll, sections: Vec<RankedSection>, tally: &AggregateSet) -> Self {
        let total_votes = tally.counted_votes();
        Self {
            poll,
            state: if total_votes == 0 {
                ResultState::NoVotesYet
            } else {
                ResultState::Tallied
            },
            sections,
            total_votes,
            skipped: tally.skipped.clone(),
            computed_at: Utc::now(),
        }
    }
}

/// What a dashboard shows: the last good results and the last refresh error.
#[derive(Debug, Clone, Default)]
pub struct DashboardState {
    pub results: Option<Arc<ResultSet>>,
    pub error: Option<AggregateError>,
}

pub struct Aggregator<S> {
    source: Arc<S>,
    poll_id: Uuid,
    state: watch::Sender<DashboardState>,
}

impl<S: VoteSource> Aggregator<S> {
    pub fn new(source: Arc<S>, poll_id: Uuid) -> Self {
        let (state, _) = watch::channel(DashboardState::default());
        Self {
            source,
            poll_id,
            state,
        }
    }

    pub fn poll_id(&self) -> Uuid {
        self.poll_id
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn watch(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    /// The last successfully computed results, if any.
    pub fn current_results(&self) -> Option<Arc<ResultSet>> {
        self.state.borrow().results.clone()
    }

    /// Fetches a fresh snapshot and recomputes everything from it. On failure
    /// the previous results stay published next to the error.
    pub async fn refresh(&self) -> Result<Arc<ResultSet>, AggregateError> {
        match self.compute().await {
            Ok(results) => {
                let results = Arc::new(results);
                self.check_transition(&results.poll);
                self.state.send_modify(|state| {
                    state.results = Some(Arc::clone(&results));
                    // A lost feed stays reported until it is back
                    if !state.error.as_ref().is_some_and(AggregateError::is_feed_failure) {
                        state.error = None;
                    }
                });
                Ok(results)
            }
            Err(e) => {
                error!("Refreshing results failed: {}", e);
                self.state.send_modify(|state| state.error = Some(e.clone()));
                Err(e)
            }
        }
    }

    /// Publishes a failure that happened outside `refresh`, such as losing
    /// the vote-insert feed. The last results stay as they are.
    pub fn report_failure(&self, what: &'static str, reason: impl ToString) -> AggregateError {
        let err = AggregateError::FetchFailure {
            poll_id: self.poll_id,
            what,
            reason: reason.to_string(),
        };
        error!("{}", err);
        self.state.send_modify(|state| state.error = Some(err.clone()));
        err
    }

    /// Clears a reported feed failure once live updates work again.
    pub fn clear_feed_failure(&self) {
        self.state.send_if_modified(|state| {
            if state.error.as_ref().is_some_and(AggregateError::is_feed_failure) {
                state.error = None;
                true
            } else {
                false
            }
        });
    }

    fn fetch_failure(&self, what: &'static str) -> impl Fn(BackendError) -> AggregateError + '_ {
        move |e| AggregateError::FetchFailure {
            poll_id: self.poll_id,
            what,
            reason: e.to_string(),
        }
    }

    async fn compute(&self) -> Result<ResultSet, AggregateError> {
        // Poll first: its type decides what else is needed
        let poll = self
            .source
            .fetch_poll(self.poll_id)
            .await
            .map_err(self.fetch_failure("poll"))?;
        let questions = self
            .source
            .fetch_questions(self.poll_id)
            .await
            .map_err(self.fetch_failure("questions"))?;

        // Options for every question in one round trip
        let question_ids: Vec<Uuid> = questions.iter().map(|q| q.id).collect();
        let options = self
            .source
            .fetch_options(&question_ids)
            .await
            .map_err(self.fetch_failure("options"))?;

        let votes = self
            .source
            .fetch_votes(self.poll_id)
            .await
            .map_err(self.fetch_failure("votes"))?;

        // Only judged polls have a panel
        let judges = match poll.poll_type {
            PollType::JudgedProject => self
                .source
                .fetch_judge_assignments(self.poll_id)
                .await
                .map_err(self.fetch_failure("judges"))?,
            _ => Vec::new(),
        };


        // Tally, then order for display
        let tally = compute_tally(poll.poll_type, &questions, &options, &judges, &votes);
        let sections = rank_sections(poll.poll_type, &questions, &tally);
        Ok(ResultSet::new(poll, sections, &tally))
    }

    // Logs status changes seen between two refreshes.
    fn check_transition(&self, poll: &Poll) {
        let previous = self.state.borrow().results.as_ref().map(|r| r.poll.status);
        match previous {
            Some(before) if before != poll.status => {
                if before.can_transition_to(poll.status) {
                    info!("Poll {} is now {}", poll.id, poll.status);
                } else {
                    warn!(
                        "Poll {} went from {} to {}, which is not a valid transition",
                        poll.id, before, poll.status
                    );
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{seeded, MemoryStore};
    use crate::models::{Judge, JudgeAssignment, VoteRecord};
    use crate::voting::fixtures::question;

    #[tokio::test]
    async fn empty_poll_reports_no_votes_yet() {
        let (store, poll, _) = seeded(PollType::SingleChoice);
        let aggregator = Aggregator::new(store, poll.id);

        let results = aggregator.refresh().await.unwrap();
        assert_eq!(results.state, ResultState::NoVotesYet);
        assert_eq!(results.sections[0].standings.len(), 3);
        assert!(results.sections[0].winner().is_none());
    }

    #[tokio::test]
    async fn refresh_tallies_and_publishes() {
        let (store, poll, ids) = seeded(PollType::SingleChoice);
        store.insert_vote(VoteRecord::choice(poll.id, ids[0], ids[2]));
        let aggregator = Aggregator::new(Arc::clone(&store), poll.id);
        let watcher = aggregator.watch();

        let results = aggregator.refresh().await.unwrap();
        assert_eq!(results.state, ResultState::Tallied);
        assert_eq!(results.total_votes, 1);
        assert_eq!(
            results.sections[0].winner().map(|s| s.aggregate.label.as_str()),
            Some("Blue")
        );
        assert_eq!(aggregator.current_results(), Some(results));
        assert!(watcher.borrow().results.is_some());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_last_results() {
        let (store, poll, _) = seeded(PollType::SingleChoice);
        let aggregator = Aggregator::new(Arc::clone(&store), poll.id);
        let good = aggregator.refresh().await.unwrap();

        store.set_failing(true);
        let err = aggregator.refresh().await.unwrap_err();
        assert!(matches!(err, AggregateError::FetchFailure { what: "poll", .. }));
        assert_eq!(aggregator.current_results(), Some(Arc::clone(&good)));
        let state = aggregator.watch().borrow().clone();
        assert_eq!(state.error, Some(err));

        store.set_failing(false);
        aggregator.refresh().await.unwrap();
        assert!(aggregator.watch().borrow().error.is_none());
    }

    #[tokio::test]
    async fn missing_poll_is_a_fetch_failure() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = Aggregator::new(store, Uuid::new_v4());
        assert!(aggregator.refresh().await.is_err());
        assert!(aggregator.current_results().is_none());
    }

    #[tokio::test]
    async fn stale_votes_are_skipped_not_fatal() {
        let (store, poll, ids) = seeded(PollType::SingleChoice);
        store.insert_vote(VoteRecord::choice(poll.id, ids[0], ids[1]));
        // Option deleted after the vote was cast.
        store.insert_vote(VoteRecord::choice(poll.id, ids[0], Uuid::new_v4()));
        let aggregator = Aggregator::new(store, poll.id);

        let results = aggregator.refresh().await.unwrap();
        assert_eq!(results.total_votes, 1);
        assert_eq!(results.skipped.len(), 1);
    }

    #[tokio::test]
    async fn scored_questions_are_ranked_against_each_other() {
        let (store, poll, ids) = seeded(PollType::Scored);
        let texture = question(poll.id, "Texture", 1);
        let aroma = question(poll.id, "Aroma", 2);
        store.add_question(texture.clone());
        store.add_question(aroma.clone());
        for (question_id, value) in [
            (ids[0], 2),
            (ids[0], 2),
            (texture.id, 1),
            (texture.id, 2),
            (aroma.id, 3),
        ] {
            store.insert_vote(VoteRecord::score(poll.id, question_id, value));
        }
        let aggregator = Aggregator::new(store, poll.id);

        let results = aggregator.refresh().await.unwrap();
        assert_eq!(results.sections.len(), 1);
        let order: Vec<(&str, f64)> = results.sections[0]
            .standings
            .iter()
            .map(|s| (s.aggregate.label.as_str(), s.aggregate.value))
            .collect();
        assert_eq!(
            order,
            vec![("Aroma", 3.0), ("Best Color", 2.0), ("Texture", 1.5)]
        );
        assert_eq!(
            results.sections[0].winner().map(|s| s.aggregate.label.as_str()),
            Some("Aroma")
        );
    }

    #[tokio::test]
    async fn feed_failure_survives_refreshes_until_cleared() {
        let (store, poll, _) = seeded(PollType::SingleChoice);
        let aggregator = Aggregator::new(store, poll.id);

        let err = aggregator.report_failure(VOTE_FEED, "listener disconnected");
        assert!(err.is_feed_failure());
        aggregator.refresh().await.unwrap();
        assert_eq!(aggregator.watch().borrow().error, Some(err));

        aggregator.clear_feed_failure();
        assert!(aggregator.watch().borrow().error.is_none());
        assert!(aggregator.current_results().is_some());
    }

    #[tokio::test]
    async fn judged_poll_fetches_the_panel() {
        let (store, poll, ids) = seeded(PollType::JudgedProject);
        let ada = JudgeAssignment {
            judge: Judge {
                id: Uuid::new_v4(),
                name: "Ada".to_string(),
                access_code: "ada-1".to_string(),
            },
            poll_access_code: "FAIR24".to_string(),
        };
        store.assign_judge(poll.id, ada.clone());
        store.insert_vote(VoteRecord::judged(poll.id, ids[0], ada.judge.id, 8));
        store.insert_vote(VoteRecord::score(poll.id, ids[0], 6));
        let aggregator = Aggregator::new(store, poll.id);

        let results = aggregator.refresh().await.unwrap();
        assert_eq!(results.sections.len(), 1);
        let top = results.sections[0].winner().unwrap();
        assert_eq!(top.aggregate.label, "Best Color");
        assert_eq!(top.aggregate.value, 14.0);
    }
}
