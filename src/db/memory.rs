use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{BackendError, Subscription, VoteSource};
use crate::models::{
    JudgeAssignment, Poll, PollOption, PollStatus, PollType, Question, VoteRecord,
};
use crate::voting::fixtures::{option, question};

/// In-process stand-in for the hosted backend.
pub struct MemoryStore {
    polls: Mutex<Vec<Poll>>,
    questions: Mutex<Vec<Question>>,
    options: Mutex<Vec<PollOption>>,
    assignments: Mutex<Vec<(Uuid, JudgeAssignment)>>,
    votes: Mutex<Vec<VoteRecord>>,
    inserts: Mutex<broadcast::Sender<Uuid>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(64);
        Self {
            polls: Mutex::new(Vec::new()),
            questions: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            assignments: Mutex::new(Vec::new()),
            votes: Mutex::new(Vec::new()),
            inserts: Mutex::new(inserts),
            failing: AtomicBool::new(false),
        }
    }

    pub fn add_poll(&self, poll: Poll) {
        self.polls.lock().unwrap().push(poll);
    }

    pub fn add_question(&self, question: Question) {
        self.questions.lock().unwrap().push(question);
    }

    pub fn add_option(&self, option: PollOption) {
        self.options.lock().unwrap().push(option);
    }

    pub fn assign_judge(&self, poll_id: Uuid, assignment: JudgeAssignment) {
        self.assignments.lock().unwrap().push((poll_id, assignment));
    }

    pub fn insert_vote(&self, vote: VoteRecord) {
        let poll_id = vote.poll_id;
        self.votes.lock().unwrap().push(vote);
        let _ = self.inserts.lock().unwrap().send(poll_id);
    }

    pub fn set_status(&self, poll_id: Uuid, status: PollStatus) {
        for poll in self.polls.lock().unwrap().iter_mut() {
            if poll.id == poll_id {
                poll.status = status;
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inserts.lock().unwrap().receiver_count()
    }

    /// Ends every open insert feed, as a dropped backend connection would.
    /// New subscriptions get a fresh feed.
    pub fn close_feeds(&self) {
        let (fresh, _) = broadcast::channel(64);
        *self.inserts.lock().unwrap() = fresh;
    }

    /// Makes every fetch fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::NotFound("backend connection".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VoteSource for MemoryStore {
    async fn fetch_poll(&self, poll_id: Uuid) -> Result<Poll, BackendError> {
        self.check()?;
        self.polls
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == poll_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("poll {}", poll_id)))
    }

    async fn fetch_questions(&self, poll_id: Uuid) -> Result<Vec<Question>, BackendError> {
        self.check()?;
        let mut questions: Vec<Question> = self
            .questions
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.poll_id == poll_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.position);
        Ok(questions)
    }

    async fn fetch_options(&self, question_ids: &[Uuid]) -> Result<Vec<PollOption>, BackendError> {
        self.check()?;
        Ok(self
            .options
            .lock()
            .unwrap()
            .iter()
            .filter(|o| question_ids.contains(&o.question_id))
            .cloned()
            .collect())
    }

    async fn fetch_votes(&self, poll_id: Uuid) -> Result<Vec<VoteRecord>, BackendError> {
        self.check()?;
        Ok(self
            .votes
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.poll_id == poll_id)
            .cloned()
            .collect())
    }

    async fn fetch_judge_assignments(
        &self,
        poll_id: Uuid,
    ) -> Result<Vec<JudgeAssignment>, BackendError> {
        self.check()?;
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == poll_id)
            .map(|(_, a)| a.clone())
            .collect())
    }

    async fn subscribe_vote_inserts(&self, poll_id: Uuid) -> Result<Subscription, BackendError> {
        self.check()?;
        let mut inserts = self.inserts.lock().unwrap().subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                match inserts.recv().await {
                    Ok(id) if id != poll_id => continue,
                    // Missed inserts still only need one recompute
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if tx.send(()).is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx, task))
    }
}

/// A store holding one active "Colors" poll with the question "Best Color"
/// and options Red, Blue, Green. Returns the question id followed by the
/// option ids.
pub fn seeded(poll_type: PollType) -> (Arc<MemoryStore>, Poll, Vec<Uuid>) {
    let store = Arc::new(MemoryStore::new());
    let poll = Poll {
        id: Uuid::new_v4(),
        title: "Colors".to_string(),
        description: Some("Pick one".to_string()),
        poll_type,
        status: PollStatus::Active,
        max_score: 10,
        activated_at: None,
        duration_minutes: None,
    };
    store.add_poll(poll.clone());

    let q = question(poll.id, "Best Color", 0);
    let mut ids = vec![q.id];
    for (i, text) in ["Red", "Blue", "Green"].iter().enumerate() {
        let o = option(&q, text, i as i32);
        ids.push(o.id);
        store.add_option(o);
    }
    store.add_question(q);
    (store, poll, ids)
}
