pub mod judged;
pub mod plurality;
pub mod ranked;
pub mod ranking;
pub mod score;
pub mod summary;

use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::models::{JudgeAssignment, PollOption, PollType, Question, VoteRecord};

/// Tally of one option (or of one question for scored and judged polls).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub question_id: Uuid,
    pub option_id: Option<Uuid>,
    pub label: String,
    /// Records that contributed to `value`.
    pub votes: u64,
    pub value: f64,
    pub breakdown: Option<JudgeBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeBreakdown {
    pub judges: Vec<JudgeScore>,
    pub public_average: f64,
    pub public_votes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeScore {
    pub judge_id: Uuid,
    pub name: String,
    /// `None` while the judge has not scored the project.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownQuestion,
    UnknownOption,
    OptionQuestionMismatch,
    MissingOption,
    MissingValue,
    UnassignedJudge,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::UnknownQuestion => "question is not part of the poll",
            SkipReason::UnknownOption => "option does not exist",
            SkipReason::OptionQuestionMismatch => "option belongs to another question",
            SkipReason::MissingOption => "no option selected",
            SkipReason::MissingValue => "no score or rank given",
            SkipReason::UnassignedJudge => "judge is not on the panel",
        };
        f.write_str(text)
    }
}

/// A vote record left out of the tally because it does not fit the schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedVote {
    pub vote_id: Uuid,
    pub reason: SkipReason,
}

impl SkippedVote {
    fn new(vote: &VoteRecord, reason: SkipReason) -> Self {
        Self {
            vote_id: vote.id,
            reason,
        }
    }
}

/// Per-option aggregates, complete over the schema and in schema order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregateSet {
    pub entries: Vec<Aggregate>,
    pub skipped: Vec<SkippedVote>,
}

impl AggregateSet {
    #[cfg(test)]
    pub fn get(&self, question_id: Uuid, option_id: Option<Uuid>) -> Option<&Aggregate> {
        self.entries
            .iter()
            .find(|a| a.question_id == question_id && a.option_id == option_id)
    }

    pub fn for_question(&self, question_id: Uuid) -> impl Iterator<Item = &Aggregate> + '_ {
        self.entries
            .iter()
            .filter(move |a| a.question_id == question_id)
    }

    pub fn counted_votes(&self) -> u64 {
        self.entries.iter().map(|a| a.votes).sum()
    }
}

/// Lookup tables over one snapshot of questions and options.
pub(crate) struct Schema<'a> {
    questions: &'a [Question],
    question_ids: HashMap<Uuid, &'a Question>,
    options: HashMap<Uuid, &'a PollOption>,
    by_question: HashMap<Uuid, Vec<&'a PollOption>>,
}

impl<'a> Schema<'a> {
    pub(crate) fn new(questions: &'a [Question], options: &'a [PollOption]) -> Self {
        let question_ids: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();

        // Group options under their question
        let mut by_question: HashMap<Uuid, Vec<&PollOption>> = HashMap::new();
        for option in options {
            // Options of questions outside this poll are not part of the tally.
            if question_ids.contains_key(&option.question_id) {
                by_question.entry(option.question_id).or_default().push(option);
            }
        }
        // Sort options by position
        for list in by_question.values_mut() {
            list.sort_by_key(|o| o.position);
        }

        Self {
            questions,
            question_ids,
            options: options.iter().map(|o| (o.id, o)).collect(),
            by_question,
        }
    }

    pub(crate) fn questions(&self) -> &'a [Question] {
        self.questions
    }

    pub(crate) fn question(&self, vote: &VoteRecord) -> Result<&'a Question, SkipReason> {
        self.question_ids
            .get(&vote.question_id)
            .copied()
            .ok_or(SkipReason::UnknownQuestion)
    }

    /// The option a vote selects, provided it belongs to the vote's question.
    pub(crate) fn option(&self, vote: &VoteRecord) -> Result<&'a PollOption, SkipReason> {
        self.question(vote)?;
        let option_id = vote.option_id.ok_or(SkipReason::MissingOption)?;
        let option = self
            .options
            .get(&option_id)
            .copied()
            .ok_or(SkipReason::UnknownOption)?;
        if option.question_id != vote.question_id {
            return Err(SkipReason::OptionQuestionMismatch);
        }
        Ok(option)
    }

    /// Every (question, option) pair in schema order.
    pub(crate) fn option_slots(&self) -> impl Iterator<Item = (&'a Question, &'a PollOption)> + '_ {
        self.questions.iter().flat_map(move |q| {
            self.by_question
                .get(&q.id)
                .into_iter()
                .flatten()
                .map(move |o| (q, *o))
        })
    }
}

/// Running sum and count for average-based tallies.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Accumulator {
    pub sum: i64,
    pub count: u64,
}

impl Accumulator {
    pub(crate) fn add(&mut self, value: i32) {
        self.sum += i64::from(value);
        self.count += 1;
    }

    pub(crate) fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            round2(self.sum as f64 / self.count as f64)
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Turns raw vote records into one aggregate per option (per project for
/// judged polls, per question for scored polls). Records that do not match
/// the schema are skipped one by one; the rest of the tally is unaffected.
pub fn compute_tally(
    poll_type: PollType,
    questions: &[Question],
    options: &[PollOption],
    judges: &[JudgeAssignment],
    votes: &[VoteRecord],
) -> AggregateSet {
    let schema = Schema::new(questions, options);

    // Each poll type has its own counting rule
    let set = match poll_type {
        PollType::SingleChoice | PollType::MultipleChoice => plurality::tally(&schema, votes),
        PollType::Scored => score::tally(&schema, votes),
        PollType::Ranked => ranked::tally(&schema, votes),
        PollType::JudgedProject => judged::tally(&schema, judges, votes),
    };

    for skip in &set.skipped {
        debug!("Skipped vote {}: {}", skip.vote_id, skip.reason);
    }

    set
}
