use serde::Serialize;
use std::cmp::Ordering;

use super::{Aggregate, AggregateSet};
use crate::models::{PollType, Question};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Higher is better everywhere except ranked polls, where the aggregate is
/// an average position and lower wins.
pub fn direction(poll_type: PollType) -> SortDirection {
    match poll_type {
        PollType::SingleChoice
        | PollType::MultipleChoice
        | PollType::Scored
        | PollType::JudgedProject => SortDirection::Descending,
        PollType::Ranked => SortDirection::Ascending,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    /// 1-based display rank.
    pub position: usize,
    pub aggregate: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSection {
    /// `None` for the single cross-project section of a judged poll.
    pub question: Option<Question>,
    pub standings: Vec<Standing>,
}

impl RankedSection {
    /// Top standing, provided anybody voted for it.
    pub fn winner(&self) -> Option<&Standing> {
        self.standings.first().filter(|s| s.aggregate.votes > 0)
    }

    pub fn votes(&self) -> u64 {
        self.standings.iter().map(|s| s.aggregate.votes).sum()
    }
}

fn compare(a: &Aggregate, b: &Aggregate, poll_type: PollType) -> Ordering {
    match direction(poll_type) {
        SortDirection::Descending => b.value.total_cmp(&a.value),
        // An unvoted option's placeholder 0 would otherwise beat every real average.
        SortDirection::Ascending => (b.votes > 0)
            .cmp(&(a.votes > 0))
            .then_with(|| a.value.total_cmp(&b.value)),
    }
}

/// Orders aggregates for display and numbers them from 1.
///
/// Higher values come first, except in ranked polls where the lowest average
/// position comes first. In ranked polls an option nobody ranked has no real
/// average (its value is a placeholder 0), so every voted option is placed
/// ahead of every unvoted one before values are compared. The sort is stable,
/// so ties keep schema order.
pub fn rank(aggregates: Vec<Aggregate>, poll_type: PollType) -> Vec<Standing> {
    // Sort by value in the poll type's direction
    let mut ordered = aggregates;
    ordered.sort_by(|a, b| compare(a, b, poll_type));

    // Positions follow the sorted order, ties included

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, aggregate)| Standing {
            position: i + 1,
            aggregate,
        })
        .collect()
}

/// One ranked section per question for option-based polls. Scored and
/// judged polls carry a single aggregate per question, so their questions
/// are ranked against each other in one section.
pub fn rank_sections(
    poll_type: PollType,
    questions: &[Question],
    set: &AggregateSet,
) -> Vec<RankedSection> {
    match poll_type {
        PollType::Scored | PollType::JudgedProject => vec![RankedSection {
            question: None,
            standings: rank(set.entries.clone(), poll_type),
        }],
        PollType::SingleChoice | PollType::MultipleChoice | PollType::Ranked => questions
            .iter()
            .map(|question| RankedSection {
                question: Some(question.clone()),
                // Only this question's options compete with each other
                standings: rank(set.for_question(question.id).cloned().collect(), poll_type),
            })
            .collect(),
    }
}
