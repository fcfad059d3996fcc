use std::collections::HashMap;
use uuid::Uuid;

use super::{Aggregate, AggregateSet, Schema, SkippedVote};
use crate::models::VoteRecord;

/// Vote counts for single- and multiple-choice questions. A multiple-choice
/// ballot arrives as one record per selected option, so both count the same way.
pub(crate) fn tally(schema: &Schema<'_>, votes: &[VoteRecord]) -> AggregateSet {
    let mut counts: HashMap<Uuid, u64> = HashMap::new();
    let mut skipped = Vec::new();

    // Count each record against the option it selects
    for vote in votes {
        match schema.option(vote) {
            Ok(option) => *counts.entry(option.id).or_insert(0) += 1,
            Err(reason) => skipped.push(SkippedVote::new(vote, reason)),
        }
    }

    // Report every option, including those with 0 votes
    let entries = schema
        .option_slots()
        .map(|(question, option)| {
            let count = counts.get(&option.id).copied().unwrap_or(0);
            Aggregate {
                question_id: question.id,
                option_id: Some(option.id),
                label: option.text.clone(),
                votes: count,
                value: count as f64,
                breakdown: None,
            }
        })
        .collect();

    AggregateSet { entries, skipped }
}
