use std::collections::HashMap;
use uuid::Uuid;

use super::{Accumulator, Aggregate, AggregateSet, Schema, SkipReason, SkippedVote};
use crate::models::VoteRecord;

// Scored questions have one implicit slot; the point options 1..=max_score
// are synthetic and never referenced by id.
pub(crate) fn tally(schema: &Schema<'_>, votes: &[VoteRecord]) -> AggregateSet {
    let mut scores: HashMap<Uuid, Accumulator> = HashMap::new();
    let mut skipped = Vec::new();

    // Sum the scores given to each question
    for vote in votes {
        let counted = schema.question(vote).and_then(|question| {
            let value = vote.score_value.ok_or(SkipReason::MissingValue)?;
            scores.entry(question.id).or_default().add(value);
            Ok(())
        });
        if let Err(reason) = counted {
            skipped.push(SkippedVote::new(vote, reason));
        }
    }

    // Average per question, 0 when nobody scored it
    let entries = schema
        .questions()
        .iter()
        .map(|question| {
            let acc = scores.get(&question.id).copied().unwrap_or_default();
            Aggregate {
                question_id: question.id,
                option_id: None,
                label: question.text.clone(),
                votes: acc.count,
                value: acc.average(),
                breakdown: None,
            }
        })
        .collect();

    AggregateSet { entries, skipped }
}
