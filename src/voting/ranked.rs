use std::collections::HashMap;
use uuid::Uuid;

use super::{Accumulator, Aggregate, AggregateSet, Schema, SkipReason, SkippedVote};
use crate::models::VoteRecord;

/// Average submitted position per option. Positions count from 0 and a
/// lower average is a better placing.
pub(crate) fn tally(schema: &Schema<'_>, votes: &[VoteRecord]) -> AggregateSet {
    let mut positions: HashMap<Uuid, Accumulator> = HashMap::new();
    let mut skipped = Vec::new();

    // Collect submitted positions per option
    for vote in votes {
        let counted = schema.option(vote).and_then(|option| {
            let rank = vote.rank_order.ok_or(SkipReason::MissingValue)?;
            positions.entry(option.id).or_default().add(rank);
            Ok(())
        });
        if let Err(reason) = counted {
            skipped.push(SkippedVote::new(vote, reason));
        }
    }

    // Average position per option, 0 when nobody ranked it
    let entries = schema
        .option_slots()
        .map(|(question, option)| {
            let acc = positions.get(&option.id).copied().unwrap_or_default();
            Aggregate {
                question_id: question.id,
                option_id: Some(option.id),
                label: option.text.clone(),
                votes: acc.count,
                value: acc.average(),
                breakdown: None,
            }
        })
        .collect();

    AggregateSet { entries, skipped }
}
