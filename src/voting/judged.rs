use std::collections::HashMap;
use uuid::Uuid;

use super::{
    round2, Accumulator, Aggregate, AggregateSet, JudgeBreakdown, JudgeScore, Schema, SkipReason,
    SkippedVote,
};
use crate::models::{JudgeAssignment, VoteRecord};

/// Composite score per project: every panel judge's score (0 while pending)
/// plus the average of the public votes.
pub(crate) fn tally(
    schema: &Schema<'_>,
    judges: &[JudgeAssignment],
    votes: &[VoteRecord],
) -> AggregateSet {
    // (project, judge) -> latest record from that judge
    let mut judge_votes: HashMap<(Uuid, Uuid), &VoteRecord> = HashMap::new();
    let mut public: HashMap<Uuid, Accumulator> = HashMap::new();
    let mut skipped = Vec::new();

    // Split records into panel scores and public votes
    for vote in votes {
        let counted = schema.question(vote).and_then(|project| {
            let value = vote.score_value.ok_or(SkipReason::MissingValue)?;
            match vote.judge_id {
                Some(judge_id) => {
                    if !judges.iter().any(|a| a.judge.id == judge_id) {
                        return Err(SkipReason::UnassignedJudge);
                    }
                    // Only the judge's latest score counts
                    let slot = judge_votes.entry((project.id, judge_id)).or_insert(vote);
                    if vote.created_at >= slot.created_at {
                        *slot = vote;
                    }
                }
                None => public.entry(project.id).or_default().add(value),
            }
            Ok(())
        });
        if let Err(reason) = counted {
            skipped.push(SkippedVote::new(vote, reason));
        }
    }

    let entries = schema
        .questions()
        .iter()
        .map(|project| {
            // One entry per panel judge, pending ones included
            let scores: Vec<JudgeScore> = judges
                .iter()
                .map(|assignment| JudgeScore {
                    judge_id: assignment.judge.id,
                    name: assignment.judge.name.clone(),
                    score: judge_votes
                        .get(&(project.id, assignment.judge.id))
                        .and_then(|v| v.score_value)
                        .map(f64::from),
                })
                .collect();
            let crowd = public.get(&project.id).copied().unwrap_or_default();
            let public_average = crowd.average();

            // Pending judges add nothing to the total
            let judged = scores.iter().filter(|s| s.score.is_some()).count() as u64;
            let total: f64 = scores.iter().map(|s| s.score.unwrap_or(0.0)).sum::<f64>() + public_average;

            Aggregate {
                question_id: project.id,
                option_id: None,
                label: project.text.clone(),
                votes: judged + crowd.count,
                value: round2(total),
                breakdown: Some(JudgeBreakdown {
                    judges: scores,
                    public_average,
                    public_votes: crowd.count,
                }),
            }
        })
        .collect();

    AggregateSet { entries, skipped }
}
