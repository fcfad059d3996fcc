use chrono::Utc;

use super::ranking::{RankedSection, Standing};
use crate::aggregator::{ResultSet, ResultState};
use crate::models::PollType;

/// Plain-text rendering of a result set, one block per section.
pub fn render(results: &ResultSet) -> String {
    let poll = &results.poll;
    let mut summary = format!(
        "**{}** ({}, {})\n",
        poll.title, poll.poll_type, poll.status
    );
    if let Some(ends_at) = poll.ends_at() {
        if poll.has_expired(Utc::now()) {
            summary.push_str(&format!("Voting closed at {}\n", ends_at.to_rfc3339()));
        } else {
            summary.push_str(&format!("Voting closes at {}\n", ends_at.to_rfc3339()));
        }
    }
    summary.push('\n');

    if results.state == ResultState::NoVotesYet {
        summary.push_str("No votes yet.\n");
    }

    for section in &results.sections {
        render_section(&mut summary, poll.poll_type, section);
        summary.push('\n');
    }

    // Footer with participation
    summary.push_str(&format!("{} votes counted.", results.total_votes));
    if !results.skipped.is_empty() {
        summary.push_str(&format!(
            " {} records did not match the poll and were left out.",
            results.skipped.len()
        ));
    }
    summary
}

fn render_section(summary: &mut String, poll_type: PollType, section: &RankedSection) {
    if let Some(question) = &section.question {
        summary.push_str(&format!("__{}__\n", question.text));
    }

    // Vote shares are relative to this section only
    let total = section.votes();
    let winner = section.winner().map(|s| s.position);
    for standing in &section.standings {
        let name = if Some(standing.position) == winner {
            format!("**{}**", standing.aggregate.label)
        } else {
            standing.aggregate.label.clone()
        };
        summary.push_str(&format!(
            "{}. {}: {}\n",
            standing.position,
            name,
            describe(poll_type, standing, total)
        ));
    }
}

fn describe(poll_type: PollType, standing: &Standing, section_votes: u64) -> String {
    let aggregate = &standing.aggregate;
    match poll_type {
        PollType::SingleChoice | PollType::MultipleChoice => {
            let share = if section_votes > 0 {
                aggregate.value * 100.0 / section_votes as f64
            } else {
                0.0
            };
            let noun = if aggregate.votes == 1 { "vote" } else { "votes" };
            format!("{} {} ({:.1}%)", aggregate.votes, noun, share)
        }
        PollType::Scored => format!("average {:.2} from {} votes", aggregate.value, aggregate.votes),
        PollType::Ranked => format!(
            "average position {:.2} from {} ballots",
            aggregate.value, aggregate.votes
        ),
        PollType::JudgedProject => match &aggregate.breakdown {
            Some(breakdown) => {
                let judges: Vec<String> = breakdown
                    .judges
                    .iter()
                    .map(|j| match j.score {
                        Some(score) => format!("{} {}", j.name, score),
                        None => format!("{} pending", j.name),
                    })
                    .collect();
                format!(
                    "total {:.2} (judges: {}; public {:.2} from {} votes)",
                    aggregate.value,
                    if judges.is_empty() { "none".to_string() } else { judges.join(", ") },
                    breakdown.public_average,
                    breakdown.public_votes
                )
            }
            None => format!("total {:.2}", aggregate.value),
        },
    }
}
