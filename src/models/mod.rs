use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_MAX_SCORE: i32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub poll_type: PollType,
    pub status: PollStatus,
    pub max_score: i32,
    pub activated_at: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
}

impl Poll {
    /// When the poll closes, if it was activated with a duration.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        match (self.activated_at, self.duration_minutes) {
            (Some(start), Some(mins)) => Some(start + Duration::minutes(i64::from(mins))),
            _ => None,
        }
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends_at().is_some_and(|end| end <= now)
    }
}

/// Ballot semantics of a poll. Fixed when the poll is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PollType {
    SingleChoice,
    MultipleChoice,
    Scored,
    Ranked,
    JudgedProject,
}

impl PollType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollType::SingleChoice => "single_choice",
            PollType::MultipleChoice => "multiple_choice",
            PollType::Scored => "scored",
            PollType::Ranked => "ranked",
            PollType::JudgedProject => "judged_project",
        }
    }
}

impl fmt::Display for PollType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_choice" => Ok(PollType::SingleChoice),
            "multiple_choice" => Ok(PollType::MultipleChoice),
            "scored" => Ok(PollType::Scored),
            "ranked" => Ok(PollType::Ranked),
            "judged_project" => Ok(PollType::JudgedProject),
            other => Err(format!("unknown poll type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Pending,
    Active,
    Finished,
    Inactive,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Pending => "pending",
            PollStatus::Active => "active",
            PollStatus::Finished => "finished",
            PollStatus::Inactive => "inactive",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollStatus::Finished)
    }

    /// pending -> active -> finished, with inactive reachable from any
    /// non-finished state. An inactive poll can be resumed.
    pub fn can_transition_to(&self, next: PollStatus) -> bool {
        use PollStatus::*;
        matches!(
            (*self, next),
            (Pending, Active)
                | (Active, Finished)
                | (Pending, Inactive)
                | (Active, Inactive)
                | (Inactive, Active)
        )
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PollStatus::Pending),
            "active" => Ok(PollStatus::Active),
            "finished" => Ok(PollStatus::Finished),
            "inactive" => Ok(PollStatus::Inactive),
            other => Err(format!("unknown poll status: {}", other)),
        }
    }
}

/// A question of a poll. For judged-project polls each question is a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub text: String,
    pub image_url: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollOption {
    pub id: Uuid,
    pub question_id: Uuid,
    pub text: String,
    pub image_url: Option<String>,
    // Designer-assigned weight for ranked polls; tallies only read ballots.
    pub base_score: Option<i32>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judge {
    pub id: Uuid,
    pub name: String,
    pub access_code: String,
}

/// A judge on the panel of one poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeAssignment {
    pub judge: Judge,
    pub poll_access_code: String,
}

/// One ballot-cast row. Which of `option_id`, `score_value` and `rank_order`
/// is filled depends on the poll type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteRecord {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub question_id: Uuid,
    pub option_id: Option<Uuid>,
    pub score_value: Option<i32>,
    pub rank_order: Option<i32>,
    pub judge_id: Option<Uuid>,
    pub device_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
impl VoteRecord {
    fn blank(poll_id: Uuid, question_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            poll_id,
            question_id,
            option_id: None,
            score_value: None,
            rank_order: None,
            judge_id: None,
            device_fingerprint: None,
            created_at: Utc::now(),
        }
    }

    pub fn choice(poll_id: Uuid, question_id: Uuid, option_id: Uuid) -> Self {
        Self {
            option_id: Some(option_id),
            ..Self::blank(poll_id, question_id)
        }
    }

    pub fn score(poll_id: Uuid, question_id: Uuid, value: i32) -> Self {
        Self {
            score_value: Some(value),
            ..Self::blank(poll_id, question_id)
        }
    }

    pub fn rank(poll_id: Uuid, question_id: Uuid, option_id: Uuid, rank_order: i32) -> Self {
        Self {
            option_id: Some(option_id),
            rank_order: Some(rank_order),
            ..Self::blank(poll_id, question_id)
        }
    }

    pub fn judged(poll_id: Uuid, question_id: Uuid, judge_id: Uuid, value: i32) -> Self {
        Self {
            judge_id: Some(judge_id),
            score_value: Some(value),
            ..Self::blank(poll_id, question_id)
        }
    }
}
