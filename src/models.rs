use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeetingStatus {
    Scheduled,
    Rescheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl MeetingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MeetingStatus::Scheduled => "scheduled",
            MeetingStatus::Rescheduled => "rescheduled",
            MeetingStatus::InProgress => "in-progress",
            MeetingStatus::Completed => "completed",
            MeetingStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled meetings are never revisited by the sweep.
    pub fn is_terminal(self) -> bool {
        matches!(self, MeetingStatus::Completed | MeetingStatus::Cancelled)
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeetingStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(MeetingStatus::Scheduled),
            "rescheduled" => Ok(MeetingStatus::Rescheduled),
            "in-progress" | "in_progress" => Ok(MeetingStatus::InProgress),
            "completed" => Ok(MeetingStatus::Completed),
            "cancelled" => Ok(MeetingStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "unknown meeting status '{other}'"
            ))),
        }
    }
}

/// Who a question or meeting is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Student,
    Staff,
    Both,
}

impl Audience {
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Student => "student",
            Audience::Staff => "staff",
            Audience::Both => "both",
        }
    }

    pub fn includes(self, role: RoleCategory) -> bool {
        match self {
            Audience::Both => true,
            Audience::Student => role == RoleCategory::Student,
            Audience::Staff => role == RoleCategory::Staff,
        }
    }
}

impl FromStr for Audience {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Audience::Student),
            "staff" => Ok(Audience::Staff),
            "both" => Ok(Audience::Both),
            other => Err(CoreError::Validation(format!("unknown role '{other}'"))),
        }
    }
}

/// Reporting category of a respondent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleCategory {
    Student,
    Staff,
    Other,
}

impl RoleCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleCategory::Student => "student",
            RoleCategory::Staff => "staff",
            RoleCategory::Other => "other",
        }
    }
}

impl fmt::Display for RoleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: Uuid,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: MeetingStatus,
    pub department_id: Option<Uuid>,
    pub target_role: Audience,
    pub year: Option<i32>,
}

impl Meeting {
    /// New meetings always start out scheduled.
    pub fn new(
        title: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        target_role: Audience,
    ) -> Result<Self, CoreError> {
        if end_time <= start_time {
            return Err(CoreError::Validation(format!(
                "meeting must end after it starts ({start_time} - {end_time})"
            )));
        }

        Ok(Meeting {
            id: Uuid::new_v4(),
            title: title.into(),
            date,
            start_time,
            end_time,
            status: MeetingStatus::Scheduled,
            department_id: None,
            target_role,
            year: None,
        })
    }

    pub fn start_instant(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn end_instant(&self) -> NaiveDateTime {
        self.date.and_time(self.end_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub role: Audience,
    pub year: Option<i32>,
    pub department_id: Uuid,
    pub meeting_id: Option<Uuid>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: Uuid,
    pub rating: i32,
    pub notes: Option<String>,
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub meeting_id: Option<Uuid>,
    pub submitted_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondentProfile {
    pub id: Uuid,
    pub username: String,
    pub department_id: Option<Uuid>,
    pub year: Option<i32>,
    pub role_tags: Vec<String>,
}
