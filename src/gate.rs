//! Time gate on a meeting's questions.
//!
//! Respondents see questions only while a meeting's feedback window is open;
//! managers skip the gate entirely. The countdown reported before opening is
//! `floor((start - now) / 1 min) - 5`. The window itself opens once fewer than
//! four whole minutes remain before the start, so the countdown reads `0` and
//! then `-1` during the last gated minutes before questions appear.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{Meeting, MeetingStatus, Question, RoleCategory};

pub const OPEN_LEAD_MINUTES: i64 = 5;

/// Whole minutes before start below which the window is open.
const OPENS_BELOW_MINUTES: i64 = OPEN_LEAD_MINUTES - 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Visibility {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_until_open: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<Question>>,
}

impl Visibility {
    fn pending(minutes_until_open: i64) -> Self {
        Visibility {
            available: false,
            minutes_until_open: Some(minutes_until_open),
            questions: None,
        }
    }

    fn closed() -> Self {
        Visibility {
            available: false,
            minutes_until_open: None,
            questions: None,
        }
    }

    fn open(questions: Vec<Question>) -> Self {
        Visibility {
            available: true,
            minutes_until_open: None,
            questions: Some(questions),
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.available && self.minutes_until_open.is_none()
    }
}

/// Whole minutes from `now` until the meeting starts, rounded toward negative
/// infinity.
pub fn whole_minutes_until_start(meeting: &Meeting, now: NaiveDateTime) -> i64 {
    (meeting.start_instant() - now)
        .num_milliseconds()
        .div_euclid(60_000)
}

pub fn questions_visible(
    meeting: &Meeting,
    questions: &[Question],
    now: NaiveDateTime,
    requester_is_manager: bool,
) -> Visibility {
    if requester_is_manager {
        return Visibility::open(active_questions(meeting, questions));
    }

    if matches!(meeting.status, MeetingStatus::Cancelled | MeetingStatus::Completed)
        || now > meeting.end_instant()
    {
        return Visibility::closed();
    }

    let whole_minutes = whole_minutes_until_start(meeting, now);
    if whole_minutes >= OPENS_BELOW_MINUTES {
        return Visibility::pending(whole_minutes - OPEN_LEAD_MINUTES);
    }

    Visibility::open(active_questions(meeting, questions))
}

fn active_questions(meeting: &Meeting, questions: &[Question]) -> Vec<Question> {
    questions
        .iter()
        .filter(|q| q.active && q.meeting_id == Some(meeting.id))
        .cloned()
        .collect()
}

/// Narrows questions to the ones aimed at a classified respondent.
pub fn for_audience(questions: Vec<Question>, role: RoleCategory, year: Option<i32>) -> Vec<Question> {
    questions
        .into_iter()
        .filter(|q| q.role.includes(role))
        .filter(|q| q.year.is_none() || q.year == year)
        .collect()
}
