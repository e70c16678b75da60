//! Feedback submission checks, run before anything reaches the store or the
//! aggregator.

use chrono::NaiveDateTime;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::CoreError;
use crate::gate;
use crate::models::{FeedbackEntry, Meeting, Question, RespondentProfile, RoleCategory};

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;
pub const MAX_NOTES_CHARS: usize = 2000;

pub fn is_valid_rating(rating: i32) -> bool {
    (MIN_RATING..=MAX_RATING).contains(&rating)
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub user_id: Uuid,
    pub question_id: Uuid,
    pub rating: i32,
    pub notes: Option<String>,
}

impl Submission {
    /// Checks the rating range and normalises notes (blank notes become `None`).
    pub fn validate(mut self) -> Result<Self, CoreError> {
        if !is_valid_rating(self.rating) {
            return Err(CoreError::Validation(format!(
                "rating {} is outside {MIN_RATING}..={MAX_RATING}",
                self.rating
            )));
        }

        self.notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        if let Some(notes) = &self.notes {
            if notes.chars().count() > MAX_NOTES_CHARS {
                return Err(CoreError::Validation(format!(
                    "notes exceed {MAX_NOTES_CHARS} characters"
                )));
            }
        }

        Ok(self)
    }
}

/// The respondent side of a submission.
#[derive(Debug, Clone, Copy)]
pub struct Respondent {
    pub role: RoleCategory,
    pub year: Option<i32>,
}

/// Turns a submission into the entry to upsert, if the respondent may answer
/// this question at `now`. Questions tied to a meeting go through the gate;
/// `meeting` must then be the question's meeting.
pub fn admit(
    submission: Submission,
    question: &Question,
    meeting: Option<&Meeting>,
    respondent: Respondent,
    now: NaiveDateTime,
) -> Result<FeedbackEntry, CoreError> {
    let submission = submission.validate()?;

    if submission.question_id != question.id {
        return Err(CoreError::not_found("question", submission.question_id));
    }
    if !question.active {
        return Err(CoreError::Validation("question is no longer active".to_string()));
    }

    let audience = gate::for_audience(vec![question.clone()], respondent.role, respondent.year);
    if audience.is_empty() {
        return Err(CoreError::Validation(format!(
            "question is not addressed to {} respondents",
            respondent.role
        )));
    }

    if let Some(meeting_id) = question.meeting_id {
        let meeting = meeting
            .filter(|m| m.id == meeting_id)
            .ok_or_else(|| CoreError::not_found("meeting", meeting_id))?;

        let visibility = gate::questions_visible(meeting, &audience, now, false);
        if !visibility.available {
            return Err(CoreError::Validation(match visibility.minutes_until_open {
                Some(minutes) => format!("feedback opens in {minutes} minutes"),
                None => "feedback for this meeting is closed".to_string(),
            }));
        }
    }

    Ok(FeedbackEntry {
        id: Uuid::new_v4(),
        rating: submission.rating,
        notes: submission.notes,
        user_id: submission.user_id,
        question_id: question.id,
        meeting_id: question.meeting_id,
        submitted_at: now,
    })
}

/// Persistence for admitted feedback. Holds at most one entry per
/// (user, question): a repeat for the same pair replaces rating, notes,
/// meeting and timestamp on the entry already stored.
pub trait FeedbackStore {
    /// Returns the id of the stored entry, which on a repeat is the id of the
    /// first submission.
    async fn upsert(&self, entry: &FeedbackEntry) -> anyhow::Result<Uuid>;
}

/// Admits a live submission and stores it.
pub async fn submit<S: FeedbackStore>(
    store: &S,
    submission: Submission,
    question: &Question,
    meeting: Option<&Meeting>,
    respondent: Respondent,
    now: NaiveDateTime,
) -> anyhow::Result<(Uuid, FeedbackEntry)> {
    let entry = admit(submission, question, meeting, respondent, now)?;
    let stored_id = store.upsert(&entry).await?;
    Ok((stored_id, entry))
}

/// One row of a historical feedback CSV.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    pub username: String,
    pub question_id: Uuid,
    pub rating: i32,
    pub notes: Option<String>,
    pub submitted_at: Option<NaiveDateTime>,
}

impl ImportRow {
    /// Builds the entry for an imported row. Imports skip the time gate and
    /// the audience check but are validated like live submissions. Rows
    /// without a timestamp are stamped with `imported_at`.
    pub fn into_entry(
        self,
        respondent: Option<&RespondentProfile>,
        question: Option<&Question>,
        imported_at: NaiveDateTime,
    ) -> Result<FeedbackEntry, CoreError> {
        let respondent = respondent
            .filter(|r| r.username == self.username)
            .ok_or_else(|| CoreError::not_found("respondent", &self.username))?;
        let question = question
            .filter(|q| q.id == self.question_id)
            .ok_or_else(|| CoreError::not_found("question", self.question_id))?;

        let submission = Submission {
            user_id: respondent.id,
            question_id: question.id,
            rating: self.rating,
            notes: self.notes,
        }
        .validate()?;

        Ok(FeedbackEntry {
            id: Uuid::new_v4(),
            rating: submission.rating,
            notes: submission.notes,
            user_id: submission.user_id,
            question_id: question.id,
            meeting_id: question.meeting_id,
            submitted_at: self.submitted_at.unwrap_or(imported_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Audience;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        entries: Mutex<Vec<FeedbackEntry>>,
    }

    impl FeedbackStore for MemoryStore {
        async fn upsert(&self, entry: &FeedbackEntry) -> anyhow::Result<Uuid> {
            let mut entries = self.entries.lock().unwrap();
            let existing = entries
                .iter_mut()
                .find(|e| e.user_id == entry.user_id && e.question_id == entry.question_id);

            match existing {
                Some(stored) => {
                    stored.rating = entry.rating;
                    stored.notes = entry.notes.clone();
                    stored.meeting_id = entry.meeting_id;
                    stored.submitted_at = entry.submitted_at;
                    Ok(stored.id)
                }
                None => {
                    entries.push(entry.clone());
                    Ok(entry.id)
                }
            }
        }
    }

    fn meeting() -> Meeting {
        Meeting::new(
            "Lab debrief",
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            Audience::Student,
        )
        .unwrap()
    }

    fn question(meeting: Option<&Meeting>, role: Audience) -> Question {
        Question {
            id: Uuid::new_v4(),
            text: "How useful was the session?".into(),
            role,
            year: None,
            department_id: Uuid::new_v4(),
            meeting_id: meeting.map(|m| m.id),
            active: true,
        }
    }

    fn submission(question: &Question, rating: i32) -> Submission {
        Submission {
            user_id: Uuid::new_v4(),
            question_id: question.id,
            rating,
            notes: Some("  ".into()),
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    const STUDENT: Respondent = Respondent {
        role: RoleCategory::Student,
        year: Some(1),
    };

    #[test]
    fn ratings_outside_range_are_rejected() {
        let q = question(None, Audience::Both);
        for rating in [0, 6, -3, 100] {
            let err = admit(submission(&q, rating), &q, None, STUDENT, at(9, 0)).unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }
        for rating in MIN_RATING..=MAX_RATING {
            let entry = admit(submission(&q, rating), &q, None, STUDENT, at(9, 0)).unwrap();
            assert_eq!(entry.rating, rating);
            assert_eq!(entry.notes, None);
        }
    }

    #[test]
    fn long_notes_are_rejected() {
        let q = question(None, Audience::Both);
        let mut s = submission(&q, 4);
        s.notes = Some("x".repeat(MAX_NOTES_CHARS + 1));
        assert!(s.validate().is_err());
    }

    #[test]
    fn meeting_questions_respect_the_gate() {
        let m = meeting();
        let q = question(Some(&m), Audience::Both);

        let early = admit(submission(&q, 4), &q, Some(&m), STUDENT, at(9, 0)).unwrap_err();
        assert_eq!(early, CoreError::Validation("feedback opens in 55 minutes".into()));

        let entry = admit(submission(&q, 4), &q, Some(&m), STUDENT, at(10, 5)).unwrap();
        assert_eq!(entry.meeting_id, Some(m.id));
        assert_eq!(entry.submitted_at, at(10, 5));

        let late = admit(submission(&q, 4), &q, Some(&m), STUDENT, at(12, 0)).unwrap_err();
        assert_eq!(late, CoreError::Validation("feedback for this meeting is closed".into()));

        let missing = admit(submission(&q, 4), &q, None, STUDENT, at(10, 5)).unwrap_err();
        assert_eq!(missing, CoreError::not_found("meeting", m.id));
    }

    #[test]
    fn audience_and_active_flag_are_enforced() {
        let staff_q = question(None, Audience::Staff);
        assert!(admit(submission(&staff_q, 3), &staff_q, None, STUDENT, at(9, 0)).is_err());

        let mut retired = question(None, Audience::Both);
        retired.active = false;
        assert!(admit(submission(&retired, 3), &retired, None, STUDENT, at(9, 0)).is_err());
    }

    #[tokio::test]
    async fn repeat_submission_updates_the_stored_entry() {
        let store = MemoryStore::default();
        let m = meeting();
        let q = question(Some(&m), Audience::Both);
        let first = submission(&q, 2);
        let user_id = first.user_id;

        let (first_id, _) = submit(&store, first, &q, Some(&m), STUDENT, at(10, 5))
            .await
            .unwrap();

        let again = Submission {
            user_id,
            question_id: q.id,
            rating: 5,
            notes: Some("much better on reflection".into()),
        };
        let (second_id, _) = submit(&store, again, &q, Some(&m), STUDENT, at(10, 40))
            .await
            .unwrap();

        let entries = store.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(second_id, first_id);
        assert_eq!(entries[0].id, first_id);
        assert_eq!(entries[0].rating, 5);
        assert_eq!(entries[0].notes.as_deref(), Some("much better on reflection"));
        assert_eq!(entries[0].submitted_at, at(10, 40));
    }

    #[tokio::test]
    async fn rejected_submissions_are_not_stored() {
        let store = MemoryStore::default();
        let q = question(None, Audience::Both);

        assert!(submit(&store, submission(&q, 9), &q, None, STUDENT, at(9, 0)).await.is_err());
        assert!(store.entries.lock().unwrap().is_empty());
    }

    fn import_row(username: &str, question: &Question, rating: i32) -> ImportRow {
        ImportRow {
            username: username.into(),
            question_id: question.id,
            rating,
            notes: None,
            submitted_at: None,
        }
    }

    fn respondent(username: &str) -> RespondentProfile {
        RespondentProfile {
            id: Uuid::new_v4(),
            username: username.into(),
            department_id: None,
            year: None,
            role_tags: Vec::new(),
        }
    }

    #[test]
    fn import_rows_skip_the_gate_and_take_the_import_time() {
        let m = meeting();
        let q = question(Some(&m), Audience::Staff);
        let kim = respondent("kim");

        let entry = import_row("kim", &q, 3)
            .into_entry(Some(&kim), Some(&q), at(8, 0))
            .unwrap();
        assert_eq!(entry.user_id, kim.id);
        assert_eq!(entry.meeting_id, Some(m.id));
        assert_eq!(entry.submitted_at, at(8, 0));

        let mut dated = import_row("kim", &q, 3);
        dated.submitted_at = Some(at(10, 30));
        let entry = dated.into_entry(Some(&kim), Some(&q), at(8, 0)).unwrap();
        assert_eq!(entry.submitted_at, at(10, 30));
    }

    #[test]
    fn bad_import_rows_report_why() {
        let q = question(None, Audience::Both);
        let kim = respondent("kim");

        let unknown_user = import_row("nobody", &q, 3)
            .into_entry(None, Some(&q), at(8, 0))
            .unwrap_err();
        assert_eq!(unknown_user, CoreError::not_found("respondent", "nobody"));

        let unknown_question = import_row("kim", &q, 3)
            .into_entry(Some(&kim), None, at(8, 0))
            .unwrap_err();
        assert_eq!(unknown_question, CoreError::not_found("question", q.id));

        let bad_rating = import_row("kim", &q, 7)
            .into_entry(Some(&kim), Some(&q), at(8, 0))
            .unwrap_err();
        assert!(matches!(bad_rating, CoreError::Validation(_)));
    }
}
