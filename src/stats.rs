//! Feedback rollups.
//!
//! Data is fetched flat (entries plus lookup tables) and folded in a single
//! pass. Averages stay unrounded here; `report` rounds them for display.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;
use uuid::Uuid;

use crate::feedback::{is_valid_rating, MAX_RATING, MIN_RATING};
use crate::models::{Department, FeedbackEntry, Question, RespondentProfile, RoleCategory};
use crate::roles;

pub const UNKNOWN_DEPARTMENT: &str = "Unknown department";

const HISTOGRAM_SLOTS: usize = (MAX_RATING - MIN_RATING + 1) as usize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupBucket {
    pub count: u64,
    pub sum_rating: u64,
    /// Slot `i` counts ratings of `i + 1`.
    pub histogram: [u64; HISTOGRAM_SLOTS],
}

impl RollupBucket {
    fn record(&mut self, rating: i32) {
        self.count += 1;
        self.sum_rating += rating as u64;
        self.histogram[(rating - MIN_RATING) as usize] += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_rating as f64 / self.count as f64
        }
    }

    pub fn ratings_of(&self, rating: i32) -> u64 {
        if is_valid_rating(rating) {
            self.histogram[(rating - MIN_RATING) as usize]
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepartmentRollup {
    pub department_name: String,
    pub bucket: RollupBucket,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRollup {
    pub question_text: String,
    pub department_name: String,
    pub bucket: RollupBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingQuestion,
    RatingOutOfRange(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedEntry {
    pub entry_id: Uuid,
    pub question_id: Uuid,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rollup {
    pub overall: RollupBucket,
    pub by_department: BTreeMap<Uuid, DepartmentRollup>,
    /// `Student` and `Staff` are always present, `Other` only when non-empty.
    pub by_role: BTreeMap<RoleCategory, RollupBucket>,
    pub by_question: BTreeMap<Uuid, QuestionRollup>,
    pub skipped: Vec<SkippedEntry>,
}

impl Rollup {
    fn empty() -> Self {
        let mut by_role = BTreeMap::new();
        by_role.insert(RoleCategory::Student, RollupBucket::default());
        by_role.insert(RoleCategory::Staff, RollupBucket::default());

        Rollup {
            overall: RollupBucket::default(),
            by_department: BTreeMap::new(),
            by_role,
            by_question: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }
}

/// Lookup tables the aggregation resolves entries against.
#[derive(Debug, Clone, Default)]
pub struct AggregationContext {
    questions: HashMap<Uuid, Question>,
    departments: HashMap<Uuid, String>,
    roles: HashMap<Uuid, RoleCategory>,
}

impl AggregationContext {
    pub fn new(
        questions: impl IntoIterator<Item = Question>,
        departments: impl IntoIterator<Item = Department>,
        roles: HashMap<Uuid, RoleCategory>,
    ) -> Self {
        AggregationContext {
            questions: questions.into_iter().map(|q| (q.id, q)).collect(),
            departments: departments.into_iter().map(|d| (d.id, d.name)).collect(),
            roles,
        }
    }

    /// Classifies every respondent once, so all dimensions of a report see
    /// the same role for the same person.
    pub fn classify_respondents(
        respondents: &[RespondentProfile],
        searching_for: Option<RoleCategory>,
    ) -> HashMap<Uuid, RoleCategory> {
        respondents
            .iter()
            .map(|r| {
                let role = match searching_for {
                    Some(_) => roles::classify_for(r, searching_for),
                    None => roles::classify(r),
                };
                (r.id, role)
            })
            .collect()
    }

    fn department_name(&self, id: Uuid) -> &str {
        self.departments
            .get(&id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_DEPARTMENT)
    }

    fn role_of(&self, user_id: Uuid) -> RoleCategory {
        self.roles.get(&user_id).copied().unwrap_or(RoleCategory::Other)
    }
}

/// Keeps only the entries submitted against `meeting_id`; `None` keeps all.
pub fn scope_to_meeting(entries: &[FeedbackEntry], meeting_id: Option<Uuid>) -> Vec<FeedbackEntry> {
    match meeting_id {
        Some(id) => entries
            .iter()
            .filter(|e| e.meeting_id == Some(id))
            .cloned()
            .collect(),
        None => entries.to_vec(),
    }
}

pub fn aggregate(entries: &[FeedbackEntry], ctx: &AggregationContext) -> Rollup {
    let mut rollup = Rollup::empty();

    for entry in entries {
        let Some(question) = ctx.questions.get(&entry.question_id) else {
            warn!(
                entry = %entry.id,
                question = %entry.question_id,
                "skipping feedback for missing question"
            );
            rollup.skipped.push(SkippedEntry {
                entry_id: entry.id,
                question_id: entry.question_id,
                reason: SkipReason::MissingQuestion,
            });
            continue;
        };

        if !is_valid_rating(entry.rating) {
            warn!(entry = %entry.id, rating = entry.rating, "skipping feedback with invalid rating");
            rollup.skipped.push(SkippedEntry {
                entry_id: entry.id,
                question_id: entry.question_id,
                reason: SkipReason::RatingOutOfRange(entry.rating),
            });
            continue;
        }

        let department_name = ctx.department_name(question.department_id);

        rollup.overall.record(entry.rating);

        rollup
            .by_department
            .entry(question.department_id)
            .or_insert_with(|| DepartmentRollup {
                department_name: department_name.to_string(),
                bucket: RollupBucket::default(),
            })
            .bucket
            .record(entry.rating);

        rollup
            .by_role
            .entry(ctx.role_of(entry.user_id))
            .or_default()
            .record(entry.rating);

        rollup
            .by_question
            .entry(question.id)
            .or_insert_with(|| QuestionRollup {
                question_text: question.text.clone(),
                department_name: department_name.to_string(),
                bucket: RollupBucket::default(),
            })
            .bucket
            .record(entry.rating);
    }

    rollup
}

/// Average movement between two rollups, e.g. two sittings of a meeting.
#[derive(Debug, Clone, PartialEq)]
pub struct Trend {
    pub overall_delta: Option<f64>,
    pub by_question: BTreeMap<Uuid, f64>,
}

pub fn compare(baseline: &Rollup, current: &Rollup) -> Trend {
    let overall_delta = (baseline.overall.count > 0 && current.overall.count > 0)
        .then(|| current.overall.average() - baseline.overall.average());

    let by_question = current
        .by_question
        .iter()
        .filter_map(|(id, now)| {
            baseline
                .by_question
                .get(id)
                .map(|before| (*id, now.bucket.average() - before.bucket.average()))
        })
        .collect();

    Trend {
        overall_delta,
        by_question,
    }
}
