use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::feedback::{FeedbackStore, ImportRow};
use crate::models::{
    Audience, Department, FeedbackEntry, Meeting, MeetingStatus, Question, RespondentProfile,
};
use crate::scheduler::{MeetingStore, StatusChange};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

const MEETING_COLUMNS: &str = "id, title, meeting_date, start_time, end_time, status, \
     department_id, target_role, year";

fn meeting_from_row(row: &PgRow) -> anyhow::Result<Meeting> {
    Ok(Meeting {
        id: row.get("id"),
        title: row.get("title"),
        date: row.get("meeting_date"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status: row.get::<String, _>("status").parse::<MeetingStatus>()?,
        department_id: row.get("department_id"),
        target_role: row.get::<String, _>("target_role").parse::<Audience>()?,
        year: row.get("year"),
    })
}

fn question_from_row(row: &PgRow) -> anyhow::Result<Question> {
    Ok(Question {
        id: row.get("id"),
        text: row.get("text"),
        role: row.get::<String, _>("role").parse::<Audience>()?,
        year: row.get("year"),
        department_id: row.get("department_id"),
        meeting_id: row.get("meeting_id"),
        active: row.get("active"),
    })
}

fn respondent_from_row(row: &PgRow) -> RespondentProfile {
    RespondentProfile {
        id: row.get("id"),
        username: row.get("username"),
        department_id: row.get("department_id"),
        year: row.get("year"),
        role_tags: row.get("role_tags"),
    }
}

pub async fn fetch_meetings(pool: &PgPool, open_only: bool) -> anyhow::Result<Vec<Meeting>> {
    let mut query = format!("SELECT {MEETING_COLUMNS} FROM meeting_feedback.meetings");
    if open_only {
        query.push_str(" WHERE status NOT IN ('completed', 'cancelled')");
    }
    query.push_str(" ORDER BY meeting_date, start_time");

    let rows = sqlx::query(&query).fetch_all(pool).await?;
    rows.iter().map(meeting_from_row).collect()
}

pub async fn fetch_meeting(pool: &PgPool, id: Uuid) -> anyhow::Result<Meeting> {
    let query = format!("SELECT {MEETING_COLUMNS} FROM meeting_feedback.meetings WHERE id = $1");
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| CoreError::not_found("meeting", id))?;
    meeting_from_row(&row)
}

pub async fn insert_meeting(pool: &PgPool, meeting: &Meeting) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO meeting_feedback.meetings
        (id, title, meeting_date, start_time, end_time, status, department_id, target_role, year)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(meeting.id)
    .bind(&meeting.title)
    .bind(meeting.date)
    .bind(meeting.start_time)
    .bind(meeting.end_time)
    .bind(meeting.status.as_str())
    .bind(meeting.department_id)
    .bind(meeting.target_role.as_str())
    .bind(meeting.year)
    .execute(pool)
    .await?;
    Ok(())
}

/// Writes an edited meeting back. The edit was computed from `previous`; if
/// the stored status moved on in the meantime the write is refused.
pub async fn update_meeting(
    pool: &PgPool,
    previous: &Meeting,
    meeting: &Meeting,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE meeting_feedback.meetings
        SET title = $2, meeting_date = $3, start_time = $4, end_time = $5, status = $6
        WHERE id = $1 AND status = $7
        "#,
    )
    .bind(meeting.id)
    .bind(&meeting.title)
    .bind(meeting.date)
    .bind(meeting.start_time)
    .bind(meeting.end_time)
    .bind(meeting.status.as_str())
    .bind(previous.status.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_status(pool: &PgPool, change: &StatusChange) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE meeting_feedback.meetings SET status = $2 WHERE id = $1 AND status = $3",
    )
    .bind(change.meeting_id)
    .bind(change.to.as_str())
    .bind(change.from.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_questions(pool: &PgPool, meeting_id: Option<Uuid>) -> anyhow::Result<Vec<Question>> {
    let mut query = String::from(
        "SELECT id, text, role, year, department_id, meeting_id, active \
         FROM meeting_feedback.questions",
    );
    if meeting_id.is_some() {
        query.push_str(" WHERE meeting_id = $1");
    }

    let mut rows = sqlx::query(&query);
    if let Some(id) = meeting_id {
        rows = rows.bind(id);
    }

    let records = rows.fetch_all(pool).await?;
    records.iter().map(question_from_row).collect()
}

pub async fn find_question(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Question>> {
    let row = sqlx::query(
        "SELECT id, text, role, year, department_id, meeting_id, active \
         FROM meeting_feedback.questions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(question_from_row).transpose()
}

pub async fn fetch_question(pool: &PgPool, id: Uuid) -> anyhow::Result<Question> {
    Ok(find_question(pool, id)
        .await?
        .ok_or_else(|| CoreError::not_found("question", id))?)
}

pub async fn fetch_departments(pool: &PgPool) -> anyhow::Result<Vec<Department>> {
    let rows = sqlx::query("SELECT id, name FROM meeting_feedback.departments")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| Department {
            id: row.get("id"),
            name: row.get("name"),
        })
        .collect())
}

const RESPONDENT_QUERY: &str = "SELECT r.id, r.username, r.department_id, r.year, \
     COALESCE(array_agg(rr.role_name) FILTER (WHERE rr.role_name IS NOT NULL), '{}') AS role_tags \
     FROM meeting_feedback.respondents r \
     LEFT JOIN meeting_feedback.respondent_roles rr ON rr.respondent_id = r.id";

pub async fn fetch_respondents(pool: &PgPool) -> anyhow::Result<Vec<RespondentProfile>> {
    let query = format!("{RESPONDENT_QUERY} GROUP BY r.id");
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(respondent_from_row).collect())
}

pub async fn find_respondent_by_username(
    pool: &PgPool,
    username: &str,
) -> anyhow::Result<Option<RespondentProfile>> {
    let query = format!("{RESPONDENT_QUERY} WHERE r.username = $1 GROUP BY r.id");
    let row = sqlx::query(&query)
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(respondent_from_row))
}

pub async fn fetch_respondent_by_username(
    pool: &PgPool,
    username: &str,
) -> anyhow::Result<RespondentProfile> {
    Ok(find_respondent_by_username(pool, username)
        .await?
        .ok_or_else(|| CoreError::not_found("respondent", username))?)
}

pub async fn fetch_feedback(pool: &PgPool) -> anyhow::Result<Vec<FeedbackEntry>> {
    let rows = sqlx::query(
        "SELECT id, rating, notes, user_id, question_id, meeting_id, submitted_at \
         FROM meeting_feedback.feedback",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| FeedbackEntry {
            id: row.get("id"),
            rating: row.get("rating"),
            notes: row.get("notes"),
            user_id: row.get("user_id"),
            question_id: row.get("question_id"),
            meeting_id: row.get("meeting_id"),
            submitted_at: row.get("submitted_at"),
        })
        .collect())
}

/// Atomic find-or-update on (user_id, question_id). A repeat submission keeps
/// the existing row id and replaces rating, notes and timestamp.
const UPSERT_FEEDBACK: &str = r#"
    INSERT INTO meeting_feedback.feedback
    (id, rating, notes, user_id, question_id, meeting_id, submitted_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (user_id, question_id) DO UPDATE
    SET rating = EXCLUDED.rating,
        notes = EXCLUDED.notes,
        meeting_id = EXCLUDED.meeting_id,
        submitted_at = EXCLUDED.submitted_at
    RETURNING id
"#;

/// Feedback rows in Postgres.
pub struct PgFeedbackStore<'a>(pub &'a PgPool);

impl FeedbackStore for PgFeedbackStore<'_> {
    async fn upsert(&self, entry: &FeedbackEntry) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query(UPSERT_FEEDBACK)
            .bind(entry.id)
            .bind(entry.rating)
            .bind(&entry.notes)
            .bind(entry.user_id)
            .bind(entry.question_id)
            .bind(entry.meeting_id)
            .bind(entry.submitted_at)
            .fetch_one(self.0)
            .await?
            .get("id");
        Ok(id)
    }
}

/// The Postgres side of the status sweep.
pub struct PgMeetingStore<'a>(pub &'a PgPool);

impl MeetingStore for PgMeetingStore<'_> {
    async fn list_open_meetings(&self) -> anyhow::Result<Vec<Meeting>> {
        fetch_meetings(self.0, true).await
    }

    async fn save_status(&self, change: &StatusChange) -> anyhow::Result<bool> {
        update_status(self.0, change).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Imports historical feedback. Rows bypass the time gate but are validated
/// and upserted like live submissions. A row that cannot be parsed, names an
/// unknown respondent or question, or carries an invalid rating is logged and
/// skipped; database failures abort the import.
pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    imported_at: NaiveDateTime,
) -> anyhow::Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let store = PgFeedbackStore(pool);
    let mut summary = ImportSummary::default();

    for (line, result) in reader.deserialize::<ImportRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(row = line + 1, error = %err, "skipping malformed feedback row");
                summary.skipped += 1;
                continue;
            }
        };

        let respondent = find_respondent_by_username(pool, &row.username).await?;
        let question = find_question(pool, row.question_id).await?;

        match row.into_entry(respondent.as_ref(), question.as_ref(), imported_at) {
            Ok(entry) => {
                store.upsert(&entry).await?;
                summary.imported += 1;
            }
            Err(err) => {
                warn!(row = line + 1, error = %err, "skipping feedback row");
                summary.skipped += 1;
            }
        }
    }

    info!(
        imported = summary.imported,
        skipped = summary.skipped,
        "feedback import finished"
    );
    Ok(summary)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let anatomy = Uuid::parse_str("960ab329-6caf-4675-b4d0-ae5190052388")?;
    let biology = Uuid::parse_str("fe789f6c-5871-430f-b82e-0228492b7898")?;

    for (id, name) in [(anatomy, "Anatomy"), (biology, "Biology")] {
        sqlx::query(
            r#"
            INSERT INTO meeting_feedback.departments (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    }

    let respondents = vec![
        (
            Uuid::parse_str("e7bd3cd2-7cf8-4938-8730-e3bb4ac8680b")?,
            "E1023",
            Some(anatomy),
            Some(2),
            vec!["staff"],
        ),
        (
            Uuid::parse_str("7b85daf5-0662-4ad8-89ce-08b29c79ab8e")?,
            "ST-0841",
            Some(biology),
            Some(1),
            vec![],
        ),
        (
            Uuid::parse_str("277f3049-6e85-4cb2-913c-7012b1259043")?,
            "S2001",
            Some(anatomy),
            None,
            vec![],
        ),
        (
            Uuid::parse_str("adbd0807-9583-41e7-a4f4-56fb82c54fa8")?,
            "m.okafor",
            Some(biology),
            None,
            vec!["Staff"],
        ),
        (
            Uuid::parse_str("d6712fc8-9774-4020-8d8f-881cd71ee60a")?,
            "guest.visitor",
            None,
            None,
            vec![],
        ),
    ];

    for (id, username, department_id, year, tags) in &respondents {
        sqlx::query(
            r#"
            INSERT INTO meeting_feedback.respondents (id, username, department_id, year)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (username) DO UPDATE
            SET department_id = EXCLUDED.department_id, year = EXCLUDED.year
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(department_id)
        .bind(year)
        .execute(pool)
        .await?;

        for tag in tags {
            sqlx::query(
                r#"
                INSERT INTO meeting_feedback.respondent_roles (respondent_id, role_name)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(id)
            .bind(tag)
            .execute(pool)
            .await?;
        }
    }

    let date = NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?;
    let at = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0).context("invalid time");

    let mut review = Meeting::new("Term review", date, at(10, 0)?, at(11, 0)?, Audience::Both)?;
    review.id = Uuid::parse_str("3623e4e7-4fc9-442f-b3f1-447e1a46fa93")?;
    let mut lab = Meeting::new("Lab safety briefing", date, at(14, 0)?, at(15, 30)?, Audience::Staff)?;
    lab.id = Uuid::parse_str("50589113-51ce-4330-8ddb-06a2eb6db776")?;
    lab.department_id = Some(biology);

    for meeting in [&review, &lab] {
        insert_meeting(pool, meeting).await?;
    }

    let questions = vec![
        (
            Uuid::parse_str("4930f420-9a65-4d7a-a057-04b92bec5e85")?,
            "Was the agenda clear?",
            Audience::Both,
            anatomy,
            review.id,
        ),
        (
            Uuid::parse_str("761f8db5-edae-48f7-a1a2-f99a06e3c89b")?,
            "Did the session start on time?",
            Audience::Both,
            biology,
            review.id,
        ),
        (
            Uuid::parse_str("7767a1d8-a677-464f-ae93-6f50f9c85b5a")?,
            "Were the safety procedures explained well?",
            Audience::Staff,
            biology,
            lab.id,
        ),
    ];

    for (id, text, role, department_id, meeting_id) in &questions {
        sqlx::query(
            r#"
            INSERT INTO meeting_feedback.questions
            (id, text, role, year, department_id, meeting_id, active)
            VALUES ($1, $2, $3, NULL, $4, $5, TRUE)
            ON CONFLICT (id) DO UPDATE SET text = EXCLUDED.text
            "#,
        )
        .bind(id)
        .bind(text)
        .bind(role.as_str())
        .bind(department_id)
        .bind(meeting_id)
        .execute(pool)
        .await?;
    }

    let store = PgFeedbackStore(pool);
    let submitted_at = date.and_time(at(10, 50)?);
    let ratings = [(0, 0, 5), (1, 0, 3), (2, 1, 4), (3, 1, 2), (4, 0, 4)];
    for (respondent, question, rating) in ratings {
        let (question_id, _, _, _, meeting_id) = questions[question];
        store
            .upsert(&FeedbackEntry {
                id: Uuid::new_v4(),
                rating,
                notes: None,
                user_id: respondents[respondent].0,
                question_id,
                meeting_id: Some(meeting_id),
                submitted_at,
            })
            .await?;
    }

    info!(
        respondents = respondents.len(),
        questions = questions.len(),
        "seed data loaded"
    );
    Ok(())
}
