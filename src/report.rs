use std::fmt::Write;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::feedback::{MAX_RATING, MIN_RATING};
use crate::stats::{Rollup, RollupBucket, SkipReason, Trend};

/// Averages are rounded only here, at the presentation boundary.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn histogram_line(bucket: &RollupBucket) -> String {
    (MIN_RATING..=MAX_RATING)
        .map(|rating| format!("{}★ {}", rating, bucket.ratings_of(rating)))
        .collect::<Vec<_>>()
        .join(" · ")
}

pub fn build_report(
    scope: Option<&str>,
    generated_at: NaiveDateTime,
    rollup: &Rollup,
    trend: Option<&Trend>,
) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all meetings");

    let _ = writeln!(output, "# Feedback Rollup");
    let _ = writeln!(
        output,
        "Generated for {} at {}",
        scope_label,
        generated_at.format("%Y-%m-%d %H:%M")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overall");

    if rollup.overall.count == 0 {
        let _ = writeln!(output, "No feedback recorded for this scope.");
    } else {
        let _ = writeln!(
            output,
            "- {} responses, average {:.2}",
            rollup.overall.count,
            round2(rollup.overall.average())
        );
        let _ = writeln!(output, "- {}", histogram_line(&rollup.overall));
    }

    if let Some(delta) = trend.and_then(|t| t.overall_delta) {
        let _ = writeln!(output, "- change since baseline: {:+.2}", round2(delta));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## By Role");
    let _ = writeln!(output, "| role | responses | average |");
    let _ = writeln!(output, "| --- | ---: | ---: |");
    for (role, bucket) in &rollup.by_role {
        let _ = writeln!(
            output,
            "| {} | {} | {:.2} |",
            role,
            bucket.count,
            round2(bucket.average())
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## By Department");

    if rollup.by_department.is_empty() {
        let _ = writeln!(output, "No departments with feedback.");
    } else {
        let mut departments: Vec<_> = rollup.by_department.values().collect();
        departments.sort_by(|a, b| a.department_name.cmp(&b.department_name));
        for dept in departments {
            let _ = writeln!(
                output,
                "- {}: {} responses (avg {:.2})",
                dept.department_name,
                dept.bucket.count,
                round2(dept.bucket.average())
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## By Question");

    if rollup.by_question.is_empty() {
        let _ = writeln!(output, "No questions with feedback.");
    } else {
        let mut questions: Vec<_> = rollup.by_question.iter().collect();
        questions.sort_by(|(_, a), (_, b)| b.bucket.count.cmp(&a.bucket.count));
        for (id, question) in questions {
            let _ = write!(
                output,
                "- {} ({}): {} responses (avg {:.2})",
                question.question_text,
                question.department_name,
                question.bucket.count,
                round2(question.bucket.average())
            );
            if let Some(delta) = trend.and_then(|t| t.by_question.get(id)) {
                let _ = write!(output, ", {:+.2} vs baseline", round2(*delta));
            }
            let _ = writeln!(output);
        }
    }

    if !rollup.skipped.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Skipped Entries");
        for skipped in &rollup.skipped {
            let reason = match skipped.reason {
                SkipReason::MissingQuestion => "question no longer exists".to_string(),
                SkipReason::RatingOutOfRange(rating) => format!("rating {rating} out of range"),
            };
            let _ = writeln!(
                output,
                "- entry {} (question {}): {}",
                skipped.entry_id, skipped.question_id, reason
            );
        }
    }

    output
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    dimension: &'a str,
    key: String,
    label: &'a str,
    department: &'a str,
    count: u64,
    average: f64,
    rated_1: u64,
    rated_2: u64,
    rated_3: u64,
    rated_4: u64,
    rated_5: u64,
}

impl<'a> CsvRow<'a> {
    fn new(dimension: &'a str, key: String, label: &'a str, department: &'a str, bucket: &RollupBucket) -> Self {
        let [rated_1, rated_2, rated_3, rated_4, rated_5] = bucket.histogram;
        CsvRow {
            dimension,
            key,
            label,
            department,
            count: bucket.count,
            average: round2(bucket.average()),
            rated_1,
            rated_2,
            rated_3,
            rated_4,
            rated_5,
        }
    }
}

/// Flat CSV dump of a rollup, one row per bucket.
pub fn write_csv<W: std::io::Write>(writer: W, rollup: &Rollup) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    csv.serialize(CsvRow::new("overall", String::new(), "all", "", &rollup.overall))?;
    for (role, bucket) in &rollup.by_role {
        csv.serialize(CsvRow::new("role", role.to_string(), role.as_str(), "", bucket))?;
    }
    for (id, dept) in &rollup.by_department {
        csv.serialize(CsvRow::new(
            "department",
            id.to_string(),
            &dept.department_name,
            &dept.department_name,
            &dept.bucket,
        ))?;
    }
    for (id, question) in &rollup.by_question {
        csv.serialize(CsvRow::new(
            "question",
            id.to_string(),
            &question.question_text,
            &question.department_name,
            &question.bucket,
        ))?;
    }

    csv.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &Path, rollup: &Rollup) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    write_csv(file, rollup)
}
