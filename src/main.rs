use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod clock;
mod config;
mod db;
mod error;
mod feedback;
mod gate;
mod models;
mod report;
mod roles;
mod scheduler;
mod stats;

use crate::config::{Config, LogFormat};
use crate::error::CoreError;
use crate::models::{Audience, Meeting, MeetingStatus, RoleCategory};

#[derive(Parser)]
#[command(name = "feedback-rollup")]
#[command(about = "Meeting feedback collection and rollup reporting", long_about = None)]
struct Cli {
    /// Evaluate as if the current instant were this (e.g. 2026-03-02T09:56:00)
    #[arg(long, global = true)]
    now: Option<NaiveDateTime>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo departments, respondents, meetings and feedback
    Seed,
    /// Import feedback rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List meetings, completing any whose end has passed
    Meetings {
        #[arg(long)]
        open_only: bool,
    },
    /// Complete every live meeting whose end has passed
    Sweep {
        /// Keep sweeping on an interval until interrupted
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Edit a meeting's schedule or status
    Reschedule {
        #[arg(long)]
        meeting: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, value_parser = parse_time)]
        start: Option<NaiveTime>,
        #[arg(long, value_parser = parse_time)]
        end: Option<NaiveTime>,
        #[arg(long)]
        status: Option<String>,
        /// Act with director privileges (reschedule and status changes)
        #[arg(long)]
        director: bool,
    },
    /// Show which questions of a meeting are open
    Questions {
        #[arg(long)]
        meeting: Uuid,
        /// Narrow to the questions addressed to this respondent
        #[arg(long)]
        username: Option<String>,
        /// Bypass the time gate
        #[arg(long)]
        manager: bool,
        #[arg(long)]
        json: bool,
    },
    /// Submit or update a rating
    Submit {
        #[arg(long)]
        username: String,
        #[arg(long)]
        question: Uuid,
        #[arg(long)]
        rating: i32,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Generate a markdown rollup report
    Report {
        #[arg(long)]
        meeting: Option<Uuid>,
        /// Baseline meeting to show average changes against
        #[arg(long)]
        compare_to: Option<Uuid>,
        #[arg(long, default_value = "feedback-report.md")]
        out: PathBuf,
        /// Also write the flat rollup as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

fn parse_time(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "feedback_rollup=info".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Role searched for when classifying respondents of a meeting.
fn searching_for(meeting: Option<&Meeting>) -> Option<RoleCategory> {
    match meeting.map(|m| m.target_role) {
        Some(Audience::Staff) => Some(RoleCategory::Staff),
        Some(Audience::Student) => Some(RoleCategory::Student),
        _ => None,
    }
}

/// Reads one meeting and applies the lazy status check before handing it out.
async fn load_meeting(
    pool: &sqlx::PgPool,
    id: Uuid,
    now: NaiveDateTime,
) -> anyhow::Result<Meeting> {
    let stored = db::fetch_meeting(pool, id).await?;
    let (mut refreshed, changes) = scheduler::refresh_listing(vec![stored], now);
    scheduler::persist_changes(&db::PgMeetingStore(pool), &changes).await;
    refreshed.pop().context("meeting vanished during refresh")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::from_env());

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let clock = clock::from_override(cli.now);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&pool, &csv, clock.now()).await?;
            println!(
                "Imported {} feedback rows from {} ({} skipped).",
                summary.imported,
                csv.display(),
                summary.skipped
            );
        }
        Commands::Meetings { open_only } => {
            let meetings = db::fetch_meetings(&pool, open_only).await?;
            let (meetings, changes) = scheduler::refresh_listing(meetings, clock.now());
            let saved = scheduler::persist_changes(&db::PgMeetingStore(&pool), &changes).await;
            if saved.completed > 0 {
                info!(completed = saved.completed, "completed meetings during listing");
            }

            if meetings.is_empty() {
                println!("No meetings found.");
                return Ok(());
            }

            for meeting in &meetings {
                println!(
                    "- {} {} {}-{} [{}] {}",
                    meeting.id,
                    meeting.date,
                    meeting.start_time.format("%H:%M"),
                    meeting.end_time.format("%H:%M"),
                    meeting.status,
                    meeting.title
                );
            }
        }
        Commands::Sweep {
            watch,
            interval_secs,
        } => {
            let store = db::PgMeetingStore(&pool);
            if watch {
                let every = interval_secs
                    .map(std::time::Duration::from_secs)
                    .unwrap_or(config.sweep_interval);
                scheduler::run_sweeper(&store, &*clock, every).await?;
            } else {
                let summary = scheduler::sweep_once(&store, &*clock).await?;
                println!(
                    "Examined {} meetings, completed {}, failed {}.",
                    summary.examined, summary.completed, summary.failed
                );
            }
        }
        Commands::Reschedule {
            meeting,
            title,
            date,
            start,
            end,
            status,
            director,
        } => {
            let status = status
                .map(|raw| raw.parse::<MeetingStatus>())
                .transpose()?;
            if status.is_some() && !director {
                return Err(CoreError::Unauthorized(
                    "only directors may change a meeting's status".to_string(),
                )
                .into());
            }

            let now = clock.now();
            let current = load_meeting(&pool, meeting, now).await?;
            let changes = scheduler::MeetingChanges {
                title,
                date,
                start_time: start,
                end_time: end,
                status,
            };
            let edited = scheduler::apply_edit(&current, &changes, director, now)?;

            if !db::update_meeting(&pool, &current, &edited).await? {
                anyhow::bail!("meeting {} changed while editing; try again", meeting);
            }
            println!("Meeting {} is now {}.", edited.id, edited.status);
        }
        Commands::Questions {
            meeting,
            username,
            manager,
            json,
        } => {
            let now = clock.now();
            let meeting = load_meeting(&pool, meeting, now).await?;
            let questions = db::fetch_questions(&pool, Some(meeting.id)).await?;
            let mut visibility = gate::questions_visible(&meeting, &questions, now, manager);

            if let (Some(username), false) = (username.as_deref(), manager) {
                let profile = db::fetch_respondent_by_username(&pool, username).await?;
                let role = roles::classify_for(&profile, searching_for(Some(&meeting)));
                visibility.questions = visibility
                    .questions
                    .map(|qs| gate::for_audience(qs, role, profile.year));
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&visibility)?);
            } else if visibility.is_closed() {
                println!("Feedback for {} is closed.", meeting.title);
            } else if let Some(questions) = &visibility.questions {
                println!("{} questions open for {}:", questions.len(), meeting.title);
                for question in questions {
                    println!("- {} {}", question.id, question.text);
                }
            } else if let Some(minutes) = visibility.minutes_until_open {
                println!("Questions for {} open in {} minutes.", meeting.title, minutes);
            }
        }
        Commands::Submit {
            username,
            question,
            rating,
            notes,
        } => {
            let now = clock.now();
            let profile = db::fetch_respondent_by_username(&pool, &username).await?;
            let question = db::fetch_question(&pool, question).await?;
            let meeting = match question.meeting_id {
                Some(id) => Some(load_meeting(&pool, id, now).await?),
                None => None,
            };

            let respondent = feedback::Respondent {
                role: roles::classify_for(&profile, searching_for(meeting.as_ref())),
                year: profile.year,
            };
            let submission = feedback::Submission {
                user_id: profile.id,
                question_id: question.id,
                rating,
                notes,
            };
            let store = db::PgFeedbackStore(&pool);
            let (stored_id, entry) = feedback::submit(
                &store,
                submission,
                &question,
                meeting.as_ref(),
                respondent,
                now,
            )
            .await?;
            println!("Feedback {stored_id} recorded ({} for {}).", entry.rating, username);
        }
        Commands::Report {
            meeting,
            compare_to,
            out,
            csv,
        } => {
            let now = clock.now();
            let scoped_meeting = match meeting {
                Some(id) => Some(load_meeting(&pool, id, now).await?),
                None => None,
            };

            let entries = db::fetch_feedback(&pool).await?;
            let questions = db::fetch_questions(&pool, None).await?;
            let departments = db::fetch_departments(&pool).await?;
            let respondents = db::fetch_respondents(&pool).await?;

            let roles = stats::AggregationContext::classify_respondents(
                &respondents,
                searching_for(scoped_meeting.as_ref()),
            );
            let ctx = stats::AggregationContext::new(questions, departments, roles);

            let rollup = stats::aggregate(&stats::scope_to_meeting(&entries, meeting), &ctx);
            if !rollup.skipped.is_empty() {
                warn!(skipped = rollup.skipped.len(), "some feedback was left out of the rollup");
            }

            let trend = compare_to.map(|baseline| {
                let baseline = stats::aggregate(&stats::scope_to_meeting(&entries, Some(baseline)), &ctx);
                stats::compare(&baseline, &rollup)
            });

            let report = report::build_report(
                scoped_meeting.as_ref().map(|m| m.title.as_str()),
                now,
                &rollup,
                trend.as_ref(),
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());

            if let Some(path) = csv {
                report::write_csv_file(&path, &rollup)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("Rollup CSV written to {}.", path.display());
            }
        }
    }

    Ok(())
}
