//! Meeting lifecycle.
//!
//! [`advance`] is the only time-driven transition and is shared by the batch
//! sweep ([`sweep_once`]) and the lazy check run on listings
//! ([`refresh_listing`]), so both paths always agree.

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::CoreError;
use crate::models::{Meeting, MeetingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub meeting_id: Uuid,
    pub from: MeetingStatus,
    pub to: MeetingStatus,
}

/// Fields a director may edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct MeetingChanges {
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub status: Option<MeetingStatus>,
}

/// Completes any live meeting whose end has passed. Idempotent; completed and
/// cancelled meetings come back unchanged.
pub fn advance(mut meeting: Meeting, now: NaiveDateTime) -> Meeting {
    let live = matches!(
        meeting.status,
        MeetingStatus::Scheduled | MeetingStatus::Rescheduled | MeetingStatus::InProgress
    );

    if live && now > meeting.end_instant() {
        meeting.status = MeetingStatus::Completed;
    }

    meeting
}

pub fn apply_edit(
    meeting: &Meeting,
    changes: &MeetingChanges,
    can_reschedule: bool,
    now: NaiveDateTime,
) -> Result<Meeting, CoreError> {
    let schedule_changed = changes.date.is_some_and(|d| d != meeting.date)
        || changes.start_time.is_some_and(|t| t != meeting.start_time)
        || changes.end_time.is_some_and(|t| t != meeting.end_time);

    let mut updated = meeting.clone();
    if let Some(title) = &changes.title {
        updated.title = title.clone();
    }
    updated.date = changes.date.unwrap_or(meeting.date);
    updated.start_time = changes.start_time.unwrap_or(meeting.start_time);
    updated.end_time = changes.end_time.unwrap_or(meeting.end_time);

    if updated.end_time <= updated.start_time {
        return Err(CoreError::Validation(format!(
            "meeting must end after it starts ({} - {})",
            updated.start_time, updated.end_time
        )));
    }

    match changes.status {
        Some(status) => {
            if meeting.status == MeetingStatus::Cancelled && status != MeetingStatus::Cancelled {
                return Err(CoreError::Validation(
                    "cancelled meetings cannot be reopened".to_string(),
                ));
            }
            updated.status = status;
        }
        None => {
            let reschedulable =
                matches!(meeting.status, MeetingStatus::Scheduled | MeetingStatus::InProgress);
            if schedule_changed && can_reschedule && reschedulable {
                updated.status = MeetingStatus::Rescheduled;
            }
        }
    }

    Ok(advance(updated, now))
}

/// Status changes the batch sweep would make, for every non-terminal meeting.
pub fn sweep(meetings: &[Meeting], now: NaiveDateTime) -> Vec<StatusChange> {
    meetings
        .iter()
        .filter(|m| !m.status.is_terminal())
        .filter_map(|m| {
            let next = advance(m.clone(), now);
            (next.status != m.status).then_some(StatusChange {
                meeting_id: m.id,
                from: m.status,
                to: next.status,
            })
        })
        .collect()
}

/// Lazy variant for listings: returns the advanced meetings along with the
/// changes the caller should persist.
pub fn refresh_listing(
    meetings: Vec<Meeting>,
    now: NaiveDateTime,
) -> (Vec<Meeting>, Vec<StatusChange>) {
    let changes = sweep(&meetings, now);
    let refreshed = meetings.into_iter().map(|m| advance(m, now)).collect();
    (refreshed, changes)
}

/// Storage seam for the sweep.
pub trait MeetingStore {
    async fn list_open_meetings(&self) -> anyhow::Result<Vec<Meeting>>;

    /// Persists a change if the stored status still equals `change.from`.
    /// Returns whether a row was updated; losing a race is not an error.
    async fn save_status(&self, change: &StatusChange) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
}

pub async fn persist_changes<S: MeetingStore>(store: &S, changes: &[StatusChange]) -> SweepSummary {
    let mut summary = SweepSummary::default();

    for change in changes {
        match store.save_status(change).await {
            Ok(true) => summary.completed += 1,
            Ok(false) => debug!(meeting = %change.meeting_id, "status already moved on"),
            Err(err) => {
                summary.failed += 1;
                warn!(meeting = %change.meeting_id, error = %err, "failed to save meeting status");
            }
        }
    }

    summary
}

pub async fn sweep_once<S: MeetingStore>(store: &S, clock: &dyn Clock) -> anyhow::Result<SweepSummary> {
    let now = clock.now();
    let meetings = store.list_open_meetings().await?;
    let changes = sweep(&meetings, now);

    let mut summary = persist_changes(store, &changes).await;
    summary.examined = meetings.len();
    Ok(summary)
}

/// Runs the sweep on a fixed interval until Ctrl-C. A failed pass is logged
/// and retried on the next tick.
pub async fn run_sweeper<S: MeetingStore>(
    store: &S,
    clock: &dyn Clock,
    every: Duration,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(every);
    info!(every_secs = every.as_secs(), "meeting sweeper started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match sweep_once(store, clock).await {
                    Ok(summary) => info!(
                        examined = summary.examined,
                        completed = summary.completed,
                        failed = summary.failed,
                        "meeting sweep finished"
                    ),
                    Err(err) => error!(error = %err, "meeting sweep failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("meeting sweeper stopping");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::Audience;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn meeting() -> Meeting {
        Meeting::new("Board", day(), time(10, 0), time(11, 0), Audience::Both).unwrap()
    }

    fn with_status(status: MeetingStatus) -> Meeting {
        let mut m = meeting();
        m.status = status;
        m
    }

    #[test]
    fn completes_after_end() {
        let m = meeting();
        assert_eq!(advance(m.clone(), day().and_time(time(11, 0))).status, MeetingStatus::Scheduled);
        assert_eq!(advance(m, day().and_time(time(11, 1))).status, MeetingStatus::Completed);

        for status in [MeetingStatus::Rescheduled, MeetingStatus::InProgress] {
            let done = advance(with_status(status), day().and_time(time(11, 1)));
            assert_eq!(done.status, MeetingStatus::Completed);
        }
    }

    #[test]
    fn cancelled_is_terminal() {
        let m = with_status(MeetingStatus::Cancelled);
        let later = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap().and_time(time(0, 0));
        assert_eq!(advance(m, later).status, MeetingStatus::Cancelled);
    }

    #[test]
    fn reschedule_needs_privilege_and_a_real_change() {
        let m = meeting();
        let now = day().and_time(time(8, 0));
        let moved = MeetingChanges {
            start_time: Some(time(10, 30)),
            ..Default::default()
        };

        let edited = apply_edit(&m, &moved, true, now).unwrap();
        assert_eq!(edited.status, MeetingStatus::Rescheduled);
        assert_eq!(edited.start_time, time(10, 30));

        let unprivileged = apply_edit(&m, &moved, false, now).unwrap();
        assert_eq!(unprivileged.status, MeetingStatus::Scheduled);
        assert_eq!(unprivileged.start_time, time(10, 30));

        let same_values = MeetingChanges {
            date: Some(day()),
            start_time: Some(time(10, 0)),
            title: Some("Board (renamed)".into()),
            ..Default::default()
        };
        let renamed = apply_edit(&m, &same_values, true, now).unwrap();
        assert_eq!(renamed.status, MeetingStatus::Scheduled);
        assert_eq!(renamed.title, "Board (renamed)");
    }

    #[test]
    fn in_progress_can_be_rescheduled_but_completed_cannot() {
        let now = day().and_time(time(10, 15));
        let moved = MeetingChanges {
            date: Some(day().succ_opt().unwrap()),
            ..Default::default()
        };

        let live = apply_edit(&with_status(MeetingStatus::InProgress), &moved, true, now).unwrap();
        assert_eq!(live.status, MeetingStatus::Rescheduled);

        let done = apply_edit(&with_status(MeetingStatus::Completed), &moved, true, now).unwrap();
        assert_eq!(done.status, MeetingStatus::Completed);
    }

    #[test]
    fn edit_into_the_past_completes_immediately() {
        let now = day().and_time(time(15, 0));
        let moved = MeetingChanges {
            start_time: Some(time(12, 0)),
            end_time: Some(time(13, 0)),
            ..Default::default()
        };
        let m = Meeting::new("Late", day(), time(16, 0), time(17, 0), Audience::Staff).unwrap();
        assert_eq!(apply_edit(&m, &moved, true, now).unwrap().status, MeetingStatus::Completed);
    }

    #[test]
    fn edit_validation() {
        let now = day().and_time(time(8, 0));
        let inverted = MeetingChanges {
            end_time: Some(time(9, 0)),
            ..Default::default()
        };
        assert!(matches!(
            apply_edit(&meeting(), &inverted, true, now),
            Err(CoreError::Validation(_))
        ));

        let reopen = MeetingChanges {
            status: Some(MeetingStatus::Scheduled),
            ..Default::default()
        };
        assert!(apply_edit(&with_status(MeetingStatus::Cancelled), &reopen, true, now).is_err());

        let cancel = MeetingChanges {
            status: Some(MeetingStatus::Cancelled),
            start_time: Some(time(9, 30)),
            ..Default::default()
        };
        let cancelled = apply_edit(&meeting(), &cancel, true, now).unwrap();
        assert_eq!(cancelled.status, MeetingStatus::Cancelled);
    }

    #[test]
    fn sweep_and_lazy_listing_agree() {
        let now = day().and_time(time(11, 1));
        let tomorrow = Meeting::new(
            "Tomorrow",
            day().succ_opt().unwrap(),
            time(10, 0),
            time(11, 0),
            Audience::Both,
        )
        .unwrap();
        let meetings = vec![
            meeting(),
            with_status(MeetingStatus::Cancelled),
            with_status(MeetingStatus::Completed),
            with_status(MeetingStatus::InProgress),
            tomorrow,
        ];

        let batch = sweep(&meetings, now);
        let (listed, lazy) = refresh_listing(meetings.clone(), now);

        assert_eq!(batch, lazy);
        assert_eq!(batch.len(), 2);
        for (before, after) in meetings.iter().zip(&listed) {
            assert_eq!(after, &advance(before.clone(), now));
        }
    }

    struct MemoryStore {
        meetings: Mutex<Vec<Meeting>>,
        fail_saves: bool,
    }

    impl MeetingStore for MemoryStore {
        async fn list_open_meetings(&self) -> anyhow::Result<Vec<Meeting>> {
            let meetings = self.meetings.lock().unwrap();
            Ok(meetings.iter().filter(|m| !m.status.is_terminal()).cloned().collect())
        }

        async fn save_status(&self, change: &StatusChange) -> anyhow::Result<bool> {
            if self.fail_saves {
                anyhow::bail!("connection reset");
            }
            let mut meetings = self.meetings.lock().unwrap();
            match meetings
                .iter_mut()
                .find(|m| m.id == change.meeting_id && m.status == change.from)
            {
                Some(m) => {
                    m.status = change.to;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[tokio::test]
    async fn sweep_once_persists_and_is_repeatable() {
        let store = MemoryStore {
            meetings: Mutex::new(vec![meeting(), with_status(MeetingStatus::Cancelled)]),
            fail_saves: false,
        };
        let clock = FixedClock(day().and_time(time(11, 1)));

        let first = sweep_once(&store, &clock).await.unwrap();
        assert_eq!(first, SweepSummary { examined: 1, completed: 1, failed: 0 });

        let second = sweep_once(&store, &clock).await.unwrap();
        assert_eq!(second, SweepSummary::default());

        let statuses: Vec<_> = store.meetings.lock().unwrap().iter().map(|m| m.status).collect();
        assert_eq!(statuses, vec![MeetingStatus::Completed, MeetingStatus::Cancelled]);
    }

    #[tokio::test]
    async fn racing_writer_is_harmless() {
        let m = meeting();
        let store = MemoryStore {
            meetings: Mutex::new(vec![m.clone()]),
            fail_saves: false,
        };
        let now = day().and_time(time(11, 1));
        let changes = sweep(&[m], now);

        let lazy = persist_changes(&store, &changes).await;
        let batch = persist_changes(&store, &changes).await;
        assert_eq!(lazy.completed, 1);
        assert_eq!(batch.completed, 0);
        assert_eq!(batch.failed, 0);
    }

    #[tokio::test]
    async fn failed_saves_are_counted_not_fatal() {
        let store = MemoryStore {
            meetings: Mutex::new(vec![meeting(), meeting()]),
            fail_saves: true,
        };
        let clock = FixedClock(day().and_time(time(12, 0)));
        let summary = sweep_once(&store, &clock).await.unwrap();
        assert_eq!(summary, SweepSummary { examined: 2, completed: 0, failed: 2 });
    }

    fn any_status() -> impl Strategy<Value = MeetingStatus> {
        prop_oneof![
            Just(MeetingStatus::Scheduled),
            Just(MeetingStatus::Rescheduled),
            Just(MeetingStatus::InProgress),
            Just(MeetingStatus::Completed),
            Just(MeetingStatus::Cancelled),
        ]
    }

    proptest! {
        #[test]
        fn advance_is_idempotent(
            status in any_status(),
            start in 0u32..22,
            length in 1u32..2,
            offset_minutes in -3000i64..3000,
        ) {
            let mut m = Meeting::new(
                "Prop",
                day(),
                time(start, 0),
                time(start + length, 0),
                Audience::Both,
            ).unwrap();
            m.status = status;
            let t = m.start_instant() + chrono::Duration::minutes(offset_minutes);

            let once = advance(m.clone(), t);
            prop_assert_eq!(advance(once.clone(), t), once.clone());
            if status == MeetingStatus::Cancelled {
                prop_assert_eq!(once.status, MeetingStatus::Cancelled);
            }
        }
    }
}
