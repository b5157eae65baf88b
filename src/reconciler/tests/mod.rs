use super::*;
use crate::types::{Artifact, BatchPayload, SubTask};
use chrono::TimeZone;
use rand::SeedableRng;
use rand::seq::SliceRandom;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn payload(state: JobState) -> StatusPayload {
    StatusPayload::with_state(state)
}

fn with_progress(state: JobState, progress: u8) -> StatusPayload {
    let mut p = payload(state);
    p.progress = Some(progress);
    p
}

fn item(id: &str, state: JobState) -> SubTask {
    SubTask {
        task_id: id.into(),
        filename: format!("{id}.jpg"),
        state,
        artifact: (state == JobState::Completed)
            .then(|| Artifact::from_url(format!("https://cdn.example.com/{id}.png"))),
        error: (state == JobState::Failed).then(|| "rejected".to_string()),
    }
}

fn batch_payload(state: JobState, total: u32, items: Vec<SubTask>) -> StatusPayload {
    let mut p = payload(state);
    p.artifacts = items.iter().filter_map(|t| t.artifact.clone()).collect();
    p.batch = Some(BatchPayload {
        total_images: total,
        completed_images: 0,
        failed_images: 0,
        sub_tasks: items,
    });
    p
}

fn counters_payload(state: &str, total: u32, completed: u32, failed: u32) -> StatusPayload {
    let state = match state {
        "processing" => JobState::Processing,
        "partial" => JobState::PartiallyCompleted,
        "completed" => JobState::Completed,
        other => panic!("unexpected {other}"),
    };
    let mut p = payload(state);
    p.batch = Some(BatchPayload {
        total_images: total,
        completed_images: completed,
        failed_images: failed,
        sub_tasks: vec![],
    });
    p
}

#[test]
fn queued_to_processing_advances() {
    let job = Job::new("t1", JobKind::SingleTask);
    let r = reduce(&job, &with_progress(JobState::Processing, 10), at(0));

    assert_eq!(r.job.state, JobState::Processing);
    assert_eq!(r.job.progress, 10);
    assert_eq!(
        r.change,
        Change::Applied(Transition::Advanced {
            from: JobState::Queued,
            to: JobState::Processing
        })
    );
    assert!(should_continue_polling(&r.job));
}

#[test]
fn progress_only_update_is_still_reported() {
    let job = Job::new("t1", JobKind::SingleTask);
    let job = reduce(&job, &with_progress(JobState::Processing, 10), at(0)).job;
    let r = reduce(&job, &with_progress(JobState::Processing, 55), at(1));

    assert_eq!(r.change, Change::Applied(Transition::Progress));
    assert_eq!(r.job.progress, 55);
}

#[test]
fn progress_never_decreases_while_processing() {
    let job = Job::new("t1", JobKind::SingleTask);
    let job = reduce(&job, &with_progress(JobState::Processing, 70), at(0)).job;
    let r = reduce(&job, &with_progress(JobState::Processing, 40), at(1));
    assert_eq!(r.job.progress, 70);
}

#[test]
fn completion_sets_artifacts_and_timestamp_together() {
    let job = Job::new("t1", JobKind::SingleTask);
    let job = reduce(&job, &with_progress(JobState::Processing, 90), at(0)).job;
    assert!(job.artifacts.is_empty());
    assert!(job.completed_at.is_none());

    let mut done = payload(JobState::Completed);
    done.artifacts = vec![Artifact::from_url("https://cdn.example.com/out.svg")];
    let r = reduce(&job, &done, at(5));

    assert!(r.is_terminal());
    assert_eq!(r.job.state, JobState::Completed);
    assert_eq!(r.job.progress, 100);
    assert_eq!(r.job.artifacts.len(), 1);
    assert_eq!(r.job.completed_at, Some(at(5)));
    assert!(r.job.error.is_none());
    assert!(!should_continue_polling(&r.job));
}

#[test]
fn artifacts_ignored_before_terminal_state() {
    let job = Job::new("t1", JobKind::SingleTask);
    let mut p = with_progress(JobState::Processing, 50);
    p.artifacts = vec![Artifact::from_url("https://cdn.example.com/preview.png")];
    let r = reduce(&job, &p, at(0));
    assert!(r.job.artifacts.is_empty());
}

#[test]
fn backend_completion_time_wins_over_local_clock() {
    let job = Job::new("t1", JobKind::SingleTask);
    let mut done = payload(JobState::Completed);
    done.completed_at = Some(at(3));
    let r = reduce(&job, &done, at(60));
    assert_eq!(r.job.completed_at, Some(at(3)));
}

#[test]
fn backend_creation_time_is_adopted() {
    let job = Job::new("t1", JobKind::SingleTask);
    let mut p = payload(JobState::Processing);
    p.created_at = Some(at(-30));
    let r = reduce(&job, &p, at(0));
    assert_eq!(r.job.created_at, at(-30));
}

#[test]
fn failure_carries_error_and_defaults_when_missing() {
    let job = Job::new("t1", JobKind::SingleTask);
    let mut failed = payload(JobState::Failed);
    failed.error = Some(JobError::new("QUOTA", "out of credits"));
    let r = reduce(&job, &failed, at(0));
    assert_eq!(r.job.error, Some(JobError::new("QUOTA", "out of credits")));
    assert!(r.job.artifacts.is_empty());

    let r = reduce(&job, &payload(JobState::Failed), at(0));
    assert_eq!(r.job.error.unwrap().code, "failed");
}

#[test]
fn stale_payload_is_discarded() {
    let job = Job::new("t1", JobKind::SingleTask);
    let job = reduce(&job, &with_progress(JobState::Processing, 30), at(0)).job;
    let r = reduce(&job, &payload(JobState::Queued), at(1));

    assert_eq!(
        r.change,
        Change::Discarded(Discard::Stale {
            current: JobState::Processing,
            reported: JobState::Queued
        })
    );
    assert_eq!(r.job, job);
}

#[test]
fn terminal_state_absorbs_everything() {
    let job = Job::new("t1", JobKind::SingleTask);
    let done = reduce(&job, &payload(JobState::Completed), at(0)).job;

    for state in [JobState::Processing, JobState::Failed, JobState::Completed] {
        let r = reduce(&done, &payload(state), at(10));
        assert_eq!(
            r.change,
            Change::Discarded(Discard::Absorbed {
                state: JobState::Completed
            })
        );
        assert_eq!(r.job, done);
    }
}

#[test]
fn partial_completion_rejected_for_single_tasks() {
    let job = Job::new("t1", JobKind::SingleTask);
    let r = reduce(&job, &payload(JobState::PartiallyCompleted), at(0));
    assert!(matches!(
        r.change,
        Change::Discarded(Discard::InvalidForKind { .. })
    ));
}

#[test]
fn expired_only_comes_from_the_deadline() {
    let job = Job::new("t1", JobKind::SingleTask);
    let r = reduce(&job, &payload(JobState::Expired), at(0));
    assert!(matches!(
        r.change,
        Change::Discarded(Discard::InvalidForKind { .. })
    ));

    let r = expire(&job, at(9));
    assert_eq!(r.job.state, JobState::Expired);
    assert_eq!(r.job.completed_at, Some(at(9)));
    assert!(r.is_terminal());
}

#[test]
fn expire_is_noop_after_terminal_state() {
    let job = Job::new("t1", JobKind::PaymentOrder);
    let paid = reduce(&job, &payload(JobState::Completed), at(0)).job;
    let r = expire(&paid, at(100));
    assert_eq!(r.job, paid);
    assert!(r.transition().is_none());
}

#[test]
fn batch_progress_is_derived_from_items() {
    let job = Job::new("b1", JobKind::BatchTask);
    let items = vec![
        item("a", JobState::Completed),
        item("b", JobState::Failed),
        item("c", JobState::Processing),
        item("d", JobState::Queued),
    ];
    let r = reduce(&job, &batch_payload(JobState::Processing, 4, items), at(0));

    let batch = r.job.batch.as_ref().unwrap();
    assert_eq!(batch.counts.total, 4);
    assert_eq!(batch.counts.completed, 1);
    assert_eq!(batch.counts.failed, 1);
    assert_eq!(r.job.progress, 50);
}

#[test]
fn batch_count_derivation_is_idempotent() {
    let job = Job::new("b1", JobKind::BatchTask);
    let p = batch_payload(
        JobState::Processing,
        3,
        vec![
            item("a", JobState::Completed),
            item("b", JobState::Processing),
            item("c", JobState::Processing),
        ],
    );
    let first = reduce(&job, &p, at(0)).job;
    let second = reduce(&first, &p, at(1));

    assert_eq!(second.change, Change::Applied(Transition::Progress));
    assert_eq!(second.job.batch, first.batch);
    assert_eq!(second.job.progress, 33);
}

#[test]
fn late_batch_replica_with_fewer_finished_items_is_stale() {
    use JobState::{Completed as C, Failed as F, Processing as P};
    let states = |list: [JobState; 5]| {
        list.iter()
            .enumerate()
            .map(|(i, s)| item(&format!("i{i}"), *s))
            .collect::<Vec<_>>()
    };

    let job = Job::new("b1", JobKind::BatchTask);
    let newer = reduce(
        &job,
        &batch_payload(JobState::Processing, 5, states([C, C, C, F, P])),
        at(0),
    )
    .job;
    assert_eq!(newer.progress, 80);

    let late = reduce(
        &newer,
        &batch_payload(JobState::Processing, 5, states([C, P, P, P, P])),
        at(1),
    );
    assert_eq!(
        late.change,
        Change::Discarded(Discard::Regressed {
            current_done: 4,
            reported_done: 1,
        })
    );
    assert_eq!(late.job, newer);
    let batch = late.job.batch.as_ref().unwrap();
    assert_eq!(late.job.progress, batch.counts.percent());
    assert_eq!(
        batch.sub_tasks.iter().filter(|t| t.artifact.is_some()).count(),
        3
    );

    // A terminal payload still wins whatever its counts say
    let done = reduce(
        &newer,
        &batch_payload(JobState::PartiallyCompleted, 5, states([C, P, P, P, P])),
        at(2),
    );
    assert_eq!(done.job.state, JobState::PartiallyCompleted);
}

#[test]
fn batch_progress_formula_over_all_splits() {
    let total = 7u32;
    for k in 0..=total {
        for m in 0..=(total - k) {
            let mut items = Vec::new();
            for i in 0..total {
                let state = if i < k {
                    JobState::Completed
                } else if i < k + m {
                    JobState::Failed
                } else {
                    JobState::Processing
                };
                items.push(item(&format!("i{i}"), state));
            }
            let job = Job::new("b", JobKind::BatchTask);
            let r = reduce(&job, &batch_payload(JobState::Processing, total, items), at(0));
            let expected = ((k + m) * 100 + total / 2) / total;
            assert_eq!(u32::from(r.job.progress), expected, "k={k} m={m}");
        }
    }
}

#[test]
fn batch_scenario_five_images() {
    let job = Job::new("b5", JobKind::BatchTask);

    let r = reduce(&job, &counters_payload("processing", 5, 0, 0), at(0));
    assert_eq!(r.job.state, JobState::Processing);
    assert_eq!(r.job.progress, 0);

    // Continuing status: counts only move progress
    let continuing = reduce(&r.job, &counters_payload("processing", 5, 3, 1), at(1));
    assert_eq!(continuing.job.state, JobState::Processing);
    assert_eq!(continuing.job.progress, 80);
    assert!(should_continue_polling(&continuing.job));

    // Terminal status string: trusted even though one image is unaccounted for
    let partial = reduce(&r.job, &counters_payload("partial", 5, 3, 1), at(1));
    assert_eq!(partial.job.state, JobState::PartiallyCompleted);
    assert!(!should_continue_polling(&partial.job));
}

#[test]
fn partial_batch_keeps_successful_artifacts() {
    let job = Job::new("b1", JobKind::BatchTask);
    let items = vec![item("a", JobState::Completed), item("b", JobState::Failed)];
    let r = reduce(
        &job,
        &batch_payload(JobState::PartiallyCompleted, 2, items),
        at(0),
    );
    assert_eq!(r.job.state, JobState::PartiallyCompleted);
    assert_eq!(r.job.artifacts.len(), 1);
    assert_eq!(r.job.progress, 100);
    assert!(r.job.error.is_none());
}

#[test]
fn monotonic_under_permutation_and_duplication() {
    let sequence = vec![
        payload(JobState::Queued),
        with_progress(JobState::Processing, 20),
        with_progress(JobState::Processing, 60),
        payload(JobState::Completed),
        payload(JobState::Failed),
        with_progress(JobState::Processing, 90),
    ];
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    for _ in 0..200 {
        let mut shuffled = sequence.clone();
        // Duplicate a random element to mimic repeated deliveries
        let dup = shuffled.choose(&mut rng).cloned().unwrap();
        shuffled.push(dup);
        shuffled.shuffle(&mut rng);

        let mut job = Job::new("t", JobKind::SingleTask);
        let mut terminal: Option<JobState> = None;
        for (i, p) in shuffled.iter().enumerate() {
            let before = job.clone();
            let r = reduce(&job, p, at(i as i64));
            assert!(
                r.job.state.rank() >= before.state.rank(),
                "state moved backward: {:?} -> {:?}",
                before.state,
                r.job.state
            );
            if before.state == JobState::Processing && r.job.state == JobState::Processing {
                assert!(r.job.progress >= before.progress);
            }
            if let Some(state) = terminal {
                assert_eq!(r.job.state, state, "terminal state changed");
                assert_eq!(r.job, before);
            }
            if r.job.state.is_terminal() {
                terminal = Some(r.job.state);
            }
            job = r.job;
        }
    }
}
