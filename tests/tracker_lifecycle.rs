//! End-to-end tracker lifecycles driven through the scheduler in virtual time.

use chrono::Utc;
use quest_tracker::client::RemoteTaskClient;
use quest_tracker::client::mock::MockTaskClient;
use quest_tracker::scheduler::{ManualClock, TrackerStatus};
use quest_tracker::{
    CancelReason, HostEvent, Scheduler, SchedulerConfig, Task, TaskKind, TaskTarget, TrackerError,
    TrackerEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn scheduler_with(client: &Arc<MockTaskClient>, clock: Arc<ManualClock>) -> Scheduler {
    let client: Arc<dyn RemoteTaskClient> = client.clone();
    Scheduler::new(&SchedulerConfig::default(), client)
        .unwrap()
        .with_clock(clock)
}

/// Wait for the first non-progress event.
async fn next_outcome(events: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
    loop {
        match events.recv().await.unwrap() {
            TrackerEvent::Progress { .. } => continue,
            other => return other,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_simulated_task_completes_at_raw_after_leeway_window() {
    let now = Utc::now();
    let clock = Arc::new(ManualClock::new(now));
    let task = Task::new("watch-1", TaskKind::SimulatedVideo, TaskTarget::with_leeway(120.0, 10.0))
        .enrolled(now);
    let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
    let scheduler = scheduler_with(&client, clock);
    let mut events = scheduler.subscribe();

    let started = tokio::time::Instant::now();
    scheduler.start_tracking(task).unwrap();

    let outcome = next_outcome(&mut events).await;
    assert_eq!(
        outcome,
        TrackerEvent::Completed {
            task_id: "watch-1".into(),
            progress: 120.0
        }
    );

    let reports = client.reports_for("watch-1");
    assert!(reports.iter().all(|r| r.value.unwrap() <= 120.0));
    let finals = client.final_reports("watch-1");
    assert_eq!(finals.len(), 1);
    assert!(finals[0].at - started >= Duration::from_secs(110));
    assert!(!scheduler.is_tracking("watch-1"));
    assert!(scheduler.persisted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progress_events_tick_while_tracking() {
    let now = Utc::now();
    let task = Task::new("watch-2", TaskKind::SimulatedVideo, TaskTarget::with_leeway(60.0, 5.0))
        .enrolled(now);
    let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
    let scheduler = scheduler_with(&client, Arc::new(ManualClock::new(now)));
    let mut events = scheduler.subscribe();
    scheduler.start_tracking(task).unwrap();

    let mut last = 0.0;
    for _ in 0..5 {
        match events.recv().await.unwrap() {
            TrackerEvent::Progress { task_id, value } => {
                assert_eq!(task_id, "watch-2");
                assert!(value > last);
                last = value;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(
        scheduler.snapshot("watch-2").unwrap().status,
        TrackerStatus::Accelerating
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_session_rejection_fails_without_completion() {
    let now = Utc::now();
    let task =
        Task::new("play-1", TaskKind::Heartbeat, TaskTarget::new(900.0, 930.0)).enrolled(now);
    let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
    client.script_heartbeats("play-1", [Some(40.0), None]);
    let scheduler = scheduler_with(&client, Arc::new(ManualClock::new(now)));
    let mut events = scheduler.subscribe();

    scheduler.start_tracking(task).unwrap();
    match next_outcome(&mut events).await {
        TrackerEvent::Failed { task_id, reason } => {
            assert_eq!(task_id, "play-1");
            assert!(reason.contains("rejected"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!scheduler.is_tracking("play-1"));
    assert!(client.final_reports("play-1").is_empty());

    tokio::time::sleep(Duration::from_secs(60)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, TrackerEvent::Completed { .. }),
            "no completion after rejection"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_completes_on_server_progress() {
    let now = Utc::now();
    let task = Task::new("play-2", TaskKind::Heartbeat, TaskTarget::new(90.0, 100.0))
        .with_progress(60.0)
        .enrolled(now);
    let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
    client.script_heartbeats("play-2", [Some(60.0), Some(80.0), Some(95.0), Some(100.0)]);
    let scheduler = scheduler_with(&client, Arc::new(ManualClock::new(now)));
    let mut events = scheduler.subscribe();

    scheduler.start_tracking(task).unwrap();
    assert_eq!(
        next_outcome(&mut events).await,
        TrackerEvent::Completed {
            task_id: "play-2".into(),
            progress: 100.0
        }
    );

    let calls = client.reports_for("play-2");
    let gaps: Vec<_> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(20),
            Duration::from_secs(20),
            Duration::from_secs(5),
            Duration::ZERO
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_register_one_tracker() {
    let now = Utc::now();
    let task = Task::new("race", TaskKind::Heartbeat, TaskTarget::new(900.0, 930.0)).enrolled(now);
    let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
    let scheduler = scheduler_with(&client, Arc::new(ManualClock::new(now)));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let scheduler = scheduler.clone();
        let task = task.clone();
        handles.push(tokio::spawn(async move { scheduler.start_tracking(task) }));
    }

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => started += 1,
            Err(TrackerError::AlreadyTracking(id)) => assert_eq!(id, "race"),
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(scheduler.active_ids(), vec!["race".to_owned()]);
    assert_eq!(scheduler.persisted().len(), 1);

    assert!(scheduler.cancel("race", CancelReason::User));
    assert!(!scheduler.cancel("race", CancelReason::User));
}

#[tokio::test(start_paused = true)]
async fn test_application_exit_only_stops_its_trackers() {
    let now = Utc::now();
    let game = Task::new("play-3", TaskKind::Heartbeat, TaskTarget::new(900.0, 930.0))
        .with_application_id("game")
        .enrolled(now);
    let video = Task::new("watch-3", TaskKind::SimulatedVideo, TaskTarget::with_leeway(600.0, 10.0))
        .enrolled(now);
    let client = Arc::new(
        MockTaskClient::new()
            .with_task(game.clone())
            .with_task(video.clone()),
    );
    let scheduler = scheduler_with(&client, Arc::new(ManualClock::new(now)));
    scheduler.start_tracking(game).unwrap();
    scheduler.start_tracking(video).unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    scheduler
        .handle_event(HostEvent::ApplicationExited {
            application_id: "game".into(),
        })
        .await;

    assert!(!scheduler.is_tracking("play-3"));
    assert!(scheduler.is_tracking("watch-3"));
    let persisted = scheduler.persisted();
    assert!(!persisted.contains("play-3"));
    assert!(persisted.contains("watch-3"));

    let beats = client.reports_for("play-3").len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(client.reports_for("play-3").len(), beats, "no heartbeats after exit");
}

#[tokio::test(start_paused = true)]
async fn test_resumed_simulated_task_counts_time_since_enrollment() {
    let enrolled_at = Utc::now();
    let clock = Arc::new(ManualClock::new(enrolled_at));
    clock.advance(chrono::Duration::seconds(125));
    let task = Task::new("watch-4", TaskKind::SimulatedVideo, TaskTarget::with_leeway(120.0, 10.0))
        .enrolled(enrolled_at);
    let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
    let scheduler = scheduler_with(&client, clock);
    let mut events = scheduler.subscribe();

    let started = tokio::time::Instant::now();
    scheduler.start_tracking(task).unwrap();
    assert!(matches!(
        next_outcome(&mut events).await,
        TrackerEvent::Completed { .. }
    ));

    let reports = client.reports_for("watch-4");
    assert_eq!(reports.len(), 1, "no ramp when less than one cycle remains");
    assert_eq!(reports[0].at - started, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_huge_target_tracks_and_can_be_restarted() {
    let now = Utc::now();
    let task = Task::new("big", TaskKind::SimulatedVideo, TaskTarget::with_leeway(1e20, 10.0))
        .enrolled(now);
    let client = Arc::new(MockTaskClient::new().with_task(task.clone()));
    let scheduler = scheduler_with(&client, Arc::new(ManualClock::new(now)));

    scheduler.start_tracking(task.clone()).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        scheduler.snapshot("big").unwrap().status,
        TrackerStatus::Accelerating
    );

    assert!(scheduler.cancel("big", CancelReason::User));
    scheduler.start_tracking(task).unwrap();
    assert!(scheduler.is_tracking("big"));
}
