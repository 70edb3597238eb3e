use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use services::{
    AppServices, Clock, MoveOutcome, PersistencePolicy, ReplayEvent, SessionError, SessionNotice,
    SessionPhase, TrainingConfig, TrainingLoopService,
};
use storage::repository::{
    AccuracyStore, InMemoryRepository, ProgressSnapshot, ProgressStore, PuzzleCatalog, SetStore,
    Storage, StorageError,
};
use woodpecker_core::model::{
    AccuracyDelta, AccuracyRecord, Advance, NewPuzzleSet, PuzzleId, PuzzleRecord, SetId,
    SetProgress, moves,
};
use woodpecker_core::time::fixed_now;

const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Progress store that fails writes while `failing` is set.
struct FlakyProgress {
    inner: InMemoryRepository,
    failing: AtomicBool,
}

#[async_trait]
impl ProgressStore for FlakyProgress {
    async fn get_progress(&self, set_id: SetId) -> Result<ProgressSnapshot, StorageError> {
        self.inner.get_progress(set_id).await
    }

    async fn set_progress(&self, set_id: SetId, progress: SetProgress) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("disk unplugged".into()));
        }
        self.inner.set_progress(set_id, progress).await
    }
}

/// Accuracy store that keeps a log of every increment it receives.
struct LoggedAccuracy {
    inner: InMemoryRepository,
    log: Mutex<Vec<(u32, AccuracyDelta)>>,
}

impl LoggedAccuracy {
    fn new(inner: InMemoryRepository) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    fn received(&self) -> Vec<(u32, AccuracyDelta)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccuracyStore for LoggedAccuracy {
    async fn increment(
        &self,
        set_id: SetId,
        repeat_index: u32,
        delta: AccuracyDelta,
    ) -> Result<AccuracyRecord, StorageError> {
        self.log.lock().unwrap().push((repeat_index, delta));
        self.inner.increment(set_id, repeat_index, delta).await
    }

    async fn list_accuracy(&self, set_id: SetId) -> Result<Vec<AccuracyRecord>, StorageError> {
        self.inner.list_accuracy(set_id).await
    }
}

/// Two-ply puzzle: the solver plays e2e4 and the reply e7e5 ends it.
fn short_puzzle(id: &str) -> PuzzleRecord {
    PuzzleRecord::from_uci_line(PuzzleId::new(id).unwrap(), START, "e2e4 e7e5", 1400).unwrap()
}

async fn seeded(ids: &[&str], repeats: u32) -> (InMemoryRepository, SetId) {
    let repo = InMemoryRepository::new();
    for id in ids {
        repo.upsert_puzzle(&short_puzzle(id)).await.unwrap();
    }
    let set_id = repo
        .create_set(
            NewPuzzleSet {
                target_rating: 1400,
                repeats,
                puzzle_ids: ids.iter().map(|s| PuzzleId::new(*s).unwrap()).collect(),
            },
            fixed_now(),
        )
        .await
        .unwrap();
    (repo, set_id)
}

/// One-puzzle set whose four-ply line gives a long replay after a miss.
async fn seeded_long() -> (InMemoryRepository, SetId) {
    let repo = InMemoryRepository::new();
    let long = PuzzleRecord::from_uci_line(
        PuzzleId::new("long").unwrap(),
        START,
        "e2e4 e7e5 g1f3 b8c6",
        1500,
    )
    .unwrap();
    repo.upsert_puzzle(&long).await.unwrap();
    let set_id = repo
        .create_set(
            NewPuzzleSet {
                target_rating: 1500,
                repeats: 1,
                puzzle_ids: vec![PuzzleId::new("long").unwrap()],
            },
            fixed_now(),
        )
        .await
        .unwrap();
    (repo, set_id)
}

fn paced(
    repo: &InMemoryRepository,
    accuracy: Arc<dyn AccuracyStore>,
    clock: Clock,
    replay_pause: Duration,
) -> TrainingLoopService {
    TrainingLoopService::new(
        clock,
        TrainingConfig {
            replay_pause,
            ..TrainingConfig::immediate()
        },
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        accuracy,
    )
}

fn training(
    repo: &InMemoryRepository,
    progress: Arc<dyn ProgressStore>,
    policy: PersistencePolicy,
) -> TrainingLoopService {
    TrainingLoopService::new(
        Clock::fixed(fixed_now()),
        TrainingConfig::immediate().with_persistence(policy),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        progress,
        Arc::new(repo.clone()),
    )
}

#[tokio::test]
async fn three_puzzles_two_repeats_complete_after_six_solves() {
    let (repo, set_id) = seeded(&["a", "b", "c"], 2).await;
    let svc = training(&repo, Arc::new(repo.clone()), PersistencePolicy::Optimistic);

    let (mut engine, _) = svc.start_session(set_id).await.unwrap();
    let mut advances = Vec::new();
    for _ in 0..6 {
        let result = svc.submit_move(&mut engine, "e2e4").await.unwrap();
        assert!(result.outcome.is_correct());
        assert!(result.notices.is_empty());
        advances.push(result.advance.unwrap());
    }

    assert_eq!(advances[2], Advance::NextRepeat(SetProgress::new(1, 0)));
    assert_eq!(advances[5], Advance::Finished(SetProgress::new(2, 0)));
    assert_eq!(engine.phase(), SessionPhase::Complete);

    let stored = repo.get_progress(set_id).await.unwrap();
    assert_eq!(stored.progress, SetProgress::new(2, 0));
    assert!(stored.is_complete());

    // a seventh completion is a no-op
    let noop = svc.complete_puzzle(&mut engine).await.unwrap();
    assert_eq!(noop.advance, Advance::AlreadyComplete);
    assert!(matches!(
        svc.submit_move(&mut engine, "e2e4").await,
        Err(SessionError::SetComplete)
    ));

    let rows = repo.list_accuracy(set_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.correct == 3 && r.incorrect == 0));
}

#[tokio::test]
async fn solve_then_fail_finishes_single_repeat() {
    let (repo, set_id) = seeded(&["p1", "p2"], 1).await;
    let svc = training(&repo, Arc::new(repo.clone()), PersistencePolicy::Optimistic);
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let first = engine.current_puzzle_id().unwrap().clone();
    let mut events = Vec::new();
    let solved = svc
        .submit_move_observed(&mut engine, "e2e4", |e| events.push(e))
        .await
        .unwrap();
    assert_eq!(solved.advance, Some(Advance::NextPuzzle(SetProgress::new(0, 1))));
    assert!(matches!(events.as_slice(), [ReplayEvent::OpponentReply { .. }]));
    assert_ne!(engine.current_puzzle_id(), Some(&first));

    let mut events = Vec::new();
    let failed = svc
        .submit_move_observed(&mut engine, "d2d4", |e| events.push(e))
        .await
        .unwrap();
    assert!(matches!(failed.outcome, MoveOutcome::Incorrect { .. }));
    assert_eq!(failed.advance, Some(Advance::Finished(SetProgress::new(1, 0))));

    let replayed: Vec<(usize, String)> = events
        .iter()
        .map(|e| match e {
            ReplayEvent::SolutionPly { ply, mv, .. } => (*ply, moves::to_uci(*mv)),
            ReplayEvent::OpponentReply { .. } => panic!("no reply after a miss"),
        })
        .collect();
    assert_eq!(
        replayed,
        vec![(0, "e2e4".to_string()), (1, "e7e5".to_string())]
    );
    assert!(engine.is_complete());

    let rows = repo.list_accuracy(set_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].correct, rows[0].incorrect), (1, 1));
}

#[tokio::test]
async fn incorrect_move_always_moves_on() {
    let (repo, set_id) = seeded(&["a", "b", "c"], 1).await;
    let svc = training(&repo, Arc::new(repo.clone()), PersistencePolicy::Optimistic);
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let before = engine.current_puzzle_id().unwrap().clone();
    let result = svc.submit_move(&mut engine, "g1f3").await.unwrap();
    assert!(!result.outcome.is_correct());
    assert_eq!(engine.progress(), SetProgress::new(0, 1));
    assert_ne!(engine.current_puzzle_id(), Some(&before));
    assert_eq!(engine.phase(), SessionPhase::Active);
    assert_eq!(engine.state().unwrap().solved_ply(), 0);
}

#[tokio::test]
async fn illegal_move_is_rejected_without_scoring() {
    let (repo, set_id) = seeded(&["a"], 1).await;
    let svc = training(&repo, Arc::new(repo.clone()), PersistencePolicy::Optimistic);
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let err = svc.submit_move(&mut engine, "e1e5").await.unwrap_err();
    assert!(matches!(err, SessionError::IllegalMove(_)));
    assert_eq!(engine.phase(), SessionPhase::Active);
    assert!(repo.list_accuracy(set_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn optimistic_policy_advances_through_write_failures() {
    let (repo, set_id) = seeded(&["a", "b"], 1).await;
    let flaky = Arc::new(FlakyProgress {
        inner: repo.clone(),
        failing: AtomicBool::new(true),
    });
    let svc = training(&repo, flaky.clone(), PersistencePolicy::Optimistic);
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let result = svc.submit_move(&mut engine, "e2e4").await.unwrap();
    assert_eq!(engine.progress(), SetProgress::new(0, 1));
    assert!(matches!(
        result.notices.as_slice(),
        [SessionNotice::PersistenceFailed { operation: "save progress", .. }]
    ));
    assert_eq!(
        repo.get_progress(set_id).await.unwrap().progress,
        SetProgress::default()
    );

    // the next start reconciles and writes the missed progress back
    flaky.failing.store(false, Ordering::SeqCst);
    let (engine, _) = svc.start_session(set_id).await.unwrap();
    assert_eq!(engine.progress(), SetProgress::new(0, 1));
    assert_eq!(
        repo.get_progress(set_id).await.unwrap().progress,
        SetProgress::new(0, 1)
    );
}

#[tokio::test]
async fn strict_policy_holds_until_write_succeeds() {
    let (repo, set_id) = seeded(&["a", "b"], 1).await;
    let flaky = Arc::new(FlakyProgress {
        inner: repo.clone(),
        failing: AtomicBool::new(true),
    });
    let svc = training(&repo, flaky.clone(), PersistencePolicy::Strict);
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let err = svc.submit_move(&mut engine, "e2e4").await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(StorageError::Connection(_))));
    assert_eq!(engine.phase(), SessionPhase::Solved);
    assert_eq!(engine.progress(), SetProgress::default());
    assert!(engine.pending_completion().unwrap().accuracy_recorded);

    flaky.failing.store(false, Ordering::SeqCst);
    let done = svc.complete_puzzle(&mut engine).await.unwrap();
    assert_eq!(done.advance, Advance::NextPuzzle(SetProgress::new(0, 1)));
    assert_eq!(engine.phase(), SessionPhase::Active);

    // the accuracy delta reached the store exactly once
    let rows = repo.list_accuracy(set_id).await.unwrap();
    assert_eq!(rows[0].correct, 1);
    assert_eq!(
        repo.get_progress(set_id).await.unwrap().progress,
        SetProgress::new(0, 1)
    );
}

#[tokio::test]
async fn missing_puzzle_leaves_session_retryable() {
    let repo = InMemoryRepository::new();
    let set_id = repo
        .create_set(
            NewPuzzleSet {
                target_rating: 1400,
                repeats: 1,
                puzzle_ids: vec![PuzzleId::new("late").unwrap()],
            },
            fixed_now(),
        )
        .await
        .unwrap();
    let svc = training(&repo, Arc::new(repo.clone()), PersistencePolicy::Optimistic);

    let (mut engine, notices) = svc.start_session(set_id).await.unwrap();
    assert_eq!(engine.phase(), SessionPhase::AwaitingPuzzle);
    assert!(matches!(
        notices.as_slice(),
        [SessionNotice::PuzzleUnavailable { puzzle_id, .. }] if puzzle_id.as_str() == "late"
    ));
    assert!(matches!(
        svc.submit_move(&mut engine, "e2e4").await,
        Err(SessionError::NoPuzzleLoaded)
    ));

    repo.upsert_puzzle(&short_puzzle("late")).await.unwrap();
    svc.load_current_puzzle(&mut engine).await.unwrap();
    assert_eq!(engine.phase(), SessionPhase::Active);
}

#[tokio::test]
async fn retry_restarts_puzzle_in_place() {
    let repo = InMemoryRepository::new();
    let long = PuzzleRecord::from_uci_line(
        PuzzleId::new("long").unwrap(),
        START,
        "e2e4 e7e5 g1f3 b8c6",
        1500,
    )
    .unwrap();
    repo.upsert_puzzle(&long).await.unwrap();
    let set_id = repo
        .create_set(
            NewPuzzleSet {
                target_rating: 1500,
                repeats: 1,
                puzzle_ids: vec![PuzzleId::new("long").unwrap()],
            },
            fixed_now(),
        )
        .await
        .unwrap();
    let svc = training(&repo, Arc::new(repo.clone()), PersistencePolicy::Optimistic);
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let result = svc.submit_move(&mut engine, "e2e4").await.unwrap();
    assert_eq!(result.advance, None);
    assert_eq!(engine.state().unwrap().solved_ply(), 2);

    svc.retry_puzzle(&mut engine).unwrap();
    assert_eq!(engine.state().unwrap().solved_ply(), 0);
    assert_eq!(engine.progress(), SetProgress::default());

    svc.submit_move(&mut engine, "e2e4").await.unwrap();
    let done = svc.submit_move(&mut engine, "g1f3").await.unwrap();
    assert_eq!(done.advance, Some(Advance::Finished(SetProgress::new(1, 0))));
}

#[tokio::test]
async fn app_services_compose_and_train_in_memory() {
    let storage = Storage::in_memory();
    for (i, rating) in [700_u32, 1100, 1300, 1700, 1900, 2300].iter().enumerate() {
        let puzzle = PuzzleRecord::from_uci_line(
            PuzzleId::new(format!("q{i}")).unwrap(),
            START,
            "e2e4 e7e5",
            *rating,
        )
        .unwrap();
        storage.catalog.upsert_puzzle(&puzzle).await.unwrap();
    }
    let app = AppServices::from_storage(&storage, Clock::fixed(fixed_now()), TrainingConfig::immediate());

    let created = app
        .composer()
        .compose_and_create(
            services::ComposeRequest {
                target_rating: 1500,
                size: 2,
                repeats: 1,
            },
            services::ComposeOptions::default(),
        )
        .await
        .unwrap();
    let set_id = created.set.id();

    let training = app.training();
    let (mut engine, _) = training.start_session(set_id).await.unwrap();
    while !engine.is_complete() {
        training.submit_move(&mut engine, "e2e4").await.unwrap();
    }

    let report = app.accuracy().report(set_id).await.unwrap();
    assert!(report.is_complete);
    assert_eq!(report.cycles[0].correct, 2);
    assert_eq!(report.cycles[0].accuracy_percent, Some(100.0));
}

#[tokio::test]
async fn miss_is_scored_before_the_replay_starts() {
    let (repo, set_id) = seeded_long().await;
    let logged = Arc::new(LoggedAccuracy::new(repo.clone()));
    let svc = paced(&repo, logged.clone(), Clock::fixed(fixed_now()), Duration::from_millis(5));
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let mut seen_at_each_ply = Vec::new();
    let result = svc
        .submit_move_observed(&mut engine, "d2d4", |_| {
            seen_at_each_ply.push(logged.received().len());
        })
        .await
        .unwrap();

    assert!(matches!(result.outcome, MoveOutcome::Incorrect { .. }));
    assert_eq!(seen_at_each_ply, vec![1, 1, 1, 1]);
    // the completion after the replay does not send it again
    assert_eq!(logged.received(), vec![(0, AccuracyDelta::failed(0))]);
    assert!(engine.is_complete());
}

#[tokio::test]
async fn abandoned_replay_still_counts_the_miss() {
    let (repo, set_id) = seeded_long().await;
    let svc = paced(
        &repo,
        Arc::new(repo.clone()),
        Clock::fixed(fixed_now()),
        Duration::from_millis(400),
    );
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    let cut = tokio::time::timeout(
        Duration::from_millis(150),
        svc.submit_move(&mut engine, "d2d4"),
    )
    .await;
    assert!(cut.is_err());
    assert_eq!(engine.phase(), SessionPhase::Replaying);
    assert!(matches!(
        svc.complete_puzzle(&mut engine).await,
        Err(SessionError::PuzzleUnfinished)
    ));
    drop(engine);

    let rows = repo.list_accuracy(set_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].correct, rows[0].incorrect), (0, 1));
    // progress only moves once the replay has been shown
    assert_eq!(
        repo.get_progress(set_id).await.unwrap().progress,
        SetProgress::default()
    );
}

#[tokio::test]
async fn replay_pauses_are_not_solving_time() {
    let (repo, set_id) = seeded_long().await;
    let svc = paced(
        &repo,
        Arc::new(repo.clone()),
        Clock::default_clock(),
        Duration::from_millis(400),
    );
    let (mut engine, _) = svc.start_session(set_id).await.unwrap();

    svc.submit_move(&mut engine, "d2d4").await.unwrap();
    assert!(engine.is_complete());

    let rows = repo.list_accuracy(set_id).await.unwrap();
    assert_eq!(rows[0].incorrect, 1);
    assert_eq!(rows[0].time_taken_secs, 0);
}
