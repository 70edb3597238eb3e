use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chess::{Board, ChessMove};
use storage::repository::{AccuracyStore, ProgressStore, PuzzleCatalog, SetStore};
use woodpecker_core::model::{Advance, PuzzleId, SetId, SetProgress};

use super::engine::{MoveOutcome, SessionEngine, SessionState};
use crate::Clock;
use crate::config::{PersistencePolicy, TrainingConfig};
use crate::error::SessionError;

/// Transient problems the UI should mention without stopping the drill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A store write failed; the in-memory session moved on anyway.
    PersistenceFailed {
        operation: &'static str,
        message: String,
    },
    /// The next puzzle could not be fetched; `load_current_puzzle` retries.
    PuzzleUnavailable { puzzle_id: PuzzleId, message: String },
}

/// A ply played automatically by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEvent {
    /// Scripted answer to a correct move.
    OpponentReply { mv: ChessMove, board: Board },
    /// One ply of the solution shown after a wrong move.
    SolutionPly { ply: usize, mv: ChessMove, board: Board },
}

/// Result of submitting a move through the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub outcome: MoveOutcome,
    /// Set when the move finished the puzzle.
    pub advance: Option<Advance>,
    pub notices: Vec<SessionNotice>,
}

/// Result of finishing a puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub advance: Advance,
    pub notices: Vec<SessionNotice>,
}

/// Drives a `SessionEngine` against the stores: loads puzzles, paces the
/// automatic plies and persists accuracy and progress.
#[derive(Clone)]
pub struct TrainingLoopService {
    clock: Clock,
    config: TrainingConfig,
    catalog: Arc<dyn PuzzleCatalog>,
    sets: Arc<dyn SetStore>,
    progress: Arc<dyn ProgressStore>,
    accuracy: Arc<dyn AccuracyStore>,
    local_progress: Arc<Mutex<HashMap<SetId, SetProgress>>>,
}

impl TrainingLoopService {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: TrainingConfig,
        catalog: Arc<dyn PuzzleCatalog>,
        sets: Arc<dyn SetStore>,
        progress: Arc<dyn ProgressStore>,
        accuracy: Arc<dyn AccuracyStore>,
    ) -> Self {
        Self {
            clock,
            config,
            catalog,
            sets,
            progress,
            accuracy,
            local_progress: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Open a set for training.
    ///
    /// Stored progress is merged with whatever this process last saw for the
    /// set; the further of the two wins and is written back if the store was
    /// behind. The current puzzle is loaded best effort: if the catalog fails
    /// the engine stays in `AwaitingPuzzle` and a
    /// `SessionNotice::PuzzleUnavailable` is returned alongside it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the set cannot be read, or if
    /// progress cannot be read under the strict policy.
    pub async fn start_session(
        &self,
        set_id: SetId,
    ) -> Result<(SessionEngine, Vec<SessionNotice>), SessionError> {
        let set = self.sets.get_set(set_id).await?;
        let mut engine = SessionEngine::new(set);

        let stored = match self.progress.get_progress(set_id).await {
            Ok(snapshot) => snapshot.progress,
            Err(err) if self.config.persistence == PersistencePolicy::Optimistic => {
                log::warn!("reading progress of set {set_id} failed: {err}");
                engine.progress()
            }
            Err(err) => return Err(err.into()),
        };

        engine.reconcile(stored)?;
        if let Some(local) = self.cached_progress(set_id) {
            engine.reconcile(local)?;
        }

        if engine.progress() > stored {
            log::info!(
                "store is behind for set {set_id}; writing {:?}",
                engine.progress()
            );
            if let Err(err) = self.progress.set_progress(set_id, engine.progress()).await {
                log::warn!("re-persisting progress of set {set_id} failed: {err}");
            }
        }
        self.remember_progress(set_id, engine.progress());

        let mut notices = Vec::new();
        if !engine.is_complete() {
            self.load_or_notice(&mut engine, &mut notices).await;
        }
        Ok((engine, notices))
    }

    /// Fetch the set's current puzzle into the engine.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Catalog` if the puzzle cannot be fetched; the
    /// engine is left in `AwaitingPuzzle`.
    pub async fn load_current_puzzle(&self, engine: &mut SessionEngine) -> Result<(), SessionError> {
        let Some(puzzle_id) = engine.current_puzzle_id().cloned() else {
            return Err(SessionError::SetComplete);
        };
        match self.catalog.get_by_id(&puzzle_id).await {
            Ok(puzzle) => engine.load_puzzle(puzzle, self.clock.now()),
            Err(err) => {
                log::warn!("loading puzzle {puzzle_id} failed: {err}");
                Err(err.into())
            }
        }
    }

    /// Submit a solver move, discarding automatic plies.
    ///
    /// # Errors
    ///
    /// See [`TrainingLoopService::submit_move_observed`].
    pub async fn submit_move(
        &self,
        engine: &mut SessionEngine,
        uci: &str,
    ) -> Result<MoveResult, SessionError> {
        self.submit_move_observed(engine, uci, |_| {}).await
    }

    /// Submit a solver move and run the transition to completion.
    ///
    /// `observer` sees each automatic ply after its pause: the scripted reply
    /// to a correct move, or every remaining solution ply after a wrong one.
    /// A wrong move is scored before the first replay ply. A finished puzzle
    /// is completed and the next one loaded before this returns.
    ///
    /// # Errors
    ///
    /// Returns the engine's move errors unchanged. Under the strict policy a
    /// failed write is returned after the move was accepted; the engine then
    /// waits in `Solved`/`Replaying` and `complete_puzzle` retries the write.
    pub async fn submit_move_observed<F>(
        &self,
        engine: &mut SessionEngine,
        uci: &str,
        mut observer: F,
    ) -> Result<MoveResult, SessionError>
    where
        F: FnMut(ReplayEvent) + Send,
    {
        let outcome = engine.submit_move(uci, self.clock.now())?;

        match outcome {
            MoveOutcome::Correct { reply, solved } => {
                if let Some(mv) = reply {
                    pause(self.config.reply_pause).await;
                    if let Some(board) = engine.state().map(SessionState::board) {
                        observer(ReplayEvent::OpponentReply { mv, board });
                    }
                }
                if !solved {
                    return Ok(MoveResult {
                        outcome,
                        advance: None,
                        notices: Vec::new(),
                    });
                }
            }
            MoveOutcome::Incorrect { .. } => {
                self.record_miss(engine).await?;
                let mut ply = engine.state().map_or(0, SessionState::solved_ply);
                while engine.replay_pending() {
                    pause(self.config.replay_pause).await;
                    let Some(mv) = engine.next_replay_ply() else {
                        break;
                    };
                    if let Some(board) = engine.state().map(SessionState::board) {
                        observer(ReplayEvent::SolutionPly { ply, mv, board });
                    }
                    ply += 1;
                }
            }
        }

        let completed = self.complete_puzzle(engine).await?;
        Ok(MoveResult {
            outcome,
            advance: Some(completed.advance),
            notices: completed.notices,
        })
    }

    /// Record the finished puzzle and move to the next one.
    ///
    /// On a complete set this is a no-op returning `Advance::AlreadyComplete`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::PuzzleUnfinished` if the puzzle is still in
    /// play or its replay has plies left, and store errors under the strict
    /// policy.
    pub async fn complete_puzzle(
        &self,
        engine: &mut SessionEngine,
    ) -> Result<CompletionResult, SessionError> {
        if engine.replay_pending() {
            return Err(SessionError::PuzzleUnfinished);
        }
        let completion = engine.prepare_completion(self.clock.now())?;
        if completion.is_noop() {
            let advance = engine.commit_completion()?;
            return Ok(CompletionResult {
                advance,
                notices: Vec::new(),
            });
        }

        let set_id = completion.set_id;
        let mut notices = Vec::new();
        let advance = match self.config.persistence {
            PersistencePolicy::Strict => {
                if !completion.accuracy_recorded {
                    self.accuracy
                        .increment(set_id, completion.repeat_index, completion.delta)
                        .await
                        .inspect_err(|err| log::warn!("accuracy write for set {set_id} failed: {err}"))?;
                    engine.mark_accuracy_recorded();
                }
                if let Some(progress) = completion.advance.progress() {
                    self.progress
                        .set_progress(set_id, progress)
                        .await
                        .inspect_err(|err| log::warn!("progress write for set {set_id} failed: {err}"))?;
                }
                engine.commit_completion()?
            }
            PersistencePolicy::Optimistic => {
                let advance = engine.commit_completion()?;
                if !completion.accuracy_recorded {
                    if let Err(err) = self
                        .accuracy
                        .increment(set_id, completion.repeat_index, completion.delta)
                        .await
                    {
                        log::warn!("accuracy write for set {set_id} failed: {err}");
                        notices.push(SessionNotice::PersistenceFailed {
                            operation: "record accuracy",
                            message: err.to_string(),
                        });
                    }
                }
                if let Some(progress) = advance.progress() {
                    if let Err(err) = self.progress.set_progress(set_id, progress).await {
                        log::warn!("progress write for set {set_id} failed: {err}");
                        notices.push(SessionNotice::PersistenceFailed {
                            operation: "save progress",
                            message: err.to_string(),
                        });
                    }
                }
                advance
            }
        };
        self.remember_progress(set_id, engine.progress());

        match advance {
            Advance::NextRepeat(p) => log::info!("set {set_id} starts repeat {}", p.repeat_index + 1),
            Advance::Finished(_) => log::info!("set {set_id} complete"),
            Advance::NextPuzzle(_) | Advance::AlreadyComplete => {}
        }

        if !engine.is_complete() {
            self.load_or_notice(engine, &mut notices).await;
        }

        Ok(CompletionResult { advance, notices })
    }

    /// Send the `incorrect` increment for a missed puzzle before its replay.
    ///
    /// A failed write is left pending; `complete_puzzle` resends it once the
    /// replay is over.
    async fn record_miss(&self, engine: &mut SessionEngine) -> Result<(), SessionError> {
        let completion = engine.prepare_completion(self.clock.now())?;
        if completion.is_noop() || completion.accuracy_recorded {
            return Ok(());
        }
        let set_id = completion.set_id;
        match self
            .accuracy
            .increment(set_id, completion.repeat_index, completion.delta)
            .await
        {
            Ok(_) => engine.mark_accuracy_recorded(),
            Err(err) => log::warn!("accuracy write for set {set_id} failed, retrying after replay: {err}"),
        }
        Ok(())
    }

    async fn load_or_notice(&self, engine: &mut SessionEngine, notices: &mut Vec<SessionNotice>) {
        if let Err(err) = self.load_current_puzzle(engine).await {
            if let Some(puzzle_id) = engine.current_puzzle_id().cloned() {
                notices.push(SessionNotice::PuzzleUnavailable {
                    puzzle_id,
                    message: err.to_string(),
                });
            }
        }
    }

    /// Restart the current puzzle without touching progress.
    ///
    /// # Errors
    ///
    /// Returns a phase error unless a puzzle is active.
    pub fn retry_puzzle(&self, engine: &mut SessionEngine) -> Result<(), SessionError> {
        engine.retry_puzzle()
    }

    fn cached_progress(&self, set_id: SetId) -> Option<SetProgress> {
        self.local_progress
            .lock()
            .ok()
            .and_then(|map| map.get(&set_id).copied())
    }

    fn remember_progress(&self, set_id: SetId, progress: SetProgress) {
        if let Ok(mut map) = self.local_progress.lock() {
            let entry = map.entry(set_id).or_default();
            *entry = (*entry).max(progress);
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
