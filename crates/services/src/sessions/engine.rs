use chess::{Board, ChessMove, Square};
use chrono::{DateTime, Utc};
use std::fmt;
use woodpecker_core::model::{
    AccuracyDelta, Advance, PuzzleId, PuzzleRecord, PuzzleSet, SetId, SetProgress, moves,
};
use woodpecker_core::time::elapsed_secs;

use crate::error::SessionError;

//
// ─── PHASES ────────────────────────────────────────────────────────────────────
//

/// Where the engine is in the solve cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, progress not reconciled yet.
    Idle,
    /// Waiting for the current puzzle to be loaded.
    AwaitingPuzzle,
    /// Accepting moves.
    Active,
    /// A wrong move was played; the solution is being shown.
    Replaying,
    /// The last solver move was correct; waiting to advance.
    Solved,
    /// Every cycle has been played.
    Complete,
}

/// Result of one submitted move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move matched the solution. `reply` is the scripted answer that was
    /// played after it, if the line continues.
    Correct {
        reply: Option<ChessMove>,
        solved: bool,
    },
    /// A legal move that is not the solution.
    Incorrect { expected: ChessMove },
}

impl MoveOutcome {
    #[must_use]
    pub fn is_correct(&self) -> bool {
        matches!(self, MoveOutcome::Correct { .. })
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Transient state of the puzzle being solved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    puzzle: PuzzleRecord,
    board: Board,
    solved_ply: usize,
    hint_used: bool,
    started_at: DateTime<Utc>,
    // set by the move that solved or failed the puzzle
    finished_at: Option<DateTime<Utc>>,
    // next solution ply to show while replaying
    replay_ply: usize,
}

impl SessionState {
    fn new(puzzle: PuzzleRecord, started_at: DateTime<Utc>) -> Self {
        Self {
            board: puzzle.starting_board(),
            puzzle,
            solved_ply: 0,
            hint_used: false,
            started_at,
            finished_at: None,
            replay_ply: 0,
        }
    }

    #[must_use]
    pub fn puzzle(&self) -> &PuzzleRecord {
        &self.puzzle
    }

    #[must_use]
    pub fn board(&self) -> Board {
        self.board
    }

    /// Number of solution plies already on the board.
    #[must_use]
    pub fn solved_ply(&self) -> usize {
        self.solved_ply
    }

    #[must_use]
    pub fn hint_used(&self) -> bool {
        self.hint_used
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the deciding move was played; `None` while the puzzle is open.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    fn expected_move(&self) -> Option<ChessMove> {
        self.puzzle.solution().get(self.solved_ply).copied()
    }
}

/// Accuracy and progress effects of finishing the current puzzle.
///
/// Computed once per puzzle and kept until committed, so a retried write
/// sends the same delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuzzleCompletion {
    pub set_id: SetId,
    pub puzzle_id: Option<PuzzleId>,
    pub repeat_index: u32,
    pub solved: bool,
    pub delta: AccuracyDelta,
    pub advance: Advance,
    pub accuracy_recorded: bool,
}

impl PuzzleCompletion {
    /// True when nothing needs to be written.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.advance, Advance::AlreadyComplete)
    }
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Live solving state machine for one puzzle set.
///
/// The engine is synchronous and never touches storage; the training loop
/// feeds it puzzles and persists what it reports.
pub struct SessionEngine {
    set: PuzzleSet,
    phase: SessionPhase,
    state: Option<SessionState>,
    pending: Option<PuzzleCompletion>,
}

impl SessionEngine {
    #[must_use]
    pub fn new(set: PuzzleSet) -> Self {
        Self {
            set,
            phase: SessionPhase::Idle,
            state: None,
            pending: None,
        }
    }

    /// Merge stored progress into the set and leave `Idle`.
    ///
    /// Returns `true` if the in-memory progress is ahead of `stored`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::PuzzleSet` if `stored` does not fit the set.
    pub fn reconcile(&mut self, stored: SetProgress) -> Result<bool, SessionError> {
        let ahead = self.set.reconcile(stored)?;
        self.state = None;
        self.pending = None;
        self.phase = if self.set.is_complete() {
            SessionPhase::Complete
        } else {
            SessionPhase::AwaitingPuzzle
        };
        Ok(ahead)
    }

    #[must_use]
    pub fn set(&self) -> &PuzzleSet {
        &self.set
    }

    #[must_use]
    pub fn set_id(&self) -> SetId {
        self.set.id()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn progress(&self) -> SetProgress {
        self.set.progress()
    }

    #[must_use]
    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Complete
    }

    /// Id of the puzzle the engine expects to be loaded next.
    #[must_use]
    pub fn current_puzzle_id(&self) -> Option<&PuzzleId> {
        self.set.current_puzzle_id()
    }

    /// Completion computed but not yet committed, if any.
    #[must_use]
    pub fn pending_completion(&self) -> Option<&PuzzleCompletion> {
        self.pending.as_ref()
    }

    /// Install the current puzzle and enter `Active`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SetComplete` once the set is complete,
    /// `SessionError::Locked` while a finished puzzle awaits its commit, and
    /// `SessionError::PuzzleMismatch` if `puzzle` is not the current one.
    pub fn load_puzzle(
        &mut self,
        puzzle: PuzzleRecord,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Complete => return Err(SessionError::SetComplete),
            SessionPhase::Replaying | SessionPhase::Solved => return Err(SessionError::Locked),
            SessionPhase::Idle | SessionPhase::AwaitingPuzzle | SessionPhase::Active => {}
        }
        let expected = self
            .set
            .current_puzzle_id()
            .ok_or(SessionError::SetComplete)?;
        if expected != puzzle.id() {
            return Err(SessionError::PuzzleMismatch {
                expected: expected.clone(),
                loaded: puzzle.id().clone(),
            });
        }

        self.state = Some(SessionState::new(puzzle, now));
        self.phase = SessionPhase::Active;
        Ok(())
    }

    /// Check a solver move played at `now` against the solution.
    ///
    /// A correct move is played together with the scripted reply that
    /// follows it. A wrong move leaves the board and `solved_ply` alone and
    /// switches to `Replaying`; the puzzle counts as failed. The time of the
    /// deciding move ends the puzzle's timer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Move` for malformed tokens,
    /// `SessionError::IllegalMove` for moves the position does not allow, and
    /// phase errors when no puzzle is accepting moves. None of these change
    /// any state.
    pub fn submit_move(
        &mut self,
        uci: &str,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, SessionError> {
        self.ensure_active()?;
        let mv = moves::parse_uci(uci)?;
        let state = self.state.as_mut().ok_or(SessionError::NoPuzzleLoaded)?;
        if !state.board.legal(mv) {
            return Err(SessionError::IllegalMove(uci.trim().to_string()));
        }
        let expected = state.expected_move().ok_or(SessionError::Locked)?;

        if mv != expected {
            state.replay_ply = state.solved_ply;
            state.finished_at = Some(now);
            self.phase = SessionPhase::Replaying;
            return Ok(MoveOutcome::Incorrect { expected });
        }

        state.board = state.board.make_move_new(mv);
        state.solved_ply += 1;
        let reply = state.expected_move();
        if let Some(reply) = reply {
            state.board = state.board.make_move_new(reply);
            state.solved_ply += 1;
        }
        state.hint_used = false;

        let solved = state.solved_ply >= state.puzzle.solution().len();
        if solved {
            state.finished_at = Some(now);
            self.phase = SessionPhase::Solved;
        }
        Ok(MoveOutcome::Correct { reply, solved })
    }

    /// Play the next ply of the solution while `Replaying`.
    ///
    /// Returns `None` once the whole line has been shown.
    pub fn next_replay_ply(&mut self) -> Option<ChessMove> {
        if self.phase != SessionPhase::Replaying {
            return None;
        }
        let state = self.state.as_mut()?;
        let mv = state.puzzle.solution().get(state.replay_ply).copied()?;
        state.board = state.board.make_move_new(mv);
        state.replay_ply += 1;
        Some(mv)
    }

    /// True while `Replaying` with solution plies left to show.
    #[must_use]
    pub fn replay_pending(&self) -> bool {
        self.phase == SessionPhase::Replaying
            && self
                .state
                .as_ref()
                .is_some_and(|s| s.replay_ply < s.puzzle.solution().len())
    }

    /// Flag the hint as used. Scoring is unaffected.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoPuzzleLoaded` if no puzzle is active.
    pub fn set_hint_used(&mut self, used: bool) -> Result<(), SessionError> {
        self.ensure_active()?;
        let state = self.state.as_mut().ok_or(SessionError::NoPuzzleLoaded)?;
        state.hint_used = used;
        Ok(())
    }

    /// Destination square of the expected move, once the hint is flagged.
    #[must_use]
    pub fn hint_square(&self) -> Option<Square> {
        if self.phase != SessionPhase::Active {
            return None;
        }
        let state = self.state.as_ref()?;
        if !state.hint_used {
            return None;
        }
        state.expected_move().map(|mv| mv.get_dest())
    }

    /// Start the current puzzle over from its starting position.
    ///
    /// Progress is untouched and the original start time is kept.
    ///
    /// # Errors
    ///
    /// Returns a phase error unless a puzzle is `Active`.
    pub fn retry_puzzle(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        let state = self.state.as_mut().ok_or(SessionError::NoPuzzleLoaded)?;
        state.board = state.puzzle.starting_board();
        state.solved_ply = 0;
        state.replay_ply = 0;
        state.hint_used = false;
        state.finished_at = None;
        Ok(())
    }

    /// Compute the effects of finishing the current puzzle.
    ///
    /// Available as soon as the puzzle is decided, so a failed puzzle can be
    /// scored before its replay is shown. Elapsed time runs up to the
    /// deciding move. The first call fixes the completion; later calls
    /// return it unchanged until it is committed. On a complete set this is
    /// a no-op completion with `Advance::AlreadyComplete`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::PuzzleUnfinished` while the puzzle is still
    /// being played.
    pub fn prepare_completion(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<PuzzleCompletion, SessionError> {
        if let Some(pending) = &self.pending {
            return Ok(pending.clone());
        }
        if self.set.is_complete() {
            return Ok(PuzzleCompletion {
                set_id: self.set.id(),
                puzzle_id: None,
                repeat_index: self.set.progress().repeat_index,
                solved: false,
                delta: AccuracyDelta::default(),
                advance: Advance::AlreadyComplete,
                accuracy_recorded: true,
            });
        }

        let state = self.state.as_ref().ok_or(SessionError::NoPuzzleLoaded)?;
        let solved = match self.phase {
            SessionPhase::Solved => true,
            SessionPhase::Replaying => false,
            _ => return Err(SessionError::PuzzleUnfinished),
        };

        let secs = elapsed_secs(state.started_at, state.finished_at.unwrap_or(now));
        let completion = PuzzleCompletion {
            set_id: self.set.id(),
            puzzle_id: Some(state.puzzle.id().clone()),
            repeat_index: self.set.progress().repeat_index,
            solved,
            delta: if solved {
                AccuracyDelta::solved(secs)
            } else {
                AccuracyDelta::failed(secs)
            },
            advance: self.set.peek_advance(),
            accuracy_recorded: false,
        };
        self.pending = Some(completion.clone());
        Ok(completion)
    }

    /// Note that the pending accuracy delta has reached the store.
    pub fn mark_accuracy_recorded(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            pending.accuracy_recorded = true;
        }
    }

    /// Apply the pending completion: advance progress and drop the puzzle.
    ///
    /// Committing on a complete set is a no-op returning
    /// `Advance::AlreadyComplete`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::PuzzleUnfinished` if nothing was prepared or the
    /// replay still has plies to show.
    pub fn commit_completion(&mut self) -> Result<Advance, SessionError> {
        if self.set.is_complete() {
            self.pending = None;
            self.phase = SessionPhase::Complete;
            return Ok(Advance::AlreadyComplete);
        }
        if self.replay_pending() {
            return Err(SessionError::PuzzleUnfinished);
        }
        if self.pending.take().is_none() {
            return Err(SessionError::PuzzleUnfinished);
        }

        let advance = self.set.advance();
        self.state = None;
        self.phase = if advance.is_complete() {
            SessionPhase::Complete
        } else {
            SessionPhase::AwaitingPuzzle
        };
        Ok(advance)
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Active => Ok(()),
            SessionPhase::Complete => Err(SessionError::SetComplete),
            SessionPhase::Replaying | SessionPhase::Solved => Err(SessionError::Locked),
            SessionPhase::Idle | SessionPhase::AwaitingPuzzle => Err(SessionError::NoPuzzleLoaded),
        }
    }
}

impl fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEngine")
            .field("set_id", &self.set.id())
            .field("phase", &self.phase)
            .field("progress", &self.set.progress())
            .field("puzzle", &self.state.as_ref().map(|s| s.puzzle.id()))
            .field("solved_ply", &self.state.as_ref().map(|s| s.solved_ply))
            .field("pending", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use woodpecker_core::model::NewPuzzleSet;
    use woodpecker_core::time::fixed_now;

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn puzzle(id: &str) -> PuzzleRecord {
        PuzzleRecord::from_uci_line(PuzzleId::new(id).unwrap(), START, "e2e4 e7e5 g1f3 b8c6", 1500)
            .unwrap()
    }

    fn engine(ids: &[&str], repeats: u32) -> SessionEngine {
        let set = PuzzleSet::new(
            SetId::new(1),
            NewPuzzleSet {
                target_rating: 1500,
                repeats,
                puzzle_ids: ids.iter().map(|s| PuzzleId::new(*s).unwrap()).collect(),
            },
            fixed_now(),
        )
        .unwrap();
        let mut engine = SessionEngine::new(set);
        engine.reconcile(SetProgress::default()).unwrap();
        engine
    }

    fn load_current(engine: &mut SessionEngine) {
        let id = engine.current_puzzle_id().unwrap().as_str().to_string();
        engine.load_puzzle(puzzle(&id), fixed_now()).unwrap();
    }

    fn solve_current(engine: &mut SessionEngine) -> Advance {
        load_current(engine);
        engine.submit_move("e2e4", fixed_now()).unwrap();
        engine.submit_move("g1f3", fixed_now()).unwrap();
        engine.prepare_completion(fixed_now()).unwrap();
        engine.commit_completion().unwrap()
    }

    #[test]
    fn correct_moves_play_scripted_replies() {
        let mut engine = engine(&["p1"], 1);
        load_current(&mut engine);

        let outcome = engine.submit_move("e2e4", fixed_now()).unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::Correct {
                reply: Some(moves::parse_uci("e7e5").unwrap()),
                solved: false
            }
        );
        assert_eq!(engine.state().unwrap().solved_ply(), 2);
        assert_eq!(engine.phase(), SessionPhase::Active);

        let outcome = engine.submit_move("g1f3", fixed_now()).unwrap();
        assert!(matches!(outcome, MoveOutcome::Correct { solved: true, .. }));
        assert_eq!(engine.state().unwrap().solved_ply(), 4);
        assert_eq!(engine.phase(), SessionPhase::Solved);
        assert!(matches!(engine.submit_move("a2a3", fixed_now()), Err(SessionError::Locked)));
    }

    #[test]
    fn incorrect_move_keeps_solved_ply_and_replays_remainder() {
        let mut engine = engine(&["p1", "p2"], 1);
        load_current(&mut engine);
        engine.submit_move("e2e4", fixed_now()).unwrap();
        let board_before = engine.state().unwrap().board();

        let outcome = engine.submit_move("d2d4", fixed_now()).unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::Incorrect {
                expected: moves::parse_uci("g1f3").unwrap()
            }
        );
        assert_eq!(engine.state().unwrap().solved_ply(), 2);
        assert_eq!(engine.state().unwrap().board(), board_before);
        assert_eq!(engine.phase(), SessionPhase::Replaying);

        // the miss is scored before the replay is shown
        let completion = engine.prepare_completion(fixed_now()).unwrap();
        assert!(!completion.solved);
        assert_eq!(completion.delta, AccuracyDelta::failed(0));
        assert!(matches!(
            engine.commit_completion(),
            Err(SessionError::PuzzleUnfinished)
        ));

        let replayed: Vec<String> = std::iter::from_fn(|| engine.next_replay_ply())
            .map(moves::to_uci)
            .collect();
        assert_eq!(replayed, vec!["g1f3", "b8c6"]);
        assert_eq!(engine.state().unwrap().solved_ply(), 2);

        let advance = engine.commit_completion().unwrap();
        assert_eq!(advance, Advance::NextPuzzle(SetProgress::new(0, 1)));
        assert_eq!(engine.current_puzzle_id().unwrap().as_str(), "p2");
    }

    #[test]
    fn illegal_and_malformed_moves_change_nothing() {
        let mut engine = engine(&["p1"], 1);
        load_current(&mut engine);

        assert!(matches!(
            engine.submit_move("e2e5", fixed_now()),
            Err(SessionError::IllegalMove(m)) if m == "e2e5"
        ));
        assert!(matches!(engine.submit_move("zz", fixed_now()), Err(SessionError::Move(_))));
        assert_eq!(engine.phase(), SessionPhase::Active);
        assert_eq!(engine.state().unwrap().solved_ply(), 0);
    }

    #[test]
    fn three_by_two_completes_after_six_solves() {
        let mut engine = engine(&["a", "b", "c"], 2);
        let mut advances = Vec::new();
        for _ in 0..6 {
            advances.push(solve_current(&mut engine));
        }
        assert_eq!(advances[2], Advance::NextRepeat(SetProgress::new(1, 0)));
        assert_eq!(advances[5], Advance::Finished(SetProgress::new(2, 0)));
        assert!(engine.is_complete());

        // a seventh completion changes nothing
        let completion = engine.prepare_completion(fixed_now()).unwrap();
        assert!(completion.is_noop());
        assert_eq!(engine.commit_completion().unwrap(), Advance::AlreadyComplete);
        assert_eq!(engine.progress(), SetProgress::new(2, 0));
        assert!(matches!(engine.submit_move("e2e4", fixed_now()), Err(SessionError::SetComplete)));
    }

    #[test]
    fn last_puzzle_rolls_over_to_next_repeat() {
        let mut engine = engine(&["a", "b"], 3);
        solve_current(&mut engine);
        assert_eq!(engine.progress(), SetProgress::new(0, 1));

        let advance = solve_current(&mut engine);
        assert_eq!(advance, Advance::NextRepeat(SetProgress::new(1, 0)));
        assert_eq!(engine.phase(), SessionPhase::AwaitingPuzzle);
        assert_eq!(engine.current_puzzle_id().unwrap().as_str(), "a");
    }

    #[test]
    fn hint_exposes_target_square_without_scoring() {
        let mut engine = engine(&["p1"], 1);
        load_current(&mut engine);
        assert_eq!(engine.hint_square(), None);

        engine.set_hint_used(true).unwrap();
        let square = engine.hint_square().unwrap();
        assert_eq!(moves::square_name(square), "e4");
        assert_eq!(engine.state().unwrap().solved_ply(), 0);
    }

    #[test]
    fn retry_resets_board_but_not_progress() {
        let mut engine = engine(&["p1", "p2"], 1);
        load_current(&mut engine);
        engine.submit_move("e2e4", fixed_now()).unwrap();

        engine.retry_puzzle().unwrap();
        let state = engine.state().unwrap();
        assert_eq!(state.solved_ply(), 0);
        assert_eq!(state.board(), state.puzzle().starting_board());
        assert_eq!(engine.progress(), SetProgress::default());
        assert_eq!(engine.phase(), SessionPhase::Active);
    }

    #[test]
    fn completion_is_fixed_until_committed() {
        let mut engine = engine(&["p1"], 1);
        load_current(&mut engine);
        engine.submit_move("e2e4", fixed_now()).unwrap();
        engine
            .submit_move("g1f3", fixed_now() + Duration::seconds(30))
            .unwrap();

        // time after the deciding move is not solving time
        let first = engine
            .prepare_completion(fixed_now() + Duration::seconds(45))
            .unwrap();
        assert_eq!(first.delta, AccuracyDelta::solved(30));
        engine.mark_accuracy_recorded();

        let again = engine
            .prepare_completion(fixed_now() + Duration::seconds(90))
            .unwrap();
        assert_eq!(again.delta, AccuracyDelta::solved(30));
        assert!(again.accuracy_recorded);
    }

    #[test]
    fn timer_stops_at_the_wrong_move() {
        let mut engine = engine(&["p1"], 1);
        load_current(&mut engine);
        engine
            .submit_move("d2d4", fixed_now() + Duration::seconds(4))
            .unwrap();
        assert_eq!(
            engine.state().unwrap().finished_at(),
            Some(fixed_now() + Duration::seconds(4))
        );
        while engine.next_replay_ply().is_some() {}

        let completion = engine
            .prepare_completion(fixed_now() + Duration::seconds(20))
            .unwrap();
        assert_eq!(completion.delta, AccuracyDelta::failed(4));
    }

    #[test]
    fn wrong_puzzle_is_rejected() {
        let mut engine = engine(&["p1", "p2"], 1);
        let err = engine.load_puzzle(puzzle("p2"), fixed_now()).unwrap_err();
        assert!(matches!(err, SessionError::PuzzleMismatch { .. }));
        assert_eq!(engine.phase(), SessionPhase::AwaitingPuzzle);
    }
}
