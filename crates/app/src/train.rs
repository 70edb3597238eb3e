use std::io::Write;

use chess::{Board, Color, File, Piece, Rank, Square};
use services::{
    AppServices, MoveOutcome, ReplayEvent, SessionEngine, SessionError, SessionNotice,
    SessionPhase, SessionProgress,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use woodpecker_core::model::moves::{square_name, to_uci};
use woodpecker_core::model::{Advance, SetId};

/// What the solver typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Move(String),
    Hint,
    Retry,
    Board,
    Quit,
    Empty,
}

impl Input {
    fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "hint" | "h" => Self::Hint,
            "retry" | "r" => Self::Retry,
            "board" | "b" => Self::Board,
            "quit" | "q" | "exit" => Self::Quit,
            other => Self::Move(other.to_string()),
        }
    }
}

type Prompt = Lines<BufReader<Stdin>>;

/// Interactive drill over one set until it is complete or the solver quits.
pub async fn run_session(
    services: &AppServices,
    set_id: SetId,
) -> Result<(), Box<dyn std::error::Error>> {
    let training = services.training();
    let (mut engine, notices) = training.start_session(set_id).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    print_notices(&notices);
    print_status(&engine);
    if engine.phase() == SessionPhase::Active {
        print_puzzle(&engine);
    }

    loop {
        match engine.phase() {
            SessionPhase::Complete => {
                println!("set {set_id} complete");
                return Ok(());
            }
            SessionPhase::AwaitingPuzzle => {
                let Some(line) = prompt(&mut lines, "puzzle unavailable; enter to retry, q to quit").await?
                else {
                    return Ok(());
                };
                if Input::parse(&line) == Input::Quit {
                    return Ok(());
                }
                match training.load_current_puzzle(&mut engine).await {
                    Ok(()) => print_puzzle(&engine),
                    Err(err) => println!("still unavailable: {err}"),
                }
            }
            SessionPhase::Solved | SessionPhase::Replaying => {
                let Some(line) = prompt(&mut lines, "saving failed; enter to retry, q to quit").await?
                else {
                    return Ok(());
                };
                if Input::parse(&line) == Input::Quit {
                    return Ok(());
                }
                match training.complete_puzzle(&mut engine).await {
                    Ok(result) => {
                        print_notices(&result.notices);
                        after_advance(&engine, result.advance);
                    }
                    Err(err) => println!("{err}"),
                }
            }
            SessionPhase::Active => {
                let Some(line) = prompt(&mut lines, "your move").await? else {
                    return Ok(());
                };
                match Input::parse(&line) {
                    Input::Quit => return Ok(()),
                    Input::Empty => {}
                    Input::Board => print_puzzle(&engine),
                    Input::Hint => {
                        engine.set_hint_used(true)?;
                        match engine.hint_square() {
                            Some(square) => println!("move the piece on {}", square_name(square)),
                            None => println!("no hint available"),
                        }
                    }
                    Input::Retry => {
                        training.retry_puzzle(&mut engine)?;
                        println!("puzzle restarted");
                        print_puzzle(&engine);
                    }
                    Input::Move(uci) => play_move(services, &mut engine, &uci).await?,
                }
            }
            SessionPhase::Idle => {
                training.load_current_puzzle(&mut engine).await?;
                print_puzzle(&engine);
            }
        }
    }
}

async fn play_move(
    services: &AppServices,
    engine: &mut SessionEngine,
    uci: &str,
) -> Result<(), SessionError> {
    let observed = services
        .training()
        .submit_move_observed(engine, uci, |event| match event {
            ReplayEvent::OpponentReply { mv, .. } => println!("opponent plays {}", to_uci(mv)),
            ReplayEvent::SolutionPly { ply, mv, .. } => {
                println!("  solution ply {}: {}", ply + 1, to_uci(mv));
            }
        })
        .await;

    let result = match observed {
        Ok(result) => result,
        Err(SessionError::IllegalMove(_) | SessionError::Move(_)) => {
            println!("not a legal move here: {uci}");
            return Ok(());
        }
        Err(SessionError::Storage(err)) => {
            println!("could not save the result: {err}");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    match result.outcome {
        MoveOutcome::Correct { solved: true, .. } => println!("solved"),
        MoveOutcome::Correct { .. } => println!("correct, keep going"),
        MoveOutcome::Incorrect { expected } => println!("wrong; the move was {}", to_uci(expected)),
    }
    print_notices(&result.notices);
    if let Some(advance) = result.advance {
        after_advance(engine, advance);
    } else if let Some(state) = engine.state() {
        println!("{}", render_board(&state.board(), state.puzzle().solver_color()));
    }
    Ok(())
}

fn after_advance(engine: &SessionEngine, advance: Advance) {
    if let Advance::NextRepeat(progress) = advance {
        println!(
            "cycle done; starting repeat {} of {}",
            progress.repeat_index + 1,
            engine.set().repeats()
        );
    }
    if engine.phase() == SessionPhase::Active {
        print_status(engine);
        print_puzzle(engine);
    }
}

fn print_notices(notices: &[SessionNotice]) {
    for notice in notices {
        match notice {
            SessionNotice::PersistenceFailed { operation, message } => {
                println!("warning: could not {operation}: {message}");
            }
            SessionNotice::PuzzleUnavailable { puzzle_id, message } => {
                println!("warning: puzzle {puzzle_id} unavailable: {message}");
            }
        }
    }
}

fn print_status(engine: &SessionEngine) {
    let p = SessionProgress::from_engine(engine);
    if p.is_complete {
        return;
    }
    println!(
        "set {} | repeat {}/{} | puzzle {}/{} | {}/{} done",
        p.set_id,
        p.repeat_index + 1,
        p.repeats,
        p.puzzle_index + 1,
        p.size,
        p.finished,
        p.total
    );
}

fn print_puzzle(engine: &SessionEngine) {
    let Some(state) = engine.state() else {
        return;
    };
    let puzzle = state.puzzle();
    let side = match puzzle.solver_color() {
        Color::White => "white",
        Color::Black => "black",
    };
    println!(
        "puzzle {} ({}, {}) {side} to move",
        puzzle.id(),
        puzzle.rating(),
        puzzle.band()
    );
    println!("{}", render_board(&state.board(), puzzle.solver_color()));
    println!("fen: {}", state.board());
}

async fn prompt(lines: &mut Prompt, label: &str) -> std::io::Result<Option<String>> {
    print!("{label}> ");
    std::io::stdout().flush()?;
    lines.next_line().await
}

fn piece_char(piece: Piece, color: Color) -> char {
    let c = match piece {
        Piece::Pawn => 'p',
        Piece::Knight => 'n',
        Piece::Bishop => 'b',
        Piece::Rook => 'r',
        Piece::Queen => 'q',
        Piece::King => 'k',
    };
    if color == Color::White {
        c.to_ascii_uppercase()
    } else {
        c
    }
}

/// Text diagram of `board` from `perspective`'s side.
fn render_board(board: &Board, perspective: Color) -> String {
    let ranks: Vec<usize> = match perspective {
        Color::White => (0..8).rev().collect(),
        Color::Black => (0..8).collect(),
    };
    let files: Vec<usize> = match perspective {
        Color::White => (0..8).collect(),
        Color::Black => (0..8).rev().collect(),
    };

    let mut out = String::new();
    for &rank in &ranks {
        out.push_str(&format!("{} ", rank + 1));
        for &file in &files {
            let square = Square::make_square(Rank::from_index(rank), File::from_index(file));
            let c = match (board.piece_on(square), board.color_on(square)) {
                (Some(piece), Some(color)) => piece_char(piece, color),
                _ => '.',
            };
            out.push(' ');
            out.push(c);
        }
        out.push('\n');
    }
    out.push_str("  ");
    for &file in &files {
        out.push(' ');
        out.push(char::from(b'a' + file as u8));
    }
    out
}
