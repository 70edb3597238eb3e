//! UCI move tokens shared by puzzle parsing and the session engine.
//!
//! Solutions are stored and submitted as long-algebraic UCI tokens
//! (`e2e4`, `e7e8q`). Legality is left to the `chess` rules engine; this
//! module only converts between text and `ChessMove`.

use chess::{Board, ChessMove, File, Piece, Rank, Square};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MoveParseError {
    #[error("move token must be 4 or 5 ascii characters: {0:?}")]
    InvalidLength(String),

    #[error("invalid square in move token: {0:?}")]
    InvalidSquare(String),

    #[error("invalid promotion piece in move token: {0:?}")]
    InvalidPromotion(String),
}

/// Parse a single UCI token such as `g1f3` or `a7a8q`.
///
/// # Errors
///
/// Returns `MoveParseError` if the token is malformed. Legality is not checked.
pub fn parse_uci(token: &str) -> Result<ChessMove, MoveParseError> {
    let token = token.trim();
    let bytes = token.as_bytes();
    if !token.is_ascii() || !(bytes.len() == 4 || bytes.len() == 5) {
        return Err(MoveParseError::InvalidLength(token.to_string()));
    }

    let source = parse_square(bytes[0], bytes[1])
        .ok_or_else(|| MoveParseError::InvalidSquare(token.to_string()))?;
    let dest = parse_square(bytes[2], bytes[3])
        .ok_or_else(|| MoveParseError::InvalidSquare(token.to_string()))?;
    let promotion = match bytes.get(4) {
        None => None,
        Some(&b) => Some(
            promotion_piece(b).ok_or_else(|| MoveParseError::InvalidPromotion(token.to_string()))?,
        ),
    };

    Ok(ChessMove::new(source, dest, promotion))
}

/// Parse a whitespace-separated line of UCI tokens.
///
/// # Errors
///
/// Returns the first `MoveParseError` encountered.
pub fn parse_line(line: &str) -> Result<Vec<ChessMove>, MoveParseError> {
    line.split_whitespace().map(parse_uci).collect()
}

/// Render a move as a UCI token (`e7e8q`).
#[must_use]
pub fn to_uci(mv: ChessMove) -> String {
    let mut out = format!(
        "{}{}",
        square_name(mv.get_source()),
        square_name(mv.get_dest())
    );
    if let Some(piece) = mv.get_promotion() {
        out.push(promotion_char(piece));
    }
    out
}

/// Render a sequence of moves as a space-separated UCI line.
#[must_use]
pub fn line_to_uci(moves: &[ChessMove]) -> String {
    moves
        .iter()
        .map(|mv| to_uci(*mv))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Play `moves` from `start`, checking each ply with the rules engine.
///
/// # Errors
///
/// Returns the index of the first illegal ply.
pub fn play_line(start: Board, moves: &[ChessMove]) -> Result<Board, usize> {
    let mut board = start;
    for (ply, mv) in moves.iter().enumerate() {
        if !board.legal(*mv) {
            return Err(ply);
        }
        board = board.make_move_new(*mv);
    }
    Ok(board)
}

/// Two-character name of a square (`e4`).
#[must_use]
pub fn square_name(square: Square) -> String {
    let file = char::from(b'a' + u8::try_from(square.get_file().to_index()).unwrap_or(0));
    let rank = char::from(b'1' + u8::try_from(square.get_rank().to_index()).unwrap_or(0));
    format!("{file}{rank}")
}

fn parse_square(file: u8, rank: u8) -> Option<Square> {
    let file = file.to_ascii_lowercase();
    if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
        return None;
    }
    Some(Square::make_square(
        Rank::from_index(usize::from(rank - b'1')),
        File::from_index(usize::from(file - b'a')),
    ))
}

fn promotion_piece(b: u8) -> Option<Piece> {
    match b.to_ascii_lowercase() {
        b'q' => Some(Piece::Queen),
        b'r' => Some(Piece::Rook),
        b'b' => Some(Piece::Bishop),
        b'n' => Some(Piece::Knight),
        _ => None,
    }
}

fn promotion_char(piece: Piece) -> char {
    match piece {
        Piece::Queen => 'q',
        Piece::Rook => 'r',
        Piece::Bishop => 'b',
        Piece::Knight => 'n',
        Piece::Pawn => 'p',
        Piece::King => 'k',
    }
}
