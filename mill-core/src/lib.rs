//! Mill game rules engine with incremental hashing and repetition detection.
//!
//! # Board Layout
//!
//! ```text
//! 31 ----- 24 ----- 25
//! |  23 -- 16 -- 17  |
//! |  |  15-08-09  |  |
//! 30-22-14    10-18-26
//! |  |  13-12-11  |  |
//! |  21 -- 20 -- 19  |
//! 29 ----- 28 ----- 27
//! ```
//!
//! Squares are numbered `file * 8 + rank`. Files 1-3 are the inner, middle
//! and outer rings; ranks 0-7 run clockwise from the top middle point, so
//! even ranks are ring mid-points and odd ranks are corners. Slots 0-7 and
//! 32-39 exist only to keep the arithmetic simple and are never played.
//!
//! # Hash Key (64-bit)
//!
//! ```text
//! Bits 0-55:  XOR of square keys for every stone and banned marker,
//!             XOR the side key when White is to move
//! Bits 56-63: pending removal count
//! ```

pub mod context;
pub mod cuckoo;
pub mod error;
pub mod notation;
pub mod position;
pub mod rule;
pub mod topology;
pub mod zobrist;

#[cfg(feature = "wasm")]
pub mod wasm;

use serde::{Deserialize, Serialize};

pub use context::Context;
pub use error::{ActionError, DecodeError, InvariantError, RuleError};
pub use position::{Position, StateInfo};
pub use rule::Rule;

/// Hash key type.
pub type Key = u64;

/// One bit per square.
pub type Bitboard = u32;

/// Number of square slots, including the unused ones.
pub const SQUARE_NB: usize = 40;

/// Squares actually on the board.
pub const BOARD_SQUARES: usize = 24;

/// Side colour. Black places first.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    White = 1,
}

impl Color {
    /// Get the opponent colour.
    #[inline]
    pub fn opponent(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// Index into per-colour arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn both() -> impl Iterator<Item = Color> {
        [Color::Black, Color::White].into_iter()
    }
}

/// Occupant of a square.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Piece {
    /// A stone; `ordinal` is its 1-based placement index within its colour.
    Stone { color: Color, ordinal: u8 },
    /// A square taken out of play until the moving phase.
    Banned,
}

impl Piece {
    /// Colour of a stone, `None` for a banned marker.
    #[inline]
    pub fn color(self) -> Option<Color> {
        match self {
            Piece::Stone { color, .. } => Some(color),
            Piece::Banned => None,
        }
    }

    /// Row in the key table: 0 black, 1 white, 2 banned.
    #[inline]
    pub fn kind_index(self) -> usize {
        match self {
            Piece::Stone { color, .. } => color.index(),
            Piece::Banned => 2,
        }
    }

    /// Character used in the text encoding and board rendering.
    pub fn to_char(self) -> char {
        match self {
            Piece::Stone { color: Color::Black, .. } => '@',
            Piece::Stone { color: Color::White, .. } => 'O',
            Piece::Banned => 'X',
        }
    }
}

/// Character for a possibly empty square.
pub fn square_char(piece: Option<Piece>) -> char {
    piece.map_or('*', Piece::to_char)
}

/// A square slot (0-39). Only 8-31 are on the board.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Square(pub u8);

impl Square {
    pub const BEGIN: u8 = 8;
    pub const END: u8 = 32;

    /// Create a square from file (1-3) and rank (0-7).
    #[inline]
    pub fn new(file: u8, rank: u8) -> Square {
        debug_assert!((1..=3).contains(&file) && rank < 8);
        Square(file * 8 + rank)
    }

    /// Ring, 1 (inner) to 3 (outer).
    #[inline]
    pub fn file(self) -> u8 {
        self.0 >> 3
    }

    /// Position around the ring, 0-7 clockwise from the top.
    #[inline]
    pub fn rank(self) -> u8 {
        self.0 & 7
    }

    #[inline]
    pub fn is_on_board(self) -> bool {
        (Self::BEGIN..Self::END).contains(&self.0)
    }

    /// Corners sit on odd ranks.
    #[inline]
    pub fn is_corner(self) -> bool {
        self.rank() % 2 == 1
    }

    #[inline]
    pub fn bit(self) -> Bitboard {
        1 << self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterate over the 24 on-board squares.
    pub fn all() -> impl Iterator<Item = Square> {
        (Self::BEGIN..Self::END).map(Square)
    }
}

impl std::fmt::Display for Square {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.file(), self.rank() + 1)
    }
}

/// Iterate over the squares set in a bitboard.
pub fn squares(mut bb: Bitboard) -> impl Iterator<Item = Square> {
    std::iter::from_fn(move || {
        if bb == 0 {
            return None;
        }
        let s = bb.trailing_zeros() as u8;
        bb &= bb - 1;
        Some(Square(s))
    })
}

/// All on-board squares as a bitboard.
pub const BOARD_BB: Bitboard = 0xFFFF_FF00;

// ============================================================================
// GAME FLOW
// ============================================================================

/// Game phase.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum Phase {
    Ready,
    Placing,
    Moving,
    GameOver,
}

impl Phase {
    #[inline]
    pub fn is_playing(self) -> bool {
        matches!(self, Phase::Placing | Phase::Moving)
    }

    #[inline]
    pub fn is_not_playing(self) -> bool {
        !self.is_playing()
    }
}

/// What the side to move is expected to do next.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum Action {
    None,
    Select,
    Place,
    Remove,
}

/// The only (phase, action) combinations a position may be in.
pub fn is_valid_state(phase: Phase, action: Action) -> bool {
    matches!(
        (phase, action),
        (Phase::Ready, Action::Place)
            | (Phase::Placing, Action::Place)
            | (Phase::Placing, Action::Remove)
            | (Phase::Moving, Action::Select)
            | (Phase::Moving, Action::Place)
            | (Phase::Moving, Action::Remove)
            | (Phase::GameOver, Action::None)
    )
}

/// Outcome of a finished game.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum Winner {
    Side(Color),
    Draw,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum GameOverReason {
    LoseLessThanThree,
    LoseNoWay,
    LoseBoardIsFull,
    LoseResign,
    DrawThreefoldRepetition,
    DrawRule50,
    DrawBoardIsFull,
}

// ============================================================================
// MOVES
// ============================================================================

/// A complete step as seen by a search.
///
/// `Slide` covers both adjacent steps and flying; it is the atomic
/// select-then-place of the moving phase.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
pub enum Move {
    Place(Square),
    Slide { from: Square, to: Square },
    Remove(Square),
}

impl Move {
    /// Get the square the move acts on last.
    #[inline]
    pub fn to(&self) -> Square {
        match self {
            Move::Place(to) | Move::Remove(to) => *to,
            Move::Slide { to, .. } => *to,
        }
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Move::Place(s) => write!(f, "{}", s),
            Move::Slide { from, to } => write!(f, "{}->{}", from, to),
            Move::Remove(s) => write!(f, "-{}", s),
        }
    }
}

/// Maximum number of legal moves in any position.
///
/// A flying side with `k` of at most 12 stones has `k * (24 - k)` slides or
/// fewer, which peaks at 12 * 12.
pub const MAX_MOVES: usize = 12 * 12;

/// A fixed-size move list that avoids heap allocation.
#[derive(Clone, Copy)]
pub struct MoveList {
    moves: [Move; MAX_MOVES],
    len: u8,
}

impl MoveList {
    /// Create an empty move list.
    #[inline]
    pub const fn new() -> MoveList {
        MoveList {
            moves: [Move::Place(Square(0)); MAX_MOVES],
            len: 0,
        }
    }

    /// Add a move to the list.
    #[inline]
    pub fn push(&mut self, mov: Move) {
        debug_assert!((self.len as usize) < MAX_MOVES);
        self.moves[self.len as usize] = mov;
        self.len += 1;
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get a move by index.
    #[inline]
    pub const fn get(&self, idx: usize) -> Move {
        self.moves[idx]
    }

    pub fn contains(&self, mov: &Move) -> bool {
        self.iter().any(|m| m == *mov)
    }

    /// Iterate over moves.
    pub fn iter(&self) -> impl Iterator<Item = Move> + '_ {
        self.moves[..self.len as usize].iter().copied()
    }
}

impl Default for MoveList {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MoveList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
