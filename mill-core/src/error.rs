//! Error types.

use thiserror::Error;

use crate::{Action, Color, Key, Phase, Square};

/// Reason a mutating call was rejected. The position is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("game is over")]
    GameOver,
    #[error("not allowed in phase {0:?}")]
    WrongPhase(Phase),
    #[error("position expects action {0:?}")]
    WrongAction(Action),
    #[error("square {0} is not on the board")]
    OffBoard(Square),
    #[error("square {0} is occupied")]
    Occupied(Square),
    #[error("{to} cannot be reached from {from}")]
    NotReachable { from: Square, to: Square },
    #[error("no piece selected")]
    NothingSelected,
    #[error("no pieces left in hand")]
    NoPieceInHand,
    #[error("square {0} does not hold a piece of the side to move")]
    NotOwnPiece(Square),
    #[error("square {0} does not hold an opponent piece")]
    NotOpponentPiece(Square),
    #[error("piece on {0} is in a mill and other pieces can be removed")]
    PieceInMill(Square),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("position has not occurred three times")]
    NotRepeated,
}

/// Malformed position encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected 11 fields, found {0}")]
    FieldCount(usize),
    #[error("placement must be three files of eight squares: {0:?}")]
    Placement(String),
    #[error("unknown piece character {0:?}")]
    PieceChar(char),
    #[error("invalid {field}: {value:?}")]
    Token { field: &'static str, value: String },
    #[error("inconsistent position: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

/// Rule configuration that the board cannot support.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("unknown rule {0:?}")]
    UnknownName(String),
    #[error("rule index {0} out of range")]
    UnknownIndex(usize),
    #[error("{0} pieces per side do not fit on the board")]
    PiecesPerSide(u8),
    #[error("minimum of {at_least} pieces is not below {per_side} pieces per side")]
    PiecesAtLeast { at_least: u8, per_side: u8 },
    #[error("cuckoo table overflow after {inserted} entries")]
    CuckooOverflow { inserted: usize },
}

/// Broken internal consistency found by `Position::validate`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("{color:?}: {on_board} on board + {in_hand} in hand + {removed} removed != {total}")]
    PieceCount {
        color: Color,
        on_board: u8,
        in_hand: u8,
        removed: u8,
        total: u8,
    },
    #[error("board and bitboards disagree on {0}")]
    Bitboard(Square),
    #[error("stored key {stored:016X} != computed {computed:016X}")]
    Key { stored: Key, computed: Key },
    #[error("unreachable state ({0:?}, {1:?})")]
    State(Phase, Action),
    #[error("action {action:?} with {pending} pending removals")]
    Pending { action: Action, pending: u8 },
    #[error("selection {0:?} is not valid here")]
    Selection(Option<Square>),
}
