//! WASM bindings for mill-core
//!
//! Provides a JavaScript-friendly API over `Position`. Squares are passed as
//! their slot numbers (8-31).

use wasm_bindgen::prelude::*;

use crate::{Action, Color, Context, Move, Phase, Position, Square, Winner};

/// WASM-friendly wrapper around Position
#[wasm_bindgen]
pub struct WasmPosition {
    inner: Position,
}

fn js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

#[wasm_bindgen]
impl WasmPosition {
    /// Create a new game for a catalog rule
    #[wasm_bindgen(constructor)]
    pub fn new(rule_index: usize) -> Result<WasmPosition, JsValue> {
        let ctx = Context::for_index(rule_index).map_err(js_error)?;
        Ok(WasmPosition {
            inner: Position::new(ctx),
        })
    }

    /// Decode a position for a catalog rule
    #[wasm_bindgen(js_name = fromFen)]
    pub fn from_fen(rule_index: usize, fen: &str) -> Result<WasmPosition, JsValue> {
        let ctx = Context::for_index(rule_index).map_err(js_error)?;
        let inner = Position::from_fen(ctx, fen).map_err(js_error)?;
        Ok(WasmPosition { inner })
    }

    pub fn fen(&self) -> String {
        self.inner.fen()
    }

    /// Position key as a hex string (u64 does not fit a JS number)
    pub fn key(&self) -> String {
        format!("{:016X}", self.inner.key())
    }

    /// 0 black, 1 white
    #[wasm_bindgen(js_name = sideToMove)]
    pub fn side_to_move(&self) -> u8 {
        self.inner.side_to_move() as u8
    }

    /// "ready", "placing", "moving" or "gameover"
    pub fn phase(&self) -> String {
        match self.inner.phase() {
            Phase::Ready => "ready",
            Phase::Placing => "placing",
            Phase::Moving => "moving",
            Phase::GameOver => "gameover",
        }
        .to_string()
    }

    /// "none", "select", "place" or "remove"
    pub fn action(&self) -> String {
        match self.inner.action() {
            Action::None => "none",
            Action::Select => "select",
            Action::Place => "place",
            Action::Remove => "remove",
        }
        .to_string()
    }

    /// Get game result: "ongoing", "black_wins", "white_wins", or "draw"
    pub fn result(&self) -> String {
        match self.inner.winner() {
            None => "ongoing",
            Some(Winner::Side(Color::Black)) => "black_wins",
            Some(Winner::Side(Color::White)) => "white_wins",
            Some(Winner::Draw) => "draw",
        }
        .to_string()
    }

    /// Stones on the board and in hand as [black_on, black_hand, white_on, white_hand]
    pub fn counts(&self) -> Vec<u8> {
        vec![
            self.inner.pieces_on_board(Color::Black),
            self.inner.pieces_in_hand(Color::Black),
            self.inner.pieces_on_board(Color::White),
            self.inner.pieces_in_hand(Color::White),
        ]
    }

    /// Get legal moves as JSON array
    /// Each move is { kind: "place"|"slide"|"remove", to: n, from: n | null }
    #[wasm_bindgen(js_name = legalMoves)]
    pub fn legal_moves(&self) -> JsValue {
        let moves: Vec<WasmMove> = self.inner.legal_moves().iter().map(WasmMove::from).collect();
        serde_wasm_bindgen::to_value(&moves).unwrap_or(JsValue::NULL)
    }

    /// Returns true if the stone was placed.
    pub fn place(&mut self, square: u8) -> bool {
        self.inner.place(Square(square)).is_ok()
    }

    pub fn select(&mut self, square: u8) -> bool {
        self.inner.select(Square(square)).is_ok()
    }

    #[wasm_bindgen(js_name = movePiece)]
    pub fn move_piece(&mut self, from: u8, to: u8) -> bool {
        self.inner.move_piece(Square(from), Square(to)).is_ok()
    }

    pub fn remove(&mut self, square: u8) -> bool {
        self.inner.remove(Square(square)).is_ok()
    }

    pub fn undo(&mut self) -> bool {
        self.inner.undo().is_ok()
    }

    /// Check if the current position repeats an earlier one
    #[wasm_bindgen(js_name = hasRepeated)]
    pub fn has_repeated(&self) -> bool {
        self.inner.has_repeated()
    }

    /// ASCII board with encoding and key
    pub fn render(&self) -> String {
        self.inner.to_string()
    }
}

/// Serializable move for JavaScript
#[derive(serde::Serialize)]
struct WasmMove {
    kind: &'static str,
    to: u8,
    from: Option<u8>,
}

impl From<Move> for WasmMove {
    fn from(mov: Move) -> Self {
        match mov {
            Move::Place(to) => WasmMove {
                kind: "place",
                to: to.0,
                from: None,
            },
            Move::Slide { from, to } => WasmMove {
                kind: "slide",
                to: to.0,
                from: Some(from.0),
            },
            Move::Remove(to) => WasmMove {
                kind: "remove",
                to: to.0,
                from: None,
            },
        }
    }
}
