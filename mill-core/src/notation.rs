//! Text encoding of a position.
//!
//! ```text
//! @*@*****/********/O******* w p p 2 10 1 11 0 0 2
//! ^ files 1-3, ranks 0-7     ^ side, phase, action, black on board/in hand,
//!                              white on board/in hand, pending, rule50, fullmove
//! ```
//!
//! `fullmove` is `1 + (game_ply - white_to_move) / 2`. `game_ply` counts every
//! step, selections and removals included, so the clock is lossy: decoding
//! sets `game_ply = 2 * (fullmove - 1) + white_to_move`, which only matches
//! the encoder's count while every turn has been a single step. The encoding
//! itself always survives a round trip.

use std::str::FromStr;
use std::sync::Arc;

use crate::context::Context;
use crate::error::DecodeError;
use crate::position::{Position, StateInfo, Step};
use crate::topology::LINES_PER_SQUARE;
use crate::{
    is_valid_state, square_char, Action, Color, GameOverReason, Phase, Piece, Square, Winner,
};

const FIELDS: usize = 11;

fn phase_char(phase: Phase) -> char {
    match phase {
        Phase::Ready => 'r',
        Phase::Placing => 'p',
        Phase::Moving => 'm',
        Phase::GameOver => 'o',
    }
}

fn action_char(action: Action) -> char {
    match action {
        Action::Place => 'p',
        Action::Select => 's',
        Action::Remove => 'r',
        Action::None => 'n',
    }
}

fn token(field: &'static str, value: &str) -> DecodeError {
    DecodeError::Token {
        field,
        value: value.to_string(),
    }
}

fn number<T: FromStr>(field: &'static str, value: &str) -> Result<T, DecodeError> {
    value.parse().map_err(|_| token(field, value))
}

impl Position {
    /// Encode the board, side, state, counts and clocks.
    pub fn fen(&self) -> String {
        let st = self.state();
        let mut board = String::with_capacity(26);
        for f in 1..=3 {
            if f > 1 {
                board.push('/');
            }
            for r in 0..8 {
                board.push(square_char(self.piece_on(Square::new(f, r))));
            }
        }

        let white = (st.side == Color::White) as u32;
        let fullmove = 1 + st.game_ply.saturating_sub(white) / 2;
        format!(
            "{} {} {} {} {} {} {} {} {} {} {}",
            board,
            if white == 1 { 'w' } else { 'b' },
            phase_char(st.phase),
            action_char(st.action),
            st.on_board[0],
            st.in_hand[0],
            st.on_board[1],
            st.in_hand[1],
            st.pending,
            st.rule50,
            fullmove
        )
    }

    /// Decode a position. The result starts a fresh history.
    pub fn from_fen(ctx: Arc<Context>, fen: &str) -> Result<Position, DecodeError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if fields.len() != FIELDS {
            return Err(DecodeError::FieldCount(fields.len()));
        }

        let files: Vec<&str> = fields[0].split('/').collect();
        if files.len() != 3 || files.iter().any(|f| f.chars().count() != 8) {
            return Err(DecodeError::Placement(fields[0].to_string()));
        }
        let mut pieces = Vec::new();
        let mut stones = [0u8; 2];
        let mut bans = 0;
        for (file, chars) in (1..=3).zip(&files) {
            for (rank, c) in (0..8).zip(chars.chars()) {
                let piece = match c {
                    '*' => continue,
                    '@' | 'O' => {
                        let color = if c == '@' { Color::Black } else { Color::White };
                        stones[color.index()] += 1;
                        Piece::Stone {
                            color,
                            ordinal: stones[color.index()],
                        }
                    }
                    'X' => {
                        bans += 1;
                        Piece::Banned
                    }
                    other => return Err(DecodeError::PieceChar(other)),
                };
                pieces.push((Square::new(file, rank), piece));
            }
        }

        let side = match fields[1] {
            "b" => Color::Black,
            "w" => Color::White,
            v => return Err(token("side", v)),
        };
        let phase = match fields[2] {
            "r" => Phase::Ready,
            "p" => Phase::Placing,
            "m" => Phase::Moving,
            "o" => Phase::GameOver,
            v => return Err(token("phase", v)),
        };
        let action = match fields[3] {
            "p" => Action::Place,
            "s" => Action::Select,
            "r" => Action::Remove,
            "n" => Action::None,
            v => return Err(token("action", v)),
        };
        let on_board: [u8; 2] = [
            number("black on board", fields[4])?,
            number("white on board", fields[6])?,
        ];
        let in_hand: [u8; 2] = [
            number("black in hand", fields[5])?,
            number("white in hand", fields[7])?,
        ];
        let pending: u8 = number("pending", fields[8])?;
        let rule50: u32 = number("rule50", fields[9])?;
        let fullmove: u32 = number("fullmove", fields[10])?;

        let rule = &ctx.rule;
        let total = rule.pieces_per_side;
        let mut removed = [0u8; 2];
        for c in Color::both() {
            let i = c.index();
            if stones[i] != on_board[i] {
                return Err(DecodeError::Inconsistent(format!(
                    "{:?} has {} stones on the board but the count says {}",
                    c, stones[i], on_board[i]
                )));
            }
            removed[i] = total
                .checked_sub(on_board[i])
                .and_then(|left| left.checked_sub(in_hand[i]))
                .ok_or_else(|| {
                    DecodeError::Inconsistent(format!(
                        "{:?} has more than {} pieces",
                        c, total
                    ))
                })?;
        }

        if !is_valid_state(phase, action) {
            return Err(DecodeError::Inconsistent(format!(
                "({:?}, {:?}) is not a reachable state",
                phase, action
            )));
        }
        if (action == Action::Remove) != (pending > 0) || pending as usize > LINES_PER_SQUARE {
            return Err(DecodeError::Inconsistent(format!(
                "{} pending removals with action {:?}",
                pending, action
            )));
        }
        if pending > 1 && !rule.allow_remove_multi_pieces_when_close_multi_mill {
            return Err(DecodeError::Inconsistent(format!(
                "{} pending removals under a single-removal rule",
                pending
            )));
        }
        if pending > on_board[side.opponent().index()] {
            return Err(DecodeError::Inconsistent(format!(
                "{} pending removals but only {} opponent stones on the board",
                pending,
                on_board[side.opponent().index()]
            )));
        }
        // A game can end during placing with bans still down
        let bans_allowed = matches!(phase, Phase::Placing | Phase::GameOver);
        if bans > 0 && !(rule.has_banned_locations && bans_allowed) {
            return Err(DecodeError::Inconsistent(
                "banned squares outside the placing phase of a rule that has them".into(),
            ));
        }
        match phase {
            Phase::Ready if !pieces.is_empty() || in_hand != [total, total] => {
                return Err(DecodeError::Inconsistent(
                    "ready position with pieces played".into(),
                ));
            }
            Phase::Ready if side != Color::Black => {
                return Err(DecodeError::Inconsistent(
                    "ready position with White to move".into(),
                ));
            }
            // Covers both hands empty, which play turns into the moving phase
            Phase::Placing if action == Action::Place && in_hand[side.index()] == 0 => {
                return Err(DecodeError::Inconsistent(
                    "placing with nothing in the mover's hand".into(),
                ));
            }
            Phase::Moving if in_hand != [0, 0] => {
                return Err(DecodeError::Inconsistent(
                    "moving phase with pieces in hand".into(),
                ));
            }
            _ => {}
        }

        let white = (side == Color::White) as u32;
        let root = StateInfo {
            rule50,
            plies_from_null: rule50,
            key: 0,
            captured: None,
            repetition: 0,
            turn_start: action != Action::Remove,
            step: Step::Root,
            cleared_bans: 0,
            phase,
            action,
            side,
            selected: None,
            on_board,
            in_hand,
            removed,
            pending,
            game_ply: 2 * (fullmove.max(1) - 1) + white,
            winner: None,
            reason: None,
        };
        let mut pos = Position::from_parts(ctx, &pieces, root);

        if phase == Phase::GameOver {
            if let Some((winner, reason)) = derive_outcome(&pos) {
                let st = pos.st_mut();
                st.winner = Some(winner);
                st.reason = Some(reason);
            }
        }

        pos.validate()?;
        Ok(pos)
    }
}

/// Recover the result of a finished game from the board, where the board
/// shows one. A resignation leaves no trace.
fn derive_outcome(pos: &Position) -> Option<(Winner, GameOverReason)> {
    let rule = pos.rule();
    for c in Color::both() {
        if pos.pieces_on_board(c) + pos.pieces_in_hand(c) < rule.pieces_at_least {
            return Some((Winner::Side(c.opponent()), GameOverReason::LoseLessThanThree));
        }
    }
    if pos.is_board_full() {
        return Some(if rule.is_black_lose_but_not_draw_when_board_full {
            (Winner::Side(Color::White), GameOverReason::LoseBoardIsFull)
        } else {
            (Winner::Draw, GameOverReason::DrawBoardIsFull)
        });
    }
    let max = rule.max_steps_led_to_draw;
    if max > 0 && pos.rule50_count() > max {
        return Some((Winner::Draw, GameOverReason::DrawRule50));
    }
    let side = pos.side_to_move();
    if rule.is_lose_but_not_change_side_when_no_way
        && pos.pieces_in_hand(side) == 0
        && pos.is_all_surrounded(side)
    {
        return Some((Winner::Side(side.opponent()), GameOverReason::LoseNoWay));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;

    fn ctx(index: usize) -> Arc<Context> {
        Context::for_index(index).unwrap()
    }

    fn decode_err(index: usize, fen: &str) -> DecodeError {
        Position::from_fen(ctx(index), fen).unwrap_err()
    }

    #[test]
    fn test_start_position() {
        let pos = Position::new(ctx(1));
        let fen = pos.fen();
        assert_eq!(fen, "********/********/******** b r p 0 12 0 12 0 0 1");
        let back = Position::from_fen(ctx(1), &fen).unwrap();
        assert_eq!(back.key(), 0);
        assert_eq!(back.phase(), Phase::Ready);
    }

    #[test]
    fn test_fullmove_counter() {
        let mut pos = Position::new(ctx(0));
        pos.place(Square(8)).unwrap();
        assert!(pos.fen().ends_with(" 1 1"));
        pos.place(Square(16)).unwrap();
        assert!(pos.fen().ends_with(" 2 2"));
        let back = Position::from_fen(ctx(0), &pos.fen()).unwrap();
        assert_eq!(back.game_ply(), 2);
    }

    #[test]
    fn test_fullmove_clock_is_lossy() {
        let mut pos =
            Position::from_fen(ctx(0), "@***@***/****@O**/**O***O* b m s 3 0 3 0 0 0 20").unwrap();
        assert_eq!(pos.game_ply(), 38);
        pos.select(Square(8)).unwrap();
        pos.place(Square(9)).unwrap();
        assert_eq!(pos.game_ply(), 40);

        let fen = pos.fen();
        assert!(fen.ends_with(" 20"));
        let back = Position::from_fen(ctx(0), &fen).unwrap();
        assert_eq!(back.fen(), fen);
        assert_eq!(back.game_ply(), 39);
    }

    #[test]
    fn test_round_trip_mid_game() {
        let mut pos = Position::new(ctx(1));
        for s in [8, 12, 9, 13, 15] {
            pos.place(Square(s)).unwrap();
        }
        // Pending removal
        let fen = pos.fen();
        assert!(fen.contains(" b p r "));
        let back = Position::from_fen(ctx(1), &fen).unwrap();
        assert_eq!(back.fen(), fen);
        assert_eq!(back.key(), pos.key());
        assert!(!back.state().turn_start);

        // Banned square
        pos.remove(Square(12)).unwrap();
        let fen = pos.fen();
        assert!(fen.starts_with("@@**XO*@/"));
        let back = Position::from_fen(ctx(1), &fen).unwrap();
        assert_eq!(back.key(), pos.key());
        assert_eq!(back.piece_on(Square(12)), Some(Piece::Banned));
    }

    #[test]
    fn test_decoded_place_has_no_selection() {
        let mut pos =
            Position::from_fen(ctx(0), "@***@***/****@O**/**O***O* b m p 3 0 3 0 0 0 20").unwrap();
        assert_eq!(pos.selected(), None);
        assert_eq!(pos.place(Square(9)), Err(ActionError::NothingSelected));
        pos.select(Square(8)).unwrap();
        pos.place(Square(9)).unwrap();
    }

    #[test]
    fn test_gameover_outcome_derived() {
        let pos =
            Position::from_fen(ctx(0), "O@O@O@O*/*O******/******** b o n 3 0 5 0 0 0 21").unwrap();
        assert_eq!(pos.winner(), Some(Winner::Side(Color::White)));
        assert_eq!(pos.gameover_reason(), Some(GameOverReason::LoseNoWay));

        let pos =
            Position::from_fen(ctx(0), "@*@*****/********/O*O*O*** w o n 2 0 3 0 0 7 40").unwrap();
        assert_eq!(pos.winner(), Some(Winner::Side(Color::White)));
        assert_eq!(pos.gameover_reason(), Some(GameOverReason::LoseLessThanThree));
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(decode_err(0, ""), DecodeError::FieldCount(0));
        assert_eq!(
            decode_err(0, "********/******** b r p 0 9 0 9 0 0 1"),
            DecodeError::Placement("********/********".into())
        );
        assert_eq!(
            decode_err(0, "*******/*********/******** b r p 0 9 0 9 0 0 1"),
            DecodeError::Placement("*******/*********/********".into())
        );
        assert_eq!(
            decode_err(0, "Q*******/********/******** b p p 1 8 0 9 0 0 1"),
            DecodeError::PieceChar('Q')
        );
        assert!(matches!(
            decode_err(0, "********/********/******** x r p 0 9 0 9 0 0 1"),
            DecodeError::Token { field: "side", .. }
        ));
        assert!(matches!(
            decode_err(0, "********/********/******** b r p 0 nine 0 9 0 0 1"),
            DecodeError::Token { field: "black in hand", .. }
        ));
    }

    #[test]
    fn test_pending_bounded_by_opponent_stones() {
        let mut rule = crate::Rule::by_index(3).unwrap();
        rule.allow_remove_multi_pieces_when_close_multi_mill = true;
        let multi = Context::new(rule).unwrap();

        let short = "@@*****@/********/O******* b p r 3 9 1 11 2 0 5";
        assert!(matches!(
            Position::from_fen(Arc::clone(&multi), short),
            Err(DecodeError::Inconsistent(_))
        ));
        let pos =
            Position::from_fen(multi, "@@*****@/********/OO****** b p r 3 9 2 10 2 0 5").unwrap();
        assert_eq!(pos.pending_removals(), 2);
        assert_eq!(pos.legal_moves().len(), 2);
    }

    #[test]
    fn test_rejects_inconsistent() {
        let cases = [
            // Count disagrees with the board
            "@*******/********/******** w p p 2 8 0 9 0 0 1",
            // More than nine pieces
            "@*******/********/******** w p p 1 9 0 9 0 0 1",
            // Select while placing
            "@*******/********/******** w p s 1 8 0 9 0 0 1",
            // Remove without pending
            "@*******/********/******** w p r 1 8 0 9 0 0 1",
            // Pending without remove
            "@*******/********/******** w p p 1 8 0 9 1 0 1",
            // Banned square in a rule without bans
            "@X******/********/******** w p p 1 8 0 9 0 0 1",
            // Moving with pieces in hand
            "@*******/********/******** w m s 1 8 0 9 0 0 1",
            // Ready with a stone down
            "@*******/********/******** w r p 1 8 0 9 0 0 1",
            // Ready with White to move
            "********/********/******** w r p 0 9 0 9 0 0 1",
            // Two removals under a single-removal rule
            "@@*@@***/********/OOO***** b p r 4 5 3 6 2 0 5",
            // A removal with no opponent stone on the board
            "@@*@@***/********/******** b p r 4 5 0 7 1 0 5",
            // Placing with both hands empty
            "@O@O@O@O/O@O@O@O@/@O****** b p p 9 0 9 0 0 0 9",
        ];
        for fen in cases {
            assert!(
                matches!(decode_err(0, fen), DecodeError::Inconsistent(_)),
                "accepted {fen}"
            );
        }
    }
}
