//! Rule variants.

use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::BOARD_SQUARES;

/// Index of the rule used when none is given.
pub const DEFAULT_RULE_INDEX: usize = 1;

/// An immutable game variant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub description: String,
    /// 9 or 12.
    pub pieces_per_side: u8,
    /// A side whose stones on board plus in hand drop below this loses.
    pub pieces_at_least: u8,
    pub has_oblique_lines: bool,
    /// Squares emptied by a removal during placing stay blocked until moving.
    pub has_banned_locations: bool,
    /// White (the side that placed last) opens the moving phase.
    pub is_defender_move_first: bool,
    pub allow_remove_multi_pieces_when_close_multi_mill: bool,
    pub allow_remove_piece_in_mill: bool,
    pub is_black_lose_but_not_draw_when_board_full: bool,
    /// When false, a side with no move passes instead of losing.
    pub is_lose_but_not_change_side_when_no_way: bool,
    pub allow_fly_when_remain_three_pieces: bool,
    /// Completed turns without a removal before a draw; 0 disables.
    pub max_steps_led_to_draw: u32,
}

impl Rule {
    /// The built-in variants.
    pub fn catalog() -> Vec<Rule> {
        vec![
            Rule {
                name: "Cheng San Qi".into(),
                description: "9 pieces each. A mill removes one enemy piece; pieces in mills \
                              are protected unless nothing else can be taken. Pieces step to \
                              adjacent points only; a side with no move loses."
                    .into(),
                pieces_per_side: 9,
                pieces_at_least: 3,
                has_oblique_lines: false,
                has_banned_locations: false,
                is_defender_move_first: false,
                allow_remove_multi_pieces_when_close_multi_mill: false,
                allow_remove_piece_in_mill: false,
                is_black_lose_but_not_draw_when_board_full: true,
                is_lose_but_not_change_side_when_no_way: true,
                allow_fly_when_remain_three_pieces: false,
                max_steps_led_to_draw: 0,
            },
            Rule {
                name: "Da San Qi".into(),
                description: "12 pieces each on a board with diagonals. Points emptied by a \
                              removal while placing stay blocked until moving starts. A full \
                              board loses for the first player. The last to place moves first."
                    .into(),
                pieces_per_side: 12,
                pieces_at_least: 3,
                has_oblique_lines: true,
                has_banned_locations: true,
                is_defender_move_first: true,
                allow_remove_multi_pieces_when_close_multi_mill: false,
                allow_remove_piece_in_mill: true,
                is_black_lose_but_not_draw_when_board_full: true,
                is_lose_but_not_change_side_when_no_way: true,
                allow_fly_when_remain_three_pieces: false,
                max_steps_led_to_draw: 50,
            },
            Rule {
                name: "Nine Men's Morris".into(),
                description: "As Cheng San Qi, but a side reduced to three pieces may fly to \
                              any empty point."
                    .into(),
                pieces_per_side: 9,
                pieces_at_least: 3,
                has_oblique_lines: false,
                has_banned_locations: false,
                is_defender_move_first: false,
                allow_remove_multi_pieces_when_close_multi_mill: false,
                allow_remove_piece_in_mill: false,
                is_black_lose_but_not_draw_when_board_full: true,
                is_lose_but_not_change_side_when_no_way: true,
                allow_fly_when_remain_three_pieces: true,
                max_steps_led_to_draw: 0,
            },
            Rule {
                name: "Twelve Men's Morris".into(),
                description: "12 pieces each on a board with diagonals. A full board loses \
                              for the first player."
                    .into(),
                pieces_per_side: 12,
                pieces_at_least: 3,
                has_oblique_lines: true,
                has_banned_locations: false,
                is_defender_move_first: false,
                allow_remove_multi_pieces_when_close_multi_mill: false,
                allow_remove_piece_in_mill: false,
                is_black_lose_but_not_draw_when_board_full: true,
                is_lose_but_not_change_side_when_no_way: true,
                allow_fly_when_remain_three_pieces: false,
                max_steps_led_to_draw: 50,
            },
        ]
    }

    pub fn by_index(index: usize) -> Result<Rule, RuleError> {
        Self::catalog()
            .into_iter()
            .nth(index)
            .ok_or(RuleError::UnknownIndex(index))
    }

    /// Look up a variant by name, ignoring ASCII case.
    pub fn by_name(name: &str) -> Result<Rule, RuleError> {
        Self::catalog()
            .into_iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| RuleError::UnknownName(name.to_string()))
    }

    /// Position of this rule in the catalog, if it is a built-in one.
    pub fn catalog_index(&self) -> Option<usize> {
        Self::catalog().iter().position(|r| r == self)
    }

    /// Reject configurations the 24-point board cannot hold.
    pub fn validate(&self) -> Result<(), RuleError> {
        let per_side = self.pieces_per_side;
        if per_side == 0 || 2 * per_side as usize > BOARD_SQUARES {
            return Err(RuleError::PiecesPerSide(per_side));
        }
        if self.pieces_at_least == 0 || self.pieces_at_least >= per_side {
            return Err(RuleError::PiecesAtLeast {
                at_least: self.pieces_at_least,
                per_side,
            });
        }
        Ok(())
    }
}

impl Default for Rule {
    fn default() -> Self {
        // Catalog entries are fixed, so the default index always exists.
        Self::catalog().swap_remove(DEFAULT_RULE_INDEX)
    }
}
