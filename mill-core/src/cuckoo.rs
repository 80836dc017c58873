//! Cuckoo table of reversible move keys for upcoming-repetition detection.
//!
//! Every reversible move changes the position key by a fixed delta that does
//! not depend on the rest of the board. Storing those deltas lets
//! `Position::has_game_cycle` test whether an earlier position is one move
//! away by XORing two keys and doing two table probes, instead of replaying
//! the history.

use log::debug;

use crate::error::RuleError;
use crate::rule::Rule;
use crate::topology::Topology;
use crate::zobrist::Zobrist;
use crate::{Color, Key, Square};

pub const CUCKOO_SIZE: usize = 8192;

/// Displacements allowed while inserting one entry.
const MAX_KICKS: usize = 512;

#[inline]
pub fn h1(key: Key) -> usize {
    (key & 0x1fff) as usize
}

#[inline]
pub fn h2(key: Key) -> usize {
    ((key >> 16) & 0x1fff) as usize
}

/// Geometric kind of a board move.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum MoveShape {
    /// Between adjacent squares.
    Step,
    /// Between any two squares that are not adjacent.
    Fly,
}

/// Decides which move shapes count as reversible under a rule.
pub type ReversiblePredicate = fn(MoveShape, &Rule) -> bool;

/// Steps can always be walked back. Flights only exist where the rule lets a
/// reduced side fly. Placements consume a hand piece and removals lower the
/// material count, so neither is ever undone by a later move.
pub fn default_reversible(shape: MoveShape, rule: &Rule) -> bool {
    match shape {
        MoveShape::Step => true,
        MoveShape::Fly => rule.allow_fly_when_remain_three_pieces,
    }
}

/// A reversible move stored in the table. `a < b`; the move goes either way.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CuckooMove {
    pub color: Color,
    pub a: Square,
    pub b: Square,
    pub shape: MoveShape,
}

#[derive(Clone, Debug)]
pub struct Cuckoo {
    keys: Vec<Key>,
    moves: Vec<Option<CuckooMove>>,
    len: usize,
}

impl Cuckoo {
    /// Enumerate the reversible moves of the board and insert their deltas.
    pub fn build(
        rule: &Rule,
        topology: &Topology,
        zobrist: &Zobrist,
        reversible: ReversiblePredicate,
    ) -> Result<Self, RuleError> {
        let mut table = Cuckoo {
            keys: vec![0; CUCKOO_SIZE],
            moves: vec![None; CUCKOO_SIZE],
            len: 0,
        };

        for color in Color::both() {
            for a in Square::all() {
                for b in Square::all().filter(|&b| b > a) {
                    let shape = if topology.is_adjacent(a, b) {
                        MoveShape::Step
                    } else {
                        MoveShape::Fly
                    };
                    if !reversible(shape, rule) {
                        continue;
                    }
                    let key = zobrist.stone(color, a) ^ zobrist.stone(color, b) ^ zobrist.side();
                    table.insert(key, CuckooMove { color, a, b, shape })?;
                }
            }
        }

        debug!("cuckoo table: {} reversible moves", table.len);
        Ok(table)
    }

    fn insert(&mut self, mut key: Key, mv: CuckooMove) -> Result<(), RuleError> {
        let mut mv = Some(mv);
        let mut i = h1(key);
        for _ in 0..MAX_KICKS {
            std::mem::swap(&mut self.keys[i], &mut key);
            std::mem::swap(&mut self.moves[i], &mut mv);
            if mv.is_none() {
                self.len += 1;
                return Ok(());
            }
            // Push the evicted entry to its other slot
            i = if i == h1(key) { h2(key) } else { h1(key) };
        }
        Err(RuleError::CuckooOverflow { inserted: self.len })
    }

    /// Find the reversible move whose delta is `move_key`.
    #[inline]
    pub fn probe(&self, move_key: Key) -> Option<CuckooMove> {
        [h1(move_key), h2(move_key)]
            .into_iter()
            .find(|&i| self.keys[i] == move_key && self.moves[i].is_some())
            .and_then(|i| self.moves[i])
    }

    /// Number of stored moves.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(index: usize) -> (Rule, Topology, Zobrist, Cuckoo) {
        let rule = Rule::by_index(index).unwrap();
        let topology = Topology::new(rule.has_oblique_lines);
        let zobrist = Zobrist::default();
        let cuckoo = Cuckoo::build(&rule, &topology, &zobrist, default_reversible).unwrap();
        (rule, topology, zobrist, cuckoo)
    }

    #[test]
    fn test_step_only_count() {
        // 32 edges without diagonals, 40 with, two colours each
        assert_eq!(build(0).3.len(), 64);
        assert_eq!(build(1).3.len(), 80);
    }

    #[test]
    fn test_fly_count() {
        // Every pair of the 24 squares, two colours
        assert_eq!(build(2).3.len(), 2 * 24 * 23 / 2);
    }

    #[test]
    fn test_probe_finds_every_move() {
        let (_, topology, zobrist, cuckoo) = build(2);
        for color in Color::both() {
            for a in Square::all() {
                for b in Square::all().filter(|&b| b > a) {
                    let key = zobrist.stone(color, a) ^ zobrist.stone(color, b) ^ zobrist.side();
                    let mv = cuckoo.probe(key).unwrap();
                    assert_eq!((mv.color, mv.a, mv.b), (color, a, b));
                    let step = topology.is_adjacent(a, b);
                    assert_eq!(mv.shape == MoveShape::Step, step);
                }
            }
        }
    }

    #[test]
    fn test_probe_misses() {
        let (_, _, zobrist, cuckoo) = build(0);
        // Not adjacent, so not in a step-only table
        let key = zobrist.stone(Color::Black, Square(8))
            ^ zobrist.stone(Color::Black, Square(12))
            ^ zobrist.side();
        assert_eq!(cuckoo.probe(key), None);
        assert_eq!(cuckoo.probe(0), None);
    }

    #[test]
    fn test_custom_predicate() {
        let rule = Rule::by_index(0).unwrap();
        let topology = Topology::new(false);
        let zobrist = Zobrist::default();
        let none = Cuckoo::build(&rule, &topology, &zobrist, |_, _| false).unwrap();
        assert!(none.is_empty());
        let all = Cuckoo::build(&rule, &topology, &zobrist, |_, _| true).unwrap();
        assert_eq!(all.len(), 2 * 24 * 23 / 2);
    }
}
