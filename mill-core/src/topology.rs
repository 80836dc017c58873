//! Adjacency, mill lines and between-sets for a rule's board.

use crate::{Bitboard, Square, SQUARE_NB};

/// Directions a stone can step in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum MoveDirection {
    Clockwise = 0,
    Anticlockwise = 1,
    Inward = 2,
    Outward = 3,
}

impl MoveDirection {
    pub const ALL: [MoveDirection; 4] = [
        MoveDirection::Clockwise,
        MoveDirection::Anticlockwise,
        MoveDirection::Inward,
        MoveDirection::Outward,
    ];
}

/// Up to three lines pass through a square: one radial, up to two along the ring.
pub const LINES_PER_SQUARE: usize = 3;

/// Board graph for one rule. Built once per context.
#[derive(Clone, Debug)]
pub struct Topology {
    adjacent: [[Option<Square>; 4]; SQUARE_NB],
    adjacent_bb: [Bitboard; SQUARE_NB],
    /// For each square, the other two squares of every line through it.
    mills: [[Option<[Square; 2]>; LINES_PER_SQUARE]; SQUARE_NB],
    between: Vec<Bitboard>,
}

impl Topology {
    /// Build the tables. Oblique lines join the corners of the three rings.
    pub fn new(has_oblique_lines: bool) -> Topology {
        let radial = |rank: u8| rank % 2 == 0 || has_oblique_lines;

        let mut adjacent = [[None; 4]; SQUARE_NB];
        let mut adjacent_bb = [0; SQUARE_NB];
        let mut mills = [[None; LINES_PER_SQUARE]; SQUARE_NB];
        let mut between = vec![0; SQUARE_NB * SQUARE_NB];

        for s in Square::all() {
            let (f, r) = (s.file(), s.rank());
            let ring = |offset: u8| Square::new(f, (r + offset) % 8);

            let links = &mut adjacent[s.index()];
            links[MoveDirection::Clockwise as usize] = Some(ring(1));
            links[MoveDirection::Anticlockwise as usize] = Some(ring(7));
            if radial(r) {
                if f > 1 {
                    links[MoveDirection::Inward as usize] = Some(Square::new(f - 1, r));
                }
                if f < 3 {
                    links[MoveDirection::Outward as usize] = Some(Square::new(f + 1, r));
                }
            }
            adjacent_bb[s.index()] = links.iter().flatten().fold(0, |bb, n| bb | n.bit());

            let lines = &mut mills[s.index()];
            if radial(r) {
                let mut others = (1..=3).filter(|&x| x != f).map(|x| Square::new(x, r));
                if let (Some(a), Some(b)) = (others.next(), others.next()) {
                    lines[0] = Some([a, b]);
                }
            }
            if s.is_corner() {
                lines[1] = Some([ring(6), ring(7)]);
                lines[2] = Some([ring(1), ring(2)]);
            } else {
                lines[1] = Some([ring(1), ring(7)]);
            }
        }

        // Only three-point lines have an interior point.
        for f in 1..=3 {
            for r in (0..8).step_by(2) {
                let (a, b) = (Square::new(f, (r + 7) % 8), Square::new(f, (r + 1) % 8));
                let mid = Square::new(f, r).bit();
                between[a.index() * SQUARE_NB + b.index()] = mid;
                between[b.index() * SQUARE_NB + a.index()] = mid;
            }
        }
        for r in (0..8).filter(|&r| radial(r)) {
            let (a, b) = (Square::new(1, r), Square::new(3, r));
            let mid = Square::new(2, r).bit();
            between[a.index() * SQUARE_NB + b.index()] = mid;
            between[b.index() * SQUARE_NB + a.index()] = mid;
        }

        Topology {
            adjacent,
            adjacent_bb,
            mills,
            between,
        }
    }

    /// Neighbour of `s` in direction `d`, if the board has one.
    #[inline]
    pub fn neighbor(&self, s: Square, d: MoveDirection) -> Option<Square> {
        self.adjacent[s.index()][d as usize]
    }

    /// All neighbours of `s`.
    pub fn neighbors(&self, s: Square) -> impl Iterator<Item = Square> + '_ {
        self.adjacent[s.index()].iter().flatten().copied()
    }

    #[inline]
    pub fn adjacent_bb(&self, s: Square) -> Bitboard {
        self.adjacent_bb[s.index()]
    }

    #[inline]
    pub fn is_adjacent(&self, a: Square, b: Square) -> bool {
        self.adjacent_bb[a.index()] & b.bit() != 0
    }

    /// Pairs of squares completing a mill through `s`.
    pub fn mill_lines(&self, s: Square) -> impl Iterator<Item = [Square; 2]> + '_ {
        self.mills[s.index()].iter().flatten().copied()
    }

    /// Squares strictly between `a` and `b` on a shared line; empty otherwise.
    #[inline]
    pub fn between(&self, a: Square, b: Square) -> Bitboard {
        self.between[a.index() * SQUARE_NB + b.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(t: &Topology, s: u8) -> Vec<[u8; 2]> {
        t.mill_lines(Square(s)).map(|[a, b]| [a.0, b.0]).collect()
    }

    #[test]
    fn test_mill_lines_plain() {
        let t = Topology::new(false);
        assert_eq!(lines(&t, 8), vec![[16, 24], [9, 15]]);
        assert_eq!(lines(&t, 9), vec![[15, 8], [10, 11]]);
        assert_eq!(lines(&t, 15), vec![[13, 14], [8, 9]]);
        assert_eq!(lines(&t, 24), vec![[8, 16], [25, 31]]);
        assert_eq!(lines(&t, 31), vec![[29, 30], [24, 25]]);
    }

    #[test]
    fn test_mill_lines_oblique() {
        let t = Topology::new(true);
        assert_eq!(lines(&t, 9), vec![[17, 25], [15, 8], [10, 11]]);
        assert_eq!(lines(&t, 23), vec![[15, 31], [21, 22], [16, 17]]);
        assert_eq!(lines(&t, 16), vec![[8, 24], [17, 23]]);
    }

    #[test]
    fn test_mill_lines_symmetric() {
        for oblique in [false, true] {
            let t = Topology::new(oblique);
            for s in Square::all() {
                for [a, b] in t.mill_lines(s) {
                    assert!(t.mill_lines(a).any(|l| l.contains(&s) && l.contains(&b)));
                }
            }
        }
    }

    #[test]
    fn test_adjacency() {
        let t = Topology::new(false);
        assert_eq!(t.neighbor(Square(8), MoveDirection::Clockwise), Some(Square(9)));
        assert_eq!(t.neighbor(Square(8), MoveDirection::Anticlockwise), Some(Square(15)));
        assert_eq!(t.neighbor(Square(8), MoveDirection::Inward), None);
        assert_eq!(t.neighbor(Square(8), MoveDirection::Outward), Some(Square(16)));
        assert_eq!(t.neighbors(Square(16)).count(), 4);
        assert_eq!(t.neighbors(Square(9)).count(), 2);

        let t = Topology::new(true);
        assert_eq!(t.neighbors(Square(17)).count(), 4);
        assert!(t.is_adjacent(Square(9), Square(17)));
        assert!(!t.is_adjacent(Square(9), Square(25)));
    }

    #[test]
    fn test_adjacency_symmetric() {
        for oblique in [false, true] {
            let t = Topology::new(oblique);
            let mut edges = 0;
            for s in Square::all() {
                for n in t.neighbors(s) {
                    assert!(t.is_adjacent(n, s));
                    edges += 1;
                }
            }
            assert_eq!(edges / 2, if oblique { 40 } else { 32 });
        }
    }

    #[test]
    fn test_between() {
        let t = Topology::new(false);
        assert_eq!(t.between(Square(15), Square(9)), Square(8).bit());
        assert_eq!(t.between(Square(8), Square(24)), Square(16).bit());
        assert_eq!(t.between(Square(8), Square(9)), 0);
        assert_eq!(t.between(Square(9), Square(25)), 0);
        assert_eq!(Topology::new(true).between(Square(25), Square(9)), Square(17).bit());
    }
}
