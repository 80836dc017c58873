//! Square keys for the position hash.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64;

use crate::{Color, Key, SQUARE_NB};

/// Default generator seed.
pub const DEFAULT_SEED: u64 = 1070372;

/// High bits reserved for the pending removal count.
pub const PENDING_BITS: u32 = 8;
pub const PENDING_SHIFT: u32 = Key::BITS - PENDING_BITS;
/// Bits available to square and side keys.
pub const KEY_MASK: Key = (1 << PENDING_SHIFT) - 1;

fn rand56(rng: &mut Pcg64) -> Key {
    rng.next_u64() & KEY_MASK
}

/// Key table. Rows are black, white and banned.
#[derive(Clone, Debug)]
pub struct Zobrist {
    psq: [[Key; SQUARE_NB]; 3],
    side: Key,
}

impl Zobrist {
    pub fn new(seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let mut psq = [[0; SQUARE_NB]; 3];
        for row in psq.iter_mut() {
            for key in row.iter_mut() {
                *key = rand56(&mut rng);
            }
        }
        let side = rand56(&mut rng);
        Self { psq, side }
    }

    /// Key of a piece kind (see `Piece::kind_index`) on a square.
    #[inline]
    pub fn psq(&self, kind: usize, s: crate::Square) -> Key {
        self.psq[kind][s.index()]
    }

    /// Key of a stone of `color` on `s`.
    #[inline]
    pub fn stone(&self, color: Color, s: crate::Square) -> Key {
        self.psq[color.index()][s.index()]
    }

    /// Toggled in when White is to move.
    #[inline]
    pub fn side(&self) -> Key {
        self.side
    }

    /// Encoded pending removal field.
    #[inline]
    pub fn pending(count: u8) -> Key {
        (count as Key) << PENDING_SHIFT
    }

    /// Replace the pending removal field of `key`.
    #[inline]
    pub fn with_pending(key: Key, count: u8) -> Key {
        (key & KEY_MASK) | Self::pending(count)
    }

    /// Pending removal count stored in `key`.
    #[inline]
    pub fn pending_of(key: Key) -> u8 {
        (key >> PENDING_SHIFT) as u8
    }
}

impl Default for Zobrist {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}
