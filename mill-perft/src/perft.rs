//! Iterative perft over the legal-move tree.
//!
//! Each place, slide or removal counts as one ply. Finished games are leaves
//! with no children, so they contribute nothing below their own depth.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;
use mill_core::{ActionError, Move, MoveList, Position};

use crate::stats::RunStats;

/// Stack frame for iterative DFS.
struct Frame {
    /// Legal moves at this node
    moves: MoveList,
    /// Index of next move to explore
    move_idx: usize,
}

impl Frame {
    fn new(moves: MoveList) -> Self {
        Self { moves, move_idx: 0 }
    }

    #[inline]
    fn next_move(&mut self) -> Option<Move> {
        if self.move_idx < self.moves.len() {
            let mov = self.moves.get(self.move_idx);
            self.move_idx += 1;
            Some(mov)
        } else {
            None
        }
    }
}

/// Count leaf nodes `depth` plies below `pos`.
///
/// Returns `Ok(None)` if `running` is cleared; the position is restored
/// either way.
pub fn perft(
    pos: &mut Position,
    depth: u32,
    running: &AtomicBool,
) -> Result<Option<u64>, ActionError> {
    if depth == 0 {
        return Ok(Some(1));
    }
    let depth = depth as usize;
    let mut leaves = 0u64;
    let mut stack: Vec<Frame> = Vec::with_capacity(depth);
    stack.push(Frame::new(pos.legal_moves()));

    loop {
        if !running.load(Ordering::Relaxed) {
            for _ in 1..stack.len() {
                pos.undo()?;
            }
            return Ok(None);
        }

        let len = stack.len();
        let Some(frame) = stack.last_mut() else {
            break;
        };

        if len == depth {
            // Bulk count at the frontier
            leaves += frame.moves.len() as u64;
        } else if let Some(mov) = frame.next_move() {
            pos.do_move(mov)?;
            stack.push(Frame::new(pos.legal_moves()));
            continue;
        }

        stack.pop();
        if !stack.is_empty() {
            pos.undo()?;
        }
    }

    Ok(Some(leaves))
}

/// Leaf count per root move, in root move order.
pub type Divide = Vec<(Move, u64)>;

/// Run perft with the root moves split across `threads` workers.
///
/// Every worker counts applied steps into `nodes`; a progress line is
/// printed every `log_interval_secs`.
pub fn perft_split(
    pos: &Position,
    depth: u32,
    threads: usize,
    running: &AtomicBool,
    nodes: &Arc<AtomicU64>,
    log_interval_secs: u64,
) -> Result<Option<Divide>, ActionError> {
    let root: Vec<(usize, Move)> = pos.legal_moves().iter().enumerate().collect();
    if depth == 0 {
        return Ok(Some(Vec::new()));
    }
    let threads = threads.clamp(1, root.len().max(1));
    debug!("splitting {} root moves over {} threads", root.len(), threads);

    let done = AtomicBool::new(false);
    let results = thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|t| {
                let share: Vec<(usize, Move)> =
                    root.iter().skip(t).step_by(threads).copied().collect();
                let mut local = pos.clone();
                local.set_node_counter(Some(Arc::clone(nodes)));
                scope.spawn(move || -> Result<Option<Vec<(usize, Move, u64)>>, ActionError> {
                    let mut out = Vec::with_capacity(share.len());
                    for (idx, mov) in share {
                        local.do_move(mov)?;
                        let count = perft(&mut local, depth - 1, running)?;
                        local.undo()?;
                        match count {
                            Some(n) => out.push((idx, mov, n)),
                            None => return Ok(None),
                        }
                    }
                    Ok(Some(out))
                })
            })
            .collect();

        scope.spawn(|| {
            let mut stats = RunStats::new("nodes");
            while !done.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(100));
                if stats.should_log(log_interval_secs) {
                    stats.log_progress(nodes.load(Ordering::Relaxed));
                }
            }
        });

        let results: Vec<_> = workers
            .into_iter()
            .map(|w| w.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect();
        done.store(true, Ordering::Relaxed);
        results
    });

    let mut divide = Vec::with_capacity(root.len());
    for result in results {
        match result? {
            Some(part) => divide.extend(part),
            None => return Ok(None),
        }
    }
    divide.sort_by_key(|&(idx, _, _)| idx);
    Ok(Some(divide.into_iter().map(|(_, mov, n)| (mov, n)).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mill_core::Context;

    fn start(index: usize) -> Position {
        Position::new(Context::for_index(index).unwrap())
    }

    #[test]
    fn test_perft_opening() {
        let running = AtomicBool::new(true);
        for index in 0..4 {
            let mut pos = start(index);
            let expected = [1, 24, 24 * 23, 24 * 23 * 22];
            for (depth, &n) in expected.iter().enumerate() {
                assert_eq!(perft(&mut pos, depth as u32, &running).unwrap(), Some(n));
            }
            assert_eq!(pos.history().len(), 1);
        }
    }

    #[test]
    fn test_perft_moving_position() {
        let ctx = Context::for_index(0).unwrap();
        let mut pos =
            Position::from_fen(ctx, "@***@***/****@O**/**O***O* b m s 3 0 3 0 0 0 20").unwrap();
        let fen = pos.fen();
        let running = AtomicBool::new(true);
        assert_eq!(perft(&mut pos, 1, &running).unwrap(), Some(7));
        let deep = perft(&mut pos, 3, &running).unwrap();
        assert!(deep.is_some_and(|n| n > 0));
        assert_eq!(pos.fen(), fen);
    }

    #[test]
    fn test_perft_interrupted() {
        let mut pos = start(1);
        let running = AtomicBool::new(false);
        assert_eq!(perft(&mut pos, 3, &running).unwrap(), None);
        assert_eq!(pos.history().len(), 1);
    }

    #[test]
    fn test_split_matches_single_thread() {
        let mut pos = start(1);
        let running = AtomicBool::new(true);
        let single = perft(&mut pos, 4, &running).unwrap().unwrap();

        let nodes = Arc::new(AtomicU64::new(0));
        let divide = perft_split(&pos, 4, 3, &running, &nodes, 3600).unwrap().unwrap();
        assert_eq!(divide.len(), 24);
        assert_eq!(divide.iter().map(|&(_, n)| n).sum::<u64>(), single);
        assert_eq!(divide[0].0, pos.legal_moves().get(0));
        // Frontier moves are counted in bulk, never applied
        assert_eq!(nodes.load(Ordering::Relaxed), 24 + 24 * 23 + 24 * 23 * 22);
    }
}
