//! Randomized playouts over every built-in rule.

use std::collections::HashSet;
use std::sync::Arc;

use mill_core::{is_valid_state, Context, Position, Rule};
use rand::Rng;

fn contexts() -> Vec<Arc<Context>> {
    (0..Rule::catalog().len())
        .map(|i| Context::for_index(i).unwrap())
        .collect()
}

/// Play one random game, calling `check` after every step.
fn playout(
    ctx: &Arc<Context>,
    rng: &mut impl Rng,
    max_steps: usize,
    mut check: impl FnMut(&Position),
) -> Position {
    let mut pos = Position::new(Arc::clone(ctx));
    for _ in 0..max_steps {
        let moves = pos.legal_moves();
        if moves.is_empty() {
            break;
        }
        let mov = moves.get(rng.random_range(0..moves.len()));
        pos.do_move(mov).unwrap();
        check(&pos);
    }
    pos
}

#[test]
fn test_playouts_stay_consistent() {
    let mut rng = rand::rng();
    for ctx in contexts() {
        for _ in 0..100 {
            playout(&ctx, &mut rng, 400, |pos| {
                pos.validate().unwrap();
                assert_eq!(pos.key(), pos.compute_key());
                assert!(is_valid_state(pos.phase(), pos.action()));

                let fen = pos.fen();
                let back = Position::from_fen(Arc::clone(&ctx), &fen).unwrap();
                assert_eq!(back.fen(), fen);
                assert_eq!(back.key(), pos.key());
            });
        }
    }
}

#[test]
fn test_finished_games_have_no_moves() {
    let mut rng = rand::rng();
    for ctx in contexts() {
        for _ in 0..100 {
            let pos = playout(&ctx, &mut rng, 2000, |_| {});
            if pos.winner().is_some() {
                assert!(pos.legal_moves().is_empty());
                assert!(pos.gameover_reason().is_some());
            } else {
                assert!(!pos.legal_moves().is_empty());
            }
        }
    }
}

#[test]
fn test_undo_unwinds_whole_game() {
    let mut rng = rand::rng();
    for ctx in contexts() {
        for _ in 0..50 {
            let mut fens = vec![Position::new(Arc::clone(&ctx)).fen()];
            let mut pos = playout(&ctx, &mut rng, 300, |p| fens.push(p.fen()));

            // The last encoding is the current position
            fens.pop();
            while let Some(fen) = fens.pop() {
                pos.undo().unwrap();
                assert_eq!(pos.fen(), fen);
            }
            assert_eq!(pos.history().len(), 1);
            assert_eq!(pos.key(), 0);
            assert!(pos.undo().is_err());
        }
    }
}

#[test]
fn test_apply_undo_fuzz() {
    let mut rng = rand::rng();
    for ctx in contexts() {
        let mut pos = Position::new(Arc::clone(&ctx));
        for _ in 0..2000 {
            let moves = pos.legal_moves();
            if moves.is_empty() {
                pos.reset();
                continue;
            }
            let mov = moves.get(rng.random_range(0..moves.len()));
            let before = pos.state().clone();
            let fen = pos.fen();

            pos.do_move(mov).unwrap();
            pos.undo().unwrap();
            assert_eq!(pos.state(), &before);
            assert_eq!(pos.fen(), fen);

            pos.do_move(mov).unwrap();
        }
    }
}

/// Games whose turn-start keys never repeat must never report a repetition
/// or an upcoming cycle at the root.
#[test]
fn test_no_false_repetitions() {
    let mut rng = rand::rng();
    let ctxs = contexts();
    let mut clean_games = 0;

    for game in 0..10_000 {
        let ctx = &ctxs[game % ctxs.len()];
        let mut keys = HashSet::new();
        let mut repeated = false;
        let mut reported = false;

        playout(ctx, &mut rng, 200, |pos| {
            if !pos.state().turn_start {
                return;
            }
            repeated |= !keys.insert(pos.key());
            reported |= pos.state().repetition != 0 || pos.has_game_cycle(0);
        });

        if !repeated {
            clean_games += 1;
            assert!(!reported, "game {} reported a repetition it never had", game);
        }
    }
    assert!(clean_games > 0);
}
