//! Randomized playouts that cross-check the engine against itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use mill_core::{
    ActionError, Color, Context, DecodeError, GameOverReason, InvariantError, Key, Position, Winner,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::stats::RunStats;

#[derive(Debug, Error)]
pub enum SoakError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    #[error("game {game} ply {ply}: stored key {stored:016X}, recomputed {computed:016X}")]
    KeyMismatch {
        game: u64,
        ply: u32,
        stored: Key,
        computed: Key,
    },
    #[error("game {game} ply {ply}: {fen} does not survive an encode/decode round trip")]
    RoundTrip { game: u64, ply: u32, fen: String },
    #[error("game {game} ply {ply}: undo did not restore {fen}")]
    Undo { game: u64, ply: u32, fen: String },
}

#[derive(Debug, Clone)]
pub struct SoakConfig {
    pub games: u64,
    pub seed: u64,
    /// Playouts still running after this many steps are abandoned.
    pub max_steps: u32,
    pub log_interval_secs: u64,
}

/// Outcome counts over a soak run.
#[derive(Debug, Default)]
pub struct Tally {
    pub games: u64,
    pub steps: u64,
    pub black_wins: u64,
    pub white_wins: u64,
    pub draws: u64,
    pub unfinished: u64,
    pub reasons: HashMap<GameOverReason, u64>,
    /// Turn starts carrying a repetition marker.
    pub repetitions: u64,
    /// Turn starts where `has_game_cycle(0)` held.
    pub cycles: u64,
}

impl Tally {
    fn record(&mut self, pos: &Position) {
        match pos.winner() {
            Some(Winner::Side(Color::Black)) => self.black_wins += 1,
            Some(Winner::Side(Color::White)) => self.white_wins += 1,
            Some(Winner::Draw) => self.draws += 1,
            None => self.unfinished += 1,
        }
        if let Some(reason) = pos.gameover_reason() {
            *self.reasons.entry(reason).or_default() += 1;
        }
    }

    pub fn print_summary(&self) {
        println!("Games: {}", self.games);
        println!("Steps: {}", self.steps);
        println!("  - Black wins: {}", self.black_wins);
        println!("  - White wins: {}", self.white_wins);
        println!("  - Draws: {}", self.draws);
        println!("  - Unfinished: {}", self.unfinished);
        let mut reasons: Vec<_> = self.reasons.iter().collect();
        reasons.sort_by_key(|&(_, &n)| std::cmp::Reverse(n));
        for (reason, n) in reasons {
            println!("    {:?}: {}", reason, n);
        }
        println!("Repetition markers: {}", self.repetitions);
        println!("Upcoming cycles: {}", self.cycles);
    }
}

/// Play `cfg.games` random games, checking after every step that the key,
/// the text encoding and undo agree with the position.
pub fn run(
    ctx: Arc<Context>,
    cfg: &SoakConfig,
    running: &AtomicBool,
) -> Result<Tally, SoakError> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut tally = Tally::default();
    let mut stats = RunStats::new("games");
    info!("soak: {} games of {:?}, seed {}", cfg.games, ctx.rule.name, cfg.seed);

    for game in 0..cfg.games {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let mut pos = Position::new(Arc::clone(&ctx));

        for _ in 0..cfg.max_steps {
            let moves = pos.legal_moves();
            if moves.is_empty() {
                break;
            }
            let mov = moves.get(rng.random_range(0..moves.len()));
            let before = pos.fen();

            pos.do_move(mov)?;
            tally.steps += 1;
            check_step(&ctx, &pos, game)?;

            // Step back and forward again
            pos.undo()?;
            if pos.fen() != before {
                return Err(SoakError::Undo {
                    game,
                    ply: pos.game_ply(),
                    fen: before,
                });
            }
            pos.do_move(mov)?;

            if pos.state().turn_start {
                if pos.state().repetition != 0 {
                    tally.repetitions += 1;
                }
                if pos.has_game_cycle(0) {
                    tally.cycles += 1;
                }
            }
        }

        debug!("game {} ended after ply {}: {:?}", game, pos.game_ply(), pos.winner());
        tally.games += 1;
        tally.record(&pos);
        if stats.should_log(cfg.log_interval_secs) {
            stats.log_progress(tally.games);
        }
    }

    Ok(tally)
}

fn check_step(ctx: &Arc<Context>, pos: &Position, game: u64) -> Result<(), SoakError> {
    pos.validate()?;
    let ply = pos.game_ply();
    let computed = pos.compute_key();
    if computed != pos.key() {
        return Err(SoakError::KeyMismatch {
            game,
            ply,
            stored: pos.key(),
            computed,
        });
    }

    let fen = pos.fen();
    let decoded = Position::from_fen(Arc::clone(ctx), &fen)?;
    if decoded.fen() != fen || decoded.key() != pos.key() {
        return Err(SoakError::RoundTrip { game, ply, fen });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(games: u64, seed: u64) -> SoakConfig {
        SoakConfig {
            games,
            seed,
            max_steps: 300,
            log_interval_secs: 3600,
        }
    }

    #[test]
    fn test_soak_every_rule() {
        let running = AtomicBool::new(true);
        for index in 0..4 {
            let ctx = Context::for_index(index).unwrap();
            let tally = run(ctx, &config(20, index as u64), &running).unwrap();
            assert_eq!(tally.games, 20);
            assert_eq!(
                tally.black_wins + tally.white_wins + tally.draws + tally.unfinished,
                20
            );
            assert!(tally.steps > 0);
        }
    }

    #[test]
    fn test_soak_is_reproducible() {
        let running = AtomicBool::new(true);
        let ctx = Context::for_index(2).unwrap();
        let a = run(Arc::clone(&ctx), &config(10, 7), &running).unwrap();
        let b = run(ctx, &config(10, 7), &running).unwrap();
        assert_eq!(a.steps, b.steps);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn test_soak_stops_when_interrupted() {
        let running = AtomicBool::new(false);
        let tally = run(Context::for_index(0).unwrap(), &config(10, 1), &running).unwrap();
        assert_eq!(tally.games, 0);
    }

    #[test]
    #[ignore] // Long run - cargo test -p mill-perft --release -- --ignored
    fn test_soak_long() {
        let running = AtomicBool::new(true);
        for index in 0..4 {
            let ctx = Context::for_index(index).unwrap();
            let tally = run(ctx, &config(2_000, 42), &running).unwrap();
            assert_eq!(tally.games, 2_000);
        }
    }
}
