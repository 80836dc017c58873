//! Mill engine perft and soak runner
//!
//! `perft` counts the legal-move tree to a fixed depth; `soak` plays random
//! games and checks the engine's hashing, encoding and undo along the way.

mod perft;
mod soak;
mod stats;

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{info, warn};
use mill_core::rule::DEFAULT_RULE_INDEX;
use mill_core::{Context, Position, Rule};

use crate::soak::SoakConfig;
use crate::stats::RunStats;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count leaf nodes of the legal-move tree
    Perft {
        /// Plies to search; every place, slide and removal is one ply
        #[arg(long)]
        depth: u32,

        #[command(flatten)]
        rule: RuleArgs,

        /// Start from this position instead of the empty board
        #[arg(long)]
        fen: Option<String>,

        /// Worker threads for the root split
        #[arg(long, default_value_t = 1)]
        threads: usize,

        /// Seconds between progress lines
        #[arg(long, default_value_t = 5)]
        log_interval: u64,
    },
    /// Play random games and cross-check every step
    Soak {
        #[arg(long, default_value_t = 1000)]
        games: u64,

        /// RNG seed (random if omitted)
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        rule: RuleArgs,

        /// Abandon a game after this many steps
        #[arg(long, default_value_t = 1000)]
        max_steps: u32,

        #[arg(long, default_value_t = 5)]
        log_interval: u64,
    },
    /// List the built-in rules
    Rules,
}

#[derive(clap::Args, Debug)]
struct RuleArgs {
    /// Built-in rule index (see `rules`)
    #[arg(long, default_value_t = DEFAULT_RULE_INDEX)]
    rule: usize,

    /// JSON file with a custom rule; overrides --rule
    #[arg(long)]
    rule_file: Option<PathBuf>,
}

impl RuleArgs {
    fn context(&self) -> Result<Arc<Context>, Box<dyn Error>> {
        let rule = match &self.rule_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| format!("reading {}: {}", path.display(), e))?;
                serde_json::from_str::<Rule>(&text)?
            }
            None => Rule::by_index(self.rule)?,
        };
        Ok(Context::new(rule)?)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // Set up SIGINT handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!("\n\nInterrupt received, stopping...");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("could not install Ctrl-C handler: {}", e);
    }

    match run(cli.command, &running) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, running: &AtomicBool) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Perft {
            depth,
            rule,
            fen,
            threads,
            log_interval,
        } => {
            let ctx = rule.context()?;
            let pos = match fen {
                Some(fen) => Position::from_fen(Arc::clone(&ctx), &fen)?,
                None => Position::new(Arc::clone(&ctx)),
            };

            println!("Mill Perft");
            println!("==========");
            println!("Rule: {}", ctx.rule.name);
            println!("Depth: {}  Threads: {}", depth, threads);
            println!("{}\n", pos);

            if depth == 0 {
                println!("Nodes: 1");
                return Ok(());
            }

            let nodes = Arc::new(AtomicU64::new(0));
            let stats = RunStats::new("nodes");
            let divide =
                perft::perft_split(&pos, depth, threads, running, &nodes, log_interval)?;
            let Some(divide) = divide else {
                println!("\nPerft was interrupted before completion.");
                return Ok(());
            };

            for (mov, n) in &divide {
                println!("{:>12}: {}", mov.to_string(), n);
            }
            let leaves: u64 = divide.iter().map(|&(_, n)| n).sum();
            println!("\nLeaves: {}", leaves);
            stats.print_summary(nodes.load(Ordering::Relaxed));
        }
        Command::Soak {
            games,
            seed,
            rule,
            max_steps,
            log_interval,
        } => {
            let ctx = rule.context()?;
            let seed = seed.unwrap_or_else(rand::random);
            let cfg = SoakConfig {
                games,
                seed,
                max_steps,
                log_interval_secs: log_interval,
            };

            println!("Mill Soak");
            println!("=========");
            println!("Rule: {}  Seed: {}", ctx.rule.name, seed);
            println!();

            let stats = RunStats::new("games");
            let tally = soak::run(ctx, &cfg, running)?;
            println!();
            tally.print_summary();
            stats.print_summary(tally.games);
            if tally.games < games {
                println!("\nSoak was interrupted after {} games.", tally.games);
            }
        }
        Command::Rules => {
            for (index, rule) in Rule::catalog().iter().enumerate() {
                println!("{}: {}", index, rule.name);
                println!("   {}", rule.description);
            }
            info!("custom rules can be loaded with --rule-file");
        }
    }
    Ok(())
}
