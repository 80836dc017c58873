//! Scripted game scenarios
//!
//! Loads action sequences from `tests/data/scenarios.json` and checks the
//! resulting position for:
//! - Rejected actions (by error variant)
//! - Encoding, phase, action and side to move
//! - Outcome and repetition marker

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use mill_core::{ActionError, Color, Context, GameOverReason, Position, Square, Winner};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Scenario {
    name: String,
    rule: usize,
    #[serde(default)]
    fen: Option<String>,
    steps: Vec<Step>,
    expect: Expect,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Step {
    Place {
        square: u8,
        #[serde(default)]
        error: Option<String>,
    },
    Select {
        square: u8,
        #[serde(default)]
        error: Option<String>,
    },
    Move {
        from: u8,
        to: u8,
        #[serde(default)]
        error: Option<String>,
    },
    Remove {
        square: u8,
        #[serde(default)]
        error: Option<String>,
    },
    Resign {
        color: Color,
    },
    Undo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Expect {
    fen: Option<String>,
    phase: Option<String>,
    action: Option<String>,
    side: Option<String>,
    winner: Option<String>,
    reason: Option<GameOverReason>,
    pending: Option<u8>,
    repetition: Option<i32>,
}

fn load_scenarios() -> Vec<Scenario> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/scenarios.json");
    let file = File::open(&path).unwrap_or_else(|e| panic!("open {:?}: {}", path, e));
    serde_json::from_reader(BufReader::new(file)).expect("parse scenarios")
}

/// Variant name of an error, e.g. `NotReachable` for `NotReachable { .. }`.
fn variant(err: &ActionError) -> String {
    let debug = format!("{:?}", err);
    debug
        .split(|c: char| c == '(' || c == ' ' || c == '{')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn check_result(name: &str, i: usize, result: Result<(), ActionError>, error: &Option<String>) {
    match (result, error) {
        (Ok(()), None) => {}
        (Err(e), Some(expected)) => {
            assert_eq!(&variant(&e), expected, "{}: step {} failed differently", name, i)
        }
        (Ok(()), Some(expected)) => panic!("{}: step {} succeeded, expected {}", name, i, expected),
        (Err(e), None) => panic!("{}: step {} failed: {}", name, i, e),
    }
}

fn run(scenario: &Scenario) -> Position {
    let ctx = Context::for_index(scenario.rule).unwrap();
    let mut pos = match &scenario.fen {
        Some(fen) => Position::from_fen(ctx, fen).unwrap(),
        None => Position::new(ctx),
    };

    for (i, step) in scenario.steps.iter().enumerate() {
        let before = pos.fen();
        let (result, error) = match step {
            Step::Place { square, error } => (pos.place(Square(*square)), error),
            Step::Select { square, error } => (pos.select(Square(*square)), error),
            Step::Move { from, to, error } => (pos.move_piece(Square(*from), Square(*to)), error),
            Step::Remove { square, error } => (pos.remove(Square(*square)), error),
            Step::Resign { color } => (pos.resign(*color), &None),
            Step::Undo => (pos.undo(), &None),
        };
        if result.is_err() {
            assert_eq!(pos.fen(), before, "{}: rejected step {} changed the position", scenario.name, i);
        }
        check_result(&scenario.name, i, result, error);
        pos.validate().unwrap();
    }
    pos
}

fn winner_name(winner: Option<Winner>) -> Option<String> {
    winner.map(|w| match w {
        Winner::Side(c) => format!("{:?}", c),
        Winner::Draw => "Draw".to_string(),
    })
}

#[test]
fn test_scenarios() {
    let scenarios = load_scenarios();
    assert!(scenarios.len() >= 10);

    for scenario in &scenarios {
        let pos = run(scenario);
        let expect = &scenario.expect;
        let name = &scenario.name;

        if let Some(fen) = &expect.fen {
            assert_eq!(&pos.fen(), fen, "{}: fen", name);
        }
        if let Some(phase) = &expect.phase {
            assert_eq!(&format!("{:?}", pos.phase()), phase, "{}: phase", name);
        }
        if let Some(action) = &expect.action {
            assert_eq!(&format!("{:?}", pos.action()), action, "{}: action", name);
        }
        if let Some(side) = &expect.side {
            assert_eq!(&format!("{:?}", pos.side_to_move()), side, "{}: side", name);
        }
        if expect.winner.is_some() {
            assert_eq!(winner_name(pos.winner()), expect.winner, "{}: winner", name);
        }
        if expect.reason.is_some() {
            assert_eq!(pos.gameover_reason(), expect.reason, "{}: reason", name);
        }
        if let Some(pending) = expect.pending {
            assert_eq!(pos.pending_removals(), pending, "{}: pending", name);
        }
        if let Some(repetition) = expect.repetition {
            assert_eq!(pos.state().repetition, repetition, "{}: repetition", name);
        }
    }
}

#[test]
fn test_scenario_fens_decode() {
    // Every expected encoding is itself a valid position
    for scenario in load_scenarios() {
        let ctx = Context::for_index(scenario.rule).unwrap();
        if let Some(fen) = &scenario.expect.fen {
            let pos = Position::from_fen(ctx, fen).unwrap();
            assert_eq!(&pos.fen(), fen, "{}", scenario.name);
        }
    }
}
