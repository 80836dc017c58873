//! Position state machine with undo history and repetition bookkeeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use crate::context::Context;
use crate::cuckoo::{CuckooMove, MoveShape};
use crate::error::{ActionError, InvariantError, RuleError};
use crate::rule::Rule;
use crate::zobrist::Zobrist;
use crate::{
    is_valid_state, square_char, squares, Action, Bitboard, Color, GameOverReason, Key, Move,
    MoveList, Phase, Piece, Square, Winner, BOARD_BB, SQUARE_NB,
};

/// Row of the banned marker in the key table.
const BAN: usize = 2;

/// Board change made by one history record.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    Root,
    /// While placing `from` is `None`; while moving it is the selected square.
    Place { to: Square, from: Option<Square> },
    Select(Square),
    Move { from: Square, to: Square },
    Remove(Square),
    Null,
    GameOver,
}

/// One history record. The top record holds the live game state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateInfo {
    /// Completed turns since the last removal.
    pub rule50: u32,
    /// Completed turns since the last null move or forced pass.
    pub plies_from_null: u32,

    pub key: Key,
    /// Stone taken off by this step.
    pub captured: Option<Piece>,
    /// Turn distance to an earlier identical position, negated when that
    /// position was itself a repetition. Zero if none.
    pub repetition: i32,
    /// A new turn starts here.
    pub turn_start: bool,
    pub step: Step,
    /// Banned squares cleared when this step entered the moving phase.
    pub cleared_bans: Bitboard,

    pub phase: Phase,
    pub action: Action,
    pub side: Color,
    pub selected: Option<Square>,
    pub on_board: [u8; 2],
    pub in_hand: [u8; 2],
    pub removed: [u8; 2],
    pub pending: u8,
    pub game_ply: u32,
    pub winner: Option<Winner>,
    pub reason: Option<GameOverReason>,
}

impl StateInfo {
    fn root(rule: &Rule) -> StateInfo {
        let n = rule.pieces_per_side;
        StateInfo {
            rule50: 0,
            plies_from_null: 0,
            key: 0,
            captured: None,
            repetition: 0,
            turn_start: true,
            step: Step::Root,
            cleared_bans: 0,
            phase: Phase::Ready,
            action: Action::Place,
            side: Color::Black,
            selected: None,
            on_board: [0, 0],
            in_hand: [n, n],
            removed: [0, 0],
            pending: 0,
            game_ply: 0,
            winner: None,
            reason: None,
        }
    }
}

/// Neighbourhood of a square, seen from the side to move.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Surroundings {
    pub ours: usize,
    pub theirs: usize,
    pub banned: usize,
    pub empty: usize,
}

/// A game in progress.
///
/// Every mutating call either applies completely and pushes one history
/// record, or returns an error and leaves the position untouched.
#[derive(Clone, Debug)]
pub struct Position {
    ctx: Arc<Context>,
    board: [Option<Piece>; SQUARE_NB],
    /// Black, white and banned squares.
    by_kind_bb: [Bitboard; 3],
    occupied_bb: Bitboard,
    states: Vec<StateInfo>,
    nodes: Option<Arc<AtomicU64>>,
}

impl Position {
    /// Create a position in the ready state.
    pub fn new(ctx: Arc<Context>) -> Position {
        let root = StateInfo::root(&ctx.rule);
        Position {
            ctx,
            board: [None; SQUARE_NB],
            by_kind_bb: [0; 3],
            occupied_bb: 0,
            states: vec![root],
            nodes: None,
        }
    }

    pub fn with_rule(rule: Rule) -> Result<Position, RuleError> {
        Ok(Self::new(Context::new(rule)?))
    }

    /// Build a position from a board and a root record. Used by the decoder.
    pub(crate) fn from_parts(
        ctx: Arc<Context>,
        pieces: &[(Square, Piece)],
        mut root: StateInfo,
    ) -> Position {
        let mut pos = Position::new(ctx);
        for &(s, pc) in pieces {
            pos.put_piece(s, pc);
        }
        pos.states.clear();
        root.key = 0;
        pos.states.push(root);
        let key = pos.compute_key();
        pos.st_mut().key = key;
        pos
    }

    /// Switch to `rule` (rebuilding tables only if it differs) and reset.
    pub fn set_position(&mut self, rule: Rule) -> Result<(), RuleError> {
        if rule != self.ctx.rule {
            self.ctx = Context::new(rule)?;
        }
        self.reset();
        Ok(())
    }

    /// Clear the board and history.
    pub fn reset(&mut self) {
        self.board = [None; SQUARE_NB];
        self.by_kind_bb = [0; 3];
        self.occupied_bb = 0;
        self.states.clear();
        self.states.push(StateInfo::root(&self.ctx.rule));
    }

    /// Count every applied step into `counter`.
    pub fn set_node_counter(&mut self, counter: Option<Arc<AtomicU64>>) {
        self.nodes = counter;
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    #[inline]
    pub fn rule(&self) -> &Rule {
        &self.ctx.rule
    }

    /// The live record.
    #[inline]
    pub fn state(&self) -> &StateInfo {
        &self.states[self.states.len() - 1]
    }

    #[inline]
    pub(crate) fn st_mut(&mut self) -> &mut StateInfo {
        let top = self.states.len() - 1;
        &mut self.states[top]
    }

    /// Full history, root first.
    pub fn history(&self) -> &[StateInfo] {
        &self.states
    }

    #[inline]
    pub fn key(&self) -> Key {
        self.state().key
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.state().side
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    #[inline]
    pub fn action(&self) -> Action {
        self.state().action
    }

    pub fn selected(&self) -> Option<Square> {
        self.state().selected
    }

    pub fn pieces_on_board(&self, c: Color) -> u8 {
        self.state().on_board[c.index()]
    }

    pub fn pieces_in_hand(&self, c: Color) -> u8 {
        self.state().in_hand[c.index()]
    }

    pub fn pieces_removed(&self, c: Color) -> u8 {
        self.state().removed[c.index()]
    }

    pub fn pending_removals(&self) -> u8 {
        self.state().pending
    }

    pub fn winner(&self) -> Option<Winner> {
        self.state().winner
    }

    pub fn gameover_reason(&self) -> Option<GameOverReason> {
        self.state().reason
    }

    pub fn rule50_count(&self) -> u32 {
        self.state().rule50
    }

    pub fn game_ply(&self) -> u32 {
        self.state().game_ply
    }

    #[inline]
    pub fn piece_on(&self, s: Square) -> Option<Piece> {
        self.board.get(s.index()).copied().flatten()
    }

    #[inline]
    pub fn color_on(&self, s: Square) -> Option<Color> {
        self.piece_on(s).and_then(Piece::color)
    }

    #[inline]
    pub fn pieces_bb(&self, c: Color) -> Bitboard {
        self.by_kind_bb[c.index()]
    }

    #[inline]
    pub fn banned_bb(&self) -> Bitboard {
        self.by_kind_bb[BAN]
    }

    #[inline]
    pub fn occupied_bb(&self) -> Bitboard {
        self.occupied_bb
    }

    #[inline]
    pub fn empty_bb(&self) -> Bitboard {
        BOARD_BB & !self.occupied_bb
    }

    /// No empty square left.
    pub fn is_board_full(&self) -> bool {
        self.empty_bb() == 0
    }

    /// `c` is down to the minimum and the rule lets it fly.
    pub fn can_fly(&self, c: Color) -> bool {
        self.can_fly_in(self.state(), c)
    }

    fn can_fly_in(&self, st: &StateInfo, c: Color) -> bool {
        let rule = &self.ctx.rule;
        rule.allow_fly_when_remain_three_pieces && st.on_board[c.index()] <= rule.pieces_at_least
    }

    /// Number of mills `color` would have through `s`, ignoring the stone
    /// on `ignoring` if given.
    pub fn in_how_many_mills(&self, s: Square, color: Color, ignoring: Option<Square>) -> usize {
        if !s.is_on_board() {
            return 0;
        }
        let ignored = ignoring.filter(|i| i.is_on_board()).map_or(0, Square::bit);
        let ours = self.pieces_bb(color) & !ignored;
        self.ctx
            .topology
            .mill_lines(s)
            .filter(|[a, b]| {
                let line = a.bit() | b.bit();
                ours & line == line
            })
            .count()
    }

    /// Every stone of `c` is part of a mill.
    pub fn is_all_in_mills(&self, c: Color) -> bool {
        squares(self.pieces_bb(c)).all(|s| self.in_how_many_mills(s, c, None) > 0)
    }

    /// Empty neighbours of `s` (optionally counting banned ones). Zero when
    /// the side to move flies, since adjacency does not matter then.
    pub fn surrounded_empty_squares_count(&self, s: Square, include_banned: bool) -> usize {
        if !s.is_on_board() || self.can_fly(self.side_to_move()) {
            return 0;
        }
        self.ctx
            .topology
            .neighbors(s)
            .filter(|&n| match self.piece_on(n) {
                None => true,
                Some(Piece::Banned) => include_banned,
                Some(_) => false,
            })
            .count()
    }

    pub fn surrounded_pieces_count(&self, s: Square) -> Surroundings {
        let us = self.side_to_move();
        let mut counts = Surroundings::default();
        if !s.is_on_board() {
            return counts;
        }
        for n in self.ctx.topology.neighbors(s) {
            match self.piece_on(n) {
                None => counts.empty += 1,
                Some(Piece::Banned) => counts.banned += 1,
                Some(Piece::Stone { color, .. }) if color == us => counts.ours += 1,
                Some(_) => counts.theirs += 1,
            }
        }
        counts
    }

    /// `c` has no step available. A full board blocks everyone; a flying
    /// side is never blocked.
    pub fn is_all_surrounded(&self, c: Color) -> bool {
        self.is_all_surrounded_in(self.state(), c)
    }

    fn is_all_surrounded_in(&self, st: &StateInfo, c: Color) -> bool {
        if self.is_board_full() {
            return true;
        }
        if self.can_fly_in(st, c) {
            return false;
        }
        let empty = self.empty_bb();
        squares(self.pieces_bb(c)).all(|s| self.ctx.topology.adjacent_bb(s) & empty == 0)
    }

    /// Points evaluators favour for an opening stone.
    pub fn is_star_square(&self, s: Square) -> bool {
        if self.ctx.rule.pieces_per_side == 12 {
            matches!(s.0, 17 | 19 | 21 | 23)
        } else {
            matches!(s.0, 16 | 18 | 20 | 22)
        }
    }

    // ========================================================================
    // LEGALITY
    // ========================================================================

    fn check_on_board(s: Square) -> Result<(), ActionError> {
        if s.is_on_board() {
            Ok(())
        } else {
            Err(ActionError::OffBoard(s))
        }
    }

    fn check_not_over(&self) -> Result<(), ActionError> {
        if self.phase() == Phase::GameOver {
            Err(ActionError::GameOver)
        } else {
            Ok(())
        }
    }

    fn is_reachable(&self, from: Square, to: Square) -> bool {
        self.can_fly(self.side_to_move()) || self.ctx.topology.is_adjacent(from, to)
    }

    fn check_place(&self, s: Square) -> Result<(), ActionError> {
        self.check_not_over()?;
        let st = self.state();
        if st.action != Action::Place {
            return Err(ActionError::WrongAction(st.action));
        }
        Self::check_on_board(s)?;
        if self.piece_on(s).is_some() {
            return Err(ActionError::Occupied(s));
        }
        if st.phase == Phase::Moving {
            let from = st.selected.ok_or(ActionError::NothingSelected)?;
            if !self.is_reachable(from, s) {
                return Err(ActionError::NotReachable { from, to: s });
            }
        } else if st.in_hand[st.side.index()] == 0 {
            return Err(ActionError::NoPieceInHand);
        }
        Ok(())
    }

    fn check_select(&self, s: Square) -> Result<(), ActionError> {
        self.check_not_over()?;
        let st = self.state();
        if st.phase != Phase::Moving {
            return Err(ActionError::WrongPhase(st.phase));
        }
        if !matches!(st.action, Action::Select | Action::Place) {
            return Err(ActionError::WrongAction(st.action));
        }
        Self::check_on_board(s)?;
        if self.color_on(s) != Some(st.side) {
            return Err(ActionError::NotOwnPiece(s));
        }
        Ok(())
    }

    fn check_move(&self, from: Square, to: Square) -> Result<(), ActionError> {
        self.check_select(from)?;
        Self::check_on_board(to)?;
        if self.piece_on(to).is_some() {
            return Err(ActionError::Occupied(to));
        }
        if !self.is_reachable(from, to) {
            return Err(ActionError::NotReachable { from, to });
        }
        Ok(())
    }

    fn check_remove(&self, s: Square) -> Result<(), ActionError> {
        self.check_not_over()?;
        let st = self.state();
        if st.action != Action::Remove {
            return Err(ActionError::WrongAction(st.action));
        }
        Self::check_on_board(s)?;
        let them = st.side.opponent();
        if self.color_on(s) != Some(them) {
            return Err(ActionError::NotOpponentPiece(s));
        }
        if !self.ctx.rule.allow_remove_piece_in_mill
            && self.in_how_many_mills(s, them, None) > 0
            && !self.is_all_in_mills(them)
        {
            return Err(ActionError::PieceInMill(s));
        }
        Ok(())
    }

    pub fn is_legal(&self, mov: Move) -> bool {
        match mov {
            Move::Place(s) => self.check_place(s).is_ok(),
            Move::Slide { from, to } => self.check_move(from, to).is_ok(),
            Move::Remove(s) => self.check_remove(s).is_ok(),
        }
    }

    /// Every move the side to move can make. In the moving phase these are
    /// whole slides, whether or not a stone is already selected.
    pub fn legal_moves(&self) -> MoveList {
        let mut list = MoveList::new();
        let st = self.state();
        let us = st.side;
        let empty = self.empty_bb();

        match (st.phase, st.action) {
            (Phase::GameOver, _) => {}
            (_, Action::Remove) => {
                for s in squares(self.pieces_bb(us.opponent())) {
                    if self.check_remove(s).is_ok() {
                        list.push(Move::Remove(s));
                    }
                }
            }
            (Phase::Ready | Phase::Placing, Action::Place) => {
                if st.in_hand[us.index()] > 0 {
                    for s in squares(empty) {
                        list.push(Move::Place(s));
                    }
                }
            }
            (Phase::Moving, _) => {
                let fly = self.can_fly(us);
                for from in squares(self.pieces_bb(us)) {
                    let targets = if fly {
                        empty
                    } else {
                        self.ctx.topology.adjacent_bb(from) & empty
                    };
                    for to in squares(targets) {
                        list.push(Move::Slide { from, to });
                    }
                }
            }
            _ => {}
        }
        list
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    fn put_piece(&mut self, s: Square, pc: Piece) {
        debug_assert!(self.board[s.index()].is_none());
        self.board[s.index()] = Some(pc);
        self.by_kind_bb[pc.kind_index()] |= s.bit();
        self.occupied_bb |= s.bit();
    }

    fn take_piece(&mut self, s: Square) -> Option<Piece> {
        let pc = self.board[s.index()].take()?;
        self.by_kind_bb[pc.kind_index()] &= !s.bit();
        self.occupied_bb &= !s.bit();
        Some(pc)
    }

    fn shift_piece(&mut self, from: Square, to: Square) {
        if let Some(pc) = self.take_piece(from) {
            self.put_piece(to, pc);
        }
    }

    /// Fresh record for `step`, carrying forward the live state.
    fn next_state(&self, step: Step) -> StateInfo {
        let mut st = self.state().clone();
        st.step = step;
        st.captured = None;
        st.repetition = 0;
        st.turn_start = false;
        st.cleared_bans = 0;
        st.game_ply += 1;
        st
    }

    fn set_side(&self, st: &mut StateInfo, c: Color) {
        if st.side != c {
            st.side = c;
            st.key ^= self.ctx.zobrist.side();
        }
    }

    fn set_pending(st: &mut StateInfo, pending: u8) {
        st.pending = pending;
        st.key = Zobrist::with_pending(st.key, pending);
    }

    fn set_gameover(st: &mut StateInfo, winner: Winner, reason: GameOverReason) {
        st.phase = Phase::GameOver;
        st.action = Action::None;
        st.selected = None;
        Self::set_pending(st, 0);
        st.winner = Some(winner);
        st.reason = Some(reason);
        debug!("game over after ply {}: {:?} ({:?})", st.game_ply, winner, reason);
    }

    /// Place a stone from hand, or while moving, the selected stone.
    pub fn place(&mut self, s: Square) -> Result<(), ActionError> {
        self.check_place(s)?;
        let ctx = Arc::clone(&self.ctx);
        let mut st = self.next_state(Step::Place { to: s, from: None });
        let us = st.side;

        if st.phase == Phase::Ready {
            st.phase = Phase::Placing;
        }
        if st.phase == Phase::Placing {
            let ordinal = ctx.rule.pieces_per_side - st.in_hand[us.index()] + 1;
            self.put_piece(s, Piece::Stone { color: us, ordinal });
            st.in_hand[us.index()] -= 1;
            st.on_board[us.index()] += 1;
        } else if let Some(from) = st.selected.take() {
            self.shift_piece(from, s);
            st.key ^= ctx.zobrist.stone(us, from);
            st.step = Step::Place { to: s, from: Some(from) };
        }
        st.key ^= ctx.zobrist.stone(us, s);

        self.after_arrival(&mut st, s);
        self.commit(st);
        Ok(())
    }

    /// Pick up a stone to move. Re-selecting is allowed.
    pub fn select(&mut self, s: Square) -> Result<(), ActionError> {
        self.check_select(s)?;
        let mut st = self.next_state(Step::Select(s));
        st.selected = Some(s);
        st.action = Action::Place;
        self.commit(st);
        Ok(())
    }

    /// Select and place in one step.
    pub fn move_piece(&mut self, from: Square, to: Square) -> Result<(), ActionError> {
        self.check_move(from, to)?;
        let ctx = Arc::clone(&self.ctx);
        let mut st = self.next_state(Step::Move { from, to });
        let us = st.side;

        st.selected = None;
        self.shift_piece(from, to);
        st.key ^= ctx.zobrist.stone(us, from) ^ ctx.zobrist.stone(us, to);

        self.after_arrival(&mut st, to);
        self.commit(st);
        Ok(())
    }

    /// Take an opponent stone after closing a mill.
    pub fn remove(&mut self, s: Square) -> Result<(), ActionError> {
        self.check_remove(s)?;
        let ctx = Arc::clone(&self.ctx);
        let mut st = self.next_state(Step::Remove(s));
        let us = st.side;
        let them = us.opponent();

        st.captured = self.take_piece(s);
        st.key ^= ctx.zobrist.stone(them, s);
        if st.phase == Phase::Placing && ctx.rule.has_banned_locations {
            self.put_piece(s, Piece::Banned);
            st.key ^= ctx.zobrist.psq(BAN, s);
        }
        st.on_board[them.index()] -= 1;
        st.removed[them.index()] += 1;
        st.rule50 = 0;
        let pending = st.pending - 1;
        Self::set_pending(&mut st, pending);

        let left = st.on_board[them.index()] + st.in_hand[them.index()];
        if left < ctx.rule.pieces_at_least {
            Self::set_gameover(&mut st, Winner::Side(us), GameOverReason::LoseLessThanThree);
        } else if st.pending == 0 {
            self.end_turn(&mut st, true);
        }

        self.commit(st);
        Ok(())
    }

    pub fn do_move(&mut self, mov: Move) -> Result<(), ActionError> {
        match mov {
            Move::Place(s) => self.place(s),
            Move::Slide { from, to } => self.move_piece(from, to),
            Move::Remove(s) => self.remove(s),
        }
    }

    /// End the game with `loser` resigning.
    pub fn resign(&mut self, loser: Color) -> Result<(), ActionError> {
        self.check_playing()?;
        let mut st = self.next_state(Step::GameOver);
        Self::set_gameover(&mut st, Winner::Side(loser.opponent()), GameOverReason::LoseResign);
        self.commit(st);
        Ok(())
    }

    /// Draw on the third occurrence of the current position.
    pub fn claim_threefold_draw(&mut self) -> Result<(), ActionError> {
        self.check_playing()?;
        if self.state().repetition >= 0 {
            return Err(ActionError::NotRepeated);
        }
        let mut st = self.next_state(Step::GameOver);
        Self::set_gameover(&mut st, Winner::Draw, GameOverReason::DrawThreefoldRepetition);
        self.commit(st);
        Ok(())
    }

    fn check_playing(&self) -> Result<(), ActionError> {
        match self.phase() {
            Phase::GameOver => Err(ActionError::GameOver),
            Phase::Ready => Err(ActionError::WrongPhase(Phase::Ready)),
            _ => Ok(()),
        }
    }

    /// Pass the turn without touching the board.
    pub fn do_null_move(&mut self) -> Result<(), ActionError> {
        self.check_not_over()?;
        if self.phase() != Phase::Moving {
            return Err(ActionError::WrongPhase(self.phase()));
        }
        if self.action() != Action::Select {
            return Err(ActionError::WrongAction(self.action()));
        }
        let mut st = self.next_state(Step::Null);
        let next = st.side.opponent();
        self.set_side(&mut st, next);
        st.rule50 += 1;
        st.plies_from_null = 0;
        st.turn_start = true;
        self.commit(st);
        Ok(())
    }

    pub fn undo_null_move(&mut self) -> Result<(), ActionError> {
        if self.state().step != Step::Null {
            return Err(ActionError::NothingToUndo);
        }
        self.undo()
    }

    /// Retract the last step.
    pub fn undo(&mut self) -> Result<(), ActionError> {
        if self.states.len() < 2 {
            return Err(ActionError::NothingToUndo);
        }
        let Some(st) = self.states.pop() else {
            return Err(ActionError::NothingToUndo);
        };

        for s in squares(st.cleared_bans) {
            self.put_piece(s, Piece::Banned);
        }
        match st.step {
            Step::Place { to, from: None } => {
                self.take_piece(to);
            }
            Step::Place { to, from: Some(from) } | Step::Move { from, to } => {
                self.shift_piece(to, from);
            }
            Step::Remove(s) => {
                self.take_piece(s);
                if let Some(pc) = st.captured {
                    self.put_piece(s, pc);
                }
            }
            Step::Root | Step::Select(_) | Step::Null | Step::GameOver => {}
        }

        self.check_counts();
        debug_assert_eq!(self.validate(), Ok(()));
        Ok(())
    }

    /// Mill detection for the stone that just arrived on `s`.
    fn after_arrival(&mut self, st: &mut StateInfo, s: Square) {
        let mills = self.in_how_many_mills(s, st.side, None);
        let pending = if self.ctx.rule.allow_remove_multi_pieces_when_close_multi_mill {
            mills as u8
        } else {
            mills.min(1) as u8
        };
        // Never ask for more removals than there are stones to take
        let pending = pending.min(st.on_board[st.side.opponent().index()]);
        if pending == 0 {
            self.end_turn(st, false);
            return;
        }
        st.action = Action::Remove;
        Self::set_pending(st, pending);
        trace!("{:?} closed {} mill(s) on {}", st.side, mills, s);
    }

    /// Hand the move to the next turn. `progress` means the turn removed a
    /// stone and `rule50` has already been reset.
    fn end_turn(&mut self, st: &mut StateInfo, progress: bool) {
        if !progress {
            st.rule50 += 1;
        }
        st.plies_from_null += 1;
        st.turn_start = true;
        st.selected = None;

        if st.phase == Phase::Placing && st.in_hand == [0, 0] {
            self.enter_moving(st);
        } else {
            let next = st.side.opponent();
            self.set_side(st, next);
            st.action = if st.phase == Phase::Placing {
                Action::Place
            } else {
                Action::Select
            };
        }

        self.check_gameover(st);
    }

    fn enter_moving(&mut self, st: &mut StateInfo) {
        let ctx = Arc::clone(&self.ctx);
        if ctx.rule.has_banned_locations {
            let bans = self.banned_bb();
            for s in squares(bans) {
                self.take_piece(s);
                st.key ^= ctx.zobrist.psq(BAN, s);
            }
            st.cleared_bans = bans;
        }
        st.phase = Phase::Moving;
        st.action = Action::Select;
        let first = if ctx.rule.is_defender_move_first {
            Color::White
        } else {
            Color::Black
        };
        self.set_side(st, first);
        debug!("moving phase starts, {:?} to move", first);
    }

    fn check_gameover(&self, st: &mut StateInfo) {
        if st.phase.is_not_playing() {
            return;
        }
        let rule = &self.ctx.rule;

        if rule.max_steps_led_to_draw > 0 && st.rule50 > rule.max_steps_led_to_draw {
            Self::set_gameover(st, Winner::Draw, GameOverReason::DrawRule50);
            return;
        }

        if self.is_board_full() {
            if rule.is_black_lose_but_not_draw_when_board_full {
                Self::set_gameover(st, Winner::Side(Color::White), GameOverReason::LoseBoardIsFull);
            } else {
                Self::set_gameover(st, Winner::Draw, GameOverReason::DrawBoardIsFull);
            }
            return;
        }

        if st.phase == Phase::Moving
            && st.action == Action::Select
            && self.is_all_surrounded_in(st, st.side)
        {
            let stuck = st.side;
            if rule.is_lose_but_not_change_side_when_no_way {
                Self::set_gameover(st, Winner::Side(stuck.opponent()), GameOverReason::LoseNoWay);
            } else {
                // The opponent borders every empty region, so one pass is enough.
                self.set_side(st, stuck.opponent());
                st.plies_from_null = 0;
                debug!("{:?} has no move and passes", stuck);
            }
        }
    }

    fn commit(&mut self, mut st: StateInfo) {
        if st.turn_start {
            st.repetition = self.repetition_of(&st);
        }
        if let Some(nodes) = &self.nodes {
            nodes.fetch_add(1, Ordering::Relaxed);
        }
        trace!(
            "{:?} -> ({:?}, {:?}) key {:016X}",
            st.step,
            st.phase,
            st.action,
            st.key
        );
        self.states.push(st);

        self.check_counts();
        debug_assert_eq!(self.validate(), Ok(()));
    }

    /// Cheap count check kept in release builds.
    #[inline]
    fn check_counts(&self) {
        let st = self.state();
        let total = self.ctx.rule.pieces_per_side;
        for c in 0..2 {
            assert!(
                st.on_board[c] + st.in_hand[c] + st.removed[c] == total,
                "piece counts out of balance: {:?}",
                st
            );
        }
    }

    // ========================================================================
    // REPETITION
    // ========================================================================

    /// Turn-start records before the live one, most recent first.
    fn earlier_turn_starts(&self) -> impl Iterator<Item = (usize, &StateInfo)> + '_ {
        self.states[..self.states.len() - 1]
            .iter()
            .rev()
            .filter(|s| s.turn_start)
            .enumerate()
            .map(|(i, s)| (i + 1, s))
    }

    /// Repetition marker for a record about to be pushed.
    fn repetition_of(&self, st: &StateInfo) -> i32 {
        let end = st.rule50.min(st.plies_from_null) as usize;
        if end < 4 {
            return 0;
        }
        // `st` is not pushed yet, so every record counts
        self.states
            .iter()
            .rev()
            .filter(|s| s.turn_start)
            .enumerate()
            .map(|(i, s)| (i + 1, s))
            .take(end)
            .find(|&(d, s)| d >= 4 && d % 2 == 0 && s.key == st.key)
            .map_or(0, |(d, s)| if s.repetition != 0 { -(d as i32) } else { d as i32 })
    }

    /// Draw by step limit, or by a repetition inside the search window.
    /// `ply` is the distance in turns from the search root.
    pub fn is_draw(&self, ply: i32) -> bool {
        let st = self.state();
        let max = self.ctx.rule.max_steps_led_to_draw;
        if max > 0 && st.rule50 > max {
            return true;
        }
        st.repetition != 0 && st.repetition < ply
    }

    /// Any position in the current window has occurred before.
    pub fn has_repeated(&self) -> bool {
        let st = self.state();
        let end = st.rule50.min(st.plies_from_null) as usize;
        self.states
            .iter()
            .rev()
            .filter(|s| s.turn_start)
            .take(end.saturating_sub(3))
            .any(|s| s.repetition != 0)
    }

    /// A reversible move from here reaches an earlier position, or an
    /// earlier position reached this one. Before or at the root (`ply`
    /// not greater than the distance) the earlier position must already be
    /// a repetition itself.
    pub fn has_game_cycle(&self, ply: i32) -> bool {
        let st = self.state();
        if !st.turn_start {
            return false;
        }
        let end = st.rule50.min(st.plies_from_null) as usize;
        if end < 3 {
            return false;
        }

        for (d, stp) in self.earlier_turn_starts().take(end) {
            if d < 3 || d % 2 == 0 {
                continue;
            }
            let Some(mv) = self.ctx.cuckoo.probe(st.key ^ stp.key) else {
                continue;
            };
            if !self.is_open(&mv) {
                continue;
            }
            if ply > d as i32 {
                return true;
            }
            // Both directions share an entry; only ours counts here.
            if mv.color != st.side {
                continue;
            }
            if stp.repetition != 0 {
                return true;
            }
        }
        false
    }

    /// The stored move can be played on the current board in one direction.
    fn is_open(&self, mv: &CuckooMove) -> bool {
        if self.ctx.topology.between(mv.a, mv.b) & self.occupied_bb != 0 {
            return false;
        }
        let from = match (self.piece_on(mv.a), self.piece_on(mv.b)) {
            (Some(_), None) => mv.a,
            (None, Some(_)) => mv.b,
            _ => return false,
        };
        if self.color_on(from) != Some(mv.color) {
            return false;
        }
        mv.shape == MoveShape::Step || self.can_fly(mv.color)
    }

    // ========================================================================
    // CONSISTENCY
    // ========================================================================

    /// Recompute the key from the board, side and pending count.
    pub fn compute_key(&self) -> Key {
        let z = &self.ctx.zobrist;
        let st = self.state();
        let mut key = 0;
        for s in Square::all() {
            if let Some(pc) = self.piece_on(s) {
                key ^= z.psq(pc.kind_index(), s);
            }
        }
        if st.side == Color::White {
            key ^= z.side();
        }
        Zobrist::with_pending(key, st.pending)
    }

    /// Full consistency check of board, bitboards, counts, state and key.
    pub fn validate(&self) -> Result<(), InvariantError> {
        let st = self.state();

        let mut kind_bb = [0; 3];
        for (i, pc) in self.board.iter().enumerate() {
            if let Some(pc) = pc {
                let s = Square(i as u8);
                if !s.is_on_board() {
                    return Err(InvariantError::Bitboard(s));
                }
                kind_bb[pc.kind_index()] |= s.bit();
            }
        }
        let all = kind_bb[0] | kind_bb[1] | kind_bb[2];
        let diff = (0..3).fold(all ^ self.occupied_bb, |d, k| d | (kind_bb[k] ^ self.by_kind_bb[k]));
        if let Some(s) = squares(diff).next() {
            return Err(InvariantError::Bitboard(s));
        }

        let total = self.ctx.rule.pieces_per_side;
        for c in Color::both() {
            let i = c.index();
            if st.on_board[i] as u32 != kind_bb[i].count_ones()
                || st.on_board[i] + st.in_hand[i] + st.removed[i] != total
            {
                return Err(InvariantError::PieceCount {
                    color: c,
                    on_board: st.on_board[i],
                    in_hand: st.in_hand[i],
                    removed: st.removed[i],
                    total,
                });
            }
        }

        if !is_valid_state(st.phase, st.action) {
            return Err(InvariantError::State(st.phase, st.action));
        }
        if (st.action == Action::Remove) != (st.pending > 0) {
            return Err(InvariantError::Pending {
                action: st.action,
                pending: st.pending,
            });
        }
        if let Some(s) = st.selected {
            if st.phase != Phase::Moving
                || st.action != Action::Place
                || self.color_on(s) != Some(st.side)
            {
                return Err(InvariantError::Selection(st.selected));
            }
        }

        let computed = self.compute_key();
        if computed != st.key {
            return Err(InvariantError::Key {
                stored: st.key,
                computed,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = |s: u8| square_char(self.piece_on(Square(s)));
        writeln!(f, "{} ----- {} ----- {}", c(31), c(24), c(25))?;
        writeln!(f, "| {} --- {} --- {} |", c(23), c(16), c(17))?;
        writeln!(f, "| | {} - {} - {} | |", c(15), c(8), c(9))?;
        writeln!(f, "{}-{}-{}       {}-{}-{}", c(30), c(22), c(14), c(10), c(18), c(26))?;
        writeln!(f, "| | {} - {} - {} | |", c(13), c(12), c(11))?;
        writeln!(f, "| {} --- {} --- {} |", c(21), c(20), c(19))?;
        writeln!(f, "{} ----- {} ----- {}", c(29), c(28), c(27))?;
        writeln!(f)?;
        writeln!(f, "Fen: {}", self.fen())?;
        write!(f, "Key: {:016X}", self.key())
    }
}
