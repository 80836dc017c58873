//! Read-only tables shared by every position of one rule.

use std::sync::Arc;

use log::debug;

use crate::cuckoo::{default_reversible, Cuckoo, ReversiblePredicate};
use crate::error::RuleError;
use crate::rule::Rule;
use crate::topology::Topology;
use crate::zobrist::Zobrist;

/// Everything a position needs that never changes during a game.
///
/// Built once and shared behind an `Arc`; nothing mutates it afterwards, so
/// positions on different threads can read it freely.
#[derive(Debug)]
pub struct Context {
    pub rule: Rule,
    pub topology: Topology,
    pub zobrist: Zobrist,
    pub cuckoo: Cuckoo,
}

impl Context {
    pub fn new(rule: Rule) -> Result<Arc<Context>, RuleError> {
        Self::with_predicate(rule, default_reversible)
    }

    /// Build with a custom notion of which moves are reversible.
    pub fn with_predicate(
        rule: Rule,
        reversible: ReversiblePredicate,
    ) -> Result<Arc<Context>, RuleError> {
        rule.validate()?;
        let topology = Topology::new(rule.has_oblique_lines);
        let zobrist = Zobrist::default();
        let cuckoo = Cuckoo::build(&rule, &topology, &zobrist, reversible)?;
        debug!("context ready for rule {:?}", rule.name);
        Ok(Arc::new(Context {
            rule,
            topology,
            zobrist,
            cuckoo,
        }))
    }

    /// Context for a catalog rule.
    pub fn for_index(index: usize) -> Result<Arc<Context>, RuleError> {
        Self::new(Rule::by_index(index)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_per_rule() {
        for index in 0..4 {
            let ctx = Context::for_index(index).unwrap();
            assert_eq!(ctx.rule.catalog_index(), Some(index));
            assert!(!ctx.cuckoo.is_empty());
        }
        assert_eq!(Context::for_index(9).err(), Some(RuleError::UnknownIndex(9)));
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let mut rule = Rule::default();
        rule.pieces_per_side = 20;
        assert!(Context::new(rule).is_err());
    }
}
