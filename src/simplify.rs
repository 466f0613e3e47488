// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Simplifies the three formulae of a transition system independently,
//! keeping the variables that the verifier must still refer to untouched.
//!
//! The backend solver crate exposes no inprocessing control or clause
//! traversal, so the equivalent passes run here: unit propagation to a fixed
//! point, tautology and duplicate-literal removal, and clause subsumption.
//! Forced values of non-frozen (Tseitin) variables may be eliminated
//! entirely; forced values of frozen variables are re-emitted as unit
//! clauses. The result is equivalent to the input over the frozen variables
//! and a second application is the identity.

use crate::logic::{CnfFormula, Literal, Variable, VariableRange};
use crate::transition_system::TransitionSystem;
use rustc_hash::FxHashMap;
use tracing::debug;

// Subsumption is quadratic in the clause count; beyond this size the pass is
// skipped and only propagation applies.
const SUBSUMPTION_LIMIT: usize = 10_000;

pub fn simplify(system: &TransitionSystem) -> TransitionSystem {
    let init = simplify_formula(system.init(), &[system.state_vars()]);
    let trans = simplify_formula(
        system.trans(),
        &[
            system.state_vars(),
            system.next_state_vars(),
            system.input_vars(),
        ],
    );
    let error = simplify_formula(system.error(), &[system.state_vars(), system.input_vars()]);

    TransitionSystem::new(
        system.input_vars(),
        system.state_vars(),
        system.next_state_vars(),
        system.aux_vars(),
        system.initial_cube().to_vec(),
        init,
        trans,
        error,
    )
}

pub fn simplify_formula(formula: &CnfFormula, frozen: &[VariableRange]) -> CnfFormula {
    let is_frozen = |var: Variable| frozen.iter().any(|range| range.contains(var));

    let mut clauses: Vec<Vec<Literal>> = Vec::with_capacity(formula.clause_count());
    for clause in formula.clauses() {
        let mut sorted = clause.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let tautology = sorted
            .windows(2)
            .any(|pair| pair[0].var() == pair[1].var() && pair[0] != pair[1]);
        if !tautology {
            clauses.push(sorted);
        }
    }

    // unit propagation to a fixed point; assignment order is recorded so the
    // output stays deterministic
    let mut values: FxHashMap<Variable, bool> = FxHashMap::default();
    let mut assigned: Vec<Literal> = Vec::new();
    loop {
        let mut units: Vec<Literal> = Vec::new();
        let mut derived_empty = false;
        clauses.retain_mut(|clause| {
            if clause
                .iter()
                .any(|lit| values.get(&lit.var()) == Some(&lit.is_positive()))
            {
                return false;
            }
            clause.retain(|lit| match values.get(&lit.var()) {
                Some(value) => *value == lit.is_positive(),
                None => true,
            });
            match clause.len() {
                0 => {
                    derived_empty = true;
                    false
                }
                1 => {
                    units.push(clause[0]);
                    false
                }
                _ => true,
            }
        });
        if derived_empty {
            return CnfFormula::constant(false);
        }
        if units.is_empty() {
            break;
        }
        for unit in units {
            match values.insert(unit.var(), unit.is_positive()) {
                Some(previous) if previous != unit.is_positive() => {
                    return CnfFormula::constant(false);
                }
                Some(_) => {}
                None => assigned.push(unit),
            }
        }
    }

    if clauses.len() <= SUBSUMPTION_LIMIT {
        drop_subsumed(&mut clauses);
    } else {
        debug!(
            clauses = clauses.len(),
            "skipping the subsumption pass on a large formula"
        );
    }

    let mut result = CnfFormula::new();
    for unit in assigned.iter() {
        if is_frozen(unit.var()) {
            result.add_clause(&[*unit]);
        }
    }
    for clause in clauses.iter() {
        result.add_clause(clause);
    }
    result
}

/// Removes every clause that is a proper superset of (or equal to a later
/// duplicate of) another clause. Clauses are sorted, so the subset check is
/// a single merge; a variable signature filters most pairs early.
fn drop_subsumed(clauses: &mut Vec<Vec<Literal>>) {
    let signatures: Vec<u64> = clauses
        .iter()
        .map(|clause| {
            clause
                .iter()
                .fold(0u64, |sig, lit| sig | 1 << (lit.var().id() % 64))
        })
        .collect();

    let mut keep = vec![true; clauses.len()];
    for i in 0..clauses.len() {
        if !keep[i] {
            continue;
        }
        for j in 0..clauses.len() {
            if i == j || !keep[j] {
                continue;
            }
            if signatures[j] & !signatures[i] != 0 || clauses[j].len() > clauses[i].len() {
                continue;
            }
            if clauses[j].len() == clauses[i].len() && j > i {
                continue; // of two equal clauses only the earlier survives
            }
            if is_subset(&clauses[j], &clauses[i]) {
                keep[i] = false;
                break;
            }
        }
    }

    let mut index = 0;
    clauses.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}

fn is_subset(small: &[Literal], large: &[Literal]) -> bool {
    let mut rest = large;
    for lit in small {
        match rest.iter().position(|other| other == lit) {
            Some(pos) => rest = &rest[pos + 1..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::VariableStore;
    use crate::solver::Solver;

    #[test]
    fn forced_auxiliaries_are_eliminated() {
        let store = VariableStore::new();
        let frozen = store.make_range(1);
        let aux = store.make_range(1);
        let x = Literal::from(frozen.nth(0));
        let a = Literal::from(aux.nth(0));

        let mut formula = CnfFormula::new();
        formula.add_clause(&[a]);
        formula.add_clause(&[!a, x]);

        let simplified = simplify_formula(&formula, &[frozen]);
        assert_eq!(simplified.literals(), &[x, Literal::SEPARATOR]);
    }

    #[test]
    fn frozen_units_survive() {
        let store = VariableStore::new();
        let frozen = store.make_range(2);
        let x = Literal::from(frozen.nth(0));
        let y = Literal::from(frozen.nth(1));

        let mut formula = CnfFormula::new();
        formula.add_clause(&[!x]);
        formula.add_clause(&[x, y]);

        let simplified = simplify_formula(&formula, &[frozen]);
        assert_eq!(
            simplified.literals(),
            &[!x, Literal::SEPARATOR, y, Literal::SEPARATOR]
        );
    }

    #[test]
    fn conflicting_units_produce_the_false_formula() {
        let store = VariableStore::new();
        let frozen = store.make_range(1);
        let x = Literal::from(frozen.nth(0));

        let mut formula = CnfFormula::new();
        formula.add_clause(&[x]);
        formula.add_clause(&[!x]);

        assert_eq!(
            simplify_formula(&formula, &[frozen]),
            CnfFormula::constant(false)
        );
    }

    #[test]
    fn tautologies_and_duplicates_are_removed() {
        let store = VariableStore::new();
        let frozen = store.make_range(2);
        let x = Literal::from(frozen.nth(0));
        let y = Literal::from(frozen.nth(1));

        let mut formula = CnfFormula::new();
        formula.add_clause(&[x, !x, y]);
        formula.add_clause(&[y, x, y]);

        let simplified = simplify_formula(&formula, &[frozen]);
        assert_eq!(
            simplified.literals(),
            &[x, y, Literal::SEPARATOR]
        );
    }

    #[test]
    fn subsumed_clauses_are_dropped() {
        let store = VariableStore::new();
        let frozen = store.make_range(3);
        let x = Literal::from(frozen.nth(0));
        let y = Literal::from(frozen.nth(1));
        let z = Literal::from(frozen.nth(2));

        let mut formula = CnfFormula::new();
        formula.add_clause(&[x, y, z]);
        formula.add_clause(&[x, y]);
        formula.add_clause(&[x, y]);

        let simplified = simplify_formula(&formula, &[frozen]);
        assert_eq!(simplified.literals(), &[x, y, Literal::SEPARATOR]);
    }

    #[test]
    fn simplification_is_idempotent() {
        let store = VariableStore::new();
        let frozen = store.make_range(3);
        let aux = store.make_range(2);
        let x = Literal::from(frozen.nth(0));
        let y = Literal::from(frozen.nth(1));
        let z = Literal::from(frozen.nth(2));
        let a = Literal::from(aux.nth(0));
        let b = Literal::from(aux.nth(1));

        let mut formula = CnfFormula::new();
        formula.add_clause(&[a]);
        formula.add_clause(&[!a, x, y]);
        formula.add_clause(&[!b, z]);
        formula.add_clause(&[b, !z]);
        formula.add_clause(&[x, y, z]);

        let once = simplify_formula(&formula, &[frozen]);
        let twice = simplify_formula(&once, &[frozen]);
        assert_eq!(once, twice);
    }

    /// The simplified formula must agree with the original on every total
    /// assignment of the frozen variables.
    #[test]
    fn equivalence_over_frozen_variables() {
        let store = VariableStore::new();
        let frozen = store.make_range(3);
        let aux = store.make_range(2);
        let x = Literal::from(frozen.nth(0));
        let y = Literal::from(frozen.nth(1));
        let z = Literal::from(frozen.nth(2));
        let a = Literal::from(aux.nth(0));
        let b = Literal::from(aux.nth(1));

        // a <-> (x /\ y), error requires a /\ z
        let mut formula = CnfFormula::new();
        formula.add_clause(&[!a, x]);
        formula.add_clause(&[!a, y]);
        formula.add_clause(&[!x, !y, a]);
        formula.add_clause(&[a]);
        formula.add_clause(&[b, z]);
        formula.add_clause(&[!b]);

        let simplified = simplify_formula(&formula, &[frozen]);

        for bits in 0..8u32 {
            let assumptions: Vec<Literal> = [x, y, z]
                .iter()
                .enumerate()
                .map(|(i, lit)| if bits & (1 << i) != 0 { *lit } else { !*lit })
                .collect();

            let mut original = Solver::new(&store);
            original.assert_formula(&formula);
            let mut reduced = Solver::new(&store);
            reduced.assert_formula(&simplified);

            assert_eq!(
                original.query().assume_all(&assumptions).is_sat(),
                reduced.query().assume_all(&assumptions).is_sat(),
                "assignment {bits:03b}"
            );
        }
    }
}
