// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Prints verdicts in the AIGER witness format.

use crate::logic::Cube;
use crate::transition_system::TransitionSystem;
use crate::verifier::VerificationResult;
use std::io::Write;

pub fn print_witness(
    out: &mut impl Write,
    system: &TransitionSystem,
    result: &VerificationResult,
) -> std::io::Result<()> {
    match result {
        VerificationResult::Safe => {
            writeln!(out, "0")?;
            writeln!(out, "b0")?;
        }
        VerificationResult::Unsafe(rows) => {
            writeln!(out, "1")?;
            writeln!(out, "b0")?;

            // the initial state over all AIGER latches in declaration order;
            // latches with a nondeterministic reset print as don't-care
            let initial: String = system
                .initial_cube()
                .iter()
                .map(|reset| match reset {
                    Some(true) => '1',
                    Some(false) => '0',
                    None => 'x',
                })
                .collect();
            writeln!(out, "{initial}")?;

            for row in rows {
                writeln!(out, "{}", input_row_to_string(system, row))?;
            }
        }
    }
    writeln!(out, ".")?;
    Ok(())
}

pub fn witness_to_string(system: &TransitionSystem, result: &VerificationResult) -> String {
    let mut buf = Vec::new();
    print_witness(&mut buf, system, result).expect("failed to write to string");
    String::from_utf8(buf).expect("failed to read the string we wrote")
}

/// One `0`/`1` character per AIGER input in declaration order. Inputs the
/// trace does not mention default to `0`.
fn input_row_to_string(system: &TransitionSystem, row: &Cube) -> String {
    system
        .input_vars()
        .iter()
        .map(|var| match row.find(var) {
            Some(lit) if lit.is_positive() => '1',
            _ => '0',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{CnfFormula, Literal, VariableStore};

    fn make_system(inputs: usize, initial_cube: Vec<Option<bool>>) -> TransitionSystem {
        let store = VariableStore::new();
        let states = initial_cube.len();
        TransitionSystem::new(
            store.make_range(inputs),
            store.make_range(states),
            store.make_range(states),
            store.make_range(0),
            initial_cube,
            CnfFormula::new(),
            CnfFormula::new(),
            CnfFormula::new(),
        )
    }

    #[test]
    fn safe_witness() {
        let system = make_system(1, vec![Some(false)]);
        assert_eq!(
            witness_to_string(&system, &VerificationResult::Safe),
            "0\nb0\n.\n"
        );
    }

    #[test]
    fn unsafe_witness_with_inputs() {
        let system = make_system(2, vec![Some(false), Some(true)]);
        let inputs = system.input_vars();
        let rows = vec![
            Cube::new(vec![
                Literal::new(inputs.nth(0), true),
                Literal::new(inputs.nth(1), false),
            ]),
            Cube::new(vec![
                Literal::new(inputs.nth(0), false),
                Literal::new(inputs.nth(1), true),
            ]),
        ];
        assert_eq!(
            witness_to_string(&system, &VerificationResult::Unsafe(rows)),
            "1\nb0\n01\n10\n01\n.\n"
        );
    }

    #[test]
    fn nondeterministic_resets_print_as_dont_care() {
        let system = make_system(0, vec![Some(false), None, Some(true)]);
        let rows = vec![Cube::default()];
        assert_eq!(
            witness_to_string(&system, &VerificationResult::Unsafe(rows)),
            "1\nb0\n0x1\n\n.\n"
        );
    }

    #[test]
    fn missing_input_literals_default_to_zero() {
        let system = make_system(3, vec![]);
        let inputs = system.input_vars();
        let rows = vec![Cube::new(vec![Literal::new(inputs.nth(1), true)])];
        assert_eq!(
            witness_to_string(&system, &VerificationResult::Unsafe(rows)),
            "1\nb0\n\n010\n.\n"
        );
    }
}
