// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! A lightweight facade over the incremental CaDiCaL solver. Queries are
//! built through a single-use builder so that assumptions and one-shot
//! constraints cannot leak across solves.

use crate::logic::{CnfFormula, Cube, Literal, Variable, VariableRange, VariableStore};

pub struct Solver {
    sat: cadical::Solver,
    store: VariableStore,
}

impl Solver {
    pub fn new(store: &VariableStore) -> Self {
        Self {
            sat: cadical::Solver::new(),
            store: store.clone(),
        }
    }

    /// Permanently asserts all clauses of the formula.
    pub fn assert_formula(&mut self, formula: &CnfFormula) {
        for clause in formula.clauses() {
            self.sat.add_clause(clause.iter().map(|lit| lit.value()));
        }
    }

    /// Permanently asserts a single clause.
    pub fn assert_clause(&mut self, clause: &[Literal]) {
        debug_assert!(clause.iter().all(|lit| !lit.is_separator()));
        self.sat.add_clause(clause.iter().map(|lit| lit.value()));
    }

    /// Starts building a new query. The builder must be consumed by exactly
    /// one call to [`Query::is_sat`] or [`Query::is_unsat`].
    pub fn query(&mut self) -> Query<'_> {
        Query {
            solver: self,
            assumptions: Vec::new(),
            one_shot_activators: Vec::new(),
        }
    }

    /// Only valid after a satisfiable query. Variables the solver never saw
    /// count as false.
    pub fn is_true_in_model(&self, var: Variable) -> bool {
        self.sat.value(var.id() as i32) == Some(true)
    }

    /// The model restricted to a variable range, as a cube with one literal
    /// per variable.
    pub fn get_model(&self, range: VariableRange) -> Cube {
        Cube::new(
            range
                .iter()
                .map(|var| Literal::new(var, self.is_true_in_model(var)))
                .collect(),
        )
    }

    /// Only valid after an unsatisfiable query; true iff the assumed literal
    /// was part of the failed assumption core.
    pub fn is_in_core(&self, lit: Literal) -> bool {
        self.sat.failed(lit.value())
    }

    /// The subset of the given assumed literals that the solver reports in
    /// the failed core, in the original order.
    pub fn get_core(&self, literals: &[Literal]) -> Vec<Literal> {
        literals
            .iter()
            .copied()
            .filter(|lit| self.is_in_core(*lit))
            .collect()
    }

    /// Like [`get_core`](Self::get_core), but checks membership of `f(lit)`
    /// while returning the unmapped literals. Used to pull cores back
    /// through variable substitutions.
    pub fn get_core_mapped(
        &self,
        literals: &[Literal],
        f: impl Fn(Literal) -> Literal,
    ) -> Vec<Literal> {
        literals
            .iter()
            .copied()
            .filter(|lit| self.is_in_core(f(*lit)))
            .collect()
    }

    /// Failed-core literals over a whole range, testing both polarities.
    pub fn get_core_vars(&self, range: VariableRange) -> Vec<Literal> {
        let mut core = Vec::new();
        for var in range.iter() {
            let lit = Literal::from(var);
            if self.is_in_core(lit) {
                core.push(lit);
            } else if self.is_in_core(!lit) {
                core.push(!lit);
            }
        }
        core
    }
}

/// A single-use query: collect assumptions and one-shot constraints, then
/// consume the builder with a solve call.
///
/// One-shot constraint clauses are implemented with a fresh activator
/// variable that is assumed for this solve and permanently disabled
/// afterwards, which gives them the lifetime of a native `constrain` clause
/// on backends without one.
#[must_use]
pub struct Query<'a> {
    solver: &'a mut Solver,
    assumptions: Vec<Literal>,
    one_shot_activators: Vec<Variable>,
}

impl<'a> Query<'a> {
    pub fn assume(mut self, lit: Literal) -> Self {
        debug_assert!(!lit.is_separator());
        self.assumptions.push(lit);
        self
    }

    pub fn assume_all(mut self, literals: &[Literal]) -> Self {
        self.assumptions.extend_from_slice(literals);
        self
    }

    pub fn assume_mapped(mut self, literals: &[Literal], f: impl Fn(Literal) -> Literal) -> Self {
        self.assumptions.extend(literals.iter().map(|lit| f(*lit)));
        self
    }

    /// Adds `¬l1 ∨ … ∨ ¬ln` for this solve only.
    pub fn constrain_not(self, cube: &Cube) -> Self {
        let clause: Vec<Literal> = cube.literals().iter().map(|lit| !*lit).collect();
        self.constrain_clause(&clause)
    }

    /// Adds the clause for this solve only.
    pub fn constrain_clause(mut self, clause: &[Literal]) -> Self {
        let activator = self.solver.store.make();
        let mut activated: Vec<Literal> = clause.to_vec();
        activated.push(Literal::new(activator, false));
        self.solver.assert_clause(&activated);
        self.assumptions.push(Literal::from(activator));
        self.one_shot_activators.push(activator);
        self
    }

    pub fn is_sat(self) -> bool {
        let Query {
            solver,
            assumptions,
            one_shot_activators,
        } = self;
        let result = solver
            .sat
            .solve_with(assumptions.iter().map(|lit| lit.value()));
        for activator in one_shot_activators {
            solver.assert_clause(&[Literal::new(activator, false)]);
        }
        // We run without resource limits, so an inconclusive answer is a
        // program bug.
        result.expect("the SAT solver returned UNKNOWN")
    }

    pub fn is_unsat(self) -> bool {
        !self.is_sat()
    }
}
