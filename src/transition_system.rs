// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::logic::{CnfFormula, Literal, Variable, VariableRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Input,
    State,
    NextState,
    Auxiliary,
}

/// A Boolean transition system in CNF. `Init` and `Error` range over the
/// state variables (`Error` also over the inputs), `Trans` over state, input
/// and next-state variables. All three may additionally mention auxiliary
/// Tseitin variables.
#[derive(Debug, Clone)]
pub struct TransitionSystem {
    input_vars: VariableRange,
    state_vars: VariableRange,
    next_state_vars: VariableRange,
    aux_vars: VariableRange,

    // Not every AIGER latch survives as a state variable (latches outside the
    // cone of influence of the error are dropped), but the counterexample
    // trace has to print the initial state over *all* latches in their
    // declaration order. `None` marks a nondeterministic reset.
    initial_cube: Vec<Option<bool>>,

    init: CnfFormula,
    trans: CnfFormula,
    error: CnfFormula,
}

impl TransitionSystem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_vars: VariableRange,
        state_vars: VariableRange,
        next_state_vars: VariableRange,
        aux_vars: VariableRange,
        initial_cube: Vec<Option<bool>>,
        init: CnfFormula,
        trans: CnfFormula,
        error: CnfFormula,
    ) -> Self {
        assert_eq!(state_vars.size(), next_state_vars.size());
        Self {
            input_vars,
            state_vars,
            next_state_vars,
            aux_vars,
            initial_cube,
            init,
            trans,
            error,
        }
    }

    #[inline]
    pub fn input_vars(&self) -> VariableRange {
        self.input_vars
    }

    #[inline]
    pub fn state_vars(&self) -> VariableRange {
        self.state_vars
    }

    #[inline]
    pub fn next_state_vars(&self) -> VariableRange {
        self.next_state_vars
    }

    #[inline]
    pub fn aux_vars(&self) -> VariableRange {
        self.aux_vars
    }

    pub fn initial_cube(&self) -> &[Option<bool>] {
        &self.initial_cube
    }

    pub fn init(&self) -> &CnfFormula {
        &self.init
    }

    pub fn trans(&self) -> &CnfFormula {
        &self.trans
    }

    pub fn error(&self) -> &CnfFormula {
        &self.error
    }

    /// The kind of the variable and its position within its range. Panics
    /// when the variable belongs to none of the four ranges.
    pub fn get_var_info(&self, var: Variable) -> (VarKind, usize) {
        if self.input_vars.contains(var) {
            (VarKind::Input, self.input_vars.offset(var))
        } else if self.state_vars.contains(var) {
            (VarKind::State, self.state_vars.offset(var))
        } else if self.next_state_vars.contains(var) {
            (VarKind::NextState, self.next_state_vars.offset(var))
        } else if self.aux_vars.contains(var) {
            (VarKind::Auxiliary, self.aux_vars.offset(var))
        } else {
            unreachable!("variable {var:?} belongs to no range of the system")
        }
    }

    /// Substitutes a state literal by the next-state literal at the same
    /// position.
    pub fn prime(&self, lit: Literal) -> Literal {
        let (kind, pos) = self.get_var_info(lit.var());
        debug_assert_eq!(kind, VarKind::State);
        lit.substitute(self.next_state_vars.nth(pos))
    }

    /// Inverse of [`prime`](Self::prime).
    pub fn unprime(&self, lit: Literal) -> Literal {
        let (kind, pos) = self.get_var_info(lit.var());
        debug_assert_eq!(kind, VarKind::NextState);
        lit.substitute(self.state_vars.nth(pos))
    }
}
