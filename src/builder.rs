// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Turns an And-Inverter-Graph into a CNF transition system.
//!
//! The graph is preprocessed twice before clausification: constant
//! propagation finds literals that hold in every step, and a backward fixed
//! point computes the cone of influence of the error literal. Latches whose
//! value is constant or that cannot influence the error are dropped from the
//! state variables, which keeps the reachability problem as small as the
//! error formula allows.

use crate::aiger::{self, Aig, AigerLiteral, TRUE_LITERAL};
use crate::logic::{CnfFormula, Literal, VariableRange, VariableStore};
use crate::transition_system::TransitionSystem;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("expected exactly one output or bad state, found {outputs} outputs and {bads} bad states")]
    UnsupportedErrorModel { outputs: usize, bads: usize },
    #[error("justice properties are not supported")]
    JusticeUnsupported,
    #[error("fairness constraints are not supported")]
    FairnessUnsupported,
    #[error("invariant constraints are not supported")]
    ConstraintsUnsupported,
    #[error(transparent)]
    Aiger(#[from] aiger::AigerError),
}

/// The result of the two preprocessing passes.
pub struct AigerInfo<'a> {
    pub aig: &'a Aig,

    // AIGER literals that are necessarily true; for any literal in the set
    // its negation is necessarily false. Such literals do not need to be
    // computed by the transition formula.
    pub true_literals: FxHashSet<AigerLiteral>,

    // The (stripped) current-state literals of the latches that can
    // influence the error literal and are not themselves decided. All other
    // latches are dropped from the state variables.
    pub error_coi: FxHashSet<AigerLiteral>,
}

impl<'a> AigerInfo<'a> {
    pub fn is_true(&self, lit: AigerLiteral) -> bool {
        self.true_literals.contains(&lit)
    }

    pub fn is_false(&self, lit: AigerLiteral) -> bool {
        self.true_literals.contains(&aiger::negate(lit))
    }

    pub fn is_decided(&self, lit: AigerLiteral) -> bool {
        self.is_true(lit) || self.is_false(lit)
    }
}

fn get_error_literal(aig: &Aig) -> AigerLiteral {
    *aig.outputs.first().unwrap_or_else(|| &aig.bads[0])
}

/// One forward pass over the gates in declaration order. A gate output is
/// true when both operands are true and false when either operand is false;
/// everything else stays undecided.
fn propagate_trues(info: &mut AigerInfo) {
    info.true_literals.insert(TRUE_LITERAL);

    for gate in info.aig.ands.iter() {
        if info.is_true(gate.rhs0) && info.is_true(gate.rhs1) {
            info.true_literals.insert(gate.lhs);
        } else if info.is_false(gate.rhs0) || info.is_false(gate.rhs1) {
            info.true_literals.insert(aiger::negate(gate.lhs));
        }
    }
}

/// Backward fixed point from the error literal. Latches feed back into the
/// combinational logic, so the passes repeat until nothing changes.
fn compute_error_coi(info: &mut AigerInfo) {
    let mut required = FxHashSet::default();
    required.insert(aiger::strip(get_error_literal(info.aig)));

    loop {
        let mut changed = false;

        for gate in info.aig.ands.iter().rev() {
            if required.contains(&aiger::strip(gate.lhs)) && !info.is_decided(gate.lhs) {
                changed |= required.insert(aiger::strip(gate.rhs0));
                changed |= required.insert(aiger::strip(gate.rhs1));
            }
        }

        for latch in info.aig.latches.iter() {
            if required.contains(&aiger::strip(latch.current)) {
                changed |= required.insert(aiger::strip(latch.next));
            }
        }

        if !changed {
            break;
        }
    }

    info.error_coi = info
        .aig
        .latches
        .iter()
        .map(|latch| aiger::strip(latch.current))
        .filter(|current| required.contains(current) && !info.is_decided(*current))
        .collect();
}

pub fn make_aiger_info(aig: &Aig) -> Result<AigerInfo<'_>, BuildError> {
    if aig.outputs.len() + aig.bads.len() != 1 {
        return Err(BuildError::UnsupportedErrorModel {
            outputs: aig.outputs.len(),
            bads: aig.bads.len(),
        });
    }
    if aig.num_justice > 0 {
        return Err(BuildError::JusticeUnsupported);
    }
    if aig.num_fairness > 0 {
        return Err(BuildError::FairnessUnsupported);
    }
    if !aig.constraints.is_empty() {
        return Err(BuildError::ConstraintsUnsupported);
    }

    let mut info = AigerInfo {
        aig,
        true_literals: FxHashSet::default(),
        error_coi: FxHashSet::default(),
    };
    propagate_trues(&mut info);
    compute_error_coi(&mut info);
    Ok(info)
}

/// Preprocessing results plus the variable allocation.
pub struct Context<'a> {
    pub info: AigerInfo<'a>,

    pub input_vars: VariableRange,
    pub state_vars: VariableRange,
    pub next_state_vars: VariableRange,
    pub and_vars: VariableRange,

    // stripped current-state literal -> offset into the state ranges
    latch_offsets: FxHashMap<AigerLiteral, usize>,
}

pub fn make_context<'a>(store: &VariableStore, info: AigerInfo<'a>) -> Context<'a> {
    debug_assert!(info.aig.is_reencoded());

    let surviving: Vec<AigerLiteral> = info
        .aig
        .latches
        .iter()
        .map(|latch| aiger::strip(latch.current))
        .filter(|current| info.error_coi.contains(current))
        .collect();

    let input_vars = store.make_range(info.aig.inputs.len());
    let state_vars = store.make_range(surviving.len());
    let next_state_vars = store.make_range(surviving.len());
    // one variable per gate, including gates outside the cone of influence;
    // clausification simply never mentions those
    let and_vars = store.make_range(info.aig.ands.len());

    let latch_offsets = surviving
        .into_iter()
        .enumerate()
        .map(|(offset, current)| (current, offset))
        .collect();

    Context {
        info,
        input_vars,
        state_vars,
        next_state_vars,
        and_vars,
        latch_offsets,
    }
}

impl<'a> Context<'a> {
    fn num_inputs(&self) -> u32 {
        self.info.aig.inputs.len() as u32
    }

    fn num_latches(&self) -> u32 {
        self.info.aig.latches.len() as u32
    }

    /// The gate with the given (stripped) output literal, if any.
    fn gate_index(&self, lit: AigerLiteral) -> Option<usize> {
        let var = aiger::var_of(lit);
        let first_gate = self.num_inputs() + self.num_latches() + 1;
        if var >= first_gate && var < first_gate + self.info.aig.ands.len() as u32 {
            Some((var - first_gate) as usize)
        } else {
            None
        }
    }
}

/// Resolves an undecided AIGER literal to the corresponding solver literal,
/// preserving polarity (even is positive, odd is negated).
pub fn from_aiger_lit(ctx: &Context, lit: AigerLiteral) -> Literal {
    debug_assert!(!ctx.info.is_decided(lit));

    let var = aiger::var_of(lit);
    let positive = !aiger::is_negated(lit);
    debug_assert!(var > 0);

    let variable = if var <= ctx.num_inputs() {
        ctx.input_vars.nth((var - 1) as usize)
    } else if var <= ctx.num_inputs() + ctx.num_latches() {
        let offset = ctx
            .latch_offsets
            .get(&aiger::strip(lit))
            .expect("latch outside the error cone of influence");
        ctx.state_vars.nth(*offset)
    } else {
        let index = ctx
            .gate_index(lit)
            .expect("literal exceeds the declared variables");
        ctx.and_vars.nth(index)
    };
    Literal::new(variable, positive)
}

/// Tseitin clauses for `lhs = rhs0 /\ rhs1`. Operands that are constantly
/// true degenerate the gate into an equivalence with the other operand; a
/// false operand would make the output decided, which the caller rules out.
fn clausify_and(ctx: &Context, gate_index: usize, out: &mut CnfFormula) {
    let gate = &ctx.info.aig.ands[gate_index];
    debug_assert!(!ctx.info.is_decided(gate.lhs));

    let lhs = from_aiger_lit(ctx, gate.lhs);
    if ctx.info.is_true(gate.rhs0) {
        let rhs = from_aiger_lit(ctx, gate.rhs1);
        out.add_clause(&[!lhs, rhs]);
        out.add_clause(&[lhs, !rhs]);
    } else if ctx.info.is_true(gate.rhs1) {
        let rhs = from_aiger_lit(ctx, gate.rhs0);
        out.add_clause(&[!lhs, rhs]);
        out.add_clause(&[lhs, !rhs]);
    } else {
        let rhs0 = from_aiger_lit(ctx, gate.rhs0);
        let rhs1 = from_aiger_lit(ctx, gate.rhs1);
        out.add_clause(&[!lhs, rhs0]);
        out.add_clause(&[!lhs, rhs1]);
        out.add_clause(&[!rhs0, !rhs1, lhs]);
    }
}

/// Collects the undecided gates in the reverse subgraph rooted at `root`
/// into `gates`. The shared `visited` set keeps every gate clausified at
/// most once across multiple roots.
fn collect_cone(
    ctx: &Context,
    root: AigerLiteral,
    visited: &mut FxHashSet<AigerLiteral>,
    gates: &mut Vec<usize>,
) {
    let mut stack: SmallVec<[AigerLiteral; 32]> = SmallVec::new();
    stack.push(aiger::strip(root));

    while let Some(lit) = stack.pop() {
        if ctx.info.is_decided(lit) || !visited.insert(lit) {
            continue;
        }
        if let Some(index) = ctx.gate_index(lit) {
            gates.push(index);
            let gate = &ctx.info.aig.ands[index];
            stack.push(aiger::strip(gate.rhs0));
            stack.push(aiger::strip(gate.rhs1));
        }
    }
}

fn build_init(ctx: &Context) -> CnfFormula {
    let mut init = CnfFormula::new();
    for latch in ctx.info.aig.latches.iter() {
        let Some(offset) = ctx.latch_offsets.get(&aiger::strip(latch.current)) else {
            continue;
        };
        if let Some(value) = latch.reset {
            init.add_clause(&[Literal::new(ctx.state_vars.nth(*offset), value)]);
        }
    }
    init
}

fn build_trans(ctx: &Context) -> CnfFormula {
    let mut trans = CnfFormula::new();

    let mut visited = FxHashSet::default();
    let mut gates = Vec::new();
    for latch in ctx.info.aig.latches.iter() {
        if ctx.latch_offsets.contains_key(&aiger::strip(latch.current))
            && !ctx.info.is_decided(latch.next)
        {
            collect_cone(ctx, latch.next, &mut visited, &mut gates);
        }
    }
    gates.sort_unstable();
    for index in gates {
        clausify_and(ctx, index, &mut trans);
    }

    for latch in ctx.info.aig.latches.iter() {
        let Some(offset) = ctx.latch_offsets.get(&aiger::strip(latch.current)) else {
            continue;
        };
        let next = Literal::from(ctx.next_state_vars.nth(*offset));
        if ctx.info.is_true(latch.next) {
            trans.add_clause(&[next]);
        } else if ctx.info.is_false(latch.next) {
            trans.add_clause(&[!next]);
        } else {
            let f = from_aiger_lit(ctx, latch.next);
            trans.add_clause(&[!next, f]);
            trans.add_clause(&[next, !f]);
        }
    }
    trans
}

fn build_error(ctx: &Context) -> CnfFormula {
    let error_lit = get_error_literal(ctx.info.aig);
    if ctx.info.is_true(error_lit) {
        return CnfFormula::constant(true);
    }
    if ctx.info.is_false(error_lit) {
        return CnfFormula::constant(false);
    }

    let mut error = CnfFormula::new();
    let mut visited = FxHashSet::default();
    let mut gates = Vec::new();
    collect_cone(ctx, error_lit, &mut visited, &mut gates);
    gates.sort_unstable();
    for index in gates {
        clausify_and(ctx, index, &mut error);
    }
    error.add_clause(&[from_aiger_lit(ctx, error_lit)]);
    error
}

/// The initial latch cube in AIGER declaration order, including latches that
/// were dropped from the state variables. Only used to print the witness.
fn initial_cube(ctx: &Context) -> Vec<Option<bool>> {
    ctx.info.aig.latches.iter().map(|latch| latch.reset).collect()
}

pub fn build_from_context(ctx: &Context) -> TransitionSystem {
    TransitionSystem::new(
        ctx.input_vars,
        ctx.state_vars,
        ctx.next_state_vars,
        ctx.and_vars,
        initial_cube(ctx),
        build_init(ctx),
        build_trans(ctx),
        build_error(ctx),
    )
}

pub fn build_from_aiger(
    store: &VariableStore,
    aig: &mut Aig,
) -> Result<TransitionSystem, BuildError> {
    aig.reencode()?;
    let info = make_aiger_info(aig)?;
    let ctx = make_context(store, info);
    Ok(build_from_context(&ctx))
}
