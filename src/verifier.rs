// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! The verification engine: property directed reachability over transitive
//! powers.
//!
//! Frame `k` of the trace collects *arrows* `(c, d)`, each recording that no
//! path of the `k`-th transitive power frame leads from a state in `c` to a
//! state in `d`. Assuming the activator suffix from `k` upwards enforces
//! every arrow still valid at level `k`. A counterexample candidate taken
//! from the error solver is recursively split at a middle state; obligations
//! that cannot be discharged concretely are generalized with failed-literal
//! cores and blocked, which steers later queries away from dead middles.

use crate::logic::{Cube, Literal, VariableRange, VariableStore};
use crate::solver::Solver;
use crate::transition_system::{TransitionSystem, VarKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Which side of a blocked arrow receives a conflict literal when both sides
/// offer one during generalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidePreference {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    /// Seed for the generalization coin flips; drawn from the operating
    /// system when absent.
    pub seed: Option<u64>,
    /// Forces the generalization side instead of flipping a coin.
    pub side_preference: Option<SidePreference>,
}

/// The verdict. An unsafe system comes with one cube of input literals per
/// step of the counterexample trace.
#[derive(Debug)]
pub enum VerificationResult {
    Safe,
    Unsafe(Vec<Cube>),
}

type CexHandle = usize;

/// One node of the counterexample tree. Both state cubes are unprimed; the
/// input cube is only present once a concrete single-step edge (or, for the
/// root, the error row) has been witnessed.
struct CexEntry {
    s_state: Cube,
    t_state: Cube,
    input: Option<Cube>,
    left: Option<CexHandle>,
    right: Option<CexHandle>,
}

/// Append-only node pool. Handles are indices and are invalidated by
/// `clear`, so they must never outlive a main-loop round.
#[derive(Default)]
struct CexPool {
    entries: Vec<CexEntry>,
}

impl CexPool {
    fn make(&mut self, s_state: Cube, t_state: Cube, input: Option<Cube>) -> CexHandle {
        self.entries.push(CexEntry {
            s_state,
            t_state,
            input,
            left: None,
            right: None,
        });
        self.entries.len() - 1
    }

    fn get(&self, handle: CexHandle) -> &CexEntry {
        &self.entries[handle]
    }

    fn get_mut(&mut self, handle: CexHandle) -> &mut CexEntry {
        &mut self.entries[handle]
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy)]
struct ProofObligation {
    handle: CexHandle,
    level: usize,
}

#[derive(Clone)]
struct Arrow {
    from: Cube,
    to: Cube,
}

struct Frame {
    activator: Literal,
    arrows: Vec<Arrow>,
}

pub struct Verifier<'a> {
    store: VariableStore,
    system: &'a TransitionSystem,

    // We need to solve two kinds of formulae:
    //   1. I(X) /\ TF[depth](X, X') /\ E(X') to find a candidate pair, and
    //   2. TF[k](X, X°) /\ TF[k](X°, X') /\ s /\ t' to split it,
    // plus the concrete probes T(X, Y, X') /\ s /\ t' and
    // T(X, Y1, X°) /\ T(X°, Y2, X') /\ s /\ t'. The copies of T live in the
    // consecution solver behind their own activators.
    error_solver: Solver,
    consecution_solver: Solver,

    middle_state_vars: VariableRange, // X°
    right_input_vars: VariableRange,  // Y2
    right_aux_vars: VariableRange,    // keeps the two copies of T apart

    trans_activator: Literal,
    left_trans_activator: Literal,
    right_trans_activator: Literal,

    frames: Vec<Frame>,
    pool: CexPool,

    rng: StdRng,
    side_preference: Option<SidePreference>,
}

fn shift_literal(from: VariableRange, to: VariableRange, lit: Literal) -> Literal {
    debug_assert!(from.contains(lit.var()));
    lit.substitute(to.nth(from.offset(lit.var())))
}

/// Substitutes the literals of `cube` that lie in `from` into `to`,
/// dropping all others.
fn shift_cube(from: VariableRange, to: VariableRange, cube: &Cube) -> Cube {
    Cube::new(
        cube.literals()
            .iter()
            .filter(|lit| from.contains(lit.var()))
            .map(|lit| shift_literal(from, to, *lit))
            .collect(),
    )
}

fn intersects(sorted_a: &[Literal], sorted_b: &[Literal]) -> bool {
    let (mut a, mut b) = (sorted_a.iter().peekable(), sorted_b.iter().peekable());
    while let (Some(x), Some(y)) = (a.peek(), b.peek()) {
        match x.cmp(y) {
            std::cmp::Ordering::Less => {
                a.next();
            }
            std::cmp::Ordering::Greater => {
                b.next();
            }
            std::cmp::Ordering::Equal => return true,
        }
    }
    false
}

impl<'a> Verifier<'a> {
    pub fn new(store: &VariableStore, system: &'a TransitionSystem, options: Options) -> Self {
        let middle_state_vars = store.make_range(system.state_vars().size());
        let right_input_vars = store.make_range(system.input_vars().size());
        let right_aux_vars = store.make_range(system.aux_vars().size());
        let trans_activator = Literal::from(store.make());
        let left_trans_activator = Literal::from(store.make());
        let right_trans_activator = Literal::from(store.make());

        // T(X, Y, X') -> T(X, Y, X°)
        let make_left = |lit: Literal| {
            let (kind, pos) = system.get_var_info(lit.var());
            match kind {
                VarKind::NextState => lit.substitute(middle_state_vars.nth(pos)),
                _ => lit,
            }
        };
        // T(X, Y, X') -> T(X°, Y2, X'), with fresh auxiliaries
        let make_right = |lit: Literal| {
            let (kind, pos) = system.get_var_info(lit.var());
            match kind {
                VarKind::State => lit.substitute(middle_state_vars.nth(pos)),
                VarKind::Input => lit.substitute(right_input_vars.nth(pos)),
                VarKind::Auxiliary => lit.substitute(right_aux_vars.nth(pos)),
                VarKind::NextState => lit,
            }
        };
        let left_trans = system.trans().map(make_left);
        let right_trans = system.trans().map(make_right);

        let mut error_solver = Solver::new(store);
        error_solver.assert_formula(system.init());
        error_solver.assert_formula(&system.error().map(|lit| {
            let (kind, pos) = system.get_var_info(lit.var());
            match kind {
                VarKind::State => lit.substitute(system.next_state_vars().nth(pos)),
                _ => lit,
            }
        }));

        let mut consecution_solver = Solver::new(store);
        consecution_solver.assert_formula(&system.trans().activate(trans_activator.var()));
        consecution_solver.assert_formula(&left_trans.activate(left_trans_activator.var()));
        consecution_solver.assert_formula(&right_trans.activate(right_trans_activator.var()));

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            store: store.clone(),
            system,
            error_solver,
            consecution_solver,
            middle_state_vars,
            right_input_vars,
            right_aux_vars,
            trans_activator,
            left_trans_activator,
            right_trans_activator,
            frames: Vec::new(),
            pool: CexPool::default(),
            rng,
            side_preference: options.side_preference,
        }
    }

    pub fn run(&mut self) -> VerificationResult {
        if let Some(trace) = self.check_trivial_cases() {
            info!(rows = trace.len(), "found a trivial counterexample");
            return VerificationResult::Unsafe(trace);
        }

        self.push_frame();
        loop {
            if let Some(root) = self.get_error_cex() {
                let obligation = ProofObligation {
                    handle: root,
                    level: self.depth(),
                };
                if self.solve_obligation(obligation) {
                    let trace = self.build_counterexample(root);
                    info!(rows = trace.len(), "the system is unsafe");
                    return VerificationResult::Unsafe(trace);
                }
            } else {
                self.push_frame();
                info!(depth = self.depth(), "no counterexample at this depth");
                if self.propagate() {
                    info!("all arrows propagated, the system is safe");
                    return VerificationResult::Safe;
                }
            }
            self.pool.clear();
        }
    }

    fn depth(&self) -> usize {
        debug_assert!(!self.frames.is_empty());
        self.frames.len() - 1
    }

    fn push_frame(&mut self) {
        let activator = Literal::from(self.store.make());
        self.frames.push(Frame {
            activator,
            arrows: Vec::new(),
        });
    }

    fn activators_from(&self, level: usize) -> Vec<Literal> {
        debug_assert!(level <= self.depth());
        self.frames[level..].iter().map(|f| f.activator).collect()
    }

    fn prime(&self, lit: Literal) -> Literal {
        self.system.prime(lit)
    }

    fn circle(&self, lit: Literal) -> Literal {
        shift_literal(self.system.state_vars(), self.middle_state_vars, lit)
    }

    fn uncircle(&self, cube: &Cube) -> Cube {
        shift_cube(self.middle_state_vars, self.system.state_vars(), cube)
    }

    fn is_state_cube(&self, cube: &Cube) -> bool {
        cube.literals()
            .iter()
            .all(|lit| self.system.state_vars().contains(lit.var()))
    }

    /// Catches counterexamples of length zero and one, which the frame
    /// machinery cannot express.
    fn check_trivial_cases(&mut self) -> Option<Vec<Cube>> {
        let system = self.system;

        // I(X) /\ E(X, Y)
        let mut solver = Solver::new(&self.store);
        solver.assert_formula(system.init());
        solver.assert_formula(system.error());
        if solver.query().is_sat() {
            return Some(vec![solver.get_model(system.input_vars())]);
        }

        // I(X) /\ T(X, Y, X') /\ E(X', Y2), with E's auxiliaries moved out
        // of T's way
        let mut solver = Solver::new(&self.store);
        solver.assert_formula(system.init());
        solver.assert_formula(system.trans());
        let shifted_error = system.error().map(|lit| {
            let (kind, pos) = system.get_var_info(lit.var());
            match kind {
                VarKind::State => lit.substitute(system.next_state_vars().nth(pos)),
                VarKind::Input => lit.substitute(self.right_input_vars.nth(pos)),
                VarKind::Auxiliary => lit.substitute(self.right_aux_vars.nth(pos)),
                VarKind::NextState => unreachable!("the error formula must be unprimed"),
            }
        });
        solver.assert_formula(&shifted_error);
        if solver.query().is_sat() {
            let first = solver.get_model(system.input_vars());
            let second = shift_cube(
                self.right_input_vars,
                system.input_vars(),
                &solver.get_model(self.right_input_vars),
            );
            return Some(vec![first, second]);
        }

        None
    }

    /// Looks for a not-yet-blocked pair of an initial and an error state at
    /// the current depth.
    fn get_error_cex(&mut self) -> Option<CexHandle> {
        let activators = self.activators_from(self.depth());
        let sat = self
            .error_solver
            .query()
            .assume_all(&activators)
            .is_sat();
        if !sat {
            return None;
        }

        let s = self.error_solver.get_model(self.system.state_vars());
        let t = shift_cube(
            self.system.next_state_vars(),
            self.system.state_vars(),
            &self.error_solver.get_model(self.system.next_state_vars()),
        );
        let input = self.error_solver.get_model(self.system.input_vars());
        debug!(depth = self.depth(), "extracted an error candidate");
        Some(self.pool.make(s, t, Some(input)))
    }

    /// True iff a real counterexample path rooted at the obligation has been
    /// confirmed. A failing obligation always records one blocked arrow.
    fn solve_obligation(&mut self, po: ProofObligation) -> bool {
        let (s, t) = {
            let entry = self.pool.get(po.handle);
            (entry.s_state.clone(), entry.t_state.clone())
        };
        debug_assert!(self.is_state_cube(&s) && self.is_state_cube(&t));

        // a path of length zero
        if s == t {
            return true;
        }

        if self.has_concrete_edge(po.handle, &s, &t) {
            return true;
        }

        if po.level >= 2 {
            // keep splitting at fresh middle states; every failed half
            // blocks an arrow at the level below, so the next query cannot
            // pick the same middle again
            while let Some((left, right)) = self.split_in_the_middle(po.handle, &s, &t, po.level) {
                if self.solve_obligation(left) && self.solve_obligation(right) {
                    return true;
                }
            }
        } else if po.level == 1 {
            if self.has_path_of_length_two(po.handle, &s, &t) {
                return true;
            }
        }
        // level 0 permits no path longer than a single step

        let (c, d) = self.generalize_blocked_arrow(&s, &t, po.level);
        self.block_arrow_at(&c, &d, po.level, 1);
        false
    }

    /// Probes for a single concrete transition from `s` to `t` and stores
    /// its input on success.
    fn has_concrete_edge(&mut self, handle: CexHandle, s: &Cube, t: &Cube) -> bool {
        let system = self.system;
        let sat = self
            .consecution_solver
            .query()
            .assume(self.trans_activator)
            .assume_all(s.literals())
            .assume_mapped(t.literals(), |lit| system.prime(lit))
            .is_sat();
        if sat {
            let input = self.consecution_solver.get_model(system.input_vars());
            self.pool.get_mut(handle).input = Some(input);
        }
        sat
    }

    /// Probes for a concrete path of length exactly two. On success both
    /// halves are witnessed edges, so the children are created as finished
    /// leaves.
    fn has_path_of_length_two(&mut self, handle: CexHandle, s: &Cube, t: &Cube) -> bool {
        let system = self.system;
        let sat = self
            .consecution_solver
            .query()
            .assume(self.left_trans_activator)
            .assume(self.right_trans_activator)
            .assume_all(s.literals())
            .assume_mapped(t.literals(), |lit| system.prime(lit))
            .is_sat();
        if !sat {
            return false;
        }

        let middle = self.uncircle(&self.consecution_solver.get_model(self.middle_state_vars));
        let left_input = self.consecution_solver.get_model(system.input_vars());
        let right_input = shift_cube(
            self.right_input_vars,
            system.input_vars(),
            &self.consecution_solver.get_model(self.right_input_vars),
        );

        let left = self.pool.make(s.clone(), middle.clone(), Some(left_input));
        let right = self.pool.make(middle, t.clone(), Some(right_input));
        let entry = self.pool.get_mut(handle);
        entry.left = Some(left);
        entry.right = Some(right);
        true
    }

    /// Asks for a middle state compatible with the arrows of the level
    /// below. Returns the two half obligations, or `None` once every middle
    /// is blocked.
    fn split_in_the_middle(
        &mut self,
        handle: CexHandle,
        s: &Cube,
        t: &Cube,
        level: usize,
    ) -> Option<(ProofObligation, ProofObligation)> {
        debug_assert!(level >= 2);
        let system = self.system;
        let activators = self.activators_from(level - 1);
        let sat = self
            .consecution_solver
            .query()
            .assume_all(&activators)
            .assume_all(s.literals())
            .assume_mapped(t.literals(), |lit| system.prime(lit))
            .is_sat();
        if !sat {
            return None;
        }

        let middle = self.uncircle(&self.consecution_solver.get_model(self.middle_state_vars));
        let left = self.pool.make(s.clone(), middle.clone(), None);
        let right = self.pool.make(middle, t.clone(), None);
        let entry = self.pool.get_mut(handle);
        entry.left = Some(left);
        entry.right = Some(right);
        Some((
            ProofObligation {
                handle: left,
                level: level - 1,
            },
            ProofObligation {
                handle: right,
                level: level - 1,
            },
        ))
    }

    /// Shrinks the failed pair `(s, t)` to `(c, d)` with `c ⊆ s`, `d ⊆ t`
    /// such that the query that just failed stays unsatisfiable, no single
    /// transition leads from `c` to `d`, and the literal sets stay disjoint.
    fn generalize_blocked_arrow(&mut self, s: &Cube, t: &Cube, level: usize) -> (Cube, Cube) {
        let system = self.system;

        // start from the failed-literal cores of the last query
        let mut c_lits = self.consecution_solver.get_core(s.literals());
        let mut d_lits = self
            .consecution_solver
            .get_core_mapped(t.literals(), |lit| system.prime(lit));

        if intersects(&c_lits, &d_lits) {
            // s and t are distinct total state cubes, so they disagree on
            // some variable; forcing that variable into both sides makes
            // them contradictory again
            let conflict = s
                .literals()
                .iter()
                .copied()
                .find(|lit| t.contains(!*lit))
                .expect("distinct state cubes must disagree on a variable");
            if !c_lits.contains(&conflict) {
                c_lits.push(conflict);
            }
            if !d_lits.contains(&!conflict) {
                d_lits.push(!conflict);
            }
        }

        // strengthen until no single transition leads from c to d
        loop {
            let sat = self
                .consecution_solver
                .query()
                .assume(self.trans_activator)
                .assume_all(&c_lits)
                .assume_mapped(&d_lits, |lit| system.prime(lit))
                .is_sat();
            if !sat {
                break;
            }

            let state_model = self.consecution_solver.get_model(system.state_vars());
            let next_model = self.consecution_solver.get_model(system.next_state_vars());
            let c_conflict = s
                .literals()
                .iter()
                .copied()
                .find(|lit| state_model.contains(!*lit));
            let d_conflict = t
                .literals()
                .iter()
                .copied()
                .find(|lit| next_model.contains(!system.prime(*lit)));

            let extend_c = match (c_conflict, d_conflict) {
                (Some(_), Some(_)) => match self.side_preference {
                    Some(SidePreference::Left) => true,
                    Some(SidePreference::Right) => false,
                    None => self.rng.gen_bool(0.5),
                },
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => {
                    unreachable!("the model satisfies s /\\ t' although no edge exists")
                }
            };
            if extend_c {
                c_lits.push(c_conflict.unwrap());
            } else {
                d_lits.push(d_conflict.unwrap());
            }
        }

        let c = Cube::new(c_lits);
        let d = Cube::new(d_lits);
        debug_assert!(c.subsumes(s) && d.subsumes(t));
        if cfg!(debug_assertions) {
            self.assert_still_blocked(&c, &d, level);
        }
        (c, d)
    }

    /// Re-runs the query shape that failed at this level with the
    /// generalized pair; it must still be unsatisfiable. Debug builds only.
    fn assert_still_blocked(&mut self, c: &Cube, d: &Cube, level: usize) {
        let system = self.system;
        let unsat = match level {
            0 => self
                .consecution_solver
                .query()
                .assume(self.trans_activator)
                .assume_all(c.literals())
                .assume_mapped(d.literals(), |lit| system.prime(lit))
                .is_unsat(),
            1 => self
                .consecution_solver
                .query()
                .assume(self.left_trans_activator)
                .assume(self.right_trans_activator)
                .assume_all(c.literals())
                .assume_mapped(d.literals(), |lit| system.prime(lit))
                .is_unsat(),
            _ => {
                let activators = self.activators_from(level - 1);
                self.consecution_solver
                    .query()
                    .assume_all(&activators)
                    .assume_all(c.literals())
                    .assume_mapped(d.literals(), |lit| system.prime(lit))
                    .is_unsat()
            }
        };
        debug_assert!(unsat, "generalization lost the blocking property");
    }

    /// Records the arrow at `level`, retiring every arrow it subsumes in
    /// frames `start..=level`, and asserts the three activated clauses that
    /// enforce it in the solvers.
    fn block_arrow_at(&mut self, c: &Cube, d: &Cube, level: usize, start: usize) {
        for frame in self.frames[start..=level].iter_mut() {
            frame
                .arrows
                .retain(|arrow| !(c.subsumes(&arrow.from) && d.subsumes(&arrow.to)));
        }

        let activator = self.frames[level].activator;
        let mut clause: Vec<Literal> = Vec::with_capacity(c.len() + d.len() + 1);

        // error solver: ¬(c ∧ d')
        clause.extend(c.literals().iter().map(|lit| !*lit));
        clause.extend(d.literals().iter().map(|lit| !self.prime(*lit)));
        clause.push(!activator);
        self.error_solver.assert_clause(&clause);

        // consecution solver, first half: ¬(c ∧ d°)
        clause.clear();
        clause.extend(c.literals().iter().map(|lit| !*lit));
        clause.extend(d.literals().iter().map(|lit| !self.circle(*lit)));
        clause.push(!activator);
        self.consecution_solver.assert_clause(&clause);

        // consecution solver, second half: ¬(c° ∧ d')
        clause.clear();
        clause.extend(c.literals().iter().map(|lit| !self.circle(*lit)));
        clause.extend(d.literals().iter().map(|lit| !self.prime(*lit)));
        clause.push(!activator);
        self.consecution_solver.assert_clause(&clause);

        debug!(level, c = c.len(), d = d.len(), "blocked an arrow");
        self.frames[level].arrows.push(Arrow {
            from: c.clone(),
            to: d.clone(),
        });
    }

    /// Tries to push every arrow one frame further. Returns true when some
    /// frame runs empty, i.e. its arrows hold at every higher level and form
    /// an inductive invariant.
    fn propagate(&mut self) -> bool {
        let depth = self.depth();
        for level in 1..depth {
            let snapshot = self.frames[level].arrows.clone();
            let activators = self.activators_from(level);
            for arrow in snapshot {
                let system = self.system;
                let unsat = self
                    .consecution_solver
                    .query()
                    .assume_all(&activators)
                    .assume_all(arrow.from.literals())
                    .assume_mapped(arrow.to.literals(), |lit| system.prime(lit))
                    .is_unsat();
                if unsat {
                    // the subsumption pass starting at `level` also deletes
                    // the original entry
                    self.block_arrow_at(&arrow.from, &arrow.to, level + 1, level);
                }
            }
            if self.frames[level].arrows.is_empty() {
                debug!(level, "frame ran empty during propagation");
                return true;
            }
        }
        false
    }

    /// Collects the input rows of the finished tree: left subtree, right
    /// subtree, then the node itself, one row per witnessed edge. The root
    /// carries the input of the error row, which therefore lands last.
    fn build_counterexample(&self, root: CexHandle) -> Vec<Cube> {
        let mut rows = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((handle, visited)) = stack.pop() {
            let entry = self.pool.get(handle);
            if visited {
                if let Some(input) = &entry.input {
                    rows.push(self.input_row(input));
                }
                continue;
            }
            stack.push((handle, true));
            if let Some(right) = entry.right {
                stack.push((right, false));
            }
            if let Some(left) = entry.left {
                stack.push((left, false));
            }
        }
        rows
    }

    /// One literal per input variable, defaulting don't-cares to negative.
    fn input_row(&self, input: &Cube) -> Cube {
        Cube::new(
            self.system
                .input_vars()
                .iter()
                .map(|var| input.find(var).unwrap_or(Literal::new(var, false)))
                .collect(),
        )
    }
}
