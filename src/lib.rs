// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! A safety model checker for sequential Boolean circuits in the AIGER
//! format, based on property directed reachability over transitive powers.

pub mod aiger;
pub mod builder;
pub mod logic;
pub mod simplify;
pub mod solver;
pub mod transition_system;
pub mod verifier;
pub mod witness;

pub use transition_system::TransitionSystem;
pub use verifier::{Options, SidePreference, VerificationResult, Verifier};
