// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use clap::error::ErrorKind;
use clap::Parser;
use pdrtpa::aiger::Aig;
use pdrtpa::logic::VariableStore;
use pdrtpa::{builder, simplify, witness, Options, SidePreference, VerificationResult, Verifier};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser)]
#[command(name = "pdrtpa", version)]
#[command(about = "A PDR-over-transitive-powers safety model checker for AIGER circuits")]
struct Cli {
    /// Enable informational logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Enable detailed logging (implies --verbose)
    #[arg(short, long)]
    debug: bool,

    /// Seed for the generalization RNG; drawn from the OS when omitted
    #[arg(short = 's', value_name = "SEED")]
    seed: Option<u64>,

    /// Prefer the left side when generalizing blocked arrows
    #[arg(long, conflicts_with = "right")]
    left: bool,

    /// Prefer the right side when generalizing blocked arrows
    #[arg(long)]
    right: bool,

    /// The input circuit, in ASCII (aag) or binary (aig) AIGER format
    #[arg(value_name = "input.aig")]
    input: PathBuf,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code: u8 = match err.kind() {
                // clap would exit with 2 on a usage error, our contract is 1
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    let level = if cli.debug {
        LevelFilter::DEBUG
    } else if cli.verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!(path = %cli.input.display(), "loading the aig");
    let mut aig = match Aig::read_from_file(&cli.input) {
        Ok(aig) => aig,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::from(1);
        }
    };

    info!("building the transition system");
    let store = VariableStore::new();
    let system = match builder::build_from_aiger(&store, &mut aig) {
        Ok(system) => system,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::from(1);
        }
    };
    debug!(
        latches = aig.latches.len(),
        state_vars = system.state_vars().size(),
        "cone of influence reduction done"
    );

    let system = simplify::simplify(&system);

    let options = Options {
        seed: cli.seed,
        side_preference: if cli.left {
            Some(SidePreference::Left)
        } else if cli.right {
            Some(SidePreference::Right)
        } else {
            None
        },
    };
    let mut checker = Verifier::new(&store, &system, options);
    let result = checker.run();

    match &result {
        VerificationResult::Safe => info!("result: safe"),
        VerificationResult::Unsafe(rows) => info!(rows = rows.len(), "result: unsafe"),
    }

    let stdout = std::io::stdout();
    witness::print_witness(&mut stdout.lock(), &system, &result)
        .expect("failed to write the witness to stdout");
    ExitCode::SUCCESS
}
