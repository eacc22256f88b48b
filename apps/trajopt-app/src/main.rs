//! trajopt command-line interface.
//!
//! - `solve`: run the pendulum swing-up described by a TOML problem file
//! - `info`: print crate versions and the default solver settings

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nalgebra::DVector;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trajopt_core::prelude::*;
use trajopt_solver::{SolveResults, Solver};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Constrained trajectory optimization.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Log outer iterations (`-vv` for inner iterations too).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve the pendulum swing-up described by a problem file.
    Solve {
        /// Problem file (TOML).
        problem: PathBuf,

        /// Start from a straight-line state guess with slack controls.
        #[arg(long)]
        infeasible: bool,
    },

    /// Print crate information.
    Info,
}

// ---------------------------------------------------------------------------
// Pendulum model
// ---------------------------------------------------------------------------

/// Optional `[pendulum]` table of a problem file.
#[derive(Debug, Deserialize)]
struct PendulumSection {
    #[serde(default)]
    pendulum: PendulumParams,
}

// ---------------------------------------------------------------------------
// Mode implementations
// ---------------------------------------------------------------------------

fn load(path: &Path) -> Result<(ProblemConfig, PendulumParams), TrajoptError> {
    let content = std::fs::read_to_string(path).map_err(ConfigError::from)?;
    let problem = ProblemConfig::from_toml_str(&content)?;
    let section: PendulumSection = toml::from_str(&content).map_err(ConfigError::from)?;
    if problem.state_dim() != 2 || problem.control_dim != 1 {
        return Err(ConfigError::InvalidValue {
            field: "x0".into(),
            message: "pendulum problems need 2 states and 1 control".into(),
        }
        .into());
    }
    section.pendulum.validate()?;
    Ok((problem, section.pendulum))
}

fn run_solve(path: &Path, infeasible: bool, verbose: bool) -> Result<SolveResults, TrajoptError> {
    let (mut problem, params) = load(path)?;
    problem.solver.verbose |= verbose;
    let model = params.model()?;
    let objective = problem.objective()?;
    let solver = Solver::new(problem.solver.clone(), problem.dt)?;

    let horizon = problem.horizon();
    let controls = vec![DVector::zeros(problem.control_dim); horizon];
    info!(horizon, dt = problem.dt, infeasible, "solving");
    let results = if infeasible {
        let cost = objective.cost();
        let states = linear_interpolation(cost.x0(), cost.xf(), horizon + 1);
        solver.solve_infeasible(&model, &objective, &states, &controls)?
    } else {
        solver.solve(&model, &objective, &controls)?
    };
    Ok(results)
}

fn print_results(results: &SolveResults) {
    println!("status:           {:?}", results.status);
    println!("cost:             {:.6}", results.cost);
    println!("c_max:            {:.3e}", results.c_max);
    println!("outer iterations: {}", results.outer_iterations);
    println!("inner iterations: {}", results.inner_iterations);
    println!("final state:      {}", results.final_state().transpose());
    if let Some(stage) = &results.infeasible_stage {
        println!();
        println!("infeasible stage:");
        println!("  status:           {:?}", stage.status);
        println!("  max slack:        {:.3e}", stage.max_slack);
        println!("  cost:             {:.6}", stage.cost);
        println!("  outer iterations: {}", stage.outer_iterations);
    }
}

fn run_info() {
    let defaults = SolverConfig::default();
    println!("trajopt v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("crates:");
    println!("  trajopt-core      {}", env!("CARGO_PKG_VERSION"));
    println!("  trajopt-solver    {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("default solver settings:");
    match toml::to_string(&defaults) {
        Ok(table) => {
            for line in table.lines() {
                println!("  {line}");
            }
        }
        Err(err) => eprintln!("  failed to render defaults: {err}"),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Solve { problem, infeasible }) => match run_solve(&problem, infeasible, cli.verbose > 0) {
            Ok(results) => {
                print_results(&results);
                if results.converged() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(err) => {
                error!("{err}");
                ExitCode::FAILURE
            }
        },
        Some(Commands::Info) | None => {
            run_info();
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pendulum_section_defaults_when_missing() {
        let section: PendulumSection = toml::from_str("dt = 0.1").unwrap();
        assert!((section.pendulum.gravity - 9.81).abs() < f64::EPSILON);
    }

    #[test]
    fn pendulum_section_overrides() {
        let section: PendulumSection = toml::from_str("[pendulum]\nmass = 2.0\n").unwrap();
        assert!((section.pendulum.mass - 2.0).abs() < f64::EPSILON);
        assert!((section.pendulum.inertia - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn bundled_problem_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("pendulum.toml");
        let (problem, params) = load(&path).unwrap();
        assert_eq!(problem.horizon(), 50);
        assert!(problem.is_constrained());
        assert!(params.model().is_ok());
    }

    #[test]
    fn non_physical_pendulum_rejected() {
        let dir = std::env::temp_dir().join(format!("trajopt-app-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join("pendulum.toml");
        let content = std::fs::read_to_string(bundled)
            .unwrap()
            .replace("inertia = 0.25", "inertia = -1.0");
        let path = dir.join("negative-inertia.toml");
        std::fs::write(&path, content).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(err, TrajoptError::Config(ConfigError::InvalidValue { .. })));
        std::fs::remove_dir_all(dir).unwrap();
    }
}
