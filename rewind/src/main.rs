//! `rewind`: inspect saved agent runs and roll a working copy back to any step.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rewind::agent::{Agent, AgentSettings, Branchable, Checkpointable};
use rewind::core::best_step::best_step_for_reset;
use rewind::exit_codes;
use rewind::io::config::load_config;
use rewind::io::git::Git;
use rewind::io::problem::load_problem;
use rewind::io::run_record::load_run_record;
use rewind::io::workdir::{GitWorkdir, TestCommand};
use rewind::logging;
use rewind::record::RunRecord;

#[derive(Parser)]
#[command(
    name = "rewind",
    version,
    about = "Checkpoint, roll back and branch tool-calling agent runs"
)]
struct Cli {
    /// Debug-level diagnostics on stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a run record against the schema and branch invariants.
    Validate {
        record: PathBuf,
    },
    /// List the branches of a run record; `*` marks the active one.
    Branches {
        record: PathBuf,
    },
    /// Print the step with the most passing tests (exit 2 when none parsed).
    BestStep {
        record: PathBuf,
    },
    /// Restore a git working copy to a step of a saved run and rewrite the record.
    Rollback {
        record: PathBuf,
        /// Git working copy the run operated on.
        #[arg(long)]
        workdir: PathBuf,
        /// Problem statement the run was set up with.
        #[arg(long)]
        problem: PathBuf,
        /// Step to return to (0 = base commit).
        #[arg(long)]
        step: usize,
        /// Fork a new branch at the step instead of truncating the active one.
        #[arg(long)]
        fork: bool,
        /// Base commit of the run (defaults to the working copy's HEAD).
        #[arg(long)]
        base: Option<String>,
        #[arg(long, default_value = "rewind.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli.command) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Validate { record } => cmd_validate(&record),
        Command::Branches { record } => cmd_branches(&record),
        Command::BestStep { record } => cmd_best_step(&record),
        Command::Rollback {
            record,
            workdir,
            problem,
            step,
            fork,
            base,
            config,
        } => cmd_rollback(&RollbackArgs {
            record,
            workdir,
            problem,
            step,
            fork,
            base,
            config,
        }),
    }
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let record = load_run_record(path)?;
    println!(
        "ok: {} steps, {} branches",
        record.trajectory.len(),
        record.branches.as_ref().map_or(1, |b| b.len())
    );
    Ok(exit_codes::OK)
}

fn cmd_branches(path: &Path) -> Result<i32> {
    let record = load_run_record(path)?;
    for line in branch_lines(&record) {
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn branch_lines(record: &RunRecord) -> Vec<String> {
    let (Some(branches), Some(current)) = (&record.branches, record.current_branch_id) else {
        return vec![format!(
            "* 0 root steps={} exit={}",
            record.trajectory.len(),
            record.info.exit_status.as_deref().unwrap_or("-")
        )];
    };
    branches
        .values()
        .map(|branch| {
            let marker = if branch.id == current { '*' } else { ' ' };
            let origin = match (branch.parent_id, branch.fork_step) {
                (Some(parent), Some(step)) => format!("from {parent}@{step}"),
                _ => "root".to_string(),
            };
            format!(
                "{marker} {} {origin} steps={} exit={}",
                branch.id,
                branch.trajectory.len(),
                branch.info.exit_status.as_deref().unwrap_or("-")
            )
        })
        .collect()
}

fn cmd_best_step(path: &Path) -> Result<i32> {
    let record = load_run_record(path)?;
    let best = best_step_for_reset(record.trajectory.steps());
    for diagnostic in &best.diagnostics {
        eprintln!("warning: {diagnostic}");
    }
    match best.passed {
        Some(passed) if best.step > 0 => {
            println!("{} ({passed} passed)", best.step);
            Ok(exit_codes::OK)
        }
        _ => {
            eprintln!("no step has a parseable test report");
            Ok(exit_codes::NO_BEST_STEP)
        }
    }
}

struct RollbackArgs {
    record: PathBuf,
    workdir: PathBuf,
    problem: PathBuf,
    step: usize,
    fork: bool,
    base: Option<String>,
    config: PathBuf,
}

fn cmd_rollback(args: &RollbackArgs) -> Result<i32> {
    let cfg = load_config(&args.config)?;
    let record = load_run_record(&args.record)?;
    let problem = load_problem(&args.problem)?;

    let mut settings = AgentSettings::from_config(&cfg)?;
    settings.branching = cfg.agent.branching || args.fork || record.branches.is_some();

    let git = Git::new(&args.workdir);
    let test = TestCommand::from_config(&cfg.environment);
    let mut workdir = match &args.base {
        Some(base) => GitWorkdir::with_base(git, base.clone(), test),
        None => GitWorkdir::open(git, test)?,
    };

    let mut agent = Agent::resume(
        settings,
        &mut workdir,
        problem,
        args.record.clone(),
        record,
    )
    .context("resume run")?;

    if args.fork {
        let active = agent.active_branch_id()?;
        let id = agent.fork(active, args.step)?;
        println!("forked branch {id} from {active} at step {}", args.step);
    } else {
        agent.reset_to_step(args.step)?;
        println!("rolled back to step {}", args.step);
    }
    agent.save_run_data()?;
    Ok(exit_codes::OK)
}
