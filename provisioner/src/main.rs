//! `provisioner` CLI: stand up (or finish standing up) a local Drupal site.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};

use provisioner::core::types::{SkipReason, StateResult, StepOutcome};
use provisioner::errors::exit_code_for;
use provisioner::exit_codes;
use provisioner::io::config::{
    DEFAULT_PROJECT, DEFAULT_SETTINGS_FILE, RunRequest, Secret, TOKEN_ENV, load_settings,
};
use provisioner::io::process::SystemRunner;
use provisioner::io::prompt::{AutoPrompter, Prompter, TerminalPrompter};
use provisioner::logging;
use provisioner::orchestrator::StepEvent;
use provisioner::provision::provision;
use provisioner::steps::default_steps;

#[derive(Parser, Debug)]
#[command(
    name = "provisioner",
    version,
    about = "Idempotent, resumable DDEV + Drupal site provisioner",
    disable_version_flag = true
)]
struct Cli {
    /// Project name; a numbered variant is used when the name is taken.
    #[arg(value_name = "PROJECT_NAME", default_value = DEFAULT_PROJECT)]
    project: String,

    /// Ask before each step and before re-running completed ones.
    #[arg(short, long)]
    interactive: bool,

    /// GitHub token handed to Composer to avoid API rate limits.
    #[arg(short, long, value_name = "TOKEN", env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Delete the project, its volumes and its directory before provisioning.
    #[arg(short, long)]
    clean: bool,

    /// Report steps recorded by an earlier run before probing.
    #[arg(short, long)]
    resume: bool,

    /// Directory the project directory is created in.
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Settings file (default: <DIR>/provision.toml when present).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print version.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> ExitCode {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                exit(exit_codes::INVALID)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    exit(code)
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run(cli: Cli) -> Result<i32> {
    let base_dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(|| base_dir.join(DEFAULT_SETTINGS_FILE));
    if cli.config.is_some() && !settings_path.exists() {
        bail!("settings file {} does not exist", settings_path.display());
    }
    let settings = load_settings(&settings_path)?;

    let interactive = cli.interactive;
    if interactive && !std::io::stdin().is_terminal() {
        bail!("--interactive needs a terminal on stdin");
    }

    let request = RunRequest {
        project: cli.project,
        base_dir,
        interactive,
        clean: cli.clean,
        resume: cli.resume,
        token: cli.token.filter(|t| !t.trim().is_empty()).map(Secret::new),
        settings,
    };

    let terminal = TerminalPrompter::new();
    let prompter: &dyn Prompter = if interactive { &terminal } else { &AutoPrompter };
    let steps = default_steps();
    let total = steps.len();

    let done = provision(request, &steps, &SystemRunner, prompter, |event| {
        print_event(event, total);
    })?;

    if let Some(cleaned) = &done.cleaned {
        println!(
            "cleaned: project deleted: {}, volumes removed: {}, directory removed: {}",
            cleaned.project_deleted, cleaned.volumes_removed, cleaned.workdir_removed
        );
    }
    println!();
    print!(
        "{}",
        done.report.render(&format!(
            "Provisioning {} in {}",
            done.config.instance,
            done.config.workdir.display()
        ))
    );
    let code = done.report.exit_code();
    if code == exit_codes::OK {
        println!("site ready: run `ddev launch` in {}", done.config.workdir.display());
    }
    Ok(code)
}

fn print_event(event: &StepEvent<'_>, total: usize) {
    match event {
        StepEvent::Started(step) => {
            println!("[{}/{}] {}", step.id, total, step.label);
        }
        StepEvent::Probed(_, StateResult::Indeterminate { reason }) => {
            println!("      state unknown ({reason}), running");
        }
        StepEvent::Probed(..) => {}
        StepEvent::Finished(_, outcome) => {
            let line = match outcome {
                StepOutcome::Ran => "done".to_string(),
                StepOutcome::Skipped(SkipReason::AlreadySatisfied) => {
                    "already done, skipped".to_string()
                }
                StepOutcome::Skipped(SkipReason::ByRequest) => "skipped".to_string(),
                StepOutcome::Failed(failure) => format!("failed: {failure}"),
            };
            println!("      {line}");
        }
    }
}
