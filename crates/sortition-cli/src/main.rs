//! `sortition` command line.
//!
//! Works on two kinds of files: a sortition definition (YAML or JSON) and a
//! portfolio record (JSON) written by `generate` and updated once by `sample`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sortition_core::{
    check_feasibility, verify_stored, FairSortitionService, InMemoryPortfolioStore,
    PanelPortfolio, PortfolioStore, SelectionConfig, SortitionDefinition, VolunteerId,
};

#[derive(Parser, Debug)]
#[command(name = "sortition", version, about = "Fair panel selection for citizens' assemblies")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a definition admits any panel.
    Check(CheckArgs),
    /// Compute the panel portfolio and write it to a file.
    Generate(GenerateArgs),
    /// Draw one panel from a portfolio file. Each file can be drawn once.
    Sample(SampleArgs),
    /// Replay a seeded draw and compare it with the announced panel.
    Verify(VerifyArgs),
    /// Print the audit log of a portfolio file.
    Audit(AuditArgs),
}

#[derive(ClapArgs, Debug)]
struct CheckArgs {
    /// Sortition definition (YAML or JSON).
    definition: PathBuf,
    /// Engine configuration (YAML); only the coverage policy is used.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct GenerateArgs {
    /// Sortition definition (YAML or JSON).
    definition: PathBuf,
    /// Where to write the portfolio record.
    #[arg(long)]
    out: PathBuf,
    /// Engine configuration (YAML).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct SampleArgs {
    /// Portfolio record written by `generate`.
    portfolio: PathBuf,
    /// Public verification seed; omit for an unreproducible draw.
    #[arg(long)]
    seed: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct VerifyArgs {
    /// Sampled portfolio record.
    portfolio: PathBuf,
    #[arg(long)]
    seed: String,
    /// Announced panel, as comma separated volunteer ids.
    #[arg(long, value_delimiter = ',', required = true)]
    expected: Vec<VolunteerId>,
}

#[derive(ClapArgs, Debug)]
struct AuditArgs {
    /// Portfolio record.
    portfolio: PathBuf,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Check(args) => check(args),
        Command::Generate(args) => generate(args),
        Command::Sample(args) => sample(args),
        Command::Verify(args) => verify(args),
        Command::Audit(args) => audit(args),
    }
}

fn check(args: CheckArgs) -> Result<ExitCode> {
    let definition = load_definition(&args.definition)?;
    let config = load_config(args.config.as_deref())?;

    let report = check_feasibility(&definition, config.coverage_policy)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.feasible {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn generate(args: GenerateArgs) -> Result<ExitCode> {
    if args.out.exists() {
        bail!(
            "{} already exists; refusing to overwrite a portfolio record",
            args.out.display()
        );
    }

    let definition = load_definition(&args.definition)?;
    let config = load_config(args.config.as_deref())?;

    let service = FairSortitionService::new(
        Arc::new(definition),
        Arc::new(InMemoryPortfolioStore::new()),
        config,
    );
    let portfolio = service.generate_portfolio()?;
    write_portfolio(&args.out, &portfolio)?;

    println!(
        "Wrote {} panels ({} iterations, converged: {}) to {}",
        portfolio.num_panels(),
        portfolio.num_iterations(),
        portfolio.convergence_achieved(),
        args.out.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn sample(args: SampleArgs) -> Result<ExitCode> {
    let mut portfolio = read_portfolio(&args.portfolio)?;
    if portfolio.sampled() {
        bail!(
            "{} has already been sampled; see `sortition audit`",
            args.portfolio.display()
        );
    }
    if args.seed.is_none() {
        tracing::warn!("No seed given; this draw cannot be verified later");
    }

    let draw = portfolio.sample(args.seed.as_deref())?;
    write_portfolio(&args.portfolio, &portfolio)?;

    let ids: Vec<String> = draw
        .selected_panel
        .members()
        .iter()
        .map(|id| id.to_string())
        .collect();
    println!("Selected panel #{}: {}", draw.selected_index, ids.join(","));
    Ok(ExitCode::SUCCESS)
}

fn verify(args: VerifyArgs) -> Result<ExitCode> {
    if replays_announced_panel(&args)? {
        println!("OK: the seed reproduces the announced panel");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("MISMATCH: the seed does not reproduce the announced panel");
        Ok(ExitCode::FAILURE)
    }
}

fn replays_announced_panel(args: &VerifyArgs) -> Result<bool> {
    let portfolio = read_portfolio(&args.portfolio)?;
    let sortition_id = portfolio.sortition_id();
    if !portfolio.sampled() {
        bail!("{} has not been sampled", args.portfolio.display());
    }

    let store = InMemoryPortfolioStore::new();
    store.insert_if_absent(portfolio)?;
    Ok(verify_stored(&store, sortition_id, &args.expected, &args.seed)?)
}

fn audit(args: AuditArgs) -> Result<ExitCode> {
    let portfolio = read_portfolio(&args.portfolio)?;
    println!("{}", serde_json::to_string_pretty(&portfolio.audit_log())?);
    Ok(ExitCode::SUCCESS)
}

fn load_definition(path: &Path) -> Result<SortitionDefinition> {
    SortitionDefinition::from_file(path)
        .with_context(|| format!("loading definition {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<SelectionConfig> {
    match path {
        Some(path) => SelectionConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(SelectionConfig::default()),
    }
}

fn read_portfolio(path: &Path) -> Result<PanelPortfolio> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    PanelPortfolio::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

/// Replace `path` atomically via a sibling temp file.
fn write_portfolio(path: &Path, portfolio: &PanelPortfolio) -> Result<()> {
    let json = serde_json::to_string_pretty(portfolio)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
