//! Command-line front end: fit and sample the cosmological models on a catalog.
//!
//! ```bash
//! cosmo-mcmc --catalog sn.txt --model joint --seed 1234 --output-dir out/ --progress
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use cosmo_mcmc::config::Config;
use cosmo_mcmc::inference::{run_all, InferenceRun, RunContext};
use cosmo_mcmc::io::catalog::load_observations;
use cosmo_mcmc::model::Parametrization;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModelChoice {
    /// H0 free, Omega_M = 0.3, Omega_L = 0.7
    H0,
    /// Omega_M free, H0 = 70, flat
    OmegaM,
    /// H0 and Omega_M free, flat
    Joint,
    /// All three, run concurrently
    All,
}

/// Bayesian inference of H0 and Omega_M from a distance catalog
#[derive(Parser, Debug)]
#[command(name = "cosmo-mcmc", version)]
struct Args {
    /// Catalog file: ra dec z_helio _ distance distance_err per line
    #[arg(long, value_name = "FILE")]
    catalog: PathBuf,

    /// Which parametrization to run
    #[arg(long, value_enum, default_value = "joint")]
    model: ModelChoice,

    /// Random seed
    #[arg(long, default_value_t = 1234, env = "COSMO_MCMC_SEED")]
    seed: u64,

    /// TOML file overriding sampler and fit settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for chain and sample CSV files
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Show a progress bar while sampling
    #[arg(long)]
    progress: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cosmo_mcmc=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    let observations = load_observations(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
    info!(
        objects = observations.len(),
        catalog = %args.catalog.display(),
        "catalog loaded"
    );

    let single = |model: Parametrization| {
        RunContext::new(&model, model.prior_bounds(), &observations, args.seed, &config)
            .with_label(model.label())
            .with_progress(args.progress)
            .execute()
    };
    let runs: Vec<InferenceRun> = match args.model {
        ModelChoice::H0 => vec![single(Parametrization::h0())?],
        ModelChoice::OmegaM => vec![single(Parametrization::omega_m())?],
        ModelChoice::Joint => vec![single(Parametrization::joint())?],
        ModelChoice::All => run_all(&observations, args.seed, &config)?,
    };

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    for result in &runs {
        report(result);
        if let Some(dir) = &args.output_dir {
            write_outputs(result, dir)?;
        }
    }
    Ok(())
}

fn report(result: &InferenceRun) {
    let estimate = result.point_estimate();
    println!("== {} (seed {}) ==", result.label(), result.seed());
    println!(
        "max-likelihood: {}  (nll {:.3}, {})",
        result
            .param_names()
            .iter()
            .zip(&estimate.theta)
            .map(|(n, v)| format!("{n}={v:.4}"))
            .collect::<Vec<_>>()
            .join(" "),
        estimate.nll,
        if estimate.converged {
            "converged"
        } else {
            "not converged"
        }
    );
    let acceptance = result
        .chain()
        .acceptance_fraction()
        .mean()
        .unwrap_or(f64::NAN);
    println!("mean acceptance fraction: {acceptance:.3}");
    for s in result.summary() {
        println!(
            "{:>8} = {:.4} +{:.4} -{:.4}  (mean {:.4}, std {:.4})",
            s.name,
            s.median,
            s.q84 - s.median,
            s.median - s.q16,
            s.mean,
            s.std
        );
    }
}

#[cfg(feature = "csv")]
fn write_outputs(result: &InferenceRun, dir: &std::path::Path) -> Result<()> {
    use cosmo_mcmc::io::csv::{save_chain_csv, save_samples_csv};

    let names: Vec<&str> = result.param_names().iter().map(String::as_str).collect();
    let chain_path = dir.join(format!("{}_chain.csv", result.label()));
    let samples_path = dir.join(format!("{}_samples.csv", result.label()));
    save_chain_csv(result.chain().chain(), &names, &chain_path)
        .with_context(|| format!("writing {}", chain_path.display()))?;
    save_samples_csv(result.samples(), &names, &samples_path)
        .with_context(|| format!("writing {}", samples_path.display()))?;
    info!(chain = %chain_path.display(), samples = %samples_path.display(), "wrote outputs");
    Ok(())
}

#[cfg(not(feature = "csv"))]
fn write_outputs(result: &InferenceRun, dir: &std::path::Path) -> Result<()> {
    tracing::warn!(
        model = result.label(),
        dir = %dir.display(),
        "built without the `csv` feature, skipping output files"
    );
    Ok(())
}
