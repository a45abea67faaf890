use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use neuro_pcca_core::data::{read_matrix_csv, write_matrix_csv};
use neuro_pcca_core::diagnostics::rmse_sweep;
use neuro_pcca_core::PccaBuilder;

#[derive(Parser)]
#[command(name = "neuropcca")]
#[command(version)]
#[command(about = "Shared latent-variable analysis for paired neural population recordings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a PCCA model to two region block matrices
    Fit {
        /// Path to the block 1 CSV matrix (trials x features)
        #[arg(long)]
        block1: String,

        /// Path to the block 2 CSV matrix (same trial count)
        #[arg(long)]
        block2: String,

        /// Latent dimension
        #[arg(short = 'k', long, default_value = "2")]
        components: usize,

        /// Maximum number of EM iterations
        #[arg(long, default_value = "100")]
        max_iter: usize,

        /// Diagonal regularization of the noise covariance blocks
        #[arg(long, default_value = "1.0")]
        regularization: f64,

        /// Convergence tolerance (0 disables early stopping)
        #[arg(long, default_value = "1e-8")]
        tolerance: f64,

        /// Seed for the random initialization
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Write the (trials x components) latent embedding to this CSV path
        #[arg(long)]
        embedding: Option<String>,

        /// Output format: "text" (default) or "json"
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Sweep reconstruction RMSE across a range of latent dimensions
    Sweep {
        /// Path to the block 1 CSV matrix (trials x features)
        #[arg(long)]
        block1: String,

        /// Path to the block 2 CSV matrix (same trial count)
        #[arg(long)]
        block2: String,

        /// Smallest latent dimension to evaluate
        #[arg(long, default_value = "1")]
        min_components: usize,

        /// Largest latent dimension to evaluate
        #[arg(long, default_value = "8")]
        max_components: usize,

        /// Maximum number of EM iterations per fit
        #[arg(long, default_value = "100")]
        max_iter: usize,

        /// Diagonal regularization of the noise covariance blocks
        #[arg(long, default_value = "1.0")]
        regularization: f64,

        /// Seed for initialization and reconstruction noise
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fit {
            block1,
            block2,
            components,
            max_iter,
            regularization,
            tolerance,
            seed,
            embedding,
            format,
        } => {
            let x1 = read_matrix_csv(&block1)
                .with_context(|| format!("failed to read block 1 from {block1}"))?;
            let x2 = read_matrix_csv(&block2)
                .with_context(|| format!("failed to read block 2 from {block2}"))?;
            log::info!(
                "loaded blocks: {} trials, {} + {} features",
                x1.nrows(),
                x1.ncols(),
                x2.ncols()
            );

            let mut model = PccaBuilder::new()
                .components(components)
                .max_iterations(max_iter)
                .regularization(regularization)
                .tolerance(tolerance)
                .seed(seed)
                .build()?;
            let report = model.fit(&x1, &x2)?;

            match format.as_str() {
                "text" => print!("{}", report.summary()),
                "json" => println!("{}", serde_json::to_string_pretty(&report)?),
                other => bail!("unknown output format '{other}', expected 'text' or 'json'"),
            }

            if let Some(path) = embedding {
                let z = model.transform(&x1, &x2)?;
                write_matrix_csv(&path, &z, "z")
                    .with_context(|| format!("failed to write embedding to {path}"))?;
                log::info!("wrote {}x{} embedding to {path}", z.nrows(), z.ncols());
            }
        }

        Commands::Sweep {
            block1,
            block2,
            min_components,
            max_components,
            max_iter,
            regularization,
            seed,
        } => {
            if min_components == 0 || min_components > max_components {
                bail!(
                    "invalid component range {min_components}..={max_components}"
                );
            }

            let x1 = read_matrix_csv(&block1)
                .with_context(|| format!("failed to read block 1 from {block1}"))?;
            let x2 = read_matrix_csv(&block2)
                .with_context(|| format!("failed to read block 2 from {block2}"))?;

            let dims: Vec<usize> = (min_components..=max_components).collect();
            let base = PccaBuilder::new()
                .max_iterations(max_iter)
                .regularization(regularization)
                .seed(seed);
            let reports = rmse_sweep(&x1, &x2, &dims, &base, seed);

            println!("  k   rmse(block1)   rmse(block2)   iters   converged");
            for r in &reports {
                println!(
                    "{:>3}   {:>12.6}   {:>12.6}   {:>5}   {}",
                    r.n_components, r.rmse_block1, r.rmse_block2, r.n_iterations, r.converged
                );
            }
            if reports.len() < dims.len() {
                log::warn!(
                    "{} of {} configurations failed and were skipped",
                    dims.len() - reports.len(),
                    dims.len()
                );
            }
        }
    }

    Ok(())
}
