// ========================================================================================
//
//                          The command-line entry point of visitseq
//
// ========================================================================================
//
// `prepare` runs the whole preprocessing pipeline over a set of study tables and
// leaves the tensors in the cache file. `inspect` reports what a cache file holds.
// All real work lives in the library; this file only parses arguments, sets up
// logging and reports results.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use visitseq::cache::{CacheOutcome, TensorCache};
use visitseq::config::{PipelineConfig, VisitOrder};
use visitseq::evaluate::composite_targets;
use visitseq::pipeline::{PipelineInputs, run_pipeline};
use visitseq::tensor::BarTensorProgress;

#[derive(Parser)]
#[command(
    name = "visitseq",
    version,
    about = "Turns longitudinal clinical-visit tables into left-padded sequence tensors."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build (or load from cache) the training and inference tensors
    Prepare(PrepareArgs),
    /// Print the fingerprint and array shapes stored in a cache file
    Inspect(InspectArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum VisitOrderCli {
    Arrival,
    VisitDay,
}

impl From<VisitOrderCli> for VisitOrder {
    fn from(value: VisitOrderCli) -> Self {
        match value {
            VisitOrderCli::Arrival => VisitOrder::Arrival,
            VisitOrderCli::VisitDay => VisitOrder::VisitDay,
        }
    }
}

#[derive(Args)]
struct PrepareArgs {
    /// Training-eligible study table; repeat for every study, in stacking order
    #[arg(long = "train", value_name = "CSV", required = true)]
    training_tables: Vec<PathBuf>,

    /// Inference-only study table
    #[arg(long = "inference", value_name = "CSV")]
    inference_table: PathBuf,

    /// TOML file with cohort, ordering and separator settings
    #[arg(long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Tensor cache file, read if fresh and rewritten otherwise
    #[arg(long, default_value = "preproc_data.bin")]
    cache: PathBuf,

    /// Always recompute and leave the cache file untouched
    #[arg(long)]
    no_cache: bool,

    /// Write the merged raw training tables to this file
    #[arg(long, value_name = "CSV")]
    snapshot: Option<PathBuf>,

    /// Override the configured visit order
    #[arg(long, value_enum)]
    visit_order: Option<VisitOrderCli>,
}

#[derive(Args)]
struct InspectArgs {
    /// Cache file to read
    cache: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Prepare(args) => prepare(args),
        Command::Inspect(args) => inspect(args),
    };

    if let Err(e) = result {
        eprintln!("\nError: {e}");
        process::exit(1);
    }
}

fn prepare(args: PrepareArgs) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(order) = args.visit_order {
        config.visit_order = order.into();
    }

    let inputs = PipelineInputs {
        training_tables: args.training_tables,
        inference_table: args.inference_table,
        cache_path: (!args.no_cache).then_some(args.cache),
        snapshot_path: args.snapshot,
    };

    let output = run_pipeline(&inputs, &config, &mut BarTensorProgress::default())?;
    let tensors = &output.tensors;

    println!("Padding length:   {}", output.profile.padding_length);
    println!("Feature dim:      {}", output.feature_names.len());
    println!("Training X:       {:?}", tensors.training_x.shape());
    println!("Training Y:       {:?}", tensors.training_y.shape());
    println!("Inference X:      {:?}", tensors.inference_x.shape());
    println!("Fingerprint:      {:#018x}", output.fingerprint);
    match output.cache_outcome {
        Some(CacheOutcome::Hit) => println!("Cache:            reused"),
        Some(CacheOutcome::Rebuilt) => println!("Cache:            rebuilt"),
        Some(CacheOutcome::RebuiltUnsaved) => println!("Cache:            rebuilt, not saved"),
        None => println!("Cache:            disabled"),
    }
    println!("Finished in {:.2?}", start.elapsed());
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (fingerprint, tensors) = TensorCache::new(args.cache).read()?;
    let composite = composite_targets(tensors.training_y.view());

    println!("Fingerprint:      {fingerprint:#018x}");
    println!("Training X:       {:?}", tensors.training_x.shape());
    println!("Training Y:       {:?}", tensors.training_y.shape());
    println!("Inference X:      {:?}", tensors.inference_x.shape());
    if let Some(mean) = composite.mean() {
        println!("Mean composite target: {mean:.2}");
    }
    Ok(())
}
