use std::{path::PathBuf, process};

use anyhow::Context;
use clap::Parser;

use vrmdeob::config::{DeobOptions, load_options};
use vrmdeob::{LogLevel, deobfuscate_model, init_logging};

#[derive(Parser)]
#[command(name = "vrmdeob", about = "Restore VRoid Hub preview models to plain VRM files")]
struct Cli {
    /// Model id or hub URL
    target: String,

    /// JSON options file; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Always download, and do not store the decrypted model
    #[arg(long)]
    no_cache: bool,

    /// Dump extension blocks and textures to DIR
    #[arg(long, value_name = "DIR", num_args = 0..=1, default_missing_value = "debug")]
    debug: Option<PathBuf>,

    /// Increase log detail (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        LogLevel::Warn
    } else {
        LogLevel::from_verbosity(cli.verbose)
    };
    init_logging(level);

    let mut options = match &cli.config {
        Some(path) => load_options(path)?,
        None => DeobOptions::default(),
    };
    if let Some(dir) = cli.output_dir {
        options.output_dir = dir;
    }
    if let Some(dir) = cli.cache_dir {
        options.cache_dir = dir;
    }
    if cli.no_cache {
        options.use_cache = false;
    }
    if cli.debug.is_some() {
        options.debug_dir = cli.debug;
    }

    let report = deobfuscate_model(&cli.target, &options, None)
        .with_context(|| format!("failed to deobfuscate {}", cli.target))?;

    println!("Model: {}", report.model_id);
    println!(
        "Scheme: {} (timestamp {}, seed {})",
        report.version, report.timestamp_key, report.seed
    );
    println!(
        "Primitives: {}, corrected vertices: {}, skipped: {}",
        report.stats.primitives, report.stats.corrected_vertices, report.stats.skipped_vertices
    );
    println!("Normalized textures: {}", report.normalized_textures);
    println!("Preserved extensions: {}", report.preserved_extensions.join(", "));
    if let Some(path) = &report.output_path {
        println!("Output: {}", path.display());
    }

    Ok(())
}
