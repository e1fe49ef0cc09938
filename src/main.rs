use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use tracing::info;
use tracing_subscriber::EnvFilter;

use track_signals::batch::{self, print_clean_summary, print_extract_summary};
use track_signals::track_files::discover;
use track_signals::{Always, Config, Never, Stage, TrackPipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Speed, slope and heading signals for GPS tracks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log debug events from the pipeline
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cut raw JSON/GPX recordings into trip tracks
    Clean(CleanArgs),
    /// Compute the signals of every track in a folder, in place
    Extract(ExtractArgs),
    /// Clean raw recordings, then compute the signals of the kept tracks
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Folder of raw recordings
    #[arg(value_hint = ValueHint::DirPath)]
    input: PathBuf,

    /// Folder receiving one JSON file per kept track
    #[arg(value_hint = ValueHint::DirPath)]
    output: PathBuf,

    /// JSON configuration file
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExtractOptions {
    /// JSON configuration file
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Stages to run (comma separated)
    #[arg(long, value_delimiter = ',', default_values_t = Stage::ORDER.to_vec())]
    stages: Vec<Stage>,

    /// Recompute fields that are already present without asking
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "keep_existing")]
    overwrite: bool,

    /// Keep fields that are already present without asking
    #[arg(long, action = ArgAction::SetTrue)]
    keep_existing: bool,

    /// Write a per-track CSV report
    #[arg(long, value_hint = ValueHint::FilePath)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Folder of JSON tracks
    #[arg(value_hint = ValueHint::DirPath)]
    data_dir: PathBuf,

    #[command(flatten)]
    options: ExtractOptions,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Folder of raw recordings
    #[arg(value_hint = ValueHint::DirPath)]
    input: PathBuf,

    /// Folder receiving the cleaned and processed tracks
    #[arg(value_hint = ValueHint::DirPath)]
    output: PathBuf,

    #[command(flatten)]
    options: ExtractOptions,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    println!("🚴 GPS track signals");
    println!("⚡ Using parallel processing on {} cores", num_cpus::get());
    let start = Instant::now();

    match cli.command {
        Command::Clean(args) => {
            let config = load_config(args.config.as_deref())?;
            handle_clean(&args.input, &args.output, &config)?;
        }
        Command::Extract(args) => handle_extract(&args.data_dir, &args.options)?,
        Command::Run(args) => {
            let config = load_config(args.options.config.as_deref())?;
            let already_cleaned = args.output.is_dir() && !discover(&args.output, &["json"])?.is_empty();
            let clean_again = !already_cleaned
                || match decision(&args.options) {
                    Some(answer) => answer,
                    None => ask(&format!(
                        "{} already holds cleaned tracks. Clean again?",
                        args.output.display()
                    ))?,
                };
            if clean_again {
                handle_clean(&args.input, &args.output, &config)?;
            } else {
                info!(folder = %args.output.display(), "reusing cleaned tracks");
            }
            handle_extract(&args.output, &args.options)?;
        }
    }

    println!("\n⏱️  Done in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_path(path).with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn handle_clean(input: &Path, output: &Path, config: &Config) -> Result<()> {
    println!("\n🧹 Cleaning raw recordings from {}", input.display());
    let outcomes = batch::clean_folder(input, output, &config.cleaning)
        .with_context(|| format!("cleaning {}", input.display()))?;
    print_clean_summary(&outcomes);
    if outcomes.iter().all(|o| o.result.is_err()) {
        bail!("no raw recording could be read from {}", input.display());
    }
    Ok(())
}

fn handle_extract(data_dir: &Path, options: &ExtractOptions) -> Result<()> {
    let config = load_config(options.config.as_deref())?;
    let pipeline = TrackPipeline::new(config);

    println!("\n📈 Computing signals for tracks in {}", data_dir.display());
    let summary = match decision(options) {
        Some(true) => batch::extract_folder(data_dir, &pipeline, &options.stages, &Always, options.report.as_deref()),
        Some(false) => batch::extract_folder(data_dir, &pipeline, &options.stages, &Never, options.report.as_deref()),
        None => batch::extract_folder(data_dir, &pipeline, &options.stages, &prompt_overwrite, options.report.as_deref()),
    }
    .with_context(|| format!("processing {}", data_dir.display()))?;

    print_extract_summary(&summary);
    if let Some(report) = &options.report {
        println!("\n📄 Report saved to {}", report.display());
    }
    Ok(())
}

/// Overwrite decision given on the command line, if any.
fn decision(options: &ExtractOptions) -> Option<bool> {
    if options.overwrite {
        Some(true)
    } else if options.keep_existing {
        Some(false)
    } else {
        None
    }
}

fn prompt_overwrite(stage: Stage, existing: usize, total: usize) -> bool {
    let question = format!("{stage} is already computed on {existing}/{total} tracks. Compute it again?");
    // an unreadable stdin keeps the existing values
    ask(&question).unwrap_or(false)
}

fn ask(question: &str) -> Result<bool> {
    let stdin = io::stdin();
    loop {
        print!("❓ {question} [y/n] ");
        io::stdout().flush()?;
        let mut answer = String::new();
        if stdin.lock().read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("Please answer y or n."),
        }
    }
}
