use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use jobs::{AppContext, ConversionLog, JobId, JobOutcome, SupervisorEvent};
use settings::{default_settings_path, extension_of, normalize_extension, Settings};

#[derive(Parser)]
#[command(name = "media-convert")]
#[command(about = "Batch media conversion through ffmpeg with live progress")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to ./settings.json)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert media files, all at once
    Convert {
        /// Files to convert
        files: Vec<PathBuf>,

        /// Output extension, e.g. .mkv
        #[arg(short, long)]
        to: String,

        /// Only convert queued files with this input extension
        #[arg(long)]
        from: Option<String>,

        /// Print observer events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List supported formats, or the targets offered for one file
    Formats {
        /// File to list target extensions for
        file: Option<PathBuf>,
    },

    /// Print a day's conversion log
    Logs {
        /// Day to show (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("resolve working directory")?;
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(|| default_settings_path(&cwd));
    let settings = Settings::load_or_default(&settings_path);

    match cli.command {
        Commands::Convert {
            files,
            to,
            from,
            json,
        } => convert_command(settings, &cwd, files, to, from, json),
        Commands::Formats { file } => formats_command(&settings, file),
        Commands::Logs { date } => logs_command(&settings, &cwd, date),
    }
}

fn convert_command(
    settings: Settings,
    cwd: &Path,
    files: Vec<PathBuf>,
    to: String,
    from: Option<String>,
    json: bool,
) -> Result<()> {
    let mut ctx = AppContext::init(settings, cwd)?;
    let to = normalize_extension(&to);

    for file in &files {
        if !file.exists() {
            warn!("File does not exist: {:?}", file);
            continue;
        }
        if let Err(e) = ctx.enqueue(file) {
            warn!("{}: {e}", file.display());
        }
    }
    if ctx.queue().is_empty() {
        bail!("nothing to convert");
    }

    let inputs: Vec<String> = match from {
        Some(ext) => vec![normalize_extension(&ext)],
        None => ctx.queue().input_extensions().into_iter().collect(),
    };

    let rx = ctx.supervisor_mut().subscribe();
    let mut names: HashMap<JobId, String> = HashMap::new();
    let mut failed = 0usize;
    let mut submitted = 0usize;
    for input in &inputs {
        if !ctx.settings().targets_for(input).contains(&to) {
            warn!("{input} files are not configured to convert to {to}");
        }
        submitted += ctx.convert(input, &to)?.len();
    }
    info!(
        "{submitted} conversion(s) started, logging to {}",
        ctx.supervisor().log().path().display()
    );

    loop {
        let remaining = ctx.supervisor_mut().step(Duration::from_millis(200));
        for ev in rx.try_iter() {
            if json {
                println!("{}", serde_json::to_string(&ev)?);
            } else if let Some(line) = describe(&ev, &mut names) {
                println!("{line}");
            }
            if let SupervisorEvent::Finished {
                outcome: JobOutcome::Failed { .. },
                ..
            } = ev
            {
                failed += 1;
            }
        }
        if remaining == 0 {
            break;
        }
    }

    if !ctx.queue().is_empty() {
        info!("{} file(s) left in the queue", ctx.queue().len());
    }
    if failed > 0 {
        return Err(anyhow!("{failed} of {submitted} conversion(s) failed"));
    }
    Ok(())
}

fn describe(ev: &SupervisorEvent, names: &mut HashMap<JobId, String>) -> Option<String> {
    match ev {
        SupervisorEvent::Submitted {
            id,
            source,
            destination,
        } => {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| source.display().to_string());
            names.insert(*id, name.clone());
            Some(format!("{name}: -> {}", destination.display()))
        }
        SupervisorEvent::Progress { id, percent } => {
            Some(format!("{}: {percent}%", names.get(id)?))
        }
        SupervisorEvent::Status { id, text } => Some(format!("{}: {text}", names.get(id)?)),
        SupervisorEvent::Finished { id, outcome } => {
            let name = names.remove(id)?;
            match outcome {
                JobOutcome::Completed { destination, .. } => {
                    Some(format!("{name}: done ({})", destination.display()))
                }
                JobOutcome::Failed { reason, .. } => Some(format!("{name}: failed ({reason})")),
            }
        }
    }
}

fn formats_command(settings: &Settings, file: Option<PathBuf>) -> Result<()> {
    if settings.media_formats.is_empty() {
        warn!("no media formats configured");
    }
    match file {
        Some(file) => {
            let ext = extension_of(&file)
                .ok_or_else(|| anyhow!("{} has no extension", file.display()))?;
            let targets = settings.targets_for(&ext);
            if targets.is_empty() {
                println!("No available formats");
            } else {
                println!("{}", targets.join(" "));
            }
        }
        None => {
            for (family, formats) in &settings.media_formats {
                println!(
                    "{family}: {} -> {}",
                    formats.extensions.join(" "),
                    formats.convertible_to.join(" ")
                );
            }
        }
    }
    Ok(())
}

fn logs_command(settings: &Settings, cwd: &Path, date: Option<String>) -> Result<()> {
    let dir = settings.log_dir_or(cwd);
    let log = match date {
        Some(d) => {
            let day = NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                .with_context(|| format!("invalid date {d:?}, expected YYYY-MM-DD"))?;
            ConversionLog::for_date(&dir, day, settings.log_failures)
        }
        None => ConversionLog::open(&dir, settings.log_failures)?,
    };
    let text = log.read()?;
    if text.is_empty() {
        info!("no conversions logged in {}", log.path().display());
    } else {
        print!("{text}");
    }
    Ok(())
}
