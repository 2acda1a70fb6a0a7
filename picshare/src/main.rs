mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Overrides, Settings};
use logging::Verbosity;
use preview_cache::{
    Gallery, Generator, Library, MarkStore, PreviewCache, PreviewConfig, Served, StatusSink, TracingStatus,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "picshare")]
#[command(about = "Share a photo library through lazily generated JPEG previews")]
struct Cli {
    /// Settings file (defaults to <config dir>/picshare/picshare.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate every missing preview under the root and wait for the result
    Warm {
        /// Print the sweep report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Produce the preview of one original
    Preview {
        album: String,
        /// File name, or a path relative to the album
        file: String,
        /// Write the bytes here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Toggle the favorite mark on one original
    Mark { album: String, file: String },

    /// List the albums under the root
    Albums,

    /// List the media files of one album, RAW originals flagged
    Photos {
        album: String,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet));

    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply(&cli.overrides);
    let root = settings.root()?.to_path_buf();
    let preview = settings.preview;

    match cli.command {
        Commands::Warm { json } => warm(&root, preview, json),
        Commands::Preview { album, file, output } => write_preview(&root, preview, &album, &file, output),
        Commands::Mark { album, file } => toggle_mark(&root, &preview, &album, &file),
        Commands::Albums => list_albums(&root, &preview),
        Commands::Photos { album, json } => list_photos(&root, &preview, &album, json),
    }
}

fn warm(root: &Path, config: PreviewConfig, json: bool) -> Result<()> {
    // Keep stdout clean for the JSON report
    let status: Arc<dyn StatusSink> = if json {
        Arc::new(TracingStatus)
    } else {
        Arc::new(|message: &str| println!("{}", message))
    };

    let gallery = Gallery::open(root, config, status)
        .with_context(|| format!("Failed to open library at {}", root.display()))?;
    let report = gallery.wait_for_sweep().context("Preview sweep did not finish")?;
    gallery.wait_idle();

    if json {
        let text = serde_json::to_string_pretty(&report).context("Failed to serialize sweep report")?;
        println!("{}", text);
    } else {
        println!(
            "{} submitted, {} already cached, {} seen before, {} ignored",
            report.submitted, report.cached, report.seen, report.ignored
        );
    }
    Ok(())
}

fn write_preview(root: &Path, config: PreviewConfig, album: &str, file: &str, output: Option<PathBuf>) -> Result<()> {
    let library = open_library(root, &config)?;
    let cache = PreviewCache::new(library, Arc::new(Generator::new(Arc::new(config))));

    let served = cache
        .get_or_create(album, file)
        .with_context(|| format!("No preview for {}/{}", album, file))?;
    if let Served::Original(_) = served {
        tracing::warn!(album, file, "serving the original, no preview could be generated");
    }

    match output {
        Some(path) => {
            std::fs::write(&path, served.bytes()).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("wrote {} bytes to {}", served.bytes().len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(served.bytes()).context("Failed to write preview to stdout")?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn toggle_mark(root: &Path, config: &PreviewConfig, album: &str, file: &str) -> Result<()> {
    let marks = MarkStore::new(open_library(root, config)?, Arc::new(TracingStatus));
    let marked = marks
        .toggle(album, file)
        .with_context(|| format!("Failed to toggle mark on {}/{}", album, file))?;
    println!("{}/{} is {}", album, file, if marked { "marked" } else { "not marked" });
    Ok(())
}

fn list_albums(root: &Path, config: &PreviewConfig) -> Result<()> {
    for album in open_library(root, config)?.albums()? {
        println!("{}", album);
    }
    Ok(())
}

fn list_photos(root: &Path, config: &PreviewConfig, album: &str, json: bool) -> Result<()> {
    let photos = open_library(root, config)?
        .photos(album, config)
        .with_context(|| format!("Failed to list album {}", album))?;

    if json {
        let text = serde_json::to_string_pretty(&photos).context("Failed to serialize photo listing")?;
        println!("{}", text);
    } else {
        for photo in &photos {
            println!("{}\t{}", photo.kind, photo.filename);
        }
    }
    Ok(())
}

fn open_library(root: &Path, config: &PreviewConfig) -> Result<Library> {
    Library::open(root, config).with_context(|| format!("Failed to open library at {}", root.display()))
}
