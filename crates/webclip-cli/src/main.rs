//! webclip CLI - archive web pages as Markdown with local media

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;
use webclip_core::{clean, BatchInput, MarkdownConverter, Orchestrator, Outcome, Settings};

#[derive(Parser)]
#[command(name = "webclip")]
#[command(author, version, about = "Archive web pages as self-contained markdown", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive URLs to markdown files
    Archive {
        /// URLs to archive; reads stdin when no other input is given
        urls: Vec<String>,

        /// File with URLs and notes, one per line or separated by %%%
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read URLs and notes from the system clipboard
        #[arg(long)]
        clipboard: bool,

        /// Keep remote media references instead of downloading
        #[arg(long)]
        no_media: bool,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Per-URL time budget in seconds
        #[arg(long)]
        budget: Option<u64>,

        /// Markdown backend: auto, htmd, html2md, builtin
        #[arg(long)]
        converter: Option<String>,

        /// Output file name (single URL only)
        #[arg(long)]
        name: Option<String>,
    },

    /// Convert HTML from stdin to markdown
    Render {
        /// Base URL for resolving relative links
        #[arg(short, long)]
        base_url: Option<String>,

        /// Markdown backend: auto, htmd, html2md, builtin
        #[arg(long)]
        converter: Option<String>,

        /// Output format: markdown, json
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,
    },

    /// Show the configuration file location and effective settings
    Config {
        /// Write the default configuration if no file exists yet
        #[arg(long)]
        init: bool,
    },
}

#[derive(Clone, Debug, Default)]
enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `render` output stays clean
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();

    let settings = load_settings(cli.config.as_ref())?;
    debug!(output_dir = ?settings.general.output_dir, converter = %settings.general.converter, "Settings loaded");

    match cli.command {
        Commands::Archive {
            urls,
            input,
            clipboard,
            no_media,
            output,
            budget,
            converter,
            name,
        } => {
            let mut settings = settings;
            if no_media {
                settings.general.download_media = false;
            }
            if let Some(output) = output {
                settings.general.output_dir = output;
            }
            if let Some(budget) = budget {
                settings.general.budget_secs = budget;
            }
            if let Some(converter) = converter {
                settings.general.converter = converter;
            }
            let batch = gather_input(urls, input, clipboard)?;
            run_archive(settings, batch, name).await?;
        }
        Commands::Render {
            base_url,
            converter,
            format,
        } => {
            let converter = converter.unwrap_or_else(|| settings.general.converter.clone());
            run_render(&settings, base_url, &converter, format)?;
        }
        Commands::Config { init } => {
            run_config(&settings, cli.config, init)?;
        }
    }

    Ok(())
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Settings::load().context("Failed to load config")?,
    };
    Ok(settings)
}

/// Merge URL arguments, an input file and the clipboard; stdin when none given
fn gather_input(urls: Vec<String>, input: Option<PathBuf>, clipboard: bool) -> Result<BatchInput> {
    let mut batch = BatchInput::default();
    let mut merge = |text: &str| {
        let parsed = BatchInput::parse(text);
        batch.urls.extend(parsed.urls);
        batch.notes.extend(parsed.notes);
    };

    if !urls.is_empty() {
        merge(&urls.join("\n"));
    }
    if let Some(path) = input.as_ref() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        merge(&text);
    }
    if clipboard {
        let text = arboard::Clipboard::new()
            .and_then(|mut c| c.get_text())
            .context("Failed to read clipboard")?;
        merge(&text);
    }
    if urls.is_empty() && input.is_none() && !clipboard {
        if io::stdin().is_terminal() {
            bail!("No input: pass URLs, --input FILE, --clipboard, or pipe text on stdin");
        }
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        merge(&text);
    }

    if batch.is_empty() {
        bail!("Input contained no URLs or notes");
    }
    Ok(batch)
}

async fn run_archive(settings: Settings, batch: BatchInput, name: Option<String>) -> Result<()> {
    let orchestrator = Orchestrator::with_default_routes(settings)?;
    let report = orchestrator.run_input(batch, name).await;

    for outcome in &report.outcomes {
        match outcome {
            Outcome::Done {
                document,
                media,
                media_failures,
                ..
            } => {
                let extra = if *media_failures > 0 {
                    format!(", {} media failed", media_failures)
                } else {
                    String::new()
                };
                println!(
                    "ok      {} ({} media{})",
                    document.path.display(),
                    media.len(),
                    extra
                );
            }
            Outcome::Failed(record) => {
                println!("failed  {} [{}] {}", record.url, record.code, record.message);
            }
            Outcome::Skipped { url, duplicate_of } => {
                println!("skipped {} (duplicate of {})", url, duplicate_of);
            }
        }
    }

    println!(
        "\n{} succeeded, {} failed, {} skipped",
        report.succeeded, report.failed, report.skipped
    );
    if let Some(path) = report.review_path.as_ref() {
        println!("Manual review: {}", path.display());
    }
    Ok(())
}

fn run_render(
    settings: &Settings,
    base_url: Option<String>,
    converter: &str,
    format: OutputFormat,
) -> Result<()> {
    let mut html = String::new();
    io::stdin().read_to_string(&mut html)?;

    let base = match base_url {
        Some(base) => Url::parse(&base).with_context(|| format!("Invalid base URL {}", base))?,
        None => Url::parse("about:blank")?,
    };

    let cleaned = clean::clean(&html, &base, settings.clean.min_region_chars)?;
    let markdown = MarkdownConverter::new(converter).convert(&cleaned)?;

    match format {
        OutputFormat::Markdown => {
            println!("{}", markdown);
        }
        OutputFormat::Json => {
            let meta = webclip_core::extract::extract_meta(&html);
            let json = serde_json::json!({
                "url": base.to_string(),
                "title": meta.title,
                "description": meta.description,
                "author": meta.author,
                "published": meta.publish_time,
                "media": webclip_core::media::enumerate_media(&cleaned, &base),
                "content": markdown,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

fn run_config(settings: &Settings, explicit: Option<PathBuf>, init: bool) -> Result<()> {
    let path = explicit.or_else(Settings::config_path);

    match path.as_ref() {
        Some(path) if init && !path.exists() => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, Settings::default().to_toml()?)?;
            println!("Wrote default configuration to {}", path.display());
        }
        Some(path) => {
            let state = if path.exists() { "" } else { " (not present, using defaults)" };
            println!("# Config file: {}{}", path.display(), state);
        }
        None => println!("# No config directory available, using defaults"),
    }

    println!("{}", settings.to_toml()?);
    Ok(())
}
