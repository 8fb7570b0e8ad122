use std::path::{Path, PathBuf};

use adgen_core::extract::{extract_labeled_url, extract_payload};
use adgen_core::{
    Activity, AgentEvent, EngineConfig, MarketAnalysis, ProductMetadata, Script, Session,
    StageOrchestrator, StorageConfig, VideoLabel, write_default_config,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::logging::log_slug;

#[derive(Debug, Parser)]
#[command(name = "adgen", version, about = "Turn a product page into a video ad")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a default `.adgen/config.yaml`
    Init {
        /// Working directory (defaults to current directory)
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Run the whole pipeline for a product URL
    Run(RunArgs),

    /// Extract a stage artifact from a saved `/run` response
    Extract {
        /// Which artifact to look for
        #[arg(short, long, value_enum)]
        stage: ExtractStage,

        /// JSON file holding the response event array
        #[arg(short, long)]
        events: PathBuf,

        /// Web prefix for storage-object URIs
        #[arg(long)]
        public_endpoint: Option<String>,
    },
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Product page URL
    #[arg(short, long)]
    url: String,

    /// Working directory holding `.adgen/` (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// Remote agent service base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Remote agent application name
    #[arg(long)]
    app_name: Option<String>,

    /// User identifier sent to the remote service
    #[arg(long)]
    user_id: Option<String>,

    /// Approve the first script without asking for feedback
    #[arg(long)]
    auto_approve: bool,

    /// Write the final session as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractStage {
    Metadata,
    Market,
    Script,
    Aroll,
    Broll,
    Final,
}

impl Cli {
    /// Working directory and log slug for the selected command.
    ///
    /// Only `run` writes a log file.
    pub fn log_context(&self) -> (PathBuf, Option<String>) {
        match &self.command {
            Commands::Init { workdir } => (workdir.clone(), None),
            Commands::Run(args) => (args.workdir.clone(), Some(log_slug(&args.url))),
            Commands::Extract { .. } => (PathBuf::from("."), None),
        }
    }

    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init { workdir } => init(workdir),
            Commands::Run(args) => run_pipeline(args).await,
            Commands::Extract {
                stage,
                events,
                public_endpoint,
            } => {
                let endpoint =
                    public_endpoint.unwrap_or_else(|| StorageConfig::default().public_endpoint);
                let found = extract_from_file(stage, &events, &endpoint)?;
                println!("{found}");
                Ok(())
            }
        }
    }
}

fn init(workdir: PathBuf) -> Result<()> {
    let config = EngineConfig::builder().workdir(workdir).build();
    let path = write_default_config(&config).with_context(|| {
        format!(
            "failed to initialize {}",
            config.adgen_dir().display()
        )
    })?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn run_pipeline(args: RunArgs) -> Result<()> {
    let config = EngineConfig::builder()
        .workdir(args.workdir)
        .base_url_opt(args.base_url)
        .app_name_opt(args.app_name)
        .user_id_opt(args.user_id)
        .build();
    let orchestrator =
        StageOrchestrator::new(&config).context("failed to set up the pipeline")?;

    let mut observer = orchestrator.subscribe();
    let progress = tokio::spawn(async move {
        while let Some(snapshot) = observer.next().await {
            if let Activity::Running(operation) = snapshot.activity {
                eprintln!("... {operation}");
            }
        }
    });

    let session = orchestrator
        .start_extraction(&args.url)
        .await
        .context("extraction failed")?;
    print_metadata(&session);

    let session = orchestrator
        .run_market_analysis(&session)
        .await
        .context("market analysis failed")?;
    println!("Market analysis ready.");

    let mut session = orchestrator
        .run_script_generation(&session)
        .await
        .context("script generation failed")?;

    if !args.auto_approve {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print_script(&session);
            println!("Enter feedback to revise the script, or an empty line to approve:");
            let Some(line) = lines.next_line().await.context("failed to read feedback")? else {
                break;
            };
            if line.trim().is_empty() {
                break;
            }
            session = orchestrator
                .refine_script(&session, &line)
                .await
                .context("script refinement failed")?;
        }
    } else {
        print_script(&session);
    }

    let session = orchestrator
        .approve_script(&session)
        .await
        .context("footage generation failed")?;
    println!("A-roll: {}", session.aroll_url().unwrap_or_default());
    println!("B-roll: {}", session.broll_url().unwrap_or_default());

    let session = orchestrator
        .compose_video(&session)
        .await
        .context("video composition failed")?;
    println!(
        "Final video: {}",
        session.final_video_url().unwrap_or_default()
    );

    if session.is_degraded() {
        let kinds: Vec<String> = session.degraded().iter().map(|k| format!("{k:?}")).collect();
        println!("Placeholder content used for: {}", kinds.join(", "));
    }

    if let Some(output) = &args.output {
        write_session(&session, output)?;
        println!("Session written to {}", output.display());
    }

    drop(orchestrator);
    let _ = progress.await;
    info!(session_id = %session.session_id(), "pipeline finished");
    Ok(())
}

fn print_metadata(session: &Session) {
    if let Some(metadata) = session.metadata() {
        println!(
            "Product: {} {} ({})",
            metadata.brand, metadata.product_name, metadata.product_category
        );
    }
}

fn print_script(session: &Session) {
    if let Some(script) = session.script() {
        println!("\n--- Audio script ---\n{}", script.audio_script);
        println!("\n--- Video script ---\n{}\n", script.video_script);
    }
}

fn write_session(session: &Session, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(session).context("failed to serialize session")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write session to {}", path.display()))
}

/// Run the extractor for `stage` over a saved response file.
fn extract_from_file(stage: ExtractStage, path: &Path, public_endpoint: &str) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let events: Vec<AgentEvent> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a response event array", path.display()))?;

    let found = match stage {
        ExtractStage::Metadata => to_pretty(extract_payload::<ProductMetadata>(&events))?,
        ExtractStage::Market => to_pretty(extract_payload::<MarketAnalysis>(&events))?,
        ExtractStage::Script => to_pretty(extract_payload::<Script>(&events))?,
        ExtractStage::Aroll => extract_labeled_url(&events, VideoLabel::ARoll, public_endpoint),
        ExtractStage::Broll => extract_labeled_url(&events, VideoLabel::BRoll, public_endpoint),
        ExtractStage::Final => extract_labeled_url(&events, VideoLabel::Final, public_endpoint),
    };

    match found {
        Some(found) => Ok(found),
        None => bail!("no {stage:?} artifact found in {}", path.display()),
    }
}

fn to_pretty<T: serde::Serialize>(value: Option<T>) -> Result<Option<String>> {
    value
        .map(|v| serde_json::to_string_pretty(&v))
        .transpose()
        .context("failed to serialize artifact")
}
