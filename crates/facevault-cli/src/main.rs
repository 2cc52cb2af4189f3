use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facevault_cli::{AppContext, Config, ServiceError};
use facevault_core::SummaryFileExtractor;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facevault", about = "Face representation store and matcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the single face of an image under a username
    Enroll {
        #[arg(short, long)]
        username: String,
        /// Free-form description stored with the identity
        #[arg(short, long, default_value = "")]
        info: String,
        /// Face summary of the image
        #[arg(short, long)]
        faces: PathBuf,
    },
    /// Name every enrolled identity found in an image
    Identify {
        #[arg(short, long)]
        faces: PathBuf,
    },
    /// Check that the face in an image belongs to a username
    Verify {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        faces: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        username: String,
    },
    /// Report the bounding box of every face in an image
    Faces {
        #[arg(short, long)]
        faces: PathBuf,
    },
    /// Delete the whole persistence location
    Purge {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(fields) => {
            print_status("success", fields);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            let mut fields = Map::new();
            fields.insert("message".into(), json!(format!("{e:#}")));
            if let Some(service) = e.downcast_ref::<ServiceError>() {
                fields.insert("retryable".into(), json!(service.is_retryable()));
            }
            print_status("fail", fields);
            ExitCode::FAILURE
        }
    }
}

fn print_status(status: &str, mut fields: Map<String, Value>) {
    fields.insert("status".into(), json!(status));
    println!("{}", Value::Object(fields));
}

async fn run(command: Commands) -> Result<Map<String, Value>> {
    if let Commands::Purge { yes: false } = command {
        bail!("refusing to purge without --yes");
    }

    let config = Config::load().context("failed to load configuration")?;
    let ctx = AppContext::open(&config, Arc::new(SummaryFileExtractor)).await?;

    let mut out = Map::new();
    match command {
        Commands::Enroll {
            username,
            info,
            faces,
        } => {
            let record = ctx.enroll(&faces, &username, &info).await?;
            out.insert(
                "message".into(),
                json!(format!("{} enrolled", record.label())),
            );
        }
        Commands::Identify { faces } => {
            let identities = ctx.identify(&faces).await?;
            out.insert(
                "message".into(),
                json!(format!("{} identities found", identities.len())),
            );
            out.insert("identities".into(), json!(identities));
        }
        Commands::Verify { username, faces } => {
            let verified = ctx.verify(&faces, &username).await?;
            let message = if verified {
                format!("face matches {username}")
            } else {
                format!("face does not match {username}")
            };
            out.insert("message".into(), json!(message));
            out.insert("verified".into(), json!(verified));
        }
        Commands::List => {
            let records = ctx.list().await?;
            let identities: Vec<Value> = records
                .iter()
                .map(|r| json!({"username": r.username, "info": r.info}))
                .collect();
            out.insert(
                "message".into(),
                json!(format!("{} identities enrolled", records.len())),
            );
            out.insert("identities".into(), Value::Array(identities));
        }
        Commands::Remove { username } => {
            let record = ctx.remove(&username).await?;
            out.insert(
                "message".into(),
                json!(format!("{} removed", record.label())),
            );
        }
        Commands::Faces { faces } => {
            let areas = ctx.face_areas(&faces).await?;
            out.insert(
                "message".into(),
                json!(format!("{} faces detected", areas.len())),
            );
            out.insert("faces".into(), json!(areas));
        }
        Commands::Purge { .. } => {
            ctx.purge().await?;
            out.insert("message".into(), json!("persistence location deleted"));
        }
    }
    Ok(out)
}
