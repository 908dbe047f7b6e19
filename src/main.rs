use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

mod app;
mod cli;
mod config;
mod encoder;
mod encodings;
mod lock;
#[cfg(test)]
mod tests;
mod web;

use app::FaceService;
use config::Config;
use encoder::{model_id_hash, FaceEncoder, OnnxFaceEncoder};
use encodings::EncodingStore;
use lock::FileLock;

fn base_path() -> anyhow::Result<String> {
    let base_path = match std::env::var("FACEMATCH_BASE_PATH") {
        Ok(path) => path,
        Err(_) => {
            let home = homedir::my_home()
                .context("could not determine home directory")?
                .context("home directory path is empty")?;
            format!("{}/.local/share/facematch", home.to_string_lossy())
        }
    };
    Ok(base_path)
}

fn build_service(config: &Config) -> anyhow::Result<FaceService> {
    let encoder = OnnxFaceEncoder::new(
        &config.detector_model_path(),
        &config.recognition_model_path(),
        &config.encoder.model_name,
        config.encoder.score_threshold,
    )
    .context("initializing face encoder")?;

    let store = EncodingStore::new(
        config.encodings_path(),
        model_id_hash(encoder.model_name()),
    );

    Ok(FaceService::new(store, Box::new(encoder), config.top_k))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    let config = Config::load_with(&base_path);

    // Exclusive across processes; the daemon keeps it for its lifetime,
    // one-shot commands hold it for the duration of the operation.
    let _lock = FileLock::try_acquire(std::path::Path::new(&base_path))
        .map_err(|err| anyhow::anyhow!("{err}"))?;

    match args.command {
        cli::Command::Daemon { listen } => {
            let listen_addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            let service = Arc::new(build_service(&config)?);
            web::start_daemon(service, &listen_addr);
            Ok(())
        }

        cli::Command::Add { image, label } => {
            let label = match label {
                Some(label) => label,
                None => match image.file_name() {
                    Some(name) => name.to_string_lossy().to_string(),
                    None => bail!("cannot derive a label from {}", image.display()),
                },
            };

            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;

            let service = build_service(&config)?;
            let added = service.add_face(&label, &bytes)?;
            println!("{}", serde_json::to_string_pretty(&added).unwrap());
            Ok(())
        }

        cli::Command::Compare { image, top } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;

            let service = build_service(&config)?;
            let matches = service.compare(&bytes, top)?;
            println!("{}", serde_json::to_string_pretty(&matches).unwrap());
            Ok(())
        }

        cli::Command::Total {} => {
            // No encoder needed just to count records
            let store = EncodingStore::new(
                config.encodings_path(),
                model_id_hash(&config.encoder.model_name),
            );
            println!("{} encodings stored", store.load()?.len());
            Ok(())
        }
    }
}
