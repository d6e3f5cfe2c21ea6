//! Voice-cloning TTS server.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use voiceclone::config::AppConfig;
use voiceclone::engines::worker::{WorkerCommand, WorkerEngine};
use voiceclone::model::{self, Device, ModelHandle};
use voiceclone::server::VoiceCloneServer;
use voiceclone::speaker::{SpeakerResolver, UploadPolicy};
use voiceclone::Pipeline;

/// Voice-cloning text-to-speech server
#[derive(Debug, Parser)]
#[command(name = "voiceclone-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Pre-trained model identifier
    #[arg(long)]
    model: Option<String>,

    /// Compute device (cpu or gpu)
    #[arg(long)]
    device: Option<Device>,

    /// Default speaker voice used when no reference is uploaded
    #[arg(long)]
    default_voice: Option<PathBuf>,

    /// Fall back instead of failing when an uploaded reference is unreadable
    #[arg(long)]
    lenient_uploads: bool,

    /// Model worker program; arguments go after `--`
    #[arg(long)]
    worker: Option<PathBuf>,

    /// Arguments for the model worker
    #[arg(last = true)]
    worker_args: Vec<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(self, config: &mut AppConfig) {
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(name) = self.model {
            config.model.name = name;
        }
        if let Some(device) = self.device {
            config.model.device = device;
        }
        if let Some(voice) = self.default_voice {
            config.speaker.default_voice = Some(voice);
        }
        if self.lenient_uploads {
            config.speaker.upload_policy = UploadPolicy::Lenient;
        }
        if let Some(program) = self.worker {
            config.model.worker = WorkerCommand {
                program,
                args: self.worker_args,
                env: config.model.worker.env.clone(),
            };
        } else if !self.worker_args.is_empty() {
            config.model.worker.args = self.worker_args;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    log::info!(
        "Starting voiceclone-server {} (model={}, device={})",
        env!("CARGO_PKG_VERSION"),
        config.model.name,
        config.model.device
    );

    let model = load_model(&config).await?;

    let mut resolver = SpeakerResolver::new(config.speaker.default_voice.clone())
        .with_policy(config.speaker.upload_policy);
    let mut pipeline_dir = None;
    if let Some(dir) = &config.pipeline.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
        resolver = resolver.with_scratch_dir(dir);
        pipeline_dir = Some(dir.clone());
    }

    let mut pipeline =
        Pipeline::new(model, resolver).with_max_text_chars(config.pipeline.max_text_chars);
    if let Some(dir) = pipeline_dir {
        pipeline = pipeline.with_output_dir(dir);
    }

    VoiceCloneServer::new(&config, pipeline)
        .run()
        .await
        .context("server failed")?;

    log::info!("Server shutdown complete");
    Ok(())
}

/// Load the global model handle before serving; failure aborts startup.
async fn load_model(config: &AppConfig) -> Result<std::sync::Arc<ModelHandle>> {
    let model_config = config.model.clone();
    let handle = tokio::task::spawn_blocking(move || {
        model::init_global(|| {
            let engine = WorkerEngine::new(model_config.worker.clone())
                .with_fallback_languages(model_config.languages.clone().unwrap_or_default());
            let handle =
                ModelHandle::load(Box::new(engine), &model_config.name, model_config.device)?;
            match &model_config.languages {
                Some(languages) => handle.restrict_languages(languages),
                None => Ok(handle),
            }
        })
    })
    .await
    .context("model loading task panicked")?
    .with_context(|| format!("failed to load model '{}'", config.model.name))?;

    Ok(handle)
}
