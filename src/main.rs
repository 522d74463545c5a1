use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use streamscribe::audio::WavAudio;
use streamscribe::cli::{Cli, Commands, ModelsAction};
use streamscribe::config::Config;
use streamscribe::engine::{self, PipelineCache};
use streamscribe::ipc::client::send_request;
use streamscribe::ipc::protocol::WorkerRequest;
use streamscribe::ipc::server::IpcServer;
use streamscribe::logging;
use streamscribe::models::catalog::{get_model, list_models};
use streamscribe::models::download::{download_model, format_model_info, list_installed_models};
use streamscribe::output::MessageRenderer;
use streamscribe::worker::{ChannelSink, RequestPhase, Worker};
use tracing::info;

/// Request id used for in-process transcriptions.
const LOCAL_REQUEST_ID: u64 = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_subscriber(logging::level_for(cli.verbose, cli.quiet));

    match cli.command {
        Commands::Transcribe { ref wav, pretty } => {
            let config = load_config(&cli)?;
            let audio = read_wav(wav)?;
            let phase = run_transcribe(config, audio, pretty, cli.quiet).await?;
            if phase != RequestPhase::Done {
                std::process::exit(1);
            }
        }
        Commands::Serve { ref socket } => {
            let config = load_config(&cli)?;
            let socket_path = socket_path(socket.clone(), &config);
            run_serve(config, socket_path).await?;
        }
        Commands::Send {
            ref wav,
            ref socket,
            pretty,
        } => {
            let config = load_config(&cli)?;
            let audio = read_wav(wav)?;
            let socket_path = socket_path(socket.clone(), &config);
            let done = run_send(&socket_path, audio, pretty, cli.quiet).await?;
            if !done {
                std::process::exit(1);
            }
        }
        Commands::Models { action } => {
            handle_models_command(action).await?;
        }
    }

    Ok(())
}

/// Resolve configuration, then apply command-line overrides.
///
/// Priority order:
/// 1. Command-line flags (--model, --language, --no-download)
/// 2. Environment variables (STREAMSCRIBE_*)
/// 3. Config file (--config or ~/.config/streamscribe/config.toml)
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::resolve(cli.config.as_deref())?;

    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }
    if let Some(language) = &cli.language {
        config.model.language = language.clone();
    }
    if cli.no_download {
        config.model.download = false;
    }

    config.validate()?;
    Ok(config)
}

fn read_wav(path: &Path) -> Result<WavAudio> {
    let audio = if path.as_os_str() == "-" {
        WavAudio::from_stdin()?
    } else {
        WavAudio::open(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    info!(
        seconds = audio.duration_secs(),
        source_rate = audio.source_rate,
        source_channels = audio.source_channels,
        "audio loaded"
    );
    Ok(audio)
}

fn socket_path(flag: Option<PathBuf>, config: &Config) -> PathBuf {
    flag.or_else(|| config.ipc.socket.clone())
        .unwrap_or_else(IpcServer::default_socket_path)
}

/// Run one request against an in-process worker. Ctrl-C cancels it.
async fn run_transcribe(
    config: Config,
    audio: WavAudio,
    pretty: bool,
    quiet: bool,
) -> Result<RequestPhase> {
    let cache = Arc::new(PipelineCache::new(engine::default_factory(&config)));
    let (sink, mut messages) = ChannelSink::pair();
    let worker = Arc::new(Worker::new(cache, Arc::new(sink), config.decoding));

    let handle = worker
        .dispatch(WorkerRequest::InferenceRequest {
            request_id: Some(LOCAL_REQUEST_ID),
            audio: audio.samples,
        })
        .context("worker did not accept the request")?;

    let mut renderer = MessageRenderer::new(pretty, quiet);
    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else { break };
                renderer.render(&message);
                if message.event.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, cancelling");
                worker.cancel(LOCAL_REQUEST_ID);
            }
        }
    }

    Ok(handle.await?)
}

async fn run_serve(config: Config, socket_path: PathBuf) -> Result<()> {
    let cache = Arc::new(PipelineCache::new(engine::default_factory(&config)));
    let server = IpcServer::new(socket_path);

    tokio::select! {
        result = server.start(cache, config.decoding) => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    server.stop()?;
    Ok(())
}

/// Returns whether the host reported a finished transcription.
async fn run_send(socket_path: &Path, audio: WavAudio, pretty: bool, quiet: bool) -> Result<bool> {
    let mut renderer = MessageRenderer::new(pretty, quiet);
    let request = WorkerRequest::InferenceRequest {
        request_id: None,
        audio: audio.samples,
    };

    let terminal = send_request(socket_path, &request, |message| renderer.render(message)).await?;
    Ok(matches!(
        terminal.event,
        streamscribe::WorkerEvent::InferenceDone
    ))
}

async fn handle_models_command(action: ModelsAction) -> Result<()> {
    match action {
        ModelsAction::List => {
            println!("Available models:");
            for model in list_models() {
                println!("  {}", format_model_info(model));
            }

            let extras: Vec<String> = list_installed_models()
                .into_iter()
                .filter(|name| get_model(name).is_none())
                .collect();
            if !extras.is_empty() {
                println!();
                println!("Other installed models:");
                for name in extras {
                    println!("  {}", name);
                }
            }
        }
        ModelsAction::Install { name } => {
            #[cfg(feature = "model-download")]
            let progress = streamscribe::models::download::progress_bar();
            #[cfg(not(feature = "model-download"))]
            let progress = streamscribe::engine::types::ignore_progress();

            let path = download_model(&name, progress).await?;
            println!("Model '{}' installed successfully", name);
            println!("Location: {}", path.display());
        }
    }
    Ok(())
}
