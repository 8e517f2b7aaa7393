//! tafsiri serving process.
//!
//! Speaks the line-delimited JSON contract over stdio: after startup it
//! prints a single `READY` line, then reads one request per line and
//! writes one response per line, processing requests strictly one at a
//! time. Engines are served through the echo development backend; real
//! deployments swap it at the backend seam in `tafsiri-core`.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod manifest;
mod protocol;

use manifest::Manifest;
use protocol::WireResponse;
use tafsiri_core::backend::echo::EchoModel;
use tafsiri_core::{Decoder, Device, EngineConfig, EnginePool, RegistryBuilder};

#[derive(Debug, Parser)]
#[command(
    name = "tafsiri-server",
    about = "Line-delimited JSON serving process for tafsiri translation engines",
    version = env!("CARGO_PKG_VERSION")
)]
struct ServerArgs {
    /// Directory holding checkpoint subdirectories and manifest.json
    #[arg(short, long)]
    models_dir: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HOT tier capacity
    #[arg(long)]
    hot_capacity: Option<usize>,

    /// Override the WARM tier capacity
    #[arg(long)]
    warm_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    // stdout is the wire, so all logging goes to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tafsiri_server=info,tafsiri_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = resolve_config(&args)?;
    let mut decoder = build_decoder(&args.models_dir, config)?;
    info!(
        "Serving {} engines {:?}",
        decoder.pool().len(),
        decoder.pool().stats()
    );

    // readiness sentinel: the first line the host ever reads from us
    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "READY")?;
        stdout.flush()?;
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response = handle_line(&mut decoder, &line);
                        let encoded = serde_json::to_string(&response)
                            .context("response serialization failed")?;
                        let mut stdout = std::io::stdout().lock();
                        writeln!(stdout, "{}", encoded)?;
                        stdout.flush()?;
                    }
                    Ok(None) => {
                        info!("End of input, shutting down");
                        break;
                    }
                    Err(err) => {
                        warn!("Failed to read request line: {}", err);
                        break;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Interrupt received, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Process one request line to completion. Every failure mode folds into
/// an error response; the caller's loop never terminates on a bad request.
fn handle_line(decoder: &mut Decoder, line: &str) -> WireResponse {
    let request: protocol::WireRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            warn!("Malformed request line: {}", err);
            return protocol::invalid_request(&err.to_string());
        }
    };

    match decoder.translate(&protocol::to_core_request(request)) {
        Ok(translations) => protocol::success_response(translations),
        Err(err) => {
            warn!("Request failed: {}", err);
            protocol::error_response(&err)
        }
    }
}

fn build_decoder(models_dir: &Path, config: EngineConfig) -> anyhow::Result<Decoder> {
    let manifest = Manifest::load(models_dir)?;
    let backend = EchoModel::new();

    let mut builder = RegistryBuilder::new();
    for entry in &manifest.directions {
        builder.register(entry.direction.clone(), models_dir.join(&entry.checkpoint))?;
    }
    let registry = builder
        .build(&Device::Cpu, &backend)
        .context("checkpoint registry build failed")?;
    let pool = EnginePool::build(&registry, &config, &backend)
        .context("engine pool build failed")?;
    Ok(Decoder::new(pool, Box::new(backend), config))
}

fn resolve_config(args: &ServerArgs) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(capacity) = args.hot_capacity.or_else(|| capacity_from_env("TAFSIRI_HOT_CAPACITY")) {
        config.hot_capacity = capacity;
    }
    if let Some(capacity) = args
        .warm_capacity
        .or_else(|| capacity_from_env("TAFSIRI_WARM_CAPACITY"))
    {
        config.warm_capacity = capacity;
    }
    config.validate()?;
    Ok(config)
}

fn capacity_from_env(name: &str) -> Option<usize> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Invalid {}='{}', ignoring", name, raw);
                None
            }
        },
        Err(_) => None,
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::{Mutex, OnceLock};

    use uuid::Uuid;

    use super::*;

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .expect("environment lock poisoned")
    }

    fn clear_capacity_env() {
        std::env::remove_var("TAFSIRI_HOT_CAPACITY");
        std::env::remove_var("TAFSIRI_WARM_CAPACITY");
    }

    fn parse(args: &[&str]) -> ServerArgs {
        ServerArgs::try_parse_from(args).expect("arguments should parse")
    }

    /// A models directory with two echo checkpoints and a manifest.
    fn fixture_models_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tafsiri-server-test-{}", Uuid::new_v4()));
        for name in ["en-it", "it-en"] {
            let checkpoint = dir.join(name);
            fs::create_dir_all(&checkpoint).unwrap();
            fs::write(
                checkpoint.join("checkpoint.json"),
                r#"{"vocab_size": 1000}"#,
            )
            .unwrap();
        }
        fs::write(
            dir.join("manifest.json"),
            r#"{"directions": [
                {"direction": "en__it", "checkpoint": "en-it"},
                {"direction": "it__en", "checkpoint": "it-en"}
            ]}"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn cli_capacities_override_environment() {
        let _guard = env_lock();
        clear_capacity_env();
        std::env::set_var("TAFSIRI_HOT_CAPACITY", "4");

        let config = resolve_config(&parse(&[
            "tafsiri-server",
            "--models-dir",
            "/tmp/models",
            "--hot-capacity",
            "1",
        ]))
        .unwrap();
        assert_eq!(config.hot_capacity, 1);
        clear_capacity_env();
    }

    #[test]
    fn environment_fills_in_when_cli_is_silent() {
        let _guard = env_lock();
        clear_capacity_env();
        std::env::set_var("TAFSIRI_HOT_CAPACITY", "3");
        std::env::set_var("TAFSIRI_WARM_CAPACITY", "7");

        let config =
            resolve_config(&parse(&["tafsiri-server", "--models-dir", "/tmp/models"])).unwrap();
        assert_eq!(config.hot_capacity, 3);
        assert_eq!(config.warm_capacity, 7);
        clear_capacity_env();
    }

    #[test]
    fn invalid_environment_capacity_falls_back_to_defaults() {
        let _guard = env_lock();
        clear_capacity_env();
        std::env::set_var("TAFSIRI_HOT_CAPACITY", "not-a-number");

        let config =
            resolve_config(&parse(&["tafsiri-server", "--models-dir", "/tmp/models"])).unwrap();
        assert_eq!(config.hot_capacity, 2);
        clear_capacity_env();
    }

    #[test]
    fn zero_hot_capacity_is_rejected_at_startup() {
        let _guard = env_lock();
        clear_capacity_env();
        let result = resolve_config(&parse(&[
            "tafsiri-server",
            "--models-dir",
            "/tmp/models",
            "--hot-capacity",
            "0",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn translate_request_round_trips_over_the_wire() {
        let dir = fixture_models_dir();
        let mut decoder = build_decoder(&dir, EngineConfig::default()).unwrap();

        let response = handle_line(
            &mut decoder,
            r#"{"q": ["ciao mondo"], "source": "it", "target": "en", "alternatives": 1}"#,
        );
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["success"], true);
        assert_eq!(encoded["data"][0]["text"], "ciao mondo");
        assert_eq!(encoded["data"][0]["a"][0], serde_json::json!([0, 1]));
        assert_eq!(encoded["data"][0]["alternatives"].as_array().unwrap().len(), 1);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn malformed_lines_fail_softly() {
        let dir = fixture_models_dir();
        let mut decoder = build_decoder(&dir, EngineConfig::default()).unwrap();

        let response = handle_line(&mut decoder, "this is not json");
        assert!(!response.success);

        // the decoder keeps serving afterwards
        let response = handle_line(
            &mut decoder,
            r#"{"q": ["hello"], "source": "en", "target": "it"}"#,
        );
        assert!(response.success);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unsupported_directions_report_their_type() {
        let dir = fixture_models_dir();
        let mut decoder = build_decoder(&dir, EngineConfig::default()).unwrap();

        let response = handle_line(
            &mut decoder,
            r#"{"q": ["hola"], "source": "es", "target": "en"}"#,
        );
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["success"], false);
        assert_eq!(encoded["type"], "unsupported_language");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_checkpoint_fails_the_build() {
        let dir = std::env::temp_dir().join(format!("tafsiri-server-test-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("manifest.json"),
            r#"{"directions": [{"direction": "en__it", "checkpoint": "missing"}]}"#,
        )
        .unwrap();

        assert!(build_decoder(&dir, EngineConfig::default()).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
