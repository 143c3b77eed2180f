//! VibeTunnel control-plane server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use vibetunnel_core::config::Config;
use vibetunnel_core::session::SessionManager;
use vibetunnel_server::supervisor::{self, exit_code};
use vibetunnel_server::{router, AppState};

/// VibeTunnel terminal multiplexing server.
#[derive(Parser, Debug)]
#[command(name = "vibetunnel-server")]
struct Cli {
    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 4020)]
    port: u16,

    /// Base directory for recordings and state.
    #[arg(long = "control-dir", env = "VIBETUNNEL_CONTROL_DIR")]
    control_dir: Option<std::path::PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let code = match run() {
        Ok(()) => exit_code::NORMAL,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            classify_exit_code(&e)
        }
    };
    std::process::exit(code);
}

fn classify_exit_code(e: &anyhow::Error) -> i32 {
    if e.to_string().contains("in use") {
        exit_code::PORT_IN_USE
    } else {
        exit_code::UNSPECIFIED
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(dir) = cli.control_dir {
        config.control_dir = dir;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main(cli.port, config))
}

async fn async_main(port: u16, config: Config) -> anyhow::Result<()> {
    let control_dir = config.control_dir.clone();
    let sessions = Arc::new(SessionManager::new(config));
    sessions.spawn_activity_tracker();
    supervisor::spawn_health_probe(sessions.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let state = AppState { sessions, started_at: Instant::now() };
    let app = router(state);

    supervisor::supervise(|| {
        let app = app.clone();
        let control_dir = control_dir.clone();
        async move {
            let listener = supervisor::bind_with_conflict_resolution(addr, &control_dir).await?;
            tracing::info!(%addr, "listening");
            axum::serve(listener, app).await?;
            Ok(())
        }
    })
    .await
}
