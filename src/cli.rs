//! CLI interface for callcore

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use crate::call::{CallDeps, CallRegistry, LogArchive};
use crate::config::Config;
use crate::dialog::ChatClient;
use crate::telephony::TelephonyClient;
use crate::voice::{SttConnector, TtsClient};

#[derive(Parser)]
#[command(name = "callcore")]
#[command(about = "Real-time outbound voice agent core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook + media server
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Originate one outbound call through a running server
    Dial {
        /// Number to call (E.164)
        to: String,
        /// Caller ID override
        #[arg(long)]
        from: Option<String>,
        /// Base URL of the running callcore server
        #[arg(long, default_value = "http://127.0.0.1:8080", env = "CALLCORE_SERVER")]
        server: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port } => {
            let mut config = Config::load()?;
            if let Some(port) = port {
                config.server.port = port;
            }
            let deps = build_deps(config)?;
            crate::server::start(deps).await
        }
        Commands::Dial { to, from, server } => dial(&server, &to, from.as_deref()).await,
    }
}

/// Wire the production collaborators behind their seams.
fn build_deps(config: Config) -> Result<CallDeps> {
    let config = Arc::new(config);
    let control_timeout = Duration::from_millis(config.timers.control_timeout_ms);

    let telephony = TelephonyClient::new(&config.telephony, control_timeout)
        .context("telephony client init failed")?;
    let stt = SttConnector::new(config.stt.clone(), &config.timers)
        .context("stt connector init failed")?;
    let tts = TtsClient::new(config.tts.clone()).context("tts client init failed")?;
    let chat = ChatClient::new(&config.dialog).context("llm client init failed")?;

    Ok(CallDeps {
        telephony: Arc::new(telephony),
        stt: Arc::new(stt),
        tts: Arc::new(tts),
        chat: Arc::new(chat),
        archive: Arc::new(LogArchive),
        registry: CallRegistry::new(),
        config,
    })
}

async fn dial(server: &str, to: &str, from: Option<&str>) -> Result<()> {
    let client = reqwest::Client::new();
    let mut body = serde_json::json!({ "to": to });
    if let Some(from) = from {
        body["from"] = serde_json::json!(from);
    }

    let resp = client
        .post(format!("{}/calls", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("failed to reach callcore server")?;

    if !resp.status().is_success() {
        anyhow::bail!("dial rejected: {}", resp.status());
    }
    let parsed: serde_json::Value = resp.json().await.context("bad dial response")?;
    println!(
        "originated call {}",
        parsed["call_control_id"].as_str().unwrap_or("<unknown>")
    );
    Ok(())
}
