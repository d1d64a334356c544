use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Upload a knowledge file, register the KPI assistant and ask it questions.
#[derive(Parser, Debug, Clone)]
#[command(name = "kpi-assistant", version, about)]
pub struct Cli {
    /// File pushed into the assistant's vector store
    #[arg(env = "KPI_ASSISTANT_FILE")]
    pub file: PathBuf,

    /// Question to ask; repeat for several. Reads stdin when omitted
    #[arg(short, long = "query")]
    pub queries: Vec<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "KPI_ASSISTANT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the KPI backend
    #[arg(long, env = "KPI_BACKEND_URL", default_value = DEFAULT_BACKEND_URL)]
    pub backend_url: String,

    #[arg(long, env = "KPI_BACKEND_EMAIL", default_value = "ffm@example.com")]
    pub backend_email: String,

    #[arg(
        long,
        env = "KPI_BACKEND_PASSWORD",
        default_value = "passwordffm",
        hide_env_values = true
    )]
    pub backend_password: String,

    /// Delay between two status polls
    #[arg(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Give up on a run (or an indexing job) after this many seconds
    #[arg(long, default_value_t = 300)]
    pub max_wait_secs: u64,

    #[arg(long, default_value_t = 120)]
    pub http_timeout_secs: u64,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    pub email: String,
    pub password: String,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    pub backend: BackendSettings,
    pub file: PathBuf,
    pub queries: Vec<String>,
    pub poll: PollSettings,
    pub http_timeout: Duration,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let openai_api_key = cli
            .openai_api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(Error::MissingApiKey)?;

        Ok(Self {
            openai_api_key,
            openai_base_url: cli.openai_base_url,
            model: cli.model,
            backend: BackendSettings {
                base_url: cli.backend_url,
                email: cli.backend_email,
                password: cli.backend_password,
            },
            file: cli.file,
            queries: cli.queries,
            poll: PollSettings {
                interval: Duration::from_millis(cli.poll_interval_ms),
                max_wait: Duration::from_secs(cli.max_wait_secs),
            },
            http_timeout: Duration::from_secs(cli.http_timeout_secs),
        })
    }
}

/// Default tracing directive for a `-v` count.
pub fn log_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
