//! Supersede CLI entry point.
//!
//! This binary is the composition root for the workspace. Responsibilities:
//!
//! 1. **Parse configuration**: command-line flags, their environment
//!    fallbacks, and an optional JSON file holding a [`CoordinatorConfig`].
//! 2. **Wire observability**: install the `tracing` subscriber (see
//!    [`telemetry`]).
//! 3. **Construct infrastructure**: build an [`HttpTransport`] and hand it to
//!    a [`RequestCoordinator`].
//! 4. **Run a command**:
//!    - `identity` prints the identity a call would be tracked under.
//!    - `fetch` submits several URLs in quick succession and reports which
//!      calls settled and which were superseded.

mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use coordinator::{CoordinatorConfig, RequestConfig, RequestCoordinator, RequestKey};
use serde::Serialize;
use tracing::info;
use transports::{HttpResponse, HttpTransport};

use crate::telemetry::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "supersede", version, about = "Latest-wins request coordination")]
struct Cli {
    /// Log line format.
    #[arg(
        long,
        value_enum,
        default_value_t = LogFormat::Pretty,
        env = "SUPERSEDE_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    /// JSON file holding coordinator settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the identity a call for TARGET would be tracked under.
    Identity(IdentityArgs),
    /// Submit each URL in turn and report how every call ended.
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
struct IdentityArgs {
    target: String,

    /// Explicit request key.
    #[arg(long)]
    key: Option<String>,

    /// Track the call under an identity of its own.
    #[arg(long)]
    no_cancel: bool,
}

#[derive(Args, Debug)]
struct FetchArgs {
    #[arg(required = true)]
    urls: Vec<String>,

    /// Share one identity across all URLs.
    #[arg(long)]
    key: Option<String>,

    /// Delay between submissions.
    #[arg(long, default_value_t = 50)]
    stagger_ms: u64,

    /// How long to wait for each call before reporting it as unsettled.
    #[arg(long, default_value_t = 2_000)]
    wait_ms: u64,

    /// Per-request timeout passed to the transport.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Reject superseded calls instead of leaving them pending.
    #[arg(long, env = "SUPERSEDE_VERBOSE_CANCEL")]
    verbose_cancel: bool,
}

/// How one submitted call ended, as printed by `fetch`.
#[derive(Debug, Serialize)]
struct CallReport {
    index: usize,
    url: String,
    identity: String,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Outcome {
    Fulfilled { status: u16, bytes: usize },
    Cancelled { error: String },
    Failed { error: String },
    Unsettled,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.log_format)?;

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => CoordinatorConfig::default(),
    };

    match cli.command {
        Command::Identity(args) => run_identity(args),
        Command::Fetch(args) => run_fetch(args, config).await,
    }
}

fn load_config(path: &Path) -> anyhow::Result<CoordinatorConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn run_identity(args: IdentityArgs) -> anyhow::Result<()> {
    let key = args.key.map(RequestKey::from);
    let identity = coordinator::identity::resolve(&args.target, key.as_ref(), args.no_cancel);
    println!("{identity}");
    Ok(())
}

async fn run_fetch(args: FetchArgs, mut config: CoordinatorConfig) -> anyhow::Result<()> {
    config.verbose |= args.verbose_cancel;
    let transport = HttpTransport::default();
    let coordinator: RequestCoordinator<HttpResponse> =
        RequestCoordinator::with_transport(config, Arc::new(transport.clone()));
    let wait = Duration::from_millis(args.wait_ms);
    let stagger = Duration::from_millis(args.stagger_ms);

    let mut waiters = Vec::with_capacity(args.urls.len());
    for (index, url) in args.urls.into_iter().enumerate() {
        if index > 0 && !stagger.is_zero() {
            tokio::time::sleep(stagger).await;
        }

        let mut request = RequestConfig::new();
        if let Some(key) = &args.key {
            request = request.with_key(key.as_str());
        }
        if let Some(timeout_ms) = args.timeout_ms {
            request = request.with_option("timeoutMs", timeout_ms);
        }

        let proxy = transport.fetch(&coordinator, url.clone(), request)?;
        let identity = proxy.identity().to_string();
        info!(index, %url, %identity, "submitted");

        waiters.push(tokio::spawn(async move {
            let outcome = match tokio::time::timeout(wait, proxy).await {
                Ok(Ok(response)) => Outcome::Fulfilled {
                    status: response.status,
                    bytes: response.body.len(),
                },
                Ok(Err(err)) if err.is_cancellation() => Outcome::Cancelled {
                    error: err.to_string(),
                },
                Ok(Err(err)) => Outcome::Failed { error: err.to_string() },
                Err(_) => Outcome::Unsettled,
            };
            CallReport {
                index,
                url,
                identity,
                outcome,
            }
        }));
    }

    for waiter in waiters {
        let report = waiter.await.context("report task failed")?;
        println!("{}", serde_json::to_string(&report)?);
    }

    info!(
        active = coordinator.active_count(),
        tracked = %serde_json::to_string(&coordinator.snapshot())?,
        "finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_fetch_flags() {
        let cli = Cli::try_parse_from([
            "supersede",
            "--log-format",
            "json",
            "fetch",
            "http://a/x",
            "http://a/y",
            "--key",
            "search",
            "--stagger-ms",
            "0",
            "--verbose-cancel",
        ])
        .expect("valid arguments");

        assert_eq!(cli.log_format, LogFormat::Json);
        match cli.command {
            Command::Fetch(args) => {
                assert_eq!(args.urls, vec!["http://a/x", "http://a/y"]);
                assert_eq!(args.key.as_deref(), Some("search"));
                assert_eq!(args.stagger_ms, 0);
                assert!(args.verbose_cancel);
            }
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn fetch_requires_a_url() {
        assert!(Cli::try_parse_from(["supersede", "fetch"]).is_err());
    }

    #[test]
    fn outcome_serialises_with_tag() {
        let report = CallReport {
            index: 1,
            url: "http://a/".into(),
            identity: "url:a/".into(),
            outcome: Outcome::Fulfilled { status: 200, bytes: 5 },
        };
        let value = serde_json::to_value(&report).expect("serialisable");
        assert_eq!(value["outcome"], "fulfilled");
        assert_eq!(value["status"], 200);
        assert_eq!(value["index"], 1);
    }

    #[test]
    fn config_file_is_json() {
        let path = std::env::temp_dir()
            .join(format!("supersede-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "verbose": true }"#).expect("write config");
        let config = load_config(&path).expect("valid config");
        std::fs::remove_file(&path).ok();
        assert!(config.verbose);
    }
}
