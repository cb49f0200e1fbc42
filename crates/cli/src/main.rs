use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use octarine_api::{Dispatch, Event, EventSink, InProcAdapter, MeshAdapter};
use octarine_core::{AdapterConfig, InstallRequest};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "octarinectl", version, about = "Octarine mesh adapter CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubeconfig file (default: ~/.kube/config, then in-cluster)
    #[arg(long = "kubeconfig", global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context (default: current context)
    #[arg(long = "context", global = true)]
    context: Option<String>,

    /// Directory with operation templates and workflow manifests
    #[arg(long = "templates-dir", global = true, env = "OCTARINE_TEMPLATES_DIR")]
    templates_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the mesh name
    Name,
    /// List supported operations
    Ops,
    /// Apply (or with --delete, remove) an operation
    Apply {
        /// Operation key, see `octarinectl ops`
        op: String,
        /// Target namespace (install operations default to the dataplane namespace)
        #[arg(short = 'n', long = "namespace", default_value = "")]
        namespace: String,
        /// User recorded in templated operations
        #[arg(long = "user", default_value = "")]
        user: String,
        /// Remove instead of deploy
        #[arg(long = "delete", action = ArgAction::SetTrue)]
        delete: bool,
        /// Manifest file for the `custom` operation
        #[arg(long = "body")]
        body: Option<PathBuf>,
        /// Return once a background operation is scheduled instead of waiting for its event
        #[arg(long = "no-wait", action = ArgAction::SetTrue)]
        no_wait: bool,
    },
}

/// Adapter logs go to stderr so `-o json` output stays parseable.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("OCTARINE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

/// Serve the apply, event and workflow counters when `OCTARINE_METRICS_ADDR` is set.
fn init_metrics() {
    let Ok(addr) = std::env::var("OCTARINE_METRICS_ADDR") else { return };
    let sock: SocketAddr = match addr.parse() {
        Ok(sock) => sock,
        Err(_) => {
            warn!(addr = %addr, "OCTARINE_METRICS_ADDR must be host:port; adapter metrics disabled");
            return;
        }
    };
    match metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock).install() {
        Ok(()) => info!(addr = %sock, "serving adapter metrics"),
        Err(e) => warn!(error = %e, "adapter metrics exporter not started"),
    }
}

fn default_kubeconfig() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let path = Path::new(&home).join(".kube").join("config");
    path.exists().then_some(path)
}

/// Kubeconfig bytes; empty selects the in-cluster configuration.
fn read_kubeconfig(path: Option<PathBuf>) -> Result<Vec<u8>> {
    match path.or_else(default_kubeconfig) {
        Some(p) => std::fs::read(&p).with_context(|| format!("reading kubeconfig {}", p.display())),
        None => Ok(Vec::new()),
    }
}

/// Prints events and stops the reader after `remaining` of them.
struct StdoutSink {
    output: Output,
    remaining: usize,
    failed: bool,
    cancel: CancellationToken,
}

#[async_trait::async_trait]
impl EventSink for StdoutSink {
    async fn deliver(&mut self, event: &Event) -> Result<()> {
        match self.output {
            Output::Human => {
                let level = if event.is_error() { "ERROR" } else { "INFO" };
                println!("{}  {}", level, event.summary);
                if !event.details.is_empty() { println!("    {}", event.details); }
            }
            Output::Json => println!("{}", serde_json::to_string(event)?),
        }
        self.failed |= event.is_error();
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 { self.cancel.cancel(); }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = AdapterConfig::from_env();
    if let Some(dir) = cli.templates_dir.clone() { config.templates_dir = dir; }
    let adapter = InProcAdapter::new(&config);

    match cli.command {
        Commands::Name => println!("{}", adapter.mesh_name().await?),
        Commands::Ops => {
            let ops = adapter.supported_operations().await?;
            match cli.output {
                Output::Human => {
                    for (key, desc) in &ops { println!("{:<26} {}", key, desc); }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&ops)?),
            }
        }
        Commands::Apply { op, namespace, user, delete, body, no_wait } => {
            let custom_body = match body {
                Some(p) => std::fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?,
                None => String::new(),
            };
            let kubeconfig = read_kubeconfig(cli.kubeconfig)?;
            adapter.create_client(&kubeconfig, cli.context.as_deref()).await?;

            let req = InstallRequest::new(op.clone()).namespace(namespace).username(user).delete(delete).body(custom_body);
            info!(op = %op, delete, "apply invoked");
            let handle = match adapter.apply_operation(req).await {
                Ok(Dispatch::Completed) => {
                    println!("{} {}", op, if delete { "removed" } else { "applied" });
                    return Ok(());
                }
                Ok(Dispatch::Scheduled(h)) => h,
                Err(e) => {
                    error!(error = %e, "apply failed");
                    return Err(e.into());
                }
            };
            if no_wait {
                println!("{} scheduled as workflow {}", op, handle.id());
                return Ok(());
            }

            let token = handle.cancel_token();
            let workflow = handle.id();
            let interrupt = tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    warn!(workflow = %workflow, "interrupted; cancelling workflow");
                    token.cancel();
                }
            });
            if let Err(e) = handle.join().await {
                info!(error = %format!("{:#}", e), "workflow finished with error");
            }
            interrupt.abort();

            let cancel = CancellationToken::new();
            let mut sink = StdoutSink { output: cli.output, remaining: 1, failed: false, cancel: cancel.clone() };
            adapter.stream_events(&mut sink, &cancel).await?;
            if sink.failed {
                return Err(anyhow!("{} failed", op));
            }
        }
    }
    Ok(())
}
