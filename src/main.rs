//! Composition root: a demo server wiring an echo engine behind the bridge.
//!
//! All dependencies are constructed here, once, at startup: options, engine
//! factory, container, processor chain, server. There is no runtime lookup
//! of configured type names; embedders copy this shape and register their
//! own factory and processors.

use clap::Parser;
use portico::container::Container;
use portico::engine::{Completion, Dispatch, Engine, EngineFactory};
use portico::http::{BridgeRequest, BridgeResponse};
use portico::options::ServerOptions;
use portico::processor::ProcessorChain;
use portico::runtime::RuntimeOptions;
use portico::server::Server;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Portico demo server.
#[derive(Parser)]
#[command(name = "portico", about = "Coroutine HTTP bridge with a demo echo engine")]
struct Cli {
    /// Path to the YAML options file.
    #[arg(short, long, default_value = "portico.yaml")]
    config: PathBuf,

    /// Watch the options file and hot-reload the engine on changes.
    #[arg(long, default_value_t = false)]
    watch: bool,

    /// Log at debug level instead of the RUST_LOG default.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

/// Engine that echoes the request back as JSON.
struct EchoEngine;

impl Engine for EchoEngine {
    fn dispatch(&self, request: BridgeRequest, _completion: Completion) -> Dispatch {
        let body = json!({
            "method": request.method.as_str(),
            "path": request.uri.path(),
            "query": request.uri.query(),
            "body_bytes": request.body.len(),
        });
        let mut response = BridgeResponse::json(200, &body);
        response.set_header("X-Request-Id", request.id.to_string());
        Dispatch::Done(response)
    }
}

struct EchoEngineFactory;

impl EngineFactory for EchoEngineFactory {
    fn build(&self, options: &ServerOptions) -> anyhow::Result<Arc<dyn Engine>> {
        info!(packages = ?options.packages(), "building echo engine");
        Ok(Arc::new(EchoEngine))
    }
}

fn load_options(path: &PathBuf) -> anyhow::Result<ServerOptions> {
    if path.exists() {
        return Ok(ServerOptions::from_yaml_file(path)?);
    }
    info!(path = %path.display(), "no options file; using demo defaults on port 8080");
    let mut options = ServerOptions::default();
    options.port = 8080;
    options.add_package("portico.demo.echo");
    Ok(options)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = RuntimeOptions::from_env();
    may::config().set_stack_size(runtime.stack_size);

    let options = load_options(&cli.config)?;
    let container = Arc::new(Container::new(Arc::new(EchoEngineFactory), options)?);
    let chain = Arc::new(ProcessorChain::with_defaults());

    let _watcher = if cli.watch {
        Some(portico::hot_reload::watch_options(
            &cli.config,
            Arc::clone(&container),
        )?)
    } else {
        None
    };

    let server = Server::with_runtime(Arc::clone(&container), chain, runtime);
    let handle = server.start()?;
    info!(addr = %handle.addr(), "portico serving");

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        if let Some(signal) = signals.forever().next() {
            info!(signal, "shutdown signal received");
        }
        handle.stop();
    }

    #[cfg(not(unix))]
    {
        let _ = handle.join();
    }

    Ok(())
}
