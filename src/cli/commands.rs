use crate::config::ServerConfig;
use crate::handler::HandlerResult;
use crate::router::Router;
use crate::server::{spawn_session_sweeper, AppService, Envelope, HttpServer, Request, Response};
use crate::templates::TemplateDir;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line interface for the stanza server
#[derive(Parser, Debug)]
#[command(name = "stanza", version)]
#[command(about = "First-match router and session kernel for a poem-sharing service", long_about = None)]
pub struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(short, long, global = true, env = "STANZA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP server until SIGINT or SIGTERM
    Serve {
        /// Listen address, overriding config and STANZA_ADDR
        #[arg(short, long)]
        addr: Option<String>,
    },
    /// Print the route table and any shadowed registrations
    Routes,
}

fn homepage(_req: &Request, res: &mut Response) -> HandlerResult {
    Ok(res.send(Envelope::ok("Homepage!"))?)
}

/// Routes the binary serves on its own. Domain controllers are mounted on
/// top of this by embedding applications.
#[must_use]
pub fn base_router() -> Router {
    let mut router = Router::new();
    router.get("/", homepage);
    router
}

pub fn run_cli(cli: Cli) -> Result<()> {
    let mut config = ServerConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Serve { addr } => {
            if let Some(addr) = addr {
                config.addr = addr;
            }
            serve(&config)
        }
        Commands::Routes => {
            print_routes(&AppService::new(base_router(), config.session_store()).with_health_route());
            Ok(())
        }
    }
}

fn print_routes(service: &AppService) {
    for route in service.router().routes() {
        println!("{:<7} {}", route.method.as_str(), route.pattern);
    }
    for shadowed in service.router().shadowed_routes() {
        println!(
            "warning: {} {} is shadowed by {} {}",
            shadowed.method, shadowed.shadowed, shadowed.method, shadowed.shadowing
        );
    }
}

fn serve(config: &ServerConfig) -> Result<()> {
    may::config().set_stack_size(config.stack_size);

    let sessions = config.session_store();
    let mut service = AppService::new(base_router(), sessions.clone())
        .with_health_route()
        .with_session_cookie_max_age(config.session.cookie_max_age_secs);
    if let Some(dir) = &config.templates_dir {
        info!(templates_dir = %dir.display(), "HTML views enabled");
        service = service.with_templates(Arc::new(TemplateDir::new(dir)));
    }
    service.router().dump_routes();

    let handle = HttpServer::new(service)
        .with_limits(config.limits())
        .start(config.addr.as_str())
        .with_context(|| format!("failed to start server on {}", config.addr))?;
    info!(addr = %handle.addr(), "Server started");

    let sweeper = match config.idle_timeout() {
        Some(_) => Some(
            spawn_session_sweeper(sessions, config.sweep_interval())
                .context("failed to start session sweeper")?,
        ),
        None => None,
    };

    wait_for_shutdown(handle)?;

    if let Some(sweeper) = sweeper {
        // SAFETY: the sweeper holds no locks across its sleep, which is where
        // cancellation lands.
        unsafe { sweeper.coroutine().cancel() };
        let _ = sweeper.join();
    }
    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown(handle: crate::server::ServerHandle) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    handle.stop();
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown(handle: crate::server::ServerHandle) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("server accept loop panicked"))
}
