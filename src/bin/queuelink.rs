//! queuelink – exercise the queue layer against the simulated transport,
//! or print the effective configuration.
//
//  $ queuelink selftest --env device
//  $ queuelink show-config --config queuelink.toml
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use queuelink::api;
use queuelink::transport::sim::{SimOptions, SimTransport};
use queuelink::transport::RunMode;
use queuelink::{QueueAttr, QueueManager, Route, RouteList, RouteQueryInfo, Settings};

#[derive(Debug, Parser)]
#[command(name = "queuelink", version, about = "queuelink self-test & config tool")]
struct Cli {
    /// Path to config TOML (env QUEUELINK_CONFIG is used when absent)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Env {
    Host,
    Device,
    ShareGroup,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a full queue/route lifecycle on the simulated transport.
    Selftest {
        #[arg(long, value_enum, default_value = "device")]
        env: Env,
        /// Number of payloads pushed through the data path.
        #[arg(long, default_value_t = 4)]
        messages: u32,
    },
    /// Print the settings after file and environment overrides.
    ShowConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    queuelink::logging::init_logging_with(&settings.logging.filter);

    match cli.cmd {
        Command::ShowConfig => {
            println!("{settings:#?}");
        }
        Command::Selftest { env, messages } => {
            let run_mode = match env {
                Env::Host => RunMode::Host,
                Env::Device | Env::ShareGroup => RunMode::Device,
            };
            settings.environment.share_group = matches!(env, Env::ShareGroup);
            let sim = SimTransport::new(SimOptions {
                run_mode,
                ..SimOptions::default()
            });
            QueueManager::install(QueueManager::new(Arc::new(sim), settings));
            selftest(messages)?;
        }
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Self-test lifecycle
// ───────────────────────────────────────────────────────────
fn selftest(messages: u32) -> anyhow::Result<()> {
    let env = QueueManager::global()?.resolve_environment()?;
    info!(?env, "running selftest");

    let mut attr = QueueAttr::new();
    attr.set_name("selftest-src")?;
    let src = api::create_queue(Some(&attr))?;
    let dst = api::create_queue(None)?;
    println!("created queues src={src} dst={dst}");

    let mut routes: RouteList = [Route::new(src, dst)].into_iter().collect();
    api::bind_routes(&mut routes)?;
    for route in routes.iter() {
        println!("bound {} -> {} (status {})", route.src(), route.dst(), route.status());
    }

    let mut found = RouteList::new();
    api::query_routes(&RouteQueryInfo::by_src(src), &mut found)?;
    println!("query by src {src}: {} route(s)", found.len());

    for i in 0..messages {
        let payload = format!("message-{i}");
        match api::enqueue_data(src, payload.as_bytes(), &[], 0) {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                println!("queue {src} full after {i} message(s)");
                break;
            }
            Err(e) => return Err(e.into()),
        }
        let mut data = [0u8; 64];
        let mut user = [0u8; 0];
        let size = api::dequeue_data(src, &mut data, &mut user, 0)?;
        println!("round trip {i}: {}", String::from_utf8_lossy(&data[..size]));
    }

    if let Err(e) = api::destroy_queue(src) {
        println!("destroy while bound refused: {e}");
    }
    api::unbind_routes(&mut routes)?;
    api::destroy_queue(src)?;
    api::destroy_queue(dst)?;
    println!("selftest finished");
    Ok(())
}
