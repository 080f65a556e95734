mod host;
mod sources;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use foundation::{now_ms, EpochMs};
use presence::StateTable;
use runtime::CardConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::host::{parse_window, Host, PassOutput};
use crate::sources::{Fixtures, HttpSource, MemorySource, RemoteSource};

#[derive(Parser, Debug)]
#[command(author, version, about = "Render person markers, tracks and photo overlays from a state snapshot")]
struct Cli {
    /// Base URL the track/photo endpoints hang off (default: $PEOPLE_MAP_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token for the remote endpoints (default: $PEOPLE_MAP_TOKEN)
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct PassArgs {
    /// State snapshot: object keyed by entity id, or an array of states
    #[arg(long)]
    states: PathBuf,

    /// Card configuration (JSON)
    #[arg(long)]
    config: PathBuf,

    /// Serve remote queries from this file instead of over HTTP
    #[arg(long)]
    fixtures: Option<PathBuf>,

    /// Host window size, WIDTHxHEIGHT
    #[arg(long, default_value = "1280x800")]
    viewport: String,

    /// Clock override in epoch milliseconds
    #[arg(long)]
    now_ms: Option<EpochMs>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single pass and print the result
    Render {
        #[command(flatten)]
        input: PassArgs,

        /// Click a photo marker after the pass (repeatable)
        #[arg(long = "click")]
        clicks: Vec<String>,
    },

    /// Re-read the snapshot and run a pass every interval
    Watch {
        #[command(flatten)]
        input: PassArgs,

        #[arg(long, default_value_t = 60)]
        interval_secs: u64,

        /// Stop after this many passes
        #[arg(long)]
        passes: Option<u64>,
    },
}

enum Backend {
    Http(Arc<HttpSource>),
    Memory(Arc<MemorySource>),
}

impl Backend {
    fn source(&self) -> Arc<dyn RemoteSource> {
        match self {
            Backend::Http(src) => src.clone(),
            Backend::Memory(src) => src.clone(),
        }
    }

    /// Picks up edits to the fixtures file between passes.
    async fn reload(&self, fixtures: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
        let (Backend::Memory(src), Some(path)) = (self, fixtures) else {
            return Ok(());
        };
        let text = tokio::fs::read_to_string(path).await?;
        let fixtures: Fixtures = serde_json::from_str(&text)?;
        src.set_tracks(fixtures.tracks).await;
        src.set_photos(fixtures.photos).await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_url = cli.base_url.unwrap_or_else(|| {
        env::var("PEOPLE_MAP_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8123/api".to_string())
    });
    let token = cli.token.or_else(|| env::var("PEOPLE_MAP_TOKEN").ok());

    match cli.command {
        Command::Render { input, clicks } => {
            let (mut host, _backend) = setup(&input, &base_url, token).await?;
            let table = load_states(&input.states).await?;
            let now = input.now_ms.unwrap_or_else(now_ms);
            let mut out = host.run_pass(&table, now).await;
            for key in &clicks {
                out.viewer = host.click_photo(key);
            }
            print_output(&out)?;
        }
        Command::Watch {
            input,
            interval_secs,
            passes,
        } => {
            let (mut host, backend) = setup(&input, &base_url, token).await?;
            watch(&mut host, &backend, &input, interval_secs, passes).await?;
        }
    }

    Ok(())
}

async fn setup(
    input: &PassArgs,
    base_url: &str,
    token: Option<String>,
) -> Result<(Host, Backend), Box<dyn std::error::Error>> {
    let config_text = tokio::fs::read_to_string(&input.config).await?;
    let config = CardConfig::from_json(&config_text)?;
    let window = parse_window(&input.viewport)?;

    let backend = match &input.fixtures {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            Backend::Memory(Arc::new(MemorySource::from_json(&text)?))
        }
        None => Backend::Http(Arc::new(HttpSource::new(base_url)?.with_token(token))),
    };
    let source = backend.source();
    info!(
        source = source.name(),
        tracks = config.show_tracks,
        photos = config.show_photos,
        "engine configured"
    );
    Ok((Host::new(config, source, window), backend))
}

async fn load_states(path: &Path) -> Result<StateTable, Box<dyn std::error::Error>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(StateTable::from_json(&text)?)
}

fn print_output(out: &PassOutput) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(out)?);
    Ok(())
}

async fn watch(
    host: &mut Host,
    backend: &Backend,
    input: &PassArgs,
    interval_secs: u64,
    passes: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let interval = Duration::from_secs(interval_secs.max(1));
    let step_ms = EpochMs::try_from(interval.as_millis()).unwrap_or(EpochMs::MAX);
    let mut ticker = tokio::time::interval(interval);
    let mut clock = input.now_ms;
    let mut done = 0u64;
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut interrupted => {
                info!("interrupted");
                break;
            }
        }

        let table = match load_states(&input.states).await {
            Ok(table) => table,
            Err(e) => {
                error!(error = %e, path = %input.states.display(), "could not read state snapshot");
                continue;
            }
        };
        if let Err(e) = backend.reload(input.fixtures.as_deref()).await {
            error!(error = %e, "could not reload fixtures");
        }

        let now = clock.unwrap_or_else(now_ms);
        let out = tokio::select! {
            out = host.run_pass(&table, now) => out,
            _ = &mut interrupted => {
                info!("interrupted during pass");
                break;
            }
        };
        print_output(&out)?;
        clock = clock.map(|t| t.saturating_add(step_ms));

        done += 1;
        if passes.is_some_and(|limit| done >= limit) {
            break;
        }
    }

    let counters = host.engine().lock().metrics().snapshot().counters;
    info!(passes = done, ?counters, "watch finished");
    host.teardown();
    Ok(())
}
