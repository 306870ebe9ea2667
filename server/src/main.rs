use clap::Parser;
use log::{info, warn};
use server::network::Server;
use server::preset::PresetRegistry;
use server::settings::{JsonSettingsFile, SettingsHandle};
use server::world::WorldIndex;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about = "Infection tag round server", long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of connected clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "30")]
    client_timeout: u64,

    /// Game settings file, created with defaults if missing
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// Preset definitions
    #[arg(long, default_value = "presets.json")]
    presets: PathBuf,

    /// Area and transition index
    #[arg(long, default_value = "world.json")]
    world: PathBuf,

    /// How often to check the preset file for changes, in milliseconds
    #[arg(long, default_value = "2000")]
    watch_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let settings = SettingsHandle::load(Box::new(JsonSettingsFile::new(&args.settings)));
    let presets = PresetRegistry::from_path(&args.presets);
    if presets.is_empty() {
        warn!("No presets loaded, automatic rounds will run without a warp");
    }
    let watcher = presets.watch(Duration::from_millis(args.watch_interval));
    let world = WorldIndex::load_or_empty(&args.world);

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(
        &address,
        args.max_clients,
        Duration::from_secs(args.client_timeout),
        settings,
        presets,
        Box::new(world),
    )
    .await?;

    server.spawn_console_reader();
    info!("Type `help` for operator commands");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    if let Some(watcher) = watcher {
        watcher.abort();
    }
    Ok(())
}
