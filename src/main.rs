use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kilter_connector::domain::settings::{Settings, SettingsService};
use kilter_connector::infrastructure::bluetooth::{
    BtleConfig, BtleTransport, ConnectionSession, SessionConfig,
};
use kilter_connector::infrastructure::catalog::{HoldCatalog, SqliteCatalog};
use kilter_connector::infrastructure::logging;
use kilter_connector::{HoldGrid, LightingConfig, LightingController, PeerDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "kilter-connector")]
#[command(about = "Light Kilter Board holds over Bluetooth LE")]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Hold catalog database, overrides the settings
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    /// Log level, overrides the settings (RUST_LOG still wins)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the hold grid and print its targets as JSON
    Grid,
    /// Light every bolt-on hold, one after another
    LightAll {
        /// Board address, defaults to the last one used
        #[arg(short, long)]
        device: Option<String>,
        /// Color as RRGGBB
        #[arg(short, long)]
        color: Option<String>,
        /// Pause between holds in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Light a single hold by grid coordinate
    Light {
        /// Board address, defaults to the last one used
        #[arg(short, long)]
        device: Option<String>,
        /// Column, 0-based
        #[arg(short)]
        x: i32,
        /// Row, 0-based
        #[arg(short)]
        y: i32,
        /// Color as RRGGBB
        #[arg(short, long)]
        color: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match &cli.config {
        Some(path) => SettingsService::at(path.clone()),
        None => SettingsService::new()?,
    };
    let settings = settings_service.get().clone();
    let _log_guard = logging::init_logger(&settings.log_settings, cli.log_level.as_deref())?;
    info!("Starting Kilter Connector");

    let catalog_path = cli
        .catalog
        .clone()
        .or_else(|| settings.catalog_path.clone())
        .context("No hold catalog configured (use --catalog or set catalog_path)")?;
    let grid = load_grid(&settings, &catalog_path)?;

    match cli.command {
        Commands::Grid => {
            println!("{}", serde_json::to_string_pretty(grid.all_targets())?);
        }
        Commands::LightAll {
            device,
            color,
            delay_ms,
        } => {
            let address = resolve_address(device, &settings)?;
            let color = color.unwrap_or_else(|| settings.default_color.clone());
            let delay = delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| settings.inter_frame_delay());

            let controller = connect(&settings, &address, delay).await?;
            if let Err(e) = settings_service.remember_peer(&address) {
                warn!("Failed to remember board address: {}", e);
            }

            let outcome = tokio::select! {
                report = controller.light_all(&grid, &color) => Some(report),
                _ = tokio::signal::ctrl_c() => None,
            };
            controller.session().close().await?;

            match outcome {
                Some(report) => {
                    let report = report?;
                    for failure in report.failures() {
                        if let Err(e) = &failure.result {
                            warn!("Placement {}: {}", failure.placement_id, e);
                        }
                    }
                    println!(
                        "Lit {} of {} holds{}",
                        report.sent(),
                        grid.len(),
                        if report.stopped_early {
                            " (link lost)"
                        } else {
                            ""
                        }
                    );
                }
                None => warn!("Interrupted"),
            }
        }
        Commands::Light {
            device,
            x,
            y,
            color,
        } => {
            let address = resolve_address(device, &settings)?;
            let color = color.unwrap_or_else(|| settings.default_color.clone());

            let controller = connect(&settings, &address, settings.inter_frame_delay()).await?;
            if let Err(e) = settings_service.remember_peer(&address) {
                warn!("Failed to remember board address: {}", e);
            }

            let result = controller.light_at(&grid, x, y, &color).await;
            controller.session().close().await?;
            let hold = result?;
            println!(
                "Lit ({}, {}): placement {} led {}",
                x, y, hold.placement_id, hold.led_position
            );
        }
    }

    Ok(())
}

fn load_grid(settings: &Settings, catalog_path: &Path) -> Result<HoldGrid> {
    let catalog = SqliteCatalog::open(catalog_path)
        .with_context(|| format!("Failed to open catalog {}", catalog_path.display()))?
        .with_layout(settings.layout_id, settings.product_id);
    let rows = catalog.hold_locations(settings.product_size_id)?;
    let grid = HoldGrid::build(rows, settings.grid_dimensions(), settings.grid_indexing)?;
    info!("Hold grid ready: {} targets", grid.len());
    Ok(grid)
}

fn resolve_address(device: Option<String>, settings: &Settings) -> Result<String> {
    device
        .or_else(|| settings.last_peer_address.clone())
        .context("No board address given and none remembered (use --device)")
}

fn session_config(settings: &Settings) -> Result<SessionConfig> {
    Ok(SessionConfig {
        service_uuid: Uuid::parse_str(&settings.ble_service_uuid)
            .context("Invalid ble_service_uuid")?,
        write_char_uuid: Uuid::parse_str(&settings.ble_write_char_uuid)
            .context("Invalid ble_write_char_uuid")?,
        connect_timeout: settings.connect_timeout(),
    })
}

async fn connect(
    settings: &Settings,
    address: &str,
    inter_frame_delay: Duration,
) -> Result<LightingController> {
    let config = session_config(settings)?;
    let lighting = LightingConfig {
        inter_frame_delay,
        chunk_size: settings.chunk_size,
    };
    // Fail before a link exists
    lighting.validate()?;

    let transport = BtleTransport::new(BtleConfig {
        scan_duration: settings.scan_duration(),
        service_filter: config.service_uuid,
    })
    .await?;

    let session = ConnectionSession::new(Arc::new(transport), config);
    session.open(PeerDescriptor::new(address)).await?;
    if let Err(e) = session.wait_until_ready().await {
        let _ = session.close().await;
        return Err(e.into());
    }

    Ok(LightingController::new(session, lighting)?)
}
