//! Rasterizing cache - a map tile server that re-renders evicted tiles.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rasterizing_cache::{
    cache::{ensure_dir, TierConfig, TwoTierCache},
    config::{CheckConfig, Cli, Command, RebuildBackend, ServeConfig, UrlConfig},
    rasterizing::{RasterizingService, StyledTileRenderer},
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Url(config) => run_url(config),
        Command::Check(config) => run_check(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let layers = match config.load_layers() {
        Ok(layers) => layers,
        Err(e) => {
            error!("Failed to load layers: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let url_builder = match config.url_builder() {
        Ok(builder) => builder,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let image_tier = config.image_tier();
    let rebuild_tier = config.rebuild_tier();

    info!("rasterizing-cache v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Layers: {}", layers.ids().join(", "));
    log_tier("Image cache", &image_tier);
    log_tier("Rebuild cache", &rebuild_tier);
    if config.rebuild_backend == RebuildBackend::Memory {
        warn!("  Rebuild records are kept in memory and lost on restart");
    }
    info!(
        "  Single flight: {}",
        if config.single_flight { "on" } else { "off" }
    );
    info!("  Tile URLs: {}", url_builder.base_urls().join(", "));

    let cache = TwoTierCache::from_config(&image_tier, &rebuild_tier);
    let service = RasterizingService::new(cache, StyledTileRenderer::new(), layers)
        .with_single_flight(config.single_flight);

    let router = create_router(service, url_builder, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/stats", addr);
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn log_tier(name: &str, tier: &TierConfig) {
    match tier {
        TierConfig::Memory(memory) => info!(
            "  {}: memory, {:?}, {} entries, {}MB, retention {:?}",
            name,
            memory.policy,
            memory.max_entries,
            memory.max_bytes / (1024 * 1024),
            tier.retention()
        ),
        TierConfig::Disk(disk) => info!(
            "  {}: disk at {}, retention {:?}",
            name,
            disk.dir,
            tier.retention()
        ),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "rasterizing_cache=debug,tower_http=debug"
    } else {
        "rasterizing_cache=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Url Command
// =============================================================================

fn run_url(config: UrlConfig) -> ExitCode {
    let builder = match config.url_builder() {
        Ok(builder) => builder,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for _ in 0..config.count {
        println!("{}", builder.build_url(config.level, config.x, config.y));
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Check Command
// =============================================================================

fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("Rasterizing Cache Configuration Check");
    println!("═════════════════════════════════════");
    println!();

    let mut ok = true;

    match config.load_layers() {
        Ok(layers) => {
            println!("✓ Layers: {} configured", layers.len());
            for id in layers.ids() {
                if let Some(layer) = layers.get(id) {
                    let extent = &layer.max_extent;
                    println!(
                        "    {} ({}) [{}, {}, {}, {}]",
                        id, layer.crs, extent.min_x, extent.min_y, extent.max_x, extent.max_y
                    );
                }
            }
        }
        Err(e) => {
            println!("✗ Layers: {}", e);
            ok = false;
        }
    }

    let dir = config.resolved_rebuild_dir();
    match ensure_dir(&dir) {
        Ok(()) => println!("✓ Rebuild directory: {}", dir.display()),
        Err(e) => {
            println!("✗ Rebuild directory: {}", e);
            ok = false;
        }
    }

    println!();
    if ok {
        println!("All checks passed.");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
