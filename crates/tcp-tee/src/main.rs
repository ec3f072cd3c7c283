//! tcp-tee: TCP connection duplicator. Every accepted client stream is copied
//! to a primary plus either a best-effort shadow or a second primary, and only
//! the authoritative primary's response goes back to the client.

mod config;
mod mapping;
mod mode;
mod proxy;
mod server;

use config::{CliOverrides, TeeConfig};

/// Exit status when no mappings are configured.
const EXIT_MISSING_MAPS: i32 = 2;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        // Fall back to positional arg
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("TCP_TEE_CONFIG").ok())
        .unwrap_or_else(|| "tcp-tee.toml".to_string());

    // Load configuration, then apply CLI overrides (highest priority)
    let mut config = TeeConfig::load(&config_path)?;
    config.apply_overrides(&CliOverrides::from_args(&args))?;

    if config.server.maps.trim().is_empty() {
        eprintln!("Missing --maps");
        std::process::exit(EXIT_MISSING_MAPS);
    }

    let rules = mapping::parse_mappings(
        &config.server.maps,
        config.server.mode,
        &config.timeouts.destination_timeouts(),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        tee_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            mode = %config.server.mode,
            maps = %mapping::format_mappings(&rules),
            shadow_dial_ms = config.timeouts.shadow_dial_ms,
            shadow_write_ms = config.timeouts.shadow_write_ms,
            primary2_dial_ms = config.timeouts.primary2_dial_ms,
            "Starting tcp-tee"
        );

        server::run(rules).await
    })
}
