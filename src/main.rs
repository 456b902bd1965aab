mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ManifestFormat};
use vs_core::config::Config;
use vs_server::context::AppContext;
use vs_server::media::{self, ClientCapabilities};
use vs_server::request::ManifestKind;
use vs_storage::Resolver;
use vs_transcode::ToolRegistry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise pick defaults from --verbose.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vodserve=trace,vs_server=trace,vs_transcode=trace,vs_storage=debug,vs_media=debug,tower_http=debug"
                .to_string()
        } else {
            "vodserve=info,vs_server=info,vs_transcode=info,vs_storage=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let config = Config::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(vs_server::start(config))?;
            Ok(())
        }
        Commands::Probe { locator, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe(config, &locator, json))
        }
        Commands::Manifest {
            locator,
            format,
            transmux,
            playable_codecs,
        } => {
            let kind = match (format, transmux, playable_codecs.is_empty()) {
                (ManifestFormat::Dash, _, false) => {
                    anyhow::bail!("--playable-codecs only applies to HLS manifests")
                }
                (ManifestFormat::Dash, false, true) => ManifestKind::DashTranscoding,
                (ManifestFormat::Dash, true, true) => ManifestKind::DashTransmuxing,
                (ManifestFormat::Hls, _, false) => ManifestKind::HlsAdaptive,
                (ManifestFormat::Hls, false, true) => ManifestKind::HlsTranscoding,
                (ManifestFormat::Hls, true, true) => ManifestKind::HlsTransmuxing,
            };
            let capabilities = ClientCapabilities::new(playable_codecs);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(manifest(config, &locator, kind, &capabilities))
        }
        Commands::Ls { locator } => list(&config, &locator),
        Commands::CheckTools => check_tools(&config),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vodserve {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn probe(config: Config, locator: &str, json: bool) -> Result<()> {
    let ctx = AppContext::from_config(config);
    let source = media::open_source(&ctx, locator)
        .await
        .with_context(|| format!("failed to probe {locator}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(source.streams.as_ref())?);
        return Ok(());
    }

    println!("Source: {}", source.locator);
    let secs = source.duration().as_secs();
    println!(
        "Duration: {:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    );
    println!("\nStreams: {}", source.streams.len());
    for stream in source.streams.iter() {
        print!(
            "  [{}] {} {}",
            stream.key.stream_index, stream.kind, stream.codec_name
        );
        if !stream.codecs.is_empty() {
            print!(" ({})", stream.codecs);
        }
        if stream.width > 0 {
            print!(" {}x{}", stream.width, stream.height);
        }
        if stream.bit_rate > 0 {
            print!(" {} kb/s", stream.bit_rate / 1000);
        }
        if !stream.language.is_empty() {
            print!(" {}", stream.language);
        }
        if !stream.title.is_empty() {
            print!(" \"{}\"", stream.title);
        }
        if stream.enabled_by_default {
            print!(" [default]");
        }
        println!();
    }

    Ok(())
}

async fn manifest(
    config: Config,
    locator: &str,
    kind: ManifestKind,
    capabilities: &ClientCapabilities,
) -> Result<()> {
    let ctx = AppContext::from_config(config);
    let body = media::render_manifest(&ctx, locator, kind, capabilities)
        .await
        .with_context(|| format!("failed to build manifest for {locator}"))?;
    print!("{body}");
    Ok(())
}

fn list(config: &Config, locator: &str) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools);
    let resolver = Resolver::from_config(&config.storage, tools.get("rclone").map(Path::to_path_buf));
    let node = resolver
        .resolve(locator)
        .with_context(|| format!("cannot resolve {locator}"))?;

    let mut files = 0usize;
    let mut broken = 0usize;
    node.walk(|entry| {
        match entry {
            Ok(node) => {
                files += 1;
                println!("{}\t{}", node.size(), node.locator());
            }
            Err(e) => {
                broken += 1;
                eprintln!("skipped: {e}");
            }
        }
        Ok(())
    })?;

    tracing::info!(files, broken, "Walk complete");
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in tools.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("cannot read {}", p.display()))?;
            let config = Config::parse(p, &contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Loopback URL: {}", config.server.loopback_url());
    println!("  Scratch dir: {}", config.streaming.scratch_dir.display());
    println!(
        "  Segments: {} ms (transmux min {} ms), timeout {} s",
        config.streaming.segment_duration_ms,
        config.streaming.transmux_min_segment_ms,
        config.streaming.segment_timeout_secs
    );
    println!("  Default storage backend: {}", config.storage.default_backend);
    for warning in config.validate() {
        println!("  warning: {warning}");
    }

    Ok(())
}
