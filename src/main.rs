//! Pyramid Viewer - inspect and render deep-zoom tile pyramids.
//!
//! This binary opens a pyramid from a local path, an HTTP URL or S3 and
//! either describes it or renders a view of it headlessly.

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use pyramid_viewer::{
    config::{Cli, Command, InspectArgs, RenderArgs, SourceArgs, TilesArgs, ViewArgs},
    create_s3_client,
    format::zif::TableSource,
    view::{normalize_api_zoom, ViewPose},
    FileConnector, FormatAdapter, HttpConnector, NetConnector, PyramidDescriptor, RasterSurface,
    S3Connector, ViewerConfig, ViewerSession,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Inspect(args) => run_inspect(args).await,
        Command::Tiles(args) => run_tiles(args).await,
        Command::Render(args) => run_render(args).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pyramid_viewer=debug"
    } else {
        "pyramid_viewer=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Sources
// =============================================================================

/// Where a source argument points.
#[derive(Debug, PartialEq, Eq)]
enum SourceLocation {
    Http(String),
    S3 { bucket: String, key: String },
    /// Local path; `file://` URLs are converted to paths
    File(String),
}

fn locate_source(source: &str) -> Result<SourceLocation, String> {
    match Url::parse(source) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            Ok(SourceLocation::Http(source.to_string()))
        }
        Ok(url) if url.scheme() == "s3" => {
            let (bucket, key) = pyramid_viewer::parse_s3_uri(source)
                .ok_or_else(|| format!("invalid S3 URI '{}', expected s3://bucket/key", source))?;
            Ok(SourceLocation::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| format!("'{}' is not a local file URL", source))?;
            path.to_str()
                .map(|p| SourceLocation::File(p.to_string()))
                .ok_or_else(|| format!("'{}' is not a valid UTF-8 path", path.display()))
        }
        Ok(url) if url.scheme().len() > 1 => {
            Err(format!("unsupported source scheme '{}'", url.scheme()))
        }
        // Plain paths, including Windows drive letters
        _ => Ok(SourceLocation::File(source.to_string())),
    }
}

/// Connector for a source and the path to open through it.
async fn open_source(
    args: &SourceArgs,
    config: &ViewerConfig,
) -> Result<(Arc<dyn NetConnector>, String), String> {
    match locate_source(&args.source)? {
        SourceLocation::Http(url) => {
            let connector = HttpConnector::new(config.load_timeout).map_err(|e| e.to_string())?;
            Ok((Arc::new(connector), url))
        }
        SourceLocation::S3 { bucket, key } => {
            info!("S3 bucket: {}", bucket);
            if let Some(ref endpoint) = args.s3_endpoint {
                info!("S3 endpoint: {}", endpoint);
            }
            let client = create_s3_client(args.s3_endpoint.as_deref(), &args.s3_region).await;
            Ok((Arc::new(S3Connector::new(client, bucket)), key))
        }
        SourceLocation::File(path) => Ok((Arc::new(FileConnector::new(".")), path)),
    }
}

fn load_config(tuning: &pyramid_viewer::config::TuningArgs) -> Result<ViewerConfig, ExitCode> {
    let config = tuning.to_config();
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return Err(ExitCode::FAILURE);
    }
    Ok(config)
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(args: InspectArgs) -> ExitCode {
    let config = match load_config(&args.tuning) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let (connector, path) = match open_source(&args.source, &config).await {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut adapter = FormatAdapter::new(&path, args.source.format);
    let desc = match adapter.parse_header(connector.as_ref(), &config.format).await {
        Ok(desc) => desc,
        Err(e) => {
            error!("Cannot open {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    print_pyramid(&adapter, &desc);
    ExitCode::SUCCESS
}

fn print_pyramid(adapter: &FormatAdapter, desc: &PyramidDescriptor) {
    println!("Source:  {}", adapter.format_path());
    println!("Format:  {}", adapter.format());
    println!("Size:    {} x {}", desc.image_width(), desc.image_height());
    println!("Tile:    {} x {}", desc.tile_width(), desc.tile_height());
    println!("Tiles:   {}", desc.total_tile_count());
    println!();
    println!("{:>4}  {:>8} {:>8}  {:>6} {:>6}  {:>8}  tables", "tier", "width", "height", "cols", "rows", "tiles");

    for (i, tier) in desc.tiers().iter().enumerate() {
        let tables = match adapter {
            FormatAdapter::PackedA(zif) => zif
                .tier_tables()
                .get(i)
                .map(|t| format!("offsets {}, counts {}", describe_table(&t.offsets), describe_table(&t.byte_counts)))
                .unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "{:>4}  {:>8} {:>8}  {:>6} {:>6}  {:>8}  {}",
            i, tier.width, tier.height, tier.tiles_x, tier.tiles_y, tier.tile_count, tables
        );
    }

    if let FormatAdapter::PackedB(pff) = adapter {
        if let Some(index) = pff.index_table() {
            println!();
            println!(
                "Tile index: {} records at byte {}, {} chunks of {}",
                index.records,
                index.start,
                index.chunk_count(),
                index.chunk_size
            );
        }
        if let Some(headers) = pff.jpeg_headers() {
            println!("JPEG headers: {}", headers.len());
        }
    }
}

fn describe_table(source: &TableSource) -> String {
    match source {
        TableSource::Inline(values) => format!("inline({})", values.len()),
        TableSource::Chunked(table) => format!(
            "{}x{}B in {} chunks",
            table.records,
            table.record_size,
            table.chunk_count()
        ),
    }
}

// =============================================================================
// Tiles Command
// =============================================================================

async fn run_tiles(args: TilesArgs) -> ExitCode {
    let config = match load_config(&args.tuning) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let session = match open_session(&args.source, &args.view, config).await {
        Ok(s) => s,
        Err(code) => return code,
    };

    let view = session.view().clone();
    println!(
        "View:      center ({:.1}, {:.1}), zoom {:.4}, rotation {}",
        view.x, view.y, view.zoom, view.rotation
    );
    println!("Zoom range: {:.4} - {:.4}", view.min_zoom, view.max_zoom);
    println!(
        "Frontfill: tier {} (scale {:.3})",
        view.tier_current, view.tier_scale
    );
    println!(
        "Backfill:  tier {}{}",
        view.tier_backfill,
        if view.backfill_dynamic { " (dynamic)" } else { "" }
    );

    if let Some(plan) = session.draw_plan().copied() {
        for (layer, layer_plan) in plan.layers() {
            let b = layer_plan.bounds;
            println!();
            println!(
                "{:?}: tier {}, cols {}..={}, rows {}..={} ({} tiles)",
                layer,
                layer_plan.tier,
                b.left,
                b.right,
                b.top,
                b.bottom,
                b.count()
            );
            let names: Vec<String> = layer_plan.ids().map(|id| id.name()).collect();
            println!("  {}", names.join(" "));
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(args: RenderArgs) -> ExitCode {
    let config = match load_config(&args.tuning) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let mut session = match open_session(&args.source, &args.view, config).await {
        Ok(s) => s,
        Err(code) => return code,
    };

    let settled = session
        .run_until_settled(Duration::from_secs(args.wait))
        .await;
    if !settled {
        warn!(
            "Tiles still loading after {}s; writing what has arrived",
            args.wait
        );
    }
    if session.scheduler().failed_count() > 0 {
        warn!("{} tiles could not be loaded", session.scheduler().failed_count());
    }

    if let Err(e) = session.surface().save_png(Path::new(&args.out)) {
        error!("Failed to write {}: {}", args.out.display(), e);
        return ExitCode::FAILURE;
    }
    info!(
        "Wrote {} ({}x{}, zoom {:.4}, tier {})",
        args.out.display(),
        args.view.width,
        args.view.height,
        session.get_zoom(),
        session.view().tier_current
    );
    ExitCode::SUCCESS
}

/// Open a session on `source` and move it to the requested view.
async fn open_session(
    source: &SourceArgs,
    view: &ViewArgs,
    config: ViewerConfig,
) -> Result<ViewerSession<RasterSurface>, ExitCode> {
    let (connector, path) = match open_source(source, &config).await {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    let surface = RasterSurface::new(view.width, view.height);
    let mut session = match ViewerSession::new(config, connector, surface, view.width, view.height) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if let Err(e) = session.set_image(&path, source.format).await {
        error!("Cannot open {}: {}", path, e);
        return Err(ExitCode::FAILURE);
    }

    let center = session.get_coordinates();
    let pose = ViewPose::new(
        view.x.unwrap_or(center.x),
        view.y.unwrap_or(center.y),
        view.zoom.map(normalize_api_zoom).unwrap_or(session.get_zoom()),
        view.rotation,
    );
    session.set_view_pose(pose, false);
    Ok(session)
}
