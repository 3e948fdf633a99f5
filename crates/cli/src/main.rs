//! CLI for tilechain - render vector tiles from GeoJSON
//!
//! This is a thin wrapper around the tilechain-core library.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tilechain_core::{
    Crs, GeoJsonBuilderFactory, LayerStyle, MapContent, MapLayer, MemoryFeatureSource,
    MetatileLayout, MvtBuilderFactory, PipelineConfig, TileBuilderFactory, TileCoord, TileOutput,
    VectorTileRenderer,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Mvt,
    Geojson,
}

impl Format {
    fn factory(self) -> Arc<dyn TileBuilderFactory> {
        match self {
            Format::Mvt => Arc::new(MvtBuilderFactory),
            Format::Geojson => Arc::new(GeoJsonBuilderFactory),
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Format::Mvt => "pbf",
            Format::Geojson => "geojson",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tilechain",
    about = "Render vector tiles or metatiles from a GeoJSON file",
    version
)]
struct Args {
    /// Input GeoJSON file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Tile to render, as z/x/y
    #[arg(long, value_name = "Z/X/Y")]
    tile: String,

    /// Output directory; tiles are written to <OUTPUT>/<z>/<x>/<y>.<ext>
    #[arg(short, long, default_value = "tiles")]
    output: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "mvt")]
    format: Format,

    /// CRS of the input coordinates
    #[arg(long, default_value = "EPSG:4326")]
    crs: String,

    /// Layer name
    #[arg(long, default_value = "features")]
    layer: String,

    /// Render an NxN metatile containing the tile
    #[arg(long, value_name = "N")]
    metatile: Option<u32>,

    /// Tile size in pixels
    #[arg(long, default_value = "256")]
    tile_size: u32,

    /// Buffer around each tile, in pixels
    #[arg(long)]
    buffer: Option<f64>,

    /// Comma-separated attribute allow-list
    #[arg(long, value_delimiter = ',')]
    attributes: Option<Vec<String>>,

    /// Emit a label layer with these comma-separated attributes
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Pipeline configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Memory cap per metatile in bytes, overrides the config file
    #[arg(long)]
    max_memory: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_tile(value: &str) -> Result<TileCoord> {
    let parts: Vec<&str> = value.split('/').collect();
    let [z, x, y] = parts.as_slice() else {
        anyhow::bail!("Invalid tile {}, expected z/x/y", value);
    };
    let z: u8 = z.parse().with_context(|| format!("Invalid zoom in {}", value))?;
    let x: u32 = x.parse().with_context(|| format!("Invalid column in {}", value))?;
    let y: u32 = y.parse().with_context(|| format!("Invalid row in {}", value))?;
    Ok(TileCoord::checked(x, y, z)?)
}

fn write_tile(output: &Path, tile: TileCoord, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
    let dir = output.join(tile.z.to_string()).join(tile.x.to_string());
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.{}", tile.y, extension));
    std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(bytes) = args.max_memory {
        config = config.with_max_metatile_memory(bytes);
    }

    let crs = Crs::from_code(&args.crs)
        .with_context(|| format!("Unknown CRS {}", args.crs))?;
    let tile = parse_tile(&args.tile)?;

    let geojson = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let source = MemoryFeatureSource::from_geojson_str(&geojson, crs)
        .context("Failed to parse GeoJSON input")?;
    log::info!("Loaded {} features from {}", source.len(), args.input.display());

    let mut style = LayerStyle {
        buffer: args.buffer,
        attributes: args.attributes.clone(),
        ..Default::default()
    };
    if let Some(labels) = &args.labels {
        style = style.with_label_layer(labels.iter().cloned());
    }
    let layer = MapLayer::new(args.layer.clone(), Arc::new(source)).with_style(style);

    let renderer = VectorTileRenderer::new(args.format.factory(), config);
    let extension = args.format.extension();

    match args.metatile {
        Some(size) => {
            let layout = MetatileLayout::square(size)?;
            let origin = layout.origin_of(tile);
            let content =
                MapContent::for_metatile(origin, layout, args.tile_size).with_layer(layer);
            let output = renderer
                .render_metatile(&content, layout)
                .with_context(|| format!("Failed to render metatile at {}", origin))?;
            if let TileOutput::Metatile(tiles) = output {
                for ((dx, dy), encoded) in tiles.iter() {
                    let coord = layout.tile_at(origin, dx, dy);
                    let path = write_tile(&args.output, coord, extension, &encoded.bytes)?;
                    log::debug!("Wrote {} ({} bytes)", path.display(), encoded.len());
                }
                println!(
                    "✓ Rendered {}x{} metatile at {} into {}",
                    size,
                    size,
                    origin,
                    args.output.display()
                );
            }
        }
        None => {
            let content = MapContent::for_tile(tile, args.tile_size).with_layer(layer);
            let output = renderer
                .render_tile(&content)
                .with_context(|| format!("Failed to render tile {}", tile))?;
            if let TileOutput::Single(encoded) = output {
                let path = write_tile(&args.output, tile, extension, &encoded.bytes)?;
                println!("✓ Rendered {} to {} ({} bytes)", tile, path.display(), encoded.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tile() {
        assert_eq!(parse_tile("3/4/2").unwrap(), TileCoord::new(4, 2, 3));
        assert!(parse_tile("3/4").is_err());
        assert!(parse_tile("1/2/0").is_err());
        assert!(parse_tile("a/b/c").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "tilechain",
            "in.geojson",
            "--tile",
            "2/1/1",
            "--format",
            "geojson",
            "--attributes",
            "name,kind",
            "--metatile",
            "2",
        ])
        .unwrap();
        assert!(matches!(args.format, Format::Geojson));
        assert_eq!(
            args.attributes,
            Some(vec!["name".to_string(), "kind".to_string()])
        );
        assert_eq!(args.metatile, Some(2));
    }
}
