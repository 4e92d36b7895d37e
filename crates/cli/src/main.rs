//! CLI for tilecraft - slice GeoJSON, cluster points and aggregate temporal grids
//!
//! This is a thin wrapper around the tilecraft-core library. Every command prints a
//! GeoJSON FeatureCollection to stdout.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use geojson::FeatureCollection;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use tilecraft_core::{pipeline, AggregationOptions, ClusterOptions, TileCoord, TilerOptions};

#[derive(Parser, Debug)]
#[command(
    name = "tilecraft",
    about = "Tile GeoJSON, cluster points and aggregate temporal grids",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cut one tile out of a GeoJSON file
    Tile {
        /// Input GeoJSON file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[command(flatten)]
        tile: TileArgs,

        /// JSON file with tiler options (camelCase keys)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Layer name for the output tile
        #[arg(long, default_value = "layer")]
        layer: String,
    },

    /// Cluster GeoJSON points and print a tile or a bbox query
    Cluster {
        /// Input GeoJSON file with point features
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Tile to render, as z/x/y
        #[arg(long, conflicts_with_all = ["bbox", "zoom"])]
        tile: Option<String>,

        /// Bounding box west,south,east,north
        #[arg(long, requires = "zoom", allow_hyphen_values = true)]
        bbox: Option<String>,

        /// Zoom level for --bbox
        #[arg(long)]
        zoom: Option<u8>,

        /// JSON file with cluster options (camelCase keys)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Aggregate a temporal-grid tile
    Aggregate {
        /// Protobuf tile payload
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[command(flatten)]
        tile: TileArgs,

        /// JSON file with aggregation options (camelCase keys)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the interactive collection instead of the main one
        #[arg(long)]
        interactive: bool,
    },
}

#[derive(Args, Debug)]
struct TileArgs {
    /// Zoom level
    #[arg(long)]
    z: u8,

    /// Tile column
    #[arg(long)]
    x: u32,

    /// Tile row
    #[arg(long)]
    y: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let collection = match cli.command {
        Command::Tile {
            input,
            tile,
            config,
            layer,
        } => {
            let options: TilerOptions = load_config(config.as_deref())?;
            let text = read_text(&input)?;
            let mut index = pipeline::load_geojson(&text, options)
                .with_context(|| format!("Failed to index {}", input.display()))?;
            log::info!("indexed {} tiles", index.tile_count());

            pipeline::tile_to_geojson(&mut index, tile.z, tile.x, tile.y, &layer)
        }

        Command::Cluster {
            input,
            tile,
            bbox,
            zoom,
            config,
        } => {
            let options: ClusterOptions = load_config(config.as_deref())?;
            let text = read_text(&input)?;
            let index = pipeline::load_points(&text, options)
                .with_context(|| format!("Failed to cluster {}", input.display()))?;

            match (tile, bbox, zoom) {
                (Some(tile), _, _) => {
                    let coord = parse_tile(&tile)?;
                    pipeline::cluster_tile_to_geojson(&index, coord.z, coord.x, coord.y, "clusters")
                }
                (None, Some(bbox), Some(zoom)) => {
                    let bbox = parse_bbox(&bbox)?;
                    Some(FeatureCollection {
                        bbox: None,
                        features: index.get_clusters(bbox, zoom),
                        foreign_members: None,
                    })
                }
                _ => bail!("Either --tile or --bbox with --zoom is required"),
            }
        }

        Command::Aggregate {
            input,
            tile,
            config,
            interactive,
        } => {
            let mut options: AggregationOptions = load_config(config.as_deref())?;
            options = options
                .with_tile(TileCoord::new(tile.x, tile.y, tile.z))
                .with_interactive(interactive);

            let bytes = fs::read(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let aggregated = pipeline::parse_temporal_grid(&bytes, &options)
                .context("Failed to aggregate temporal grid")?;

            if interactive {
                aggregated.interactive
            } else {
                Some(aggregated.main)
            }
        }
    };

    let collection = collection.unwrap_or_else(|| {
        log::info!("no features");
        FeatureCollection {
            bbox: None,
            features: Vec::new(),
            foreign_members: None,
        }
    });

    println!("{}", serde_json::to_string(&collection)?);
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config in {}", path.display()))
}

fn parse_tile(s: &str) -> Result<TileCoord> {
    let parts: Vec<&str> = s.split('/').collect();
    let [z, x, y] = parts[..] else {
        bail!("Invalid tile {:?}, expected z/x/y", s);
    };
    Ok(TileCoord::new(
        x.parse().context("Invalid tile column")?,
        y.parse().context("Invalid tile row")?,
        z.parse().context("Invalid zoom")?,
    ))
}

fn parse_bbox(s: &str) -> Result<[f64; 4]> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid bbox {:?}", s))?;
    let [west, south, east, north] = values[..] else {
        bail!("Invalid bbox {:?}, expected west,south,east,north", s);
    };
    Ok([west, south, east, north])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tile() {
        assert_eq!(parse_tile("3/4/5").unwrap(), TileCoord::new(4, 5, 3));
        assert!(parse_tile("3/4").is_err());
        assert!(parse_tile("a/4/5").is_err());
    }

    #[test]
    fn test_parse_bbox() {
        assert_eq!(
            parse_bbox("-10, -5,10,5").unwrap(),
            [-10.0, -5.0, 10.0, 5.0]
        );
        assert!(parse_bbox("1,2,3").is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
