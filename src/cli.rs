//! CLI commands for butterfly-reach

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;

use butterfly_reach::config::{EngineConfig, MatrixAlgorithm, MismatchPolicy};
use butterfly_reach::engine::{RouteOptions, RoutingEngine};
use butterfly_reach::graph::io::GraphFile;
use butterfly_reach::graph::{features, Coordinate};
use butterfly_reach::isochrone::{IsochroneParams, RangeType, Units};
use butterfly_reach::matrix::Metric;
use butterfly_reach::weighting::{self, Profile};

#[derive(Parser)]
#[command(name = "butterfly-reach")]
#[command(about = "Core-contracted routing, isochrones and matrices over road graphs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Graph, profile and configuration shared by every command
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Graph file (JSON)
    #[arg(short, long)]
    pub graph: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// car, hgv, bike, foot (ORS names accepted)
    #[arg(short, long, default_value = "car")]
    pub profile: String,

    /// fastest, recommended or shortest
    #[arg(short, long, default_value = "fastest")]
    pub weighting: String,

    /// Override routing.max_visited_nodes
    #[arg(long)]
    pub max_visited: Option<usize>,

    /// Override routing.snap_radius (metres)
    #[arg(long)]
    pub snap_radius: Option<f64>,

    /// Override routing.mismatch_policy
    #[arg(long, value_enum)]
    pub mismatch: Option<MismatchArg>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Features to avoid, e.g. "ferries,tollways"
    #[arg(long)]
    pub avoid: Option<String>,

    /// Country ids whose borders must not be crossed, e.g. "56,276"
    #[arg(long, value_delimiter = ',')]
    pub avoid_countries: Vec<u16>,

    /// Never cross a border
    #[arg(long)]
    pub avoid_borders: bool,

    /// Vehicle height in metres
    #[arg(long)]
    pub height: Option<f64>,

    /// Vehicle weight in tonnes
    #[arg(long)]
    pub weight: Option<f64>,

    /// Local departure time, "YYYY-MM-DDTHH:MM"
    #[arg(long)]
    pub departure: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum MismatchArg {
    Fallback,
    Reject,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum AlgorithmArg {
    Auto,
    Core,
    Dijkstra,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Prepare the core and landmarks and report statistics
    Prepare {
        #[command(flatten)]
        engine: EngineArgs,

        /// Write the statistics as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Shortest path between two coordinates
    Route {
        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        filters: FilterArgs,

        /// Start coordinate (lat,lon)
        #[arg(long)]
        from: String,

        /// End coordinate (lat,lon)
        #[arg(long)]
        to: String,
    },

    /// Isochrone polygons as a GeoJSON feature collection
    Isochrone {
        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        filters: FilterArgs,

        /// Origin coordinate (lat,lon), repeatable
        #[arg(short, long, required = true)]
        location: Vec<String>,

        /// Range in seconds (time) or units (distance), repeatable
        #[arg(short, long, required = true)]
        range: Vec<f64>,

        #[arg(long, default_value = "time")]
        range_type: String,

        /// Split the single range into steps
        #[arg(long)]
        interval: Option<f64>,

        /// m, km or mi
        #[arg(long, default_value = "m")]
        units: String,

        #[arg(long)]
        area_units: Option<String>,

        /// Comma separated: area, reachfactor
        #[arg(long, default_value = "")]
        attributes: String,

        /// 0 to 100
        #[arg(long)]
        smoothing: Option<f64>,

        #[arg(long)]
        intersections: bool,

        /// Measure travel towards the locations
        #[arg(long)]
        reverse: bool,

        /// Write the feature collection here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Many-to-many duration / distance table
    Matrix {
        #[command(flatten)]
        engine: EngineArgs,

        #[command(flatten)]
        filters: FilterArgs,

        /// "lat,lon;lat,lon;..."
        #[arg(long)]
        sources: String,

        /// Defaults to the sources
        #[arg(long)]
        destinations: Option<String>,

        /// Comma separated: duration, distance, weight
        #[arg(long, default_value = "duration")]
        metrics: String,

        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,
    },
}

fn parse_coord(s: &str) -> Result<Coordinate> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        bail!("Coordinate must be in format 'lat,lon', got '{}'", s);
    }
    let lat = parts[0].trim().parse::<f64>()?;
    let lon = parts[1].trim().parse::<f64>()?;
    let coord = Coordinate::new(lat, lon);
    if !coord.is_valid() {
        bail!("Coordinate '{}' is out of range", s);
    }
    Ok(coord)
}

fn parse_coords(s: &str) -> Result<Vec<Coordinate>> {
    s.split(';').filter(|p| !p.trim().is_empty()).map(parse_coord).collect()
}

fn parse_units(s: &str) -> Result<Units> {
    Units::from_name(s).ok_or_else(|| anyhow!("Unknown unit '{}'", s))
}

impl FilterArgs {
    fn options(&self) -> Result<RouteOptions> {
        let avoid_features = match &self.avoid {
            Some(list) => features::parse_list(list)
                .ok_or_else(|| anyhow!("Unknown feature in '{}'", list))?,
            None => 0,
        };
        let departure = self
            .departure
            .as_deref()
            .map(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
            .transpose()
            .context("Departure must look like 2024-03-04T08:30")?;

        Ok(RouteOptions {
            avoid_features,
            avoid_countries: self.avoid_countries.iter().copied().collect(),
            avoid_borders: self.avoid_borders,
            vehicle_height: self.height,
            vehicle_weight: self.weight,
            departure,
        })
    }
}

impl EngineArgs {
    fn config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(n) = self.max_visited {
            config.routing.max_visited_nodes = n;
        }
        if let Some(r) = self.snap_radius {
            config.routing.snap_radius = r;
        }
        if let Some(m) = self.mismatch {
            config.routing.mismatch_policy = match m {
                MismatchArg::Fallback => MismatchPolicy::Fallback,
                MismatchArg::Reject => MismatchPolicy::Reject,
            };
        }
        Ok(config)
    }

    fn build(&self, config: EngineConfig) -> Result<RoutingEngine> {
        let profile = Profile::from_name(&self.profile).ok_or_else(|| {
            let known: Vec<&str> = Profile::all().iter().map(Profile::name).collect();
            anyhow!("Unknown profile '{}' (expected one of {})", self.profile, known.join(", "))
        })?;
        let weighting = weighting::by_name(&self.weighting, profile)
            .ok_or_else(|| anyhow!("Unknown weighting '{}'", self.weighting))?;

        let start = Instant::now();
        let graph = GraphFile::read(&self.graph)
            .with_context(|| format!("Failed to read graph {}", self.graph.display()))?;
        tracing::info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            took_ms = start.elapsed().as_millis() as u64,
            "graph loaded"
        );

        RoutingEngine::build(graph, weighting, config).context("Failed to prepare engine")
    }
}

fn write_json(value: &serde_json::Value, output: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "output written");
        }
        None => println!("{}", text),
    }
    Ok(())
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Prepare { engine, output } => {
                let engine = engine.build(engine.config()?)?;
                let cg = engine.contracted();
                let stats = cg.stats();
                let sets: Vec<_> = engine
                    .landmarks()
                    .sets()
                    .iter()
                    .map(|s| json!({ "restrictions": s.restrictions(), "landmarks": s.landmarks() }))
                    .collect();
                let report = json!({
                    "weighting": cg.weighting(),
                    "coverage": cg.coverage(),
                    "nodes": stats.nodes,
                    "core_nodes": stats.core_nodes,
                    "contracted": stats.contracted,
                    "shortcuts": stats.shortcuts,
                    "witness_searches": stats.witness_searches,
                    "periodic_updates": stats.periodic_updates,
                    "lazy_updates": stats.lazy_updates,
                    "neighbour_updates": stats.neighbour_updates,
                    "took_ms": stats.took_ms,
                    "landmark_sets": sets,
                });
                write_json(&report, output.as_deref())
            }

            Commands::Route {
                engine,
                filters,
                from,
                to,
            } => {
                let from = parse_coord(&from)?;
                let to = parse_coord(&to)?;
                let options = filters.options()?;
                let engine = engine.build(engine.config()?)?;

                let start = Instant::now();
                let path = engine.route(from, to, &options)?;
                let took_us = start.elapsed().as_micros() as u64;

                let report = match path {
                    Some(path) => {
                        let coords: Vec<_> = path
                            .nodes
                            .iter()
                            .map(|&n| {
                                let c = engine.graph().coordinate(n);
                                [c.lon, c.lat]
                            })
                            .collect();
                        json!({
                            "found": true,
                            "duration_s": path.time(),
                            "distance_m": path.distance,
                            "weight": path.weight,
                            "nodes": path.nodes,
                            "geometry": { "type": "LineString", "coordinates": coords },
                            "took_us": took_us,
                        })
                    }
                    None => json!({ "found": false, "took_us": took_us }),
                };
                write_json(&report, None)
            }

            Commands::Isochrone {
                engine,
                filters,
                location,
                range,
                range_type,
                interval,
                units,
                area_units,
                attributes,
                smoothing,
                intersections,
                reverse,
                output,
            } => {
                let locations = location
                    .iter()
                    .map(|s| parse_coord(s))
                    .collect::<Result<Vec<_>>>()?;
                let range_type = match range_type.as_str() {
                    "time" => RangeType::Time,
                    "distance" => RangeType::Distance,
                    other => bail!("Unknown range type '{}'", other),
                };
                let mut params = IsochroneParams {
                    range_type,
                    ranges: range,
                    interval,
                    units: parse_units(&units)?,
                    area_units: area_units.as_deref().map(parse_units).transpose()?,
                    intersections,
                    reverse,
                    smoothing: smoothing.unwrap_or(-1.0),
                    ..Default::default()
                };
                for attr in attributes.split(',').map(str::trim).filter(|a| !a.is_empty()) {
                    match attr {
                        "area" => params.area = true,
                        "reachfactor" => params.reachfactor = true,
                        other => bail!("Unknown attribute '{}'", other),
                    }
                }
                let options = filters.options()?;
                let engine = engine.build(engine.config()?)?;

                let result = engine.isochrones(&locations, &params, &options)?;
                write_json(&result.to_geojson(), output.as_deref())
            }

            Commands::Matrix {
                engine,
                filters,
                sources,
                destinations,
                metrics,
                algorithm,
            } => {
                let sources = parse_coords(&sources)?;
                let destinations = match destinations {
                    Some(d) => parse_coords(&d)?,
                    None => sources.clone(),
                };
                let metrics = metrics
                    .split(',')
                    .map(|m| Metric::from_name(m.trim()).ok_or_else(|| anyhow!("Unknown metric '{}'", m)))
                    .collect::<Result<Vec<_>>>()?;
                let options = filters.options()?;

                let mut config = engine.config()?;
                if let Some(a) = algorithm {
                    config.matrix.algorithm = match a {
                        AlgorithmArg::Auto => MatrixAlgorithm::Auto,
                        AlgorithmArg::Core => MatrixAlgorithm::Core,
                        AlgorithmArg::Dijkstra => MatrixAlgorithm::Dijkstra,
                    };
                }
                let engine = engine.build(config)?;

                let result = engine.matrix(&sources, &destinations, &metrics, &options)?;
                write_json(&serde_json::to_value(&result)?, None)
            }
        }
    }
}
