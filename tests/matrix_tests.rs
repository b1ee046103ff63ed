//! Matrix tables compared with individual routes

mod common;

use butterfly_reach::config::{EngineConfig, MatrixAlgorithm};
use butterfly_reach::graph::features;
use butterfly_reach::matrix::{Metric, UNREACHABLE};
use butterfly_reach::weighting::{FastestWeighting, Profile};
use butterfly_reach::{NodeId, RouteOptions, RoutingEngine};

fn engine(seed: u64, algorithm: MatrixAlgorithm) -> RoutingEngine {
    let mut config = EngineConfig::default();
    config.matrix.algorithm = algorithm;
    RoutingEngine::build(
        common::random_network(seed, 6),
        Box::new(FastestWeighting::new(Profile::Car)),
        config,
    )
    .unwrap()
}

#[test]
fn test_matrix_matches_routes() {
    for seed in [41, 42] {
        let engine = engine(seed, MatrixAlgorithm::Auto);
        let sources: Vec<NodeId> = vec![0, 7, 13, 20, 35];
        let destinations: Vec<NodeId> = vec![35, 1, 18, 18, 29, 0];

        for options in [RouteOptions::default(), RouteOptions::avoiding(features::FERRIES)] {
            let result = engine
                .matrix_nodes(&sources, &destinations, &[Metric::Duration, Metric::Weight], &options)
                .unwrap();
            assert_eq!(result.algorithm, MatrixAlgorithm::Core);
            assert!(result.distances.is_none());
            let durations = result.table(Metric::Duration).unwrap();
            let weights = result.table(Metric::Weight).unwrap();

            for (i, &s) in sources.iter().enumerate() {
                for (j, &t) in destinations.iter().enumerate() {
                    match engine.route_nodes(s, t, &options).unwrap() {
                        Some(path) => {
                            assert_eq!(weights[i][j], path.weight as f64, "seed {} {} -> {}", seed, s, t);
                            assert_eq!(durations[i][j], path.time());
                        }
                        None => {
                            assert_eq!(weights[i][j], UNREACHABLE);
                            assert_eq!(durations[i][j], UNREACHABLE);
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn test_core_and_dijkstra_tables_agree() {
    let sources: Vec<NodeId> = (0..36).step_by(4).collect();
    let destinations: Vec<NodeId> = (0..36).step_by(3).collect();
    let options = RouteOptions::avoiding(features::TOLLWAYS);

    let core = engine(43, MatrixAlgorithm::Core)
        .matrix_nodes(&sources, &destinations, &[Metric::Weight], &options)
        .unwrap();
    let dijkstra = engine(43, MatrixAlgorithm::Dijkstra)
        .matrix_nodes(&sources, &destinations, &[Metric::Weight], &options)
        .unwrap();

    assert_eq!(core.algorithm, MatrixAlgorithm::Core);
    assert_eq!(dijkstra.algorithm, MatrixAlgorithm::Dijkstra);
    assert_eq!(core.weights, dijkstra.weights);
}

#[test]
fn test_diagonal_is_zero() {
    let engine = engine(44, MatrixAlgorithm::Auto);
    let nodes: Vec<NodeId> = (0..36).collect();
    let result = engine
        .matrix_nodes(&nodes, &nodes, &[Metric::Duration, Metric::Distance], &RouteOptions::default())
        .unwrap();

    let durations = result.durations.unwrap();
    let distances = result.distances.unwrap();
    for i in 0..nodes.len() {
        assert_eq!(durations[i][i], 0.0);
        assert_eq!(distances[i][i], 0.0);
    }
}

#[test]
fn test_matrix_rejects_departure_and_bad_input() {
    let engine = engine(45, MatrixAlgorithm::Auto);
    let timed = RouteOptions {
        departure: chrono::NaiveDate::from_ymd_opt(2024, 3, 4).and_then(|d| d.and_hms_opt(8, 0, 0)),
        ..Default::default()
    };
    assert!(engine.matrix_nodes(&[0], &[1], &[Metric::Duration], &timed).is_err());

    let options = RouteOptions::default();
    assert!(engine.matrix_nodes(&[], &[1], &[Metric::Duration], &options).is_err());
    assert!(engine.matrix_nodes(&[0], &[1], &[], &options).is_err());
    assert!(engine.matrix_nodes(&[0], &[999], &[Metric::Duration], &options).is_err());
}

#[test]
fn test_matrix_by_coordinates_serializes() {
    let engine = RoutingEngine::build(
        common::grid(4, 4, 100.0, 36.0),
        Box::new(FastestWeighting::new(Profile::Car)),
        EngineConfig::default(),
    )
    .unwrap();
    let g = engine.graph();
    let result = engine
        .matrix(
            &[g.coordinate(0), g.coordinate(15)],
            &[g.coordinate(3)],
            &[Metric::Duration, Metric::Distance],
            &RouteOptions::default(),
        )
        .unwrap();

    assert_eq!(result.durations, Some(vec![vec![30.0], vec![30.0]]));
    assert_eq!(result.distances, Some(vec![vec![300.0], vec![300.0]]));

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["algorithm"], "core");
    assert!(json.get("weights").is_none());
    assert!(json.get("stats").is_none());
}
