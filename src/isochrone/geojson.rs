//! GeoJSON feature collections for isochrone results

use geo::{BoundingRect, LineString, MultiPolygon, Polygon, Rect};
use serde_json::{json, Map, Value};

use super::{IsochroneCollection, IsochroneIntersection, IsochroneMap, Shape};

fn ring(line: &LineString<f64>) -> Value {
    Value::Array(line.0.iter().map(|c| json!([c.x, c.y])).collect())
}

fn polygon_coordinates(polygon: &Polygon<f64>) -> Value {
    let mut rings = vec![ring(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring));
    Value::Array(rings)
}

fn shape_geometry(shape: &Shape) -> Value {
    match shape {
        Shape::Empty => Value::Null,
        Shape::Point(p) => json!({ "type": "Point", "coordinates": [p.x(), p.y()] }),
        Shape::Polygon(p) => json!({ "type": "Polygon", "coordinates": polygon_coordinates(p) }),
    }
}

fn multi_polygon_geometry(geometry: &MultiPolygon<f64>) -> Value {
    if geometry.0.len() == 1 {
        return json!({ "type": "Polygon", "coordinates": polygon_coordinates(&geometry.0[0]) });
    }
    json!({
        "type": "MultiPolygon",
        "coordinates": geometry.0.iter().map(polygon_coordinates).collect::<Vec<_>>(),
    })
}

fn extend(bbox: &mut Option<Rect<f64>>, rect: Option<Rect<f64>>) {
    let Some(rect) = rect else {
        return;
    };
    *bbox = Some(match bbox.take() {
        None => rect,
        Some(b) => Rect::new(
            (b.min().x.min(rect.min().x), b.min().y.min(rect.min().y)),
            (b.max().x.max(rect.max().x), b.max().y.max(rect.max().y)),
        ),
    });
}

fn isochrone_features(map: &IsochroneMap, bbox: &mut Option<Rect<f64>>) -> Vec<Value> {
    map.isochrones
        .iter()
        .map(|iso| {
            let mut properties = Map::new();
            properties.insert("group_index".into(), json!(map.index));
            properties.insert("value".into(), json!(iso.value));
            properties.insert("center".into(), json!([map.center.lon, map.center.lat]));
            if let Some(area) = iso.area {
                properties.insert("area".into(), json!(area));
            }
            if let Some(reachfactor) = iso.reachfactor {
                properties.insert("reachfactor".into(), json!(reachfactor));
            }
            for (name, value) in &iso.attributes {
                properties.insert(name.clone(), json!(value));
            }

            match &iso.shape {
                Shape::Polygon(p) => extend(bbox, p.bounding_rect()),
                Shape::Point(p) => extend(bbox, Some(Rect::new(p.0, p.0))),
                Shape::Empty => {}
            }

            json!({
                "type": "Feature",
                "geometry": shape_geometry(&iso.shape),
                "properties": properties,
            })
        })
        .collect()
}

fn intersection_feature(intersection: &IsochroneIntersection) -> Value {
    let mut properties = Map::new();
    let contours: Vec<Value> = intersection
        .contours
        .iter()
        .map(|(group, iso)| json!([group, iso]))
        .collect();
    properties.insert("contours".into(), Value::Array(contours));
    if let Some(area) = intersection.area {
        properties.insert("area".into(), json!(area));
    }
    json!({
        "type": "Feature",
        "geometry": multi_polygon_geometry(&intersection.geometry),
        "properties": properties,
    })
}

/// Isochrones grouped by origin, then intersections, with the bbox of all
/// isochrones
pub fn feature_collection(collection: &IsochroneCollection) -> Value {
    let mut bbox = None;
    let mut features: Vec<Value> = collection
        .maps
        .iter()
        .flat_map(|m| isochrone_features(m, &mut bbox))
        .collect();
    features.extend(collection.intersections.iter().map(intersection_feature));

    let bbox = match bbox {
        Some(r) => json!([r.min().x, r.min().y, r.max().x, r.max().y]),
        None => json!([0.0, 0.0, 0.0, 0.0]),
    };
    json!({
        "type": "FeatureCollection",
        "bbox": bbox,
        "features": features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Coordinate;
    use crate::isochrone::{HullStats, Isochrone};
    use geo::polygon;

    fn iso(shape: Shape, value: f64) -> Isochrone {
        Isochrone {
            shape,
            value,
            mean_radius: 100.0,
            area: Some(12.5),
            reachfactor: None,
            attributes: vec![("total_pop".to_string(), 42.0)],
            stats: HullStats::default(),
        }
    }

    #[test]
    fn test_feature_properties_and_bbox() {
        let square = polygon![(x: 4.0, y: 50.0), (x: 4.1, y: 50.0), (x: 4.1, y: 50.1), (x: 4.0, y: 50.1)];
        let overlap = MultiPolygon(vec![square.clone()]);
        let collection = IsochroneCollection {
            maps: vec![
                IsochroneMap {
                    index: 0,
                    center: Coordinate::new(50.05, 4.05),
                    isochrones: vec![iso(Shape::Polygon(square), 300.0)],
                },
                IsochroneMap {
                    index: 1,
                    center: Coordinate::new(50.2, 4.2),
                    isochrones: vec![iso(Shape::Point(geo::Point::new(4.2, 50.2)), 300.0)],
                },
            ],
            intersections: vec![IsochroneIntersection {
                geometry: overlap,
                contours: vec![(0, 0), (1, 0)],
                area: None,
            }],
        };

        let json = feature_collection(&collection);
        assert_eq!(json["type"], "FeatureCollection");
        let features = json["features"].as_array().unwrap();
        assert_eq!(features.len(), 3);

        let first = &features[0]["properties"];
        assert_eq!(first["group_index"], 0);
        assert_eq!(first["value"].as_f64(), Some(300.0));
        assert_eq!(first["area"].as_f64(), Some(12.5));
        assert_eq!(first["total_pop"].as_f64(), Some(42.0));
        assert_eq!(first["center"], json!([4.05, 50.05]));
        assert!(first.get("reachfactor").is_none());
        assert_eq!(features[0]["geometry"]["type"], "Polygon");

        assert_eq!(features[1]["geometry"]["type"], "Point");
        assert_eq!(features[2]["properties"]["contours"], json!([[0, 0], [1, 0]]));
        assert_eq!(features[2]["geometry"]["type"], "Polygon");

        assert_eq!(json["bbox"], json!([4.0, 50.0, 4.2, 50.2]));
    }

    #[test]
    fn test_empty_collection_bbox() {
        let json = feature_collection(&IsochroneCollection {
            maps: Vec::new(),
            intersections: Vec::new(),
        });
        assert_eq!(json["bbox"], json!([0.0, 0.0, 0.0, 0.0]));
        assert!(json["features"].as_array().unwrap().is_empty());
    }
}
