//! GeoJSON export serializer.
//!
//! One `Feature` per kept image, with the image's edge as a
//! `MultiLineString` geometry in the chosen coordinate system variant and
//! its record columns as properties. Images whose edge came out empty get
//! a `null` geometry so the feature count always matches the table.
//!
//! GeoJSON assumes WGS 84. When [`GeoJsonMetadata::epsg`] names another
//! system, a legacy named `crs` member is written so GIS tools place the
//! lines correctly.
//!
//! Pure: the collection is returned as a `String`, nothing is written.

use geo::MultiLineString;
use serde_json::{Map, Value, json};
use vegedge_pipeline::crs::EPSG_WGS84;
use vegedge_pipeline::{CrsVariant, LineKind, MergedOutput};

use crate::ExportError;

/// Collection-level metadata.
#[derive(Debug, Clone, Default)]
pub struct GeoJsonMetadata<'a> {
    /// Collection name, typically the site name.
    pub name: Option<&'a str>,

    /// EPSG code of the variant's coordinate system.
    pub epsg: Option<u32>,
}

fn geometry(lines: &MultiLineString<f64>) -> Value {
    if lines.0.is_empty() {
        return Value::Null;
    }
    let coordinates: Vec<Vec<[f64; 2]>> = lines
        .0
        .iter()
        .map(|line| line.0.iter().map(|c| [c.x, c.y]).collect())
        .collect();
    json!({ "type": "MultiLineString", "coordinates": coordinates })
}

/// Serialize one line column of the merged output as a GeoJSON
/// `FeatureCollection`.
///
/// Properties per feature: `date`, `time`, `satname`, `filename`,
/// `cloud_cover`, `geoaccuracy`, `idx`, `threshold` and, when the table
/// carries water levels, `tideelev`.
///
/// # Errors
///
/// Returns [`ExportError::Shape`] when the table's columns disagree in
/// length, and [`ExportError::Json`] if encoding fails.
pub fn to_geojson(
    output: &MergedOutput,
    variant: CrsVariant,
    kind: LineKind,
    metadata: &GeoJsonMetadata<'_>,
) -> Result<String, ExportError> {
    output.validate()?;
    let lines = output.lines(kind, variant);
    let thresholds = output.thresholds(kind);

    let features: Vec<Value> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let mut properties = Map::new();
            properties.insert("date".into(), json!(output.dates[i].to_string()));
            properties.insert("time".into(), json!(output.times[i].to_string()));
            properties.insert("satname".into(), json!(output.satname[i]));
            properties.insert("filename".into(), json!(output.filename[i]));
            properties.insert("cloud_cover".into(), json!(output.cloud_cover[i]));
            properties.insert("geoaccuracy".into(), json!(output.geoaccuracy[i]));
            properties.insert("idx".into(), json!(output.idx[i]));
            properties.insert("threshold".into(), json!(thresholds[i]));
            if let Some(level) = output.tideelev.get(i) {
                properties.insert("tideelev".into(), json!(level));
            }
            json!({
                "type": "Feature",
                "geometry": geometry(line),
                "properties": properties,
            })
        })
        .collect();

    let mut collection = Map::new();
    collection.insert("type".into(), json!("FeatureCollection"));
    if let Some(name) = metadata.name {
        collection.insert("name".into(), json!(name));
    }
    if let Some(epsg) = metadata.epsg.filter(|&e| e != EPSG_WGS84) {
        collection.insert(
            "crs".into(),
            json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{epsg}") },
            }),
        );
    }
    collection.insert("features".into(), Value::Array(features));
    Ok(serde_json::to_string_pretty(&Value::Object(collection))?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use geo::LineString;
    use vegedge_pipeline::EdgeLine;

    use super::*;

    fn edge(x: f64) -> EdgeLine {
        let native = MultiLineString::new(vec![LineString::from(vec![(x, 0.0), (x, 10.0)])]);
        let lonlat = MultiLineString::new(vec![LineString::from(vec![(-3.0, 50.0), (-3.0, 50.5)])]);
        EdgeLine {
            output: native.clone(),
            latlon: lonlat,
            projected: native,
        }
    }

    fn table() -> MergedOutput {
        MergedOutput {
            dates: vec![
                NaiveDate::from_ymd_opt(2021, 1, 5).unwrap(),
                NaiveDate::from_ymd_opt(2021, 1, 9).unwrap(),
            ],
            times: vec![NaiveTime::from_hms_opt(11, 0, 0).unwrap(); 2],
            satname: vec!["S2".to_owned(), "L8".to_owned()],
            shorelines: vec![edge(100.0), EdgeLine::default()],
            filename: vec!["a.tif".to_owned(), "b.tif".to_owned()],
            cloud_cover: vec![0.0, 0.5],
            geoaccuracy: vec![None, Some(6.0)],
            idx: vec![0, 3],
            vthreshold: vec![0.25, 0.125],
            tideelev: vec![Some(1.5), None],
            ..MergedOutput::default()
        }
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn one_feature_per_image() {
        let text = to_geojson(
            &table(),
            CrsVariant::LatLon,
            LineKind::Vegetation,
            &GeoJsonMetadata::default(),
        )
        .unwrap();
        let v = parse(&text);
        assert_eq!(v["type"], "FeatureCollection");
        assert!(v.get("crs").is_none());

        let features = v["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        let first = &features[0];
        assert_eq!(first["geometry"]["type"], "MultiLineString");
        assert_eq!(first["geometry"]["coordinates"][0][1][1], 50.5);
        assert_eq!(first["properties"]["date"], "2021-01-05");
        assert_eq!(first["properties"]["threshold"], 0.25);
        assert_eq!(first["properties"]["tideelev"], 1.5);
        assert!(first["properties"]["geoaccuracy"].is_null());
    }

    #[test]
    fn empty_edge_has_null_geometry() {
        let text = to_geojson(
            &table(),
            CrsVariant::Output,
            LineKind::Vegetation,
            &GeoJsonMetadata::default(),
        )
        .unwrap();
        let v = parse(&text);
        assert!(v["features"][1]["geometry"].is_null());
        assert_eq!(v["features"][1]["properties"]["idx"], 3);
    }

    #[test]
    fn projected_variant_names_its_crs() {
        let meta = GeoJsonMetadata {
            name: Some("narrabeen"),
            epsg: Some(32756),
        };
        let text = to_geojson(&table(), CrsVariant::Output, LineKind::Vegetation, &meta).unwrap();
        let v = parse(&text);
        assert_eq!(v["name"], "narrabeen");
        assert_eq!(v["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::32756");
        assert_eq!(v["features"][0]["geometry"]["coordinates"][0][0][0], 100.0);
    }

    #[test]
    fn missing_water_column_gives_empty_collection() {
        let text = to_geojson(
            &table(),
            CrsVariant::Output,
            LineKind::Water,
            &GeoJsonMetadata::default(),
        )
        .unwrap();
        assert!(parse(&text)["features"].as_array().unwrap().is_empty());
    }
}
