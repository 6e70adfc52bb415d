//! Integration test: run a synthetic two-satellite site through the batch
//! pipeline and export every format.

#![allow(clippy::unwrap_used)]

use chrono::NaiveDate;
use geo::LineString;
use image::Luma;
use vegedge_export::{GeoJsonMetadata, from_json, to_geojson, to_json};
use vegedge_pipeline::classifier::{ClassScheme, Classifier};
use vegedge_pipeline::features::FeatureMatrix;
use vegedge_pipeline::types::{FloatGrid, Mask};
use vegedge_pipeline::{
    AutoAccept, Batch, Classifiers, CrsVariant, ExtractionSettings, GeoTransform, LineKind,
    PipelineError, RasterFrame, ReferenceLine, SceneProvider,
};

/// Vegetation where NDVI (feature 4) is positive.
struct NdviSign;

impl Classifier for NdviSign {
    fn scheme(&self) -> ClassScheme {
        ClassScheme::Vegetation
    }
    fn feature_count(&self) -> usize {
        18
    }
    fn predict(&self, f: &FeatureMatrix) -> Result<Vec<u8>, PipelineError> {
        Ok((0..f.rows())
            .map(|i| if f.row(i)[4] > 0.0 { 1 } else { 2 })
            .collect())
    }
}

/// NDVI 0.6 above row `edge`, -0.2 below.
fn frame(day: u32, edge: u32) -> RasterFrame {
    let nir = FloatGrid::from_fn(80, 80, |_, y| Luma([if y < edge { 0.4 } else { 0.0667 }]));
    RasterFrame {
        filename: format!("scene_{day}.tif"),
        bands: vec![
            FloatGrid::from_pixel(80, 80, Luma([0.05])),
            FloatGrid::from_pixel(80, 80, Luma([0.08])),
            FloatGrid::from_pixel(80, 80, Luma([0.1])),
            nir,
        ],
        cloud_mask: Some(Mask::new(80, 80)),
        nodata_mask: Mask::new(80, 80),
        georef: GeoTransform::north_up(400_000.0, 6_000_000.0, 10.0),
        epsg: 32631,
        acquired: NaiveDate::from_ymd_opt(2022, 8, day)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap(),
        geoaccuracy: Some(3.0),
    }
}

struct Site;

impl SceneProvider for Site {
    fn satellites(&self) -> Vec<String> {
        vec!["L9".to_owned(), "S2".to_owned()]
    }
    fn scene_count(&self, _: &str) -> usize {
        2
    }
    fn load(&self, satellite: &str, idx: usize) -> Result<Option<RasterFrame>, PipelineError> {
        let (day, edge) = match (satellite, idx) {
            ("L9", 0) => (4, 38),
            ("L9", _) => (20, 42),
            (_, 0) => (11, 40),
            _ => (27, 36),
        };
        Ok(Some(frame(day, edge)))
    }
}

#[test]
fn synthetic_site_exports() {
    let reference = ReferenceLine {
        epsg: 32631,
        line: LineString::from(vec![(400_000.0, 5_999_600.0), (400_800.0, 5_999_600.0)]),
    };
    let settings = ExtractionSettings {
        max_dist_ref: 300.0,
        seed: Some(9),
        ..ExtractionSettings::default()
    };
    let classifiers = Classifiers {
        vegetation: &NdviSign,
        shoreline: None,
    };
    let out = Batch::new(&settings, &reference, classifiers)
        .unwrap()
        .run(&Site, &mut AutoAccept)
        .unwrap();
    assert_eq!(out.merged.len(), 4);
    assert_eq!(out.merged.satname, vec!["L9", "S2", "L9", "S2"]);

    let text = to_json(&out.merged).unwrap();
    assert_eq!(from_json(&text).unwrap().idx, out.merged.idx);

    let meta = GeoJsonMetadata {
        name: Some("synthetic"),
        epsg: Some(4326),
    };
    let geojson = to_geojson(&out.merged, CrsVariant::LatLon, LineKind::Vegetation, &meta).unwrap();
    let v: serde_json::Value = serde_json::from_str(&geojson).unwrap();
    let features = v["features"].as_array().unwrap();
    assert_eq!(features.len(), 4);
    for f in features {
        assert_eq!(f["geometry"]["type"], "MultiLineString");
        let lon = f["geometry"]["coordinates"][0][0][0].as_f64().unwrap();
        // Zone 31N is centred on 3 degrees east.
        assert!((0.0..3.0).contains(&lon), "longitude {lon}");
    }
}
