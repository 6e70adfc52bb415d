//! On-disk inputs and outputs of a run.
//!
//! - Manifest: JSON listing each satellite's scene files, in order.
//! - Scene: JSON serialization of a [`RasterFrame`].
//! - Reference: JSON `{"epsg": .., "coordinates": [[x, y], ..]}`.
//! - Tides: CSV of `timestamp,elevation` rows.
//! - Output: columnar JSON written through [`JsonFileStore`].
//!
//! Relative scene paths are resolved against the manifest's directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use geo::LineString;
use serde::Deserialize;
use vegedge_pipeline::{
    MergedOutput, PipelineError, RasterFrame, RecordStore, ReferenceLine, SceneProvider,
    TideTable,
};

/// Accepted tide timestamp layouts.
const TIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    satellite: String,
    scenes: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    satellites: Vec<ManifestEntry>,
}

/// Scenes listed by a manifest, loaded lazily.
#[derive(Debug)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Read a manifest file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or names a satellite
    /// twice.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let file: ManifestFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing manifest {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut entries = file.satellites;
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.satellite == entry.satellite) {
                bail!("satellite {} listed twice in manifest", entry.satellite);
            }
        }
        for entry in &mut entries {
            for scene in &mut entry.scenes {
                if scene.is_relative() {
                    *scene = base.join(&*scene);
                }
            }
        }
        Ok(Self { entries })
    }

    fn scenes(&self, satellite: &str) -> &[PathBuf] {
        self.entries
            .iter()
            .find(|e| e.satellite == satellite)
            .map(|e| e.scenes.as_slice())
            .unwrap_or(&[])
    }
}

impl SceneProvider for Manifest {
    fn satellites(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.satellite.clone()).collect()
    }

    fn scene_count(&self, satellite: &str) -> usize {
        self.scenes(satellite).len()
    }

    fn load(&self, satellite: &str, idx: usize) -> Result<Option<RasterFrame>, PipelineError> {
        let Some(path) = self.scenes(satellite).get(idx) else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "scene file missing");
            return Ok(None);
        }
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::Acquisition(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PipelineError::Acquisition(format!("{}: {e}", path.display())))
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceFile {
    epsg: u32,
    coordinates: Vec<[f64; 2]>,
}

/// Read a reference line file.
///
/// # Errors
///
/// Fails if the file cannot be read or parsed, or holds fewer than two
/// points.
pub fn load_reference(path: &Path) -> Result<ReferenceLine> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading reference line {}", path.display()))?;
    let file: ReferenceFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing reference line {}", path.display()))?;
    if file.coordinates.len() < 2 {
        bail!("reference line {} needs at least two points", path.display());
    }
    let line: LineString<f64> = file
        .coordinates
        .into_iter()
        .map(|[x, y]| (x, y))
        .collect::<Vec<_>>()
        .into();
    Ok(ReferenceLine {
        epsg: file.epsg,
        line,
    })
}

fn parse_time(text: &str) -> Option<NaiveDateTime> {
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
}

/// Parse `timestamp,elevation` rows. A first row that does not parse
/// is taken as a header; blank lines are ignored.
///
/// # Errors
///
/// Fails on the first malformed data row.
pub fn parse_tides(text: &str) -> Result<TideTable> {
    let mut entries = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = line.split_once(',').and_then(|(t, e)| {
            Some((parse_time(t.trim())?, e.trim().parse::<f64>().ok()?))
        });
        match parsed {
            Some(entry) => entries.push(entry),
            None if n == 0 => {}
            None => bail!("line {}: expected timestamp,elevation but got {line:?}", n + 1),
        }
    }
    Ok(TideTable::new(entries))
}

/// Read a tide CSV file.
///
/// # Errors
///
/// Fails if the file cannot be read or holds a malformed row.
pub fn load_tides(path: &Path) -> Result<TideTable> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading tides {}", path.display()))?;
    parse_tides(&text).with_context(|| format!("parsing tides {}", path.display()))
}

/// Merged output persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store at `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RecordStore for JsonFileStore {
    fn save(&mut self, output: &MergedOutput) -> Result<(), PipelineError> {
        let text = vegedge_export::to_json(output)
            .map_err(|e| PipelineError::ShapeMismatch(e.to_string()))?;
        fs::write(&self.path, text)
            .map_err(|e| PipelineError::Acquisition(format!("{}: {e}", self.path.display())))
    }

    fn load(&self) -> Result<MergedOutput, PipelineError> {
        let text = fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::EmptyStore,
            _ => PipelineError::Acquisition(format!("{}: {e}", self.path.display())),
        })?;
        vegedge_export::from_json(&text).map_err(|e| PipelineError::ShapeMismatch(e.to_string()))
    }
}
