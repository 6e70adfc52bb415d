//! Result accumulation: per-satellite [`SiteRecord`]s and the date-sorted
//! [`MergedOutput`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use geo::MultiLineString;
use serde::{Deserialize, Serialize};

use crate::line::EdgeLine;
use crate::types::PipelineError;

/// Wet/dry edge of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterDetection {
    /// Otsu threshold on the water index.
    pub threshold: f64,
    /// Traced water line.
    pub line: EdgeLine,
}

/// Everything recorded for one kept image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Acquisition time.
    pub acquired: NaiveDateTime,
    /// Image file name.
    pub filename: String,
    /// Cloud fraction over valid pixels.
    pub cloud_cover: f64,
    /// Georeferencing accuracy reported by the provider.
    pub geoaccuracy: Option<f64>,
    /// Position of the image in its satellite's scene list.
    pub idx: usize,
    /// Vegetation threshold.
    pub vthreshold: f64,
    /// Vegetation edge.
    pub vegline: EdgeLine,
    /// Wet/dry edge, when requested.
    pub water: Option<WaterDetection>,
}

/// Columnar record of one satellite's kept images, in processing order.
///
/// `waterlines` and `wthreshold` are either empty or as long as `dates`.
/// `tideelev` is empty until water levels are attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    /// Satellite name.
    pub satname: String,
    /// Acquisition times.
    pub dates: Vec<NaiveDateTime>,
    /// Vegetation edges.
    pub shorelines: Vec<EdgeLine>,
    /// Wet/dry edges.
    pub waterlines: Vec<EdgeLine>,
    /// Image file names.
    pub filename: Vec<String>,
    /// Cloud fractions.
    pub cloud_cover: Vec<f64>,
    /// Georeferencing accuracies.
    pub geoaccuracy: Vec<Option<f64>>,
    /// Scene list positions.
    pub idx: Vec<usize>,
    /// Vegetation thresholds.
    pub vthreshold: Vec<f64>,
    /// Wet/dry thresholds.
    pub wthreshold: Vec<f64>,
    /// Water elevation at acquisition time.
    pub tideelev: Vec<Option<f64>>,
}

impl SiteRecord {
    /// An empty record for `satname`.
    #[must_use]
    pub fn new(satname: impl Into<String>) -> Self {
        Self {
            satname: satname.into(),
            ..Self::default()
        }
    }

    /// Number of kept images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether no image was kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Append one detection.
    pub fn push(&mut self, d: Detection) {
        self.dates.push(d.acquired);
        self.shorelines.push(d.vegline);
        self.filename.push(d.filename);
        self.cloud_cover.push(d.cloud_cover);
        self.geoaccuracy.push(d.geoaccuracy);
        self.idx.push(d.idx);
        self.vthreshold.push(d.vthreshold);
        if let Some(w) = d.water {
            self.waterlines.push(w.line);
            self.wthreshold.push(w.threshold);
        }
    }

    /// Look up the water elevation of every kept image.
    pub fn attach_water_levels(&mut self, lookup: &dyn WaterLevelLookup) {
        self.tideelev = self.dates.iter().map(|&t| lookup.level_at(t)).collect();
        let missing = self.tideelev.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            tracing::warn!(satellite = %self.satname, missing, "no water level for some acquisitions");
        }
    }
}

/// Water elevation keyed by exact acquisition time.
pub trait WaterLevelLookup: Send + Sync {
    /// Elevation at `time`, if known.
    fn level_at(&self, time: NaiveDateTime) -> Option<f64>;
}

/// In-memory water level table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TideTable {
    entries: Vec<(NaiveDateTime, f64)>,
}

impl TideTable {
    /// Build from `(time, elevation)` pairs in any order.
    #[must_use]
    pub fn new(mut entries: Vec<(NaiveDateTime, f64)>) -> Self {
        entries.sort_by_key(|&(t, _)| t);
        Self { entries }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl WaterLevelLookup for TideTable {
    fn level_at(&self, time: NaiveDateTime) -> Option<f64> {
        self.entries
            .binary_search_by_key(&time, |&(t, _)| t)
            .ok()
            .map(|i| self.entries[i].1)
    }
}

/// Coordinate system of an [`EdgeLine`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsVariant {
    /// Configured output CRS.
    Output,
    /// Geographic reference CRS.
    LatLon,
    /// Secondary projected CRS.
    Projected,
}

impl CrsVariant {
    /// Every variant, in persistence order.
    pub const ALL: [Self; 3] = [Self::Output, Self::LatLon, Self::Projected];

    /// The matching geometry of `line`.
    #[must_use]
    pub const fn select(self, line: &EdgeLine) -> &MultiLineString<f64> {
        match self {
            Self::Output => &line.output,
            Self::LatLon => &line.latlon,
            Self::Projected => &line.projected,
        }
    }

    /// Short lowercase name, used in file names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::LatLon => "latlon",
            Self::Projected => "proj",
        }
    }
}

/// Which edge a line column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineKind {
    /// Vegetation edge (`shorelines`).
    Vegetation,
    /// Wet/dry edge (`waterlines`).
    Water,
}

/// Cross-satellite union of site records, sorted by acquisition time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedOutput {
    /// Acquisition dates.
    pub dates: Vec<NaiveDate>,
    /// Acquisition times of day.
    pub times: Vec<NaiveTime>,
    /// Satellite of each entry.
    pub satname: Vec<String>,
    /// Vegetation edges.
    pub shorelines: Vec<EdgeLine>,
    /// Wet/dry edges (empty unless every entry has one).
    #[serde(default)]
    pub waterlines: Vec<EdgeLine>,
    /// Image file names.
    pub filename: Vec<String>,
    /// Cloud fractions.
    pub cloud_cover: Vec<f64>,
    /// Georeferencing accuracies.
    pub geoaccuracy: Vec<Option<f64>>,
    /// Scene list positions.
    pub idx: Vec<usize>,
    /// Vegetation thresholds.
    pub vthreshold: Vec<f64>,
    /// Wet/dry thresholds.
    #[serde(default)]
    pub wthreshold: Vec<f64>,
    /// Water elevations (empty unless looked up).
    #[serde(default)]
    pub tideelev: Vec<Option<f64>>,
}

/// One row of a record, used while merging.
struct Row<'a> {
    at: NaiveDateTime,
    record: &'a SiteRecord,
    i: usize,
}

impl MergedOutput {
    /// Merge records into one table sorted by acquisition time. The sort
    /// is stable: equal times keep record order, then image order.
    ///
    /// Optional columns are carried only when every record has them.
    #[must_use]
    pub fn merge(records: &[SiteRecord]) -> Self {
        let mut rows: Vec<Row<'_>> = records
            .iter()
            .flat_map(|record| {
                record
                    .dates
                    .iter()
                    .enumerate()
                    .map(move |(i, &at)| Row { at, record, i })
            })
            .collect();
        rows.sort_by_key(|r| r.at);

        let all_have = |f: fn(&SiteRecord) -> usize| {
            records.iter().all(|r| f(r) == r.len())
        };
        let with_water = !rows.is_empty() && all_have(|r| r.waterlines.len());
        let with_tides = !rows.is_empty() && all_have(|r| r.tideelev.len());

        let mut out = Self::default();
        for Row { at, record, i } in rows {
            out.dates.push(at.date());
            out.times.push(at.time());
            out.satname.push(record.satname.clone());
            out.shorelines.push(record.shorelines[i].clone());
            out.filename.push(record.filename[i].clone());
            out.cloud_cover.push(record.cloud_cover[i]);
            out.geoaccuracy.push(record.geoaccuracy[i]);
            out.idx.push(record.idx[i]);
            out.vthreshold.push(record.vthreshold[i]);
            if with_water {
                out.waterlines.push(record.waterlines[i].clone());
                out.wthreshold.push(record.wthreshold[i]);
            }
            if with_tides {
                out.tideelev.push(record.tideelev[i]);
            }
        }
        out
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Acquisition time of entry `i`.
    #[must_use]
    pub fn acquired(&self, i: usize) -> NaiveDateTime {
        self.dates[i].and_time(self.times[i])
    }

    /// Line column of one kind, in one coordinate system.
    #[must_use]
    pub fn lines(&self, kind: LineKind, variant: CrsVariant) -> Vec<&MultiLineString<f64>> {
        let column = match kind {
            LineKind::Vegetation => &self.shorelines,
            LineKind::Water => &self.waterlines,
        };
        column.iter().map(|l| variant.select(l)).collect()
    }

    /// Threshold column of one kind.
    #[must_use]
    pub fn thresholds(&self, kind: LineKind) -> &[f64] {
        match kind {
            LineKind::Vegetation => &self.vthreshold,
            LineKind::Water => &self.wthreshold,
        }
    }

    /// The single-CRS view of the table.
    #[must_use]
    pub fn variant(&self, variant: CrsVariant) -> CrsView {
        let owned = |kind| {
            self.lines(kind, variant)
                .into_iter()
                .cloned()
                .collect::<Vec<_>>()
        };
        CrsView {
            variant,
            dates: self.dates.clone(),
            times: self.times.clone(),
            satname: self.satname.clone(),
            shorelines: owned(LineKind::Vegetation),
            waterlines: owned(LineKind::Water),
            filename: self.filename.clone(),
            cloud_cover: self.cloud_cover.clone(),
            geoaccuracy: self.geoaccuracy.clone(),
            idx: self.idx.clone(),
            vthreshold: self.vthreshold.clone(),
            wthreshold: self.wthreshold.clone(),
            tideelev: self.tideelev.clone(),
        }
    }

    /// Check that every column has one entry per date.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] naming the first column
    /// of the wrong length.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let n = self.len();
        let required = [
            ("times", self.times.len()),
            ("satname", self.satname.len()),
            ("shorelines", self.shorelines.len()),
            ("filename", self.filename.len()),
            ("cloud_cover", self.cloud_cover.len()),
            ("geoaccuracy", self.geoaccuracy.len()),
            ("idx", self.idx.len()),
            ("vthreshold", self.vthreshold.len()),
        ];
        let optional = [
            ("waterlines", self.waterlines.len()),
            ("wthreshold", self.wthreshold.len()),
            ("tideelev", self.tideelev.len()),
        ];
        let bad = required
            .iter()
            .find(|&&(_, len)| len != n)
            .or_else(|| optional.iter().find(|&&(_, len)| len != 0 && len != n));
        match bad {
            Some((name, len)) => Err(PipelineError::ShapeMismatch(format!(
                "column {name} has {len} entries for {n} dates"
            ))),
            None => Ok(()),
        }
    }
}

/// [`MergedOutput`] with every line in a single coordinate system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrsView {
    /// Which coordinate system the lines are in.
    pub variant: CrsVariant,
    /// Acquisition dates.
    pub dates: Vec<NaiveDate>,
    /// Acquisition times of day.
    pub times: Vec<NaiveTime>,
    /// Satellite of each entry.
    pub satname: Vec<String>,
    /// Vegetation edges.
    pub shorelines: Vec<MultiLineString<f64>>,
    /// Wet/dry edges.
    pub waterlines: Vec<MultiLineString<f64>>,
    /// Image file names.
    pub filename: Vec<String>,
    /// Cloud fractions.
    pub cloud_cover: Vec<f64>,
    /// Georeferencing accuracies.
    pub geoaccuracy: Vec<Option<f64>>,
    /// Scene list positions.
    pub idx: Vec<usize>,
    /// Vegetation thresholds.
    pub vthreshold: Vec<f64>,
    /// Wet/dry thresholds.
    pub wthreshold: Vec<f64>,
    /// Water elevations.
    pub tideelev: Vec<Option<f64>>,
}

/// Persistence of the merged output.
pub trait RecordStore {
    /// Store the merged output.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn save(&mut self, output: &MergedOutput) -> Result<(), PipelineError>;

    /// Load a previously stored output.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn load(&self) -> Result<MergedOutput, PipelineError>;
}

/// Store that keeps the output in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    stored: Option<MergedOutput>,
}

impl RecordStore for MemoryStore {
    fn save(&mut self, output: &MergedOutput) -> Result<(), PipelineError> {
        output.validate()?;
        self.stored = Some(output.clone());
        Ok(())
    }

    fn load(&self) -> Result<MergedOutput, PipelineError> {
        self.stored.clone().ok_or(PipelineError::EmptyStore)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use geo::LineString;

    use super::*;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 5, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn detection(acquired: NaiveDateTime, idx: usize, water: bool) -> Detection {
        let line = MultiLineString::new(vec![LineString::from(vec![(0.0, 0.0), (1.0, 1.0)])]);
        let edge = EdgeLine {
            output: line.clone(),
            latlon: line.clone(),
            projected: line,
        };
        Detection {
            acquired,
            filename: format!("img{idx}.tif"),
            cloud_cover: 0.1,
            geoaccuracy: Some(5.0),
            idx,
            vthreshold: 0.2,
            vegline: edge.clone(),
            water: water.then(|| WaterDetection {
                threshold: -0.1,
                line: edge,
            }),
        }
    }

    fn record(sat: &str, days: &[u32], water: bool) -> SiteRecord {
        let mut r = SiteRecord::new(sat);
        for (i, &d) in days.iter().enumerate() {
            r.push(detection(at(d, 10), i, water));
        }
        r
    }

    #[test]
    fn interleaved_dates_are_merged_in_order() {
        let merged = MergedOutput::merge(&[record("L8", &[1, 3], false), record("S2", &[2, 4], false)]);
        let days: Vec<u32> = merged.dates.iter().map(chrono::Datelike::day).collect();
        assert_eq!(days, vec![1, 2, 3, 4]);
        assert_eq!(merged.satname, vec!["L8", "S2", "L8", "S2"]);
        assert_eq!(merged.idx, vec![0, 0, 1, 1]);
        assert!(merged.waterlines.is_empty());
        merged.validate().unwrap();
    }

    #[test]
    fn equal_times_keep_record_order() {
        let merged = MergedOutput::merge(&[record("S2", &[7], false), record("L8", &[7], false)]);
        assert_eq!(merged.satname, vec!["S2", "L8"]);
    }

    #[test]
    fn water_columns_follow_detections() {
        let r = record("S2", &[1, 2], true);
        assert_eq!(r.waterlines.len(), 2);
        let merged = MergedOutput::merge(&[r]);
        assert_eq!(merged.wthreshold, vec![-0.1, -0.1]);

        let mixed = MergedOutput::merge(&[record("S2", &[1], true), record("L8", &[2], false)]);
        assert!(mixed.waterlines.is_empty());
        mixed.validate().unwrap();
    }

    #[test]
    fn water_levels_by_exact_time() {
        let mut r = record("S2", &[1, 2], false);
        let table = TideTable::new(vec![(at(2, 10), 0.4), (at(1, 11), 9.0)]);
        r.attach_water_levels(&table);
        assert_eq!(r.tideelev, vec![None, Some(0.4)]);
        let merged = MergedOutput::merge(&[r]);
        assert_eq!(merged.tideelev.len(), 2);
    }

    #[test]
    fn variant_view_selects_geometry() {
        let mut r = SiteRecord::new("S2");
        let mut d = detection(at(1, 0), 0, false);
        d.vegline.latlon = MultiLineString::new(vec![LineString::from(vec![(5.0, 5.0), (6.0, 6.0)])]);
        r.push(d);
        let merged = MergedOutput::merge(&[r]);
        let view = merged.variant(CrsVariant::LatLon);
        assert!((view.shorelines[0].0[0].0[0].x - 5.0).abs() < f64::EPSILON);
        assert_eq!(merged.acquired(0), at(1, 0));
    }

    #[test]
    fn ragged_output_is_rejected() {
        let mut merged = MergedOutput::merge(&[record("S2", &[1, 2], false)]);
        merged.filename.pop();
        assert!(matches!(merged.validate(), Err(PipelineError::ShapeMismatch(_))));
    }

    #[test]
    fn memory_store_round_trip() {
        let merged = MergedOutput::merge(&[record("S2", &[1], false)]);
        let mut store = MemoryStore::default();
        assert!(matches!(store.load(), Err(PipelineError::EmptyStore)));
        store.save(&merged).unwrap();
        assert_eq!(store.load().unwrap(), merged);
    }

    #[test]
    fn merged_output_serde_round_trip() {
        let merged = MergedOutput::merge(&[record("S2", &[1, 3], true)]);
        let json = serde_json::to_string(&merged).unwrap();
        assert!(json.contains("\"2020-05-01\""));
        let back: MergedOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, merged);
    }
}
