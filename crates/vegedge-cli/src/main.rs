//! vegedge: batch extraction of vegetation (and wet/dry) edge lines.
//!
//! Reads preprocessed scenes listed in a manifest, runs every scene
//! through the extraction pipeline and writes the merged, date-sorted
//! record as columnar JSON, optionally with GeoJSON layers.
//!
//! # Usage
//!
//! ```text
//! vegedge run --manifest site.json --reference ref.json \
//!     --classifier veg_mlp.json --out site_output.json
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod inputs;
mod terminal;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use vegedge_export::{GeoJsonMetadata, to_geojson};
use vegedge_pipeline::{
    AutoAccept, Batch, Classifier, Classifiers, ContourTracerKind, CrsVariant,
    ExtractionSettings, LineKind, MergedOutput, MlpClassifier, RecordStore, ThresholdReviewer,
};

use crate::inputs::{JsonFileStore, Manifest, load_reference, load_tides};
use crate::terminal::TerminalReviewer;

/// Vegetation and water edge extraction from satellite image series.
#[derive(Parser)]
#[command(name = "vegedge", version)]
struct Cli {
    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract edges from every scene of a manifest.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Manifest JSON listing each satellite's scene files.
    #[arg(long)]
    manifest: PathBuf,

    /// Reference line JSON.
    #[arg(long)]
    reference: PathBuf,

    /// Vegetation classifier network JSON.
    #[arg(long)]
    classifier: PathBuf,

    /// Sand / swash / water classifier network JSON (needed with --wetdry).
    #[arg(long)]
    shore_classifier: Option<PathBuf>,

    /// CSV of `timestamp,elevation` water levels.
    #[arg(long)]
    tides: Option<PathBuf>,

    /// Merged output JSON.
    #[arg(long)]
    out: PathBuf,

    /// Directory for GeoJSON layers, one per line kind and CRS variant.
    #[arg(long)]
    geojson_dir: Option<PathBuf>,

    /// Review every detection on the terminal.
    #[arg(long)]
    interactive: bool,

    /// Contour tracing algorithm.
    #[arg(long, value_enum, default_value_t = Tracer::MarchingSquares)]
    tracer: Tracer,

    /// Full extraction settings as a JSON string. Individual setting
    /// flags override its values.
    #[arg(long)]
    settings_json: Option<String>,

    #[command(flatten)]
    settings: SettingArgs,
}

/// Contour tracer selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Tracer {
    /// Marching squares with linear interpolation.
    MarchingSquares,
}

impl From<Tracer> for ContourTracerKind {
    fn from(t: Tracer) -> Self {
        match t {
            Tracer::MarchingSquares => Self::MarchingSquares,
        }
    }
}

/// Per-field overrides of [`ExtractionSettings`].
#[derive(Args)]
struct SettingArgs {
    /// Maximum cloud fraction of valid pixels.
    #[arg(long)]
    cloud_thresh: Option<f64>,

    /// Minimum classified patch area in m².
    #[arg(long)]
    min_beach_area: Option<f64>,

    /// Review display radius in metres.
    #[arg(long)]
    buffer_size: Option<f64>,

    /// Half-width of the reference corridor in metres.
    #[arg(long)]
    max_dist_ref: Option<f64>,

    /// Minimum line length in metres.
    #[arg(long)]
    min_length_sl: Option<f64>,

    /// Distance from cloud within which vertices are dropped, in metres.
    #[arg(long)]
    cloud_distance: Option<f64>,

    /// Also extract the wet/dry edge.
    #[arg(long)]
    wetdry: bool,

    /// Accept or skip every detection.
    #[arg(long)]
    check_detection: bool,

    /// Allow replacing the threshold during review.
    #[arg(long)]
    adjust_detection: bool,

    /// EPSG code of the primary output CRS (default: each frame's own).
    #[arg(long)]
    output_epsg: Option<u32>,

    /// EPSG code of the secondary projected CRS.
    #[arg(long)]
    projection_epsg: Option<u32>,

    /// EPSG code of the geographic CRS.
    #[arg(long)]
    ref_epsg: Option<u32>,

    /// Seed for class-sample balancing.
    #[arg(long)]
    seed: Option<u64>,

    /// Process scenes in parallel (not with review).
    #[arg(long)]
    parallel: bool,
}

impl SettingArgs {
    fn apply(&self, mut s: ExtractionSettings) -> ExtractionSettings {
        let set = |target: &mut f64, value: Option<f64>| {
            if let Some(v) = value {
                *target = v;
            }
        };
        set(&mut s.cloud_thresh, self.cloud_thresh);
        set(&mut s.min_beach_area, self.min_beach_area);
        set(&mut s.buffer_size, self.buffer_size);
        set(&mut s.max_dist_ref, self.max_dist_ref);
        set(&mut s.min_length_sl, self.min_length_sl);
        set(&mut s.cloud_distance, self.cloud_distance);
        s.wetdry |= self.wetdry;
        s.check_detection |= self.check_detection;
        s.adjust_detection |= self.adjust_detection;
        s.parallel |= self.parallel;
        if self.output_epsg.is_some() {
            s.output_epsg = self.output_epsg;
        }
        if let Some(epsg) = self.projection_epsg {
            s.projection_epsg = epsg;
        }
        if let Some(epsg) = self.ref_epsg {
            s.ref_epsg = epsg;
        }
        if self.seed.is_some() {
            s.seed = self.seed;
        }
        s
    }
}

/// Build the settings from `--settings-json` and the override flags.
fn settings_from_args(args: &RunArgs) -> Result<ExtractionSettings> {
    let base = match &args.settings_json {
        Some(json) => serde_json::from_str(json).context("parsing --settings-json")?,
        None => ExtractionSettings::default(),
    };
    let settings = args.settings.apply(base);
    settings.validate()?;
    Ok(settings)
}

fn load_classifier(path: &Path) -> Result<MlpClassifier> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading classifier {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("loading classifier {}", path.display()))
}

/// Write one GeoJSON file per line kind and CRS variant.
fn write_geojson(dir: &Path, output: &MergedOutput, settings: &ExtractionSettings) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut kinds = vec![(LineKind::Vegetation, "veglines")];
    if !output.waterlines.is_empty() {
        kinds.push((LineKind::Water, "waterlines"));
    }
    for (kind, stem) in kinds {
        for variant in CrsVariant::ALL {
            let epsg = match variant {
                CrsVariant::Output => settings.output_epsg,
                CrsVariant::LatLon => Some(settings.ref_epsg),
                CrsVariant::Projected => Some(settings.projection_epsg),
            };
            let name = format!("{stem}_{}", variant.name());
            let meta = GeoJsonMetadata {
                name: Some(name.as_str()),
                epsg,
            };
            let path = dir.join(format!("{name}.geojson"));
            let text = to_geojson(output, variant, kind, &meta)?;
            fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "geojson written");
        }
    }
    Ok(())
}

fn run(args: &RunArgs) -> Result<()> {
    let settings = settings_from_args(args)?;
    let reference = load_reference(&args.reference)?;
    let vegetation = load_classifier(&args.classifier)?;
    let shoreline = args
        .shore_classifier
        .as_deref()
        .map(load_classifier)
        .transpose()?;
    let tides = args.tides.as_deref().map(load_tides).transpose()?;
    let manifest = Manifest::load(&args.manifest)?;

    let classifiers = Classifiers {
        vegetation: &vegetation,
        shoreline: shoreline.as_ref().map(|c| c as &dyn Classifier),
    };
    let mut batch =
        Batch::new(&settings, &reference, classifiers)?.with_tracer(args.tracer.into());
    if let Some(tides) = &tides {
        batch = batch.with_water_levels(tides);
    }

    let mut reviewer: Box<dyn ThresholdReviewer> = if args.interactive {
        Box::new(TerminalReviewer::new(io::stdin().lock(), io::stderr()))
    } else {
        Box::new(AutoAccept)
    };
    let output = batch.run(&manifest, reviewer.as_mut())?;

    let mut store = JsonFileStore::new(args.out.clone());
    store.save(&output.merged)?;
    tracing::info!(
        path = %args.out.display(),
        entries = output.merged.len(),
        "merged output written"
    );
    if let Some(dir) = &args.geojson_dir {
        write_geojson(dir, &output.merged, &settings)?;
    }

    let summary = &output.summary;
    println!(
        "{} scenes: {} kept ({} without an edge), {} skipped",
        summary.scenes,
        summary.kept,
        summary.empty,
        summary.skipped_total()
    );
    for (reason, count) in &summary.skipped {
        println!("  {count:>5}  {reason}");
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Command::Run(args) => run(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use vegedge_pipeline::PipelineError;

    use super::*;

    fn parse(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "vegedge",
            "run",
            "--manifest",
            "m.json",
            "--reference",
            "r.json",
            "--classifier",
            "c.json",
            "--out",
            "o.json",
        ];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Run(args) => args,
        }
    }

    #[test]
    fn flags_override_settings_json() {
        let args = parse(&[
            "--settings-json",
            r#"{"cloud_thresh": 0.25, "min_length_sl": 300.0}"#,
            "--min-length-sl",
            "800",
            "--output-epsg",
            "27700",
            "--wetdry",
        ]);
        let s = settings_from_args(&args).unwrap();
        assert!((s.cloud_thresh - 0.25).abs() < f64::EPSILON);
        assert!((s.min_length_sl - 800.0).abs() < f64::EPSILON);
        assert_eq!(s.output_epsg, Some(27700));
        assert!(s.wetdry);
        assert_eq!(s.ref_epsg, ExtractionSettings::DEFAULT_REF_EPSG);
    }

    #[test]
    fn tracer_flag_selects_kind() {
        assert_eq!(parse(&[]).tracer, Tracer::MarchingSquares);
        let args = parse(&["--tracer", "marching-squares"]);
        assert_eq!(
            ContourTracerKind::from(args.tracer),
            ContourTracerKind::MarchingSquares
        );
        let argv = [
            "vegedge",
            "run",
            "--manifest",
            "m",
            "--reference",
            "r",
            "--classifier",
            "c",
            "--out",
            "o",
            "--tracer",
            "bogus",
        ];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn invalid_combination_is_reported() {
        let args = parse(&["--parallel", "--check-detection"]);
        let err = settings_from_args(&args).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_settings_json_is_reported() {
        let args = parse(&["--settings-json", "{"]);
        let err = settings_from_args(&args).unwrap_err();
        assert!(format!("{err:#}").contains("--settings-json"));
    }

    #[test]
    fn missing_classifier_names_file() {
        let err = load_classifier(Path::new("/nonexistent/veg.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/veg.json"));
    }
}
