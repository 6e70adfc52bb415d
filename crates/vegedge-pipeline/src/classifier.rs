//! Pixel classification: features in, per-class boolean planes out.
//!
//! The model itself is a black box behind the [`Classifier`] trait. The
//! crate ships one implementation, [`MlpClassifier`], a dense feed-forward
//! network deserialized from an exported artifact.
//!
//! # Strategy pattern
//!
//! [`ClassScheme`] fixes the feature layout and the meaning of each label,
//! so a vegetation model and a shoreline model plug into the same
//! [`classify`] adapter.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::features::{FeatureMatrix, FeatureSet};
use crate::morphology::{count_set, remove_small_objects};
use crate::types::{MASK_SET, Mask, PipelineError, RasterFrame};

/// Minimum share of all pixels each of the two dominant classes must hold.
pub const MIN_CLASS_FRACTION: f64 = 0.05;

/// Label layout of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassScheme {
    /// Label 1 = vegetation (plane 0), label 2 = non-vegetation (plane 1).
    Vegetation,
    /// Label 1 = sand (plane 0), 2 = swash (plane 1), 3 = water (plane 2).
    /// Label 0 (other land cover) has no plane.
    Shoreline,
}

impl ClassScheme {
    /// Number of class planes.
    #[must_use]
    pub const fn class_count(self) -> usize {
        match self {
            Self::Vegetation => 2,
            Self::Shoreline => 3,
        }
    }

    /// Feature layout the scheme's models are trained on.
    #[must_use]
    pub const fn feature_set(self) -> FeatureSet {
        match self {
            Self::Vegetation => FeatureSet::Vegetation,
            Self::Shoreline => FeatureSet::Shoreline,
        }
    }

    /// Plane index of a predicted label, if the label has one.
    #[must_use]
    pub fn plane_of(self, label: u8) -> Option<usize> {
        let plane = usize::from(label).checked_sub(1)?;
        (plane < self.class_count()).then_some(plane)
    }
}

/// Contract every pixel classifier satisfies.
pub trait Classifier: Send + Sync {
    /// Label layout produced by [`predict`](Self::predict).
    fn scheme(&self) -> ClassScheme;

    /// Width of the feature vectors the model expects.
    fn feature_count(&self) -> usize;

    /// Predict one label per feature row.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Classifier`] when the model cannot be
    /// evaluated on `features`.
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<u8>, PipelineError>;
}

/// One boolean plane per class, mutually exclusive, small patches removed.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    scheme: ClassScheme,
    planes: Vec<Mask>,
}

impl ClassLabels {
    /// Wrap precomputed planes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Classifier`] if the plane count does not
    /// match the scheme.
    pub fn new(scheme: ClassScheme, planes: Vec<Mask>) -> Result<Self, PipelineError> {
        if planes.len() != scheme.class_count() {
            return Err(PipelineError::Classifier(format!(
                "{scheme:?} labels need {} planes, got {}",
                scheme.class_count(),
                planes.len()
            )));
        }
        Ok(Self { scheme, planes })
    }

    /// Label layout.
    #[must_use]
    pub const fn scheme(&self) -> ClassScheme {
        self.scheme
    }

    /// The plane of class `i`.
    #[must_use]
    pub fn plane(&self, i: usize) -> &Mask {
        &self.planes[i]
    }

    /// All planes in label order.
    #[must_use]
    pub fn planes(&self) -> &[Mask] {
        &self.planes
    }

    /// Share of all pixels held by class `i`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self, i: usize) -> f64 {
        let total = self.planes[i].as_raw().len();
        if total == 0 {
            return 0.0;
        }
        count_set(&self.planes[i]) as f64 / total as f64
    }

    /// Whether the first two classes each reach [`MIN_CLASS_FRACTION`].
    #[must_use]
    pub fn has_variety(&self) -> bool {
        self.fraction(0) >= MIN_CLASS_FRACTION && self.fraction(1) >= MIN_CLASS_FRACTION
    }
}

/// Classify every valid pixel of a frame.
///
/// Cloudy and undefined pixels get no label. Connected patches smaller
/// than `min_area_pixels` are removed from every plane.
///
/// # Errors
///
/// Returns [`PipelineError::InsufficientBands`] for frames with too few
/// bands and [`PipelineError::Classifier`] when the model's feature width
/// does not match the frame or it returns the wrong number of labels.
pub fn classify(
    frame: &RasterFrame,
    classifier: &dyn Classifier,
    min_area_pixels: usize,
) -> Result<ClassLabels, PipelineError> {
    let scheme = classifier.scheme();
    let features = scheme.feature_set().compute(frame)?;
    if features.cols() != classifier.feature_count() {
        return Err(PipelineError::Classifier(format!(
            "model expects {} features, {}-band frame yields {}",
            classifier.feature_count(),
            frame.band_count(),
            features.cols()
        )));
    }

    let labels = classifier.predict(&features)?;
    if labels.len() != features.rows() {
        return Err(PipelineError::Classifier(format!(
            "model returned {} labels for {} pixels",
            labels.len(),
            features.rows()
        )));
    }

    let dims = frame.dimensions();
    let mut planes = vec![Mask::new(dims.width, dims.height); scheme.class_count()];
    for (row, &label) in labels.iter().enumerate() {
        if let Some(plane) = scheme.plane_of(label) {
            let raw: &mut [u8] = &mut planes[plane];
            raw[features.pixel(row)] = MASK_SET;
        }
    }
    let planes = planes
        .iter()
        .map(|p| remove_small_objects(p, min_area_pixels))
        .collect();

    tracing::debug!(
        pixels = features.rows(),
        min_area_pixels,
        ?scheme,
        "classified frame"
    );
    ClassLabels::new(scheme, planes)
}

// ── Dense network artifact ───────────────────────────────────────────────

/// One fully connected layer: `out = in · weights + biases`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// `weights[i][j]` connects input `i` to output `j`.
    pub weights: Vec<Vec<f32>>,
    /// One bias per output.
    pub biases: Vec<f32>,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.len()
    }

    fn outputs(&self) -> usize {
        self.biases.len()
    }

    fn forward(&self, input: &[f32], relu: bool) -> Vec<f32> {
        let mut out = self.biases.clone();
        for (x, row) in input.iter().zip(&self.weights) {
            for (o, w) in out.iter_mut().zip(row) {
                *o = x.mul_add(*w, *o);
            }
        }
        if relu {
            for o in &mut out {
                *o = o.max(0.0);
            }
        }
        out
    }
}

/// Serialized form of [`MlpClassifier`], validated on conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpArtifact {
    /// Label layout.
    pub scheme: ClassScheme,
    /// Label of each output unit.
    pub classes: Vec<u8>,
    /// Per-feature mean subtracted before the first layer.
    #[serde(default)]
    pub input_mean: Option<Vec<f32>>,
    /// Per-feature scale dividing the centred input.
    #[serde(default)]
    pub input_scale: Option<Vec<f32>>,
    /// Layers, input first. Hidden layers use ReLU.
    pub layers: Vec<DenseLayer>,
}

/// Feed-forward network with ReLU hidden layers.
///
/// The predicted label is the class of the largest output unit. A single
/// output unit with two classes is read as a logistic output: positive
/// activation selects the second class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "MlpArtifact", into = "MlpArtifact")]
pub struct MlpClassifier {
    artifact: MlpArtifact,
}

impl MlpClassifier {
    /// Validate an artifact.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Classifier`] describing the first shape
    /// inconsistency.
    pub fn new(artifact: MlpArtifact) -> Result<Self, PipelineError> {
        let bad = |msg: String| Err(PipelineError::Classifier(msg));
        let Some(first) = artifact.layers.first() else {
            return bad("network has no layers".to_owned());
        };
        let inputs = first.inputs();
        if inputs == 0 {
            return bad("first layer has no inputs".to_owned());
        }
        let mut width = inputs;
        for (i, layer) in artifact.layers.iter().enumerate() {
            if layer.inputs() != width {
                return bad(format!(
                    "layer {i} takes {} inputs but receives {width}",
                    layer.inputs()
                ));
            }
            if layer.weights.iter().any(|row| row.len() != layer.outputs()) {
                return bad(format!("layer {i} weights disagree with its biases"));
            }
            width = layer.outputs();
        }
        let binary_logistic = width == 1 && artifact.classes.len() == 2;
        if width != artifact.classes.len() && !binary_logistic {
            return bad(format!(
                "{width} output units for {} classes",
                artifact.classes.len()
            ));
        }
        if let Some(label) = artifact
            .classes
            .iter()
            .find(|&&l| l != 0 && artifact.scheme.plane_of(l).is_none())
        {
            return bad(format!(
                "label {label} is not part of the {:?} scheme",
                artifact.scheme
            ));
        }
        for (name, v) in [
            ("input_mean", &artifact.input_mean),
            ("input_scale", &artifact.input_scale),
        ] {
            if let Some(v) = v
                && v.len() != inputs
            {
                return bad(format!("{name} has {} entries for {inputs} inputs", v.len()));
            }
        }
        if artifact
            .input_scale
            .as_ref()
            .is_some_and(|s| s.iter().any(|&v| v == 0.0 || !v.is_finite()))
        {
            return bad("input_scale contains zero or non-finite entries".to_owned());
        }
        Ok(Self { artifact })
    }

    fn predict_row(&self, row: &[f32]) -> u8 {
        let a = &self.artifact;
        let mut x: Vec<f32> = row.to_vec();
        if let Some(mean) = &a.input_mean {
            for (v, m) in x.iter_mut().zip(mean) {
                *v -= m;
            }
        }
        if let Some(scale) = &a.input_scale {
            for (v, s) in x.iter_mut().zip(scale) {
                *v /= s;
            }
        }
        let last = a.layers.len() - 1;
        for (i, layer) in a.layers.iter().enumerate() {
            x = layer.forward(&x, i != last);
        }
        if x.len() == 1 {
            return a.classes[usize::from(x[0] > 0.0)];
        }
        let best = x
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(bi, bv), (i, &v)| {
                if v > bv { (i, v) } else { (bi, bv) }
            })
            .0;
        a.classes[best]
    }
}

impl TryFrom<MlpArtifact> for MlpClassifier {
    type Error = PipelineError;

    fn try_from(artifact: MlpArtifact) -> Result<Self, Self::Error> {
        Self::new(artifact)
    }
}

impl From<MlpClassifier> for MlpArtifact {
    fn from(c: MlpClassifier) -> Self {
        c.artifact
    }
}

impl Classifier for MlpClassifier {
    fn scheme(&self) -> ClassScheme {
        self.artifact.scheme
    }

    fn feature_count(&self) -> usize {
        self.artifact.layers.first().map_or(0, DenseLayer::inputs)
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<u8>, PipelineError> {
        if features.rows() > 0 && features.cols() != self.feature_count() {
            return Err(PipelineError::Classifier(format!(
                "expected {} features, got {}",
                self.feature_count(),
                features.cols()
            )));
        }
        Ok((0..features.rows())
            .into_par_iter()
            .map(|i| self.predict_row(features.row(i)))
            .collect())
    }
}
