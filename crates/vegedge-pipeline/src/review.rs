//! Operator review of a detection before it is recorded.
//!
//! When `check_detection` or `adjust_detection` is set, every detection is
//! shown to a [`ThresholdReviewer`], which blocks until it has a decision.
//! Headless runs use [`AutoAccept`].

use chrono::NaiveDateTime;

use crate::line::EdgeLine;
use crate::pipeline::Rejection;
use crate::threshold::ClassSamples;
use crate::types::{PipelineError, SkipReason};

/// What the operator sees for one detection.
#[derive(Debug, Clone, Copy)]
pub struct DetectionReview<'a> {
    /// Satellite the image belongs to.
    pub satellite: &'a str,
    /// Position of the image in the satellite's scene list.
    pub index: usize,
    /// Image file name.
    pub filename: &'a str,
    /// Acquisition time.
    pub acquired: NaiveDateTime,
    /// Threshold the current line was traced at.
    pub threshold: f64,
    /// Class samples the threshold was estimated from.
    pub samples: &'a ClassSamples,
    /// Line traced at `threshold`.
    pub line: &'a EdgeLine,
    /// Whether [`ReviewDecision::Adjust`] will be honoured.
    pub adjustable: bool,
    /// Radius in metres of the area around the line to display.
    pub buffer_size: f64,
}

/// An operator decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReviewDecision {
    /// Keep the detection as shown.
    Accept,
    /// Retrace at another threshold and review again.
    Adjust(f64),
    /// Leave this image out of the record.
    Skip,
    /// Stop the whole run.
    Abort,
}

/// Blocking source of operator decisions.
pub trait ThresholdReviewer {
    /// Decide on one detection.
    fn review(&mut self, review: &DetectionReview<'_>) -> ReviewDecision;
}

/// Accepts every detection unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAccept;

impl ThresholdReviewer for AutoAccept {
    fn review(&mut self, _review: &DetectionReview<'_>) -> ReviewDecision {
        ReviewDecision::Accept
    }
}

/// Run the review loop until the operator accepts, skips or aborts.
///
/// `retrace` rebuilds the line for an adjusted threshold. Adjustments are
/// ignored unless `template.adjustable` is set, and thresholds outside
/// `(-1, 1)` are ignored.
///
/// # Errors
///
/// [`Rejection::Skip`] with [`SkipReason::OperatorSkipped`] on skip,
/// [`Rejection::Fatal`] with [`PipelineError::Cancelled`] on abort.
pub fn settle(
    reviewer: &mut dyn ThresholdReviewer,
    template: DetectionReview<'_>,
    mut retrace: impl FnMut(f64) -> EdgeLine,
) -> Result<(f64, EdgeLine), Rejection> {
    let mut threshold = template.threshold;
    let mut line = template.line.clone();
    loop {
        let decision = reviewer.review(&DetectionReview {
            threshold,
            line: &line,
            ..template
        });
        match decision {
            ReviewDecision::Accept => return Ok((threshold, line)),
            ReviewDecision::Skip => return Err(Rejection::Skip(SkipReason::OperatorSkipped)),
            ReviewDecision::Abort => return Err(Rejection::Fatal(PipelineError::Cancelled)),
            ReviewDecision::Adjust(t) if template.adjustable && t.abs() < 1.0 => {
                tracing::debug!(from = threshold, to = t, "operator adjusted threshold");
                threshold = t;
                line = retrace(t);
            }
            ReviewDecision::Adjust(t) => {
                tracing::warn!(threshold = t, adjustable = template.adjustable, "adjustment ignored");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;

    use chrono::NaiveDate;
    use geo::{LineString, MultiLineString};

    use super::*;

    /// Replays a fixed list of decisions and records the thresholds shown.
    struct Scripted {
        decisions: VecDeque<ReviewDecision>,
        seen: Vec<f64>,
    }

    impl Scripted {
        fn new(decisions: &[ReviewDecision]) -> Self {
            Self {
                decisions: decisions.iter().copied().collect(),
                seen: Vec::new(),
            }
        }
    }

    impl ThresholdReviewer for Scripted {
        fn review(&mut self, review: &DetectionReview<'_>) -> ReviewDecision {
            self.seen.push(review.threshold);
            self.decisions.pop_front().unwrap_or(ReviewDecision::Accept)
        }
    }

    fn line_at(t: f64) -> EdgeLine {
        let ml = MultiLineString::new(vec![LineString::from(vec![(t, 0.0), (t, 1.0)])]);
        EdgeLine {
            output: ml.clone(),
            latlon: ml.clone(),
            projected: ml,
        }
    }

    fn run(
        reviewer: &mut dyn ThresholdReviewer,
        adjustable: bool,
    ) -> Result<(f64, EdgeLine), Rejection> {
        let samples = ClassSamples::default();
        let line = line_at(0.2);
        let template = DetectionReview {
            satellite: "S2",
            index: 0,
            filename: "a.tif",
            acquired: NaiveDate::from_ymd_opt(2021, 3, 4)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            threshold: 0.2,
            samples: &samples,
            line: &line,
            adjustable,
            buffer_size: 250.0,
        };
        settle(reviewer, template, line_at)
    }

    #[test]
    fn auto_accept_keeps_detection() {
        let (t, line) = run(&mut AutoAccept, false).unwrap();
        assert!((t - 0.2).abs() < f64::EPSILON);
        assert_eq!(line, line_at(0.2));
    }

    #[test]
    fn adjustment_retraces_and_re_presents() {
        let mut r = Scripted::new(&[ReviewDecision::Adjust(0.35), ReviewDecision::Accept]);
        let (t, line) = run(&mut r, true).unwrap();
        assert!((t - 0.35).abs() < f64::EPSILON);
        assert_eq!(line, line_at(0.35));
        assert_eq!(r.seen, vec![0.2, 0.35]);
    }

    #[test]
    fn out_of_range_adjustment_is_ignored() {
        let mut r = Scripted::new(&[ReviewDecision::Adjust(1.0), ReviewDecision::Accept]);
        let (t, _) = run(&mut r, true).unwrap();
        assert!((t - 0.2).abs() < f64::EPSILON);
        assert_eq!(r.seen, vec![0.2, 0.2]);
    }

    #[test]
    fn adjustment_needs_adjust_mode() {
        let mut r = Scripted::new(&[ReviewDecision::Adjust(0.1), ReviewDecision::Accept]);
        let (t, _) = run(&mut r, false).unwrap();
        assert!((t - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn skip_and_abort() {
        let mut r = Scripted::new(&[ReviewDecision::Skip]);
        assert!(matches!(
            run(&mut r, true),
            Err(Rejection::Skip(SkipReason::OperatorSkipped))
        ));
        let mut r = Scripted::new(&[ReviewDecision::Abort]);
        assert!(matches!(
            run(&mut r, true),
            Err(Rejection::Fatal(PipelineError::Cancelled))
        ));
    }
}
