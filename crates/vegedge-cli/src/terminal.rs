//! Operator review on a terminal.
//!
//! Each detection is summarized on the output stream and one decision is
//! read per line from the input stream:
//!
//! ```text
//! <enter> | a    accept
//! s              skip this image
//! q              abort the run
//! <number>       retrace at this threshold
//! ```
//!
//! End of input aborts the run.

use std::io::{BufRead, Write};

use vegedge_pipeline::{DetectionReview, ReviewDecision, ThresholdReviewer};

/// Interpret one line of operator input.
fn parse_decision(line: &str) -> Option<ReviewDecision> {
    match line.trim() {
        "" | "a" | "accept" => Some(ReviewDecision::Accept),
        "s" | "skip" => Some(ReviewDecision::Skip),
        "q" | "quit" | "abort" => Some(ReviewDecision::Abort),
        other => other.parse().ok().map(ReviewDecision::Adjust),
    }
}

/// Reviewer reading decisions from `input` and prompting on `output`.
pub struct TerminalReviewer<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalReviewer<R, W> {
    /// Review on the given streams.
    pub const fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, review: &DetectionReview<'_>) -> std::io::Result<()> {
        let (weak, strong) = (review.samples.weak.len(), review.samples.strong.len());
        writeln!(
            self.output,
            "{} #{} {} ({})",
            review.satellite,
            review.index,
            review.filename,
            review.acquired.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(
            self.output,
            "  threshold {:.3} from {weak} vegetation / {strong} bare samples, {} line part(s), view radius {} m",
            review.threshold,
            review.line.part_count(),
            review.buffer_size
        )?;
        let choices = if review.adjustable {
            "[a]ccept, [s]kip, [q]uit or a new threshold"
        } else {
            "[a]ccept, [s]kip or [q]uit"
        };
        write!(self.output, "  {choices}: ")?;
        self.output.flush()
    }
}

impl<R: BufRead, W: Write> ThresholdReviewer for TerminalReviewer<R, W> {
    fn review(&mut self, review: &DetectionReview<'_>) -> ReviewDecision {
        loop {
            if let Err(e) = self.prompt(review) {
                tracing::error!(error = %e, "cannot prompt operator");
                return ReviewDecision::Abort;
            }
            let mut line = String::new();
            match self.input.read_line(&mut line) {
                Ok(0) => {
                    tracing::warn!("operator input closed, aborting");
                    return ReviewDecision::Abort;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "cannot read operator input");
                    return ReviewDecision::Abort;
                }
            }
            match parse_decision(&line) {
                Some(decision) => return decision,
                None => {
                    let _ = writeln!(self.output, "  unrecognized input {:?}", line.trim());
                }
            }
        }
    }
}
