//! Columnar JSON: one array per column, one entry per kept image.
//!
//! Lines are nested under their column as objects holding the three
//! coordinate system variants. Dates are `YYYY-MM-DD`, times
//! `HH:MM:SS` with optional fractional seconds.

use vegedge_pipeline::MergedOutput;

use crate::ExportError;

/// Serialize the merged output as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`ExportError::Shape`] when the columns disagree in length.
pub fn to_json(output: &MergedOutput) -> Result<String, ExportError> {
    output.validate()?;
    Ok(serde_json::to_string_pretty(output)?)
}

/// Parse JSON written by [`to_json`].
///
/// # Errors
///
/// Returns [`ExportError::Json`] on malformed input and
/// [`ExportError::Shape`] when the columns disagree in length.
pub fn from_json(text: &str) -> Result<MergedOutput, ExportError> {
    let output: MergedOutput = serde_json::from_str(text)?;
    output.validate()?;
    Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use geo::{LineString, MultiLineString};
    use vegedge_pipeline::EdgeLine;

    use super::*;

    fn one_entry() -> MergedOutput {
        let line = MultiLineString::new(vec![LineString::from(vec![(1.0, 2.0), (3.0, 4.0)])]);
        MergedOutput {
            dates: vec![NaiveDate::from_ymd_opt(2018, 7, 14).unwrap()],
            times: vec![NaiveTime::from_hms_opt(10, 48, 3).unwrap()],
            satname: vec!["L8".to_owned()],
            shorelines: vec![EdgeLine {
                output: line.clone(),
                latlon: line.clone(),
                projected: line,
            }],
            filename: vec!["LC08_20180714.tif".to_owned()],
            cloud_cover: vec![0.125],
            geoaccuracy: vec![Some(5.5)],
            idx: vec![7],
            vthreshold: vec![0.25],
            ..MergedOutput::default()
        }
    }

    #[test]
    fn columns_are_arrays() {
        let text = to_json(&one_entry()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["dates"][0], "2018-07-14");
        assert_eq!(value["times"][0], "10:48:03");
        assert_eq!(value["satname"][0], "L8");
        assert_eq!(value["idx"][0], 7);
        assert!(value["waterlines"].as_array().unwrap().is_empty());
    }

    #[test]
    fn parse_restores_table() {
        let out = one_entry();
        assert_eq!(from_json(&to_json(&out).unwrap()).unwrap(), out);
    }

    #[test]
    fn ragged_table_is_refused() {
        let mut out = one_entry();
        out.idx.push(8);
        assert!(matches!(to_json(&out), Err(ExportError::Shape(_))));

        let text = serde_json::to_string(&out).unwrap();
        assert!(matches!(from_json(&text), Err(ExportError::Shape(_))));
        assert!(matches!(from_json("{"), Err(ExportError::Json(_))));
    }
}
