use anyhow::{bail, Context};
use fphocore::recording::{ColumnKey, RawRecording};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::workflow::config::ColumnLayout;

/// Reads a headerless delimited recording from `path`.
pub fn read_recording<P: AsRef<Path>>(
    path: P,
    layout: &ColumnLayout,
    delimiter: char,
) -> anyhow::Result<RawRecording> {
    let path_ref = path.as_ref();
    let file = File::open(path_ref)
        .with_context(|| format!("opening recording {}", path_ref.display()))?;
    read_from(file, layout, delimiter)
        .with_context(|| format!("reading recording {}", path_ref.display()))
}

/// Parses rows from any reader using the column layout.
///
/// Runs of a whitespace delimiter count as one separator.
pub fn read_from<R: Read>(
    source: R,
    layout: &ColumnLayout,
    delimiter: char,
) -> anyhow::Result<RawRecording> {
    if !delimiter.is_ascii() {
        bail!("delimiter {:?} is not a single ASCII character", delimiter);
    }
    let collapse = delimiter.is_ascii_whitespace();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let width = layout.width();
    let mut time = Vec::new();
    let mut columns: BTreeMap<ColumnKey, Vec<f64>> = layout
        .columns
        .iter()
        .map(|spec| (spec.key(), Vec::new()))
        .collect();

    for (row, record) in reader.records().enumerate() {
        let line = row + 1;
        let record = record.with_context(|| format!("row {}", line))?;
        let fields: Vec<&str> = record
            .iter()
            .filter(|field| !collapse || !field.is_empty())
            .collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < width {
            bail!(
                "row {} has {} fields but the layout needs {}",
                line,
                fields.len(),
                width
            );
        }

        time.push(parse_field(fields[layout.time_index], line, layout.time_index)?);
        for spec in &layout.columns {
            let value = parse_field(fields[spec.index], line, spec.index)?;
            if let Some(column) = columns.get_mut(&spec.key()) {
                column.push(value);
            }
        }
    }

    log::debug!("read {} rows across {} columns", time.len(), columns.len());
    Ok(RawRecording::new(time, columns)?)
}

fn parse_field(field: &str, line: usize, index: usize) -> anyhow::Result<f64> {
    field
        .parse::<f64>()
        .with_context(|| format!("row {} column {}: {:?} is not a number", line, index, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fphocore::recording::SensorChannel;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_space_delimited_rows() {
        let data = "0.00 1 10.5 20.5\n0.02  2  11.0   21.0\n\n0.04 3 12.0 22.0\n";
        let recording = read_from(data.as_bytes(), &ColumnLayout::for_fibers(1), ' ').unwrap();
        assert_eq!(recording.time(), &[0.0, 0.02, 0.04]);
        assert_eq!(
            recording.column(ColumnKey::new(1, SensorChannel::Red)).unwrap(),
            &[10.5, 11.0, 12.0]
        );
        assert_eq!(
            recording.column(ColumnKey::new(1, SensorChannel::Green)).unwrap(),
            &[20.5, 21.0, 22.0]
        );
    }

    #[test]
    fn reads_comma_delimited_file() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"0.0,0,1.0,2.0,3.0,4.0\n0.1,1,1.5,2.5,3.5,4.5\n")
            .unwrap();
        let path = temp.into_temp_path();
        let recording = read_recording(&path, &ColumnLayout::for_fibers(2), ',').unwrap();
        assert_eq!(recording.len(), 2);
        assert_eq!(
            recording.column(ColumnKey::new(2, SensorChannel::Green)).unwrap(),
            &[4.0, 4.5]
        );
    }

    #[test]
    fn rejects_non_numeric_field() {
        let data = "0.0 0 1.0 2.0\n0.1 1 oops 2.5\n";
        let err = read_from(data.as_bytes(), &ColumnLayout::for_fibers(1), ' ').unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("row 2"));
        assert!(message.contains("oops"));
    }

    #[test]
    fn rejects_short_rows() {
        let data = "0.0 0 1.0\n";
        assert!(read_from(data.as_bytes(), &ColumnLayout::for_fibers(1), ' ').is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = read_recording("/nonexistent/session.txt", &ColumnLayout::default(), ' ')
            .unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/session.txt"));
    }
}
