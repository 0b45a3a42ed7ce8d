use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use crate::domain::DatasetFilename;
use crate::error::MirrorError;
use crate::table::{DatasetRecord, DatasetTable};

/// File extensions the archive lists but this mirror never processes.
///
/// An unparseable filename with any other extension is fatal, which keeps
/// the set of file types the mirror understands fully enumerated.
const IGNORED_EXTENSIONS: [&str; 5] = ["zip", "jp2", "h5", "bin", "fits"];

/// Converts one per-instrument TAP listing into a dataset table.
///
/// The listing is an object with a `metadata` array naming the columns and
/// a `data` array of row tuples.
pub fn listing_to_table(value: &Value) -> Result<DatasetTable, MirrorError> {
    let root = value
        .as_object()
        .ok_or_else(|| MirrorError::Protocol("listing root is not a JSON object".to_string()))?;
    let metadata = root
        .get("metadata")
        .and_then(Value::as_array)
        .ok_or_else(|| MirrorError::Protocol("listing has no metadata array".to_string()))?;
    let data = root
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| MirrorError::Protocol("listing has no data array".to_string()))?;

    let names: Vec<&str> = metadata
        .iter()
        .map(|descriptor| {
            descriptor
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| MirrorError::Protocol("unnamed listing column".to_string()))
        })
        .collect::<Result<_, _>>()?;
    let column = |name: &str| -> Result<usize, MirrorError> {
        names
            .iter()
            .position(|candidate| *candidate == name)
            .ok_or_else(|| MirrorError::Protocol(format!("listing lacks column {name}")))
    };

    let col_file_name = column("file_name")?;
    let col_file_size = column("file_size")?;
    let col_item_id = column("item_id")?;
    let col_item_version = column("item_version")?;
    let col_instrument = column("instrument")?;
    let col_processing_level = column("processing_level")?;
    let col_data_type = column("data_type")?;
    let col_begin_time = column("begin_time")?;
    let col_archived_on = column("archived_on")?;

    let mut table = DatasetTable::new();
    for row in data {
        let cells = row
            .as_array()
            .filter(|cells| cells.len() == names.len())
            .ok_or_else(|| MirrorError::Protocol("malformed listing row".to_string()))?;

        let file_name = cell_string(&cells[col_file_name])?;
        let record = DatasetRecord {
            begin_time_fn: begin_time_from_filename(&file_name)?,
            file_name,
            item_id: cell_string(&cells[col_item_id])?,
            item_version: cell_version(&cells[col_item_version])?,
            file_size: cell_i64(&cells[col_file_size])?,
            instrument: cell_string(&cells[col_instrument])?,
            processing_level: match &cells[col_processing_level] {
                Value::Null => "n/a".to_string(),
                other => cell_string(other)?,
            },
            begin_time: cell_millis(&cells[col_begin_time])?,
            archived_on: cell_millis(&cells[col_archived_on])?,
            data_type: cell_string(&cells[col_data_type])?,
            file_path: None,
        };
        table.push(record);
    }
    Ok(table)
}

fn begin_time_from_filename(file_name: &str) -> Result<Option<DateTime<Utc>>, MirrorError> {
    match DatasetFilename::parse(file_name) {
        Some(parsed) => Ok(parsed.begin_time()),
        None => {
            let extension = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
            if IGNORED_EXTENSIONS.contains(&extension.to_lowercase().as_str()) {
                debug!(file_name, "listing row with ignored extension");
                Ok(None)
            } else {
                Err(MirrorError::InvalidFilename(file_name.to_string()))
            }
        }
    }
}

fn cell_string(value: &Value) -> Result<String, MirrorError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(MirrorError::Protocol(format!(
            "expected string cell, got {other}"
        ))),
    }
}

fn cell_i64(value: &Value) -> Result<i64, MirrorError> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| MirrorError::Protocol(format!("non-integer cell {number}"))),
        Value::String(text) => text
            .parse()
            .map_err(|_| MirrorError::Protocol(format!("non-integer cell {text}"))),
        other => Err(MirrorError::Protocol(format!(
            "expected integer cell, got {other}"
        ))),
    }
}

/// `V<NN>` with the leading `V` required.
fn cell_version(value: &Value) -> Result<i64, MirrorError> {
    let text = cell_string(value)?;
    let digits = text
        .strip_prefix('V')
        .ok_or_else(|| MirrorError::Protocol(format!("item version without V prefix: {text}")))?;
    digits
        .parse()
        .map_err(|_| MirrorError::Protocol(format!("non-numeric item version: {text}")))
}

/// Millisecond epoch timestamps; JSON null and the literal string "null"
/// both mean not-a-time.
fn cell_millis(value: &Value) -> Result<Option<DateTime<Utc>>, MirrorError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text == "null" => Ok(None),
        Value::String(text) => {
            let millis: i64 = text
                .parse()
                .map_err(|_| MirrorError::Protocol(format!("non-numeric timestamp: {text}")))?;
            millis_to_datetime(millis)
        }
        Value::Number(number) => {
            let millis = number
                .as_i64()
                .ok_or_else(|| MirrorError::Protocol(format!("non-integer timestamp {number}")))?;
            millis_to_datetime(millis)
        }
        other => Err(MirrorError::Protocol(format!(
            "expected timestamp cell, got {other}"
        ))),
    }
}

fn millis_to_datetime(millis: i64) -> Result<Option<DateTime<Utc>>, MirrorError> {
    match Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(datetime) => Ok(Some(datetime)),
        _ => Err(MirrorError::Protocol(format!(
            "timestamp out of range: {millis}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn listing(rows: Value) -> Value {
        json!({
            "metadata": [
                {"name": "archived_on"},
                {"name": "begin_time"},
                {"name": "data_type"},
                {"name": "file_name"},
                {"name": "file_size"},
                {"name": "instrument"},
                {"name": "item_id"},
                {"name": "item_version"},
                {"name": "processing_level"},
            ],
            "data": rows,
        })
    }

    #[test]
    fn converts_rows_with_coercions() {
        let value = listing(json!([[
            1597276800000i64,
            "null",
            "EPD",
            "solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf",
            100000,
            "EPD",
            "solo_L1_epd-sis-a-rates-slow_20200813",
            "V02",
            null,
        ]]));
        let table = listing_to_table(&value).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.file_sizes(), [100000]);
        assert_eq!(table.item_versions(), [2]);
        assert_eq!(table.processing_levels(), ["n/a"]);
        assert!(table.begin_times()[0].is_none());
        assert!(table.archived_on()[0].is_some());
        let begin_fn = table.begin_times_fn()[0].unwrap();
        assert_eq!(begin_fn.to_rfc3339(), "2020-08-13T00:00:00+00:00");
    }

    #[test]
    fn version_requires_v_prefix() {
        let value = listing(json!([[
            null,
            null,
            "EPD",
            "solo_L1_epd-sis-a-rates-slow_20200813_V02.cdf",
            100000,
            "EPD",
            "solo_L1_epd-sis-a-rates-slow_20200813",
            "02",
            "L1",
        ]]));
        let err = listing_to_table(&value).unwrap_err();
        assert_matches!(err, MirrorError::Protocol(_));
    }

    #[test]
    fn ignored_extension_rows_survive_without_begin_time() {
        let value = listing(json!([[
            null,
            null,
            "EUI",
            "solo_eui_fsi174_20200813T000000_V01.jp2",
            2048,
            "EUI",
            "solo_eui_fsi174_20200813T000000",
            "V01",
            "L1",
        ]]));
        let table = listing_to_table(&value).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.begin_times_fn()[0].is_none());
    }

    #[test]
    fn unknown_level_rows_do_not_abort_the_conversion() {
        let value = listing(json!([[
            null,
            null,
            "SWA",
            "solo_L0_swa-eas_20200813_V01.cdf",
            4096,
            "SWA",
            "solo_L0_swa-eas_20200813",
            "V01",
            "L0",
        ]]));
        let table = listing_to_table(&value).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.begin_times_fn()[0].is_some());
    }

    #[test]
    fn unknown_extension_is_fatal() {
        let value = listing(json!([[
            null,
            null,
            "EPD",
            "garbage.dat",
            1,
            "EPD",
            "garbage",
            "V01",
            "L1",
        ]]));
        let err = listing_to_table(&value).unwrap_err();
        assert_matches!(err, MirrorError::InvalidFilename(_));
    }

    #[test]
    fn missing_column_is_protocol_error() {
        let value = json!({"metadata": [{"name": "file_name"}], "data": []});
        let err = listing_to_table(&value).unwrap_err();
        assert_matches!(err, MirrorError::Protocol(_));
    }
}
