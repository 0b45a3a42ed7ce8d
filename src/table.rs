use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};

/// One dataset row, as produced by the local scanner or the listing
/// converter.
///
/// Columns a variant does not carry stay at their empty values: the scanner
/// leaves `archived_on`, `begin_time` and `data_type` unset, the listing
/// converter leaves `file_path` unset. Keeping every column in every table
/// makes concatenation total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetRecord {
    pub file_name: String,
    pub item_id: String,
    pub item_version: i64,
    pub file_size: i64,
    pub begin_time_fn: Option<DateTime<Utc>>,
    pub instrument: String,
    pub processing_level: String,
    pub begin_time: Option<DateTime<Utc>>,
    pub archived_on: Option<DateTime<Utc>>,
    pub data_type: String,
    pub file_path: Option<Utf8PathBuf>,
}

/// Column-oriented dataset table with a fixed column set.
#[derive(Debug, Clone, Default)]
pub struct DatasetTable {
    file_name: Vec<String>,
    item_id: Vec<String>,
    item_version: Vec<i64>,
    file_size: Vec<i64>,
    begin_time_fn: Vec<Option<DateTime<Utc>>>,
    instrument: Vec<String>,
    processing_level: Vec<String>,
    begin_time: Vec<Option<DateTime<Utc>>>,
    archived_on: Vec<Option<DateTime<Utc>>>,
    data_type: Vec<String>,
    file_path: Vec<Option<Utf8PathBuf>>,
}

impl DatasetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.file_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_name.is_empty()
    }

    pub fn push(&mut self, record: DatasetRecord) {
        self.file_name.push(record.file_name);
        self.item_id.push(record.item_id);
        self.item_version.push(record.item_version);
        self.file_size.push(record.file_size);
        self.begin_time_fn.push(record.begin_time_fn);
        self.instrument.push(record.instrument);
        self.processing_level.push(record.processing_level);
        self.begin_time.push(record.begin_time);
        self.archived_on.push(record.archived_on);
        self.data_type.push(record.data_type);
        self.file_path.push(record.file_path);
    }

    pub fn record(&self, index: usize) -> DatasetRecord {
        DatasetRecord {
            file_name: self.file_name[index].clone(),
            item_id: self.item_id[index].clone(),
            item_version: self.item_version[index],
            file_size: self.file_size[index],
            begin_time_fn: self.begin_time_fn[index],
            instrument: self.instrument[index].clone(),
            processing_level: self.processing_level[index].clone(),
            begin_time: self.begin_time[index],
            archived_on: self.archived_on[index],
            data_type: self.data_type[index].clone(),
            file_path: self.file_path[index].clone(),
        }
    }

    /// New table keeping the rows whose mask entry is true.
    ///
    /// The mask must be exactly one entry per row.
    pub fn filter(&self, mask: &[bool]) -> DatasetTable {
        assert_eq!(mask.len(), self.len(), "mask length must match table length");
        let mut out = DatasetTable::new();
        for (index, keep) in mask.iter().enumerate() {
            if *keep {
                out.push(self.record(index));
            }
        }
        out
    }

    pub fn append(&mut self, other: DatasetTable) {
        self.file_name.extend(other.file_name);
        self.item_id.extend(other.item_id);
        self.item_version.extend(other.item_version);
        self.file_size.extend(other.file_size);
        self.begin_time_fn.extend(other.begin_time_fn);
        self.instrument.extend(other.instrument);
        self.processing_level.extend(other.processing_level);
        self.begin_time.extend(other.begin_time);
        self.archived_on.extend(other.archived_on);
        self.data_type.extend(other.data_type);
        self.file_path.extend(other.file_path);
    }

    pub fn file_names(&self) -> &[String] {
        &self.file_name
    }

    pub fn item_ids(&self) -> &[String] {
        &self.item_id
    }

    pub fn item_versions(&self) -> &[i64] {
        &self.item_version
    }

    pub fn file_sizes(&self) -> &[i64] {
        &self.file_size
    }

    pub fn begin_times_fn(&self) -> &[Option<DateTime<Utc>>] {
        &self.begin_time_fn
    }

    pub fn instruments(&self) -> &[String] {
        &self.instrument
    }

    pub fn processing_levels(&self) -> &[String] {
        &self.processing_level
    }

    pub fn begin_times(&self) -> &[Option<DateTime<Utc>>] {
        &self.begin_time
    }

    pub fn archived_on(&self) -> &[Option<DateTime<Utc>>] {
        &self.archived_on
    }

    pub fn data_types(&self) -> &[String] {
        &self.data_type
    }

    pub fn file_paths(&self) -> &[Option<Utf8PathBuf>] {
        &self.file_path
    }

    pub fn records(&self) -> impl Iterator<Item = DatasetRecord> + '_ {
        (0..self.len()).map(|index| self.record(index))
    }
}

impl FromIterator<DatasetRecord> for DatasetTable {
    fn from_iter<T: IntoIterator<Item = DatasetRecord>>(iter: T) -> Self {
        let mut table = DatasetTable::new();
        for record in iter {
            table.push(record);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, size: i64) -> DatasetRecord {
        DatasetRecord {
            file_name: name.to_string(),
            file_size: size,
            ..DatasetRecord::default()
        }
    }

    #[test]
    fn filter_keeps_marked_rows() {
        let table: DatasetTable = [row("a.cdf", 1), row("b.cdf", 2), row("c.cdf", 3)]
            .into_iter()
            .collect();
        let filtered = table.filter(&[true, false, true]);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.file_names(), ["a.cdf", "c.cdf"]);
        assert_eq!(filtered.file_sizes(), [1, 3]);
    }

    #[test]
    fn append_concatenates_columns() {
        let mut table: DatasetTable = [row("a.cdf", 1)].into_iter().collect();
        let other: DatasetTable = [row("b.cdf", 2)].into_iter().collect();
        table.append(other);
        assert_eq!(table.len(), 2);
        assert_eq!(table.file_names(), ["a.cdf", "b.cdf"]);
    }

    #[test]
    #[should_panic(expected = "mask length")]
    fn filter_rejects_short_mask() {
        let table: DatasetTable = [row("a.cdf", 1)].into_iter().collect();
        let _ = table.filter(&[]);
    }

    #[test]
    fn round_trips_records() {
        let record = row("a.cdf", 7);
        let table: DatasetTable = [record.clone()].into_iter().collect();
        assert_eq!(table.record(0), record);
    }
}
