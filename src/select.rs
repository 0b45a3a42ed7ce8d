use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::dsid_of_item_id;
use crate::error::MirrorError;
use crate::table::DatasetTable;

/// Marks, for every distinct item id, the single row with the highest
/// version.
///
/// Two rows sharing an item id and a version are fatal: the archive must
/// not publish such a pair.
pub fn latest_version_mask(table: &DatasetTable) -> Result<Vec<bool>, MirrorError> {
    let mut winners: HashMap<&str, (usize, i64)> = HashMap::new();
    let mut seen: HashSet<(&str, i64)> = HashSet::new();
    for (index, (item_id, version)) in table
        .item_ids()
        .iter()
        .zip(table.item_versions())
        .enumerate()
    {
        // Checked against every row, not just the running maximum.
        if !seen.insert((item_id.as_str(), *version)) {
            return Err(MirrorError::DuplicateItemVersion(format!(
                "{item_id} V{version:02}"
            )));
        }
        match winners.entry(item_id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert((index, *version));
            }
            Entry::Occupied(mut slot) => {
                let best = slot.get_mut();
                if *version > best.1 {
                    *best = (index, *version);
                }
            }
        }
    }
    let mut mask = vec![false; table.len()];
    for (index, _) in winners.into_values() {
        mask[index] = true;
    }
    Ok(mask)
}

/// Row identity for the diff: the `(file_name, file_size)` pair.
///
/// Name-only equality is not sufficient; a size change surfaces as a
/// simultaneous download and removal.
fn identity_set(table: &DatasetTable) -> HashSet<(&str, i64)> {
    table
        .file_names()
        .iter()
        .zip(table.file_sizes())
        .map(|(name, size)| (name.as_str(), *size))
        .collect()
}

/// Returns `(only_in_a, only_in_b)` boolean masks.
///
/// Duplicates within one side are permitted; every duplicate is marked
/// present iff any row on the other side matches.
pub fn diff_masks(a: &DatasetTable, b: &DatasetTable) -> (Vec<bool>, Vec<bool>) {
    let in_a = identity_set(a);
    let in_b = identity_set(b);
    let only_in_a = a
        .file_names()
        .iter()
        .zip(a.file_sizes())
        .map(|(name, size)| !in_b.contains(&(name.as_str(), *size)))
        .collect();
    let only_in_b = b
        .file_names()
        .iter()
        .zip(b.file_sizes())
        .map(|(name, size)| !in_a.contains(&(name.as_str(), *size)))
        .collect();
    (only_in_a, only_in_b)
}

/// Row view handed to the user predicate.
#[derive(Debug, Clone, Copy)]
pub struct SubsetRow<'a> {
    pub instrument: &'a str,
    pub level: &'a str,
    pub begin_time: Option<DateTime<Utc>>,
    pub dsid: &'a str,
}

/// User predicate selecting which datasets belong to the mirror.
pub type SubsetPredicate = dyn Fn(&SubsetRow<'_>) -> bool + Send + Sync;

/// Applies the predicate row-wise. The DSID is derived from the item id.
///
/// Rows whose item id yields no DSID, such as quicklook images the listing
/// carries alongside the datasets, are excluded without consulting the
/// predicate.
pub fn subset_mask(table: &DatasetTable, predicate: &SubsetPredicate) -> Vec<bool> {
    let mut mask = Vec::with_capacity(table.len());
    for index in 0..table.len() {
        let item_id = &table.item_ids()[index];
        let Ok(dsid) = dsid_of_item_id(item_id) else {
            debug!(item_id, "item id without a dataset identifier");
            mask.push(false);
            continue;
        };
        let dsid = dsid.to_string();
        let row = SubsetRow {
            instrument: &table.instruments()[index],
            level: &table.processing_levels()[index],
            begin_time: table.begin_times()[index].or(table.begin_times_fn()[index]),
            dsid: &dsid,
        };
        mask.push(predicate(&row));
    }
    mask
}
