//! Map clustering and the unlocated tray.
//!
//! Everything here is a pure function of a snapshot of records, recomputed on
//! every read.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::photo::PhotoRecord;

pub const TRAY_ANALYZING: &str = "Analyzing";
pub const TRAY_UNMAPPED: &str = "Unmapped";

/// Records sharing one rounded coordinate pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoCluster {
    pub key: String,
    /// Coordinates of the first member.
    pub latitude: f64,
    pub longitude: f64,
    /// Location name of the first member.
    pub location_name: String,
    pub count: usize,
    pub photo_ids: Vec<String>,
    pub is_processing: bool,
}

/// Unlocated records sharing a tray label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrayGroup {
    pub label: String,
    pub count: usize,
    pub photo_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterOverview {
    pub clusters: Vec<PhotoCluster>,
    pub tray: Vec<TrayGroup>,
}

/// A record is located when both coordinates are finite and it is not at `(0, 0)`.
pub fn is_located(record: &PhotoRecord) -> bool {
    record.latitude.is_finite()
        && record.longitude.is_finite()
        && !(record.latitude == 0.0 && record.longitude == 0.0)
}

/// Splits records into `(located, unlocated)`, keeping input order in both.
pub fn partition(records: &[PhotoRecord]) -> (Vec<&PhotoRecord>, Vec<&PhotoRecord>) {
    records.iter().partition(|record| is_located(record))
}

/// Grouping key: both coordinates rounded to 6 decimal places.
pub fn cluster_key(latitude: f64, longitude: f64) -> String {
    format!("{},{}", round_coordinate(latitude), round_coordinate(longitude))
}

fn round_coordinate(value: f64) -> String {
    // Adding 0.0 folds -0.0 into 0.0 so both land in the same cluster.
    let rounded = (value * 1e6).round() / 1e6 + 0.0;
    format!("{rounded:.6}")
}

/// Clusters located records, in order of each cluster's first member.
/// Unlocated records are skipped.
pub fn cluster<'a>(records: impl IntoIterator<Item = &'a PhotoRecord>) -> Vec<PhotoCluster> {
    let mut clusters: Vec<PhotoCluster> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records.into_iter().filter(|r| is_located(r)) {
        let key = cluster_key(record.latitude, record.longitude);
        match index.get(&key) {
            Some(&i) => {
                let existing = &mut clusters[i];
                existing.count += 1;
                existing.photo_ids.push(record.id.clone());
                existing.is_processing |= record.is_processing();
            }
            None => {
                index.insert(key.clone(), clusters.len());
                clusters.push(PhotoCluster {
                    key,
                    latitude: record.latitude,
                    longitude: record.longitude,
                    location_name: record.location_name.clone(),
                    count: 1,
                    photo_ids: vec![record.id.clone()],
                    is_processing: record.is_processing(),
                });
            }
        }
    }
    clusters
}

/// Ids of the located records currently under `key`.
pub fn cluster_members(records: &[PhotoRecord], key: &str) -> Vec<String> {
    records
        .iter()
        .filter(|r| is_located(r) && cluster_key(r.latitude, r.longitude) == key)
        .map(|r| r.id.clone())
        .collect()
}

fn tray_label(record: &PhotoRecord) -> String {
    if record.is_processing() {
        return TRAY_ANALYZING.to_string();
    }
    record
        .country
        .clone()
        .unwrap_or_else(|| TRAY_UNMAPPED.to_string())
}

/// Groups unlocated records for the tray, in order of first appearance.
/// Located records are skipped.
pub fn tray_groups<'a>(records: impl IntoIterator<Item = &'a PhotoRecord>) -> Vec<TrayGroup> {
    let mut groups: Vec<TrayGroup> = Vec::new();

    for record in records.into_iter().filter(|r| !is_located(r)) {
        let label = tray_label(record);
        match groups.iter_mut().find(|g| g.label == label) {
            Some(group) => {
                group.count += 1;
                group.photo_ids.push(record.id.clone());
            }
            None => groups.push(TrayGroup {
                label,
                count: 1,
                photo_ids: vec![record.id.clone()],
            }),
        }
    }
    groups
}

pub fn overview(records: &[PhotoRecord]) -> ClusterOverview {
    let (located, unlocated) = partition(records);
    ClusterOverview {
        clusters: cluster(located),
        tray: tray_groups(unlocated),
    }
}
