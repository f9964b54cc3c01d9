//! Aggregation of voxel-wise statistical maps into one value per atlas region.

use ndarray::Zip;
use tracing::debug;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::volume::{check_same_grid, Volume, BACKGROUND_LABEL};


/// The aggregated value of one atlas region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParcelValue {
    pub label: i32,
    /// Mean of the map over all voxels of the region.
    pub value: f64,
    pub voxel_count: usize,
}

impl fmt::Display for ParcelValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Region {} with {} voxels: {:.3}", self.label, self.voxel_count, self.value)
    }
}


/// Compute the mean of `map` within every non-background label of `atlas`.
///
/// The map must already be sampled on the atlas grid. NaN voxels of the map are ignored. The result
/// is sorted by label. A region whose voxels are all NaN gets the value 0.
pub fn parcellate(atlas: &Volume, map: &Volume) -> Result<Vec<ParcelValue>> {
    check_same_grid(atlas, map)?;

    let mut sums: BTreeMap<i32, (f64, usize, usize)> = BTreeMap::new();
    Zip::from(&atlas.data).and(&map.data).for_each(|&label, &value| {
        let label = label.round() as i32;
        if label == BACKGROUND_LABEL {
            return;
        }
        let entry = sums.entry(label).or_insert((0.0, 0, 0));
        entry.2 += 1;
        if !value.is_nan() {
            entry.0 += value as f64;
            entry.1 += 1;
        }
    });

    let parcels: Vec<ParcelValue> = sums.into_iter()
        .map(|(label, (sum, finite, voxel_count))| ParcelValue {
            label,
            value: if finite > 0 { sum / finite as f64 } else { 0.0 },
            voxel_count,
        })
        .collect();
    debug!("Parcellated map into {} regions", parcels.len());
    Ok(parcels)
}
