//! Functions for managing 3D brain volumes stored in NIfTI files.
//!
//! A [`Volume`] holds the voxel values and the affine that maps voxel indices to world (scanner)
//! coordinates. Label volumes (atlases) and statistical maps share this representation; labels are
//! stored as floats, exactly like NIfTI readers hand them out, and rounded when interpreted as ids.

use ndarray::{Array3, ArrayView3, Axis, Ix3, Zip};
use ndarray_stats::QuantileExt;
use nifti::volume::ndarray::IntoNdArray;
use nifti::writer::WriterOptions;
use nifti::{NiftiHeader, NiftiObject, ReaderOptions};
use tracing::debug;

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::Path;

use crate::error::{LightMindedError, Result};
use crate::util::ensure_parent_dir;

/// The label value of voxels that belong to no region.
pub const BACKGROUND_LABEL: i32 = 0;


/// A 4x4 affine transformation from voxel indices to world coordinates, row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(pub [[f64; 4]; 4]);

impl Default for Affine {
    fn default() -> Affine {
        Affine::identity()
    }
}

impl Affine {
    pub fn identity() -> Affine {
        Affine::scaling([1.0, 1.0, 1.0])
    }

    /// A pure voxel size scaling without rotation or translation.
    pub fn scaling(voxel_size: [f64; 3]) -> Affine {
        let mut m = [[0.0; 4]; 4];
        for (idx, size) in voxel_size.iter().enumerate() {
            m[idx][idx] = *size;
        }
        m[3][3] = 1.0;
        Affine(m)
    }

    /// Return a copy of this affine with the translation part replaced.
    pub fn with_translation(mut self, offset: [f64; 3]) -> Affine {
        for (idx, value) in offset.iter().enumerate() {
            self.0[idx][3] = *value;
        }
        self
    }

    /// Compute the affine of a NIfTI header, preferring the sform over the qform and falling back
    /// to the voxel sizes when neither is set.
    pub fn from_header(header: &NiftiHeader) -> Affine {
        if header.sform_code > 0 {
            let rows = [header.srow_x, header.srow_y, header.srow_z];
            let mut m = [[0.0; 4]; 4];
            for (r, row) in rows.iter().enumerate() {
                for c in 0..4 {
                    m[r][c] = row[c] as f64;
                }
            }
            m[3][3] = 1.0;
            Affine(m)
        } else if header.qform_code > 0 {
            Affine::from_quaternion(header)
        } else {
            Affine::scaling([
                header.pixdim[1] as f64,
                header.pixdim[2] as f64,
                header.pixdim[3] as f64,
            ])
        }
    }

    fn from_quaternion(header: &NiftiHeader) -> Affine {
        let (b, c, d) = (header.quatern_b as f64, header.quatern_c as f64, header.quatern_d as f64);
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let (sx, sy, sz) = (header.pixdim[1] as f64, header.pixdim[2] as f64, header.pixdim[3] as f64 * qfac);

        let r = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
        ];
        let scale = [sx, sy, sz];
        let mut m = [[0.0; 4]; 4];
        for row in 0..3 {
            for col in 0..3 {
                m[row][col] = r[row][col] * scale[col];
            }
        }
        m[0][3] = header.quatern_x as f64;
        m[1][3] = header.quatern_y as f64;
        m[2][3] = header.quatern_z as f64;
        m[3][3] = 1.0;
        Affine(m)
    }

    /// Map a (possibly fractional) voxel index to world coordinates.
    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let m = &self.0;
        let mut out = [0.0; 3];
        for (r, value) in out.iter_mut().enumerate() {
            *value = m[r][0] * p[0] + m[r][1] * p[1] + m[r][2] * p[2] + m[r][3];
        }
        out
    }

    /// Matrix product `self * other`.
    pub fn compose(&self, other: &Affine) -> Affine {
        let mut m = [[0.0; 4]; 4];
        for r in 0..4 {
            for c in 0..4 {
                m[r][c] = (0..4).map(|k| self.0[r][k] * other.0[k][c]).sum();
            }
        }
        Affine(m)
    }

    /// The determinant of the linear part. Negative for affines that mirror space, e.g., radiological
    /// (LAS) orientation.
    pub fn determinant(&self) -> f64 {
        let m = &self.0;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Invert the affine. Returns `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Affine> {
        let m = &self.0;
        let det = self.determinant();
        if det.abs() < f64::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let mut inv = [[0.0; 4]; 4];
        inv[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det;
        inv[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det;
        inv[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det;
        inv[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det;
        inv[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det;
        inv[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det;
        inv[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det;
        inv[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det;
        inv[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det;
        for r in 0..3 {
            inv[r][3] = -(inv[r][0] * m[0][3] + inv[r][1] * m[1][3] + inv[r][2] * m[2][3]);
        }
        inv[3][3] = 1.0;
        Some(Affine(inv))
    }

    /// The voxel sizes, i.e., the lengths of the first three columns.
    pub fn voxel_size(&self) -> [f64; 3] {
        let m = &self.0;
        let mut size = [0.0; 3];
        for (c, value) in size.iter_mut().enumerate() {
            *value = (m[0][c] * m[0][c] + m[1][c] * m[1][c] + m[2][c] * m[2][c]).sqrt();
        }
        size
    }
}


/// How to sample a volume at non-integer voxel positions when resampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    /// Trilinear interpolation, for continuous statistical maps.
    Linear,
}


/// A 3D volume with its voxel-to-world affine.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    pub affine: Affine,
}

impl Volume {

    pub fn new(data: Array3<f32>, affine: Affine) -> Volume {
        Volume { data, affine }
    }

    /// Read a volume from a NIfTI file (`.nii` or `.nii.gz`). 4D files are accepted if they contain
    /// a single frame.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Volume> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let affine = Affine::from_header(obj.header());
        let data = obj.into_volume().into_ndarray::<f32>()?;

        let data = match data.ndim() {
            3 => data.into_dimensionality::<Ix3>()?,
            4 if data.shape()[3] == 1 => data.index_axis_move(Axis(3), 0).into_dimensionality::<Ix3>()?,
            n => return Err(LightMindedError::InvalidVolume(format!(
                "expected a 3D volume, got {} dimensions with shape {:?}", n, data.shape()))),
        };
        debug!("Read volume of shape {:?} from '{}'", data.shape(), path.as_ref().display());
        Ok(Volume { data, affine })
    }

    /// Write the volume to a NIfTI file. If the file's name ends with ".gz", it is gzip compressed.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ensure_parent_dir(&path)?;
        let mut header = NiftiHeader::default();
        let m = &self.affine.0;
        header.srow_x = [m[0][0] as f32, m[0][1] as f32, m[0][2] as f32, m[0][3] as f32];
        header.srow_y = [m[1][0] as f32, m[1][1] as f32, m[1][2] as f32, m[1][3] as f32];
        header.srow_z = [m[2][0] as f32, m[2][1] as f32, m[2][2] as f32, m[2][3] as f32];
        header.sform_code = 1;
        header.qform_code = 0;
        let voxel_size = self.affine.voxel_size();
        header.pixdim = [1.0, voxel_size[0] as f32, voxel_size[1] as f32, voxel_size[2] as f32, 1.0, 1.0, 1.0, 1.0];

        WriterOptions::new(path.as_ref())
            .reference_header(&header)
            .write_nifti(&self.data)?;
        Ok(())
    }

    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    /// Interpret the value of a voxel as a label id.
    pub fn label_at(&self, idx: [usize; 3]) -> i32 {
        self.data[idx].round() as i32
    }

    /// The distinct non-background labels, in ascending order.
    pub fn labels(&self) -> Vec<i32> {
        let set: BTreeSet<i32> = self.data.iter()
            .map(|v| v.round() as i32)
            .filter(|l| *l != BACKGROUND_LABEL)
            .collect();
        set.into_iter().collect()
    }

    /// A binary mask volume: 1.0 where the voxel carries `label`, 0.0 elsewhere.
    pub fn mask(&self, label: i32) -> Array3<f32> {
        self.data.mapv(|v| if v.round() as i32 == label { 1.0 } else { 0.0 })
    }

    /// The smallest and largest finite voxel values, or `None` for an empty volume.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        if self.data.is_empty() {
            return None;
        }
        let min = *self.data.min_skipnan();
        let max = *self.data.max_skipnan();
        if min.is_nan() || max.is_nan() {
            None
        } else {
            Some((min, max))
        }
    }

    /// Sample this volume on the voxel grid of `target`. Voxels that fall outside of this volume's
    /// field of view are set to zero.
    pub fn resample_to(&self, target: &Volume, interpolation: Interpolation) -> Result<Volume> {
        self.resample_to_grid(target.shape(), &target.affine, interpolation)
    }

    /// Sample this volume on a voxel grid of the given shape and affine.
    pub fn resample_to_grid(&self, shape: [usize; 3], affine: &Affine, interpolation: Interpolation) -> Result<Volume> {
        let inverse = self.affine.inverse()
            .ok_or_else(|| LightMindedError::InvalidVolume(String::from("singular affine")))?;
        let target_to_source = inverse.compose(affine);

        let src = self.data.view();
        let data = Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(i, j, k)| {
            let p = target_to_source.apply([i as f64, j as f64, k as f64]);
            match interpolation {
                Interpolation::Nearest => sample_nearest(&src, p),
                Interpolation::Linear => sample_linear(&src, p),
            }
        });
        Ok(Volume { data, affine: *affine })
    }

    /// Two-sided thresholding: voxels with an absolute value below `threshold` are set to zero.
    ///
    /// If `cluster_threshold` is larger than zero, face-connected clusters of surviving voxels with
    /// fewer voxels than that are removed as well. Positive and negative voxels form separate clusters.
    pub fn threshold_two_sided(&self, threshold: f32, cluster_threshold: usize) -> Volume {
        let mut data = self.data.mapv(|v| if v.abs() < threshold || v.is_nan() { 0.0 } else { v });
        if cluster_threshold > 0 {
            remove_small_clusters(&mut data, cluster_threshold);
        }
        Volume { data, affine: self.affine }
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = self.shape();
        write!(f, "Volume with {}x{}x{} voxels.", s[0], s[1], s[2])
    }
}


/// Read a volume from a NIfTI file.
///
/// # Examples
///
/// ```no_run
/// let atlas = light_minded::read_volume("/path/to/BN_Atlas_246_1mm.nii.gz").unwrap();
/// println!("Atlas has {} regions.", atlas.labels().len());
/// ```
pub fn read_volume<P: AsRef<Path>>(path: P) -> Result<Volume> {
    Volume::from_file(path)
}


fn sample_at(src: &ArrayView3<f32>, i: i64, j: i64, k: i64) -> Option<f32> {
    let s = src.shape();
    if i < 0 || j < 0 || k < 0 || i as usize >= s[0] || j as usize >= s[1] || k as usize >= s[2] {
        None
    } else {
        Some(src[[i as usize, j as usize, k as usize]])
    }
}

fn sample_nearest(src: &ArrayView3<f32>, p: [f64; 3]) -> f32 {
    sample_at(src, p[0].round() as i64, p[1].round() as i64, p[2].round() as i64).unwrap_or(0.0)
}

fn sample_linear(src: &ArrayView3<f32>, p: [f64; 3]) -> f32 {
    let s = src.shape();
    // Half a voxel of tolerance at the borders, like nearest neighbour sampling.
    for (axis, len) in s.iter().enumerate() {
        if p[axis] < -0.5 || p[axis] > *len as f64 - 0.5 {
            return 0.0;
        }
    }
    let base = [p[0].floor(), p[1].floor(), p[2].floor()];
    let frac = [p[0] - base[0], p[1] - base[1], p[2] - base[2]];

    let mut value = 0.0;
    let mut weight_sum = 0.0;
    for corner in 0..8 {
        let offs = [corner & 1, (corner >> 1) & 1, (corner >> 2) & 1];
        let mut weight = 1.0;
        for axis in 0..3 {
            weight *= if offs[axis] == 1 { frac[axis] } else { 1.0 - frac[axis] };
        }
        if weight == 0.0 {
            continue;
        }
        let sample = sample_at(
            src,
            base[0] as i64 + offs[0] as i64,
            base[1] as i64 + offs[1] as i64,
            base[2] as i64 + offs[2] as i64,
        );
        if let Some(v) = sample {
            value += weight * v as f64;
            weight_sum += weight;
        }
    }
    if weight_sum > 0.0 { (value / weight_sum) as f32 } else { 0.0 }
}


const FACE_NEIGHBORS: [[i64; 3]; 6] = [
    [1, 0, 0], [-1, 0, 0],
    [0, 1, 0], [0, -1, 0],
    [0, 0, 1], [0, 0, -1],
];

fn remove_small_clusters(data: &mut Array3<f32>, min_size: usize) {
    let shape = data.raw_dim();
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let mut visited = Array3::<bool>::from_elem(shape, false);
    let mut queue = VecDeque::new();
    let mut cluster = Vec::new();
    let mut removed = 0usize;

    for start in ndarray::indices((nx, ny, nz)) {
        let start = [start.0, start.1, start.2];
        if visited[start] || data[start] == 0.0 {
            continue;
        }
        let positive = data[start] > 0.0;
        visited[start] = true;
        queue.push_back(start);
        cluster.clear();

        while let Some(cur) = queue.pop_front() {
            cluster.push(cur);
            for n in FACE_NEIGHBORS.iter() {
                let (i, j, k) = (cur[0] as i64 + n[0], cur[1] as i64 + n[1], cur[2] as i64 + n[2]);
                if i < 0 || j < 0 || k < 0 || i as usize >= nx || j as usize >= ny || k as usize >= nz {
                    continue;
                }
                let next = [i as usize, j as usize, k as usize];
                let v = data[next];
                if !visited[next] && v != 0.0 && (v > 0.0) == positive {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        if cluster.len() < min_size {
            for idx in cluster.iter() {
                data[*idx] = 0.0;
            }
            removed += 1;
        }
    }
    debug!("Removed {} clusters smaller than {} voxels", removed, min_size);
}

/// Check that two volumes share the same voxel grid shape.
pub fn check_same_grid(expected: &Volume, found: &Volume) -> Result<()> {
    if expected.shape() != found.shape() {
        return Err(LightMindedError::GridMismatch(expected.shape(), found.shape()));
    }
    Ok(())
}

pub(crate) fn zeros_like(like: &Volume) -> Volume {
    Volume { data: Array3::zeros(like.data.raw_dim()), affine: like.affine }
}

/// `acc += scale * other`, voxel-wise. Both volumes must share the grid.
pub(crate) fn add_scaled(acc: &mut Volume, other: &Volume, scale: f32) {
    Zip::from(&mut acc.data).and(&other.data).for_each(|a, &b| *a += scale * b);
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn ramp_volume() -> Volume {
        let data = Array3::from_shape_fn((4, 4, 4), |(i, j, k)| (i + 10 * j + 100 * k) as f32);
        Volume::new(data, Affine::identity())
    }

    #[test]
    fn affine_inverse_round_trips_points() {
        let affine = Affine::scaling([2.0, 2.0, 3.0]).with_translation([-90.0, -126.0, -72.0]);
        let inverse = affine.inverse().unwrap();
        let p = inverse.apply(affine.apply([10.0, 20.0, 30.0]));
        assert_abs_diff_eq!(p[0], 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p[1], 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p[2], 30.0, epsilon = 1e-9);
        assert!(Affine::scaling([1.0, 0.0, 1.0]).inverse().is_none());
    }

    #[test]
    fn labels_skip_the_background() {
        let mut data = Array3::<f32>::zeros((3, 3, 3));
        data[[0, 0, 0]] = 5.0;
        data[[1, 1, 1]] = 2.0;
        data[[2, 2, 2]] = 5.0;
        let vol = Volume::new(data, Affine::identity());
        assert_eq!(vec![2, 5], vol.labels());
        assert_eq!(2.0, vol.mask(5).sum());
    }

    #[test]
    fn resampling_onto_the_same_grid_is_the_identity() {
        let vol = ramp_volume();
        let nearest = vol.resample_to(&vol, Interpolation::Nearest).unwrap();
        let linear = vol.resample_to(&vol, Interpolation::Linear).unwrap();
        assert_eq!(vol.data, nearest.data);
        for (a, b) in vol.data.iter().zip(linear.data.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-4);
        }
    }

    #[test]
    fn resampling_onto_a_coarser_grid_picks_matching_voxels() {
        let vol = ramp_volume();
        let coarse = vol.resample_to_grid([2, 2, 2], &Affine::scaling([2.0, 2.0, 2.0]), Interpolation::Nearest).unwrap();
        assert_eq!(vol.data[[2, 2, 2]], coarse.data[[1, 1, 1]]);
        assert_eq!(vol.data[[2, 0, 2]], coarse.data[[1, 0, 1]]);
    }

    #[test]
    fn voxels_outside_the_source_field_of_view_are_zero() {
        let vol = ramp_volume();
        let shifted = Affine::identity().with_translation([10.0, 0.0, 0.0]);
        let out = vol.resample_to_grid([2, 2, 2], &shifted, Interpolation::Linear).unwrap();
        assert!(out.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn linear_resampling_interpolates_between_voxels() {
        let vol = ramp_volume();
        let half = Affine::identity().with_translation([0.5, 0.0, 0.0]);
        let out = vol.resample_to_grid([3, 1, 1], &half, Interpolation::Linear).unwrap();
        assert_abs_diff_eq!(out.data[[0, 0, 0]], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(out.data[[2, 0, 0]], 2.5, epsilon = 1e-5);
    }

    #[test]
    fn thresholding_is_two_sided() {
        let data = Array3::from_shape_vec((1, 1, 5), vec![-4.0, -2.0, 0.5, 3.1, 6.0]).unwrap();
        let vol = Volume::new(data, Affine::identity());
        let out = vol.threshold_two_sided(3.1, 0);
        assert_eq!(vec![-4.0, 0.0, 0.0, 3.1, 6.0], out.data.iter().cloned().collect::<Vec<f32>>());
    }

    #[test]
    fn small_clusters_are_removed_by_sign() {
        let mut data = Array3::<f32>::zeros((1, 1, 8));
        // A positive cluster of 3, a negative cluster of 2 touching it, and an isolated voxel.
        data[[0, 0, 0]] = 4.0;
        data[[0, 0, 1]] = 4.0;
        data[[0, 0, 2]] = 4.0;
        data[[0, 0, 3]] = -4.0;
        data[[0, 0, 4]] = -4.0;
        data[[0, 0, 7]] = 9.0;
        let vol = Volume::new(data, Affine::identity());

        let out = vol.threshold_two_sided(3.0, 3);
        assert_eq!(vec![4.0, 4.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0], out.data.iter().cloned().collect::<Vec<f32>>());

        let kept = vol.threshold_two_sided(3.0, 0);
        assert_eq!(vol.data, kept.data);
    }

    #[test]
    fn volumes_survive_a_nifti_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.nii.gz");
        let affine = Affine::scaling([2.0, 2.0, 2.0]).with_translation([-90.0, -126.0, -72.0]);
        let vol = Volume::new(ramp_volume().data, affine);
        vol.to_file(&path).unwrap();

        let read = read_volume(&path).unwrap();
        assert_eq!(vol.shape(), read.shape());
        assert_eq!(vol.data, read.data);
        assert_abs_diff_eq!(read.affine.0[0][3], -90.0, epsilon = 1e-4);
        assert_abs_diff_eq!(read.affine.0[1][1], 2.0, epsilon = 1e-4);
    }

    fn qform_header() -> NiftiHeader {
        // 90 degrees about z: quaternion (a, b, c, d) = (sqrt(0.5), 0, 0, sqrt(0.5)).
        NiftiHeader {
            sform_code: 0,
            qform_code: 1,
            pixdim: [1.0, 2.0, 3.0, 4.0, 1.0, 1.0, 1.0, 1.0],
            quatern_b: 0.0,
            quatern_c: 0.0,
            quatern_d: 0.5f32.sqrt(),
            quatern_x: -90.0,
            quatern_y: 126.0,
            quatern_z: -72.0,
            ..NiftiHeader::default()
        }
    }

    #[test]
    fn the_qform_is_used_without_an_sform() {
        let affine = Affine::from_header(&qform_header());
        assert_abs_diff_eq!(affine.0[0][3], -90.0, epsilon = 1e-6);
        assert_abs_diff_eq!(affine.0[1][3], 126.0, epsilon = 1e-6);
        assert_abs_diff_eq!(affine.0[2][3], -72.0, epsilon = 1e-6);

        // The voxel i axis now points along y, the j axis along -x.
        let p = affine.apply([1.0, 0.0, 0.0]);
        assert_abs_diff_eq!(p[0], -90.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p[1], 128.0, epsilon = 1e-5);
        let p = affine.apply([0.0, 1.0, 0.0]);
        assert_abs_diff_eq!(p[0], -93.0, epsilon = 1e-5);
        assert_abs_diff_eq!(p[1], 126.0, epsilon = 1e-5);

        let size = affine.voxel_size();
        assert_abs_diff_eq!(size[0], 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(size[1], 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(size[2], 4.0, epsilon = 1e-5);
    }

    #[test]
    fn a_negative_qfac_mirrors_the_k_axis() {
        let mut header = qform_header();
        header.pixdim[0] = -1.0;
        let affine = Affine::from_header(&header);
        assert_abs_diff_eq!(affine.0[2][2], -4.0, epsilon = 1e-5);
        assert!(affine.determinant() < 0.0);
        assert!(Affine::from_header(&qform_header()).determinant() > 0.0);
    }

    #[test]
    fn qform_files_are_read_with_their_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qform.nii");
        let data = ramp_volume().data;
        WriterOptions::new(&path)
            .reference_header(&qform_header())
            .write_nifti(&data)
            .unwrap();

        let read = read_volume(&path).unwrap();
        assert_eq!(data, read.data);
        assert_abs_diff_eq!(read.affine.0[0][3], -90.0, epsilon = 1e-4);
        assert_abs_diff_eq!(read.affine.0[1][3], 126.0, epsilon = 1e-4);
        assert_abs_diff_eq!(read.affine.voxel_size()[2], 4.0, epsilon = 1e-4);
    }

    #[test]
    fn the_value_range_ignores_nan() {
        let data = Array3::from_shape_vec((1, 1, 3), vec![-1.5, f32::NAN, 2.5]).unwrap();
        let vol = Volume::new(data, Affine::identity());
        assert_eq!(Some((-1.5, 2.5)), vol.value_range());
    }
}
