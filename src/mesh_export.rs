//! Export of brain atlas regions as triangle meshes for the web viewer.
//!
//! Every distinct non-background label of an atlas volume becomes one mesh. The meshes are written
//! as JSON records (one file per region plus an index of all regions) that the Three.js viewer in
//! `assets/brain_regions_3d.html` loads, and optionally as STL or PLY files for other mesh tools.

use serde::Serialize;
use tracing::{debug, info, warn};

use ndarray::Array3;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Component, Path, PathBuf};

use crate::color::{hue_color, rank_hue};
use crate::error::{LightMindedError, Result};
use crate::isosurface::{BrainMesh, IsosurfaceExtractor, MarchingTetrahedra};
use crate::region_table::{RegionRecord, RegionTable};
use crate::util::{write_json_file, write_text_file};
use crate::volume::{Volume, BACKGROUND_LABEL};

/// The Three.js viewer page template, see [`viewer_page`].
const VIEWER_TEMPLATE: &str = include_str!("../assets/brain_regions_3d.html");
const MESH_DIR_TOKEN: &str = "\"{{MESH_DIR}}\"";

/// File name of the index of all exported meshes.
pub const MESH_INDEX_FILE: &str = "mesh_index.json";

/// The mask level between region (1) and background (0).
const MASK_LEVEL: f32 = 0.5;


/// One exported region mesh, as stored in the JSON files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshRecord {
    pub id: i32,
    /// CSS hex color.
    pub color: String,
    /// Hue in degrees.
    pub hue: f64,
    pub vertices: Vec<[f32; 3]>,
    pub faces: Vec<[i32; 3]>,
    pub normals: Vec<[f32; 3]>,
    #[serde(flatten)]
    pub region: Option<RegionRecord>,
}

impl MeshRecord {
    fn new(id: i32, hue: f64, mesh: &BrainMesh, region: Option<RegionRecord>) -> MeshRecord {
        MeshRecord {
            id,
            color: hue_color(hue).hex(),
            hue,
            vertices: mesh.vertex_triples(),
            faces: mesh.face_triples(),
            normals: mesh.normal_triples(),
            region,
        }
    }
}


/// All exported meshes, in ascending label order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeshIndex {
    pub meshes: Vec<MeshRecord>,
}

impl fmt::Display for MeshIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Mesh index with {} region meshes.", self.meshes.len())
    }
}


/// Settings for [`MeshExporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct MeshExportOptions {
    /// Directory for the JSON records, the index and optional STL/PLY files.
    pub output_dir: PathBuf,
    pub write_stl: bool,
    pub write_ply: bool,
    /// Map vertices through the volume affine instead of keeping voxel index coordinates.
    pub world_coordinates: bool,
    /// Where to write the viewer page, if at all.
    pub viewer_page: Option<PathBuf>,
}

impl Default for MeshExportOptions {
    fn default() -> MeshExportOptions {
        MeshExportOptions {
            output_dir: PathBuf::from("web/webgl_output"),
            write_stl: false,
            write_ply: false,
            world_coordinates: false,
            viewer_page: Some(PathBuf::from("web/brain_regions_3d.html")),
        }
    }
}


/// Bounding box of the voxels of one label, both corners inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LabelBounds {
    min: [usize; 3],
    max: [usize; 3],
}

impl LabelBounds {
    fn include(&mut self, idx: [usize; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(idx[axis]);
            self.max[axis] = self.max[axis].max(idx[axis]);
        }
    }
}

/// Compute the bounding boxes of all non-background labels in a single pass over the volume.
fn label_bounds(volume: &Volume) -> BTreeMap<i32, LabelBounds> {
    let mut bounds: BTreeMap<i32, LabelBounds> = BTreeMap::new();
    for ((i, j, k), value) in volume.data.indexed_iter() {
        let label = value.round() as i32;
        if label == BACKGROUND_LABEL {
            continue;
        }
        let idx = [i, j, k];
        bounds.entry(label).or_insert(LabelBounds { min: idx, max: idx }).include(idx);
    }
    bounds
}

/// The binary mask of `label`, cropped to its bounding box plus a one voxel background margin on
/// every side, so that the surface is closed even where the region touches the volume border.
/// Returns the mask and the voxel index of its first element in the full volume.
fn cropped_mask(volume: &Volume, label: i32, bounds: &LabelBounds) -> (Array3<f32>, [f32; 3]) {
    let shape = (
        bounds.max[0] - bounds.min[0] + 3,
        bounds.max[1] - bounds.min[1] + 3,
        bounds.max[2] - bounds.min[2] + 3,
    );
    let mask = Array3::from_shape_fn(shape, |(i, j, k)| {
        let inner = [i, j, k];
        if (0..3).any(|axis| inner[axis] == 0 || inner[axis] > bounds.max[axis] - bounds.min[axis] + 1) {
            return 0.0;
        }
        let idx = [
            bounds.min[0] + i - 1,
            bounds.min[1] + j - 1,
            bounds.min[2] + k - 1,
        ];
        if volume.label_at(idx) == label { 1.0 } else { 0.0 }
    });
    let origin = [
        bounds.min[0] as f32 - 1.0,
        bounds.min[1] as f32 - 1.0,
        bounds.min[2] as f32 - 1.0,
    ];
    (mask, origin)
}


/// Turns the regions of a label volume into meshes and writes them to disk.
#[derive(Debug, Clone)]
pub struct MeshExporter<E: IsosurfaceExtractor = MarchingTetrahedra> {
    pub extractor: E,
    pub options: MeshExportOptions,
}

impl MeshExporter<MarchingTetrahedra> {
    pub fn new(options: MeshExportOptions) -> MeshExporter<MarchingTetrahedra> {
        MeshExporter { extractor: MarchingTetrahedra, options }
    }
}

impl<E: IsosurfaceExtractor> MeshExporter<E> {

    pub fn with_extractor(extractor: E, options: MeshExportOptions) -> MeshExporter<E> {
        MeshExporter { extractor, options }
    }

    /// Extract the surface mesh of one label.
    pub fn region_mesh(&self, volume: &Volume, label: i32) -> Result<BrainMesh> {
        let bounds = label_bounds_of(volume, label).ok_or(LightMindedError::EmptySurface(label))?;
        self.cropped_region_mesh(volume, label, &bounds)
    }

    fn cropped_region_mesh(&self, volume: &Volume, label: i32, bounds: &LabelBounds) -> Result<BrainMesh> {
        let (mask, origin) = cropped_mask(volume, label, bounds);
        let mut mesh = self.extractor.extract(mask.view(), MASK_LEVEL)?;
        if mesh.is_empty() {
            return Err(LightMindedError::EmptySurface(label));
        }
        mesh.translate(origin);
        if self.options.world_coordinates {
            mesh.transform(&volume.affine);
        }
        Ok(mesh)
    }

    /// Export all regions of `volume`, attaching metadata from `regions` where available.
    ///
    /// Regions for which no surface can be extracted are logged and skipped. The returned index
    /// contains the successfully exported regions and has also been written to the output directory.
    pub fn export(&self, volume: &Volume, regions: Option<&RegionTable>) -> Result<MeshIndex> {
        let out_dir = &self.options.output_dir;
        fs::create_dir_all(out_dir)?;

        let bounds = label_bounds(volume);
        let count = bounds.len();
        info!("Exporting meshes for {} regions to '{}'", count, out_dir.display());

        let mut index = MeshIndex::default();
        for (rank, (label, label_bounds)) in bounds.iter().enumerate() {
            debug!("Processing label {} ({}/{})", label, rank + 1, count);
            let mesh = match self.cropped_region_mesh(volume, *label, label_bounds) {
                Ok(mesh) => mesh,
                Err(err) => {
                    warn!("Error processing label {}: {}", label, err);
                    continue;
                }
            };

            let hue = rank_hue(rank, count);
            let region = regions.and_then(|r| r.get(*label)).cloned();
            let record = MeshRecord::new(*label, hue, &mesh, region);

            write_json_file(out_dir.join(format!("mesh_{}.json", label)), &record)?;
            if self.options.write_stl {
                let file = BufWriter::new(File::create(out_dir.join(format!("segmentation_{}.stl", label)))?);
                mesh.write_stl(file)?;
            }
            if self.options.write_ply {
                let color = hue_color(hue);
                write_text_file(out_dir.join(format!("segmentation_{}.ply", label)), &mesh.to_ply(Some(color)))?;
            }
            debug!("Created mesh for label {} with color {}: {}", label, record.color, mesh);
            index.meshes.push(record);
        }

        write_json_file(out_dir.join(MESH_INDEX_FILE), &index)?;
        if let Some(page) = &self.options.viewer_page {
            write_viewer_page(page, out_dir)?;
        }
        info!("Exported {} of {} region meshes", index.meshes.len(), count);
        Ok(index)
    }
}

fn label_bounds_of(volume: &Volume, label: i32) -> Option<LabelBounds> {
    let mut found: Option<LabelBounds> = None;
    for ((i, j, k), value) in volume.data.indexed_iter() {
        if value.round() as i32 != label {
            continue;
        }
        let idx = [i, j, k];
        found.get_or_insert(LabelBounds { min: idx, max: idx }).include(idx);
    }
    found
}

/// The viewer page, loading `mesh_index.json` from `mesh_dir`, a URL path relative to the page.
pub fn viewer_page(mesh_dir: &str) -> String {
    VIEWER_TEMPLATE.replace(MESH_DIR_TOKEN, &serde_json::Value::from(mesh_dir).to_string())
}

/// The location of `mesh_dir` as a URL path relative to the directory of the page `page`. Falls
/// back to the directory name if `mesh_dir` is not below the page directory.
fn relative_mesh_url(page: &Path, mesh_dir: &Path) -> String {
    let base = page.parent().unwrap_or_else(|| Path::new(""));
    let relative = match mesh_dir.strip_prefix(base) {
        Ok(rel) => rel,
        Err(_) => {
            warn!("Mesh directory '{}' is not below the viewer page directory '{}'", mesh_dir.display(), base.display());
            mesh_dir.file_name().map(Path::new).unwrap_or(mesh_dir)
        }
    };
    let parts: Vec<String> = relative.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() { String::from(".") } else { parts.join("/") }
}

/// Write the Three.js viewer page to `path`, pointing it at the meshes in `mesh_dir`.
pub fn write_viewer_page<P: AsRef<Path>, Q: AsRef<Path>>(path: P, mesh_dir: Q) -> Result<()> {
    let url = relative_mesh_url(path.as_ref(), mesh_dir.as_ref());
    write_text_file(&path, &viewer_page(&url))?;
    info!("Created WebGL visualization page '{}' for meshes in '{}'", path.as_ref().display(), url);
    Ok(())
}


/// Export the regions of the atlas volume file `atlas_file` with the given options. If a joined
/// region table is given, its metadata is attached to the meshes.
///
/// # Examples
///
/// ```no_run
/// use light_minded::mesh_export::{export_atlas_meshes, MeshExportOptions};
/// let index = export_atlas_meshes("hack/BN_Atlas_246_1mm.nii.gz", Some("hack/bn_246_table_with_network_id.md"), &MeshExportOptions::default()).unwrap();
/// println!("{}", index);
/// ```
pub fn export_atlas_meshes<P, Q>(atlas_file: P, table_file: Option<Q>, options: &MeshExportOptions) -> Result<MeshIndex>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let regions = match table_file {
        Some(path) => {
            let table = RegionTable::from_file(path)?;
            info!("Loaded metadata for {} brain regions", table.len());
            Some(table)
        }
        None => None,
    };
    let volume = Volume::from_file(atlas_file)?;
    MeshExporter::new(options.clone()).export(&volume, regions.as_ref())
}
