//! Tools for turning brain atlases and text queries into colored 3D brain region views.
//!
//! The focus of this package is on labeled atlas volumes, like the Brainnetome atlas: their regions are
//! exported as meshes for a web viewer, annotated with network metadata, and colored by the brain
//! map of a free-text query.

pub mod color;
pub mod config;
pub mod error;
pub mod isosurface;
pub mod logging;
pub mod mesh_export;
pub mod parcellate;
pub mod pipeline;
pub mod query;
pub mod region_table;
pub mod roi;
pub mod server;
pub mod traits;
pub mod util;
pub mod volume;

pub use color::{DivergingColormap, Rgb, SymmetricNorm};
pub use error::{LightMindedError, Result};
pub use isosurface::{BrainMesh, IsosurfaceExtractor, MarchingTetrahedra};
pub use mesh_export::{export_atlas_meshes, MeshExportOptions, MeshExporter};
pub use query::{QueryResult, SemanticEncoder, TermMapEncoder};
pub use region_table::{RegionRecord, RegionTable};
pub use roi::{RoiColor, RoiData};
pub use traits::Colormap;
pub use volume::{read_volume, Volume};
