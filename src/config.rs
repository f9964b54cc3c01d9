//! The settings file written by `light-minded config` and read by `light-minded launch`.

use serde::{Deserialize, Serialize};
use tracing::info;

use std::fs;
use std::path::{Path, PathBuf};

use crate::color::DivergingColormap;
use crate::error::{LightMindedError, Result};
use crate::util::{ensure_parent_dir, read_text_file};

/// Where the settings file lives, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/settings.json";


/// Settings of the query pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Label volume the query map is parcellated with.
    pub atlas_path: PathBuf,
    /// Directory of the term map model.
    pub model_dir: PathBuf,
    /// Directory all query outputs are written to.
    pub output_dir: PathBuf,
    pub z_threshold: f32,
    /// Minimum cluster size in voxels, 0 keeps all clusters.
    pub cluster_threshold: usize,
    pub color_vmax: f64,
    /// `RdBu_r` or `cold_hot`.
    pub colormap: String,
    pub top_terms: usize,
    pub top_documents: usize,
    /// Prompt for the query on stdin instead of using the placeholder query.
    pub interactive: bool,
    /// Base URL of a running server to publish the region colors to.
    pub publish_url: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> PipelineSettings {
        PipelineSettings {
            atlas_path: PathBuf::from("hack/BN_Atlas_246_1mm.nii.gz"),
            model_dir: PathBuf::from("data/term_maps"),
            output_dir: PathBuf::from("hack/test_outputs"),
            z_threshold: 3.1,
            cluster_threshold: 0,
            color_vmax: 5.0,
            colormap: String::from("RdBu_r"),
            top_terms: 15,
            top_documents: 5,
            interactive: false,
            publish_url: None,
        }
    }
}

impl PipelineSettings {

    /// The configured colormap.
    pub fn colormap(&self) -> Result<DivergingColormap> {
        self.colormap.parse().map_err(LightMindedError::InvalidSetting)
    }

    /// Check value ranges that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<()> {
        if !(self.z_threshold >= 0.0) {
            return Err(LightMindedError::InvalidSetting(format!("z_threshold must be >= 0, got {}", self.z_threshold)));
        }
        if !(self.color_vmax > 0.0) {
            return Err(LightMindedError::InvalidSetting(format!("color_vmax must be > 0, got {}", self.color_vmax)));
        }
        self.colormap()?;
        Ok(())
    }
}


/// All settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub analysis_type: String,
    pub dataset: String,
    pub atlas: String,
    pub keyword: String,
    pub pipeline: PipelineSettings,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            analysis_type: String::from("CBMA"),
            dataset: String::from("neurosynth"),
            atlas: String::from("MNI152"),
            keyword: String::from("emotion"),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl Settings {

    /// Read settings from a JSON file. Missing keys take their default values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let text = read_text_file(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ensure_parent_dir(&path)?;
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}


/// Write the default settings to `path` and return its absolute path.
pub fn write_default_config<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    Settings::default().to_file(&path)?;
    let absolute = fs::canonicalize(&path)?;
    info!("Config saved to {}", absolute.display());
    Ok(absolute)
}

/// Load the settings from `path`, failing with [`LightMindedError::ConfigNotFound`] if the file
/// does not exist.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(LightMindedError::ConfigNotFound(path.to_path_buf()));
    }
    let settings = Settings::from_file(path)?;
    settings.pipeline.validate()?;
    Ok(settings)
}
