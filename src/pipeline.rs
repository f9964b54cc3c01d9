//! The query pipeline: free text in, region colors out.
//!
//! The stages run in order: read the query, encode it into a brain map, resample the map onto the
//! atlas grid, threshold it, average it per atlas region and map the region values to colors. The
//! maps, the region colors and a metadata record are then saved to the output directory, and the
//! colors can be published to a running server.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::color::SymmetricNorm;
use crate::config::{PipelineSettings, Settings};
use crate::error::{LightMindedError, Result};
use crate::parcellate::{parcellate, ParcelValue};
use crate::query::{QueryResult, RankedDocument, RankedTerm, SemanticEncoder, TermMapEncoder};
use crate::roi::RoiData;
use crate::util::write_json_file;
use crate::volume::{Interpolation, Volume};

/// The query used when not prompting for one.
pub const PLACEHOLDER_QUERY: &str = "I'm feeling happy!";

pub const BRAIN_MAP_FILE: &str = "brain_map.nii.gz";
pub const ENCODER_THRESHOLDED_MAP_FILE: &str = "brain_map_encoder_thresh.nii.gz";
pub const THRESHOLDED_MAP_FILE: &str = "brain_map_thresh.nii.gz";
pub const ROI_COLORS_FILE: &str = "roi_colors.json";
pub const METADATA_FILE: &str = "metadata.json";


/// Everything one pipeline run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub query: String,
    pub result: QueryResult,
    /// The brain map on the atlas grid, thresholded.
    pub thresholded_map: Volume,
    pub parcels: Vec<ParcelValue>,
    pub roi: RoiData,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for PipelineOutput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Pipeline output for query '{}' with colors for {} regions.", self.query, self.roi.len())
    }
}


/// The record written to `metadata.json`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetadata<'a> {
    pub query: &'a str,
    pub timestamp: DateTime<Utc>,
    pub atlas_path: &'a Path,
    pub z_threshold: f32,
    pub cluster_threshold: usize,
    pub color_vmax: f64,
    pub colormap: &'a str,
    /// Smallest and largest value of the unthresholded brain map.
    pub brain_map_range: Option<(f32, f32)>,
    pub regions: usize,
    pub similar_words: &'a [RankedTerm],
    pub similar_documents: &'a [RankedDocument],
}


/// Read a query from `input`, after writing a prompt to `prompt`. A blank line or end of input
/// gives the placeholder query.
pub fn read_query<R: BufRead, W: Write>(mut input: R, mut prompt: W) -> Result<String> {
    write!(prompt, "Enter a query (blank for '{}'): ", PLACEHOLDER_QUERY)?;
    prompt.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let query = line.trim();
    if query.is_empty() {
        Ok(String::from(PLACEHOLDER_QUERY))
    } else {
        Ok(query.to_string())
    }
}


/// Runs queries through an encoder and maps the result onto an atlas.
pub struct QueryPipeline<E: SemanticEncoder> {
    encoder: E,
    settings: PipelineSettings,
}

impl<E: SemanticEncoder> QueryPipeline<E> {

    pub fn new(encoder: E, settings: PipelineSettings) -> QueryPipeline<E> {
        QueryPipeline { encoder, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// The query to run: prompted on stdin in interactive mode, the placeholder otherwise.
    pub fn user_input(&self) -> Result<String> {
        if self.settings.interactive {
            let stdin = io::stdin();
            read_query(stdin.lock(), io::stdout())
        } else {
            Ok(String::from(PLACEHOLDER_QUERY))
        }
    }

    /// Run all stages for `query`.
    pub fn run(&self, query: &str) -> Result<PipelineOutput> {
        let settings = &self.settings;
        if !settings.atlas_path.is_file() {
            return Err(LightMindedError::AtlasNotFound(settings.atlas_path.clone()));
        }
        let cmap = settings.colormap()?;

        info!("User input: {}", query);
        let result = self.encoder.encode(query)?;
        log_similar(&result, settings.top_terms, settings.top_documents);
        match result.brain_map.value_range() {
            Some((min, max)) => info!("Brain map values range from {:.3} to {:.3}", min, max),
            None => warn!("The brain map has no finite values"),
        }

        let atlas = Volume::from_file(&settings.atlas_path)?;
        info!("Loaded atlas '{}': {}", settings.atlas_path.display(), atlas);

        let resampled = result.brain_map.resample_to(&atlas, Interpolation::Linear)?;
        let thresholded_map = resampled.threshold_two_sided(settings.z_threshold, settings.cluster_threshold);

        let parcels = parcellate(&atlas, &thresholded_map)?;
        let active = parcels.iter().filter(|p| p.value != 0.0).count();
        info!("{} of {} regions are active at |z| >= {}", active, parcels.len(), settings.z_threshold);

        let roi = RoiData::from_parcels(&parcels, &SymmetricNorm::new(settings.color_vmax), &cmap);
        Ok(PipelineOutput {
            query: query.to_string(),
            result,
            thresholded_map,
            parcels,
            roi,
            timestamp: Utc::now(),
        })
    }

    /// Write the maps, the region colors and the metadata to the output directory. Returns the
    /// paths of the written files.
    pub fn save(&self, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
        let dir = &self.settings.output_dir;
        let files = vec![
            dir.join(BRAIN_MAP_FILE),
            dir.join(ENCODER_THRESHOLDED_MAP_FILE),
            dir.join(THRESHOLDED_MAP_FILE),
            dir.join(ROI_COLORS_FILE),
            dir.join(METADATA_FILE),
        ];

        output.result.brain_map.to_file(&files[0])?;
        output.result.thresholded_map.to_file(&files[1])?;
        output.thresholded_map.to_file(&files[2])?;
        output.roi.to_file(&files[3])?;

        let words = &output.result.similar_words;
        let documents = &output.result.similar_documents;
        let metadata = QueryMetadata {
            query: &output.query,
            timestamp: output.timestamp,
            atlas_path: &self.settings.atlas_path,
            z_threshold: self.settings.z_threshold,
            cluster_threshold: self.settings.cluster_threshold,
            color_vmax: self.settings.color_vmax,
            colormap: &self.settings.colormap,
            brain_map_range: output.result.brain_map.value_range(),
            regions: output.roi.len(),
            similar_words: &words[..words.len().min(self.settings.top_terms)],
            similar_documents: &documents[..documents.len().min(self.settings.top_documents)],
        };
        write_json_file(&files[4], &metadata)?;

        for file in files.iter() {
            info!("Saved {}", file.display());
        }
        Ok(files)
    }
}

fn log_similar(result: &QueryResult, top_terms: usize, top_documents: usize) {
    info!("Similar words:");
    for word in result.similar_words.iter().take(top_terms) {
        info!("  {:<30} {:>8.4}  (in query: {})", word.term, word.similarity, word.weight_in_query);
    }
    info!("Similar studies:");
    for doc in result.similar_documents.iter().take(top_documents) {
        info!("  [{}] {} ({:.4})", doc.id, doc.title, doc.similarity);
    }
}


/// Post the region colors to the `/set` endpoint of a server running at `base_url`.
pub async fn publish(base_url: &str, roi: &RoiData) -> Result<()> {
    let url = format!("{}/set", base_url.trim_end_matches('/'));
    reqwest::Client::new()
        .post(&url)
        .json(roi)
        .send()
        .await?
        .error_for_status()?;
    info!("Published colors for {} regions to {}", roi.len(), url);
    Ok(())
}


/// Run one query with the term map model and the pipeline settings of `settings`, save the outputs
/// and publish the colors if a server URL is configured.
pub async fn launch(settings: &Settings) -> Result<PipelineOutput> {
    info!("Launching with config:\n{}", settings.to_json()?);
    let pipeline_settings = settings.pipeline.clone();
    let encoder = TermMapEncoder::from_dir(&pipeline_settings.model_dir)?
        .with_threshold(pipeline_settings.z_threshold);
    let pipeline = QueryPipeline::new(encoder, pipeline_settings);

    let query = pipeline.user_input()?;
    let output = pipeline.run(&query)?;
    pipeline.save(&output)?;

    if let Some(url) = &pipeline.settings().publish_url {
        if let Err(err) = publish(url, &output.roi).await {
            warn!("Could not publish region colors to {}: {}", url, err);
        }
    }
    Ok(output)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::volume::Affine;
    use ndarray::Array3;

    struct FixedEncoder {
        map: Volume,
    }

    impl SemanticEncoder for FixedEncoder {
        fn encode(&self, _query: &str) -> Result<QueryResult> {
            Ok(QueryResult {
                brain_map: self.map.clone(),
                thresholded_map: self.map.threshold_two_sided(3.1, 0),
                similar_words: Vec::new(),
                similar_documents: Vec::new(),
            })
        }
    }

    /// Two regions along x: label 1 in the first half, label 2 in the second.
    fn write_atlas(dir: &Path) -> PathBuf {
        let data = Array3::from_shape_fn((4, 2, 2), |(i, _, _)| if i < 2 { 1.0 } else { 2.0 });
        let path = dir.join("atlas.nii.gz");
        Volume::new(data, Affine::identity()).to_file(&path).unwrap();
        path
    }

    fn settings(dir: &Path) -> PipelineSettings {
        PipelineSettings {
            atlas_path: write_atlas(dir),
            output_dir: dir.join("out"),
            ..PipelineSettings::default()
        }
    }

    fn encoder() -> FixedEncoder {
        let data = Array3::from_shape_fn((4, 2, 2), |(i, _, _)| if i < 2 { 6.0 } else { 1.0 });
        FixedEncoder { map: Volume::new(data, Affine::identity()) }
    }

    #[test]
    fn blank_input_gives_the_placeholder_query() {
        let mut prompt = Vec::new();
        assert_eq!(PLACEHOLDER_QUERY, read_query("\n".as_bytes(), &mut prompt).unwrap());
        assert_eq!("visual cortex", read_query("  visual cortex \n".as_bytes(), &mut prompt).unwrap());
        assert_eq!(PLACEHOLDER_QUERY, read_query("".as_bytes(), &mut prompt).unwrap());
        assert!(String::from_utf8(prompt).unwrap().starts_with("Enter a query"));
    }

    #[test]
    fn a_missing_atlas_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PipelineSettings { atlas_path: dir.path().join("nope.nii.gz"), ..PipelineSettings::default() };
        let err = QueryPipeline::new(encoder(), settings).run(PLACEHOLDER_QUERY).unwrap_err();
        assert!(matches!(err, LightMindedError::AtlasNotFound(_)));
    }

    #[test]
    fn regions_are_colored_by_their_thresholded_mean() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = QueryPipeline::new(encoder(), settings(dir.path()));
        let output = pipeline.run(PLACEHOLDER_QUERY).unwrap();

        assert_eq!(2, output.parcels.len());
        assert_eq!(6.0, output.parcels[0].value);
        // Below the threshold.
        assert_eq!(0.0, output.parcels[1].value);
        assert_eq!(2, output.roi.len());
        assert_eq!((0x67, 0x00, 0x1f), (output.roi.data[0].r, output.roi.data[0].g, output.roi.data[0].b));
        assert_eq!((0xf7, 0xf7, 0xf7), (output.roi.data[1].r, output.roi.data[1].g, output.roi.data[1].b));
    }

    #[test]
    fn outputs_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = QueryPipeline::new(encoder(), settings(dir.path()));
        let output = pipeline.run("emotion").unwrap();
        let files = pipeline.save(&output).unwrap();
        assert_eq!(5, files.len());
        assert!(files.iter().all(|f| f.is_file()));

        let roi = RoiData::from_file(dir.path().join("out").join(ROI_COLORS_FILE)).unwrap();
        assert_eq!(output.roi, roi);
        let metadata: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("out").join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!("emotion", metadata["query"]);
        assert_eq!("RdBu_r", metadata["colormap"]);
        assert_eq!(serde_json::json!([1.0, 6.0]), metadata["brain_map_range"]);
        assert!(metadata["timestamp"].as_str().unwrap().contains('T'));
    }
}
