use quick_error::quick_error;
use std::io::Error as IOError;
use std::path::PathBuf;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum LightMindedError {
        /// The atlas volume required by the query pipeline does not exist.
        AtlasNotFound(path: PathBuf) {
            display("Atlas file not found: {}", path.display())
        }

        /// No settings file has been written yet.
        ConfigNotFound(path: PathBuf) {
            display("No config found at {}. Please run 'light-minded config' first.", path.display())
        }

        /// A setting has a value that cannot be used.
        InvalidSetting(reason: String) {
            display("Invalid setting: {}", reason)
        }

        ModelNotFound(path: PathBuf) {
            display("Model directory not found: {}", path.display())
        }

        /// A CSV lookup table lacks a required column.
        MissingColumn(column: String) {
            display("Missing CSV column '{}'", column)
        }

        /// A markdown table is missing its header or separator row.
        InvalidTable(reason: String) {
            display("Invalid markdown table: {}", reason)
        }

        InvalidVolume(reason: String) {
            display("Invalid volume: {}", reason)
        }

        /// Two volumes were expected to share a voxel grid.
        GridMismatch(expected: [usize; 3], found: [usize; 3]) {
            display("Volume grid mismatch: expected {:?}, found {:?}", expected, found)
        }

        EmptyVocabulary {
            display("The term map vocabulary contains no usable terms")
        }

        /// Isosurface extraction produced no triangles.
        EmptySurface(label: i32) {
            display("No surface could be extracted for label {}", label)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }

        Csv(err: csv::Error) {
            from()
            source(err)
            display("CSV error: {}", err)
        }

        Json(err: serde_json::Error) {
            from()
            source(err)
            display("JSON error: {}", err)
        }

        Nifti(err: nifti::NiftiError) {
            from()
            source(err)
            display("NIfTI error: {}", err)
        }

        Shape(err: ndarray::ShapeError) {
            from()
            source(err)
            display("Array shape error: {}", err)
        }

        Http(err: reqwest::Error) {
            from()
            source(err)
            display("HTTP error: {}", err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, LightMindedError>;
