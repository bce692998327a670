use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Kinds and tags
// ---------------------------------------------------------------------------

/// The closed set of dataset kinds a session can manage.
///
/// Every registered file carries exactly one kind, fixed at registration;
/// decode and analyzer construction are dispatched on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataKind {
    Descriptor,
    Topography,
    Cits,
    Sts,
}

impl DataKind {
    pub fn label(self) -> &'static str {
        match self {
            DataKind::Descriptor => "descriptor",
            DataKind::Topography => "topography",
            DataKind::Cits => "cits",
            DataKind::Sts => "sts",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fast-axis scan direction encoded in topography filenames (`…Fwd` / `…Bwd`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl ScanDirection {
    /// The filename suffix this tag was derived from.
    pub fn suffix(self) -> &'static str {
        match self {
            ScanDirection::Forward => "Fwd",
            ScanDirection::Backward => "Bwd",
        }
    }
}

/// Slow-axis direction of a CITS grid measurement, as recorded by the probe.
///
/// `Downward` cubes are row-reversed at decode time so the display origin is
/// always bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlowScanDirection {
    Upward,
    Downward,
}

impl SlowScanDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SlowScanDirection::Upward => "upward",
            SlowScanDirection::Downward => "downward",
        }
    }
}

/// Measurement mode declared by the descriptor for a spectroscopy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MeasurementMode {
    Cits,
    Sts,
    Unknown,
}

// ---------------------------------------------------------------------------
// DecodedResult – the uniform decode envelope
// ---------------------------------------------------------------------------

/// Outcome of a single decode: payload plus accumulated errors and warnings.
///
/// `success()` holds exactly when the error list is empty. The payload is
/// shared behind an `Arc` so cached results hand out cheap clones without
/// copying arrays.
#[derive(Debug)]
pub struct DecodedResult<P> {
    /// Free-form metadata recorded during the decode (path, shapes, …).
    pub metadata: BTreeMap<String, String>,
    pub payload: Option<Arc<P>>,
    /// Derived values (e.g. data ranges) keyed by name.
    pub derived: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// Manual impl: `#[derive(Clone)]` would demand `P: Clone`, but the payload
// is only ever cloned through the Arc.
impl<P> Clone for DecodedResult<P> {
    fn clone(&self) -> Self {
        DecodedResult {
            metadata: self.metadata.clone(),
            payload: self.payload.clone(),
            derived: self.derived.clone(),
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
        }
    }
}

impl<P> DecodedResult<P> {
    pub fn new() -> Self {
        DecodedResult {
            metadata: BTreeMap::new(),
            payload: None,
            derived: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// A successful result wrapping the given payload.
    pub fn ok(payload: P) -> Self {
        let mut result = Self::new();
        result.payload = Some(Arc::new(payload));
        result
    }

    /// A failed result carrying a single error message.
    pub fn failure(message: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.errors.push(message.into());
        result
    }

    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn insert_metadata(&mut self, key: &str, value: impl ToString) {
        self.metadata.insert(key.to_string(), value.to_string());
    }
}

impl<P> Default for DecodedResult<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// FileRecord – one registered file
// ---------------------------------------------------------------------------

/// Bookkeeping for one registered file; mutated by its manager after decode.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub kind: DataKind,
    /// On-disk size in bytes.
    pub size: u64,
    pub signal_type: Option<String>,
    pub direction: Option<ScanDirection>,
    pub loaded: bool,
    pub loaded_at: Option<SystemTime>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, kind: DataKind, size: u64) -> Self {
        FileRecord {
            path: path.into(),
            kind,
            size,
            signal_type: None,
            direction: None,
            loaded: false,
            loaded_at: None,
        }
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn human_readable_size(&self) -> String {
        const KIB: f64 = 1024.0;
        let size = self.size as f64;
        if size < KIB {
            format!("{} B", self.size)
        } else if size < KIB * KIB {
            format!("{:.1} KB", size / KIB)
        } else if size < KIB * KIB * KIB {
            format!("{:.1} MB", size / (KIB * KIB))
        } else {
            format!("{:.1} GB", size / (KIB * KIB * KIB))
        }
    }
}

// ---------------------------------------------------------------------------
// Scan parameters
// ---------------------------------------------------------------------------

/// Scan-frame parameters extracted from the descriptor metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanParameters {
    pub x_pixel: usize,
    pub y_pixel: usize,
    /// Physical X extent in nm.
    pub x_range: f64,
    /// Physical Y extent in nm.
    pub y_range: f64,
    /// Frame rotation in degrees.
    pub angle: f64,
    pub x_center: f64,
    pub y_center: f64,
}

impl ScanParameters {
    /// nm per pixel along X.
    pub fn pixel_scale_x(&self) -> f64 {
        if self.x_pixel == 0 {
            1.0
        } else {
            self.x_range / self.x_pixel as f64
        }
    }

    /// nm per pixel along Y.
    pub fn pixel_scale_y(&self) -> f64 {
        if self.y_pixel == 0 {
            1.0
        } else {
            self.y_range / self.y_pixel as f64
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.y_range == 0.0 {
            1.0
        } else {
            self.x_range / self.y_range
        }
    }

    pub fn total_pixels(&self) -> usize {
        self.x_pixel * self.y_pixel
    }
}

impl Default for ScanParameters {
    fn default() -> Self {
        ScanParameters {
            x_pixel: 256,
            y_pixel: 256,
            x_range: 100.0,
            y_range: 100.0,
            angle: 0.0,
            x_center: 0.0,
            y_center: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor payload
// ---------------------------------------------------------------------------

/// Description of one topography (`.int`) file as given by the descriptor.
#[derive(Debug, Clone, Default)]
pub struct TopoFileDesc {
    pub filename: String,
    pub caption: Option<String>,
    /// Value scale applied to the raw integers during decode.
    pub scale: Option<f64>,
    pub phys_unit: Option<String>,
    pub offset: Option<f64>,
    pub signal_type: Option<String>,
    pub direction: Option<ScanDirection>,
}

/// Description of one spectroscopy (`.dat`) file as given by the descriptor.
#[derive(Debug, Clone)]
pub struct SpecFileDesc {
    pub filename: String,
    pub caption: Option<String>,
    pub measurement_mode: MeasurementMode,
    pub measurement_type: Option<String>,
    /// Declared grid size `[gx, gy]` for CITS measurements.
    pub grid_size: Option<[usize; 2]>,
    pub header_cols: Option<usize>,
    pub header_rows: Option<usize>,
    pub delays: Vec<f64>,
    pub slew_rates: Vec<f64>,
    pub average: Option<u32>,
    pub signal_type: Option<String>,
    pub direction: Option<ScanDirection>,
}

impl Default for SpecFileDesc {
    fn default() -> Self {
        SpecFileDesc {
            filename: String::new(),
            caption: None,
            measurement_mode: MeasurementMode::Unknown,
            measurement_type: None,
            grid_size: None,
            header_cols: None,
            header_rows: None,
            delays: Vec::new(),
            slew_rates: Vec::new(),
            average: None,
            signal_type: None,
            direction: None,
        }
    }
}

/// The fully parsed experiment descriptor. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct DescriptorData {
    /// All `Key : value` pairs found outside file-description blocks.
    pub metadata: BTreeMap<String, String>,
    pub scan: ScanParameters,
    pub topo_files: Vec<TopoFileDesc>,
    pub spec_files: Vec<SpecFileDesc>,
    /// Distinct signal types seen across all file descriptions.
    pub signal_types: Vec<String>,
}

impl DescriptorData {
    /// Find the topography description whose filename stem matches `stem`.
    pub fn topo_desc_for_stem(&self, stem: &str) -> Option<&TopoFileDesc> {
        self.topo_files
            .iter()
            .find(|d| file_stem_of(&d.filename) == stem)
    }

    /// Find the spectroscopy description whose filename stem matches `stem`.
    pub fn spec_desc_for_stem(&self, stem: &str) -> Option<&SpecFileDesc> {
        self.spec_files
            .iter()
            .find(|d| file_stem_of(&d.filename) == stem)
    }

    pub fn total_files(&self) -> usize {
        self.topo_files.len() + self.spec_files.len()
    }
}

/// Filename stem (name without the final extension).
pub fn file_stem_of(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}

// ---------------------------------------------------------------------------
// Topography payload
// ---------------------------------------------------------------------------

/// A decoded height map. The value scale has already been applied and rows
/// are ordered bottom-up (origin at the bottom-left corner).
#[derive(Debug, Clone)]
pub struct TopographyData {
    /// Height array shaped `(y_pixels, x_pixels)`.
    pub image: Array2<f64>,
    pub x_range: f64,
    pub y_range: f64,
    pub x_pixels: usize,
    pub y_pixels: usize,
    /// Scale factor taken from the descriptor for this file.
    pub data_scale: f64,
    pub signal_type: String,
    pub direction: Option<ScanDirection>,
}

impl TopographyData {
    pub fn shape(&self) -> (usize, usize) {
        self.image.dim()
    }

    pub fn pixel_scale_x(&self) -> f64 {
        if self.x_pixels == 0 {
            1.0
        } else {
            self.x_range / self.x_pixels as f64
        }
    }

    pub fn pixel_scale_y(&self) -> f64 {
        if self.y_pixels == 0 {
            1.0
        } else {
            self.y_range / self.y_pixels as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Spectroscopy payloads
// ---------------------------------------------------------------------------

/// A CITS cube: one bias sweep per point of a full 2-D grid.
#[derive(Debug, Clone)]
pub struct CitsData {
    /// Measurement cube shaped `(n_bias, grid_y, grid_x)`.
    pub data: Array3<f64>,
    /// Bias set-points; `len() == data.shape()[0]`.
    pub bias_values: Array1<f64>,
    /// Grid size `[gx, gy]`.
    pub grid_size: [usize; 2],
    pub x_range: f64,
    pub y_range: f64,
    pub scan_direction: SlowScanDirection,
}

impl CitsData {
    pub fn n_bias_points(&self) -> usize {
        self.bias_values.len()
    }

    pub fn bias_range(&self) -> (f64, f64) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in self.bias_values.iter() {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        (lo, hi)
    }

    /// 2-D slice of the cube at the given bias index.
    pub fn bias_slice(&self, bias_index: usize) -> Option<ArrayView2<'_, f64>> {
        if bias_index < self.data.len_of(Axis(0)) {
            Some(self.data.index_axis(Axis(0), bias_index))
        } else {
            None
        }
    }
}

/// An STS dataset: one bias sweep per discrete measurement point.
#[derive(Debug, Clone)]
pub struct StsData {
    /// Measurement matrix shaped `(n_bias, n_points)`.
    pub data: Array2<f64>,
    pub bias_values: Array1<f64>,
    /// Per-point coordinates; `len() == data.shape()[1]`.
    pub x_coords: Array1<f64>,
    pub y_coords: Array1<f64>,
}

impl StsData {
    pub fn n_points(&self) -> usize {
        self.data.ncols()
    }

    pub fn n_bias_points(&self) -> usize {
        self.bias_values.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn pixel_scale_is_extent_over_pixel_count() {
        let params = ScanParameters {
            x_pixel: 200,
            y_pixel: 100,
            x_range: 100.0,
            y_range: 50.0,
            ..ScanParameters::default()
        };
        assert_eq!(params.pixel_scale_x(), 0.5);
        assert_eq!(params.pixel_scale_y(), 0.5);
        assert_eq!(params.aspect_ratio(), 2.0);
        assert_eq!(params.total_pixels(), 20_000);
    }

    #[test]
    fn file_record_naming_and_sizes() {
        let mut record = FileRecord::new("/data/b_TopoFwd.int", DataKind::Topography, 512);
        assert_eq!(record.filename(), "b_TopoFwd.int");
        assert_eq!(record.stem(), "b_TopoFwd");
        assert_eq!(record.human_readable_size(), "512 B");
        record.size = 2048;
        assert_eq!(record.human_readable_size(), "2.0 KB");
        record.size = 3 * 1024 * 1024;
        assert_eq!(record.human_readable_size(), "3.0 MB");
    }

    #[test]
    fn decoded_result_success_tracks_error_list() {
        let mut result: DecodedResult<()> = DecodedResult::new();
        assert!(result.success());
        result.add_warning("just a warning");
        assert!(result.success());
        result.add_error("broke");
        assert!(!result.success());
    }

    #[test]
    fn bias_slice_bounds() {
        let cits = CitsData {
            data: Array3::zeros((3, 2, 2)),
            bias_values: array![-1.0, 0.0, 1.0],
            grid_size: [2, 2],
            x_range: 10.0,
            y_range: 10.0,
            scan_direction: SlowScanDirection::Upward,
        };
        assert!(cits.bias_slice(2).is_some());
        assert!(cits.bias_slice(3).is_none());
        assert_eq!(cits.bias_range(), (-1.0, 1.0));
    }

    #[test]
    fn file_stem_strips_extension() {
        assert_eq!(file_stem_of("exp_TopoFwd.int"), "exp_TopoFwd");
        assert_eq!(file_stem_of("noext"), "noext");
    }
}
