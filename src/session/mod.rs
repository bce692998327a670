/// Session layer: ownership of all type managers, the key registry and the
/// per-kind decode pipelines.
///
/// Architecture:
/// ```text
///   Session::open(experiment.txt)
///        │ parse descriptor, register keys + aliases
///        ▼
///  ┌───────────────────────────────────────────────┐
///  │ Session                                       │
///  │   KeyRegistry  (full key / alias → kind)      │
///  │   TypeManager<DescriptorData, …>              │
///  │   TypeManager<TopographyData, …>              │
///  │   TypeManager<CitsData, …>                    │
///  │   TypeManager<StsData, …>                     │
///  └───────────────────────────────────────────────┘
///        │ session.file("topofwd")
///        ▼
///   FileAccessor (lazy load / analyzer / unload per key)
/// ```
pub mod accessor;
pub mod keys;
pub mod manager;

pub use accessor::FileAccessor;
pub use keys::{
    derive_signal, guess_kind_from_filename, KeyRegistry, KindGuess, SignalInfo, SignalTokens,
    DEFAULT_SIGNAL_TOKENS,
};
pub use manager::{CacheDiagnostics, TypeManager, DEFAULT_CACHE_CAPACITY};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use ndarray::Array1;
use serde::Serialize;

use crate::analysis::cits::assemble_cits;
use crate::analyzers::{CitsAnalyzer, DescriptorAnalyzer, StsAnalyzer, TopoAnalyzer};
use crate::data::descriptor::parse_descriptor;
use crate::data::model::{
    file_stem_of, CitsData, DataKind, DecodedResult, DescriptorData, FileRecord,
    MeasurementMode, ScanDirection, ScanParameters, StsData, TopographyData,
};
use crate::data::table::read_dat_file;
use crate::data::topo::decode_int_file;
use crate::error::{Result, SpmError};

/// Alias under which the descriptor itself is always reachable.
pub const DESCRIPTOR_ALIAS: &str = "descriptor";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Session-construction options.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-manager cache capacity.
    pub cache_capacity: usize,
    /// Known signal names used for alias derivation.
    pub signal_tokens: SignalTokens,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            signal_tokens: SignalTokens::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Envelope summarizing one load attempt, suitable for batch operations.
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    pub key: String,
    pub kind: Option<DataKind>,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LoadOutcome {
    fn from_result<P>(key: &str, kind: DataKind, result: &DecodedResult<P>) -> Self {
        LoadOutcome {
            key: key.to_string(),
            kind: Some(kind),
            success: result.success(),
            errors: result.errors.clone(),
            warnings: result.warnings.clone(),
        }
    }

    fn unresolved(key: &str, error: String) -> Self {
        LoadOutcome {
            key: key.to_string(),
            kind: None,
            success: false,
            errors: vec![error],
            warnings: Vec::new(),
        }
    }
}

/// File counts per kind.
#[derive(Debug, Clone, Serialize)]
pub struct FileCounts {
    pub descriptor: usize,
    pub topography: usize,
    pub cits: usize,
    pub sts: usize,
    pub total: usize,
}

/// Cache diagnostics for every manager.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDiagnostics {
    pub descriptor: CacheDiagnostics,
    pub topography: CacheDiagnostics,
    pub cits: CacheDiagnostics,
    pub sts: CacheDiagnostics,
}

/// Serializable digest of the whole session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub experiment_name: String,
    pub descriptor_path: String,
    pub available: FileCounts,
    pub loaded: FileCounts,
    pub scan_parameters: Option<ScanParameters>,
    pub diagnostics: SessionDiagnostics,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Owns every type manager and the key registry; the single entry point for
/// opening an experiment and resolving its datasets.
pub struct Session {
    descriptor_path: PathBuf,
    base_dir: PathBuf,
    experiment_name: String,
    descriptor_key: String,
    tokens: SignalTokens,
    registry: KeyRegistry,
    pub(crate) descriptors: TypeManager<DescriptorData, DescriptorAnalyzer>,
    pub(crate) topo: TypeManager<TopographyData, TopoAnalyzer>,
    pub(crate) cits: TypeManager<CitsData, CitsAnalyzer>,
    pub(crate) sts: TypeManager<StsData, StsAnalyzer>,
}

impl Session {
    /// Open an experiment with the default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Session> {
        Self::open_with(path, SessionConfig::default())
    }

    /// Open an experiment descriptor and register every file it names.
    ///
    /// Fails with `NotFound` for a missing path, `InvalidFormat` for a
    /// non-`.txt` path and `ParseFailure` (aggregating all parser errors)
    /// when the descriptor cannot be parsed. Associated files are only
    /// registered here; nothing else is decoded until first access.
    pub fn open_with(path: impl AsRef<Path>, config: SessionConfig) -> Result<Session> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)
            .map_err(|e| SpmError::NotFound(format!("descriptor {}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(SpmError::InvalidFormat(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            return Err(SpmError::InvalidFormat(format!(
                "{} is not a .txt descriptor",
                path.display()
            )));
        }

        let descriptor_key = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "experiment".to_string());
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let capacity = config.cache_capacity;
        let mut session = Session {
            descriptor_path: path.to_path_buf(),
            base_dir,
            experiment_name: descriptor_key.clone(),
            descriptor_key: descriptor_key.clone(),
            tokens: config.signal_tokens,
            registry: KeyRegistry::new(),
            descriptors: TypeManager::new("descriptor", capacity),
            topo: TypeManager::new("topography", capacity),
            cits: TypeManager::new("cits", capacity),
            sts: TypeManager::new("sts", capacity),
        };

        session.descriptors.register(
            &descriptor_key,
            FileRecord::new(path, DataKind::Descriptor, metadata.len()),
        );
        session
            .registry
            .register_key(&descriptor_key, DataKind::Descriptor);
        session
            .registry
            .register_alias(DESCRIPTOR_ALIAS, &descriptor_key);

        let result = session.load_descriptor(false);
        if !result.success() {
            return Err(SpmError::ParseFailure(format!(
                "descriptor parse failed: {}",
                result.errors.join("; ")
            )));
        }
        if let Some(data) = result.payload.clone() {
            session.register_associated_files(&data);
        }

        info!(
            "session opened: {} ({} keys)",
            session.experiment_name,
            session.registry.known_keys().len()
        );
        Ok(session)
    }

    // -- Registration ------------------------------------------------------

    fn register_associated_files(&mut self, data: &DescriptorData) {
        for desc in &data.topo_files {
            let path = self.base_dir.join(&desc.filename);
            let Ok(meta) = std::fs::metadata(&path) else {
                debug!("skipping missing file {}", path.display());
                continue;
            };
            let stem = file_stem_of(&desc.filename).to_string();

            let mut record = FileRecord::new(&path, DataKind::Topography, meta.len());
            record.signal_type = desc.signal_type.clone();
            record.direction = desc.direction;
            self.topo.register(&stem, record);
            self.registry.register_key(&stem, DataKind::Topography);

            let info = SignalInfo {
                signal: desc
                    .signal_type
                    .clone()
                    .unwrap_or_else(|| derive_signal(&stem, &self.tokens).signal),
                direction: desc.direction,
            };
            self.registry.register_alias(&info.alias(), &stem);
        }

        for desc in &data.spec_files {
            let path = self.base_dir.join(&desc.filename);
            let Ok(meta) = std::fs::metadata(&path) else {
                debug!("skipping missing file {}", path.display());
                continue;
            };
            let stem = file_stem_of(&desc.filename).to_string();

            let kind = match desc.measurement_mode {
                MeasurementMode::Cits => DataKind::Cits,
                MeasurementMode::Sts => DataKind::Sts,
                MeasurementMode::Unknown => match guess_kind_from_filename(&desc.filename) {
                    KindGuess::Cits => {
                        warn!(
                            "unrecognized measurement mode for {}; filename suggests CITS",
                            desc.filename
                        );
                        DataKind::Cits
                    }
                    _ => {
                        warn!(
                            "unrecognized measurement mode for {}; defaulting to STS",
                            desc.filename
                        );
                        DataKind::Sts
                    }
                },
            };

            let mut record = FileRecord::new(&path, kind, meta.len());
            record.signal_type = desc.signal_type.clone();
            record.direction = desc.direction;
            match kind {
                DataKind::Cits => self.cits.register(&stem, record),
                _ => self.sts.register(&stem, record),
            }
            self.registry.register_key(&stem, kind);

            let mut alias = desc
                .measurement_type
                .clone()
                .filter(|t| !t.is_empty() && t != "unknown")
                .unwrap_or_else(|| {
                    let info = derive_signal(&stem, &self.tokens);
                    if info.signal != "unknown" {
                        info.alias()
                    } else {
                        stem.rsplit('_').next().unwrap_or(&stem).to_string()
                    }
                });
            if desc.filename.contains("_Matrix") && !alias.contains("_Matrix") {
                alias.push_str("_Matrix");
            }
            self.registry.register_alias(&alias, &stem);
        }
    }

    // -- Lookup ------------------------------------------------------------

    /// Resolve a full key or case-insensitive alias. Never decodes.
    pub fn resolve(&self, key: &str) -> Result<(String, DataKind)> {
        self.registry.resolve(key)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.registry.resolve(key).is_ok()
    }

    /// Accessor for one dataset; fails only on key resolution.
    pub fn file(&mut self, key: &str) -> Result<FileAccessor<'_>> {
        let (full_key, kind) = self.registry.resolve(key)?;
        Ok(FileAccessor::new(self, full_key, kind))
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn descriptor_path(&self) -> &Path {
        &self.descriptor_path
    }

    pub fn descriptor_key(&self) -> &str {
        &self.descriptor_key
    }

    pub fn keys_of_kind(&self, kind: DataKind) -> Vec<String> {
        self.registry.full_keys_of_kind(kind)
    }

    pub fn aliases(&self) -> &std::collections::BTreeMap<String, String> {
        self.registry.aliases()
    }

    /// Registered keys whose descriptor signal tag matches.
    pub fn find_by_signal_type(&self, signal: &str) -> Vec<String> {
        let mut keys = Vec::new();
        for records in [self.topo.records(), self.cits.records(), self.sts.records()] {
            for (key, record) in records {
                if record.signal_type.as_deref() == Some(signal) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// Topography keys scanned in the given fast-axis direction.
    pub fn find_by_direction(&self, direction: ScanDirection) -> Vec<String> {
        self.topo
            .records()
            .iter()
            .filter(|(_, record)| record.direction == Some(direction))
            .map(|(key, _)| key.clone())
            .collect()
    }

    // -- Loading -----------------------------------------------------------

    /// Load one key (cache-aware); never fails outward.
    pub fn load(&mut self, key: &str) -> LoadOutcome {
        match self.registry.resolve(key) {
            Ok((full_key, kind)) => self.load_resolved(&full_key, kind, false),
            Err(e) => LoadOutcome::unresolved(key, e.to_string()),
        }
    }

    /// Load many keys; one failed key never aborts the rest.
    pub fn load_many<'k>(&mut self, keys: impl IntoIterator<Item = &'k str>) -> Vec<LoadOutcome> {
        keys.into_iter().map(|key| self.load(key)).collect()
    }

    pub(crate) fn load_resolved(
        &mut self,
        full_key: &str,
        kind: DataKind,
        force: bool,
    ) -> LoadOutcome {
        match kind {
            DataKind::Descriptor => {
                let result = self.load_descriptor(force);
                LoadOutcome::from_result(full_key, kind, &result)
            }
            DataKind::Topography => {
                let result = self.load_topography(full_key, force);
                LoadOutcome::from_result(full_key, kind, &result)
            }
            DataKind::Cits => {
                let result = self.load_cits(full_key, force);
                LoadOutcome::from_result(full_key, kind, &result)
            }
            DataKind::Sts => {
                let result = self.load_sts(full_key, force);
                LoadOutcome::from_result(full_key, kind, &result)
            }
        }
    }

    pub(crate) fn load_descriptor(&mut self, force: bool) -> DecodedResult<DescriptorData> {
        let key = self.descriptor_key.clone();
        let tokens = self.tokens.clone();
        self.descriptors
            .load_with(&key, force, |record| parse_descriptor(&record.path, &tokens))
    }

    pub(crate) fn load_topography(
        &mut self,
        full_key: &str,
        force: bool,
    ) -> DecodedResult<TopographyData> {
        let descriptor = self.load_descriptor(false);
        self.topo
            .load_with(full_key, force, |record| decode_topography(record, &descriptor))
    }

    pub(crate) fn load_cits(&mut self, full_key: &str, force: bool) -> DecodedResult<CitsData> {
        let descriptor = self.load_descriptor(false);
        self.cits
            .load_with(full_key, force, |record| decode_cits(record, &descriptor))
    }

    pub(crate) fn load_sts(&mut self, full_key: &str, force: bool) -> DecodedResult<StsData> {
        self.sts.load_with(full_key, force, decode_sts)
    }

    // -- Analyzers ---------------------------------------------------------

    pub(crate) fn descriptor_analyzer(&mut self) -> Result<&mut DescriptorAnalyzer> {
        let key = self.descriptor_key.clone();
        let tokens = self.tokens.clone();
        self.descriptors.analyzer_with(
            &key,
            |record| parse_descriptor(&record.path, &tokens),
            DescriptorAnalyzer::new,
        )
    }

    pub(crate) fn topo_analyzer(&mut self, full_key: &str) -> Result<&mut TopoAnalyzer> {
        let descriptor = self.load_descriptor(false);
        self.topo.analyzer_with(
            full_key,
            |record| decode_topography(record, &descriptor),
            TopoAnalyzer::new,
        )
    }

    pub(crate) fn cits_analyzer(&mut self, full_key: &str) -> Result<&mut CitsAnalyzer> {
        let descriptor = self.load_descriptor(false);
        self.cits.analyzer_with(
            full_key,
            |record| decode_cits(record, &descriptor),
            CitsAnalyzer::new,
        )
    }

    pub(crate) fn sts_analyzer(&mut self, full_key: &str) -> Result<&mut StsAnalyzer> {
        self.sts
            .analyzer_with(full_key, decode_sts, StsAnalyzer::new)
    }

    // -- Maintenance -------------------------------------------------------

    /// Scan parameters from the (lazily loaded) descriptor.
    pub fn scan_parameters(&mut self) -> Result<ScanParameters> {
        let result = self.load_descriptor(false);
        match result.payload {
            Some(data) if result.success() => Ok(data.scan.clone()),
            _ => Err(SpmError::ParseFailure(format!(
                "descriptor unavailable: {}",
                result.errors.join("; ")
            ))),
        }
    }

    /// Unload every cached dataset; returns the number of dropped entries.
    pub fn unload_all(&mut self, include_descriptor: bool) -> usize {
        let mut count = 0;
        for key in self.topo.loaded_keys() {
            if self.topo.unload(&key) {
                count += 1;
            }
        }
        for key in self.cits.loaded_keys() {
            if self.cits.unload(&key) {
                count += 1;
            }
        }
        for key in self.sts.loaded_keys() {
            if self.sts.unload(&key) {
                count += 1;
            }
        }
        if include_descriptor {
            for key in self.descriptors.loaded_keys() {
                if self.descriptors.unload(&key) {
                    count += 1;
                }
            }
        }
        info!("unloaded {count} cached datasets");
        count
    }

    /// Clear every cache and analyzer.
    pub fn clear_caches(&mut self) {
        self.descriptors.clear_cache();
        self.topo.clear_cache();
        self.cits.clear_cache();
        self.sts.clear_cache();
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        SessionDiagnostics {
            descriptor: self.descriptors.diagnostics(),
            topography: self.topo.diagnostics(),
            cits: self.cits.diagnostics(),
            sts: self.sts.diagnostics(),
        }
    }

    pub fn summary(&mut self) -> SessionSummary {
        let available = FileCounts {
            descriptor: self.descriptors.records().len(),
            topography: self.topo.records().len(),
            cits: self.cits.records().len(),
            sts: self.sts.records().len(),
            total: self.descriptors.records().len()
                + self.topo.records().len()
                + self.cits.records().len()
                + self.sts.records().len(),
        };
        let loaded = FileCounts {
            descriptor: self.descriptors.loaded_keys().len(),
            topography: self.topo.loaded_keys().len(),
            cits: self.cits.loaded_keys().len(),
            sts: self.sts.loaded_keys().len(),
            total: self.descriptors.loaded_keys().len()
                + self.topo.loaded_keys().len()
                + self.cits.loaded_keys().len()
                + self.sts.loaded_keys().len(),
        };

        SessionSummary {
            experiment_name: self.experiment_name.clone(),
            descriptor_path: self.descriptor_path.display().to_string(),
            available,
            loaded,
            scan_parameters: self.scan_parameters().ok(),
            diagnostics: self.diagnostics(),
        }
    }
}

// ---------------------------------------------------------------------------
// Kind-specific decode pipelines
// ---------------------------------------------------------------------------

fn decode_topography(
    record: &FileRecord,
    descriptor: &DecodedResult<DescriptorData>,
) -> DecodedResult<TopographyData> {
    let Some(desc) = descriptor.payload.as_deref() else {
        return DecodedResult::failure(format!(
            "descriptor unavailable for '{}': {}",
            record.stem(),
            descriptor.errors.join("; ")
        ));
    };

    let mut result = DecodedResult::new();
    result.insert_metadata("path", record.path.display());
    result.insert_metadata("type", "topography");

    let stem = record.stem();
    let scale = match desc.topo_desc_for_stem(&stem).and_then(|d| d.scale) {
        Some(scale) => scale,
        None => {
            result.add_warning(format!("no scale for '{stem}' in descriptor; using 1.0"));
            1.0
        }
    };

    let scan = &desc.scan;
    match decode_int_file(&record.path, scale, scan.x_pixel, scan.y_pixel) {
        Ok((image, warnings)) => {
            for warning in warnings {
                result.add_warning(warning);
            }
            result.insert_metadata("image_shape", format!("{}x{}", scan.y_pixel, scan.x_pixel));
            result.insert_metadata("data_scale", scale);
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for &v in image.iter() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
            result.derived.insert("data_min".to_string(), lo.to_string());
            result.derived.insert("data_max".to_string(), hi.to_string());
            result.payload = Some(Arc::new(TopographyData {
                image,
                x_range: scan.x_range,
                y_range: scan.y_range,
                x_pixels: scan.x_pixel,
                y_pixels: scan.y_pixel,
                data_scale: scale,
                signal_type: record
                    .signal_type
                    .clone()
                    .unwrap_or_else(|| "Topo".to_string()),
                direction: record.direction,
            }));
        }
        Err(e) => result.add_error(format!("reading {}: {e}", record.path.display())),
    }
    result
}

fn decode_cits(
    record: &FileRecord,
    descriptor: &DecodedResult<DescriptorData>,
) -> DecodedResult<CitsData> {
    let Some(desc) = descriptor.payload.as_deref() else {
        return DecodedResult::failure(format!(
            "descriptor unavailable for '{}': {}",
            record.stem(),
            descriptor.errors.join("; ")
        ));
    };

    let mut result = DecodedResult::new();
    result.insert_metadata("path", record.path.display());
    result.insert_metadata("measurement_mode", "CITS");

    let table = match read_dat_file(&record.path) {
        Ok(table) => table,
        Err(e) => {
            result.add_error(e);
            return result;
        }
    };
    for warning in &table.warnings {
        result.add_warning(warning.clone());
    }

    let stem = record.stem();
    let declared_grid = desc
        .spec_desc_for_stem(&stem)
        .and_then(|d| d.grid_size)
        .unwrap_or([desc.scan.x_pixel, desc.scan.y_pixel]);

    let assembly = assemble_cits(
        &table.matrix,
        &table.x_coords,
        &table.y_coords,
        declared_grid,
        desc.scan.angle,
        (desc.scan.x_center, desc.scan.y_center),
    );
    for warning in &assembly.warnings {
        result.add_warning(warning.clone());
    }

    result.insert_metadata("scan_direction", assembly.direction.as_str());
    result.insert_metadata("grid", format!("{}x{}", assembly.grid[0], assembly.grid[1]));
    result.insert_metadata("n_bias_points", table.bias_values.len());
    if let (Some(lo), Some(hi)) = (
        table.bias_values.iter().cloned().reduce(f64::min),
        table.bias_values.iter().cloned().reduce(f64::max),
    ) {
        result.derived.insert("bias_min".to_string(), lo.to_string());
        result.derived.insert("bias_max".to_string(), hi.to_string());
    }

    result.payload = Some(Arc::new(CitsData {
        data: assembly.cube,
        bias_values: table.bias_values,
        grid_size: assembly.grid,
        x_range: desc.scan.x_range,
        y_range: desc.scan.y_range,
        scan_direction: assembly.direction,
    }));
    result
}

fn decode_sts(record: &FileRecord) -> DecodedResult<StsData> {
    let mut result = DecodedResult::new();
    result.insert_metadata("path", record.path.display());
    result.insert_metadata("measurement_mode", "STS");

    match read_dat_file(&record.path) {
        Ok(table) => {
            for warning in &table.warnings {
                result.add_warning(warning.clone());
            }
            result.insert_metadata("n_points", table.x_coords.len());
            result.insert_metadata("n_bias_points", table.bias_values.len());
            result.payload = Some(Arc::new(StsData {
                data: table.matrix,
                bias_values: table.bias_values,
                x_coords: Array1::from(table.x_coords),
                y_coords: Array1::from(table.y_coords),
            }));
        }
        Err(e) => result.add_error(e),
    }
    result
}
