use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analyzers::{CitsAnalyzer, DescriptorAnalyzer, StsAnalyzer, TopoAnalyzer};
use crate::data::model::{
    CitsData, DataKind, DecodedResult, DescriptorData, FileRecord, StsData, TopographyData,
};
use crate::error::{Result, SpmError};
use crate::session::{LoadOutcome, Session};

// ---------------------------------------------------------------------------
// FileAccessor – per-key façade
// ---------------------------------------------------------------------------

/// Uniform access to one registered dataset: payload, metadata, analyzer,
/// reload and unload.
///
/// An accessor owns no data. It borrows the session and carries only the
/// resolved full key and kind. Payload getters load lazily through the
/// owning manager; kind-mismatched getters fail with `Unsupported`.
pub struct FileAccessor<'a> {
    session: &'a mut Session,
    full_key: String,
    kind: DataKind,
}

impl<'a> FileAccessor<'a> {
    pub(crate) fn new(session: &'a mut Session, full_key: String, kind: DataKind) -> Self {
        FileAccessor {
            session,
            full_key,
            kind,
        }
    }

    pub fn full_key(&self) -> &str {
        &self.full_key
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Snapshot of the file record.
    pub fn record(&self) -> Option<FileRecord> {
        match self.kind {
            DataKind::Descriptor => self.session.descriptors.record(&self.full_key).cloned(),
            DataKind::Topography => self.session.topo.record(&self.full_key).cloned(),
            DataKind::Cits => self.session.cits.record(&self.full_key).cloned(),
            DataKind::Sts => self.session.sts.record(&self.full_key).cloned(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        match self.kind {
            DataKind::Descriptor => self.session.descriptors.is_loaded(&self.full_key),
            DataKind::Topography => self.session.topo.is_loaded(&self.full_key),
            DataKind::Cits => self.session.cits.is_loaded(&self.full_key),
            DataKind::Sts => self.session.sts.is_loaded(&self.full_key),
        }
    }

    /// Load (cache-aware) and report the outcome; never fails outward.
    pub fn load(&mut self) -> LoadOutcome {
        self.session.load_resolved(&self.full_key, self.kind, false)
    }

    /// Re-run the decode even when a cached result exists.
    pub fn reload(&mut self) -> LoadOutcome {
        self.session.load_resolved(&self.full_key, self.kind, true)
    }

    /// Drop the cached result and analyzer.
    pub fn unload(&mut self) -> bool {
        match self.kind {
            DataKind::Descriptor => self.session.descriptors.unload(&self.full_key),
            DataKind::Topography => self.session.topo.unload(&self.full_key),
            DataKind::Cits => self.session.cits.unload(&self.full_key),
            DataKind::Sts => self.session.sts.unload(&self.full_key),
        }
    }

    /// Decode metadata for this key (loads if needed).
    pub fn metadata(&mut self) -> BTreeMap<String, String> {
        match self.kind {
            DataKind::Descriptor => self.session.load_descriptor(false).metadata,
            DataKind::Topography => self.session.load_topography(&self.full_key, false).metadata,
            DataKind::Cits => self.session.load_cits(&self.full_key, false).metadata,
            DataKind::Sts => self.session.load_sts(&self.full_key, false).metadata,
        }
    }

    // -- Typed payload access ---------------------------------------------

    pub fn descriptor(&mut self) -> Result<Arc<DescriptorData>> {
        self.expect_kind(DataKind::Descriptor)?;
        let result = self.session.load_descriptor(false);
        payload_or_error(result, &self.full_key)
    }

    pub fn topography(&mut self) -> Result<Arc<TopographyData>> {
        self.expect_kind(DataKind::Topography)?;
        let result = self.session.load_topography(&self.full_key, false);
        payload_or_error(result, &self.full_key)
    }

    pub fn cits(&mut self) -> Result<Arc<CitsData>> {
        self.expect_kind(DataKind::Cits)?;
        let result = self.session.load_cits(&self.full_key, false);
        payload_or_error(result, &self.full_key)
    }

    pub fn sts(&mut self) -> Result<Arc<StsData>> {
        self.expect_kind(DataKind::Sts)?;
        let result = self.session.load_sts(&self.full_key, false);
        payload_or_error(result, &self.full_key)
    }

    // -- Analyzer access ---------------------------------------------------

    pub fn descriptor_analyzer(&mut self) -> Result<&mut DescriptorAnalyzer> {
        self.expect_kind(DataKind::Descriptor)?;
        self.session.descriptor_analyzer()
    }

    pub fn topo_analyzer(&mut self) -> Result<&mut TopoAnalyzer> {
        self.expect_kind(DataKind::Topography)?;
        self.session.topo_analyzer(&self.full_key)
    }

    pub fn cits_analyzer(&mut self) -> Result<&mut CitsAnalyzer> {
        self.expect_kind(DataKind::Cits)?;
        self.session.cits_analyzer(&self.full_key)
    }

    pub fn sts_analyzer(&mut self) -> Result<&mut StsAnalyzer> {
        self.expect_kind(DataKind::Sts)?;
        self.session.sts_analyzer(&self.full_key)
    }

    fn expect_kind(&self, expected: DataKind) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(SpmError::Unsupported(format!(
                "'{}' is a {} dataset, not {}",
                self.full_key, self.kind, expected
            )))
        }
    }
}

fn payload_or_error<P>(result: DecodedResult<P>, key: &str) -> Result<Arc<P>> {
    if !result.success() {
        return Err(SpmError::ParseFailure(format!(
            "failed to load '{key}': {}",
            result.errors.join("; ")
        )));
    }
    result.payload.ok_or_else(|| {
        SpmError::ParseFailure(format!("load of '{key}' produced no payload"))
    })
}
