use std::sync::Arc;

use serde::Serialize;

use crate::data::model::{DescriptorData, MeasurementMode, ScanParameters};

// ---------------------------------------------------------------------------
// Descriptor analyzer
// ---------------------------------------------------------------------------

/// Digest of an experiment descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub n_topo_files: usize,
    pub n_spec_files: usize,
    pub n_cits: usize,
    pub n_sts: usize,
    pub signal_types: Vec<String>,
    pub experiment_type: String,
    pub scan: ScanParameters,
}

/// Read-only analysis over the parsed descriptor.
pub struct DescriptorAnalyzer {
    data: Arc<DescriptorData>,
}

impl DescriptorAnalyzer {
    pub fn new(data: Arc<DescriptorData>) -> Self {
        DescriptorAnalyzer { data }
    }

    pub fn data(&self) -> &DescriptorData {
        &self.data
    }

    pub fn summary(&self) -> ExperimentSummary {
        let n_cits = self
            .data
            .spec_files
            .iter()
            .filter(|d| d.measurement_mode == MeasurementMode::Cits)
            .count();
        let n_sts = self.data.spec_files.len() - n_cits;

        ExperimentSummary {
            n_topo_files: self.data.topo_files.len(),
            n_spec_files: self.data.spec_files.len(),
            n_cits,
            n_sts,
            signal_types: self.data.signal_types.clone(),
            experiment_type: self.experiment_type().to_string(),
            scan: self.data.scan.clone(),
        }
    }

    /// Coarse experiment classification from the file mix.
    pub fn experiment_type(&self) -> &'static str {
        let has_topo = !self.data.topo_files.is_empty();
        let has_cits = self
            .data
            .spec_files
            .iter()
            .any(|d| d.measurement_mode == MeasurementMode::Cits);
        let has_spec = !self.data.spec_files.is_empty();

        match (has_topo, has_cits, has_spec) {
            (true, true, _) => "topography_with_cits",
            (true, false, true) => "topography_with_sts",
            (true, false, false) => "topography",
            (false, true, _) => "cits",
            (false, false, true) => "sts",
            (false, false, false) => "empty",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{SpecFileDesc, TopoFileDesc};
    use std::collections::BTreeMap;

    fn descriptor(topo: usize, cits: usize, sts: usize) -> DescriptorAnalyzer {
        let topo_files = (0..topo)
            .map(|i| TopoFileDesc {
                filename: format!("t{i}.int"),
                ..TopoFileDesc::default()
            })
            .collect();
        let mut spec_files: Vec<SpecFileDesc> = Vec::new();
        for i in 0..cits {
            spec_files.push(SpecFileDesc {
                filename: format!("c{i}.dat"),
                measurement_mode: MeasurementMode::Cits,
                ..SpecFileDesc::default()
            });
        }
        for i in 0..sts {
            spec_files.push(SpecFileDesc {
                filename: format!("s{i}.dat"),
                measurement_mode: MeasurementMode::Sts,
                ..SpecFileDesc::default()
            });
        }
        DescriptorAnalyzer::new(Arc::new(DescriptorData {
            metadata: BTreeMap::new(),
            scan: ScanParameters::default(),
            topo_files,
            spec_files,
            signal_types: vec!["Topo".to_string()],
        }))
    }

    #[test]
    fn summary_counts_modes() {
        let summary = descriptor(2, 1, 3).summary();
        assert_eq!(summary.n_topo_files, 2);
        assert_eq!(summary.n_cits, 1);
        assert_eq!(summary.n_sts, 3);
        assert_eq!(summary.experiment_type, "topography_with_cits");
    }

    #[test]
    fn experiment_type_classification() {
        assert_eq!(descriptor(1, 0, 0).experiment_type(), "topography");
        assert_eq!(descriptor(0, 1, 0).experiment_type(), "cits");
        assert_eq!(descriptor(0, 0, 2).experiment_type(), "sts");
        assert_eq!(descriptor(1, 0, 1).experiment_type(), "topography_with_sts");
        assert_eq!(descriptor(0, 0, 0).experiment_type(), "empty");
    }
}
