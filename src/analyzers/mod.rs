/// Per-dataset analyzers, one type per kind.
///
/// A manager memoizes exactly one analyzer per cached key; the analyzer is
/// discarded together with its cache entry. Analyzers share the decoded
/// payload through an `Arc` and keep any derived state (processed images)
/// to themselves.
pub mod descriptor;
pub mod spectro;
pub mod topo;

pub use descriptor::{DescriptorAnalyzer, ExperimentSummary};
pub use spectro::{CitsAnalyzer, StsAnalyzer};
pub use topo::{SurfaceStats, TopoAnalyzer};
