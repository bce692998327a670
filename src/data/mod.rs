/// Data layer: core types and the on-disk format decoders.
///
/// Architecture:
/// ```text
///   experiment.txt          *.int              *.dat
///        │                    │                  │
///        ▼                    ▼                  ▼
///  ┌────────────┐      ┌────────────┐     ┌────────────┐
///  │ descriptor │      │    topo     │     │   table    │
///  └────────────┘      └────────────┘     └────────────┘
///        │                    │                  │
///        ▼                    ▼                  ▼
///  DescriptorData      TopographyData     SpectroTable → CitsData / StsData
/// ```
///
/// Every decoder reports through the [`model::DecodedResult`] envelope (or a
/// plain `Result` that the session wraps into one), so a bad file never
/// aborts a batch.
pub mod descriptor;
pub mod model;
pub mod table;
pub mod topo;
