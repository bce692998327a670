//! rusty-spm: lazy-loading session manager and analysis toolkit for
//! scanning-probe-microscopy experiment data.
//!
//! An experiment is described by a single `.txt` descriptor enumerating a
//! family of topography height maps (`.int`) and spectroscopy datasets
//! (`.dat`, CITS or STS). [`session::Session`] parses the descriptor once,
//! registers every file under its filename stem plus a short
//! case-insensitive alias, and decodes datasets lazily into bounded
//! per-kind LRU caches.
//!
//! ```no_run
//! use rusty_spm::session::Session;
//! use rusty_spm::analysis::profile::ProfileMethod;
//!
//! # fn main() -> rusty_spm::error::Result<()> {
//! let mut session = Session::open("experiment.txt")?;
//! let mut file = session.file("topofwd")?;
//! let topo = file.topography()?;
//! println!("height map {:?}", topo.shape());
//!
//! let analyzer = file.topo_analyzer()?;
//! let profile = analyzer.line_profile((0, 0), (63, 63), ProfileMethod::Rasterize);
//! println!("profile over {:.1} nm", profile.length);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod analyzers;
pub mod data;
pub mod error;
pub mod session;

pub use error::{Result, SpmError};
pub use session::{Session, SessionConfig};
