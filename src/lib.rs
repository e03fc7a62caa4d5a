//
// lib.rs
// Dicom-Sort-rs
//
// Exposes the crate's modules and re-exports the main entry points for binary and library consumers.
//

pub mod cli;
pub mod dicom_access;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod models;
pub mod pattern;
pub mod record;
pub mod sort;
pub mod utils;

pub use cli::{run as run_cli, Cli, Commands};
pub use error::{Error, Result};
pub use geometry::{check_geometry, Geometry, SpatialImage, Volume, DEFAULT_TOLERANCE};
pub use pattern::{PatternResolver, ResolveOptions};
pub use record::{DicomRecord, DicomValue, KeyLookup};
pub use sort::{DicomSorter, SortOptions};
pub use utils::truncate_uid;
