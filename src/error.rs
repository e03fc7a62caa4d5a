//
// error.rs
// Dicom-Sort-rs
//
// Error kinds raised by pattern parsing, record resolution, geometry checks, and the sorter.
//

use std::path::PathBuf;

use thiserror::Error;

use crate::geometry::Geometry;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid pattern {template:?}: {reason}")]
    InvalidPattern { template: String, reason: String },

    #[error("Invalid DICOM key {token:?}")]
    InvalidDicomKey { token: String },

    #[error("Missing DICOM key {key:?} required by pattern {template:?}")]
    MissingKey { key: String, template: String },

    #[error(
        "Geometry mismatch in {fields:?}: reference [{reference}] vs mask [{mask}]"
    )]
    GeometryMismatch {
        reference: Box<Geometry>,
        mask: Box<Geometry>,
        fields: Vec<&'static str>,
    },

    #[error("{count} destination(s) are claimed by files with different content")]
    Collisions { count: usize },

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("DICOM error on {path:?}: {message}")]
    Dicom { path: PathBuf, message: String },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn dicom(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::Dicom {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
