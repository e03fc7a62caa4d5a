//
// models.rs
// Dicom-Sort-rs
//
// Serializable plan and summary records produced by the sorter and printed by the CLI.
//

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What to do with each source file once its destination is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    #[default]
    Move,
    Copy,
    Symlink,
    Hardlink,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileAction::Move => "move",
            FileAction::Copy => "copy",
            FileAction::Symlink => "symlink",
            FileAction::Hardlink => "hardlink",
        })
    }
}

/// One source file and where it is headed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Several sources resolved to the same destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConflict {
    pub destination: PathBuf,
    pub sources: Vec<PathBuf>,
}

/// A file that could not be placed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub source: PathBuf,
    pub reason: String,
}

/// Everything `execute` needs, computed without touching the destination tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortPlan {
    pub pattern: String,
    pub files: Vec<PlannedFile>,
    /// Same destination, same bytes: the first source is kept, the rest are skipped.
    pub duplicates: Vec<DestinationConflict>,
    /// Same destination, different bytes.
    pub collisions: Vec<DestinationConflict>,
    pub failures: Vec<FileFailure>,
}

impl SortPlan {
    pub fn is_clean(&self) -> bool {
        self.collisions.is_empty() && self.failures.is_empty()
    }
}

/// Outcome counters reported after a sort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSummary {
    pub action: FileAction,
    pub dry_run: bool,
    pub processed: usize,
    pub skipped_existing: usize,
    /// Destinations already holding different content, left untouched.
    pub skipped_conflicting: usize,
    pub skipped_duplicates: usize,
    pub skipped_collisions: usize,
    pub failed: usize,
}
