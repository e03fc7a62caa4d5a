//
// sort.rs
// Dicom-Sort-rs
//
// Crawls a source tree, resolves each file's destination from its DICOM header, and moves,
// copies, or links files into place.
//

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dicom_access::{ensure_known_keys, is_dicom_file, read_record};
use crate::error::{Error, Result};
use crate::models::{
    DestinationConflict, FileAction, FileFailure, PlannedFile, SortPlan, SortSummary,
};
use crate::pattern::{PatternResolver, ResolveOptions};

#[derive(Debug, Clone, Default)]
pub struct SortOptions {
    pub action: FileAction,
    pub overwrite: bool,
    pub dry_run: bool,
    /// Header-reading threads; `None` uses the global rayon pool.
    pub jobs: Option<usize>,
    pub truncate_uids: usize,
    /// Accept files without a `.dcm` extension when they carry a DICOM preamble.
    pub check_header: bool,
    /// Leave colliding destinations alone instead of refusing the whole plan.
    pub skip_collisions: bool,
}

pub struct DicomSorter {
    source: PathBuf,
    resolver: PatternResolver,
}

impl DicomSorter {
    /// Validates the pattern (syntax and keywords) before anything is read.
    pub fn new(source: impl AsRef<Path>, pattern: &str) -> Result<Self> {
        let resolver = PatternResolver::new(pattern)?;
        ensure_known_keys(&resolver)?;
        Ok(Self {
            source: source.as_ref().to_path_buf(),
            resolver,
        })
    }

    pub fn resolver(&self) -> &PatternResolver {
        &self.resolver
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn find_files(&self, check_header: bool) -> Result<Vec<PathBuf>> {
        if !self.source.is_dir() {
            return Err(Error::io(
                &self.source,
                io::Error::new(io::ErrorKind::NotFound, "source is not a directory"),
            ));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.source)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| has_dcm_extension(p) || (check_header && is_dicom_file(p)))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Resolve every file's destination without touching the destination tree.
    pub fn plan(&self, options: &SortOptions) -> Result<SortPlan> {
        let files = self.find_files(options.check_header)?;
        info!(
            source = %self.source.display(),
            files = files.len(),
            pattern = self.resolver.template(),
            "resolving destinations"
        );

        let resolve_options = ResolveOptions {
            truncate_uids: options.truncate_uids,
        };
        let resolve_all = || -> Vec<(PathBuf, Result<PathBuf>)> {
            files
                .par_iter()
                .map(|path| (path.clone(), self.destination(path, resolve_options)))
                .collect()
        };

        let resolved = match options.jobs {
            Some(jobs) => match ThreadPoolBuilder::new().num_threads(jobs).build() {
                Ok(pool) => pool.install(resolve_all),
                Err(e) => {
                    warn!(jobs, error = %e, "could not build worker pool, using the global pool");
                    resolve_all()
                }
            },
            None => resolve_all(),
        };

        let mut plan = SortPlan {
            pattern: self.resolver.template().to_string(),
            ..SortPlan::default()
        };
        let mut by_destination: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
        for (source, result) in resolved {
            match result {
                Ok(destination) => by_destination.entry(destination).or_default().push(source),
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "cannot resolve destination");
                    plan.failures.push(FileFailure {
                        source,
                        reason: e.to_string(),
                    });
                }
            }
        }

        for (destination, sources) in by_destination {
            if sources.len() == 1 {
                plan.files.push(PlannedFile {
                    source: sources[0].clone(),
                    destination,
                });
                continue;
            }

            let conflict = DestinationConflict {
                destination: destination.clone(),
                sources: sources.clone(),
            };
            if same_content(&sources) {
                debug!(destination = %destination.display(), count = sources.len(), "duplicate files");
                plan.files.push(PlannedFile {
                    source: sources[0].clone(),
                    destination,
                });
                plan.duplicates.push(conflict);
            } else {
                warn!(
                    destination = %destination.display(),
                    count = sources.len(),
                    "distinct files resolve to the same destination"
                );
                plan.collisions.push(conflict);
            }
        }

        Ok(plan)
    }

    /// Carry out a plan. Per-file failures are counted, not fatal.
    pub fn execute(&self, plan: &SortPlan, options: &SortOptions) -> Result<SortSummary> {
        if !plan.collisions.is_empty() && !options.skip_collisions {
            return Err(Error::Collisions {
                count: plan.collisions.len(),
            });
        }

        let mut summary = SortSummary {
            action: options.action,
            dry_run: options.dry_run,
            skipped_duplicates: plan
                .duplicates
                .iter()
                .map(|d| d.sources.len().saturating_sub(1))
                .sum(),
            skipped_collisions: plan.collisions.iter().map(|c| c.sources.len()).sum(),
            failed: plan.failures.len(),
            ..SortSummary::default()
        };

        for entry in &plan.files {
            let (source, destination) = (&entry.source, &entry.destination);
            if fs::symlink_metadata(destination).is_ok()
                && (!options.overwrite || is_same_file(source, destination))
            {
                if is_same_file(source, destination)
                    || same_content(&[source.clone(), destination.clone()])
                {
                    debug!(destination = %destination.display(), "destination exists, skipping");
                    summary.skipped_existing += 1;
                } else {
                    warn!(
                        source = %source.display(),
                        destination = %destination.display(),
                        "destination holds different content, keeping it (use --overwrite to replace)"
                    );
                    summary.skipped_conflicting += 1;
                }
                continue;
            }

            if options.dry_run {
                info!(
                    action = ?options.action,
                    source = %source.display(),
                    destination = %destination.display(),
                    "dry run"
                );
                summary.processed += 1;
                continue;
            }

            match place_file(options.action, source, destination) {
                Ok(()) => summary.processed += 1,
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "file action failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            processed = summary.processed,
            existing = summary.skipped_existing,
            conflicting = summary.skipped_conflicting,
            failed = summary.failed,
            "sort finished"
        );
        Ok(summary)
    }

    pub fn run(&self, options: &SortOptions) -> Result<(SortPlan, SortSummary)> {
        let plan = self.plan(options)?;
        let summary = self.execute(&plan, options)?;
        Ok((plan, summary))
    }

    fn destination(&self, path: &Path, options: ResolveOptions) -> Result<PathBuf> {
        let record = read_record(path)?;
        let resolved = self.resolver.resolve_with(&record, options)?;
        Ok(destination_for(path, &resolved))
    }
}

/// A resolved path ending in `.dcm` names the file; anything else is a directory.
fn destination_for(source: &Path, resolved: &str) -> PathBuf {
    let target = PathBuf::from(resolved);
    if !resolved.ends_with('/') && has_dcm_extension(&target) {
        return target;
    }
    match source.file_name() {
        Some(name) => target.join(name),
        None => target,
    }
}

fn has_dcm_extension(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("dcm"))
}

fn file_digest(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn same_content(sources: &[PathBuf]) -> bool {
    let digests: Vec<Option<String>> = sources.iter().map(|p| file_digest(p).ok()).collect();
    match digests.first() {
        Some(Some(first)) => digests.iter().all(|d| d.as_ref() == Some(first)),
        _ => false,
    }
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Replaces `destination` only once the new file is complete, so a failed
/// action leaves any existing destination intact.
fn place_file(action: FileAction, source: &Path, destination: &Path) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    if action == FileAction::Move {
        match fs::rename(source, destination) {
            Ok(()) => return Ok(()),
            Err(e) if is_cross_device(&e) => {
                debug!(source = %source.display(), "rename crosses devices, copying instead");
            }
            Err(e) => return Err(e),
        }
    }

    let staged = staging_path(destination)?;
    if fs::symlink_metadata(&staged).is_ok() {
        fs::remove_file(&staged)?;
    }
    let placed = stage(action, source, &staged).and_then(|()| fs::rename(&staged, destination));
    if let Err(e) = placed {
        if fs::symlink_metadata(&staged).is_ok() {
            if let Err(cleanup) = fs::remove_file(&staged) {
                warn!(path = %staged.display(), error = %cleanup, "could not remove staged file");
            }
        }
        return Err(e);
    }

    if action == FileAction::Move {
        fs::remove_file(source)?;
    }
    Ok(())
}

fn stage(action: FileAction, source: &Path, staged: &Path) -> io::Result<()> {
    match action {
        FileAction::Move | FileAction::Copy => fs::copy(source, staged).map(|_| ()),
        FileAction::Hardlink => fs::hard_link(source, staged),
        FileAction::Symlink => symlink(&source.canonicalize()?, staged),
    }
}

/// Hidden sibling of `destination` that new content is written to first.
fn staging_path(destination: &Path) -> io::Result<PathBuf> {
    let name = destination.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name")
    })?;
    let mut staged = OsString::from(".");
    staged.push(name);
    staged.push(".partial");
    Ok(destination.with_file_name(staged))
}

#[cfg(not(windows))]
const CROSS_DEVICE: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE

fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(CROSS_DEVICE)
}

#[cfg(unix)]
fn symlink(source: &Path, destination: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, destination)
}

#[cfg(windows)]
fn symlink(source: &Path, destination: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(source, destination)
}
