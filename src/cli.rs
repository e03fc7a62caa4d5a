//
// cli.rs
// Dicom-Sort-rs
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the library.
//

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use crate::dicom_access::{ensure_known_keys, read_record, DicomImage};
use crate::geometry::{check_geometry, SpatialImage, DEFAULT_TOLERANCE};
use crate::models::FileAction;
use crate::pattern::{PatternResolver, ResolveOptions};
use crate::sort::{DicomSorter, SortOptions};
use crate::utils::{truncate_uid, DEFAULT_UID_TAIL};

/// Command-line interface glue code: defines the available verbs and dispatches to modules.
#[derive(Parser)]
#[command(name = "dicom-sort")]
#[command(about = "Sort DICOM files into pattern-based folder trees", long_about = None)]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sort a directory of DICOM files into a tree built from a pattern
    Sort {
        source: PathBuf,
        /// Destination template, e.g. "out/%(PatientID)s/{StudyDate}/{SeriesInstanceUID}"
        pattern: String,
        #[arg(short, long, value_enum, default_value_t = Action::Move)]
        action: Action,
        #[arg(long)]
        overwrite: bool,
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Threads used to read headers
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Keep only the last N characters of *UID values (0 keeps them whole).
        /// A separator on the cut is kept, so a UID that starts a file name can
        /// produce a hidden file; prefix it with a literal, e.g. "IM{SOPInstanceUID}.dcm"
        #[arg(long, default_value_t = 0)]
        truncate_uids: usize,
        /// Also pick up files without a .dcm extension that carry a DICOM preamble
        #[arg(long)]
        check_header: bool,
        /// Skip colliding destinations instead of aborting
        #[arg(long)]
        skip_collisions: bool,
        /// Print the plan and summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the destination a single file would be sorted to
    Resolve {
        file: PathBuf,
        pattern: String,
        #[arg(long, default_value_t = 0)]
        truncate_uids: usize,
    },
    /// Print the header fields of a DICOM file as JSON
    Info {
        file: PathBuf,
        /// Only include these keywords
        #[arg(short, long, value_delimiter = ',')]
        keys: Vec<String>,
    },
    /// Keep the tail of a long UID
    Truncate {
        value: String,
        #[arg(short = 'n', long, default_value_t = DEFAULT_UID_TAIL)]
        last: usize,
    },
    /// Compare the spatial header of a mask against its reference scan
    CheckGeometry {
        reference: PathBuf,
        mask: PathBuf,
        /// Largest per-component difference still treated as equal
        #[arg(long, default_value_t = DEFAULT_TOLERANCE, value_parser = parse_tolerance)]
        tolerance: f64,
        /// Overwrite the mask's spatial tags with the reference's and save a copy
        #[arg(long)]
        correct: bool,
        #[arg(short, long, requires = "correct")]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Action {
    Move,
    Copy,
    Symlink,
    Hardlink,
}

impl From<Action> for FileAction {
    fn from(value: Action) -> Self {
        match value {
            Action::Move => FileAction::Move,
            Action::Copy => FileAction::Copy,
            Action::Symlink => FileAction::Symlink,
            Action::Hardlink => FileAction::Hardlink,
        }
    }
}

fn parse_tolerance(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("Invalid tolerance '{}'. Expected a number", s))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("Tolerance must be a finite value >= 0, got {}", s));
    }
    Ok(value)
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    crate::logging::init(cli.verbose);
    dispatch(cli.command)
}

pub fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Sort {
            source,
            pattern,
            action,
            overwrite,
            dry_run,
            jobs,
            truncate_uids,
            check_header,
            skip_collisions,
            json,
        } => {
            let options = SortOptions {
                action: action.into(),
                overwrite,
                dry_run,
                jobs,
                truncate_uids,
                check_header,
                skip_collisions,
            };
            sort(&source, &pattern, &options, json)?
        }
        Commands::Resolve {
            file,
            pattern,
            truncate_uids,
        } => {
            let resolver = PatternResolver::new(&pattern)?;
            ensure_known_keys(&resolver)?;
            let record = read_record(&file)
                .with_context(|| format!("Failed to read DICOM header of {}", file.display()))?;
            let path = resolver.resolve_with(&record, ResolveOptions { truncate_uids })?;
            println!("{path}");
        }
        Commands::Info { file, keys } => {
            let record = read_record(&file)
                .with_context(|| format!("Failed to read DICOM header of {}", file.display()))?;
            let record = if keys.is_empty() {
                record
            } else {
                record.subset(keys.iter().map(String::as_str))
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Truncate { value, last } => println!("{}", truncate_uid(&value, last)),
        Commands::CheckGeometry {
            reference,
            mask,
            tolerance,
            correct,
            output,
        } => check_files(&reference, &mask, tolerance, correct, output)?,
    }

    Ok(())
}

fn sort(source: &Path, pattern: &str, options: &SortOptions, json: bool) -> anyhow::Result<()> {
    let sorter = DicomSorter::new(source, pattern)?;
    let plan = sorter.plan(options)?;

    if !plan.collisions.is_empty() {
        for collision in &plan.collisions {
            eprintln!("Collision at {}:", collision.destination.display());
            for src in &collision.sources {
                eprintln!("  {}", src.display());
            }
        }
        if !options.skip_collisions {
            bail!(
                "{} destination(s) collide; refine the pattern or pass --skip-collisions",
                plan.collisions.len()
            );
        }
    }
    for failure in &plan.failures {
        eprintln!("Error in {}: {}", failure.source.display(), failure.reason);
    }

    let summary = sorter.execute(&plan, options)?;

    if json {
        let report = serde_json::json!({ "plan": plan, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} {} file(s) ({}) | existing: {} | conflicting: {} | duplicates: {} | collisions: {} | failed: {}",
            if options.dry_run { "Would process" } else { "Processed" },
            summary.processed,
            summary.action,
            summary.skipped_existing,
            summary.skipped_conflicting,
            summary.skipped_duplicates,
            summary.skipped_collisions,
            summary.failed
        );
    }
    Ok(())
}

fn check_files(
    reference: &Path,
    mask: &Path,
    tolerance: f64,
    correct: bool,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let reference_image = DicomImage::open(reference)?;
    let mask_image = DicomImage::open(mask)?;
    let before = mask_image.geometry();

    let (reference_image, mask_image) =
        check_geometry(reference_image, mask_image, tolerance, correct)?;

    if mask_image.geometry() == before {
        println!("Geometry matches: {}", reference_image.geometry());
        return Ok(());
    }

    let output_path = output.unwrap_or_else(|| {
        let stem = mask
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mask".to_string());
        mask.with_file_name(format!("{stem}_corrected.dcm"))
    });
    mask_image.save(&output_path)?;
    println!(
        "Mask geometry corrected to {} and saved to {}",
        mask_image.geometry(),
        output_path.display()
    );
    Ok(())
}
