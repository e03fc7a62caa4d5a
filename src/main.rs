//
// main.rs
// Dicom-Sort-rs
//
// Binary entry point that hands off execution to the CLI layer.
//

use dicom_sort::cli;

fn main() -> anyhow::Result<()> {
    cli::run()
}
