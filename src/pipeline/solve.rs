//! Plate solving
//!
//! Runs an external solver over every LIGHT frame in the catalog and reads
//! the result header it leaves next to the image. A failure for one image is
//! recorded as an error row; the batch always runs to the end.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::{Config, SolverConfig};
use crate::error::{CatalogError, Result};
use crate::fits::PrimaryHeader;
use crate::progress::Progress;
use crate::state::data::{ImageRecord, PlateSolution, SolveErrorRow};
use crate::state::library::{Library, WriteMode};

#[derive(Debug, Default)]
pub struct SolveReport {
    pub solutions: Vec<PlateSolution>,
    pub errors: Vec<SolveErrorRow>,
}

pub struct PlateSolver<'a> {
    solver: &'a SolverConfig,
}

impl<'a> PlateSolver<'a> {
    pub fn new(solver: &'a SolverConfig) -> Self {
        Self { solver }
    }

    /// Where the solver writes its result for `image`
    pub fn sidecar_path(&self, image: &Path) -> PathBuf {
        image.with_extension(&self.solver.sidecar_extension)
    }

    /// Solve one image and read back its solution
    pub fn solve(&self, record: &ImageRecord) -> Result<PlateSolution> {
        let image = record.path();
        let fail = |reason: String| CatalogError::Solve {
            path: image.clone(),
            reason,
        };

        let status = Command::new(&self.solver.program)
            .args(&self.solver.args)
            .arg(&image)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| fail(format!("could not run {}: {e}", self.solver.program)))?;
        if !status.success() {
            return Err(fail(format!("solver exited with {status}")));
        }

        let sidecar = self.sidecar_path(&image);
        let mut header = PrimaryHeader::open(&sidecar).map_err(|e| fail(e.to_string()))?;
        let mut value = |key: &str| {
            header
                .real(key)
                .ok_or_else(|| fail(format!("{key} missing from {}", sidecar.display())))
        };

        Ok(PlateSolution {
            index: record.id,
            ra_solved: value("RA")?,
            dec_solved: value("DEC")?,
            angle_solved: value("ANGLE")?,
            pixscale: value("SCALE")?,
        })
    }

    /// Solve every record, collecting failures as rows
    pub fn solve_all(&self, records: &[ImageRecord], progress: &mut dyn Progress) -> SolveReport {
        let mut report = SolveReport::default();
        progress.begin("Plate solving", records.len());
        for record in records {
            progress.advance();
            match self.solve(record) {
                Ok(solution) => report.solutions.push(solution),
                Err(error) => {
                    tracing::warn!(id = record.id, %error, "Plate solve failed");
                    report.errors.push(SolveErrorRow {
                        index: record.id,
                        file: record.file.clone(),
                        folder: record.folder.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }
        progress.finish();
        report
    }
}

/// Plate solve every LIGHT frame in the catalog and store the results
///
/// Solutions replace the solved table. The error table is replaced only when
/// something failed.
pub fn solve_images(config: &Config, library: &Library, progress: &mut dyn Progress) -> Result<SolveReport> {
    let lights = library.load_light_frames()?;
    let report = PlateSolver::new(&config.solver).solve_all(&lights, progress);

    let tables = library.tables();
    library.write_table(&tables.solved, &report.solutions, WriteMode::Replace)?;
    if !report.errors.is_empty() {
        library.write_table(&tables.solve_errors, &report.errors, WriteMode::Replace)?;
    }

    tracing::info!(
        solved = report.solutions.len(),
        failed = report.errors.len(),
        "Plate solving finished"
    );
    Ok(report)
}
