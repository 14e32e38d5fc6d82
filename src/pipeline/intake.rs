//! The complete intake run: discover, stage, move, merge, tidy up

use std::path::PathBuf;

use super::discover::{Discovery, DiscoveryReport};
use super::housekeeping::prune_empty_dirs;
use super::mover::{CommitReport, Mover};
use crate::config::Config;
use crate::error::Result;
use crate::progress::Progress;
use crate::state::library::Library;

#[derive(Debug, Default)]
pub struct IntakeReport {
    pub discovery: DiscoveryReport,
    pub commit: CommitReport,
    /// Quarantine folders emptied by the run and removed
    pub pruned: Vec<PathBuf>,
}

/// Catalog everything in the quarantine folder and file it into the library
///
/// A run that finds nothing new leaves the staging table alone, so the last
/// batch can still be reverted. Emptied quarantine folders are removed only
/// when every move succeeded.
pub fn run_intake(config: &Config, library: &Library, progress: &mut dyn Progress) -> Result<IntakeReport> {
    let discovery = Discovery::new(config).run(library, &config.quarantine_dir, progress)?;

    let commit = if discovery.records.is_empty() {
        tracing::info!("No new files; keeping the previous staged batch");
        CommitReport::default()
    } else {
        library.write_staged(&discovery.records)?;
        Mover::new(library, config).commit(progress)?
    };

    let pruned = if commit.moves.failures.is_empty() {
        prune_empty_dirs(&config.quarantine_dir)?
    } else {
        Vec::new()
    };

    Ok(IntakeReport {
        discovery,
        commit,
        pruned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableNames;
    use crate::fits::testing::*;
    use crate::progress::Silent;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.quarantine_dir = dir.join("quarantine");
        config.image_dir = dir.join("library");
        config
    }

    #[test]
    fn test_intake_files_and_tidies() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let night = config.quarantine_dir.join("night1");
        std::fs::create_dir_all(&night).unwrap();
        write_fits(&night, "m31_001.fits", &light_cards(), b"one");
        write_fits(&night, "m31_002.fits", &light_cards(), b"two");
        let library = Library::open_in_memory(TableNames::default()).unwrap();

        let report = run_intake(&config, &library, &mut Silent).unwrap();

        assert_eq!(report.discovery.new_files, 2);
        assert_eq!(report.commit.merged, 2);
        assert_eq!(report.pruned, vec![night.clone()]);
        assert!(config.quarantine_dir.exists());

        let expected = config.image_dir.join("M31/ASI1600/ED80-T/R/2024-02");
        let catalog = library.load_library().unwrap();
        assert_eq!(catalog[0].path(), expected.join("000001_m31_001.fits"));
        assert_eq!(catalog[1].path(), expected.join("000002_m31_002.fits"));
        assert!(catalog.iter().all(|r| r.path().exists()));

        // Nothing new the second time round
        let again = run_intake(&config, &library, &mut Silent).unwrap();
        assert_eq!(again.discovery.new_files, 0);
        assert_eq!(library.image_count().unwrap(), 2);
    }

    #[test]
    fn test_empty_intake_keeps_last_batch_revertable() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.quarantine_dir).unwrap();
        let original = write_fits(&config.quarantine_dir, "m31_001.fits", &light_cards(), b"one");
        let library = Library::open_in_memory(TableNames::default()).unwrap();

        let first = run_intake(&config, &library, &mut Silent).unwrap();
        assert_eq!(first.commit.merged, 1);
        assert!(!original.exists());

        let empty = run_intake(&config, &library, &mut Silent).unwrap();
        assert_eq!(empty.discovery.new_files, 0);
        assert_eq!(empty.commit.merged, 0);
        assert_eq!(library.read_staged().unwrap().len(), 1);

        let reverted = Mover::new(&library, &config).revert(&mut Silent).unwrap();
        assert_eq!(reverted.reverted, vec![1]);
        assert!(original.exists());
        assert_eq!(library.image_count().unwrap(), 0);
    }
}
