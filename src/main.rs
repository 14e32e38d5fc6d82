use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use fits_catalog::config::ErrorPolicy;
use fits_catalog::fits::list_keys;
use fits_catalog::pipeline::discover::Discovery;
use fits_catalog::pipeline::housekeeping::{align_file_prefixes, fill_missing_hashes, prune_empty_dirs};
use fits_catalog::pipeline::intake::run_intake;
use fits_catalog::pipeline::mover::Mover;
use fits_catalog::pipeline::restore::Restorer;
use fits_catalog::pipeline::solve::solve_images;
use fits_catalog::progress::LogProgress;
use fits_catalog::{Config, Library, Result};

/// Catalog FITS captures and file them into the image library
#[derive(Parser, Debug)]
#[command(name = "fits-catalog")]
#[command(version)]
struct Args {
    /// JSON configuration file; built-in defaults are used without one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep cataloging when a file can't be read
    #[arg(long, global = true)]
    skip_errors: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover, stage, move and merge the quarantine folder (default)
    Ingest,
    /// Catalog a folder into the staging table only
    Discover {
        /// Folder to scan instead of the quarantine folder
        folder: Option<PathBuf>,
        /// Stage files whose content is already catalogued
        #[arg(long)]
        include_duplicates: bool,
        /// Leave files carrying the bad marker on disk
        #[arg(long)]
        keep_bad: bool,
    },
    /// Move the staged batch into the library and merge it
    Commit {
        /// Record destinations in the staging table without moving files
        #[arg(long)]
        plan_only: bool,
    },
    /// Put the last staged batch back where it was found
    Revert,
    /// Repair catalogued files from copies in the restore folder
    Restore {
        /// Report matches without replacing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Plate solve every LIGHT frame in the catalog
    Solve,
    /// Compute missing content hashes
    Hashes,
    /// Rename files whose sequence prefix disagrees with their id
    Align,
    /// Move every catalogued file to its canonical location
    Reorganize,
    /// Remove empty folders below a root (quarantine by default)
    Prune { folder: Option<PathBuf> },
    /// List the header keywords of a FITS file
    Keys { file: PathBuf },
    /// Show journaled moves that never completed
    Pending,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.skip_errors {
        config.discovery.error_policy = ErrorPolicy::Skip;
    }
    Ok(config)
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;
    let command = args.command.unwrap_or(Command::Ingest);

    // Header listing needs no catalog
    if let Command::Keys { file } = &command {
        for key in list_keys(file)? {
            println!("{}", key);
        }
        return Ok(());
    }

    let library = Library::open(&config)?;
    info!("Catalog has {} images", library.image_count()?);

    let pending = library.unfinished_moves()?;
    if !pending.is_empty() {
        warn!(
            count = pending.len(),
            "Previous run left unconfirmed moves; check them with `pending`"
        );
    }

    let mut progress = LogProgress::default();

    match command {
        Command::Ingest => {
            let report = run_intake(&config, &library, &mut progress)?;
            println!(
                "Found {} new files and {} duplicates, {} bad files removed",
                report.discovery.new_files,
                report.discovery.duplicates,
                report.discovery.purged.len()
            );
            for failure in &report.discovery.purge_failures {
                println!("  could not remove {}: {}", failure.path.display(), failure.error);
            }
            println!(
                "Moved {} files, merged {} into the catalog, {} move failures",
                report.commit.moves.moved,
                report.commit.merged,
                report.commit.moves.failures.len()
            );
            for failure in &report.commit.moves.failures {
                println!("  {}: {}", failure.record_id, failure.error);
            }
        }
        Command::Discover {
            folder,
            include_duplicates,
            keep_bad,
        } => {
            let mut options = config.discovery.clone();
            options.include_duplicates |= include_duplicates;
            options.purge_bad &= !keep_bad;
            let root = folder.unwrap_or_else(|| config.quarantine_dir.clone());

            let report = Discovery::new(&config)
                .with_options(options)
                .run(&library, &root, &mut progress)?;
            if report.records.is_empty() {
                println!("Nothing new to stage; previous batch kept");
            } else {
                library.write_staged(&report.records)?;
                println!(
                    "Staged {} files ({} duplicates, {} bad, {} unreadable)",
                    report.records.len(),
                    report.duplicates,
                    report.bad_files.len(),
                    report.failures.len()
                );
            }
            for failure in &report.purge_failures {
                println!("  could not remove {}: {}", failure.path.display(), failure.error);
            }
        }
        Command::Commit { plan_only } => {
            let mover = Mover::new(&library, &config);
            if plan_only {
                let report = mover.preview(&mut progress)?;
                for record in &report.records {
                    let from = record.original_path().unwrap_or_default();
                    println!("{} -> {}", from.display(), record.path().display());
                }
            } else {
                let report = mover.commit(&mut progress)?;
                println!(
                    "Moved {} files, merged {}, {} failures",
                    report.moves.moved,
                    report.merged,
                    report.moves.failures.len()
                );
                for failure in &report.moves.failures {
                    println!("  {}: {}", failure.record_id, failure.error);
                }
            }
        }
        Command::Revert => {
            let report = Mover::new(&library, &config).revert(&mut progress)?;
            println!(
                "Reverted {} files, {} skipped, {} failures",
                report.reverted.len(),
                report.skipped.len(),
                report.failures.len()
            );
            for failure in &report.failures {
                println!("  {}: {}", failure.record_id, failure.error);
            }
        }
        Command::Restore { dry_run } => {
            let restorer = Restorer::new(&library, &config);
            let found = restorer.find(&mut progress)?;
            for m in &found.matches {
                println!("{} <- {}", m.old_path.display(), m.new_path.display());
            }
            for ambiguous in &found.ambiguous {
                println!("  {}", ambiguous.to_error());
            }
            if !dry_run {
                let report = restorer.restore(&found.matches, &mut progress)?;
                println!(
                    "Restored {} files, {} failures",
                    report.restored.len(),
                    report.failures.len()
                );
                for failure in &report.failures {
                    println!("  {}: {}", failure.old_id, failure.error);
                }
            }
        }
        Command::Solve => {
            let report = solve_images(&config, &library, &mut progress)?;
            println!(
                "Solved {} images, {} failures",
                report.solutions.len(),
                report.errors.len()
            );
        }
        Command::Hashes => {
            let report = fill_missing_hashes(&library, &mut progress)?;
            println!(
                "Hashed {} files, {} not found, {} failures",
                report.updated.len(),
                report.not_found.len(),
                report.failures.len()
            );
        }
        Command::Align => {
            let report = align_file_prefixes(&library, &mut progress)?;
            println!(
                "Renamed {} files, {} failures",
                report.renamed.len(),
                report.failures.len()
            );
        }
        Command::Reorganize => {
            let report = Mover::new(&library, &config).reorganize_library(&mut progress)?;
            println!(
                "Moved {} files, {} failures",
                report.moved,
                report.failures.len()
            );
        }
        Command::Prune { folder } => {
            let root = folder.unwrap_or_else(|| config.quarantine_dir.clone());
            let removed = prune_empty_dirs(&root)?;
            println!("Removed {} empty folders", removed.len());
        }
        Command::Pending => {
            for entry in &pending {
                println!(
                    "#{} record {}: {} -> {}",
                    entry.seq,
                    entry.record_id,
                    entry.from_path.display(),
                    entry.to_path.display()
                );
            }
        }
        Command::Keys { .. } => {}
    }

    Ok(())
}
