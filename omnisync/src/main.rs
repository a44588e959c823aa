//! Code for the `omnisync` executable.
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use eyre::{Context, Result, bail};
use libomnisync::config::OmnisyncConfig;
use libomnisync::events::EventLogSource;
use libomnisync::experiment::{ExperimentManifest, ManifestStatus};
use libomnisync::export::{export_positions, export_trials};
use libomnisync::logs::start_logging;
use libomnisync::session::{FileStore, MappingStore, SessionId};
use libomnisync::{DataLayout, Pipeline, PipelineOptions, SessionOutcome, try_log_error};
use tracing::{info, warn};

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Synchronize the clocks of one session.
    Sync {
        /// Session as <animal>/<session>
        session: SessionId,
        #[clap(flatten)]
        sync: SyncArgs,
    },
    /// Synchronize every included session of an experiment.
    Batch {
        /// Experiment manifest. Defaults to the configured manifest in the data directory.
        #[clap(long, conflicts_with = "sessions")]
        manifest: Option<Utf8PathBuf>,
        /// File with one <animal>/<session> per line
        #[clap(long)]
        sessions: Option<Utf8PathBuf>,
        /// Worker threads, 0 for one per core
        #[clap(long)]
        threads: Option<usize>,
        /// Write the batch summary as JSON to this file
        #[clap(long)]
        summary: Option<Utf8PathBuf>,
        /// Replace stored session and ephys contexts
        #[clap(long, action)]
        overwrite_context: bool,
        #[clap(flatten)]
        sync: SyncArgs,
    },
    /// Write an experiment manifest listing every session in the data directory.
    InitExperiment {
        #[clap(long)]
        manifest: Option<Utf8PathBuf>,
        #[clap(long, action)]
        overwrite: bool,
    },
    /// Count rising edges on each digital input of a session.
    ScanDio {
        session: SessionId,
        /// Highest channel to probe
        #[clap(long)]
        max_channels: Option<u32>,
    },
    /// Project acquisition timestamps onto the behavioral clock with a stored mapping.
    Project {
        session: SessionId,
        /// Timestamps in seconds
        #[clap(allow_negative_numbers = true)]
        times: Vec<f64>,
        /// File with one timestamp per line
        #[clap(long)]
        file: Option<Utf8PathBuf>,
    },
    /// Extract trial times from the behavioral event log.
    Trials {
        session: SessionId,
        #[clap(long, action)]
        overwrite: bool,
    },
    /// Extract the tracked position from the behavioral event log.
    Positions {
        session: SessionId,
        #[clap(long, action)]
        overwrite: bool,
    },
}

#[derive(Debug, Default, PartialEq, clap::Args)]
struct SyncArgs {
    /// Digital input carrying the sync pulses
    #[clap(long)]
    channel: Option<u32>,
    /// Degree of the fitted clock polynomial
    #[clap(long)]
    degree: Option<usize>,
    /// Recompute and replace a stored mapping
    #[clap(long, action)]
    overwrite: bool,
}

impl SyncArgs {
    fn apply(&self, mut options: PipelineOptions) -> Result<PipelineOptions> {
        if let Some(channel) = self.channel {
            options.channel = channel;
        }
        if let Some(degree) = self.degree {
            if degree == 0 {
                bail!("--degree must be at least 1");
            }
            options.sync.degree = degree;
        }
        options.sync.overwrite |= self.overwrite;
        Ok(options)
    }
}

#[derive(clap::Parser, Debug)]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (git: ", env!("VERGEN_GIT_DESCRIBE"), ")"), about)]
struct Args {
    /// Root of the <animal>/<session> tree
    #[clap(long, global = true)]
    data_dir: Option<Utf8PathBuf>,
    /// Also write the log to this file
    #[clap(long, global = true)]
    log_file: Option<Utf8PathBuf>,
    /// Ignore user and local configuration files
    #[clap(long, global = true, action)]
    default_config: bool,
    #[command(subcommand)]
    command: Commands,
}

/// Load sessions from a file (one per line). Blank lines and `#` comments are skipped.
fn load_session_list(path: &Utf8Path) -> Result<Vec<SessionId>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to open session list: {path}"))?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.parse::<SessionId>()
                .map_err(|e| eyre::eyre!("{path}: {e}"))
        })
        .collect()
}

fn load_timestamps(path: &Utf8Path) -> Result<Vec<f64>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to open timestamps: {path}"))?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.parse::<f64>()
                .with_context(|| format!("{path}: `{line}` is not a timestamp"))
        })
        .collect()
}

fn describe(outcome: &SessionOutcome) -> String {
    match outcome {
        SessionOutcome::Synchronized {
            matched_pulses,
            rms_error_s,
            r_squared,
        } => {
            let r_squared = r_squared.map_or_else(|| "undefined".to_string(), |r| format!("{r:.9}"));
            format!(
                "synchronized on {matched_pulses} pulses, rms error {:.3} ms, r² {r_squared}",
                rms_error_s * 1e3
            )
        }
        SessionOutcome::AlreadySynchronized => "already synchronized".to_string(),
        SessionOutcome::NotEphys => "not an ephys session".to_string(),
        SessionOutcome::Skipped { stage, reason } => format!("skipped during {stage}: {reason}"),
    }
}

fn run(command: Commands, config: &OmnisyncConfig, layout: DataLayout) -> Result<()> {
    let traces = config.dio_source(layout.clone());
    let references = EventLogSource::new(layout.clone(), config.markers());
    let store = FileStore::new(layout.clone());

    match command {
        Commands::Sync { session, sync } => {
            let options = sync.apply(config.pipeline_options())?;
            let pipeline = Pipeline::new(layout, traces.as_ref(), &references, &store, options);
            let outcome = pipeline.process_session(&session)?;
            info!(%session, "{}", describe(&outcome));
        }
        Commands::Batch {
            manifest,
            sessions,
            threads,
            summary,
            overwrite_context,
            sync,
        } => {
            let ids = match sessions {
                Some(list) => load_session_list(&list)?,
                None => {
                    let path = manifest.unwrap_or_else(|| config.manifest_path(&layout));
                    ExperimentManifest::load(&path)
                        .with_context(|| format!("Failed to load experiment manifest {path}"))?
                        .included()
                }
            };
            if ids.is_empty() {
                warn!("No sessions to process");
                return Ok(());
            }
            let mut options = sync.apply(config.pipeline_options())?;
            options.overwrite_context |= overwrite_context;
            let threads = threads.unwrap_or(config.batch.threads);

            info!("Processing {} sessions", ids.len());
            let pipeline = Pipeline::new(layout, traces.as_ref(), &references, &store, options);
            let result = pipeline.run_batch(&ids, threads)?;

            for (id, outcome) in &result.outcomes {
                info!(session = %id, "{}", describe(outcome));
            }
            info!(
                "{} synchronized, {} already synchronized, {} not ephys, {} skipped",
                result.synchronized(),
                result.already_synchronized(),
                result.not_ephys(),
                result.skipped().count()
            );
            if let Some(path) = summary {
                try_log_error!(
                    serde_json::to_string_pretty(&result)
                        .map_err(eyre::Report::from)
                        .and_then(|json| fs::write(&path, json).map_err(eyre::Report::from)),
                    format!("Failed to write batch summary to {path}")
                );
            }
        }
        Commands::InitExperiment {
            manifest,
            overwrite,
        } => {
            let path = manifest.unwrap_or_else(|| config.manifest_path(&layout));
            match ExperimentManifest::initialize(&layout, &config.scan_prefixes(), &path, overwrite)?
            {
                ManifestStatus::Written { sessions } => {
                    info!("Experiment manifest with {sessions} sessions written to {path}");
                }
                ManifestStatus::Kept => info!("Kept existing experiment manifest {path}"),
            }
        }
        Commands::ScanDio {
            session,
            max_channels,
        } => {
            let max = max_channels.unwrap_or(config.dio.max_channels);
            let pipeline = Pipeline::new(
                layout,
                traces.as_ref(),
                &references,
                &store,
                config.pipeline_options(),
            );
            let counts = pipeline.scan_channels(&session, max)?;
            if counts.is_empty() {
                warn!(%session, "No digital inputs found");
            }
            for (channel, edges) in counts {
                println!("Din{channel}\t{edges}");
            }
        }
        Commands::Project {
            session,
            mut times,
            file,
        } => {
            if let Some(path) = file {
                times.extend(load_timestamps(&path)?);
            }
            let Some(mapping) = store.load_cached_mapping(&session)? else {
                bail!("No clock mapping stored for {session}. Run `omnisync sync {session}` first");
            };
            for (t, projected) in times.iter().zip(libomnisync::project(&mapping, &times)) {
                println!("{t}\t{projected}");
            }
        }
        Commands::Trials { session, overwrite } => {
            let Some(log) = references.event_log(&session)? else {
                bail!("No behavioral event log for {session}");
            };
            export_trials(
                &layout,
                &session,
                &log,
                &config.reference.rosout_topic,
                overwrite,
            )?;
        }
        Commands::Positions { session, overwrite } => {
            let Some(log) = references.event_log(&session)? else {
                bail!("No behavioral event log for {session}");
            };
            export_positions(
                &layout,
                &session,
                &log,
                &config.reference.pose_topics,
                overwrite,
            )?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    simple_eyre::install()?;

    let args = Args::parse();
    let capture = start_logging(args.log_file.as_deref())?;
    let config = OmnisyncConfig::new(args.default_config)?;
    let layout = config.layout(args.data_dir.as_deref())?;

    let result = run(args.command, &config, layout);

    let (warnings, errors) = (capture.warnings(), capture.errors());
    if warnings + errors > 0 {
        info!("Finished with {warnings} warnings and {errors} errors");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sync_with_overrides() {
        let args = Args::parse_from([
            "omnisync",
            "--data-dir",
            "/data",
            "sync",
            "NC40008/20250328_134136",
            "--channel",
            "3",
            "--overwrite",
        ]);
        assert_eq!(args.data_dir.as_deref(), Some(Utf8Path::new("/data")));
        let Commands::Sync { session, sync } = args.command else {
            panic!("expected sync");
        };
        assert_eq!(session, SessionId::new("NC40008", "20250328_134136"));
        let options = sync.apply(PipelineOptions::default()).unwrap();
        assert_eq!(options.channel, 3);
        assert!(options.sync.overwrite);
        assert_eq!(options.sync.degree, 1);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = Args::parse_from([
            "omnisync",
            "batch",
            "--threads",
            "4",
            "--log-file",
            "run.log",
        ]);
        assert_eq!(args.log_file.as_deref(), Some(Utf8Path::new("run.log")));
        assert!(matches!(
            args.command,
            Commands::Batch {
                threads: Some(4),
                ..
            }
        ));
    }

    #[test]
    fn rejects_bad_session_and_zero_degree() {
        assert!(Args::try_parse_from(["omnisync", "sync", "NC40008"]).is_err());
        let sync = SyncArgs {
            degree: Some(0),
            ..SyncArgs::default()
        };
        assert!(sync.apply(PipelineOptions::default()).is_err());
    }

    #[test]
    fn project_accepts_negative_times() {
        let args = Args::parse_from(["omnisync", "project", "NC1/20250101_000000", "-0.5", "2"]);
        let Commands::Project { times, .. } = args.command else {
            panic!("expected project");
        };
        assert_eq!(times, vec![-0.5, 2.0]);
    }

    #[test]
    fn session_list_skips_comments() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("sessions.txt")).unwrap();
        fs::write(&path, "# pilot\nNC1/20250101_000000\n\nNC2/20250102_000000\n").unwrap();
        assert_eq!(
            load_session_list(&path).unwrap(),
            vec![
                SessionId::new("NC1", "20250101_000000"),
                SessionId::new("NC2", "20250102_000000")
            ]
        );
        fs::write(&path, "NC1\n").unwrap();
        assert!(load_session_list(&path).is_err());
    }
}
