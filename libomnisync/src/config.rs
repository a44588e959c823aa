use std::path::PathBuf;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use derive_more::Display;
use directories::ProjectDirs;
use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::dio::DigitalTraceSource;
use crate::events::MarkerSelector;
use crate::experiment::ScanPrefixes;
use crate::layout::DataLayout;
use crate::matcher::MatchConfig;
use crate::pipeline::PipelineOptions;
use crate::sync::SyncOptions;
use crate::trodes::TrodesDioSource;
use crate::waveform::WaveformDioSource;

pub static PROJECT_DIR: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("org", "omnisync", "omnisync"));
const CONFIG_FILE: &str = "config.toml";
pub const LOCAL_DIR: &str = ".omnisync";
const DEFAULT_CONFIG: &str = include_str!("../../default_config.toml");

/// How the digital inputs of a session are stored.
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DioFormat {
    /// One exported `.dat` file per channel.
    #[display("trodes")]
    Trodes,
    /// A VCD, FST or GHW file with one variable per channel.
    #[display("waveform")]
    Waveform,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DioConfig {
    pub channel: u32,
    pub format: DioFormat,
    pub max_channels: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SyncConfig {
    /// Degree of the fitted clock polynomial.
    pub degree: usize,
    pub match_slack: usize,
    pub tie_tolerance: f64,
    pub overwrite: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReferenceConfig {
    pub primary_topic: String,
    pub fallback_topics: Vec<String>,
    pub rosout_topic: String,
    /// Tracking topics in priority order.
    pub pose_topics: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BatchConfig {
    pub threads: usize,
    pub overwrite_context: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ExperimentConfig {
    pub manifest: Utf8PathBuf,
    pub animal_prefix: String,
    pub session_prefix: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct OmnisyncConfig {
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    pub dio: DioConfig,
    pub sync: SyncConfig,
    pub reference: ReferenceConfig,
    pub batch: BatchConfig,
    pub experiment: ExperimentConfig,
}

fn defaults() -> ConfigBuilder<DefaultState> {
    Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
}

fn environment() -> Environment {
    Environment::with_prefix("OMNISYNC")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("reference.fallback_topics")
        .with_list_parse_key("reference.pose_topics")
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<OmnisyncConfig> {
    let config: OmnisyncConfig = builder
        .build()?
        .try_deserialize()
        .context("Failed to parse config")?;
    config.validate()?;
    Ok(config)
}

impl OmnisyncConfig {
    /// Loads the embedded defaults, then the user config file, then `.omnisync/config.toml`
    /// files from the outermost to the closest directory, then `OMNISYNC_*` variables.
    pub fn new(force_default_config: bool) -> Result<Self> {
        let mut config = defaults();
        if !force_default_config {
            if let Some(proj_dirs) = &*PROJECT_DIR {
                let config_file = proj_dirs.config_dir().join(CONFIG_FILE);
                config = config.add_source(File::from(config_file).required(false));
            }
            config = find_local_configs()
                .into_iter()
                .fold(config, |c, p| {
                    c.add_source(File::from(p.join(CONFIG_FILE)).required(false))
                })
                .add_source(environment());
        }
        finish(config)
    }

    /// `config` layered over the embedded defaults.
    pub fn new_from_toml(config: &str) -> Result<Self> {
        finish(defaults().add_source(File::from_str(config, FileFormat::Toml)))
    }

    fn validate(&self) -> Result<()> {
        if self.sync.degree < 1 {
            bail!("sync.degree must be at least 1, got {}", self.sync.degree);
        }
        if self.dio.channel < 1 {
            bail!("dio.channel must be at least 1");
        }
        if !(self.sync.tie_tolerance.is_finite() && self.sync.tie_tolerance >= 0.0) {
            bail!(
                "sync.tie_tolerance must be a non-negative number, got {}",
                self.sync.tie_tolerance
            );
        }
        if self.reference.primary_topic.is_empty() {
            bail!("reference.primary_topic must not be empty");
        }
        Ok(())
    }

    /// The data directory from `cli` or, failing that, from the configuration.
    pub fn layout(&self, cli: Option<&Utf8Path>) -> Result<DataLayout> {
        match cli.or(self.data_dir.as_deref()) {
            Some(dir) => Ok(DataLayout::new(dir)),
            None => bail!("No data directory given. Pass --data-dir or set data_dir in the config"),
        }
    }

    #[must_use]
    pub fn markers(&self) -> MarkerSelector {
        MarkerSelector::new(
            &self.reference.primary_topic,
            self.reference.fallback_topics.clone(),
        )
    }

    #[must_use]
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            degree: self.sync.degree,
            matching: MatchConfig {
                slack: self.sync.match_slack,
                tie_tolerance: self.sync.tie_tolerance,
            },
            overwrite: self.sync.overwrite,
        }
    }

    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            channel: self.dio.channel,
            overwrite_context: self.batch.overwrite_context,
            sync: self.sync_options(),
        }
    }

    #[must_use]
    pub fn scan_prefixes(&self) -> ScanPrefixes {
        ScanPrefixes {
            animal: self.experiment.animal_prefix.clone(),
            session: self.experiment.session_prefix.clone(),
        }
    }

    #[must_use]
    pub fn manifest_path(&self, layout: &DataLayout) -> Utf8PathBuf {
        layout.data_dir().join(&self.experiment.manifest)
    }

    #[must_use]
    pub fn dio_source(&self, layout: DataLayout) -> Box<dyn DigitalTraceSource> {
        match self.dio.format {
            DioFormat::Trodes => Box::new(TrodesDioSource::new(layout)),
            DioFormat::Waveform => Box::new(WaveformDioSource::new(layout)),
        }
    }
}

/// Searches for `.omnisync` directories upward from the current location until it reaches
/// root. Found directories are returned from the most top-level to the most local; plain
/// files are ignored.
fn find_local_configs() -> Vec<PathBuf> {
    use crate::util::search_upward;
    match std::env::current_dir() {
        Ok(dir) => search_upward(dir, "/", LOCAL_DIR)
            .into_iter()
            .filter(|p| p.is_dir())
            .rev()
            .collect(),
        Err(_) => vec![],
    }
}
