use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;
use crate::remove::{RemovalHandler, RemovalMode};
use crate::select::SubsetRow;
use crate::sync::{SyncOptions, DEFAULT_INSTRUMENTS};

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub local_root: String,
    pub download_dir: String,
    #[serde(default)]
    pub instruments: Option<Vec<String>>,
    #[serde(default)]
    pub deletion_threshold: Option<usize>,
    #[serde(default)]
    pub delete_outside_subset: bool,
    #[serde(default)]
    pub removal_staging: Option<String>,
    #[serde(default)]
    pub remove_staging: bool,
    #[serde(default)]
    pub remove_command: Option<String>,
    #[serde(default)]
    pub download_parallelism: Option<usize>,
    #[serde(default)]
    pub subset: Vec<SubsetRule>,
}

/// One declarative subset rule; a dataset is mirrored iff any rule matches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubsetRule {
    pub instrument: String,
    pub levels: Vec<String>,
    /// `YYYY-MM-DD`; rows without a known begin time fail the cutoff.
    #[serde(default)]
    pub min_date: Option<String>,
}

#[derive(Debug, Clone)]
struct ResolvedRule {
    instrument: String,
    levels: Vec<String>,
    min_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub local_root: Utf8PathBuf,
    pub download_dir: Utf8PathBuf,
    pub instruments: Vec<String>,
    pub deletion_threshold: usize,
    pub delete_outside_subset: bool,
    pub removal_staging: Option<Utf8PathBuf>,
    pub remove_staging: bool,
    pub remove_command: String,
    pub download_parallelism: usize,
    rules: Vec<ResolvedRule>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MirrorError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("solo-mirror.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(MirrorError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| MirrorError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| MirrorError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MirrorError> {
        let rules = config
            .subset
            .iter()
            .map(|rule| {
                let min_date = rule
                    .min_date
                    .as_deref()
                    .map(|value| {
                        NaiveDate::parse_from_str(value, "%Y-%m-%d")
                            .ok()
                            .and_then(|date| date.and_hms_opt(0, 0, 0))
                            .map(|naive| Utc.from_utc_datetime(&naive))
                            .ok_or_else(|| {
                                MirrorError::ConfigParse(format!("invalid min_date: {value}"))
                            })
                    })
                    .transpose()?;
                Ok(ResolvedRule {
                    instrument: rule.instrument.to_uppercase(),
                    levels: rule.levels.iter().map(|level| level.to_uppercase()).collect(),
                    min_date,
                })
            })
            .collect::<Result<Vec<_>, MirrorError>>()?;

        Ok(ResolvedConfig {
            local_root: Utf8PathBuf::from(config.local_root),
            download_dir: Utf8PathBuf::from(config.download_dir),
            instruments: config
                .instruments
                .unwrap_or_else(|| DEFAULT_INSTRUMENTS.iter().map(|s| s.to_string()).collect()),
            deletion_threshold: config.deletion_threshold.unwrap_or(25),
            delete_outside_subset: config.delete_outside_subset,
            removal_staging: config.removal_staging.map(Utf8PathBuf::from),
            remove_staging: config.remove_staging,
            remove_command: config.remove_command.unwrap_or_else(|| "trash".to_string()),
            download_parallelism: config.download_parallelism.unwrap_or(1),
            rules,
        })
    }
}

impl ResolvedConfig {
    pub fn sync_options(&self, dry_run: bool) -> SyncOptions {
        let mut options = SyncOptions::new(self.local_root.clone(), self.download_dir.clone());
        options.instruments = self.instruments.clone();
        options.deletion_threshold = self.deletion_threshold;
        options.delete_outside_subset = self.delete_outside_subset;
        options.download_parallelism = self.download_parallelism;
        options.dry_run = dry_run;
        options
    }

    pub fn removal_handler(&self) -> RemovalHandler {
        let mode = match &self.removal_staging {
            Some(dir) => RemovalMode::Staged {
                staging_dir: dir.clone(),
                remove_staging: self.remove_staging,
            },
            None => RemovalMode::Direct,
        };
        RemovalHandler::new(self.remove_command.clone(), mode)
    }

    /// Compiles the subset rules into the user predicate.
    ///
    /// An empty rule list accepts everything; the sync failsafe still
    /// guards against runaway deletions.
    pub fn predicate(&self) -> impl Fn(&SubsetRow<'_>) -> bool + Send + Sync {
        let rules = self.rules.clone();
        move |row: &SubsetRow<'_>| {
            if rules.is_empty() {
                return true;
            }
            rules.iter().any(|rule| {
                rule.instrument == row.instrument.to_uppercase()
                    && rule.levels.iter().any(|level| level == row.level)
                    && match rule.min_date {
                        None => true,
                        Some(cutoff) => row.begin_time.is_some_and(|begin| begin >= cutoff),
                    }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn base_config() -> Config {
        Config {
            local_root: "/data/mirror".to_string(),
            download_dir: "/data/incoming".to_string(),
            instruments: None,
            deletion_threshold: None,
            delete_outside_subset: false,
            removal_staging: None,
            remove_staging: false,
            remove_command: None,
            download_parallelism: None,
            subset: vec![SubsetRule {
                instrument: "epd".to_string(),
                levels: vec!["l1".to_string(), "L2".to_string()],
                min_date: Some("2020-08-01".to_string()),
            }],
        }
    }

    #[test]
    fn defaults_are_filled_in() {
        let resolved = ConfigLoader::resolve_config(base_config()).unwrap();
        assert_eq!(resolved.deletion_threshold, 25);
        assert_eq!(resolved.remove_command, "trash");
        assert_eq!(resolved.instruments, DEFAULT_INSTRUMENTS);
        assert_eq!(resolved.download_parallelism, 1);
    }

    #[test]
    fn predicate_follows_rules() {
        let resolved = ConfigLoader::resolve_config(base_config()).unwrap();
        let predicate = resolved.predicate();
        let accepted = SubsetRow {
            instrument: "EPD",
            level: "L1",
            begin_time: Some(Utc.with_ymd_and_hms(2020, 8, 13, 0, 0, 0).unwrap()),
            dsid: "SOLO_L1_EPD-SIS-A-RATES-SLOW",
        };
        assert!(predicate(&accepted));

        let too_old = SubsetRow {
            begin_time: Some(Utc.with_ymd_and_hms(2020, 7, 1, 0, 0, 0).unwrap()),
            ..accepted
        };
        assert!(!predicate(&too_old));

        let wrong_level = SubsetRow {
            level: "L3",
            ..accepted
        };
        assert!(!predicate(&wrong_level));

        let no_time = SubsetRow {
            begin_time: None,
            ..accepted
        };
        assert!(!predicate(&no_time));
    }

    #[test]
    fn invalid_min_date_is_rejected() {
        let mut config = base_config();
        config.subset[0].min_date = Some("13/08/2020".to_string());
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, MirrorError::ConfigParse(_));
    }
}
