//! Configuration handling for the archive engine and coordinator.

use config::{Config, File};
use flexi_logger::filter::{LogLineFilter, LogLineWriter};
use flexi_logger::{DeferredNow, LoggerHandle};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;

/// Either an absolute path to a validator/control binary, or a shell
/// command line containing `$DOMAIN`/`$ZONE_FILE` placeholders.
#[derive(Debug, Deserialize, Eq, PartialEq, Clone, Serialize)]
#[serde(untagged)]
pub enum ExternalCommand {
    Path(PathBuf),
    ShellTemplate(String),
}

#[derive(Debug, Deserialize, Eq, PartialEq, Clone, Serialize)]
/// The main config blob for steadydns. Write this as a JSON file and point
/// `--config` at it, or drop it in one of the default locations.
pub struct ConfigFile {
    /// Directory steadydns treats as its working directory; the archive
    /// file lives at `<working_dir>/backup/history.record`.
    pub working_dir: PathBuf,
    /// Directory containing the per-zone master files.
    pub zone_dir: PathBuf,
    /// Path to the main nameserver config file (the one holding zone blocks).
    pub main_config_path: PathBuf,
    /// Default is "info"
    pub log_level: String,

    /// chown zone files to this user after writing, if set.
    pub zone_file_owner: Option<String>,
    /// chown zone files to this group after writing, if set.
    pub zone_file_group: Option<String>,

    /// Override for the `check-conf`-equivalent offline validator. `None`
    /// means "not configured" - coordinator mutations skip that check.
    pub check_conf_command: Option<ExternalCommand>,
    /// Override for the `check-zone`-equivalent offline validator.
    pub check_zone_command: Option<ExternalCommand>,
    /// Seconds before a validator/service sub-process is killed.
    pub subprocess_timeout_secs: u64,

    /// Name of the service-manager unit controlling the nameserver process.
    pub service_unit_name: String,
    /// Shell command template to start the nameserver if the service
    /// manager doesn't know the unit.
    pub service_start_command: Option<String>,
    /// Shell command template to stop the nameserver.
    pub service_stop_command: Option<String>,
    /// Shell command template to reload the nameserver.
    pub service_reload_command: Option<String>,
    /// Control-channel key, passed to the `-k` flag of the control-channel
    /// fallback invocation.
    pub control_channel_key: Option<String>,
    /// Control-channel port, passed to the `-p` flag.
    pub control_channel_port: Option<u16>,

    /// How long a backup record lives before the next expiry sweep drops
    /// it. Default 30 days.
    pub backup_expiry_days: i64,
    /// Maximum number of protection files (`rollback.<id>`) kept on disk.
    pub protection_file_cap: usize,

    /// Hostname used as the default SOA primary nameserver when a new
    /// zone doesn't specify one.
    pub default_soa_hostname: String,
    /// Admin contact used as the default SOA admin email.
    pub default_soa_admin: String,
}

impl ConfigFile {
    pub fn archive_path(&self) -> PathBuf {
        self.working_dir.join("backup").join("history.record")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.working_dir.join("backup")
    }

    /// JSONify the configfile in a pretty way using serde
    pub fn as_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {e:?}"))
            .unwrap()
    }

    /// Loads the configuration from a given file or from some default locations.
    ///
    /// The default locations are `~/.config/steadydns.json` and `./steadydns.json`.
    pub fn try_from(config_path: Option<&String>) -> Result<ConfigFile, std::io::Error> {
        let file_locations = match config_path {
            Some(value) => vec![value.to_owned()],
            None => CONFIG_LOCATIONS.iter().map(|x| x.to_string()).collect(),
        };

        let found_files: Vec<String> = file_locations
            .iter()
            .filter_map(|f| {
                let path = shellexpand::tilde(&f).into_owned();
                let filepath = std::path::Path::new(&path);
                match filepath.exists() {
                    false => {
                        eprintln!("Config file {path} doesn't exist, skipping.");
                        None
                    }
                    true => Some(path),
                }
            })
            .collect();

        if found_files.is_empty() {
            eprintln!(
                "No configuration files exist, using built-in defaults. Tried: {}",
                file_locations.join(", ")
            );
            return Ok(ConfigFile::default());
        }

        for filepath in found_files {
            let config_filename: String = shellexpand::tilde(&filepath).into_owned();

            let builder = Config::builder()
                .add_source(File::new(&config_filename, config::FileFormat::Json))
                .add_source(config::Environment::with_prefix("steadydns"));

            let config = builder.build().map_err(|e| {
                std::io::Error::new(
                    ErrorKind::Other,
                    format!("Couldn't load config from {config_filename}: {e:?}"),
                )
            });

            match config {
                Ok(config) => {
                    eprintln!("Successfully loaded config from: {}", config_filename);
                    return Ok(ConfigFile::from(config));
                }
                Err(err) => eprintln!("{err:?}"),
            }
        }

        Ok(ConfigFile::default())
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            zone_dir: PathBuf::from("./zones"),
            main_config_path: PathBuf::from("./named.conf.local"),
            log_level: "info".to_string(),
            zone_file_owner: None,
            zone_file_group: None,
            check_conf_command: None,
            check_zone_command: None,
            subprocess_timeout_secs: 10,
            service_unit_name: "named".to_string(),
            service_start_command: None,
            service_stop_command: None,
            service_reload_command: None,
            control_channel_key: None,
            control_channel_port: None,
            backup_expiry_days: 30,
            protection_file_cap: 10,
            default_soa_hostname: "ns1.example.com.".to_string(),
            default_soa_admin: "admin.example.com.".to_string(),
        }
    }
}

impl Display for ConfigFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "working_dir={:?} zone_dir={:?} main_config={:?} log_level={}",
            self.working_dir, self.zone_dir, self.main_config_path, self.log_level
        ))
    }
}

impl From<Config> for ConfigFile {
    fn from(config: Config) -> Self {
        let default = Self::default();
        ConfigFile {
            working_dir: config.get("working_dir").unwrap_or(default.working_dir),
            zone_dir: config.get("zone_dir").unwrap_or(default.zone_dir),
            main_config_path: config
                .get("main_config_path")
                .unwrap_or(default.main_config_path),
            log_level: config.get("log_level").unwrap_or(default.log_level),
            zone_file_owner: config
                .get("zone_file_owner")
                .unwrap_or(default.zone_file_owner),
            zone_file_group: config
                .get("zone_file_group")
                .unwrap_or(default.zone_file_group),
            check_conf_command: config
                .get("check_conf_command")
                .unwrap_or(default.check_conf_command),
            check_zone_command: config
                .get("check_zone_command")
                .unwrap_or(default.check_zone_command),
            subprocess_timeout_secs: config
                .get("subprocess_timeout_secs")
                .unwrap_or(default.subprocess_timeout_secs),
            service_unit_name: config
                .get("service_unit_name")
                .unwrap_or(default.service_unit_name),
            service_start_command: config
                .get("service_start_command")
                .unwrap_or(default.service_start_command),
            service_stop_command: config
                .get("service_stop_command")
                .unwrap_or(default.service_stop_command),
            service_reload_command: config
                .get("service_reload_command")
                .unwrap_or(default.service_reload_command),
            control_channel_key: config
                .get("control_channel_key")
                .unwrap_or(default.control_channel_key),
            control_channel_port: config
                .get("control_channel_port")
                .unwrap_or(default.control_channel_port),
            backup_expiry_days: config
                .get("backup_expiry_days")
                .unwrap_or(default.backup_expiry_days),
            protection_file_cap: config
                .get("protection_file_cap")
                .unwrap_or(default.protection_file_cap),
            default_soa_hostname: config
                .get("default_soa_hostname")
                .unwrap_or(default.default_soa_hostname),
            default_soa_admin: config
                .get("default_soa_admin")
                .unwrap_or(default.default_soa_admin),
        }
    }
}

impl FromStr for ConfigFile {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let configfile = File::from_str(input, config::FileFormat::Json);

        let res = Config::builder()
            .add_source(configfile)
            .build()
            .map_err(|e| format!("{e:?}"))?;

        let res: ConfigFile = res.into();
        Ok(res)
    }
}

lazy_static::lazy_static! {
    static ref CONFIG_LOCATIONS: Vec<&'static str> =
        ["./steadydns.json", "~/.config/steadydns.json"].to_vec();
}

pub fn setup_logging(config: &ConfigFile, force_info: bool) -> Result<LoggerHandle, std::io::Error> {
    let log_level = match force_info {
        true => "info".to_string(),
        false => config.log_level.to_ascii_lowercase(),
    };

    let logger = flexi_logger::Logger::try_with_str(log_level).map_err(|e| {
        std::io::Error::new(ErrorKind::Other, format!("Failed to start logger! {e:?}"))
    })?;

    logger
        .write_mode(flexi_logger::WriteMode::Async)
        .filter(Box::new(LogFilter {
            filters: vec!["h2", "hyper::proto"],
        }))
        .set_palette("b1;3;2;6;5".to_string())
        .start()
        .map_err(|e| std::io::Error::new(ErrorKind::Other, format!("Failed to start logger! {e:?}")))
}

pub struct LogFilter {
    filters: Vec<&'static str>,
}

impl LogLineFilter for LogFilter {
    fn write(
        &self,
        now: &mut DeferredNow,
        record: &log::Record,
        log_line_writer: &dyn LogLineWriter,
    ) -> std::io::Result<()> {
        if self
            .filters
            .iter()
            .any(|r| record.metadata().target().starts_with(r))
        {
            return Ok(());
        }
        log_line_writer.write(now, record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.protection_file_cap, 10);
        assert_eq!(config.backup_expiry_days, 30);
    }

    #[test]
    fn test_from_str() {
        let json = r#"{"working_dir": "/tmp/steadydns"}"#;
        let config = ConfigFile::from_str(json).expect("should parse");
        assert_eq!(config.working_dir, PathBuf::from("/tmp/steadydns"));
    }
}
