use crate::backup::compress::{GzipConfig, DEFAULT_COMPRESSION_LEVEL};
use crate::backup::function_path;
use crate::backup::layout::{BackupLayout, PRODUCT_DIR};
use crate::backup::lock::DEFAULT_LOCK_FILE;
use crate::backup::redacted::RedactedString;
use crate::backup::remote::conf::read_credentials_file;
use crate::backup::remote::{RemoteTarget, DEFAULT_KEEP_FACTOR};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::retention::RetentionPolicy;
use crate::backup::validate::{validate_backup_root, validate_path_component, validate_remote_root};
use bon::Builder;
use function_name::named;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use validator::Validate;

pub static DEFAULT_BACKUP_ROOT: &str = "/backup";
pub static DEFAULT_KEEP_DAYS: u32 = 30;
pub static DEFAULT_DSN: &str = "host=/var/run/postgresql user=postgres sslmode=disable";
pub static DEFAULT_CREDENTIAL_FILE: &str = "/etc/ftp-backup.conf";
pub static DEFAULT_REMOTE_ROOT: &str = "/";
pub static FALLBACK_HOSTNAME: &str = "localhost";

/// One source of settings. Unset keys fall through to the next layer.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub backup_path: Option<PathBuf>,
    pub hostname: Option<String>,
    pub days: Option<u32>,
    pub copies: Option<u32>,
    pub dsn: Option<RedactedString>,
    pub compression_level: Option<u32>,
    pub ftp_conf: Option<PathBuf>,
    pub ftp_host: Option<String>,
    pub ftp_user: Option<String>,
    pub ftp_pass: Option<RedactedString>,
    pub ftp_keep_factor: Option<u32>,
    pub ftp_root: Option<String>,
    pub lock_file: Option<PathBuf>,
}

impl ConfigLayer {
    #[named]
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, ConfigLayer>(f).map_err(Error::from))
            .add_msg(format!("Parse YAML config failed: {:?}", path))
            .add_fn_name(function_path!())
    }

    /// Keys set here win; the rest come from `fallback`.
    pub fn or(self, fallback: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            backup_path: self.backup_path.or(fallback.backup_path),
            hostname: self.hostname.or(fallback.hostname),
            days: self.days.or(fallback.days),
            copies: self.copies.or(fallback.copies),
            dsn: self.dsn.or(fallback.dsn),
            compression_level: self.compression_level.or(fallback.compression_level),
            ftp_conf: self.ftp_conf.or(fallback.ftp_conf),
            ftp_host: self.ftp_host.or(fallback.ftp_host),
            ftp_user: self.ftp_user.or(fallback.ftp_user),
            ftp_pass: self.ftp_pass.or(fallback.ftp_pass),
            ftp_keep_factor: self.ftp_keep_factor.or(fallback.ftp_keep_factor),
            ftp_root: self.ftp_root.or(fallback.ftp_root),
            lock_file: self.lock_file.or(fallback.lock_file),
        }
    }

    /// Fills defaults, loads remote targets and validates the result.
    ///
    /// Targets come from the credential file unless `ftp_host` is set, in
    /// which case that single record replaces the file's list. An unreadable
    /// credential file or an unknown hostname is logged, not fatal.
    #[named]
    pub fn resolve(self) -> Result<BackupConfig> {
        let keep_factor = self.ftp_keep_factor.unwrap_or(DEFAULT_KEEP_FACTOR);
        let remote_targets = match self.ftp_host.filter(|host| !host.is_empty()) {
            Some(host) => vec![RemoteTarget::builder()
                .host(host)
                .user(self.ftp_user.unwrap_or_default())
                .password(self.ftp_pass.unwrap_or_default())
                .keep_factor(keep_factor)
                .build()],
            None => {
                let conf = self
                    .ftp_conf
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIAL_FILE));
                read_credentials_file(&conf, keep_factor).unwrap_or_else(|e| {
                    warn!("Ignoring credential file, no remote targets: {}", e);
                    Vec::new()
                })
            }
        };
        for target in &remote_targets {
            info!("Remote target {} (user {})", target.host(), target.user());
        }

        let hostname = match self.hostname {
            Some(hostname) => hostname,
            None => match hostname::get() {
                Ok(hostname) => hostname.to_string_lossy().into_owned(),
                Err(e) => {
                    warn!("Cannot determine hostname, using {}: {}", FALLBACK_HOSTNAME, e);
                    FALLBACK_HOSTNAME.to_string()
                }
            },
        };

        let config = BackupConfig::builder()
            .backup_root(
                self.backup_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_ROOT)),
            )
            .hostname(hostname)
            .keep_days(self.days.unwrap_or(DEFAULT_KEEP_DAYS))
            .max_copies(self.copies.unwrap_or(0))
            .dsn(self.dsn.unwrap_or_else(|| DEFAULT_DSN.into()))
            .compression(
                GzipConfig::builder()
                    .level(self.compression_level.unwrap_or(DEFAULT_COMPRESSION_LEVEL))
                    .build(),
            )
            .remote_targets(remote_targets)
            .remote_root(
                self.ftp_root
                    .unwrap_or_else(|| DEFAULT_REMOTE_ROOT.to_string()),
            )
            .lock_file(
                self.lock_file
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_FILE)),
            )
            .build();

        config
            .validate()
            .map_err(Error::from)
            .add_msg("Config validation failed")
            .add_fn_name(function_path!())?;
        Ok(config)
    }
}

/// Resolved settings for one run.
#[derive(Clone, Debug, Builder, Getters, CopyGetters, Validate)]
pub struct BackupConfig {
    #[builder(into)]
    #[validate(custom(function = validate_backup_root))]
    #[getset(get = "pub")]
    backup_root: PathBuf,
    #[builder(into)]
    #[validate(custom(function = validate_path_component))]
    #[getset(get = "pub")]
    hostname: String,
    #[builder(default = DEFAULT_KEEP_DAYS)]
    #[getset(get_copy = "pub")]
    keep_days: u32,
    /// Nonzero switches local retention to keep-newest-N.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    max_copies: u32,
    #[builder(into, default = RedactedString::from(DEFAULT_DSN))]
    #[getset(get = "pub")]
    dsn: RedactedString,
    #[builder(default)]
    #[validate(nested)]
    #[getset(get_copy = "pub")]
    compression: GzipConfig,
    #[builder(default)]
    #[validate(nested)]
    #[getset(get = "pub")]
    remote_targets: Vec<RemoteTarget>,
    #[builder(into, default = DEFAULT_REMOTE_ROOT.to_string())]
    #[validate(custom(function = validate_remote_root))]
    #[getset(get = "pub")]
    remote_root: String,
    #[builder(into, default = PathBuf::from(DEFAULT_LOCK_FILE))]
    #[getset(get = "pub")]
    lock_file: PathBuf,
}

impl BackupConfig {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from_settings(self.max_copies, self.keep_days)
    }

    pub fn layout(&self) -> BackupLayout {
        BackupLayout::new(&self.backup_root, &self.hostname, PRODUCT_DIR)
    }
}
