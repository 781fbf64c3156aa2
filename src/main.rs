use chrono::Local;
use clap::Parser;
use pg_hot_backup::backup::backup_config::{BackupConfig, ConfigLayer};
use pg_hot_backup::backup::layout::{list_file_names, Tier};
use pg_hot_backup::backup::lock::{release_on_signal, LockGuard};
use pg_hot_backup::backup::remote::ftp::FtpConnector;
use pg_hot_backup::backup::result_error::result::Result;
use pg_hot_backup::backup::runner::BackupRunner;
use pg_hot_backup::backup::session::postgres::PostgresSource;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Hot backup of a PostgreSQL cluster with tiered local rotation and FTP mirrors
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// YAML file with the same keys as the flags; flags win over it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the local backup tree [default: /backup]
    #[arg(long)]
    backup_path: Option<PathBuf>,

    /// Keep daily archives this many days, 0 keeps everything [default: 30]
    #[arg(long)]
    days: Option<u32>,

    /// Keep this many daily archives instead of using --days [default: 0]
    #[arg(short, long)]
    copies: Option<u32>,

    /// libpq style connection string
    /// [default: "host=/var/run/postgresql user=postgres sslmode=disable"]
    #[arg(long)]
    dsn: Option<String>,

    /// FTP credentials file [default: /etc/ftp-backup.conf]
    #[arg(long)]
    ftp_conf: Option<PathBuf>,

    /// Single FTP target replacing the credentials file
    #[arg(long)]
    ftp_host: Option<String>,

    #[arg(long)]
    ftp_user: Option<String>,

    #[arg(long)]
    ftp_pass: Option<String>,

    /// Remote retention is the local one times this factor [default: 4]
    #[arg(long)]
    ftp_keep_factor: Option<u32>,

    /// Remote directory the backup tree is mirrored under [default: /]
    #[arg(long)]
    ftp_root: Option<String>,

    /// [default: /tmp/postgresql_backup.lock]
    #[arg(long)]
    lock_file: Option<PathBuf>,

    /// Print the daily archives and exit
    #[arg(long)]
    list: bool,
}

impl From<Args> for ConfigLayer {
    fn from(args: Args) -> Self {
        ConfigLayer {
            backup_path: args.backup_path,
            days: args.days,
            copies: args.copies,
            dsn: args.dsn.map(Into::into),
            ftp_conf: args.ftp_conf,
            ftp_host: args.ftp_host,
            ftp_user: args.ftp_user,
            ftp_pass: args.ftp_pass.map(Into::into),
            ftp_keep_factor: args.ftp_keep_factor,
            ftp_root: args.ftp_root,
            lock_file: args.lock_file,
            ..Default::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{e}");
        exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let list = args.list;
    let config_file = args.config.clone();
    let flags = ConfigLayer::from(args);
    let layer = match config_file {
        Some(path) => flags.or(ConfigLayer::from_yaml_file(path)?),
        None => flags,
    };
    let config = Arc::new(layer.resolve()?);

    if list {
        for name in list_file_names(config.layout().tier_dir(Tier::Daily))? {
            println!("{}", name);
        }
        return Ok(());
    }

    let lock = LockGuard::acquire(config.lock_file())?;
    release_on_signal(config.lock_file())?;
    let result = backup(config);
    lock.release();
    result
}

fn backup(config: Arc<BackupConfig>) -> Result<()> {
    let mut source = PostgresSource::connect(config.dsn())?;
    let report = BackupRunner::new(config).run(&mut source, &FtpConnector, Local::now())?;

    match &report.archive {
        Some(summary) => info!("Backup complete: {:?}", summary.path()),
        None => warn!("Run finished without an archive"),
    }
    for outcome in report.replication.iter().filter(|o| o.result.is_err()) {
        warn!("Remote target {} did not receive the archive", outcome.host);
    }
    Ok(())
}
