//! # pg_hot_backup
//!
//! Unattended hot backups of a running PostgreSQL cluster's data directory.
//!
//! ## Features
//!
//! - **Hot Backup Bracketing**: begin/end backup calls with fallback to legacy server functions
//! - **Archiving**: tar + gzip of the data directory, preserving ownership, mode and mtime
//! - **Tiered Rotation**: daily archives, promoted copies for weekly, monthly and yearly tiers
//! - **Retention**: keep the newest N daily archives, or delete those older than D days
//! - **Replication**: upload to any number of FTP targets, each with amplified retention
//! - **Single Instance**: lock file with stale-lock recovery
//!
//! ## Quick Start
//!
//! ```no_run
//! use pg_hot_backup::backup::backup_config::ConfigLayer;
//! use pg_hot_backup::backup::remote::ftp::FtpConnector;
//! use pg_hot_backup::backup::runner::BackupRunner;
//! use pg_hot_backup::backup::session::postgres::PostgresSource;
//!
//! let config = ConfigLayer::default().resolve()?;
//! let mut source = PostgresSource::connect(config.dsn())?;
//! let report = BackupRunner::new(config.into()).run(&mut source, &FtpConnector, chrono::Local::now())?;
//! println!("{:?}", report.archive);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
