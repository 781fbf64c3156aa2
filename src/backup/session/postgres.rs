use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use crate::backup::session::{Capability, HotBackupSource, SourceCall};
use function_name::named;
use postgres::{Client, NoTls, SimpleQueryMessage};

/// PostgreSQL 15+ first, then the functions removed in 15.
static BEGIN_BACKUP: &[SourceCall] = &[
    SourceCall {
        name: "pg_backup_start",
        statement: "SELECT pg_backup_start('pg-hot-backup', false)",
    },
    SourceCall {
        name: "pg_start_backup",
        statement: "SELECT pg_start_backup('pg-hot-backup', true)",
    },
];

static DATA_DIRECTORY: &[SourceCall] = &[SourceCall {
    name: "data_directory",
    statement: "SHOW data_directory",
}];

static END_BACKUP: &[SourceCall] = &[
    SourceCall {
        name: "pg_backup_stop",
        statement: "SELECT pg_backup_stop(false)",
    },
    SourceCall {
        name: "pg_stop_backup",
        statement: "SELECT pg_stop_backup()",
    },
];

/// A single connection held for the whole backup session. Non-exclusive
/// backups are tied to the session that started them.
pub struct PostgresSource {
    client: Client,
}

impl PostgresSource {
    #[named]
    pub fn connect(dsn: &RedactedString) -> Result<Self> {
        let client = Client::connect(dsn.inner(), NoTls)
            .map_err(Error::from)
            .add_msg("Cannot connect to PostgreSQL")
            .add_fn_name(function_path!())?;
        tracing::debug!("Connected to PostgreSQL");
        Ok(Self { client })
    }
}

impl HotBackupSource for PostgresSource {
    fn candidates(&self, capability: Capability) -> &'static [SourceCall] {
        calls_for(capability)
    }

    fn invoke(&mut self, call: &SourceCall) -> Result<Option<String>> {
        tracing::debug!("Running {}: {}", call.name, call.statement);
        let messages = self.client.simple_query(call.statement)?;
        Ok(first_value(&messages))
    }
}

fn calls_for(capability: Capability) -> &'static [SourceCall] {
    match capability {
        Capability::BeginBackup => BEGIN_BACKUP,
        Capability::DataDirectory => DATA_DIRECTORY,
        Capability::EndBackup => END_BACKUP,
    }
}

fn first_value(messages: &[SimpleQueryMessage]) -> Option<String> {
    messages.iter().find_map(|m| match m {
        SimpleQueryMessage::Row(row) => row.try_get(0).ok().flatten().map(str::to_string),
        _ => None,
    })
}
