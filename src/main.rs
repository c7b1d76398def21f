use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crmock::config::Settings;
use crmock::database::Database;
use crmock::error::Result;

fn run(settings: &Settings) -> Result<()> {
    let mode = settings.persistence_mode()?;
    let database = Database::new(mode)?;
    for object_type in database.types().list()? {
        info!(id = %object_type.id, name = %object_type.name, custom = object_type.is_custom, "object type");
    }
    for (table, rows) in database.table_counts()? {
        info!(table, rows, "table");
    }
    Ok(())
}

fn main() -> ExitCode {
    // the only argument is an optional path to a TOML settings file
    let path = std::env::args().nth(1);
    let settings = match Settings::load(path.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "startup failed");
            ExitCode::FAILURE
        }
    }
}
