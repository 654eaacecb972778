use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relstore::dictionary::{Dictionary, EntityDictionary, Model};
use relstore::persist::{create_schema, open, row_counts};
use relstore::settings::Settings;

fn run(settings: &Settings) -> relstore::Result<()> {
    let dictionary = match settings.model.path.as_deref() {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| relstore::Error::Model(format!("Cannot read '{path}': {e}")))?;
            Dictionary::from_json(&json)?
        }
        None => Dictionary::from_model(Model::default())?,
    };
    let dictionary = Arc::new(dictionary);
    info!(entities = dictionary.len(), "model loaded");

    let connection = open(&settings.database)?;
    create_schema(&connection, dictionary.as_ref())?;
    for (entity_type, rows) in row_counts(&connection, dictionary.as_ref())? {
        let table = dictionary.entity_binding(&entity_type)?.table_name().to_owned();
        info!(entity = %entity_type, %table, rows, "stored");
    }
    Ok(())
}

fn main() {
    // an optional settings file may be given as the only argument
    let file = std::env::args().nth(1);
    let settings = match Settings::load(file.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if let Err(e) = run(&settings) {
        error!(error = %e, "relstore failed");
        std::process::exit(1);
    }
}
