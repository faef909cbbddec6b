use super::{config_error, json_pretty, marketplace_config, EXIT_FAILURE, EXIT_SUCCESS};
use glancing_core::{run_sync, CoreError, EntryOutcome, ImportOptions, ImportPipeline, Settings};
use glancing_remote::{HttpBackend, MetadataFetcher};

pub fn run(settings: &Settings, json: bool) -> Result<u8, String> {
    let config = marketplace_config(settings)?;
    let backend = HttpBackend::new(config.clone());
    let fetcher = MetadataFetcher::new(&backend, config);
    let registry = settings.registry();
    let pipeline = ImportPipeline::new(&registry, &backend).with_backup_dir(&settings.backup_dir);
    let options = ImportOptions {
        keep_temps: settings.keep_temps,
        ..ImportOptions::default()
    };

    let report = run_sync(pipeline, &fetcher, &settings.vmlists, options).map_err(|e| match e {
        CoreError::Schema(_) => config_error(e),
        CoreError::Registry(_) => format!("image registry unavailable: {e}"),
        _ => e.to_string(),
    })?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        for entry in &report.entries {
            match &entry.outcome {
                EntryOutcome::Uploaded { id } => println!("{}: uploaded as {id}", entry.mpid),
                EntryOutcome::Updated { id } => println!("{}: updated {id}", entry.mpid),
                EntryOutcome::Unchanged => println!("{}: up to date", entry.mpid),
                EntryOutcome::Skipped { reason } => println!("{}: skipped, {reason}", entry.mpid),
                EntryOutcome::Failed { reason } => println!("{}: failed, {reason}", entry.mpid),
            }
        }
        println!(
            "sync: {} image(s), {} uploaded, {} updated, {} unchanged, {} skipped, {} failed",
            report.total(),
            report.uploaded,
            report.updated,
            report.unchanged,
            report.skipped,
            report.failed
        );
    }

    Ok(if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
