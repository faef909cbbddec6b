use super::{check_registry, json_pretty, marketplace_config, EXIT_FAILURE, EXIT_SUCCESS};
use glancing_core::{ImportOptions, ImportOutcome, ImportPipeline, ImportSource, Settings};
use glancing_remote::{DescriptorKind, HttpBackend, MetadataFetcher};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct ImportReport<'a> {
    descriptor: &'a str,
    kind: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl<'a> ImportReport<'a> {
    fn new(descriptor: &'a str, kind: DescriptorKind, outcome: &ImportOutcome) -> Self {
        let (status, id, name, reason) = match outcome {
            ImportOutcome::Imported { id, name } => {
                ("imported", Some(id.to_string()), Some(name.clone()), None)
            }
            ImportOutcome::DryRunOk { name } => ("verified", None, Some(name.clone()), None),
            ImportOutcome::Rejected(r) => ("rejected", None, None, Some(r.to_string())),
            ImportOutcome::DryRunFail(r) => ("failed", None, None, Some(r.to_string())),
        };
        Self {
            descriptor,
            kind: kind.to_string(),
            status,
            id,
            name,
            reason,
        }
    }
}

pub fn run(
    settings: &Settings,
    descriptor: &str,
    options: &ImportOptions,
    json: bool,
) -> Result<u8, String> {
    let kind = DescriptorKind::detect(descriptor).ok_or_else(|| {
        format!("{descriptor}: not a URL, an existing file or a marketplace id")
    })?;
    let config = marketplace_config(settings)?;
    let backend = HttpBackend::new(config.clone());
    let registry = settings.registry();
    if !options.dry_run {
        check_registry(&registry)?;
    }

    let source = match kind {
        DescriptorKind::Url => ImportSource::Url(descriptor.to_owned()),
        DescriptorKind::Local => ImportSource::Local(PathBuf::from(descriptor)),
        DescriptorKind::Json | DescriptorKind::Xml | DescriptorKind::MarketplaceId => {
            let record = MetadataFetcher::new(&backend, config)
                .fetch(descriptor, kind)
                .ok_or_else(|| format!("{descriptor}: cannot retrieve {kind} metadata"))?;
            ImportSource::Metadata(record)
        }
    };

    let pipeline = ImportPipeline::new(&registry, &backend).with_backup_dir(&settings.backup_dir);
    let outcome = pipeline.run(source, options);

    if json {
        println!(
            "{}",
            json_pretty(&ImportReport::new(descriptor, kind, &outcome))?
        );
    } else {
        match &outcome {
            ImportOutcome::Imported { id, name } => println!("imported {name} as {id}"),
            ImportOutcome::DryRunOk { name } => {
                println!("dry run: {name} verified, nothing imported");
            }
            ImportOutcome::Rejected(reason) => eprintln!("{descriptor}: rejected: {reason}"),
            ImportOutcome::DryRunFail(reason) => {
                eprintln!("dry run: {descriptor} would be rejected: {reason}");
            }
        }
    }

    Ok(if outcome.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
