use super::{json_pretty, EXIT_SUCCESS};
use glancing_core::Settings;
use glancing_registry::{delete_all, RegistryClient, Selector};

pub fn run(settings: &Settings, names: &[String], json: bool) -> Result<u8, String> {
    delete_images(&settings.registry(), names, json)
}

fn delete_images(
    registry: &dyn RegistryClient,
    names: &[String],
    json: bool,
) -> Result<u8, String> {
    let selector = Selector::names(names);
    let deleted = delete_all(registry, &selector).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "selector": names,
            "deleted": deleted,
        });
        println!("{}", json_pretty(&payload)?);
    } else if deleted == 0 {
        println!("no image matching {selector}");
    } else {
        println!("deleted {deleted} image(s)");
    }
    Ok(EXIT_SUCCESS)
}
