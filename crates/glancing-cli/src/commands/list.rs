use super::{json_pretty, EXIT_SUCCESS};
use glancing_core::Settings;
use glancing_registry::{snapshot, RegisteredImage};
use glancing_schema::Version;

pub fn run(settings: &Settings, json: bool) -> Result<u8, String> {
    let images = snapshot(&settings.registry()).map_err(|e| e.to_string())?;
    print_images(&images, json)?;
    Ok(EXIT_SUCCESS)
}

fn print_images(images: &[RegisteredImage], json: bool) -> Result<(), String> {
    if json {
        println!("{}", json_pretty(&images)?);
    } else if images.is_empty() {
        println!("no images registered");
    } else {
        println!(
            "{:<38} {:<28} {:<10} {:<28} CHECKSUM",
            "ID", "NAME", "VERSION", "MPID"
        );
        for image in images {
            println!(
                "{:<38} {:<28} {:<10} {:<28} {}",
                image.id.as_str(),
                image.name,
                image.version.as_ref().map_or("-", Version::as_str),
                image.mpid.as_deref().unwrap_or("-"),
                image.checksum.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}
