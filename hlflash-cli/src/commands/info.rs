//! Firmware image info command.

use {
    anyhow::{Context, Result},
    console::style,
    hlflash::{FirmwareImage, FirmwareSource, VersionTag},
    std::path::Path,
};

/// Facts about an image shown by `info`.
#[derive(Debug)]
struct ImageSummary {
    name: String,
    size: u64,
    packets: u64,
    tag: Option<VersionTag>,
}

fn summarize(firmware: &Path) -> Result<ImageSummary> {
    let image = FirmwareImage::new(firmware);
    let size = image
        .size()
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    let packets = image.packet_count()?;

    Ok(ImageSummary {
        name: image
            .name()
            .to_string(),
        size,
        packets,
        tag: image.version_tag(),
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let summary = summarize(firmware)?;

    if json {
        return print_json(&summary);
    }

    eprintln!(
        "{}",
        style("Firmware Image")
            .bold()
            .underlined()
    );
    eprintln!("  Name: {}", style(&summary.name).cyan());
    eprintln!("  Size: {} bytes", summary.size);
    eprintln!("  Packets: {} (1024 bytes each)", summary.packets);
    match &summary.tag {
        Some(tag) => {
            eprintln!("  Upgrades from: {}", style(&tag.from).yellow());
            eprintln!("  Installs: {}", style(&tag.to).green());
        },
        None => eprintln!(
            "  {}",
            style("No version tag in file name (expected <from>_to<to>.foto)").dim()
        ),
    }

    Ok(())
}

fn print_json(summary: &ImageSummary) -> Result<()> {
    let info = serde_json::json!({
        "ok": true,
        "data": {
            "name": summary.name,
            "size": summary.size,
            "packets": summary.packets,
            "version": summary.tag.as_ref().map(|tag| serde_json::json!({
                "from": tag.from,
                "to": tag.to,
            })),
        }
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&info)?
    );
    Ok(())
}
