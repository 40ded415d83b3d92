//! Port listing command.

use {
    anyhow::{Context, Result},
    console::style,
    hlflash::{DetectedPort, detect_ports},
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports().context("Failed to enumerate serial ports")?;

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(port_json)
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports")
            .bold()
            .underlined()
    );

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port
            .device
            .is_known()
        {
            format!(
                " [{}]",
                style(
                    port.device
                        .name()
                )
                .yellow()
            )
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            device_type,
            vid_pid,
            product
        );
    }

    if let [only] = detected
        .iter()
        .filter(|p| p.is_likely_module())
        .collect::<Vec<_>>()
        .as_slice()
    {
        eprintln!(
            "\n{} Likely module port: {}",
            style("→")
                .green()
                .bold(),
            style(&only.name)
                .cyan()
                .bold()
        );
    }

    Ok(())
}

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "device": port.device.name(),
        "known": port.device.is_known(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlflash::PortInfo;

    #[test]
    fn test_port_json() {
        let port = DetectedPort::from(PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x10C4),
            pid: Some(0xEA60),
            manufacturer: Some("Silicon Labs".to_string()),
            product: None,
            serial_number: Some("0001".to_string()),
        });

        let value = port_json(&port);
        assert_eq!(value["name"], "/dev/ttyUSB0");
        assert_eq!(value["device"], "CP210x");
        assert_eq!(value["known"], true);
        assert_eq!(value["vid"], 0x10C4);
        assert!(value["product"].is_null());
        assert_eq!(value["serial"], "0001");
    }
}
