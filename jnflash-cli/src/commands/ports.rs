//! Serial port listing.

use console::style;
use jnflash::{DetectedPort, auto_detect_port, detect_ports};

/// JSON description of detected ports.
fn ports_json(ports: &[DetectedPort]) -> serde_json::Value {
    ports
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name(),
                "device": p.device.name(),
                "known": p.device.is_known(),
                "vid": p.info.vid,
                "pid": p.info.pid,
                "manufacturer": p.info.manufacturer,
                "product": p.info.product,
                "serial": p.info.serial_number,
            })
        })
        .collect()
}

/// List-ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) {
    let detected = detect_ports();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&ports_json(&detected)).unwrap_or_default()
        );
        return;
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for line in jnflash::format_port_list(&detected) {
        eprintln!("  {} {line}", style("•").green());
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Default port: {}",
            style("→").green().bold(),
            style(auto_port.name()).cyan().bold()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jnflash::PortInfo;

    #[test]
    fn test_ports_json_fields() {
        let ports = vec![DetectedPort::new(PortInfo {
            name: "/dev/ttyUSB0".to_string(),
            vid: Some(0x0403),
            pid: Some(0x6001),
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R USB UART".to_string()),
            serial_number: Some("A1B2C3".to_string()),
        })];

        let value = ports_json(&ports);
        let entry = &value[0];
        assert_eq!(entry["name"], "/dev/ttyUSB0");
        assert_eq!(entry["device"], "FTDI");
        assert_eq!(entry["known"], true);
        assert_eq!(entry["vid"], 0x0403);
        assert_eq!(entry["serial"], "A1B2C3");
    }

    #[test]
    fn test_ports_json_empty_is_array() {
        assert_eq!(ports_json(&[]), serde_json::json!([]));
    }
}
