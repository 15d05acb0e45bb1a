//! Serial device enumeration.
//!
//! Thin wrapper over `serialport::available_ports()` — cross-platform by
//! construction. Used by the CLI's `config` subcommand to help an operator
//! pick `incoming_port` without guessing a device path.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredPort {
    pub path: String,
    pub kind: &'static str,
}

pub fn list_available_ports() -> Result<Vec<DiscoveredPort>, String> {
    serialport::available_ports()
        .map(|ports| {
            ports
                .into_iter()
                .map(|p| DiscoveredPort {
                    path: p.port_name,
                    kind: match p.port_type {
                        serialport::SerialPortType::UsbPort(_) => "usb",
                        serialport::SerialPortType::PciPort => "pci",
                        serialport::SerialPortType::BluetoothPort => "bluetooth",
                        serialport::SerialPortType::Unknown => "unknown",
                    },
                })
                .collect()
        })
        .map_err(|e| format!("failed to enumerate serial ports: {e}"))
}
