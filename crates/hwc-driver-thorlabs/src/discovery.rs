//! Kinesis controller discovery.
//!
//! Kinesis controllers (KDC101, TDC001, KBD101, ...) enumerate as FTDI USB
//! serial ports with Thorlabs' own vendor/product pair and the controller's
//! serial number as the USB serial string.

use hwc_core::error::{TransportError, TransportResult};
use serde::Serialize;
use serialport::SerialPortType;

/// FTDI vendor id used by Thorlabs APT controllers.
pub const FTDI_VID: u16 = 0x0403;

/// Product id of the APT USB interface.
pub const APT_PID: u16 = 0xFAF0;

/// A serial port that looks like a Kinesis controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KinesisPort {
    pub path: String,
    pub serial_number: Option<String>,
    pub product: Option<String>,
}

/// True if the USB identity belongs to a Thorlabs APT controller.
pub fn is_kinesis_usb(manufacturer: Option<&str>, vid: u16, pid: u16) -> bool {
    let by_name = manufacturer
        .map(|m| m.to_ascii_lowercase().contains("thorlabs"))
        .unwrap_or(false);
    by_name || (vid == FTDI_VID && pid == APT_PID)
}

/// List attached Kinesis controllers, in OS enumeration order.
pub fn list_kinesis_ports() -> TransportResult<Vec<KinesisPort>> {
    let ports = serialport::available_ports()
        .map_err(|e| TransportError::Io(std::io::Error::from(e)))?;

    let found: Vec<KinesisPort> = ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb)
                if is_kinesis_usb(usb.manufacturer.as_deref(), usb.vid, usb.pid) =>
            {
                Some(KinesisPort {
                    path: port.port_name,
                    serial_number: usb.serial_number,
                    product: usb.product,
                })
            }
            _ => None,
        })
        .collect();

    tracing::debug!(count = found.len(), "enumerated Kinesis controllers");
    Ok(found)
}

/// Pick the controller with `serial_number`, or the first one if `None`.
pub fn select_port(ports: &[KinesisPort], serial_number: Option<&str>) -> Option<KinesisPort> {
    match serial_number {
        None => ports.first().cloned(),
        Some(wanted) => ports
            .iter()
            .find(|p| p.serial_number.as_deref().map(str::trim) == Some(wanted.trim()))
            .cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(path: &str, serial: &str) -> KinesisPort {
        KinesisPort {
            path: path.into(),
            serial_number: Some(serial.into()),
            product: Some("Kinesis K-Cube DC Servo".into()),
        }
    }

    #[test]
    fn recognizes_thorlabs_devices() {
        assert!(is_kinesis_usb(Some("Thorlabs"), 0x1234, 0x5678));
        assert!(is_kinesis_usb(Some("THORLABS Inc."), 0, 0));
        assert!(is_kinesis_usb(None, FTDI_VID, APT_PID));
        assert!(!is_kinesis_usb(Some("FTDI"), FTDI_VID, 0x6001));
        assert!(!is_kinesis_usb(None, 0x2341, 0x0043));
    }

    #[test]
    fn selects_by_serial_or_first() {
        let ports = vec![port("/dev/ttyUSB0", "27000001"), port("/dev/ttyUSB1", "27000002")];
        assert_eq!(select_port(&ports, None).unwrap().path, "/dev/ttyUSB0");
        assert_eq!(
            select_port(&ports, Some("27000002")).unwrap().path,
            "/dev/ttyUSB1"
        );
        assert!(select_port(&ports, Some("99")).is_none());
        assert!(select_port(&[], None).is_none());
    }
}
