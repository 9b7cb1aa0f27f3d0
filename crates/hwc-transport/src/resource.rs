//! VISA-style resource addresses.
//!
//! | Address                              | Channel            |
//! |--------------------------------------|--------------------|
//! | `TCPIP0::192.168.1.20::10001::SOCKET` | raw TCP socket     |
//! | `ASRL/dev/ttyUSB0::INSTR`            | serial port        |
//! | `ASRL3::INSTR`                       | serial port `COM3` |
//! | anything else (`GPIB0::1::INSTR`, ...) | VISA session     |

use hwc_core::error::TransportError;
use std::fmt;
use std::str::FromStr;

/// Where a transport connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddress {
    /// Raw socket (`TCPIP[n]::host::port::SOCKET`).
    Socket { host: String, port: u16 },
    /// Serial port by OS path (`/dev/ttyUSB0`, `COM3`).
    Serial { path: String },
    /// Handed to the VISA library unchanged.
    Visa(String),
}

impl FromStr for ResourceAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(TransportError::InvalidResource(s.to_string()));
        }

        let parts: Vec<&str> = raw.split("::").collect();
        let head = parts[0].to_ascii_uppercase();

        if head.starts_with("TCPIP")
            && parts.len() == 4
            && parts[3].eq_ignore_ascii_case("SOCKET")
        {
            let host = parts[1].trim();
            let port = parts[2]
                .trim()
                .parse::<u16>()
                .map_err(|_| TransportError::InvalidResource(s.to_string()))?;
            if host.is_empty() {
                return Err(TransportError::InvalidResource(s.to_string()));
            }
            return Ok(Self::Socket {
                host: host.to_string(),
                port,
            });
        }

        if head.starts_with("ASRL") && parts.len() <= 2 {
            if parts.len() == 2 && !parts[1].eq_ignore_ascii_case("INSTR") {
                return Err(TransportError::InvalidResource(s.to_string()));
            }
            // Keep the original case of the device path.
            let target = parts[0][4..].trim();
            if target.is_empty() {
                return Err(TransportError::InvalidResource(s.to_string()));
            }
            let path = if target.chars().all(|c| c.is_ascii_digit()) {
                format!("COM{}", target)
            } else {
                target.to_string()
            };
            return Ok(Self::Serial { path });
        }

        Ok(Self::Visa(raw.to_string()))
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            Self::Serial { path } => write!(f, "ASRL{}::INSTR", path),
            Self::Visa(raw) => f.write_str(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket() {
        let addr: ResourceAddress = "TCPIP0::192.168.1.20::10001::SOCKET".parse().unwrap();
        assert_eq!(
            addr,
            ResourceAddress::Socket {
                host: "192.168.1.20".into(),
                port: 10001
            }
        );

        let addr: ResourceAddress = "tcpip::osa.lab::5025::socket".parse().unwrap();
        assert!(matches!(addr, ResourceAddress::Socket { port: 5025, .. }));
    }

    #[test]
    fn socket_with_bad_port_is_invalid() {
        assert!(matches!(
            "TCPIP0::10.0.0.1::http::SOCKET".parse::<ResourceAddress>(),
            Err(TransportError::InvalidResource(_))
        ));
        assert!("TCPIP0::10.0.0.1::70000::SOCKET"
            .parse::<ResourceAddress>()
            .is_err());
    }

    #[test]
    fn parses_serial() {
        let addr: ResourceAddress = "ASRL/dev/ttyUSB0::INSTR".parse().unwrap();
        assert_eq!(
            addr,
            ResourceAddress::Serial {
                path: "/dev/ttyUSB0".into()
            }
        );

        let addr: ResourceAddress = "ASRL3::INSTR".parse().unwrap();
        assert_eq!(addr, ResourceAddress::Serial { path: "COM3".into() });

        let addr: ResourceAddress = "ASRLCOM7".parse().unwrap();
        assert_eq!(addr, ResourceAddress::Serial { path: "COM7".into() });
    }

    #[test]
    fn other_addresses_go_to_visa() {
        for raw in [
            "GPIB0::1::INSTR",
            "TCPIP0::192.168.1.20::inst0::INSTR",
            "USB0::0x0B21::0x0039::91T123456::INSTR",
            "OSA",
        ] {
            assert_eq!(
                raw.parse::<ResourceAddress>().unwrap(),
                ResourceAddress::Visa(raw.into())
            );
        }
    }

    #[test]
    fn empty_is_invalid() {
        assert!(matches!(
            "  ".parse::<ResourceAddress>(),
            Err(TransportError::InvalidResource(_))
        ));
    }

    #[test]
    fn display_roundtrips_socket() {
        let addr = ResourceAddress::Socket {
            host: "10.0.0.2".into(),
            port: 10001,
        };
        assert_eq!(addr.to_string().parse::<ResourceAddress>().unwrap(), addr);
    }
}
