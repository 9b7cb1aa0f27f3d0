//! VISA session transport (feature `instrument_visa`).
//!
//! visa-rs is synchronous, so every I/O call runs on the blocking pool while
//! holding the session lock.

use async_trait::async_trait;
use hwc_core::error::{TransportError, TransportResult};
use hwc_core::transport::MessageTransport;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use visa_rs::enums::attribute::{AttrTmoValue, HasAttribute};
use visa_rs::prelude::*;

use crate::options::TransportOptions;

/// Message transport over a VISA session.
pub struct VisaTransport {
    resource: String,
    session: Arc<Mutex<Option<Instrument>>>,
    write_terminator: String,
    read_terminator: u8,
    timeout: Duration,
}

/// Map a visa-rs I/O error, folding `VI_ERROR_TMO` into a timeout.
fn map_io_error(operation: &str, err: std::io::Error, timeout: Duration) -> TransportError {
    let status = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<visa_rs::Error>())
        .map(|vs| vs.0 as i32);
    match status {
        Some(code) => TransportError::from_visa_status(operation, code, err.to_string(), timeout),
        None => TransportError::Io(err),
    }
}

fn map_visa_error(err: visa_rs::Error) -> TransportError {
    TransportError::Visa {
        code: err.0 as i32,
        message: err.to_string(),
    }
}

fn join_error(err: tokio::task::JoinError) -> TransportError {
    TransportError::Io(std::io::Error::other(err))
}

/// Open a VISA session to `resource`.
pub async fn open_visa(resource: &str, options: &TransportOptions) -> TransportResult<VisaTransport> {
    let name = CString::new(resource)
        .map_err(|_| TransportError::InvalidResource(resource.to_string()))?;
    let timeout = options.timeout();
    let timeout_ms = options.timeout_ms;

    let instr = tokio::task::spawn_blocking(move || -> TransportResult<Instrument> {
        let rm = DefaultRM::new().map_err(map_visa_error)?;
        let instr = rm
            .open(&name.into(), AccessMode::NO_LOCK, timeout)
            .map_err(map_visa_error)?;
        let tmo = AttrTmoValue::new_checked(timeout_ms)
            .ok_or_else(|| TransportError::Unsupported(format!("VISA timeout {}ms", timeout_ms)))?;
        instr.set_attr(tmo).map_err(map_visa_error)?;
        Ok(instr)
    })
    .await
    .map_err(join_error)??;

    info!(resource, "VISA session opened");
    Ok(VisaTransport {
        resource: resource.to_string(),
        session: Arc::new(Mutex::new(Some(instr))),
        write_terminator: options.write_terminator.clone(),
        read_terminator: options.read_terminator_byte()?,
        timeout,
    })
}

impl VisaTransport {
    /// Optionally write `command`, then read one terminated response.
    async fn exchange(&self, command: Option<&str>) -> TransportResult<String> {
        let guard = self.session.clone().lock_owned().await;
        if guard.is_none() {
            return Err(TransportError::Closed);
        }

        let frame = command.map(|c| format!("{}{}", c, self.write_terminator));
        let operation = command.unwrap_or("read").to_string();
        let terminator = self.read_terminator;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> TransportResult<String> {
            let instr = guard.as_ref().ok_or(TransportError::Closed)?;
            if let Some(frame) = frame {
                (&*instr)
                    .write_all(frame.as_bytes())
                    .map_err(|e| map_io_error(&operation, e, timeout))?;
            }
            let mut line = Vec::new();
            BufReader::new(instr)
                .read_until(terminator, &mut line)
                .map_err(|e| map_io_error(&operation, e, timeout))?;
            Ok(String::from_utf8_lossy(&line).trim().to_string())
        })
        .await
        .map_err(join_error)?
    }
}

#[async_trait]
impl MessageTransport for VisaTransport {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn write(&self, command: &str) -> TransportResult<()> {
        let guard = self.session.clone().lock_owned().await;
        if guard.is_none() {
            return Err(TransportError::Closed);
        }
        let frame = format!("{}{}", command, self.write_terminator);
        let operation = command.to_string();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || -> TransportResult<()> {
            let instr = guard.as_ref().ok_or(TransportError::Closed)?;
            (&*instr)
                .write_all(frame.as_bytes())
                .map_err(|e| map_io_error(&operation, e, timeout))
        })
        .await
        .map_err(join_error)??;
        debug!(resource = %self.resource, command, "sent");
        Ok(())
    }

    async fn query(&self, command: &str) -> TransportResult<String> {
        let response = self.exchange(Some(command)).await?;
        debug!(resource = %self.resource, command, response = %response, "received");
        Ok(response)
    }

    async fn read(&self) -> TransportResult<String> {
        self.exchange(None).await
    }

    async fn close(&self) -> TransportResult<()> {
        // Dropping the instrument closes the VISA session.
        if self.session.lock().await.take().is_some() {
            debug!(resource = %self.resource, "closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visa_rs::enums::status::ErrorCode;

    #[test]
    fn visa_timeout_maps_to_transport_timeout() {
        let err = std::io::Error::other(visa_rs::Error(ErrorCode::ErrorTmo));
        let mapped = map_io_error("*OPC?", err, Duration::from_millis(500));
        assert!(mapped.is_timeout(), "got {:?}", mapped);
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(
            map_io_error("*IDN?", err, Duration::from_millis(500)),
            TransportError::Io(_)
        ));
    }
}
