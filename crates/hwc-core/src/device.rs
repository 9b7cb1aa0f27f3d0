//! Base device trait.

use crate::error::DeviceResult;
use async_trait::async_trait;

/// Anything hwcomms can talk to.
///
/// Every capability trait in [`crate::capabilities`] extends this one, so a
/// `Arc<dyn LinearMotor>` can still be identified and closed.
#[async_trait]
pub trait Device: Send + Sync {
    /// An identifying string for the device (`*IDN?` reply, serial number, ...).
    async fn identify(&self) -> DeviceResult<String>;

    /// Release the underlying channel so no process is left holding it.
    async fn close(&self) -> DeviceResult<()>;
}
