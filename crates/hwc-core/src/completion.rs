//! Operation-completion synchronizer.
//!
//! Instruments such as optical spectrum analyzers start a sweep on a trigger
//! command and finish it asynchronously, seconds or minutes later. This module
//! waits for that completion by polling the standard `*OPC?` query.
//!
//! # Protocol
//!
//! Each iteration:
//! 1. pause for the poll interval (50 ms in production),
//! 2. send `*OPC?`,
//! 3. parse the first `;`-separated field of the reply as an integer;
//!    non-zero means complete.
//!
//! A [`TransportError::Timeout`] from step 2 is swallowed and the loop
//! continues: a long sweep can legitimately outlast the transport's read
//! timeout. Any other error, including an unparseable reply, ends the wait and
//! is returned unchanged.
//!
//! # Cancellation
//!
//! There is no built-in deadline. Wrap the future in `tokio::time::timeout` or
//! drop it to stop waiting; closing the transport turns the next poll into a
//! fatal [`TransportError::Closed`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hwc_core::completion::{wait_until_complete, DEFAULT_POLL_INTERVAL};
//!
//! transport.write(":INITiate:IMMediate").await?;
//! wait_until_complete(&transport, DEFAULT_POLL_INTERVAL).await?;
//! ```

use crate::error::{TransportError, TransportResult};
use crate::transport::MessageTransport;
use async_trait::async_trait;
use std::time::Duration;
use tracing::instrument;

/// Standard IEEE 488.2 operation-complete query.
pub const OPERATION_COMPLETE_QUERY: &str = "*OPC?";

/// Production interval between completion polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Pause
// =============================================================================

/// Suspends the caller between polls.
///
/// Production code uses [`TokioPause`]. Tests can inject an implementation
/// that records the requested durations.
#[async_trait]
pub trait Pause: Send + Sync {
    /// Wait for `duration`.
    async fn pause(&self, duration: Duration);
}

/// [`Pause`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

#[async_trait]
impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// CompletionWaiter
// =============================================================================

/// Polls `*OPC?` until the instrument reports completion.
#[derive(Debug, Clone)]
pub struct CompletionWaiter<P = TokioPause> {
    poll_interval: Duration,
    pause: P,
}

impl CompletionWaiter<TokioPause> {
    /// Waiter that sleeps `poll_interval` between polls.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            pause: TokioPause,
        }
    }
}

impl Default for CompletionWaiter<TokioPause> {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl<P: Pause> CompletionWaiter<P> {
    /// Waiter with a custom pause implementation.
    pub fn with_pause(poll_interval: Duration, pause: P) -> Self {
        Self {
            poll_interval,
            pause,
        }
    }

    /// Configured interval between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Block the calling task until the instrument reports completion.
    ///
    /// The triggering command must already have been sent.
    ///
    /// # Errors
    ///
    /// Any non-timeout transport error, or a reply that is not an integer.
    #[instrument(level = "debug", skip_all, fields(resource = transport.resource()))]
    pub async fn wait<T>(&self, transport: &T) -> TransportResult<()>
    where
        T: MessageTransport + ?Sized,
    {
        let mut polls: u64 = 0;
        loop {
            self.pause.pause(self.poll_interval).await;
            polls += 1;

            match transport.query(OPERATION_COMPLETE_QUERY).await {
                Ok(response) => {
                    if parse_completion_flag(&response)? {
                        tracing::debug!(polls, "operation complete");
                        return Ok(());
                    }
                }
                Err(e) if e.is_timeout() => {
                    tracing::trace!(polls, "completion poll timed out, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wait for completion using `tokio::time::sleep` between polls.
///
/// See [`CompletionWaiter::wait`].
pub async fn wait_until_complete<T>(transport: &T, poll_interval: Duration) -> TransportResult<()>
where
    T: MessageTransport + ?Sized,
{
    CompletionWaiter::new(poll_interval).wait(transport).await
}

/// Interpret an `*OPC?` reply. Only the first `;`-separated field counts.
pub fn parse_completion_flag(response: &str) -> TransportResult<bool> {
    let first = response.split(';').next().unwrap_or_default().trim();
    first
        .parse::<i64>()
        .map(|flag| flag != 0)
        .map_err(|e| {
            TransportError::malformed(OPERATION_COMPLETE_QUERY, response, e.to_string())
        })
}
