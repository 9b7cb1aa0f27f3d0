//! Scripted message transport.
//!
//! [`ScriptedTransport`] answers each query from a per-command reply queue and
//! records every write and query in order, so tests can assert both what a
//! driver returned and exactly what it sent.
//!
//! Queue semantics: replies are consumed front to back, and the last reply of
//! a queue repeats forever. A query with no script fails with a fault.
//!
//! # Example
//!
//! ```rust,ignore
//! use hwc_driver_mock::{Reply, ScriptedTransport};
//!
//! let transport = ScriptedTransport::new()
//!     .with_replies("*OPC?", [Reply::text("0"), Reply::Timeout, Reply::text("1")])
//!     .with_reply("*IDN?", Reply::text("YOKOGAWA,AQ6370D,0,1.0"));
//! ```

use async_trait::async_trait;
use hwc_core::error::{TransportError, TransportResult};
use hwc_core::transport::MessageTransport;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// One scripted answer to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Respond with this text.
    Response(String),
    /// Fail with [`TransportError::Timeout`].
    Timeout,
    /// Fail with a fatal I/O error carrying this message.
    Fault(String),
}

impl Reply {
    /// Shorthand for [`Reply::Response`].
    pub fn text(response: impl Into<String>) -> Self {
        Self::Response(response.into())
    }

    /// Shorthand for [`Reply::Fault`].
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }

    fn into_result(self, command: &str) -> TransportResult<String> {
        match self {
            Reply::Response(text) => Ok(text),
            Reply::Timeout => Err(TransportError::timeout(command, Duration::ZERO)),
            Reply::Fault(message) => Err(TransportError::Io(std::io::Error::other(message))),
        }
    }
}

/// A recorded exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    Write(String),
    Query(String),
    Read,
}

impl Exchange {
    /// The command text, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            Exchange::Write(c) | Exchange::Query(c) => Some(c),
            Exchange::Read => None,
        }
    }
}

#[derive(Default)]
struct Script {
    replies: HashMap<String, VecDeque<Reply>>,
    reads: VecDeque<Reply>,
    log: Vec<Exchange>,
    closed: bool,
}

fn next_reply(queue: &mut VecDeque<Reply>) -> Option<Reply> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// In-memory [`MessageTransport`] driven by a reply script.
pub struct ScriptedTransport {
    resource: String,
    script: Mutex<Script>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Empty script.
    pub fn new() -> Self {
        Self {
            resource: "scripted".to_string(),
            script: Mutex::new(Script::default()),
        }
    }

    /// Change the reported resource address.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Append one reply for `command`.
    pub fn with_reply(self, command: &str, reply: Reply) -> Self {
        self.push_reply(command, reply);
        self
    }

    /// Append several replies for `command`.
    pub fn with_replies(self, command: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        for reply in replies {
            self.push_reply(command, reply);
        }
        self
    }

    /// Append one reply for `command` on a shared transport.
    pub fn push_reply(&self, command: &str, reply: Reply) {
        self.script
            .lock()
            .replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Append a reply for a bare [`MessageTransport::read`].
    pub fn push_read(&self, reply: Reply) {
        self.script.lock().reads.push_back(reply);
    }

    /// Everything sent so far, in order.
    pub fn log(&self) -> Vec<Exchange> {
        self.script.lock().log.clone()
    }

    /// Command text of every write and query, in order.
    pub fn commands(&self) -> Vec<String> {
        self.script
            .lock()
            .log
            .iter()
            .filter_map(|e| e.command().map(str::to_string))
            .collect()
    }

    /// Commands sent with `write`, in order.
    pub fn writes(&self) -> Vec<String> {
        self.script
            .lock()
            .log
            .iter()
            .filter_map(|e| match e {
                Exchange::Write(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// How many times `command` was queried.
    pub fn query_count(&self, command: &str) -> usize {
        self.script
            .lock()
            .log
            .iter()
            .filter(|e| matches!(e, Exchange::Query(c) if c == command))
            .count()
    }

    /// Forget the recorded log, keeping the script.
    pub fn clear_log(&self) {
        self.script.lock().log.clear();
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}

#[async_trait]
impl MessageTransport for ScriptedTransport {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn write(&self, command: &str) -> TransportResult<()> {
        let mut script = self.script.lock();
        if script.closed {
            return Err(TransportError::Closed);
        }
        script.log.push(Exchange::Write(command.to_string()));
        Ok(())
    }

    async fn query(&self, command: &str) -> TransportResult<String> {
        let reply = {
            let mut script = self.script.lock();
            if script.closed {
                return Err(TransportError::Closed);
            }
            script.log.push(Exchange::Query(command.to_string()));
            script.replies.get_mut(command).and_then(next_reply)
        };
        reply
            .unwrap_or_else(|| Reply::fault(format!("no reply scripted for '{}'", command)))
            .into_result(command)
    }

    async fn read(&self) -> TransportResult<String> {
        let reply = {
            let mut script = self.script.lock();
            if script.closed {
                return Err(TransportError::Closed);
            }
            script.log.push(Exchange::Read);
            next_reply(&mut script.reads)
        };
        reply
            .unwrap_or(Reply::Timeout)
            .into_result("read")
    }

    async fn close(&self) -> TransportResult<()> {
        self.script.lock().closed = true;
        Ok(())
    }
}
