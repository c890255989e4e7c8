// SPDX-License-Identifier: MIT

//! Streamed output channel
//!
//! A [`StepChannel`] is the engine's handle to one live client connection.
//! It wraps an unbounded mpsc sender whose receiving half is typically
//! mapped onto an SSE response by the server. `send` never blocks and never
//! fails the caller: once the channel is closed (explicitly, or because the
//! client went away), sends are logged and dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;

use super::envelope::Envelope;
use super::error::FlowError;

/// Clone-able handle to the push connection for one workflow run
#[derive(Debug, Clone)]
pub struct StepChannel {
    tx: mpsc::UnboundedSender<Envelope>,
    closed: Arc<AtomicBool>,
    /// Start instant of the current lifecycle segment, shared across clones
    segment_start: Arc<Mutex<Option<Instant>>>,
}

impl StepChannel {
    /// Open a channel, returning the handle and the receiving half
    pub fn open() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            segment_start: Arc::new(Mutex::new(None)),
        };
        (channel, rx)
    }

    /// Push one envelope to the client without lifecycle bookkeeping
    ///
    /// A send on a closed channel is a logged no-op; the workflow keeps
    /// running and later sends are dropped the same way.
    pub fn send(&self, envelope: Envelope) {
        if self.closed.load(Ordering::SeqCst) {
            log::warn!(
                "{}, dropping {:?} envelope for step '{}'",
                FlowError::ChannelClosed,
                envelope.status,
                envelope.step_name
            );
            return;
        }
        if self.tx.send(envelope).is_err() {
            // Receiver dropped: the client disconnected mid-run
            self.closed.store(true, Ordering::SeqCst);
            log::warn!("client connection gone: {}", FlowError::ChannelClosed);
        }
    }

    /// Push a lifecycle envelope, maintaining segment timing
    ///
    /// `start` records the segment start instant; terminal envelopes get
    /// `duration` stamped as elapsed seconds with two-decimal precision.
    /// `process` envelopes pass through untouched. Returns the envelope as
    /// sent, so callers can keep the stamped copy.
    pub fn send_lifecycle(&self, mut envelope: Envelope) -> Envelope {
        if envelope.status == super::envelope::StepStatus::Start {
            let mut segment = self.segment_start.lock().unwrap();
            *segment = Some(Instant::now());
        } else if envelope.status.is_terminal() {
            let segment = self.segment_start.lock().unwrap();
            if let Some(started) = *segment {
                let secs = started.elapsed().as_secs_f64();
                envelope.duration = Some((secs * 100.0).round() / 100.0);
            }
        }
        self.send(envelope.clone());
        envelope
    }

    /// Terminate the channel; all further sends are dropped
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
