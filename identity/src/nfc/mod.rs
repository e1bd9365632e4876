//! # NFC Tap Listening
//!
//! Waits for a physical tag and hands back its UID. The loop mirrors what
//! the tag-side firmware does: poll the reader every 100 ms, report a tag
//! once when it enters the field, ignore it while it stays there, and
//! re-arm when it leaves.
//!
//! Waiting is bounded. [`TapListener::wait_for_tap`] gives up after the
//! configured timeout with [`NfcError::Timeout`], which callers must not
//! confuse with a failed verification: nobody tapped, nothing was checked.
//!
//! Hardware sits behind the [`NfcReader`] trait. [`SimulatedReader`] plays
//! back a script of reader states for tests and the CLI.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, warn};

use crate::account::ChipUid;
use crate::config::{EngineConfig, DEFAULT_TAP_TIMEOUT, NFC_POLL_INTERVAL};

#[derive(Debug, Error)]
pub enum NfcError {
    /// No tag arrived in time. Not a verification failure.
    #[error("no NFC tap within {0:?}")]
    Timeout(Duration),

    #[error("NFC reader error: {0}")]
    Reader(String),
}

/// A polled NFC reader.
#[async_trait]
pub trait NfcReader: Send + Sync {
    /// Whether a tag is in the field right now.
    async fn tag_present(&self) -> Result<bool, NfcError>;

    /// UID of the tag in the field, if one could be read.
    async fn read_uid(&self) -> Result<Option<Vec<u8>>, NfcError>;
}

/// Polls a reader for taps, debouncing a tag that stays in the field.
pub struct TapListener<R> {
    reader: R,
    poll_interval: Duration,
    timeout: Duration,
    last_uid: Mutex<Option<ChipUid>>,
}

impl<R: NfcReader> TapListener<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            poll_interval: NFC_POLL_INTERVAL,
            timeout: DEFAULT_TAP_TIMEOUT,
            last_uid: Mutex::new(None),
        }
    }

    pub fn with_config(reader: R, config: &EngineConfig) -> Self {
        Self {
            reader,
            poll_interval: config.tap_poll_interval(),
            timeout: config.tap_timeout(),
            last_uid: Mutex::new(None),
        }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Wait for the next tap, up to the configured timeout.
    pub async fn wait_for_tap(&self) -> Result<ChipUid, NfcError> {
        self.wait_for_tap_within(self.timeout).await
    }

    /// Wait for the next tap, up to `limit`.
    ///
    /// Dropping the returned future cancels the wait cleanly.
    pub async fn wait_for_tap_within(&self, limit: Duration) -> Result<ChipUid, NfcError> {
        match timeout(limit, self.poll()).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_ms = limit.as_millis() as u64, "tap wait timed out");
                Err(NfcError::Timeout(limit))
            }
        }
    }

    async fn poll(&self) -> Result<ChipUid, NfcError> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if !self.reader.tag_present().await? {
                *self.last_uid.lock() = None;
                continue;
            }

            let Some(bytes) = self.reader.read_uid().await? else {
                continue;
            };

            let uid = match ChipUid::from_bytes(&bytes) {
                Ok(uid) => uid,
                Err(e) => {
                    warn!(error = %e, "unreadable tag UID, ignoring");
                    continue;
                }
            };

            let mut last = self.last_uid.lock();
            if last.as_ref() == Some(&uid) {
                continue;
            }
            *last = Some(uid.clone());
            debug!(chip_uid = %uid, "tap detected");
            return Ok(uid);
        }
    }
}

/// A scripted reader. Each poll consumes one frame: `Some(uid)` is a tag in
/// the field, `None` an empty field. Once the script runs out the field
/// stays empty.
#[derive(Debug, Default)]
pub struct SimulatedReader {
    frames: Mutex<VecDeque<Option<Vec<u8>>>>,
    current: Mutex<Option<Vec<u8>>>,
}

impl SimulatedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tag held in the field for `polls` polls, then removed.
    pub fn tap(&self, uid: &[u8], polls: usize) {
        let mut frames = self.frames.lock();
        for _ in 0..polls.max(1) {
            frames.push_back(Some(uid.to_vec()));
        }
        frames.push_back(None);
    }

    /// `polls` polls of an empty field.
    pub fn idle(&self, polls: usize) {
        let mut frames = self.frames.lock();
        for _ in 0..polls {
            frames.push_back(None);
        }
    }

    /// Frames not yet consumed.
    pub fn remaining(&self) -> usize {
        self.frames.lock().len()
    }
}

#[async_trait]
impl NfcReader for SimulatedReader {
    async fn tag_present(&self) -> Result<bool, NfcError> {
        let next = self.frames.lock().pop_front().flatten();
        let present = next.is_some();
        *self.current.lock() = next;
        Ok(present)
    }

    async fn read_uid(&self) -> Result<Option<Vec<u8>>, NfcError> {
        Ok(self.current.lock().clone())
    }
}
