//! Batching accumulator for streamed tokens.
//!
//! Providers emit tokens far faster than a UI needs to repaint. The buffer
//! collects them and reports when a flush is due: either enough text has
//! built up *and* enough time has passed since the previous flush, or the
//! oldest unflushed text has waited past the idle bound.
//!
//! The buffer performs no I/O; callers pass the current instant.

use tokio::time::Instant;

use crate::config::StreamBufferConfig;

#[derive(Debug)]
pub struct StreamBuffer {
    config: StreamBufferConfig,
    pending: String,
    pending_chars: usize,
    last_flush: Instant,
    /// When the oldest unflushed chunk arrived.
    pending_since: Option<Instant>,
}

impl StreamBuffer {
    pub fn new(config: StreamBufferConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    pub fn starting_at(config: StreamBufferConfig, now: Instant) -> Self {
        Self {
            config,
            pending: String::new(),
            pending_chars: 0,
            last_flush: now,
            pending_since: None,
        }
    }

    pub fn add(&mut self, chunk: &str) {
        self.add_at(chunk, Instant::now());
    }

    pub fn add_at(&mut self, chunk: &str, now: Instant) {
        if chunk.is_empty() {
            return;
        }
        if self.pending_since.is_none() {
            self.pending_since = Some(now);
        }
        self.pending.push_str(chunk);
        self.pending_chars += chunk.chars().count();
    }

    pub fn should_flush(&self) -> bool {
        self.should_flush_at(Instant::now())
    }

    pub fn should_flush_at(&self, now: Instant) -> bool {
        let Some(since) = self.pending_since else {
            return false;
        };
        if now.saturating_duration_since(since) >= self.config.max_wait {
            return true;
        }
        self.pending_chars >= self.config.min_chars
            && now.saturating_duration_since(self.last_flush) >= self.config.min_interval
    }

    /// Earliest instant at which [`should_flush_at`](Self::should_flush_at)
    /// becomes true without further input, or `None` when empty.
    pub fn next_deadline(&self) -> Option<Instant> {
        let since = self.pending_since?;
        let idle = since + self.config.max_wait;
        if self.pending_chars >= self.config.min_chars {
            Some(idle.min(self.last_flush + self.config.min_interval))
        } else {
            Some(idle)
        }
    }

    /// Take the buffered text and restart the flush clock.
    pub fn flush(&mut self) -> String {
        self.flush_at(Instant::now())
    }

    pub fn flush_at(&mut self, now: Instant) -> String {
        self.last_flush = now;
        self.pending_since = None;
        self.pending_chars = 0;
        std::mem::take(&mut self.pending)
    }

    /// Everything not yet flushed, regardless of thresholds.
    pub fn force_flush(&mut self) -> String {
        self.flush()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending_chars
    }
}
