// Session state: connection status, identity, channel bookkeeping, sync
// sequence, re-entrancy flag, and reconnect backoff.
//
// Pure data. Owned by the client task and mutated only from its handlers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Consecutive failed attempts after which automatic reconnects stop.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SessionState {
    connected: bool,
    client_id: Option<String>,
    active_channel: Option<String>,
    pending_file_join: Option<String>,
    synced_files: HashSet<String>,
    last_synced_sequence: u64,
    applying_remote_operation: bool,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    reconnect_base_delay: Duration,
    snapshot_timestamps: HashMap<String, f64>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE_DELAY, DEFAULT_MAX_RECONNECT_ATTEMPTS)
    }
}

impl SessionState {
    pub fn new(reconnect_base_delay: Duration, max_reconnect_attempts: u32) -> Self {
        Self {
            connected: false,
            client_id: None,
            active_channel: None,
            pending_file_join: None,
            synced_files: HashSet::new(),
            last_synced_sequence: 0,
            applying_remote_operation: false,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            reconnect_base_delay,
            snapshot_timestamps: HashMap::new(),
        }
    }

    // ── Connection ──────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Record the connection status.
    ///
    /// Connecting always resets the attempt counter. Disconnecting resets it
    /// only when leaving the connected state; a failed retry while already
    /// disconnected keeps counting toward the ceiling.
    pub fn set_connection_state(&mut self, connected: bool) {
        if connected || self.connected {
            self.reconnect_attempts = 0;
        }
        self.connected = connected;
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn set_client_id(&mut self, client_id: Option<String>) {
        self.client_id = client_id;
    }

    /// Connected with a relay-assigned identity.
    pub fn is_identified(&self) -> bool {
        self.connected && self.client_id.is_some()
    }

    // ── Channels ────────────────────────────────────────────────────

    pub fn active_channel(&self) -> Option<&str> {
        self.active_channel.as_deref()
    }

    pub fn set_active_channel(&mut self, channel: Option<String>) {
        self.active_channel = channel;
    }

    pub fn is_active_channel(&self, channel: &str) -> bool {
        self.active_channel.as_deref() == Some(channel)
    }

    pub fn pending_file_join(&self) -> Option<&str> {
        self.pending_file_join.as_deref()
    }

    pub fn set_pending_file_join(&mut self, channel: Option<String>) {
        self.pending_file_join = channel;
    }

    pub fn take_pending_file_join(&mut self) -> Option<String> {
        self.pending_file_join.take()
    }

    pub fn mark_file_synced(&mut self, channel: &str) {
        self.synced_files.insert(channel.to_string());
    }

    pub fn has_synced_file(&self, channel: &str) -> bool {
        self.synced_files.contains(channel)
    }

    pub fn synced_files(&self) -> &HashSet<String> {
        &self.synced_files
    }

    pub fn clear_synced_files(&mut self) {
        self.synced_files.clear();
    }

    // ── Sequence and snapshots ──────────────────────────────────────

    /// Raise the last synced sequence to `sequence`; lower values are ignored.
    pub fn update_last_synced_sequence(&mut self, sequence: u64) {
        if sequence > self.last_synced_sequence {
            self.last_synced_sequence = sequence;
        }
    }

    pub fn last_synced_sequence(&self) -> u64 {
        self.last_synced_sequence
    }

    pub fn last_snapshot_timestamp(&self, channel: &str) -> Option<f64> {
        self.snapshot_timestamps.get(channel).copied()
    }

    /// Remember the newest snapshot timestamp seen for `channel`.
    pub fn record_snapshot_timestamp(&mut self, channel: &str, timestamp: f64) {
        let entry = self.snapshot_timestamps.entry(channel.to_string()).or_insert(timestamp);
        if timestamp > *entry {
            *entry = timestamp;
        }
    }

    // ── Re-entrancy guard ───────────────────────────────────────────

    pub fn is_applying_remote_operation(&self) -> bool {
        self.applying_remote_operation
    }

    pub fn set_applying_remote_operation(&mut self, applying: bool) {
        self.applying_remote_operation = applying;
    }

    // ── Reconnect bookkeeping ───────────────────────────────────────

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn increment_reconnect_attempts(&mut self) -> u32 {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect_attempts
    }

    pub fn reset_reconnect_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    pub fn has_reached_max_reconnect_attempts(&self) -> bool {
        self.reconnect_attempts >= self.max_reconnect_attempts
    }

    /// Backoff before the next attempt: `base * 2^(attempts - 1)`.
    ///
    /// Not capped; the attempt ceiling stops retries instead. Saturates at the
    /// largest representable delay.
    pub fn reconnect_delay(&self) -> Duration {
        let exponent = self.reconnect_attempts.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        saturating_scale(self.reconnect_base_delay, factor)
    }
}

fn saturating_scale(base: Duration, factor: u64) -> Duration {
    let nanos = base.as_nanos().saturating_mul(u128::from(factor));
    if nanos > u128::from(u64::MAX) {
        Duration::from_secs(u64::MAX)
    } else {
        Duration::from_nanos(nanos as u64)
    }
}
