//! Per-process session cache.
//!
//! One worker process owns exactly one of these, created empty at
//! startup and torn down with a best-effort disconnect at exit. It is
//! never shared across processes; siblings coordinate only through the
//! artifacts in [`crate::coordination`].

use crate::client::{AfpClient, ServerId, VolumeId};
use crate::target::Target;

/// Observable phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session.
    Idle,
    /// Server session only.
    Connected,
    /// Server session plus volume attachment.
    Attached,
}

/// Cached server session and volume attachment.
#[derive(Debug, Default)]
pub struct SessionState {
    pub connected_server: Option<String>,
    pub server: Option<ServerId>,
    pub attached_volume: Option<String>,
    pub volume: Option<VolumeId>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        match (self.server, self.volume) {
            (Some(_), Some(_)) => SessionPhase::Attached,
            (Some(_), None) => SessionPhase::Connected,
            _ => SessionPhase::Idle,
        }
    }

    /// Cached handle if connected to exactly this server.
    pub fn server_for(&self, server: &str) -> Option<ServerId> {
        match (&self.connected_server, self.server) {
            (Some(cached), Some(id)) if cached == server => Some(id),
            _ => None,
        }
    }

    /// Cached handle if attached to exactly this volume.
    pub fn volume_for(&self, volume: &str) -> Option<VolumeId> {
        match (&self.attached_volume, self.volume) {
            (Some(cached), Some(id)) if cached == volume => Some(id),
            _ => None,
        }
    }

    /// Record a fresh server session. Any previous attachment is gone
    /// with the previous session.
    pub fn set_server(&mut self, target: &Target, id: ServerId) {
        self.connected_server = Some(target.server.clone());
        self.server = Some(id);
        self.attached_volume = None;
        self.volume = None;
        self.username = target.username.clone();
        self.password = target.password.clone();
    }

    pub fn set_volume(&mut self, volume: &str, id: VolumeId) {
        self.attached_volume = Some(volume.to_string());
        self.volume = Some(id);
    }

    /// Forget the volume portion only. No detach call is issued: the
    /// attachment is daemon-owned and may be shared with sibling
    /// workers, so blind detachment could corrupt their sessions.
    pub fn clear_volume(&mut self) {
        if let Some(vol) = self.attached_volume.take() {
            tracing::debug!(volume = %vol, "dropping cached volume attachment");
        }
        self.volume = None;
    }

    /// Clear everything, attempting a best-effort disconnect first.
    /// No credentials or handles survive this.
    pub fn clear_all<C: AfpClient>(&mut self, client: &mut C) {
        if let Some(id) = self.server {
            let code = client.disconnect(id);
            tracing::debug!(
                server = self.connected_server.as_deref().unwrap_or("?"),
                ?code,
                "disconnected cached server session"
            );
        }
        *self = Self::default();
    }

    /// Copy cached credentials into a target that lacks them, so calls
    /// after a session-reuse hit still carry usable credentials.
    pub fn fill_credentials(&self, target: &mut Target) {
        if target.username.is_none() {
            target.username = self.username.clone();
        }
        if target.password.is_none() {
            target.password = self.password.clone();
        }
    }
}
