//! Single-outstanding permission requests.
//!
//! The gate never sends anything itself. It hands back the response frame
//! that must go out, and a request only stops being pending once its owner
//! confirms the frame was sent with [`PermissionGate::mark_answered`].

use conduit_protocol::{OutboundMessage, PermissionRequest};
use tracing::{debug, info};

use crate::error::PermissionError;

/// What to do with an incoming permission request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Auto-approve policy: send `response` and never surface the request.
    AutoApproved { response: OutboundMessage },
    /// The request is now pending. A request it replaced must be denied with
    /// `superseded_response` so the server is not left waiting on it.
    Surfaced {
        superseded: Option<PermissionRequest>,
        superseded_response: Option<OutboundMessage>,
    },
}

#[derive(Debug, Default)]
pub struct PermissionGate {
    auto_approve: bool,
    pending: Option<PermissionRequest>,
}

impl PermissionGate {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            pending: None,
        }
    }

    pub fn pending(&self) -> Option<&PermissionRequest> {
        self.pending.as_ref()
    }

    pub fn on_request(&mut self, request: PermissionRequest) -> GateOutcome {
        if self.auto_approve {
            info!(id = %request.id, action = %request.action, "permission auto-approved");
            return GateOutcome::AutoApproved {
                response: OutboundMessage::permission_response(request.id, true),
            };
        }

        let superseded = self.pending.replace(request);
        if let Some(previous) = &superseded {
            debug!(id = %previous.id, "pending permission replaced; denying it");
        }
        let superseded_response = superseded
            .as_ref()
            .map(|previous| OutboundMessage::permission_response(previous.id.clone(), false));

        GateOutcome::Surfaced {
            superseded,
            superseded_response,
        }
    }

    /// Builds the response frame for the pending request `id`. The request
    /// stays pending until [`Self::mark_answered`].
    pub fn response_for(&self, id: &str, granted: bool) -> Result<OutboundMessage, PermissionError> {
        match &self.pending {
            None => Err(PermissionError::NonePending { id: id.to_string() }),
            Some(pending) if pending.id != id => Err(PermissionError::UnknownId {
                id: id.to_string(),
                pending: pending.id.clone(),
            }),
            Some(pending) => Ok(OutboundMessage::permission_response(
                pending.id.clone(),
                granted,
            )),
        }
    }

    /// Clears the pending request once its response has been sent.
    pub fn mark_answered(&mut self, id: &str) -> Option<PermissionRequest> {
        if self.pending.as_ref().is_some_and(|pending| pending.id == id) {
            return self.pending.take();
        }
        None
    }

    /// Drops the pending request without answering it.
    pub fn clear(&mut self) -> Option<PermissionRequest> {
        self.pending.take()
    }
}
