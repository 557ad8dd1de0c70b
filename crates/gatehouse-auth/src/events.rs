//! Lifecycle event sink.
//!
//! The engine announces lifecycle moments (a session disappearing, a CIBA
//! request reaching a terminal state) through this seam. The default sink
//! logs; server wiring may substitute anything. Sink failures are the
//! caller's to log and swallow, never to propagate.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::ciba::CibaStatus;

/// Receives engine lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// A durable session was removed by the expiration sweep.
    async fn session_gone(&self, session_id: &str);

    /// A CIBA authentication request reached a terminal status.
    async fn ciba_outcome(&self, auth_req_id: &str, status: CibaStatus);
}

/// Shared trait object for event delivery.
pub type DynEventSink = Arc<dyn EventSink>;

/// Default sink: structured log lines, nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn session_gone(&self, session_id: &str) {
        info!(session_id = %session_id, "session gone");
    }

    async fn ciba_outcome(&self, auth_req_id: &str, status: CibaStatus) {
        info!(auth_req_id = %auth_req_id, status = %status, "backchannel request resolved");
    }
}
