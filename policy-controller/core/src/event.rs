use serde::Serialize;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceEventType {
    /// Something about the service changed that clients with access should re-read.
    Updated,
    DialAccessGained,
    DialAccessLost,
    BindAccessGained,
    BindAccessLost,
}

/// Describes a change in an identity's relationship to a service.
///
/// Events are accumulated while a transaction runs and are only dispatched once it commits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEvent {
    #[serde(rename = "type")]
    pub event_type: ServiceEventType,
    pub identity_id: String,
    pub service_id: String,
}

// === impl ServiceEventType ===

impl ServiceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "Updated",
            Self::DialAccessGained => "DialAccessGained",
            Self::DialAccessLost => "DialAccessLost",
            Self::BindAccessGained => "BindAccessGained",
            Self::BindAccessLost => "BindAccessLost",
        }
    }
}

impl fmt::Display for ServiceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

// === impl ServiceEvent ===

impl ServiceEvent {
    pub fn new(
        event_type: ServiceEventType,
        identity_id: impl ToString,
        service_id: impl ToString,
    ) -> Self {
        Self {
            event_type,
            identity_id: identity_id.to_string(),
            service_id: service_id.to_string(),
        }
    }
}
