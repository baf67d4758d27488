//! Device identity and discovery event types.

/// Stable identifier of an attached device (the transport layer's UDID).
///
/// Kept as a plain `String`: identifiers arrive as opaque text on the
/// discovery channel and are only ever compared and logged.
pub type DeviceId = String;

/// An attach/detach event decoded from the discovery channel.
///
/// The byte-level encoding of these events is the discovery collaborator's
/// concern; the orchestrator only ever sees this decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A device became reachable and may be bridged.
    Attached { device_id: DeviceId },
    /// A device went away; its listener and bridged pairs must be torn down.
    Detached { device_id: DeviceId },
}

impl DeviceEvent {
    /// The device identifier this event refers to.
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Attached { device_id } | DeviceEvent::Detached { device_id } => device_id,
        }
    }
}
