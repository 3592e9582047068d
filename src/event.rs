use std::fmt;

/// Connection state of a [`crate::ScaleSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Human readable session status, suitable for showing to a user as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Searching,
    Connected,
    Disconnected,
    /// No usable Bluetooth adapter
    Unsupported,
    /// A connection attempt failed
    Error(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Searching => write!(f, "Searching for device..."),
            Status::Connected => write!(f, "Connected"),
            Status::Disconnected => write!(f, "Disconnected"),
            Status::Unsupported => write!(f, "Bluetooth is not supported on this system."),
            Status::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Everything a session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleEvent {
    Status(Status),
    /// Name of the connected scale, `None` once disconnected
    Device(Option<String>),
    /// Latest weight in grams, `None` once disconnected
    Weight(Option<f64>),
    /// Latest battery charge in %, `None` once disconnected
    Battery(Option<u8>),
    /// Every notification as received, in lower case hex
    RawPacket(String),
    Log(String),
}
