use thiserror::Error;

/// Why a connection attempt failed.
///
/// Transport failures are carried as the `anyhow::Error` the backend returned and are part of
/// the message, so the status shown to a user names the underlying reason.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Bluetooth is not supported on this system")]
    Unsupported,

    #[error("no device selected: {0}")]
    DeviceSelection(anyhow::Error),

    #[error("GATT connection failed: {0}")]
    Gatt(anyhow::Error),

    #[error("scale service not found: {0}")]
    ServiceNotFound(anyhow::Error),

    #[error("scale characteristic not found: {0}")]
    CharacteristicNotFound(anyhow::Error),

    #[error("failed to enable notifications: {0}")]
    Subscribe(anyhow::Error),

    /// The session was disconnected while the attempt was still in progress.
    #[error("connection attempt cancelled")]
    Cancelled,
}

#[test]
fn test_reason_printed_once_in_error_chain() {
    let err = SessionError::Gatt(anyhow::anyhow!("link lost"));
    assert_eq!(err.to_string(), "GATT connection failed: link lost");

    let chain = format!("{:#}", anyhow::Error::from(err));
    assert_eq!(chain.matches("link lost").count(), 1);
}
