//! The Bluetooth stack as seen by a [`crate::ScaleSession`].
//!
//! These traits mirror the GATT steps the session walks through: pick a device, connect to it,
//! open the scale service, open the characteristic, subscribe to it and write to it.
//! [`BluestTransport`] implements them on top of the platform Bluetooth stack.

use std::future::Future;

use bluest::Uuid;
use tokio::sync::mpsc;

use crate::config::DeviceFilter;

mod bluest_transport;

pub use bluest_transport::{BluestDevice, BluestLink, BluestService, BluestTransport};

pub trait ScaleTransport: Send + Sync + 'static {
    type Device: ScaleDevice;

    /// Whether this system has a usable Bluetooth adapter.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Find a device matching `filter`.
    fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> impl Future<Output = anyhow::Result<Self::Device>> + Send;
}

pub trait ScaleDevice: Clone + Send + Sync + 'static {
    type Service: ScaleService<Link = Self::Link>;
    type Link: ScaleLink;

    fn name(&self) -> Option<String>;

    /// Open the GATT connection.
    fn connect(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn service(&self, uuid: Uuid) -> impl Future<Output = anyhow::Result<Self::Service>> + Send;

    /// Close the GATT connection.
    fn disconnect(&self) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Resolves when the device drops the connection.
    fn disconnected(&self) -> impl Future<Output = ()> + Send;
}

pub trait ScaleService: Send + Sync + 'static {
    type Link: ScaleLink;

    fn characteristic(&self, uuid: Uuid) -> impl Future<Output = anyhow::Result<Self::Link>> + Send;
}

/// A characteristic the session both listens to and writes to.
pub trait ScaleLink: Clone + Send + Sync + 'static {
    /// Enable notifications. Each notification's value is delivered on the returned channel, in
    /// the order received.
    fn subscribe(
        &self,
    ) -> impl Future<Output = anyhow::Result<mpsc::UnboundedReceiver<Vec<u8>>>> + Send;

    /// Write a frame, without response where the characteristic allows it.
    fn write(&self, data: &[u8]) -> impl Future<Output = anyhow::Result<()>> + Send;
}
