use anyhow::anyhow;
use bluest::Adapter;
use bluest::AdvertisingDevice;
use bluest::Characteristic;
use bluest::ConnectionEvent;
use bluest::Device;
use bluest::Service;
use bluest::Uuid;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio::time::Duration;

use super::{ScaleDevice, ScaleLink, ScaleService, ScaleTransport};
use crate::config::{DeviceFilter, ScaleConfig};

/// Talks to scales through the platform Bluetooth stack.
pub struct BluestTransport {
    adapter: Option<Adapter>,
    scan_timeout: Duration,
}

impl BluestTransport {
    /// Look up the default adapter. A system without one yields a transport that reports itself
    /// unavailable.
    pub async fn new(config: &ScaleConfig) -> Self {
        Self {
            adapter: Adapter::default().await,
            scan_timeout: config.scan_timeout,
        }
    }

    async fn discover_device(
        filter: &DeviceFilter,
        adapter: &Adapter,
    ) -> anyhow::Result<AdvertisingDevice> {
        adapter.wait_available().await?;

        // Scales do not reliably advertise their service, so scan everything and match by name
        let mut adapter_events = adapter.scan(&[]).await?;
        while let Some(device) = adapter_events.next().await {
            let device_name = match device.adv_data.local_name.clone() {
                Some(name) => name,
                None => match device.device.name_async().await {
                    Ok(name) => name,
                    Err(_) => continue,
                },
            };
            if filter.matches(&device_name) {
                tracing::debug!(name = %device_name, "found scale");
                return Ok(device);
            }
        }

        Err(anyhow!("Device not found"))
    }
}

impl ScaleTransport for BluestTransport {
    type Device = BluestDevice;

    async fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    async fn request_device(&self, filter: &DeviceFilter) -> anyhow::Result<BluestDevice> {
        let adapter = self
            .adapter
            .clone()
            .ok_or(anyhow!("Default adapter not found"))?;

        let device = timeout(self.scan_timeout, Self::discover_device(filter, &adapter))
            .await
            .map_err(|_| anyhow!("Device not found"))??;

        Ok(BluestDevice { adapter, device: device.device })
    }
}

#[derive(Clone)]
pub struct BluestDevice {
    adapter: Adapter,
    device: Device,
}

impl ScaleDevice for BluestDevice {
    type Service = BluestService;
    type Link = BluestLink;

    fn name(&self) -> Option<String> {
        self.device.name().ok()
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.adapter.connect_device(&self.device).await?;
        Ok(())
    }

    async fn service(&self, uuid: Uuid) -> anyhow::Result<BluestService> {
        let service = self
            .device
            .discover_services_with_uuid(uuid)
            .await?
            .first()
            .ok_or(anyhow!("The device does not support the service {uuid}."))?
            .clone();
        Ok(BluestService(service))
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    async fn disconnected(&self) {
        match self.adapter.device_connection_events(&self.device).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if matches!(event, ConnectionEvent::Disconnected) {
                        return;
                    }
                }
            }
            Err(err) => tracing::warn!(%err, "connection events unavailable"),
        }

        // Without connection events only an explicit disconnect ends the session
        std::future::pending::<()>().await
    }
}

pub struct BluestService(Service);

impl ScaleService for BluestService {
    type Link = BluestLink;

    async fn characteristic(&self, uuid: Uuid) -> anyhow::Result<BluestLink> {
        let characteristic = self
            .0
            .discover_characteristics_with_uuid(uuid)
            .await?
            .first()
            .ok_or(anyhow!("The device does not support the characteristic {uuid}."))?
            .clone();
        Ok(BluestLink { characteristic })
    }
}

#[derive(Clone)]
pub struct BluestLink {
    characteristic: Characteristic,
}

impl ScaleLink for BluestLink {
    async fn subscribe(&self) -> anyhow::Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let characteristic = self.characteristic.clone();

        // The notification stream borrows the characteristic, so it lives in its own task and is
        // forwarded until the session drops the receiver or the device goes away.
        tokio::spawn(async move {
            let mut reader = match characteristic.notify().await {
                Ok(reader) => {
                    let _ = ready_tx.send(Ok(()));
                    reader
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };

            while let Some(notification) = reader.next().await {
                match notification {
                    Ok(data) => {
                        if tx.send(data).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, "notification error");
                        break;
                    }
                }
            }
            tracing::debug!("end of notification stream");
        });

        ready_rx
            .await
            .map_err(|_| anyhow!("notification task ended before subscribing"))??;
        Ok(rx)
    }

    async fn write(&self, data: &[u8]) -> anyhow::Result<()> {
        if let Err(err) = self.characteristic.write_without_response(data).await {
            tracing::debug!(%err, "write without response failed, retrying with response");
            self.characteristic.write(data).await?;
        }
        Ok(())
    }
}
