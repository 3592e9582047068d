use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluest::Uuid;
use tokio::sync::mpsc;

use crate::config::ScaleConfig;
use crate::decoder::FrameDecoder;
use crate::error::SessionError;
use crate::event::{ScaleEvent, SessionState, Status};
use crate::packet::{to_hex, Command};
use crate::timer::TimerSet;
use crate::transport::{ScaleDevice, ScaleLink, ScaleService, ScaleTransport};

type DeviceOf<T> = <T as ScaleTransport>::Device;

/// A connection to one scale.
///
/// Everything the session observes is reported on the event channel returned by
/// [`ScaleSession::new`]: status changes, weight and battery updates, raw notifications and log
/// lines. Commands never fail from the caller's point of view; problems show up as log events.
pub struct ScaleSession<T: ScaleTransport> {
    transport: T,
    config: ScaleConfig,
    core: Arc<Core<DeviceOf<T>>>,
}

impl<T: ScaleTransport> ScaleSession<T> {
    pub fn new(transport: T, config: ScaleConfig) -> (Self, mpsc::UnboundedReceiver<ScaleEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let core = Arc::new(Core {
            shared: Mutex::new(Shared::default()),
            events,
            characteristic: config.characteristic_uuid,
        });
        (Self { transport, config, core }, rx)
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    /// Last weight received in this connection.
    pub fn weight(&self) -> Option<f64> {
        self.core.lock().weight
    }

    /// Last battery level received in this connection.
    pub fn battery(&self) -> Option<u8> {
        self.core.lock().battery
    }

    pub fn device_name(&self) -> Option<String> {
        self.core.lock().device_name.clone()
    }

    /// Find a scale, connect to it and start the handshake.
    ///
    /// The failure is also published as a [`Status`] event, so callers that only watch events
    /// may ignore the returned error.
    pub async fn connect(&self) -> Result<(), SessionError> {
        if !self.transport.is_available().await {
            self.core.emit(ScaleEvent::Status(Status::Unsupported));
            self.core.log("Connection skipped: Bluetooth is not supported.");
            return Err(SessionError::Unsupported);
        }

        let attempt = {
            let mut shared = self.core.lock();
            if shared.state != SessionState::Disconnected {
                drop(shared);
                self.core.log("Connect skipped: session already active.");
                return Ok(());
            }
            shared.state = SessionState::Connecting;
            shared.attempt += 1;
            shared.decoder.reset();
            shared.attempt
        };
        self.core.emit(ScaleEvent::Status(Status::Searching));
        self.core.log("Starting connection...");

        let mut opened = None;
        let result = self.establish(attempt, &mut opened).await;
        if let Err(err) = &result {
            if let Some(device) = opened {
                if let Err(close_err) = device.disconnect().await {
                    tracing::debug!(%close_err, "failed to close abandoned device");
                }
            }
            // A cancelled attempt was already torn down by whoever cancelled it
            if self.core.abandon(attempt) {
                self.core.emit(ScaleEvent::Status(Status::Error(err.to_string())));
                self.core.warn(format!("Connection error: {err}"));
            }
        }
        result
    }

    async fn establish(
        &self,
        attempt: u64,
        opened: &mut Option<DeviceOf<T>>,
    ) -> Result<(), SessionError> {
        let device = self
            .transport
            .request_device(&self.config.device_filter())
            .await
            .map_err(SessionError::DeviceSelection)?;
        *opened = Some(device.clone());
        let name = device
            .name()
            .unwrap_or_else(|| self.config.default_device_name.clone());
        self.core.log(format!("Selected device: {name}"));
        self.core.ensure_current(attempt)?;

        device.connect().await.map_err(SessionError::Gatt)?;
        self.core.log("GATT connected.");
        self.core.ensure_current(attempt)?;

        let service = device
            .service(self.config.service_uuid)
            .await
            .map_err(SessionError::ServiceNotFound)?;
        self.core.log(format!("Service found: {}", self.config.service_uuid));

        let link = service
            .characteristic(self.config.characteristic_uuid)
            .await
            .map_err(SessionError::CharacteristicNotFound)?;
        let notifications = link.subscribe().await.map_err(SessionError::Subscribe)?;
        self.core.log(format!(
            "Notifications enabled for {}.",
            self.config.characteristic_uuid
        ));

        self.core
            .activate(attempt, device, link, name, notifications, &self.config)
    }

    /// Close the connection, if any, and clear everything learned from it.
    pub async fn disconnect(&self) {
        self.core.log("Disconnect requested by user...");
        // Stop the connection tasks first so closing the link is not mistaken for the device
        // dropping it
        let device = {
            let mut shared = self.core.lock();
            shared.timers.cancel_all();
            shared.device.clone()
        };
        if let Some(device) = device {
            if let Err(err) = device.disconnect().await {
                self.core.warn(format!("Disconnect error: {err}"));
            }
        }
        self.core.teardown();
    }

    pub async fn tare(&self) {
        self.command(Command::Tare).await
    }

    pub async fn start_timer(&self) {
        self.command(Command::StartTimer).await
    }

    pub async fn stop_timer(&self) {
        self.command(Command::StopTimer).await
    }

    pub async fn reset_timer(&self) {
        self.command(Command::ResetTimer).await
    }

    async fn command(&self, command: Command) {
        if self.core.active_link().is_none() {
            self.core.log(format!(
                "{} skipped: no active connection.",
                command.action()
            ));
            return;
        }
        if let Err(err) = self.core.send(command).await {
            self.core.warn(format!("{} error: {err}", command.action()));
        }
    }
}

impl<T: ScaleTransport> Drop for ScaleSession<T> {
    fn drop(&mut self) {
        // The connection tasks hold the core alive, stop them so it can be freed
        self.core.lock().timers.cancel_all();
    }
}

/// The part of a session shared with its background tasks.
struct Core<D: ScaleDevice> {
    shared: Mutex<Shared<D>>,
    events: mpsc::UnboundedSender<ScaleEvent>,
    characteristic: Uuid,
}

struct Shared<D: ScaleDevice> {
    state: SessionState,
    /// Incremented by every connection attempt, so a stale attempt can tell it was superseded
    attempt: u64,
    device: Option<D>,
    link: Option<D::Link>,
    device_name: Option<String>,
    weight: Option<f64>,
    battery: Option<u8>,
    decoder: FrameDecoder,
    timers: TimerSet,
}

impl<D: ScaleDevice> Default for Shared<D> {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            attempt: 0,
            device: None,
            link: None,
            device_name: None,
            weight: None,
            battery: None,
            decoder: FrameDecoder::new(),
            timers: TimerSet::default(),
        }
    }
}

impl<D: ScaleDevice> Shared<D> {
    fn clear(&mut self) {
        self.state = SessionState::Disconnected;
        self.timers.cancel_all();
        self.device = None;
        self.link = None;
        self.device_name = None;
        self.weight = None;
        self.battery = None;
        self.decoder.reset();
    }
}

impl<D: ScaleDevice> Core<D> {
    fn lock(&self) -> MutexGuard<'_, Shared<D>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ScaleEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.emit(ScaleEvent::Log(message));
    }

    fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.emit(ScaleEvent::Log(message));
    }

    fn ensure_current(&self, attempt: u64) -> Result<(), SessionError> {
        let shared = self.lock();
        if shared.attempt == attempt && shared.state == SessionState::Connecting {
            Ok(())
        } else {
            Err(SessionError::Cancelled)
        }
    }

    /// Give up on `attempt`. Returns false when it had already been cancelled or superseded.
    fn abandon(&self, attempt: u64) -> bool {
        let mut shared = self.lock();
        if shared.attempt == attempt && shared.state == SessionState::Connecting {
            shared.clear();
            true
        } else {
            false
        }
    }

    fn active_link(&self) -> Option<D::Link> {
        let shared = self.lock();
        match shared.state {
            SessionState::Connected => shared.link.clone(),
            _ => None,
        }
    }

    /// Write `command` if a link is active. Without one this is a no-op.
    async fn send(&self, command: Command) -> anyhow::Result<()> {
        let Some(link) = self.active_link() else {
            return Ok(());
        };
        link.write(&command.frame()).await?;
        self.log(format!("Write {command}"));
        Ok(())
    }

    /// Send from a timer: failures are logged and otherwise ignored.
    async fn send_in_background(&self, command: Command) {
        if let Err(err) = self.send(command).await {
            self.warn(format!("{} error: {err}", command.action()));
        }
    }

    fn handle_notification(&self, data: &[u8]) {
        let reading = {
            let mut shared = self.lock();
            if shared.state != SessionState::Connected {
                return;
            }
            let reading = shared.decoder.ingest(data);
            if let Some(reading) = reading {
                shared.weight = reading.weight.or(shared.weight);
                shared.battery = reading.battery.or(shared.battery);
            }
            reading
        };

        let hex = to_hex(data);
        tracing::trace!(%hex, "notify");
        self.emit(ScaleEvent::RawPacket(hex.clone()));
        self.emit(ScaleEvent::Log(format!("Notify {}: {hex}", self.characteristic)));

        if let Some(reading) = reading {
            if let Some(weight) = reading.weight {
                self.emit(ScaleEvent::Weight(Some(weight)));
            }
            if let Some(battery) = reading.battery {
                self.emit(ScaleEvent::Battery(Some(battery)));
            }
        }
    }

    /// Common end of every connection, whoever closed it. Does nothing when already
    /// disconnected.
    fn teardown(&self) {
        {
            let mut shared = self.lock();
            if shared.state == SessionState::Disconnected {
                return;
            }
            shared.clear();
        }
        self.log("Disconnected from device.");
        self.emit(ScaleEvent::Status(Status::Disconnected));
        self.emit(ScaleEvent::Device(None));
        self.emit(ScaleEvent::Weight(None));
        self.emit(ScaleEvent::Battery(None));
    }
}

impl<D: ScaleDevice> Core<D> {
    /// Finish `attempt`: mark the session connected and start the connection's tasks.
    fn activate(
        self: &Arc<Self>,
        attempt: u64,
        device: D,
        link: D::Link,
        name: String,
        mut notifications: mpsc::UnboundedReceiver<Vec<u8>>,
        config: &ScaleConfig,
    ) -> Result<(), SessionError> {
        {
            let mut shared = self.lock();
            if shared.attempt != attempt || shared.state != SessionState::Connecting {
                return Err(SessionError::Cancelled);
            }
            shared.state = SessionState::Connected;
            shared.device = Some(device.clone());
            shared.link = Some(link);
            shared.device_name = Some(name.clone());

            let core = Arc::clone(self);
            shared.timers.spawn(async move {
                while let Some(data) = notifications.recv().await {
                    core.handle_notification(&data);
                }
            });

            let core = Arc::clone(self);
            shared.timers.spawn(async move {
                device.disconnected().await;
                core.log("Connection closed by device.");
                core.teardown();
            });

            let handshake = [
                (config.heartbeat_delay, Command::Heartbeat),
                (config.identify_delay, Command::Identify),
                (config.configure_delay, Command::Configure),
            ];
            for (delay, command) in handshake {
                let core = Arc::clone(self);
                shared.timers.after(delay, async move {
                    core.send_in_background(command).await;
                });
            }

            let core = Arc::clone(self);
            shared.timers.every(config.keep_alive_interval, move || {
                let core = Arc::clone(&core);
                async move { core.send_in_background(Command::Heartbeat).await }
            });
        }

        self.emit(ScaleEvent::Device(Some(name)));
        self.emit(ScaleEvent::Status(Status::Connected));
        self.log("Status: connected.");
        Ok(())
    }
}
