use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use bluest::Uuid;
use lunarread::transport::{ScaleDevice, ScaleLink, ScaleService, ScaleTransport};
use lunarread::{
    Command, DeviceFilter, ScaleConfig, ScaleEvent, ScaleSession, SessionError, SessionState,
    Status,
};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Select,
    Connect,
    Service,
    Characteristic,
    Subscribe,
}

#[derive(Default)]
struct Options {
    unavailable: bool,
    fail_at: Option<Step>,
    connect_delay: Duration,
    anonymous: bool,
}

struct Scale {
    options: Options,
    fail_writes: AtomicBool,
    gatt_connected: watch::Sender<bool>,
    start: Instant,
    writes: Mutex<Vec<(Duration, Vec<u8>)>>,
    notifier: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

/// An in-memory scale that records every write with the time it happened.
#[derive(Clone)]
struct MockScale(Arc<Scale>);

impl MockScale {
    fn with(options: Options) -> Self {
        Self(Arc::new(Scale {
            options,
            fail_writes: AtomicBool::new(false),
            gatt_connected: watch::Sender::new(false),
            start: Instant::now(),
            writes: Mutex::new(Vec::new()),
            notifier: Mutex::new(None),
        }))
    }

    fn new() -> Self {
        Self::with(Options::default())
    }

    fn failing_at(step: Step) -> Self {
        Self::with(Options { fail_at: Some(step), ..Options::default() })
    }

    fn check(&self, step: Step) -> anyhow::Result<()> {
        if self.0.options.fail_at == Some(step) {
            return Err(anyhow!("{step:?} failed"));
        }
        Ok(())
    }

    fn writes(&self) -> Vec<(u128, Vec<u8>)> {
        self.0
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(|(at, frame)| (at.as_millis(), frame.clone()))
            .collect()
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().map(|(_, frame)| frame).collect()
    }

    fn fail_writes(&self) {
        self.0.fail_writes.store(true, Ordering::SeqCst);
    }

    fn is_gatt_connected(&self) -> bool {
        *self.0.gatt_connected.borrow()
    }

    fn notify(&self, data: &[u8]) {
        let notifier = self.0.notifier.lock().unwrap();
        notifier.as_ref().unwrap().send(data.to_vec()).unwrap();
    }

    fn drop_connection(&self) {
        self.0.gatt_connected.send_replace(false);
    }
}

impl ScaleTransport for MockScale {
    type Device = MockScale;

    async fn is_available(&self) -> bool {
        !self.0.options.unavailable
    }

    async fn request_device(&self, filter: &DeviceFilter) -> anyhow::Result<MockScale> {
        self.check(Step::Select)?;
        assert!(filter.matches("LUNAR-0A1B2C"));
        Ok(self.clone())
    }
}

impl ScaleDevice for MockScale {
    type Service = MockScale;
    type Link = MockScale;

    fn name(&self) -> Option<String> {
        if self.0.options.anonymous {
            return None;
        }
        Some("LUNAR-0A1B2C".to_string())
    }

    async fn connect(&self) -> anyhow::Result<()> {
        if !self.0.options.connect_delay.is_zero() {
            time::sleep(self.0.options.connect_delay).await;
        }
        self.check(Step::Connect)?;
        self.0.gatt_connected.send_replace(true);
        Ok(())
    }

    async fn service(&self, uuid: Uuid) -> anyhow::Result<MockScale> {
        assert_eq!(uuid, ScaleConfig::SERVICE_UUID);
        self.check(Step::Service)?;
        Ok(self.clone())
    }

    /// Like a real stack, closing the link also reports it through `disconnected`, and gives
    /// anything waiting on that a chance to run before returning.
    async fn disconnect(&self) -> anyhow::Result<()> {
        self.0.gatt_connected.send_replace(false);
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn disconnected(&self) {
        let mut connected = self.0.gatt_connected.subscribe();
        let _ = connected.wait_for(|connected| !connected).await;
    }
}

impl ScaleService for MockScale {
    type Link = MockScale;

    async fn characteristic(&self, uuid: Uuid) -> anyhow::Result<MockScale> {
        assert_eq!(uuid, ScaleConfig::CHARACTERISTIC_UUID);
        self.check(Step::Characteristic)?;
        Ok(self.clone())
    }
}

impl ScaleLink for MockScale {
    async fn subscribe(&self) -> anyhow::Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.check(Step::Subscribe)?;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.notifier.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write(&self, data: &[u8]) -> anyhow::Result<()> {
        if self.0.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("write failed"));
        }
        self.0
            .writes
            .lock()
            .unwrap()
            .push((self.0.start.elapsed(), data.to_vec()));
        Ok(())
    }
}

const WEIGHT_FRAME: [u8; 12] = [
    0xef, 0xdd, 0x0c, 0x07, 0x05, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
const BATTERY_FRAME: [u8; 6] = [0xef, 0xdd, 0x08, 0x01, 0x85, 0x00];

fn session(scale: &MockScale) -> (ScaleSession<MockScale>, mpsc::UnboundedReceiver<ScaleEvent>) {
    ScaleSession::new(scale.clone(), ScaleConfig::default())
}

/// Let the session's tasks process whatever is pending without moving the clock.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn drain(events: &mut mpsc::UnboundedReceiver<ScaleEvent>) -> Vec<ScaleEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn statuses(events: &[ScaleEvent]) -> Vec<Status> {
    events
        .iter()
        .filter_map(|event| match event {
            ScaleEvent::Status(status) => Some(status.clone()),
            _ => None,
        })
        .collect()
}

fn logs(events: &[ScaleEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            ScaleEvent::Log(line) => Some(line.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test(start_paused = true)]
async fn test_connect_reports_device_and_status() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();

    let events = drain(&mut events);
    assert_eq!(statuses(&events), vec![Status::Searching, Status::Connected]);
    assert!(events.contains(&ScaleEvent::Device(Some("LUNAR-0A1B2C".to_string()))));
    assert!(logs(&events).contains("GATT connected."));
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.device_name().as_deref(), Some("LUNAR-0A1B2C"));
    assert!(scale.is_gatt_connected());
}

#[tokio::test(start_paused = true)]
async fn test_handshake_then_keep_alive() {
    let scale = MockScale::new();
    let (session, _events) = session(&scale);

    session.connect().await.unwrap();
    time::sleep(Duration::from_millis(4100)).await;

    assert_eq!(
        scale.writes(),
        vec![
            (200, Command::Heartbeat.frame()),
            (500, Command::Identify.frame()),
            (1000, Command::Configure.frame()),
            (2000, Command::Heartbeat.frame()),
            (4000, Command::Heartbeat.frame()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_writes_and_clears_state() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    scale.notify(&WEIGHT_FRAME);
    scale.notify(&BATTERY_FRAME);
    settle().await;
    assert_eq!(session.weight(), Some(16.0));
    assert_eq!(session.battery(), Some(5));

    time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(scale.writes().len(), 4);
    drain(&mut events);

    session.disconnect().await;
    time::sleep(Duration::from_secs(10)).await;

    assert_eq!(scale.writes().len(), 4);
    assert!(!scale.is_gatt_connected());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.weight(), None);
    assert_eq!(session.battery(), None);
    assert_eq!(session.device_name(), None);

    let events = drain(&mut events);
    assert_eq!(statuses(&events), vec![Status::Disconnected]);
    assert!(events.contains(&ScaleEvent::Device(None)));
    assert!(events.contains(&ScaleEvent::Weight(None)));
    assert!(events.contains(&ScaleEvent::Battery(None)));
}

#[tokio::test(start_paused = true)]
async fn test_peer_disconnect_tears_down() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    drain(&mut events);

    scale.drop_connection();
    settle().await;

    assert_eq!(session.state(), SessionState::Disconnected);
    let events = drain(&mut events);
    assert_eq!(statuses(&events), vec![Status::Disconnected]);

    time::sleep(Duration::from_secs(5)).await;
    assert!(scale.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_twice_reports_once() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    session.disconnect().await;
    session.disconnect().await;

    let events = drain(&mut events);
    assert_eq!(
        statuses(&events),
        vec![Status::Searching, Status::Connected, Status::Disconnected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_notifications_publish_raw_and_decoded_values() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    drain(&mut events);

    scale.notify(&WEIGHT_FRAME[..4]);
    settle().await;
    let first = drain(&mut events);
    assert!(first.contains(&ScaleEvent::RawPacket("ef dd 0c 07".to_string())));
    assert!(!first.iter().any(|e| matches!(e, ScaleEvent::Weight(_))));

    scale.notify(&WEIGHT_FRAME[4..]);
    settle().await;
    let second = drain(&mut events);
    assert!(second.contains(&ScaleEvent::RawPacket("05 10 00 00 00 00 00 00".to_string())));
    assert!(second.contains(&ScaleEvent::Weight(Some(16.0))));
    assert!(!second.iter().any(|e| matches!(e, ScaleEvent::Battery(_))));

    scale.notify(&BATTERY_FRAME);
    settle().await;
    let third = drain(&mut events);
    assert!(third.contains(&ScaleEvent::Battery(Some(5))));
    assert!(!third.iter().any(|e| matches!(e, ScaleEvent::Weight(_))));
    assert_eq!(session.weight(), Some(16.0));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_does_not_reuse_buffered_bytes() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    scale.notify(&WEIGHT_FRAME[..6]);
    settle().await;
    session.disconnect().await;

    session.connect().await.unwrap();
    drain(&mut events);
    scale.notify(&WEIGHT_FRAME[6..]);
    settle().await;

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, ScaleEvent::RawPacket(_))));
    assert!(!events.iter().any(|e| matches!(e, ScaleEvent::Weight(_))));
    assert_eq!(session.weight(), None);
}

#[tokio::test(start_paused = true)]
async fn test_commands_write_frames_when_connected() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    session.tare().await;
    session.start_timer().await;
    session.stop_timer().await;
    session.reset_timer().await;

    assert_eq!(
        scale.frames(),
        vec![
            lunarread::encode_packet("04", "0000000000000000000000000000000000").unwrap(),
            lunarread::encode_packet("0D", "00000000").unwrap(),
            lunarread::encode_packet("0D", "00020002").unwrap(),
            lunarread::encode_packet("0D", "00010001").unwrap(),
        ]
    );
    let logs = logs(&drain(&mut events));
    assert!(logs.contains("Write 0D: 00020002"));
}

#[tokio::test(start_paused = true)]
async fn test_commands_skip_when_disconnected() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.tare().await;
    session.start_timer().await;
    session.stop_timer().await;
    session.reset_timer().await;

    assert!(scale.writes().is_empty());
    assert_eq!(session.state(), SessionState::Disconnected);
    let logs = logs(&drain(&mut events));
    assert!(logs.contains("Tare skipped: no active connection."));
    assert!(logs.contains("Timer start skipped: no active connection."));
    assert!(logs.contains("Timer stop skipped: no active connection."));
    assert!(logs.contains("Timer reset skipped: no active connection."));
}

#[tokio::test(start_paused = true)]
async fn test_command_write_failure_is_logged() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    scale.fail_writes();
    session.tare().await;

    assert_eq!(session.state(), SessionState::Connected);
    assert!(logs(&drain(&mut events)).contains("Tare error: write failed"));
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_failure_keeps_session() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    scale.fail_writes();
    time::sleep(Duration::from_millis(2100)).await;

    assert_eq!(session.state(), SessionState::Connected);
    let events = drain(&mut events);
    assert!(logs(&events).contains("Heartbeat error: write failed"));
    assert!(logs(&events).contains("Configure error: write failed"));
    assert_eq!(statuses(&events), vec![Status::Searching, Status::Connected]);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_platform() {
    let scale = MockScale::with(Options { unavailable: true, ..Options::default() });
    let (session, mut events) = session(&scale);

    let err = session.connect().await.unwrap_err();

    assert!(matches!(err, SessionError::Unsupported));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(statuses(&drain(&mut events)), vec![Status::Unsupported]);
    assert!(!scale.is_gatt_connected());
}

#[tokio::test(start_paused = true)]
async fn test_setup_failures_return_to_disconnected() {
    let steps = [
        Step::Select,
        Step::Connect,
        Step::Service,
        Step::Characteristic,
        Step::Subscribe,
    ];
    for step in steps {
        let scale = MockScale::failing_at(step);
        let (session, mut events) = session(&scale);

        let err = session.connect().await.unwrap_err();
        let expected = match step {
            Step::Select => matches!(err, SessionError::DeviceSelection(_)),
            Step::Connect => matches!(err, SessionError::Gatt(_)),
            Step::Service => matches!(err, SessionError::ServiceNotFound(_)),
            Step::Characteristic => matches!(err, SessionError::CharacteristicNotFound(_)),
            Step::Subscribe => matches!(err, SessionError::Subscribe(_)),
        };
        assert!(expected, "{step:?}: {err}");

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!scale.is_gatt_connected(), "{step:?}");
        let events = drain(&mut events);
        assert_eq!(
            statuses(&events),
            vec![Status::Searching, Status::Error(err.to_string())],
            "{step:?}"
        );
        assert!(logs(&events).contains("Connection error:"));

        time::sleep(Duration::from_secs(3)).await;
        assert!(scale.writes().is_empty(), "{step:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_connected_is_skipped() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    session.connect().await.unwrap();

    let events = drain(&mut events);
    assert_eq!(statuses(&events), vec![Status::Searching, Status::Connected]);
    assert!(logs(&events).contains("Connect skipped"));
}

#[tokio::test(start_paused = true)]
async fn test_user_disconnect_is_not_reported_as_device_drop() {
    let scale = MockScale::new();
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();
    drain(&mut events);
    session.disconnect().await;
    settle().await;

    let events = drain(&mut events);
    let logs = logs(&events);
    assert!(!logs.contains("Connection closed by device."), "{logs}");
    assert_eq!(logs.matches("Disconnected from device.").count(), 1);
    assert_eq!(statuses(&events), vec![Status::Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_cancels_attempt() {
    let scale = MockScale::with(Options {
        connect_delay: Duration::from_millis(500),
        ..Options::default()
    });
    let (session, mut events) = session(&scale);
    let session = Arc::new(session);

    let pending = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.connect().await }
    });
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Connecting);

    session.disconnect().await;
    let result = pending.await.unwrap();

    assert!(matches!(result, Err(SessionError::Cancelled)), "{result:?}");
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!scale.is_gatt_connected());
    let drained = drain(&mut events);
    assert_eq!(statuses(&drained), vec![Status::Searching, Status::Disconnected]);

    time::sleep(Duration::from_secs(3)).await;
    assert!(scale.writes().is_empty());

    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.device_name().as_deref(), Some("LUNAR-0A1B2C"));
}

#[tokio::test(start_paused = true)]
async fn test_unnamed_device_gets_default_name() {
    let scale = MockScale::with(Options { anonymous: true, ..Options::default() });
    let (session, mut events) = session(&scale);

    session.connect().await.unwrap();

    assert_eq!(session.device_name().as_deref(), Some("Acaia Lunar"));
    let events = drain(&mut events);
    assert!(events.contains(&ScaleEvent::Device(Some("Acaia Lunar".to_string()))));
    assert!(logs(&events).contains("Selected device: Acaia Lunar"));
}
