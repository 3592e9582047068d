use bluest::Uuid;
use tokio::time::Duration;

/// Which devices to offer when searching for a scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Advertised name prefixes; a device matches when its name starts with any of them
    pub name_prefixes: Vec<String>,
}

impl DeviceFilter {
    pub fn matches(&self, name: &str) -> bool {
        self.name_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Connection settings for a [`crate::ScaleSession`].
///
/// The defaults are the values Acaia Lunar scales expect and rarely need changing.
#[derive(Debug, Clone)]
pub struct ScaleConfig {
    pub name_prefixes: Vec<String>,
    pub service_uuid: Uuid,
    /// Notifications arrive on, and commands are written to, this characteristic
    pub characteristic_uuid: Uuid,
    /// Name reported when the device does not advertise one
    pub default_device_name: String,
    pub heartbeat_delay: Duration,
    pub identify_delay: Duration,
    pub configure_delay: Duration,
    pub keep_alive_interval: Duration,
    /// How long the bluest backend scans before giving up
    pub scan_timeout: Duration,
}

impl ScaleConfig {
    pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00001820_0000_1000_8000_00805f9b34fb);
    pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00002a80_0000_1000_8000_00805f9b34fb);
    const NAME_PREFIXES: [&'static str; 2] = ["ACAIA", "LUNAR"];
    const DEFAULT_DEVICE_NAME: &'static str = "Acaia Lunar";
    const HEARTBEAT_DELAY_MS: u64 = 200;
    const IDENTIFY_DELAY_MS: u64 = 500;
    const CONFIGURE_DELAY_MS: u64 = 1000;
    const KEEP_ALIVE_INTERVAL_MS: u64 = 2000;
    const SCAN_TIMEOUT_S: u64 = 30;

    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            name_prefixes: self.name_prefixes.clone(),
        }
    }
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            name_prefixes: Self::NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            service_uuid: Self::SERVICE_UUID,
            characteristic_uuid: Self::CHARACTERISTIC_UUID,
            default_device_name: Self::DEFAULT_DEVICE_NAME.to_string(),
            heartbeat_delay: Duration::from_millis(Self::HEARTBEAT_DELAY_MS),
            identify_delay: Duration::from_millis(Self::IDENTIFY_DELAY_MS),
            configure_delay: Duration::from_millis(Self::CONFIGURE_DELAY_MS),
            keep_alive_interval: Duration::from_millis(Self::KEEP_ALIVE_INTERVAL_MS),
            scan_timeout: Duration::from_secs(Self::SCAN_TIMEOUT_S),
        }
    }
}

#[test]
fn test_default_filter_matches_scale_names() {
    let filter = ScaleConfig::default().device_filter();
    assert!(filter.matches("ACAIA123"));
    assert!(filter.matches("LUNAR-0A1B2C"));
    assert!(!filter.matches("PEARLS"));
    assert!(!filter.matches("lunar"));
}

#[test]
fn test_default_uuids() {
    let config = ScaleConfig::default();
    assert_eq!(config.service_uuid.to_string(), "00001820-0000-1000-8000-00805f9b34fb");
    assert_eq!(config.characteristic_uuid.to_string(), "00002a80-0000-1000-8000-00805f9b34fb");
}
