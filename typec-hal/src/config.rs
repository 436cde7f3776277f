//! Service configuration.

use std::time::Duration;

use camino::Utf8PathBuf;

use crate::types::PortName;

/// A USB vendor/product pair, as read from `idVendor`/`idProduct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

/// The Google USB-C to 3.5mm adapter, with nothing plugged into it.
pub const GOOGLE_USBC_35_ADAPTER_UNPLUGGED: UsbId = UsbId {
    vendor: 0x18d1,
    product: 0x5029,
};

#[derive(Debug, Clone)]
pub struct Config {
    /// The directory that sysfs and configfs paths are resolved against.
    pub sysroot: Utf8PathBuf,
    /// The port whose power operation mode drives the gadget power budget,
    /// and the only one with contaminant detection.
    pub primary_port: PortName,
    /// How long a mode switch waits for the partner to re-attach.
    pub role_switch_timeout: Duration,
    /// Delay between dropping and re-entering host mode on controller
    /// recovery.
    pub host_recovery_settle: Duration,
    /// The configfs gadget directory.
    pub gadget_dir: Utf8PathBuf,
    /// The gadget configuration whose power budget is managed.
    pub gadget_config: String,
    /// Candidate contaminant status files, in priority order.
    pub contaminant_paths: Vec<Utf8PathBuf>,
    /// Devices allowed to autosuspend.
    pub autosuspend_allow: Vec<UsbId>,
    /// Attempts at reading an interface class that may not be populated yet.
    pub interface_class_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sysroot: "/".into(),
            primary_port: PortName::from_static("port0"),
            role_switch_timeout: Duration::from_secs(8),
            host_recovery_settle: Duration::from_secs(1),
            gadget_dir: "config/usb_gadget/g1".into(),
            gadget_config: "b.1".to_owned(),
            contaminant_paths: vec![
                "sys/class/power_supply/usb/moisture_detected".into(),
                "sys/class/qcom-battery/moisture_detection_status".into(),
                "sys/bus/iio/devices/iio:device4/in_index_usb_moisture_detected_input".into(),
            ],
            autosuspend_allow: vec![GOOGLE_USBC_35_ADAPTER_UNPLUGGED],
            interface_class_attempts: 3,
        }
    }
}
