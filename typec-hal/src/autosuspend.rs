//! USB autosuspend policy for devices enumerated behind the host controller.

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use rustix::fs::FileType;

use crate::{config::UsbId, sysfs::Sysfs, Result};

pub const SYS_BUS_PLATFORM_DEVICES: &str = "sys/bus/platform/devices";
pub const SYS_BUS_USB_DEVICES: &str = "sys/bus/usb/devices";

const USB_CLASS_AUDIO: u8 = 0x01;
const USB_CLASS_HUB: u8 = 0x09;

/// Decides which USB devices may be runtime suspended, and enables it on
/// them.
#[derive(Debug, Clone, Copy)]
pub struct Autosuspend<'a> {
    sysfs: &'a Sysfs,
    allow: &'a [UsbId],
    class_attempts: u32,
}

impl<'a> Autosuspend<'a> {
    pub fn new(sysfs: &'a Sysfs, allow: &'a [UsbId], class_attempts: u32) -> Self {
        Self {
            sysfs,
            allow,
            class_attempts,
        }
    }

    /// Writes `auto` to the device's power control, then enables wakeup.
    /// Wakeup is left alone if the first write fails.
    fn enable(&self, device: &Utf8Path) -> Result<()> {
        self.sysfs.write(device.join("power/control"), "auto")?;
        self.sysfs.write(device.join("power/wakeup"), "enabled")
    }

    fn read_id(&self, device: &Utf8Path) -> Result<UsbId> {
        let vendor = self.sysfs.read(device.join("idVendor"))?;
        let product = self.sysfs.read(device.join("idProduct"))?;
        Ok(UsbId {
            vendor: u16::from_str_radix(&vendor, 16)?,
            product: u16::from_str_radix(&product, 16)?,
        })
    }

    /// Enables autosuspend on a newly added device if it is allow-listed.
    pub fn check_device(&self, device: &Utf8Path) -> bool {
        let id = match self.read_id(device) {
            Ok(id) => id,
            Err(err) => {
                debug!("{device}: no usable USB id: {err}");
                return false;
            }
        };
        if !self.allow.contains(&id) {
            return false;
        }

        info!("auto suspend usb device {device}");
        match self.enable(device) {
            Ok(()) => true,
            Err(err) => {
                warn!("{device}: failed to enable autosuspend: {err}");
                false
            }
        }
    }

    fn read_interface_class(&self, interface: &Utf8Path) -> Option<u8> {
        let path = interface.join("bInterfaceClass");

        let mut class = String::new();
        for _ in 0..self.class_attempts {
            class = self.sysfs.read(&path).unwrap_or_default();
            if !class.is_empty() {
                break;
            }
        }

        if class.is_empty() {
            return None;
        }
        u8::from_str_radix(&class, 16)
            .inspect_err(|err| warn!("{path}: bad interface class {class:?}: {err}"))
            .ok()
    }

    /// Enables autosuspend on the device owning `interface` if the interface
    /// is an audio or hub one.
    pub fn check_interface(&self, device: &Utf8Path, interface: &str) -> bool {
        let Some(class) = self.read_interface_class(&device.join(interface)) else {
            return false;
        };

        match class {
            USB_CLASS_AUDIO | USB_CLASS_HUB => {
                info!("auto suspend usb interfaces {device}");
                self.enable(device)
                    .inspect_err(|err| warn!("{device}: failed to enable autosuspend: {err}"))
                    .is_ok()
            }
            _ => {
                info!("usb interface does not support autosuspend {device}");
                false
            }
        }
    }

    /// Checks whether the platform's USB controller can wake the system.
    ///
    /// If it can, interface autosuspend is applied to every device that is
    /// already enumerated. Returns `true` when wakeup is unsupported and bind
    /// events should not be acted on.
    pub fn probe_wakeup(&self) -> bool {
        let mut platform = match self.sysfs.list(SYS_BUS_PLATFORM_DEVICES) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to list platform devices: {err}");
                return true;
            }
        };
        platform.sort_by(|a, b| a.name.cmp(&b.name));

        // "susb" covers both hsusb and ssusb controllers.
        let Some(controller) = platform.iter().find(|entry| entry.name.contains("susb")) else {
            return true;
        };

        let wakeup = Utf8Path::new(SYS_BUS_PLATFORM_DEVICES)
            .join(&controller.name)
            .join("power/wakeup");
        if !self.sysfs.exists(wakeup) {
            info!("PLATFORM DOESN'T SUPPORT WAKEUP");
            return true;
        }

        for device in self.enumerated_devices() {
            self.check_first_interface(&device);
        }

        false
    }

    fn enumerated_devices(&self) -> Vec<Utf8PathBuf> {
        let entries = match self.sysfs.list(SYS_BUS_USB_DEVICES) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("No enumerated USB devices: {err}");
                return vec![];
            }
        };

        entries
            .into_iter()
            .filter(|entry| entry.file_type == FileType::Symlink && !entry.name.contains(':'))
            .filter_map(|entry| {
                self.sysfs
                    .canonicalize(Utf8Path::new(SYS_BUS_USB_DEVICES).join(&entry.name))
                    .inspect_err(|err| debug!("{}: unresolvable: {err}", entry.name))
                    .ok()
            })
            .collect()
    }

    fn check_first_interface(&self, device: &Utf8Path) {
        let Ok(entries) = self.sysfs.list(device) else {
            return;
        };

        let interfaces = entries
            .iter()
            .filter(|entry| entry.file_type == FileType::Directory && entry.name.contains(':'));
        for interface in interfaces {
            if self.check_interface(device, &interface.name) {
                break;
            }
        }
    }
}

/// Whether the named platform controller currently has an xHCI host
/// instantiated beneath it.
pub fn controller_in_host_mode(sysfs: &Sysfs, controller: &str) -> bool {
    if controller.is_empty() || controller.contains('/') {
        return false;
    }

    sysfs
        .list(Utf8Path::new(SYS_BUS_PLATFORM_DEVICES).join(controller))
        .map(|entries| entries.iter().any(|entry| entry.name.contains("xhci-hcd")))
        .unwrap_or(false)
}
