//! The system property store.

use std::{collections::HashMap, process::Command, sync::Mutex};

use log::warn;

use crate::{Error, Result};

/// Name of the platform USB controller, e.g. `a600000.dwc3`.
pub const USB_CONTROLLER: &str = "vendor.usb.controller";
/// Set to `1` to stop adbd from retrying its FunctionFS bind.
pub const ADB_DISABLED: &str = "vendor.sys.usb.adb.disabled";
/// Service state of adbd, `running` when it is up.
pub const ADBD_STATE: &str = "init.svc.adbd";

/// A string key/value store.
pub trait PropertyStore: Send + Sync {
    /// Returns the value of `key`, or `None` if it is unset.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn get_or_default(&self, key: &str) -> String {
        self.get(key).unwrap_or_default()
    }
}

/// An in-process store.
#[derive(Debug, Default)]
pub struct MemoryProperties(Mutex<HashMap<String, String>>);

impl MemoryProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.0
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        self
    }
}

impl PropertyStore for MemoryProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Android system properties, accessed through the `getprop` and `setprop`
/// tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProperties;

impl PropertyStore for SystemProperties {
    fn get(&self, key: &str) -> Option<String> {
        let output = match Command::new("getprop").arg(key).output() {
            Ok(output) => output,
            Err(err) => {
                warn!("getprop {key}: {err}");
                return None;
            }
        };

        let value = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        (output.status.success() && !value.is_empty()).then_some(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let status = Command::new("setprop").arg(key).arg(value).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Io(std::io::ErrorKind::Other))
        }
    }
}
