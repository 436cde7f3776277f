//! Value types shared by the status, role switch, and observer layers.

use std::{fmt, str::FromStr};

use strum::{Display, EnumString};

use crate::{Error, Result};

/// Returns the currently selected choice of a sysfs role attribute.
///
/// The kernel lists every choice and wraps the active one in brackets, e.g.
/// `source [sink]`. Text without a complete bracket pair is returned as-is.
pub fn active_choice(s: &str) -> &str {
    match (s.find('['), s.find(']')) {
        (Some(first), Some(last)) if first < last => &s[first + 1..last],
        _ => s,
    }
}

/// The name of a Type-C port, e.g. `port0`.
///
/// Port names are used to build paths beneath the sysfs, so anything that
/// could escape the Type-C class directory is refused at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortName(String);

impl PortName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(Error::InvalidPortName(name));
        }
        Ok(Self(name))
    }

    /// For names known to be valid at compile time.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok());
        Self(name.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name of the sysfs entry for this port's partner.
    pub fn partner(&self) -> String {
        format!("{}-partner", self.0)
    }
}

impl FromStr for PortName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PortName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RoleType {
    #[strum(to_string = "power", serialize = "power_role")]
    Power,
    #[strum(to_string = "data", serialize = "data_role")]
    Data,
    Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PowerRole {
    Source,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DataRole {
    Host,
    Device,
}

/// The operating mode of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PortMode {
    /// Upstream facing port (device side).
    Ufp,
    /// Downstream facing port (host side).
    Dfp,
    /// Dual role port, either side may negotiate.
    Drp,
    AudioAccessory,
    DebugAccessory,
}

/// A role a port can be asked to switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    Power(PowerRole),
    Data(DataRole),
    Mode(PortMode),
}

impl PortRole {
    /// Parses a role for the given role type, e.g. `(Mode, "dfp")`.
    pub fn parse(role_type: RoleType, s: &str) -> Result<Self> {
        Ok(match role_type {
            RoleType::Power => PortRole::Power(s.parse()?),
            RoleType::Data => PortRole::Data(s.parse()?),
            RoleType::Mode => PortRole::Mode(s.parse()?),
        })
    }

    pub fn role_type(&self) -> RoleType {
        match self {
            PortRole::Power(_) => RoleType::Power,
            PortRole::Data(_) => RoleType::Data,
            PortRole::Mode(_) => RoleType::Mode,
        }
    }

    /// The string written to the port's role control file to request this
    /// role.
    pub fn control_str(&self) -> &'static str {
        match self {
            PortRole::Power(PowerRole::Source) => "source",
            PortRole::Power(PowerRole::Sink) => "sink",
            PortRole::Data(DataRole::Host) => "host",
            PortRole::Data(DataRole::Device) => "device",
            PortRole::Mode(PortMode::Ufp) => "sink",
            PortRole::Mode(PortMode::Dfp) => "source",
            PortRole::Mode(PortMode::Drp) => DUAL_ROLE,
            PortRole::Mode(_) => "none",
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Power(role) => write!(f, "power:{role}"),
            PortRole::Data(role) => write!(f, "data:{role}"),
            PortRole::Mode(mode) => write!(f, "mode:{mode}"),
        }
    }
}

/// The port type a port falls back to when a forced role fails.
pub const DUAL_ROLE: &str = "dual";

/// A role as the kernel reports it in a role attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum RoleToken {
    Source,
    Sink,
    Host,
    Device,
    None,
}

/// The accessory mode reported by a partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AccessoryMode {
    None,
    AnalogAudio,
    Debug,
}

/// The `power_operation_mode` value while USB Power Delivery is negotiated.
/// Every other value (`default`, `1.5A`, `3.0A`) counts as not negotiated.
pub const POWER_DELIVERY_MODE: &str = "usb_power_delivery";

/// Overall outcome attached to notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

impl Status {
    pub fn from_success(success: bool) -> Self {
        if success {
            Status::Success
        } else {
            Status::Error
        }
    }
}

/// Which shape of [`PortStatus`] an observer understands.
///
/// Later shapes are supersets of earlier ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum StatusShape {
    /// Roles and capability flags only, with a fixed set of supported modes.
    Legacy,
    /// Adds the dual-role and accessory supported modes.
    Modes,
    /// Adds contaminant detection and protection state.
    Contaminant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ContaminantDetectionStatus {
    NotSupported,
    Disabled,
    NotDetected,
    Detected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ContaminantProtectionMode {
    ForceSink,
    ForceDisable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ContaminantProtectionStatus {
    None,
    ForceSink,
    ForceDisable,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContaminantInfo {
    pub supported_protection_modes: Vec<ContaminantProtectionMode>,
    pub supports_enable_presence_protection: bool,
    pub supports_enable_presence_detection: bool,
    pub protection_status: ContaminantProtectionStatus,
    pub detection_status: ContaminantDetectionStatus,
}

impl Default for ContaminantInfo {
    fn default() -> Self {
        Self {
            supported_protection_modes: vec![
                ContaminantProtectionMode::ForceSink,
                ContaminantProtectionMode::ForceDisable,
            ],
            supports_enable_presence_protection: false,
            supports_enable_presence_detection: false,
            protection_status: ContaminantProtectionStatus::ForceSink,
            detection_status: ContaminantDetectionStatus::NotSupported,
        }
    }
}

/// A snapshot of a single port.
///
/// Role fields are `None` when nothing is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortStatus {
    pub port: PortName,
    pub connected: bool,
    pub power_role: Option<PowerRole>,
    pub data_role: Option<DataRole>,
    pub mode: Option<PortMode>,
    pub can_change_mode: bool,
    pub can_change_data_role: bool,
    pub can_change_power_role: bool,
    pub supported_modes: Vec<PortMode>,
    /// Only present for observers of [`StatusShape::Contaminant`].
    pub contaminant: Option<ContaminantInfo>,
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[test]
    fn active_choice_extraction() {
        assert_that!(active_choice("source [sink]"), eq("sink"));
        assert_that!(active_choice("[host] device"), eq("host"));
        assert_that!(active_choice("[dual] source sink"), eq("dual"));
        assert_that!(active_choice("device"), eq("device"));
        assert_that!(active_choice("broken] [order"), eq("broken] [order"));
        assert_that!(active_choice("[]"), eq(""));
    }

    #[test]
    fn port_name_rejects_traversal() {
        assert_that!(PortName::new("port0"), ok(anything()));
        assert_that!(PortName::new("port1"), ok(anything()));
        assert_that!(
            PortName::new(".."),
            err(eq(&Error::InvalidPortName("..".to_owned())))
        );
        assert_that!(PortName::new("../port0"), err(anything()));
        assert_that!(PortName::new("port0/data_role"), err(anything()));
        assert_that!(PortName::new(""), err(anything()));
    }

    #[test]
    fn role_control_strings() {
        assert_that!(PortRole::Power(PowerRole::Source).control_str(), eq("source"));
        assert_that!(PortRole::Power(PowerRole::Sink).control_str(), eq("sink"));
        assert_that!(PortRole::Data(DataRole::Host).control_str(), eq("host"));
        assert_that!(PortRole::Data(DataRole::Device).control_str(), eq("device"));
        assert_that!(PortRole::Mode(PortMode::Ufp).control_str(), eq("sink"));
        assert_that!(PortRole::Mode(PortMode::Dfp).control_str(), eq("source"));
        assert_that!(PortRole::Mode(PortMode::Drp).control_str(), eq("dual"));
        assert_that!(
            PortRole::Mode(PortMode::AudioAccessory).control_str(),
            eq("none")
        );
    }

    #[test]
    fn role_parse() {
        assert_that!(
            PortRole::parse(RoleType::Mode, "dfp"),
            ok(eq(&PortRole::Mode(PortMode::Dfp)))
        );
        assert_that!(
            PortRole::parse(RoleType::Power, "sink"),
            ok(eq(&PortRole::Power(PowerRole::Sink)))
        );
        assert_that!(PortRole::parse(RoleType::Data, "sink"), err(eq(&Error::Parse)));
        assert_that!("power_role".parse::<RoleType>().unwrap(), eq(RoleType::Power));
    }

    #[test]
    fn shapes_are_ordered() {
        assert_that!(StatusShape::Legacy < StatusShape::Modes, is_true());
        assert_that!(StatusShape::Modes < StatusShape::Contaminant, is_true());
    }
}
