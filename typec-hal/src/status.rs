//! Assembling port status snapshots from the sysfs.

use camino::Utf8Path;
use log::{debug, error, info};

use crate::{
    sysfs::{PropertyReadable, Sysfs, TypecPort},
    types::*,
    Error, Result,
};

/// Reads the contaminant status file, where a leading `1` means detected.
pub fn read_contaminant(sysfs: &Sysfs, path: &Utf8Path) -> Result<bool> {
    let presence = sysfs.read(path)?;
    Ok(presence.starts_with('1'))
}

/// A status query over every Type-C port.
#[derive(Debug, Clone, Copy)]
pub struct StatusQuery<'a> {
    sysfs: &'a Sysfs,
    primary_port: &'a PortName,
    contaminant_path: Option<&'a Utf8Path>,
}

impl<'a> StatusQuery<'a> {
    pub fn new(
        sysfs: &'a Sysfs,
        primary_port: &'a PortName,
        contaminant_path: Option<&'a Utf8Path>,
    ) -> Self {
        Self {
            sysfs,
            primary_port,
            contaminant_path,
        }
    }

    /// Reads the status of all ports.
    ///
    /// Fails as a whole if any port's roles can't be resolved; no partial
    /// snapshot is returned.
    pub fn run(&self, shape: StatusShape) -> Result<Vec<PortStatus>> {
        let typec = self.sysfs.typec();
        let entries = typec.ports()?;
        if entries.is_empty() {
            return Err(Error::NoPorts);
        }

        let mut ports = Vec::with_capacity(entries.len());
        for entry in entries {
            let port = typec.port(&entry.name);
            let connected = entry.connected;

            let power_role = current_power_role(&port, connected)?;
            let data_role = current_data_role(&port, connected)?;
            let mode = current_mode(&port, connected)?;

            let can_swap = connected
                && port
                    .partner_supports_usb_power_delivery()
                    .get()
                    .unwrap_or(false);

            debug!(
                "{}: connected:{connected} canChangeMode:true canChangeData:{can_swap} canChangePower:{can_swap}",
                entry.name
            );

            let supported_modes = match shape {
                StatusShape::Legacy => vec![PortMode::Dfp],
                StatusShape::Modes | StatusShape::Contaminant => {
                    vec![PortMode::Drp, PortMode::AudioAccessory]
                }
            };

            let contaminant = (shape >= StatusShape::Contaminant)
                .then(|| self.contaminant_info(&entry.name));

            ports.push(PortStatus {
                port: entry.name,
                connected,
                power_role,
                data_role,
                mode,
                can_change_mode: true,
                can_change_data_role: can_swap,
                can_change_power_role: can_swap,
                supported_modes,
                contaminant,
            });
        }

        Ok(ports)
    }

    /// Like [`Self::run`], but folds failures into an error status with an
    /// empty port list.
    pub fn snapshot(&self, shape: StatusShape) -> (Vec<PortStatus>, Status) {
        match self.run(shape) {
            Ok(ports) => (ports, Status::Success),
            Err(err) => {
                error!("Port status query failed: {err}");
                (vec![], Status::Error)
            }
        }
    }

    fn contaminant_info(&self, port: &PortName) -> ContaminantInfo {
        let mut info = ContaminantInfo::default();

        if port != self.primary_port {
            return info;
        }

        let presence = self
            .contaminant_path
            .map(|path| read_contaminant(self.sysfs, path));
        match presence {
            Some(Ok(true)) => {
                info!("Contaminant presence detected");
                info.detection_status = ContaminantDetectionStatus::Detected;
            }
            Some(Ok(false)) => {
                info.detection_status = ContaminantDetectionStatus::NotDetected;
            }
            Some(Err(_)) | None => {
                info.supported_protection_modes.clear();
                info.protection_status = ContaminantProtectionStatus::None;
            }
        }

        info
    }
}

fn read_role_token(port: &TypecPort<'_>, role_type: RoleType) -> Result<RoleToken> {
    let role = port.role(role_type).get().inspect_err(|err| {
        error!(
            "Failed to read {}: {err}",
            port.role_node(role_type)
        )
    })?;
    role.parse().map_err(|_| Error::UnrecognizedRole(role))
}

fn unrecognized(token: RoleToken) -> Error {
    Error::UnrecognizedRole(format!("{token:?}").to_lowercase())
}

fn current_power_role(port: &TypecPort<'_>, connected: bool) -> Result<Option<PowerRole>> {
    if !connected {
        return Ok(None);
    }

    match read_role_token(port, RoleType::Power)? {
        RoleToken::Source => Ok(Some(PowerRole::Source)),
        RoleToken::Sink => Ok(Some(PowerRole::Sink)),
        RoleToken::None => Ok(None),
        token => Err(unrecognized(token)),
    }
}

fn current_data_role(port: &TypecPort<'_>, connected: bool) -> Result<Option<DataRole>> {
    if !connected {
        return Ok(None);
    }

    match read_role_token(port, RoleType::Data)? {
        RoleToken::Host => Ok(Some(DataRole::Host)),
        RoleToken::Device => Ok(Some(DataRole::Device)),
        RoleToken::None => Ok(None),
        token => Err(unrecognized(token)),
    }
}

fn current_mode(port: &TypecPort<'_>, connected: bool) -> Result<Option<PortMode>> {
    if !connected {
        return Ok(None);
    }

    let accessory = port.partner_accessory_mode().get()?;
    match accessory.parse() {
        Ok(AccessoryMode::AnalogAudio) => return Ok(Some(PortMode::AudioAccessory)),
        Ok(AccessoryMode::Debug) => return Ok(Some(PortMode::DebugAccessory)),
        _ => {}
    }

    // Mode may be backed by either port_type or data_role, so accept the
    // vocabulary of both.
    Ok(match read_role_token(port, RoleType::Mode)? {
        RoleToken::Source | RoleToken::Host => Some(PortMode::Dfp),
        RoleToken::Sink | RoleToken::Device => Some(PortMode::Ufp),
        RoleToken::None => None,
    })
}
