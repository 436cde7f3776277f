//! The uevent thread, and what it does with each kind of event.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use camino::Utf8Path;
use log::{debug, error, info};
use rustix::{
    event::{eventfd, poll, EventfdFlags, PollFd, PollFlags},
    fd::OwnedFd,
    io::Errno,
};

use crate::{
    autosuspend::SYS_BUS_PLATFORM_DEVICES,
    coordinator::Shared,
    props::{ADBD_STATE, ADB_DISABLED, USB_CONTROLLER},
    status::read_contaminant,
    sysfs::{PropertyReadable, PropertyWritable},
    types::*,
    uevent::{header, Route, UdcAction, UeventSocket},
    Error, Result,
};

/// Handle to a running uevent thread. Dropping it stops the thread and waits
/// for it to exit.
pub(crate) struct Worker {
    handle: Option<JoinHandle<()>>,
    stop: Arc<OwnedFd>,
}

impl Worker {
    pub(crate) fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let stop = Arc::new(eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)?);

        let handle = thread::Builder::new().name("typec-uevent".to_owned()).spawn({
            let stop = stop.clone();
            move || run(&shared, &stop)
        })?;

        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(err) = rustix::io::write(&*self.stop, &1u64.to_ne_bytes()) {
            error!("Failed to signal uevent thread: {err}");
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("uevent thread panicked");
            }
        }
        info!("uevent thread destroyed");
    }
}

fn run(shared: &Shared, stop: &OwnedFd) {
    info!("creating thread");

    let socket = match UeventSocket::open() {
        Ok(socket) => socket,
        Err(err) => {
            error!("uevent_init: uevent socket failed: {err}");
            return;
        }
    };

    loop {
        let mut fds = [
            PollFd::new(&socket, PollFlags::IN),
            PollFd::new(stop, PollFlags::IN),
        ];
        match poll(&mut fds, -1) {
            Ok(_) => {}
            Err(Errno::INTR) => continue,
            Err(err) => {
                error!("usb poll failed: {err}");
                break;
            }
        }

        if !fds[1].revents().is_empty() {
            break;
        }
        match SocketReadiness::from_revents(fds[0].revents()) {
            SocketReadiness::Idle => {}
            SocketReadiness::Readable => dispatch_pending(shared, &socket),
            SocketReadiness::HungUp => {
                error!("uevent socket hung up");
                break;
            }
        }
    }

    info!("exiting worker thread");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketReadiness {
    Idle,
    Readable,
    HungUp,
}

impl SocketReadiness {
    /// A pending socket error (such as a receive buffer overrun) is consumed
    /// by the next read, so it counts as readable.
    fn from_revents(revents: PollFlags) -> Self {
        if revents.contains(PollFlags::HUP) {
            Self::HungUp
        } else if revents.is_empty() {
            Self::Idle
        } else {
            Self::Readable
        }
    }
}

fn dispatch_pending(shared: &Shared, socket: &UeventSocket) {
    loop {
        match socket.read_message() {
            Ok(None) => continue,
            Ok(Some(msg)) => shared.handle_uevent(&msg),
            Err(Error::Io(std::io::ErrorKind::WouldBlock)) => return,
            Err(Error::Io(std::io::ErrorKind::Interrupted)) => continue,
            Err(err) => {
                error!("Failed to read uevent: {err}");
                return;
            }
        }
    }
}

impl Shared {
    pub(crate) fn handle_uevent(&self, msg: &[u8]) {
        let Some(route) = self.classifier.classify(msg, self.ignore_wakeup()) else {
            return;
        };

        match route {
            Route::Typec { partner_added } => self.on_typec(msg, partner_added),
            Route::PowerSupply { name } => self.on_power_supply(name.as_deref()),
            Route::DeviceAdded { device } => {
                self.autosuspend().check_device(&device);
            }
            Route::InterfaceBound { device, interface } => {
                self.autosuspend().check_interface(&device, &interface);
            }
            Route::Udc { action } => self.on_udc(action),
            Route::ControllerOffline { controller } => self.restart_host_mode(&controller),
        }
    }

    fn on_typec(&self, msg: &[u8], partner_added: bool) {
        info!("uevent received {}", header(msg));

        if partner_added {
            info!("partner added");
            self.partner.partner_attached();
        }

        let port = self.sysfs.typec().port(&self.config.primary_port);
        match port.power_operation_mode().get() {
            Ok(mode) => self
                .caches
                .lock()
                .unwrap()
                .budget
                .observe(&self.gadget(), &mode),
            Err(err) => debug!("{}: no power operation mode: {err}", port.dir()),
        }

        self.notify_port_status();
    }

    fn on_power_supply(&self, name: Option<&str>) {
        let contaminant_path = {
            let state = self.state.lock().unwrap();
            let capable = state
                .observer
                .as_ref()
                .is_some_and(|observer| observer.shape() >= StatusShape::Contaminant);
            if !capable {
                return;
            }
            state.contaminant_path.clone()
        };

        if name.is_some_and(|name| name != "usb") {
            return;
        }

        let Some(path) = contaminant_path else {
            return;
        };
        let presence = match read_contaminant(&self.sysfs, &path) {
            Ok(presence) => presence,
            Err(err) => {
                debug!("{path}: {err}");
                return;
            }
        };

        let changed = {
            let mut caches = self.caches.lock().unwrap();
            std::mem::replace(&mut caches.contaminant_presence, presence) != presence
        };
        if changed {
            self.notify_port_status();
        }

        // Skipped while a switch is in flight, as it owns the mode files.
        if let Ok(_switching) = self.role_switch.try_lock() {
            self.reset_detached_ports();
        }
    }

    /// Puts every port without a partner back into dual role, so a port left
    /// in a forced role can still attach.
    fn reset_detached_ports(&self) {
        let typec = self.sysfs.typec();
        let ports = match typec.ports() {
            Ok(ports) => ports,
            Err(err) => {
                debug!("No Type-C ports: {err}");
                return;
            }
        };

        for entry in ports {
            let port = typec.port(&entry.name);
            if port.has_partner() {
                continue;
            }
            if let Err(err) = port.role(RoleType::Mode).set(DUAL_ROLE) {
                error!("Fatal: Error while switching {} back to drp: {err}", entry.name);
            }
        }
    }

    fn on_udc(&self, action: UdcAction) {
        match action {
            UdcAction::Add => {
                // Lets adbd resume its FunctionFS monitor.
                self.set_prop(ADB_DISABLED, "0");

                // Without adbd around to bind the gadget, it has to be done
                // here.
                if self.props.get_or_default(ADBD_STATE) != "running" {
                    let controller = self.props.get_or_default(USB_CONTROLLER);
                    if let Err(err) = self.gadget().bind_udc(&controller) {
                        error!("Failed to bind UDC {controller}: {err}");
                    }
                }
            }
            UdcAction::Remove => {
                // Stops adbd retrying a bind that can't succeed until the UDC
                // returns.
                self.set_prop(ADB_DISABLED, "1");
            }
        }
    }

    fn set_prop(&self, key: &str, value: &str) {
        if let Err(err) = self.props.set(key, value) {
            error!("Failed to set {key}={value}: {err}");
        }
    }

    /// Cycles the controller's mode through `none` to force it to enumerate
    /// again as a host.
    fn restart_host_mode(&self, controller: &str) {
        let mode = Utf8Path::new(SYS_BUS_PLATFORM_DEVICES)
            .join(controller)
            .join("mode");
        error!("ERROR: restarting {controller} in host mode");

        if let Err(err) = self.sysfs.write(&mode, "none") {
            error!("{mode}: {err}");
        }
        thread::sleep(self.config.host_recovery_settle);
        if let Err(err) = self.sysfs.write(&mode, "host") {
            error!("{mode}: {err}");
        }
    }
}
