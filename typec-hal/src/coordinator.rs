//! The service object tying the port, role switch, and event layers together.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use camino::Utf8PathBuf;
use log::{debug, error, info, warn};

use crate::{
    autosuspend::{controller_in_host_mode, Autosuspend},
    config::Config,
    dispatcher::Worker,
    gadget::{BudgetOverride, Gadget},
    observer::{deliver_port_status, deliver_role_switch, Observer},
    props::{PropertyStore, ADB_DISABLED, USB_CONTROLLER},
    role_switch::{PartnerSignal, RoleSwitch},
    status::StatusQuery,
    sysfs::Sysfs,
    types::*,
    uevent::Classifier,
    Result,
};

#[derive(Default)]
pub(crate) struct State {
    pub(crate) observer: Option<Arc<dyn Observer>>,
    /// The readable contaminant status file, if this device has one.
    pub(crate) contaminant_path: Option<Utf8PathBuf>,
}

#[derive(Debug, Default)]
pub(crate) struct Caches {
    pub(crate) budget: BudgetOverride,
    pub(crate) contaminant_presence: bool,
}

/// State shared between request callers and the uevent thread.
///
/// Lock order: the coordinator's worker slot, then `role_switch`, then
/// `state`. The partner lock inside `partner` and `caches` are never held
/// while acquiring any of those.
pub(crate) struct Shared {
    pub(crate) sysfs: Sysfs,
    pub(crate) config: Config,
    pub(crate) props: Arc<dyn PropertyStore>,
    pub(crate) classifier: Classifier,
    pub(crate) state: Mutex<State>,
    pub(crate) role_switch: Mutex<()>,
    pub(crate) partner: PartnerSignal,
    pub(crate) caches: Mutex<Caches>,
    pub(crate) ignore_wakeup: AtomicBool,
}

impl Shared {
    pub(crate) fn gadget(&self) -> Gadget<'_> {
        Gadget::new(
            &self.sysfs,
            &self.config.gadget_dir,
            &self.config.gadget_config,
        )
    }

    pub(crate) fn autosuspend(&self) -> Autosuspend<'_> {
        Autosuspend::new(
            &self.sysfs,
            &self.config.autosuspend_allow,
            self.config.interface_class_attempts,
        )
    }

    /// Queries every port and sends the result to the observer, if any.
    pub(crate) fn notify_port_status(&self) {
        let state = self.state.lock().unwrap();
        let Some(observer) = state.observer.as_deref() else {
            info!("Notifying port status skipped, no observer registered");
            return;
        };

        let (ports, status) = StatusQuery::new(
            &self.sysfs,
            &self.config.primary_port,
            state.contaminant_path.as_deref(),
        )
        .snapshot(observer.shape());
        deliver_port_status(Some(observer), &ports, status);
    }

    pub(crate) fn ignore_wakeup(&self) -> bool {
        self.ignore_wakeup.load(Ordering::Relaxed)
    }

    /// Runs once the uevent thread is up: resolves the contaminant status
    /// file, checks wakeup support, and checks whether the controller is
    /// currently a host.
    fn probe(&self) {
        let ignore_wakeup = self.autosuspend().probe_wakeup();
        self.ignore_wakeup.store(ignore_wakeup, Ordering::Relaxed);

        let controller = self.props.get_or_default(USB_CONTROLLER);
        let adb_disabled = if controller_in_host_mode(&self.sysfs, &controller) {
            "1"
        } else {
            "0"
        };
        if let Err(err) = self.props.set(ADB_DISABLED, adb_disabled) {
            warn!("Failed to set {ADB_DISABLED}: {err}");
        }

        let contaminant_path = self
            .config
            .contaminant_paths
            .iter()
            .find(|path| self.sysfs.is_readable(path))
            .cloned();
        info!(
            "Contamination presence path: {}",
            contaminant_path.as_deref().map_or("", |p| p.as_str())
        );
        self.state.lock().unwrap().contaminant_path = contaminant_path;
    }
}

/// Coordinates Type-C port roles and status reporting.
///
/// Requests run on the caller's thread. While an [`Observer`] is registered, a
/// background thread additionally listens for kernel uevents and reacts to
/// them.
pub struct Coordinator {
    shared: Arc<Shared>,
    /// Taken before `shared.state`, and held across every observer change.
    worker: Mutex<Option<Worker>>,
}

impl Coordinator {
    pub fn new(config: Config, props: Arc<dyn PropertyStore>) -> Result<Self> {
        let sysfs = Sysfs::open(config.sysroot.clone())?;
        let classifier = Classifier::new(&props.get_or_default(USB_CONTROLLER))?;

        Ok(Self {
            shared: Arc::new(Shared {
                sysfs,
                config,
                props,
                classifier,
                state: Default::default(),
                role_switch: Mutex::new(()),
                partner: PartnerSignal::new(),
                caches: Default::default(),
                ignore_wakeup: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Whether the uevent thread is running.
    pub fn is_watching(&self) -> bool {
        self.worker.lock().unwrap().is_some()
    }

    /// Whether interface bind events are being ignored because the platform
    /// can't wake on USB.
    pub fn ignores_wakeup(&self) -> bool {
        self.shared.ignore_wakeup()
    }

    /// Registers or clears the observer.
    ///
    /// Registering the first observer starts the uevent thread and runs the
    /// startup probes; clearing it stops the thread and waits for it to exit.
    /// Replacing one observer with another only swaps the reference.
    pub fn set_observer(&self, observer: Option<Arc<dyn Observer>>) {
        let mut worker = self.worker.lock().unwrap();
        let mut state = self.shared.state.lock().unwrap();
        let attaching = observer.is_some();
        let attached = state.observer.is_some();
        state.observer = observer;
        if attached == attaching {
            return;
        }

        info!("registering observer");

        if !attaching {
            // The thread takes the state lock while handling events.
            drop(state);
            *worker = None;
            return;
        }

        match Worker::spawn(self.shared.clone()) {
            Ok(spawned) => *worker = Some(spawned),
            Err(err) => {
                error!("uevent thread creation failed: {err}");
                state.observer = None;
                return;
            }
        }
        drop(state);

        self.shared.probe();
    }

    /// Switches a port's power role, data role, or mode, and reports the
    /// outcome to the observer.
    ///
    /// Invalid port names are rejected before touching the sysfs and are not
    /// reported.
    pub fn switch_role(&self, port: &str, role: PortRole) -> Result<()> {
        let port =
            PortName::new(port).inspect_err(|err| error!("Fatal: invalid node type: {err}"))?;

        let _switching = self.shared.role_switch.lock().unwrap();
        let res = RoleSwitch::new(
            &self.shared.sysfs,
            &self.shared.partner,
            self.shared.config.role_switch_timeout,
        )
        .run(&port, role);

        let state = self.shared.state.lock().unwrap();
        deliver_role_switch(
            state.observer.as_deref(),
            &port,
            role,
            Status::from_success(res.is_ok()),
        );

        res
    }

    /// Reads the status of all ports in the given shape.
    pub fn port_status(&self, shape: StatusShape) -> Result<Vec<PortStatus>> {
        let state = self.shared.state.lock().unwrap();
        StatusQuery::new(
            &self.shared.sysfs,
            &self.shared.config.primary_port,
            state.contaminant_path.as_deref(),
        )
        .run(shape)
    }

    /// Sends a fresh port status to the observer.
    pub fn query_port_status(&self) {
        self.shared.notify_port_status();
    }

    /// Contaminant detection can't be turned off; this only re-reports the
    /// port status.
    pub fn enable_contaminant_presence_detection(&self, port: &str, enable: bool) {
        debug!("{port}: contaminant presence detection enable={enable}");
        self.shared.notify_port_status();
        info!("Contaminant Presence Detection should always be in enable mode");
    }

    /// Contaminant protection can't be turned off; this only re-reports the
    /// port status.
    pub fn enable_contaminant_presence_protection(&self, port: &str, enable: bool) {
        debug!("{port}: contaminant presence protection enable={enable}");
        self.shared.notify_port_status();
        info!("Contaminant Presence Protection should always be in enable mode");
    }

    /// Handles a raw uevent as if it had arrived on the uevent socket.
    pub fn handle_uevent(&self, msg: &[u8]) {
        self.shared.handle_uevent(msg);
    }
}
