//! Role switch requests, including the partner attach handshake that confirms
//! a mode switch.

use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::Duration,
};

use log::{debug, error, info};

use crate::{
    sysfs::{PropertyReadable, PropertyWritable, Sysfs, TypecPort},
    types::*,
    Error, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PartnerState {
    #[default]
    Idle,
    AwaitingConfirmation,
    Confirmed,
}

/// The partner attach flag, paired with a condition variable that a mode
/// switch blocks on.
#[derive(Debug, Default)]
pub struct PartnerSignal {
    state: Mutex<PartnerState>,
    cond: Condvar,
}

impl PartnerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a partner attached, waking a pending mode switch.
    pub fn partner_attached(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == PartnerState::AwaitingConfirmation {
            debug!("Partner attach confirms pending mode switch");
        }
        *state = PartnerState::Confirmed;
        self.cond.notify_all();
    }

    /// Clears the flag and holds the partner lock until the returned guard is
    /// dropped.
    ///
    /// Anything done while armed (such as the control file write that is
    /// supposed to trigger the attach) can't race with the event thread's
    /// [`Self::partner_attached`].
    fn arm(&self) -> Armed<'_> {
        let mut state = self.state.lock().unwrap();
        *state = PartnerState::AwaitingConfirmation;
        Armed {
            signal: self,
            state: Some(state),
        }
    }
}

struct Armed<'a> {
    signal: &'a PartnerSignal,
    state: Option<MutexGuard<'a, PartnerState>>,
}

impl Armed<'_> {
    /// Waits for a partner attach. A wakeup without one starts a fresh wait of
    /// the full `timeout`.
    fn wait(&mut self, timeout: Duration) -> Result<()> {
        loop {
            let Some(state) = self.state.take() else {
                return Err(Error::Timeout);
            };
            if *state == PartnerState::Confirmed {
                self.state = Some(state);
                return Ok(());
            }

            let (state, res) = self.signal.cond.wait_timeout(state, timeout).unwrap();
            let confirmed = *state == PartnerState::Confirmed;
            self.state = Some(state);

            if confirmed {
                return Ok(());
            }
            if res.timed_out() {
                return Err(Error::Timeout);
            }
            debug!("Spurious wakeup while waiting for partner");
        }
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.as_mut() {
            **state = PartnerState::Idle;
        }
    }
}

/// Performs a single role switch on a port.
///
/// Callers are responsible for serializing requests; the outcome is not
/// reported to any observer here.
#[derive(Debug, Clone, Copy)]
pub struct RoleSwitch<'a> {
    sysfs: &'a Sysfs,
    signal: &'a PartnerSignal,
    timeout: Duration,
}

impl<'a> RoleSwitch<'a> {
    pub fn new(sysfs: &'a Sysfs, signal: &'a PartnerSignal, timeout: Duration) -> Self {
        Self {
            sysfs,
            signal,
            timeout,
        }
    }

    pub fn run(&self, port: &PortName, role: PortRole) -> Result<()> {
        let typec_port = self.sysfs.typec().port(port);
        info!(
            "filename write: {} role:{}",
            typec_port.role_node(role.role_type()),
            role.control_str()
        );

        match role {
            PortRole::Mode(_) => self.switch_mode(&typec_port, role),
            PortRole::Power(_) | PortRole::Data(_) => self.switch_direct(&typec_port, role),
        }
    }

    fn switch_mode(&self, port: &TypecPort<'_>, role: PortRole) -> Result<()> {
        let node = port.role(RoleType::Mode);

        let mut armed = self.signal.arm();
        let res = node
            .set(role.control_str())
            .inspect_err(|err| error!("Failed to write {role}: {err}"))
            .and_then(|()| armed.wait(self.timeout));

        if let Err(err) = &res {
            error!("Mode switch to {role} on {} failed: {err}", port.dir());
            if let Err(err) = node.set(DUAL_ROLE) {
                error!("Failed to reset {} to {DUAL_ROLE}: {err}", port.dir());
            }
        }

        drop(armed);
        res
    }

    fn switch_direct(&self, port: &TypecPort<'_>, role: PortRole) -> Result<()> {
        let node = port.role(role.role_type());
        let expected = role.control_str();

        node.set(expected)
            .inspect_err(|err| error!("Role switch failed while writing {role}: {err}"))?;
        let written = node
            .get()
            .inspect_err(|err| error!("Unable to read back the new role: {err}"))?;
        info!("written: {written}");

        if written == expected {
            Ok(())
        } else {
            error!("Role switch failed, {} reads back {written:?}", port.dir());
            Err(Error::RoleNotApplied {
                expected: expected.to_owned(),
                actual: written,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, sync::Arc, thread, time::Instant};

    use googletest::prelude::*;
    use rstest::*;

    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        sysfs: Sysfs,
        signal: PartnerSignal,
    }

    impl Fixture {
        fn read(&self, path: &str) -> String {
            fs::read_to_string(self.dir.path().join(path)).unwrap()
        }

        fn switch(&self, role: PortRole, timeout: Duration) -> crate::Result<()> {
            RoleSwitch::new(&self.sysfs, &self.signal, timeout)
                .run(&PortName::new("port0").unwrap(), role)
        }
    }

    #[fixture]
    fn fx() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let port = dir.path().join("sys/class/typec/port0");
        fs::create_dir_all(&port).unwrap();
        fs::write(port.join("power_role"), "[source] sink\n").unwrap();
        fs::write(port.join("data_role"), "[host] device\n").unwrap();
        fs::write(port.join("port_type"), "[dual] source sink\n").unwrap();

        let sysfs = Sysfs::open(dir.path().to_str().unwrap()).unwrap();
        Fixture {
            dir,
            sysfs,
            signal: PartnerSignal::new(),
        }
    }

    #[rstest]
    #[case(PortRole::Power(PowerRole::Sink), "sys/class/typec/port0/power_role")]
    #[case(PortRole::Data(DataRole::Device), "sys/class/typec/port0/data_role")]
    fn direct_switch_reads_back(fx: Fixture, #[case] role: PortRole, #[case] path: &str) {
        // Plain files read back exactly what was written, which has no
        // brackets and so is its own active choice.
        assert_that!(fx.switch(role, Duration::ZERO), ok(anything()));
        assert_that!(fx.read(path), eq(role.control_str()));
    }

    #[rstest]
    fn mode_switch_times_out_to_dual(fx: Fixture) {
        let start = Instant::now();
        assert_that!(
            fx.switch(PortRole::Mode(PortMode::Dfp), Duration::from_millis(50)),
            err(eq(&Error::Timeout))
        );
        assert_that!(start.elapsed() >= Duration::from_millis(50), is_true());
        assert_that!(fx.read("sys/class/typec/port0/port_type"), eq(DUAL_ROLE));
    }

    #[rstest]
    fn mode_switch_confirmed_by_attach(fx: Fixture) {
        let fx = Arc::new(fx);
        let attacher = {
            let fx = fx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                fx.signal.partner_attached();
            })
        };

        assert_that!(
            fx.switch(PortRole::Mode(PortMode::Ufp), Duration::from_secs(10)),
            ok(anything())
        );
        assert_that!(fx.read("sys/class/typec/port0/port_type"), eq("sink"));
        attacher.join().unwrap();
    }

    #[rstest]
    fn stale_attach_does_not_confirm(fx: Fixture) {
        fx.signal.partner_attached();

        assert_that!(
            fx.switch(PortRole::Mode(PortMode::Dfp), Duration::from_millis(20)),
            err(eq(&Error::Timeout))
        );
    }

    #[rstest]
    fn mode_write_failure_falls_back(fx: Fixture) {
        fs::remove_file(fx.dir.path().join("sys/class/typec/port0/port_type")).unwrap();
        fs::remove_file(fx.dir.path().join("sys/class/typec/port0/data_role")).unwrap();

        assert_that!(
            fx.switch(PortRole::Mode(PortMode::Dfp), Duration::from_secs(10)),
            err(eq(&Error::Io(std::io::ErrorKind::NotFound)))
        );
    }
}
