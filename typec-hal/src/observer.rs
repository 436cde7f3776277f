//! Delivering port status and role switch results to an external observer.

use log::{debug, error};
use thiserror::Error;

use crate::types::*;

/// An error reported by an [`Observer`] when a notification could not be
/// delivered. These are logged and otherwise ignored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// The receiver of asynchronous port notifications.
///
/// At most one observer is registered with a
/// [`Coordinator`](crate::Coordinator) at a time; the kernel event thread only
/// runs while one is.
pub trait Observer: Send + Sync {
    /// The status shape this observer understands. Defaults to the richest
    /// one.
    fn shape(&self) -> StatusShape {
        StatusShape::Contaminant
    }

    fn notify_port_status_change(
        &self,
        ports: &[PortStatus],
        status: Status,
    ) -> Result<(), DeliveryError>;

    fn notify_role_switch_status(
        &self,
        port: &PortName,
        role: PortRole,
        status: Status,
    ) -> Result<(), DeliveryError>;
}

pub(crate) fn deliver_port_status(
    observer: Option<&dyn Observer>,
    ports: &[PortStatus],
    status: Status,
) {
    let Some(observer) = observer else {
        debug!("Not notifying port status, no observer registered");
        return;
    };

    if let Err(err) = observer.notify_port_status_change(ports, status) {
        error!("Port status notification failed: {err}");
    }
}

pub(crate) fn deliver_role_switch(
    observer: Option<&dyn Observer>,
    port: &PortName,
    role: PortRole,
    status: Status,
) {
    let Some(observer) = observer else {
        error!("Not notifying role switch result for {port}, no observer registered");
        return;
    };

    if let Err(err) = observer.notify_role_switch_status(port, role, status) {
        error!("Role switch notification failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use googletest::prelude::*;

    use super::*;

    #[derive(Default)]
    struct Failing {
        calls: Mutex<u32>,
    }

    impl Observer for Failing {
        fn notify_port_status_change(
            &self,
            _ports: &[PortStatus],
            _status: Status,
        ) -> std::result::Result<(), DeliveryError> {
            *self.calls.lock().unwrap() += 1;
            Err(DeliveryError("dead object".to_owned()))
        }

        fn notify_role_switch_status(
            &self,
            _port: &PortName,
            _role: PortRole,
            _status: Status,
        ) -> std::result::Result<(), DeliveryError> {
            *self.calls.lock().unwrap() += 1;
            Err(DeliveryError("dead object".to_owned()))
        }
    }

    #[test]
    fn delivery_failures_are_swallowed() {
        let observer = Failing::default();
        let port = PortName::new("port0").unwrap();

        deliver_port_status(Some(&observer), &[], Status::Error);
        deliver_role_switch(
            Some(&observer),
            &port,
            PortRole::Power(PowerRole::Sink),
            Status::Success,
        );
        deliver_role_switch(None, &port, PortRole::Data(DataRole::Host), Status::Error);

        assert_that!(*observer.calls.lock().unwrap(), eq(2));
        assert_that!(observer.shape(), eq(StatusShape::Contaminant));
    }
}
