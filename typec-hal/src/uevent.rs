//! Kernel uevents: the netlink socket they arrive on, and sorting them into
//! the handful of kinds the coordinator reacts to.

use std::{borrow::Cow, io::IoSliceMut};

use camino::{Utf8Path, Utf8PathBuf};
use nix::sys::socket::{
    bind, recvmsg, setsockopt, socket, sockopt, AddressFamily, MsgFlags, NetlinkAddr, SockFlag,
    SockProtocol, SockType,
};
use regex::Regex;
use rustix::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use strum::{Display, EnumString};

use crate::{Error, Result};

/// A netlink socket subscribed to kernel uevents.
#[derive(Debug)]
pub struct UeventSocket {
    fd: OwnedFd,
}

impl UeventSocket {
    const UEVENT_GROUPS_KERNEL: u32 = 1;
    const RECV_BUFFER_SIZE: usize = 64 * 1024;
    // From linux/kobject.h
    const UEVENT_BUFFER_SIZE: usize = 2048;

    /// Opens a non-blocking socket.
    pub fn open() -> Result<Self> {
        let fd = socket(
            AddressFamily::Netlink,
            SockType::Raw,
            SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
            SockProtocol::NetlinkKObjectUEvent,
        )?;
        setsockopt(&fd, sockopt::RcvBuf, &Self::RECV_BUFFER_SIZE)?;
        bind(
            fd.as_raw_fd(),
            &NetlinkAddr::new(0, Self::UEVENT_GROUPS_KERNEL),
        )?;
        Ok(Self { fd })
    }

    /// Reads a single message.
    ///
    /// Returns `None` for messages that should be skipped: ones not sent by
    /// the kernel, and ones that filled the whole buffer and so may have been
    /// cut off. Fails with [`std::io::ErrorKind::WouldBlock`] once drained.
    pub fn read_message(&self) -> Result<Option<Vec<u8>>> {
        let mut uevent_buf = vec![0; Self::UEVENT_BUFFER_SIZE];

        let bytes = {
            let mut iov = [IoSliceMut::new(&mut uevent_buf)];
            let msg = recvmsg::<NetlinkAddr>(
                self.fd.as_raw_fd(),
                &mut iov,
                None,
                MsgFlags::empty(),
            )?;

            // Ignore unknown senders.
            let Some(addr) = msg.address else {
                return Ok(None);
            };
            if addr.pid() != 0 || addr.groups() != Self::UEVENT_GROUPS_KERNEL {
                return Ok(None);
            }

            msg.bytes
        };

        if bytes >= Self::UEVENT_BUFFER_SIZE {
            return Ok(None);
        }

        uevent_buf.truncate(bytes);
        Ok(Some(uevent_buf))
    }
}

impl AsFd for UeventSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// The `action@devpath` line a uevent starts with.
pub fn header(msg: &[u8]) -> Cow<'_, str> {
    let end = msg.iter().position(|&b| b == 0).unwrap_or(msg.len());
    String::from_utf8_lossy(&msg[..end])
}

/// The `KEY=value` fields following the header.
pub fn fields(msg: &[u8]) -> impl Iterator<Item = Cow<'_, str>> {
    msg.split(|&b| b == 0)
        .skip(1)
        .filter(|field| !field.is_empty())
        .map(String::from_utf8_lossy)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum UdcAction {
    Add,
    Remove,
}

/// A classified uevent, with whatever the handler needs from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Something beneath a Type-C port changed.
    Typec { partner_added: bool },
    /// The USB power supply changed. `name` is its `POWER_SUPPLY_NAME`, if
    /// the event carried one.
    PowerSupply { name: Option<String> },
    /// A USB device was added behind the xHCI controller.
    DeviceAdded { device: Utf8PathBuf },
    /// A driver bound to one of a device's interfaces.
    InterfaceBound {
        device: Utf8PathBuf,
        interface: String,
    },
    /// The gadget's USB device controller appeared or went away.
    Udc { action: UdcAction },
    /// The xHCI controller went offline; `controller` is the platform device
    /// whose mode should be cycled.
    ControllerOffline { controller: String },
}

#[derive(Debug)]
enum Matcher {
    Contains(&'static str),
    Regex(Regex),
}

impl Matcher {
    fn regex(pattern: &str) -> Result<Self> {
        // Anchored, as the whole header has to match.
        Ok(Matcher::Regex(Regex::new(&format!("^(?:{pattern})$"))?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Typec,
    PowerSupply,
    DeviceAdd,
    InterfaceBind,
    Udc,
    Offline,
}

#[derive(Debug)]
struct Rule {
    family: Family,
    matcher: Matcher,
}

const XHCI_DEVICE: &str = r"/devices/platform/soc/.*dwc3/xhci-hcd\.\d\.auto/usb\d/\d-\d(?:/[\d\.-]+)*";

/// An ordered list of uevent rules, where the first matching rule decides the
/// route.
#[derive(Debug)]
pub struct Classifier {
    rules: Vec<Rule>,
    dwc3: Regex,
}

impl Classifier {
    /// Builds the rules. The gadget controller rule is left out when no
    /// controller name is known.
    pub fn new(controller: &str) -> Result<Self> {
        let mut rules = vec![
            Rule {
                family: Family::Typec,
                matcher: Matcher::Contains("typec/port"),
            },
            Rule {
                family: Family::PowerSupply,
                matcher: Matcher::Contains("power_supply/usb"),
            },
            Rule {
                family: Family::DeviceAdd,
                matcher: Matcher::regex(&format!("add@({XHCI_DEVICE})"))?,
            },
            Rule {
                family: Family::InterfaceBind,
                matcher: Matcher::regex(&format!("bind@({XHCI_DEVICE})/([^/]*:[^/]*)"))?,
            },
        ];

        if !controller.is_empty() {
            let controller = regex::escape(controller);
            rules.push(Rule {
                family: Family::Udc,
                matcher: Matcher::regex(&format!(
                    "(add|remove)@/devices/platform/soc/.*/{controller}/udc/{controller}"
                ))?,
            });
        }

        rules.push(Rule {
            family: Family::Offline,
            matcher: Matcher::regex(r"offline@(/devices/platform/.*dwc3/xhci-hcd\.\d\.auto/usb.*)")?,
        });

        Ok(Self {
            rules,
            dwc3: Regex::new(r"/(\w+.\w+usb)/.*dwc3")?,
        })
    }

    /// Classifies a raw uevent. Interface binds are only considered when
    /// `ignore_wakeup` is unset.
    pub fn classify(&self, msg: &[u8], ignore_wakeup: bool) -> Option<Route> {
        let header = header(msg);

        for rule in &self.rules {
            if rule.family == Family::InterfaceBind && ignore_wakeup {
                continue;
            }

            let captures = match &rule.matcher {
                Matcher::Contains(needle) => {
                    if !header.contains(needle) {
                        continue;
                    }
                    None
                }
                Matcher::Regex(regex) => match regex.captures(&header) {
                    Some(captures) => Some(captures),
                    None => continue,
                },
            };
            let group = |i| {
                captures
                    .as_ref()
                    .and_then(|c| c.get(i))
                    .map_or("", |m| m.as_str())
            };

            return match rule.family {
                Family::Typec => Some(Route::Typec {
                    partner_added: header.starts_with("add@") && header.ends_with("-partner"),
                }),
                Family::PowerSupply => Some(Route::PowerSupply {
                    name: fields(msg).find_map(|field| {
                        field
                            .strip_prefix("POWER_SUPPLY_NAME=")
                            .map(str::to_owned)
                    }),
                }),
                Family::DeviceAdd => Some(Route::DeviceAdded {
                    device: sys_path(group(1)),
                }),
                Family::InterfaceBind => Some(Route::InterfaceBound {
                    device: sys_path(group(1)),
                    interface: group(2).to_owned(),
                }),
                Family::Udc => group(1)
                    .parse()
                    .ok()
                    .map(|action| Route::Udc { action }),
                Family::Offline => self.dwc3.captures(&header).map(|c| Route::ControllerOffline {
                    controller: c[1].to_owned(),
                }),
            };
        }

        None
    }
}

fn sys_path(devpath: &str) -> Utf8PathBuf {
    Utf8Path::new("/sys").join(devpath.trim_start_matches('/'))
}

impl From<regex::Error> for Error {
    fn from(_: regex::Error) -> Self {
        Error::Parse
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;
    use rstest::*;

    use super::*;

    const DEVICE: &str =
        "/devices/platform/soc/a600000.ssusb/a600000.dwc3/xhci-hcd.0.auto/usb1/1-1";

    #[fixture]
    fn classifier() -> Classifier {
        Classifier::new("a600000.dwc3").unwrap()
    }

    fn route(classifier: &Classifier, msg: &str) -> Option<Route> {
        classifier.classify(msg.as_bytes(), false)
    }

    #[test]
    fn header_and_fields() {
        let msg = b"change@/devices/x\0ACTION=change\0\xffBAD\0";

        assert_that!(header(msg), eq("change@/devices/x"));
        assert_that!(
            fields(msg).collect::<Vec<_>>(),
            elements_are![eq("ACTION=change"), eq("\u{fffd}BAD")]
        );
        assert_that!(header(b"no-nul"), eq("no-nul"));
    }

    #[rstest]
    fn partner_add(classifier: Classifier) {
        assert_that!(
            route(
                &classifier,
                "add@/devices/platform/soc/c440000.spmi/typec/port0/port0-partner\0ACTION=add\0"
            ),
            some(eq(&Route::Typec {
                partner_added: true
            }))
        );
        assert_that!(
            route(
                &classifier,
                "remove@/devices/platform/soc/c440000.spmi/typec/port0/port0-partner\0"
            ),
            some(eq(&Route::Typec {
                partner_added: false
            }))
        );
        assert_that!(
            route(&classifier, "change@/devices/virtual/typec/port0\0"),
            some(eq(&Route::Typec {
                partner_added: false
            }))
        );
    }

    #[rstest]
    fn power_supply_name(classifier: Classifier) {
        assert_that!(
            route(
                &classifier,
                "change@/devices/virtual/power_supply/usb\0ACTION=change\0POWER_SUPPLY_NAME=usb\0"
            ),
            some(eq(&Route::PowerSupply {
                name: Some("usb".to_owned())
            }))
        );
        assert_that!(
            route(&classifier, "change@/devices/virtual/power_supply/usb\0"),
            some(eq(&Route::PowerSupply { name: None }))
        );
    }

    #[rstest]
    fn device_add(classifier: Classifier) {
        assert_that!(
            route(&classifier, &format!("add@{DEVICE}/1-1.2\0")),
            some(eq(&Route::DeviceAdded {
                device: Utf8PathBuf::from(format!("/sys{DEVICE}/1-1.2"))
            }))
        );
        // Interfaces are not devices.
        assert_that!(route(&classifier, &format!("add@{DEVICE}/1-1:1.0\0")), none());
    }

    #[rstest]
    fn interface_bind(classifier: Classifier) {
        let msg = format!("bind@{DEVICE}/1-1:1.0\0");

        assert_that!(
            route(&classifier, &msg),
            some(eq(&Route::InterfaceBound {
                device: Utf8PathBuf::from(format!("/sys{DEVICE}")),
                interface: "1-1:1.0".to_owned(),
            }))
        );
        assert_that!(classifier.classify(msg.as_bytes(), true), none());
    }

    #[rstest]
    #[case("add", UdcAction::Add)]
    #[case("remove", UdcAction::Remove)]
    fn udc(classifier: Classifier, #[case] action: &str, #[case] expected: UdcAction) {
        assert_that!(
            route(
                &classifier,
                &format!("{action}@/devices/platform/soc/a600000.ssusb/a600000.dwc3/udc/a600000.dwc3\0")
            ),
            some(eq(&Route::Udc { action: expected }))
        );
    }

    #[test]
    fn udc_needs_controller() {
        let classifier = Classifier::new("").unwrap();

        assert_that!(
            route(
                &classifier,
                "add@/devices/platform/soc/a600000.ssusb/a600000.dwc3/udc/a600000.dwc3\0"
            ),
            none()
        );
    }

    #[rstest]
    fn controller_offline(classifier: Classifier) {
        assert_that!(
            route(&classifier, &format!("offline@{DEVICE}\0")),
            some(eq(&Route::ControllerOffline {
                controller: "a600000.ssusb".to_owned()
            }))
        );
    }

    #[rstest]
    fn typec_wins_over_later_rules(classifier: Classifier) {
        assert_that!(
            route(
                &classifier,
                "add@/devices/platform/soc/x.dwc3/xhci-hcd.0.auto/usb1/1-1/typec/port0\0"
            ),
            some(eq(&Route::Typec {
                partner_added: false
            }))
        );
    }

    #[rstest]
    #[case("change@/devices/virtual/misc/uhid\0")]
    #[case("add@/devices/platform/soc/a600000.ssusb/a600000.dwc3/udc/other.dwc3\0")]
    #[case("")]
    fn unmatched_is_ignored(classifier: Classifier, #[case] msg: &str) {
        assert_that!(route(&classifier, msg), none());
    }
}
