use std::fmt;

use owo_colors::Stream::Stdout;
use typec_hal::types::*;

use crate::styles::{self, StyleApply};

#[derive(Clone, Copy)]
enum TreeLevel {
    Property(&'static str),
    Child,
}

#[derive(Clone, Copy)]
enum TreePos {
    Root,
    Child { depth: usize, level: TreeLevel },
}

macro_rules! styled_fmt {
    ($style:ident, $($args:tt)*) => {
        format_args!($($args)*).style_if_supported(Stdout, styles::$style())
    }
}

macro_rules! print_line {
    ($printer:expr, $($args:tt)*) => {
        $printer.line(format_args!($($args)*))
    }
}

macro_rules! print_line_styled {
    ($printer:expr, $style:ident, $($args:tt)*) => {
        print_line!($printer, "{}", styled_fmt!($style, $($args)*))
    }
}

#[derive(Clone, Copy)]
pub struct TreePrinter {
    pos: TreePos,
}

impl TreePrinter {
    pub fn root() -> Self {
        Self { pos: TreePos::Root }
    }

    fn level(&self, level: TreeLevel) -> Self {
        let depth = match self.pos {
            TreePos::Root => 0,
            TreePos::Child { depth, .. } => depth + 1,
        };
        Self {
            pos: TreePos::Child { depth, level },
        }
    }

    pub fn line(&self, args: fmt::Arguments<'_>) {
        if let TreePos::Child { depth, level } = self.pos {
            for _ in 0..depth {
                print!("│   ");
            }

            match level {
                TreeLevel::Property(name) => print!(
                    "{}   {} ",
                    styled_fmt!(property_star, "✱"),
                    styled_fmt!(label, "{name}:")
                ),
                TreeLevel::Child => print!("│── "),
            }
        }

        println!("{}", args);
    }

    pub fn property(&self, name: &'static str) -> Self {
        self.level(TreeLevel::Property(name))
    }

    pub fn child(&self) -> Self {
        self.level(TreeLevel::Child)
    }

    fn opening(&self, prefix: impl fmt::Display) {
        print_line!(
            self,
            "{}{}",
            styled_fmt!(tree_opening, "{prefix}"),
            // Style this separately, in case 'prefix' changed the active
            // styles.
            styled_fmt!(tree_opening, ":")
        );
    }
}

fn print_role(p: TreePrinter, role: Option<impl fmt::Display>) {
    match role {
        Some(role) => print_line_styled!(p, literal, "{role}"),
        None => print_line_styled!(p, dim, "none"),
    }
}

fn print_flag(p: TreePrinter, flag: bool) {
    print_line_styled!(p, special, "{flag}");
}

fn print_contaminant(p: TreePrinter, info: &ContaminantInfo) {
    print_line_styled!(
        p.property("Contaminant detection"),
        special,
        "{}",
        info.detection_status
    );
    print_line_styled!(
        p.property("Contaminant protection"),
        special,
        "{}",
        info.protection_status
    );

    let modes = info
        .supported_protection_modes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if modes.is_empty() {
        print_line_styled!(p.property("Protection modes"), dim, "(none)");
    } else {
        print_line_styled!(p.property("Protection modes"), literal, "{}", modes.join(", "));
    }
}

pub fn print_port(p: TreePrinter, port: &PortStatus) {
    p.opening(format_args!(
        "Port {}",
        styled_fmt!(port_name, "{}", port.port)
    ));

    print_flag(p.property("Connected"), port.connected);
    print_role(p.property("Power role"), port.power_role);
    print_role(p.property("Data role"), port.data_role);
    print_role(p.property("Mode"), port.mode);
    print_flag(p.property("Can change mode"), port.can_change_mode);
    print_flag(p.property("Can change data role"), port.can_change_data_role);
    print_flag(p.property("Can change power role"), port.can_change_power_role);

    let modes = port
        .supported_modes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    print_line_styled!(p.property("Supported modes"), literal, "{}", modes.join(", "));

    if let Some(info) = &port.contaminant {
        print_contaminant(p, info);
    }
}

pub fn print_ports(ports: &[PortStatus]) {
    let p = TreePrinter::root();
    p.opening("Ports");

    let p = p.child();
    if ports.is_empty() {
        print_line_styled!(p, dim, "(none)");
    }
    for port in ports {
        print_port(p, port);
    }
}
