mod print;
mod styles;

use std::{process::ExitCode, sync::Arc, time::Duration};

use bpaf::{Bpaf, Parser};
use camino::Utf8PathBuf;
use log::{error, info};
use owo_colors::Stream::{Stderr, Stdout};
use tokio::signal::unix::{signal, SignalKind};
use typec_hal::{
    config::Config,
    observer::{DeliveryError, Observer},
    props::{MemoryProperties, PropertyStore, SystemProperties},
    types::*,
    Coordinator,
};

use crate::styles::StyleApply;

#[derive(Debug, Clone, Bpaf)]
struct OptionsConfig {
    /// Directory that sysfs and configfs paths are resolved against.
    #[bpaf(long, env("TYPEC_HAL_SYSROOT"), argument("DIR"), fallback(Utf8PathBuf::from("/")))]
    sysroot: Utf8PathBuf,
    /// How long a mode switch waits for the partner to attach, in
    /// milliseconds.
    #[bpaf(long, env("TYPEC_HAL_TIMEOUT_MS"), argument("MS"), fallback(8000))]
    timeout_ms: u64,
    /// The port with contaminant detection, whose power operation mode drives
    /// the gadget power budget.
    #[bpaf(long, env("TYPEC_HAL_PRIMARY_PORT"), argument("PORT"))]
    primary_port: Option<PortName>,
    /// Keep properties in memory instead of using getprop/setprop.
    memory_props: bool,
}

impl OptionsConfig {
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            sysroot: self.sysroot.clone(),
            primary_port: self
                .primary_port
                .clone()
                .unwrap_or(defaults.primary_port.clone()),
            role_switch_timeout: Duration::from_millis(self.timeout_ms),
            ..defaults
        }
    }

    fn props(&self) -> Arc<dyn PropertyStore> {
        if self.memory_props {
            Arc::new(MemoryProperties::new())
        } else {
            Arc::new(SystemProperties)
        }
    }
}

#[derive(Debug, Clone, Bpaf)]
struct OptionsStatus {
    /// Which status shape to read: legacy, modes, or contaminant.
    #[bpaf(long, argument("SHAPE"), fallback(StatusShape::Contaminant))]
    shape: StatusShape,
}

#[derive(Debug, Clone, Bpaf)]
struct OptionsSwitch {
    /// Port to switch, e.g. port0.
    #[bpaf(positional("PORT"))]
    port: String,
    /// What to switch: power, data, or mode.
    #[bpaf(positional("TYPE"))]
    role_type: RoleType,
    /// The role to switch to: source/sink, host/device, or ufp/dfp/drp.
    #[bpaf(positional("ROLE"))]
    role: String,
}

#[derive(Debug, Clone, Bpaf)]
enum OptionsCommand {
    #[bpaf(command)]
    /// Handle uevents and log port status changes until interrupted.
    Serve,
    #[bpaf(command)]
    /// Print the status of all Type-C ports.
    Status(#[bpaf(external(options_status))] OptionsStatus),
    #[bpaf(command)]
    /// Switch a port's power role, data role, or mode.
    Switch(#[bpaf(external(options_switch))] OptionsSwitch),
}

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options)]
struct Options {
    #[bpaf(external(options_config))]
    config: OptionsConfig,
    #[bpaf(external(options_command))]
    command: OptionsCommand,
}

/// Logs every notification.
struct LogObserver;

impl Observer for LogObserver {
    fn notify_port_status_change(
        &self,
        ports: &[PortStatus],
        status: Status,
    ) -> Result<(), DeliveryError> {
        info!("Port status ({status}):");
        for port in ports {
            info!(
                "  {}: connected:{} power:{:?} data:{:?} mode:{:?}",
                port.port, port.connected, port.power_role, port.data_role, port.mode
            );
        }
        Ok(())
    }

    fn notify_role_switch_status(
        &self,
        port: &PortName,
        role: PortRole,
        status: Status,
    ) -> Result<(), DeliveryError> {
        info!("Role switch {port} {role}: {status}");
        Ok(())
    }
}

fn print_error(err: impl std::fmt::Display) {
    eprintln!(
        "{} {}",
        "error:".style_if_supported(Stderr, styles::error_label()),
        format_args!("{err}").style_if_supported(Stderr, styles::error_body())
    );
}

async fn do_serve(coordinator: Coordinator) -> ExitCode {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            error!("Failed to listen for SIGTERM: {err}");
            return ExitCode::FAILURE;
        }
    };

    coordinator.set_observer(Some(Arc::new(LogObserver)));
    if !coordinator.is_watching() {
        return ExitCode::FAILURE;
    }
    coordinator.query_port_status();
    info!("Waiting for events...");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error!("Failed to listen for SIGINT: {err}");
            }
        }
        _ = terminate.recv() => {}
    }

    info!("Shutting down");
    coordinator.set_observer(None);
    ExitCode::SUCCESS
}

fn do_status(coordinator: &Coordinator, opts: OptionsStatus) -> ExitCode {
    match coordinator.port_status(opts.shape) {
        Ok(ports) => {
            print::print_ports(&ports);
            ExitCode::SUCCESS
        }
        Err(err) => {
            print_error(err);
            ExitCode::FAILURE
        }
    }
}

fn do_switch(coordinator: &Coordinator, opts: OptionsSwitch) -> ExitCode {
    let role = match PortRole::parse(opts.role_type, &opts.role) {
        Ok(role) => role,
        Err(err) => {
            print_error(format_args!(
                "{:?} is not a {} role: {err}",
                opts.role, opts.role_type
            ));
            return ExitCode::FAILURE;
        }
    };

    match coordinator.switch_role(&opts.port, role) {
        Ok(()) => {
            println!(
                "{} {} {}",
                "Switched".style_if_supported(Stdout, styles::success()),
                opts.port,
                role
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            print_error(err);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = options().run();

    let coordinator = match Coordinator::new(opts.config.config(), opts.config.props()) {
        Ok(coordinator) => coordinator,
        Err(err) => {
            print_error(format_args!("{}: {err}", opts.config.sysroot));
            return ExitCode::FAILURE;
        }
    };

    match opts.command {
        OptionsCommand::Serve => do_serve(coordinator).await,
        OptionsCommand::Status(opts) => do_status(&coordinator, opts),
        OptionsCommand::Switch(opts) => do_switch(&coordinator, opts),
    }
}
