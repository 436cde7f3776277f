//! The configfs USB gadget: its power budget and UDC binding.

use camino::{Utf8Path, Utf8PathBuf};
use log::{error, info, warn};

use crate::{sysfs::Sysfs, types::POWER_DELIVERY_MODE, Result};

const MAX_POWER: &str = "MaxPower";
const BM_ATTRIBUTES: &str = "bmAttributes";

/// The power attributes of a gadget configuration, kept exactly as read so
/// they can be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerBudget {
    pub max_power: String,
    pub attributes: String,
}

impl PowerBudget {
    /// Draws no bus power and reports the gadget as self-powered.
    pub fn self_powered() -> Self {
        Self {
            max_power: "0".to_owned(),
            attributes: "0xc0".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Gadget<'a> {
    sysfs: &'a Sysfs,
    dir: &'a Utf8Path,
    config: &'a str,
}

impl<'a> Gadget<'a> {
    pub fn new(sysfs: &'a Sysfs, dir: &'a Utf8Path, config: &'a str) -> Self {
        Self { sysfs, dir, config }
    }

    fn config_attr(&self, name: &str) -> Utf8PathBuf {
        self.dir.join("configs").join(self.config).join(name)
    }

    pub fn read_budget(&self) -> Result<PowerBudget> {
        Ok(PowerBudget {
            max_power: self.sysfs.read_raw(self.config_attr(MAX_POWER))?,
            attributes: self.sysfs.read_raw(self.config_attr(BM_ATTRIBUTES))?,
        })
    }

    /// Writes both attributes, even if the first fails.
    pub fn write_budget(&self, budget: &PowerBudget) -> Result<()> {
        let max_power = self
            .sysfs
            .write(self.config_attr(MAX_POWER), &budget.max_power);
        let attributes = self
            .sysfs
            .write(self.config_attr(BM_ATTRIBUTES), &budget.attributes);
        max_power.and(attributes)
    }

    /// Binds the gadget to the named USB device controller.
    pub fn bind_udc(&self, udc: &str) -> Result<()> {
        info!("Binding UDC {udc} to ConfigFS");
        self.sysfs.write(self.dir.join("UDC"), udc)
    }
}

/// Tracks the primary port's power operation mode, overriding the gadget's
/// power budget while power delivery is negotiated.
#[derive(Debug, Default)]
pub struct BudgetOverride {
    mode: Option<String>,
    saved: Option<PowerBudget>,
}

impl BudgetOverride {
    /// Whether a saved budget is waiting to be restored.
    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }

    pub fn observe(&mut self, gadget: &Gadget<'_>, mode: &str) {
        if self.mode.as_deref() == Some(mode) {
            info!("uevent received for same power operation mode {mode}");
            return;
        }
        self.mode = Some(mode.to_owned());

        if mode == POWER_DELIVERY_MODE {
            if self.saved.is_none() {
                match gadget.read_budget() {
                    Ok(budget) => self.saved = Some(budget),
                    Err(err) => warn!("Failed to save gadget power budget: {err}"),
                }
            }
            if let Err(err) = gadget.write_budget(&PowerBudget::self_powered()) {
                error!("Failed to override gadget power budget: {err}");
            }
        } else if let Some(saved) = self.saved.take() {
            if let Err(err) = gadget.write_budget(&saved) {
                error!("Failed to restore gadget power budget: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use googletest::prelude::*;
    use rstest::*;

    use super::*;

    struct Fixture {
        dir: tempfile::TempDir,
        sysfs: Sysfs,
    }

    impl Fixture {
        fn gadget(&self) -> Gadget<'_> {
            Gadget::new(&self.sysfs, Utf8Path::new("config/usb_gadget/g1"), "b.1")
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(
                self.dir
                    .path()
                    .join("config/usb_gadget/g1/configs/b.1")
                    .join(name),
            )
            .unwrap()
        }
    }

    #[fixture]
    fn fx() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config/usb_gadget/g1/configs/b.1");
        fs::create_dir_all(&config).unwrap();
        fs::write(config.join(MAX_POWER), "500\n").unwrap();
        fs::write(config.join(BM_ATTRIBUTES), "0x80\n").unwrap();
        fs::write(dir.path().join("config/usb_gadget/g1/UDC"), "").unwrap();

        let sysfs = Sysfs::open(dir.path().to_str().unwrap()).unwrap();
        Fixture { dir, sysfs }
    }

    #[rstest]
    fn override_and_restore(fx: Fixture) {
        let gadget = fx.gadget();
        let mut budget = BudgetOverride::default();

        budget.observe(&gadget, POWER_DELIVERY_MODE);
        assert_that!(budget.is_active(), is_true());
        assert_that!(fx.read(MAX_POWER), eq("0"));
        assert_that!(fx.read(BM_ATTRIBUTES), eq("0xc0"));

        budget.observe(&gadget, "default");
        assert_that!(budget.is_active(), is_false());
        assert_that!(fx.read(MAX_POWER), eq("500\n"));
        assert_that!(fx.read(BM_ATTRIBUTES), eq("0x80\n"));

        // Nothing saved anymore, so leaving again writes nothing.
        fs::write(fx.dir.path().join("config/usb_gadget/g1/configs/b.1/MaxPower"), "2").unwrap();
        budget.observe(&gadget, "3.0A");
        assert_that!(fx.read(MAX_POWER), eq("2"));
    }

    #[rstest]
    #[case("default")]
    #[case("1.5A")]
    #[case("3.0A")]
    #[case("unknown")]
    fn any_other_mode_restores(fx: Fixture, #[case] mode: &str) {
        let gadget = fx.gadget();
        let mut budget = BudgetOverride::default();

        budget.observe(&gadget, POWER_DELIVERY_MODE);
        budget.observe(&gadget, mode);

        assert_that!(budget.is_active(), is_false());
        assert_that!(fx.read(MAX_POWER), eq("500\n"));
        assert_that!(fx.read(BM_ATTRIBUTES), eq("0x80\n"));
    }

    #[rstest]
    fn repeated_mode_is_ignored(fx: Fixture) {
        let gadget = fx.gadget();
        let mut budget = BudgetOverride::default();

        budget.observe(&gadget, POWER_DELIVERY_MODE);
        budget.observe(&gadget, POWER_DELIVERY_MODE);
        budget.observe(&gadget, "default");

        assert_that!(fx.read(MAX_POWER), eq("500\n"));
    }

    #[rstest]
    fn missing_gadget_is_tolerated(fx: Fixture) {
        fs::remove_dir_all(fx.dir.path().join("config")).unwrap();
        let gadget = fx.gadget();
        let mut budget = BudgetOverride::default();

        budget.observe(&gadget, POWER_DELIVERY_MODE);
        assert_that!(budget.is_active(), is_false());
        budget.observe(&gadget, "default");
        budget.observe(&gadget, POWER_DELIVERY_MODE);
        assert_that!(budget.is_active(), is_false());
    }

    #[rstest]
    fn binds_udc(fx: Fixture) {
        fx.gadget().bind_udc("a600000.dwc3").unwrap();

        assert_that!(
            fs::read_to_string(fx.dir.path().join("config/usb_gadget/g1/UDC")).unwrap(),
            eq("a600000.dwc3")
        );
    }
}
