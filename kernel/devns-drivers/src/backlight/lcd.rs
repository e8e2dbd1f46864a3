//! LCD class device.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;

use devns_core::task::Task;
use devns_core::DevError;

use super::{gate_store, parse_u32};

/// Hardware callbacks of an LCD driver.
///
/// Panels without contrast control keep the default contrast callbacks,
/// which report [`DevError::NoDevice`] on reads and ignore writes.
pub trait LcdOps: Send + Sync {
    /// Sets the power state (`FB_BLANK_*`).
    ///
    /// # Errors
    ///
    /// Driver-specific.
    fn set_power(&self, power: u32) -> Result<(), DevError>;

    /// Reads the power state.
    ///
    /// # Errors
    ///
    /// Driver-specific.
    fn get_power(&self) -> Result<u32, DevError>;

    /// Sets the contrast.
    ///
    /// # Errors
    ///
    /// Driver-specific.
    fn set_contrast(&self, contrast: u32) -> Result<(), DevError> {
        let _ = contrast;
        Ok(())
    }

    /// Reads the contrast.
    ///
    /// # Errors
    ///
    /// [`DevError::NoDevice`] unless overridden.
    fn get_contrast(&self) -> Result<u32, DevError> {
        Err(DevError::NoDevice)
    }
}

/// Static LCD properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LcdProperties {
    /// Largest contrast value.
    pub max_contrast: u32,
}

/// LCD sysfs attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcdAttr {
    /// `lcd_power`, read-write.
    LcdPower,
    /// `contrast`, read-write.
    Contrast,
    /// `max_contrast`, read-only.
    MaxContrast,
}

impl LcdAttr {
    /// Every attribute, in sysfs listing order.
    pub const ALL: [Self; 3] = [Self::LcdPower, Self::Contrast, Self::MaxContrast];

    /// Attribute file name.
    pub fn name(self) -> &'static str {
        match self {
            Self::LcdPower => "lcd_power",
            Self::Contrast => "contrast",
            Self::MaxContrast => "max_contrast",
        }
    }

    /// Looks an attribute up by file name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

/// A registered LCD.
pub struct LcdDevice {
    name: String,
    ops: Arc<dyn LcdOps>,
    props: LcdProperties,
}

impl LcdDevice {
    pub(super) fn new(name: &str, ops: Arc<dyn LcdOps>, props: LcdProperties) -> Self {
        Self {
            name: name.to_string(),
            ops,
            props,
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads an attribute, newline-terminated.
    ///
    /// # Errors
    ///
    /// Whatever the driver's getter reports.
    pub fn show(&self, attr: LcdAttr) -> Result<String, DevError> {
        let value = match attr {
            LcdAttr::LcdPower => self.ops.get_power()?,
            LcdAttr::Contrast => self.ops.get_contrast()?,
            LcdAttr::MaxContrast => self.props.max_contrast,
        };
        Ok(format!("{value}\n"))
    }

    /// Writes an attribute on behalf of `task`. Stores from a background
    /// namespace are consumed without effect.
    ///
    /// # Errors
    ///
    /// - [`DevError::PermissionDenied`] for `max_contrast`.
    /// - [`DevError::InvalidArgument`] for a malformed number.
    /// - Whatever the driver's setter reports.
    pub fn store(&self, task: &Task, attr: LcdAttr, buf: &[u8]) -> Result<usize, DevError> {
        let set: fn(&dyn LcdOps, u32) -> Result<(), DevError> = match attr {
            LcdAttr::LcdPower => |ops, v| ops.set_power(v),
            LcdAttr::Contrast => |ops, v| ops.set_contrast(v),
            LcdAttr::MaxContrast => return Err(DevError::PermissionDenied),
        };
        gate_store(task, buf, |buf| {
            let value = parse_u32(buf)?;
            set(&*self.ops, value)?;
            log::debug!("backlight: lcd {} {} set to {value}", self.name, attr.name());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use devns_core::{Credentials, DevNsRegistry, NsTag, Pid};

    #[derive(Default)]
    struct Panel {
        power: AtomicU32,
    }

    impl LcdOps for Panel {
        fn set_power(&self, power: u32) -> Result<(), DevError> {
            self.power.store(power, Ordering::Relaxed);
            Ok(())
        }

        fn get_power(&self) -> Result<u32, DevError> {
            Ok(self.power.load(Ordering::Relaxed))
        }
    }

    fn device() -> (Arc<Panel>, LcdDevice) {
        let panel = Arc::new(Panel::default());
        let dev = LcdDevice::new("lcd0", panel.clone(), LcdProperties { max_contrast: 63 });
        (panel, dev)
    }

    #[test]
    fn power_follows_active_namespace() {
        let registry = DevNsRegistry::new();
        let ns = registry.create_namespace(Pid::new(300), NsTag::from_name("bg")).unwrap();
        let host = Task::new(1, registry.root(), Credentials::root());
        let guest = Task::new(301, &ns, Credentials::root());
        let (panel, dev) = device();

        assert_eq!(dev.store(&guest, LcdAttr::LcdPower, b"4\n"), Ok(2));
        assert_eq!(panel.power.load(Ordering::Relaxed), 0);
        assert_eq!(dev.store(&host, LcdAttr::LcdPower, b"4\n"), Ok(2));
        assert_eq!(dev.show(LcdAttr::LcdPower).unwrap(), "4\n");

        registry.activate(&ns).unwrap();
        assert_eq!(dev.store(&host, LcdAttr::LcdPower, b"0"), Ok(1));
        assert_eq!(panel.power.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn contrast_optional() {
        let registry = DevNsRegistry::new();
        let host = Task::new(1, registry.root(), Credentials::root());
        let (_, dev) = device();
        assert_eq!(dev.show(LcdAttr::Contrast), Err(DevError::NoDevice));
        assert_eq!(dev.store(&host, LcdAttr::Contrast, b"10"), Ok(2));
        assert_eq!(dev.show(LcdAttr::MaxContrast).unwrap(), "63\n");
        assert_eq!(dev.store(&host, LcdAttr::MaxContrast, b"1"), Err(DevError::PermissionDenied));
        assert_eq!(dev.store(&host, LcdAttr::Contrast, b"x"), Err(DevError::InvalidArgument));
    }
}
