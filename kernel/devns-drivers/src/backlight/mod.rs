//! Backlight and LCD class devices.
//!
//! These devices hold no per-namespace state. Instead, every attribute store
//! passes through [`gate_store`]: a store issued from a namespace that is not
//! in the foreground reports success for the whole buffer and changes
//! nothing, so only the active namespace drives the panel.

mod device;
mod lcd;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use devns_core::sync::SpinLock;
use devns_core::task::Task;
use devns_core::DevError;

pub use device::{BacklightAttr, BacklightDevice, BacklightOps, BacklightProperties, BacklightType};
pub use lcd::{LcdAttr, LcdDevice, LcdOps, LcdProperties};

/// Runs `store` on `buf` unless `task`'s namespace is in the background.
///
/// Returns the full buffer length on success and on a gated store alike.
/// The gate runs before `buf` is parsed, so a background namespace cannot
/// learn anything from parse errors either.
///
/// # Errors
///
/// Whatever `store` returns.
pub fn gate_store(
    task: &Task,
    buf: &[u8],
    store: impl FnOnce(&[u8]) -> Result<(), DevError>,
) -> Result<usize, DevError> {
    if !task.ns().is_active() {
        log::trace!(
            "backlight: dropped store from inactive namespace {}",
            task.ns().init_pid()
        );
        return Ok(buf.len());
    }
    store(buf)?;
    Ok(buf.len())
}

/// Parses a sysfs integer: decimal, or hex with a `0x` prefix, with optional
/// surrounding whitespace.
///
/// # Errors
///
/// [`DevError::InvalidArgument`] if `buf` is not such a number.
pub fn parse_u32(buf: &[u8]) -> Result<u32, DevError> {
    let text = core::str::from_utf8(buf)
        .map_err(|_| DevError::InvalidArgument)?
        .trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| DevError::InvalidArgument)
}

/// The registered backlight and LCD devices, by name.
pub struct DisplayClass {
    backlights: SpinLock<BTreeMap<String, Arc<BacklightDevice>>>,
    lcds: SpinLock<BTreeMap<String, Arc<LcdDevice>>>,
}

impl DisplayClass {
    /// Creates an empty class.
    pub fn new() -> Self {
        Self {
            backlights: SpinLock::new(BTreeMap::new()),
            lcds: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Registers a backlight device.
    ///
    /// # Errors
    ///
    /// [`DevError::AlreadySet`] if the name is taken.
    pub fn register_backlight(
        &self,
        name: &str,
        ops: Arc<dyn BacklightOps>,
        props: BacklightProperties,
    ) -> Result<Arc<BacklightDevice>, DevError> {
        let mut map = self.backlights.lock();
        if map.contains_key(name) {
            return Err(DevError::AlreadySet);
        }
        let dev = Arc::new(BacklightDevice::new(name, ops, props));
        map.insert(name.to_string(), dev.clone());
        log::info!("backlight: registered backlight '{name}'");
        Ok(dev)
    }

    /// Registers an LCD device.
    ///
    /// # Errors
    ///
    /// [`DevError::AlreadySet`] if the name is taken.
    pub fn register_lcd(
        &self,
        name: &str,
        ops: Arc<dyn LcdOps>,
        props: LcdProperties,
    ) -> Result<Arc<LcdDevice>, DevError> {
        let mut map = self.lcds.lock();
        if map.contains_key(name) {
            return Err(DevError::AlreadySet);
        }
        let dev = Arc::new(LcdDevice::new(name, ops, props));
        map.insert(name.to_string(), dev.clone());
        log::info!("backlight: registered lcd '{name}'");
        Ok(dev)
    }

    /// Removes a backlight device.
    pub fn unregister_backlight(&self, name: &str) -> Option<Arc<BacklightDevice>> {
        let dev = self.backlights.lock().remove(name);
        if dev.is_some() {
            log::info!("backlight: unregistered backlight '{name}'");
        }
        dev
    }

    /// Removes an LCD device.
    pub fn unregister_lcd(&self, name: &str) -> Option<Arc<LcdDevice>> {
        let dev = self.lcds.lock().remove(name);
        if dev.is_some() {
            log::info!("backlight: unregistered lcd '{name}'");
        }
        dev
    }

    /// Looks up a backlight device.
    pub fn backlight(&self, name: &str) -> Option<Arc<BacklightDevice>> {
        self.backlights.lock().get(name).cloned()
    }

    /// Looks up an LCD device.
    pub fn lcd(&self, name: &str) -> Option<Arc<LcdDevice>> {
        self.lcds.lock().get(name).cloned()
    }

    /// Names of every registered backlight.
    pub fn backlight_names(&self) -> Vec<String> {
        self.backlights.lock().keys().cloned().collect()
    }

    /// Names of every registered LCD.
    pub fn lcd_names(&self) -> Vec<String> {
        self.lcds.lock().keys().cloned().collect()
    }
}

impl Default for DisplayClass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devns_core::{Credentials, DevNsRegistry, NsTag, Pid};

    #[test]
    fn parses_sysfs_numbers() {
        assert_eq!(parse_u32(b"42\n"), Ok(42));
        assert_eq!(parse_u32(b" 0x1f "), Ok(31));
        assert_eq!(parse_u32(b"-1"), Err(DevError::InvalidArgument));
        assert_eq!(parse_u32(b"bright"), Err(DevError::InvalidArgument));
        assert_eq!(parse_u32(&[0xff, 0xfe]), Err(DevError::InvalidArgument));
    }

    #[test]
    fn gate_drops_background_stores() {
        let registry = DevNsRegistry::new();
        let ns = registry.create_namespace(Pid::new(300), NsTag::from_name("bg")).unwrap();
        let fg = Task::new(1, registry.root(), Credentials::root());
        let bg = Task::new(301, &ns, Credentials::root());

        let mut ran = 0;
        let dropped = gate_store(&bg, b"garbage", |_| {
            ran += 1;
            Err(DevError::InvalidArgument)
        });
        assert_eq!(dropped, Ok(7));
        assert_eq!(ran, 0);
        let applied = gate_store(&fg, b"5", |_| {
            ran += 1;
            Ok(())
        });
        assert_eq!(applied, Ok(1));
        assert_eq!(ran, 1);

        registry.activate(&ns).unwrap();
        assert_eq!(gate_store(&fg, b"5", |_| Err(DevError::InvalidArgument)), Ok(1));
        assert_eq!(gate_store(&bg, b"5", |_| Err(DevError::InvalidArgument)), Err(DevError::InvalidArgument));
    }

    struct NullOps;

    impl BacklightOps for NullOps {
        fn update_status(&self, _props: &BacklightProperties) -> Result<(), DevError> {
            Ok(())
        }
    }

    #[test]
    fn class_registration() {
        let class = DisplayClass::new();
        class.register_backlight("panel0", Arc::new(NullOps), BacklightProperties::default()).unwrap();
        assert_eq!(
            class.register_backlight("panel0", Arc::new(NullOps), BacklightProperties::default()).err(),
            Some(DevError::AlreadySet)
        );
        assert_eq!(class.backlight_names(), ["panel0"]);
        assert!(class.unregister_backlight("panel0").is_some());
        assert!(class.backlight("panel0").is_none());
        assert!(class.lcd_names().is_empty());
    }
}
