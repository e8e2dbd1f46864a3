//! Backlight class device.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;

use devns_core::sync::SpinLock;
use devns_core::task::Task;
use devns_core::DevError;

use super::{gate_store, parse_u32};
use crate::config::DEFAULT_MAX_BRIGHTNESS;

/// How the brightness value maps to the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BacklightType {
    /// Register value written straight to the hardware.
    #[default]
    Raw,
    /// Platform-specific interface.
    Platform,
    /// Firmware interface.
    Firmware,
}

impl BacklightType {
    /// Name shown by the `type` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Platform => "platform",
            Self::Firmware => "firmware",
        }
    }
}

/// Backlight state handed to the hardware callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklightProperties {
    /// Requested brightness, `0..=max_brightness`.
    pub brightness: u32,
    /// Largest accepted brightness.
    pub max_brightness: u32,
    /// Power state (`FB_BLANK_*`); 0 is on.
    pub power: u32,
    /// Interface type.
    pub kind: BacklightType,
}

impl Default for BacklightProperties {
    fn default() -> Self {
        Self {
            brightness: 0,
            max_brightness: DEFAULT_MAX_BRIGHTNESS,
            power: 0,
            kind: BacklightType::Raw,
        }
    }
}

/// Hardware callbacks of a backlight driver.
pub trait BacklightOps: Send + Sync {
    /// Pushes `props` to the hardware.
    ///
    /// # Errors
    ///
    /// Driver-specific.
    fn update_status(&self, props: &BacklightProperties) -> Result<(), DevError>;

    /// Reads back the brightness the hardware actually runs at.
    ///
    /// # Errors
    ///
    /// Driver-specific.
    fn get_brightness(&self, props: &BacklightProperties) -> Result<u32, DevError> {
        Ok(props.brightness)
    }
}

/// Backlight sysfs attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacklightAttr {
    /// `bl_power`, read-write.
    BlPower,
    /// `brightness`, read-write.
    Brightness,
    /// `actual_brightness`, read-only.
    ActualBrightness,
    /// `max_brightness`, read-only.
    MaxBrightness,
    /// `type`, read-only.
    Type,
}

impl BacklightAttr {
    /// Every attribute, in sysfs listing order.
    pub const ALL: [Self; 5] = [
        Self::BlPower,
        Self::Brightness,
        Self::ActualBrightness,
        Self::MaxBrightness,
        Self::Type,
    ];

    /// Attribute file name.
    pub fn name(self) -> &'static str {
        match self {
            Self::BlPower => "bl_power",
            Self::Brightness => "brightness",
            Self::ActualBrightness => "actual_brightness",
            Self::MaxBrightness => "max_brightness",
            Self::Type => "type",
        }
    }

    /// Looks an attribute up by file name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    /// Returns `true` if the attribute accepts stores.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::BlPower | Self::Brightness)
    }
}

/// A registered backlight.
pub struct BacklightDevice {
    name: String,
    ops: Arc<dyn BacklightOps>,
    props: SpinLock<BacklightProperties>,
}

impl BacklightDevice {
    pub(super) fn new(name: &str, ops: Arc<dyn BacklightOps>, props: BacklightProperties) -> Self {
        Self {
            name: name.to_string(),
            ops,
            props: SpinLock::new(props),
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current properties.
    pub fn props(&self) -> BacklightProperties {
        *self.props.lock()
    }

    /// Reads an attribute, newline-terminated.
    ///
    /// # Errors
    ///
    /// Whatever [`BacklightOps::get_brightness`] reports for
    /// `actual_brightness`.
    pub fn show(&self, attr: BacklightAttr) -> Result<String, DevError> {
        let props = self.props.lock();
        let text = match attr {
            BacklightAttr::BlPower => format!("{}\n", props.power),
            BacklightAttr::Brightness => format!("{}\n", props.brightness),
            BacklightAttr::ActualBrightness => format!("{}\n", self.ops.get_brightness(&props)?),
            BacklightAttr::MaxBrightness => format!("{}\n", props.max_brightness),
            BacklightAttr::Type => format!("{}\n", props.kind.as_str()),
        };
        Ok(text)
    }

    /// Writes an attribute on behalf of `task`. Stores from a background
    /// namespace are consumed without effect.
    ///
    /// # Errors
    ///
    /// - [`DevError::PermissionDenied`] for a read-only attribute.
    /// - [`DevError::InvalidArgument`] for a malformed number or a brightness
    ///   above `max_brightness`.
    /// - Whatever [`BacklightOps::update_status`] reports.
    pub fn store(&self, task: &Task, attr: BacklightAttr, buf: &[u8]) -> Result<usize, DevError> {
        if !attr.is_writable() {
            return Err(DevError::PermissionDenied);
        }
        gate_store(task, buf, |buf| {
            let value = parse_u32(buf)?;
            let mut props = self.props.lock();
            let mut next = *props;
            match attr {
                BacklightAttr::BlPower => {
                    if next.power == value {
                        return Ok(());
                    }
                    next.power = value;
                }
                _ => {
                    if value > next.max_brightness {
                        return Err(DevError::InvalidArgument);
                    }
                    next.brightness = value;
                }
            }
            self.ops.update_status(&next)?;
            log::debug!("backlight: {} {} set to {value}", self.name, attr.name());
            *props = next;
            Ok(())
        })
    }
}
