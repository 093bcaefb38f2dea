//! Linux sysfs GPIO backend
//!
//! ```text
//! <base>/export              write "<pin>" to export
//! <base>/gpio<pin>/direction "in" | "out"
//! <base>/gpio<pin>/value     "0" | "1"
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::GpioFault;

use super::{Direction, GpioPort, Level};

/// Where the kernel mounts the interface
pub const DEFAULT_SYSFS_GPIO: &str = "/sys/class/gpio";

/// Pins driven through `/sys/class/gpio`
///
/// Directions are remembered so a `set` on an input pin is rejected before
/// touching the filesystem.
#[derive(Debug)]
pub struct SysfsGpio {
    base: PathBuf,
    directions: Mutex<HashMap<u8, Direction>>,
}

impl SysfsGpio {
    /// Use the kernel's default mount point
    pub fn new() -> Self {
        Self::with_base(DEFAULT_SYSFS_GPIO)
    }

    /// Use an alternative base directory
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), directions: Mutex::new(HashMap::new()) }
    }

    /// Whether the interface exists on this host
    pub fn available(base: impl AsRef<Path>) -> bool {
        base.as_ref().join("export").exists()
    }

    /// Base directory in use
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn pin_dir(&self, pin: u8) -> PathBuf {
        self.base.join(format!("gpio{pin}"))
    }

    fn direction_of(&self, pin: u8) -> Option<Direction> {
        let directions = self.directions.lock().unwrap_or_else(|e| e.into_inner());
        directions.get(&pin).copied()
    }

    fn export(&self, pin: u8) -> io::Result<()> {
        if self.pin_dir(pin).exists() {
            return Ok(());
        }
        log::debug!("Exporting gpio{pin} under {}", self.base.display());
        fs::write(self.base.join("export"), pin.to_string())
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

fn hardware(pin: u8, err: io::Error) -> GpioFault {
    GpioFault::Hardware { pin, reason: err.to_string() }
}

impl GpioPort for SysfsGpio {
    fn configure(&self, pin: u8, direction: Direction) -> Result<(), GpioFault> {
        self.export(pin).map_err(|e| hardware(pin, e))?;
        fs::write(self.pin_dir(pin).join("direction"), direction.as_str())
            .map_err(|e| hardware(pin, e))?;

        let mut directions = self.directions.lock().unwrap_or_else(|e| e.into_inner());
        directions.insert(pin, direction);
        Ok(())
    }

    fn set(&self, pin: u8, level: Level) -> Result<(), GpioFault> {
        match self.direction_of(pin) {
            Some(Direction::Output) => {}
            Some(Direction::Input) => {
                return Err(GpioFault::WrongDirection {
                    pin,
                    expected: Direction::Output.as_str(),
                })
            }
            None => return Err(GpioFault::NotConfigured { pin }),
        }
        let value = match level {
            Level::High => "1",
            Level::Low => "0",
        };
        fs::write(self.pin_dir(pin).join("value"), value).map_err(|e| hardware(pin, e))
    }

    fn read(&self, pin: u8) -> Result<Level, GpioFault> {
        if self.direction_of(pin).is_none() {
            return Err(GpioFault::NotConfigured { pin });
        }
        let raw = fs::read_to_string(self.pin_dir(pin).join("value"))
            .map_err(|e| hardware(pin, e))?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(GpioFault::Hardware {
                pin,
                reason: format!("unexpected value {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Lay out what the kernel would create after an export
    fn fake_sysfs(pins: &[u8]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        for pin in pins {
            let pin_dir = dir.path().join(format!("gpio{pin}"));
            fs::create_dir(&pin_dir).unwrap();
            fs::write(pin_dir.join("direction"), "in").unwrap();
            fs::write(pin_dir.join("value"), "0").unwrap();
        }
        dir
    }

    #[test]
    fn configure_and_drive() {
        let dir = fake_sysfs(&[17]);
        let gpio = SysfsGpio::with_base(dir.path());
        assert!(SysfsGpio::available(dir.path()));

        gpio.configure(17, Direction::Output).unwrap();
        let direction = fs::read_to_string(dir.path().join("gpio17/direction")).unwrap();
        assert_eq!(direction, "out");

        gpio.set(17, Level::High).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("gpio17/value")).unwrap(), "1");
        assert_eq!(gpio.read(17).unwrap(), Level::High);
    }

    #[test]
    fn export_written_for_missing_pin() {
        let dir = fake_sysfs(&[]);
        let gpio = SysfsGpio::with_base(dir.path());

        // No kernel to create gpio22/, so the direction write fails
        let err = gpio.configure(22, Direction::Output).unwrap_err();
        assert!(matches!(err, GpioFault::Hardware { pin: 22, .. }));
        assert_eq!(fs::read_to_string(dir.path().join("export")).unwrap(), "22");
    }

    #[test]
    fn direction_checked_before_io() {
        let dir = fake_sysfs(&[5]);
        let gpio = SysfsGpio::with_base(dir.path());

        assert_eq!(gpio.set(5, Level::High), Err(GpioFault::NotConfigured { pin: 5 }));
        gpio.configure(5, Direction::Input).unwrap();
        assert!(matches!(
            gpio.set(5, Level::High),
            Err(GpioFault::WrongDirection { pin: 5, .. })
        ));
        assert_eq!(gpio.read(5).unwrap(), Level::Low);
    }

    #[test]
    fn missing_interface_detected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!SysfsGpio::available(dir.path().join("gpio")));
    }
}
