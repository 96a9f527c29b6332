use std::{
    fs,
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::debug;

pub const SYSFS_GPIO: &str = "/sys/class/gpio";

/// A digital input, `true` when the pad is touched.
pub trait InputPin: Send + 'static {
    fn open(&mut self) -> io::Result<()>;
    fn read(&mut self) -> io::Result<bool>;
    fn close(&mut self) -> io::Result<()>;
}

/// GPIO line through the legacy sysfs interface.
pub struct SysfsPin {
    pin: u32,
    root: PathBuf,
    exported: bool,
}

impl SysfsPin {
    pub fn new(pin: u32) -> Self {
        Self::with_root(pin, SYSFS_GPIO)
    }

    pub fn with_root(pin: u32, root: impl Into<PathBuf>) -> Self {
        Self {
            pin,
            root: root.into(),
            exported: false,
        }
    }

    fn line(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    /// udev may need a moment to hand over a freshly exported line.
    fn set_direction(&self) -> io::Result<()> {
        let direction = self.line().join("direction");
        let mut attempts = 5;
        loop {
            match fs::write(&direction, "in") {
                Ok(()) => return Ok(()),
                Err(e) if attempts > 0 => {
                    attempts -= 1;
                    debug!("{} not ready yet: {e}", direction.display());
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(io::Error::new(
                        e.kind(),
                        format!("{}: {e}", direction.display()),
                    ));
                }
            }
        }
    }
}

impl InputPin for SysfsPin {
    fn open(&mut self) -> io::Result<()> {
        if !self.line().exists() {
            fs::write(self.root.join("export"), self.pin.to_string())?;
            self.exported = true;
        }
        self.set_direction()?;
        self.read().map(|_| ())
    }

    fn read(&mut self) -> io::Result<bool> {
        let raw = fs::read_to_string(self.line().join("value"))?;
        Ok(raw.trim() == "1")
    }

    fn close(&mut self) -> io::Result<()> {
        if std::mem::take(&mut self.exported) {
            fs::write(self.root.join("unexport"), self.pin.to_string())?;
        }
        Ok(())
    }
}

/// Pin driven from code. Clones share the level.
#[derive(Debug, Clone, Default)]
pub struct VirtualPin {
    level: Arc<AtomicBool>,
}

impl VirtualPin {
    pub fn set(&self, touched: bool) {
        self.level.store(touched, Ordering::SeqCst);
    }
}

impl InputPin for VirtualPin {
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read(&mut self) -> io::Result<bool> {
        Ok(self.level.load(Ordering::SeqCst))
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fake_sysfs(pin: u32, value: &str) -> TempDir {
        let root = TempDir::new().unwrap();
        let line = root.path().join(format!("gpio{pin}"));
        fs::create_dir(&line).unwrap();
        fs::write(line.join("direction"), "out").unwrap();
        fs::write(line.join("value"), value).unwrap();
        root
    }

    #[test]
    fn existing_line_is_configured_as_input() {
        let root = fake_sysfs(17, "0\n");
        let mut pin = SysfsPin::with_root(17, root.path());
        pin.open().unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("gpio17/direction")).unwrap(),
            "in"
        );
        assert!(!pin.read().unwrap());

        fs::write(root.path().join("gpio17/value"), "1\n").unwrap();
        assert!(pin.read().unwrap());

        pin.close().unwrap();
        assert!(!root.path().join("unexport").exists());
    }

    #[test]
    fn missing_line_is_exported_first() {
        let root = TempDir::new().unwrap();
        let mut pin = SysfsPin::with_root(4, root.path());
        // Nothing creates gpio4/ here, so configuring it fails after export.
        assert!(pin.open().is_err());
        assert_eq!(
            fs::read_to_string(root.path().join("export")).unwrap(),
            "4"
        );
        pin.close().unwrap();
        assert_eq!(
            fs::read_to_string(root.path().join("unexport")).unwrap(),
            "4"
        );
    }

    #[test]
    fn virtual_pin_follows_level() {
        let pin = VirtualPin::default();
        let mut reader = pin.clone();
        assert!(!reader.read().unwrap());
        pin.set(true);
        assert!(reader.read().unwrap());
    }
}
