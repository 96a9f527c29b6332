use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use super::{
    frame::Frame,
    protocol::{self, Command},
};

/// Output side of the LED matrix.
pub trait MatrixDevice: Send + 'static {
    /// Acquires the device and lights it at `brightness`.
    fn open(&mut self, brightness: u8) -> io::Result<()>;
    fn display(&mut self, frame: &Frame) -> io::Result<()>;
    fn contrast(&mut self, brightness: u8) -> io::Result<()>;
    /// Blanks the matrix and releases the device.
    fn close(&mut self) -> io::Result<()>;
}

/// MAX7219 behind a Linux spidev node.
pub struct SpidevMatrix {
    path: PathBuf,
    port: Option<File>,
}

impl SpidevMatrix {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            port: None,
        }
    }

    fn send(&mut self, command: Command) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "LED matrix is not open")
        })?;
        port.write_all(&command.to_bytes())
    }
}

impl MatrixDevice for SpidevMatrix {
    fn open(&mut self, brightness: u8) -> io::Result<()> {
        let port = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", self.path.display())))?;
        self.port = Some(port);
        for command in protocol::init_sequence(brightness) {
            self.send(command)?;
        }
        self.display(&Frame::BLANK)
    }

    fn display(&mut self, frame: &Frame) -> io::Result<()> {
        protocol::frame_commands(frame).try_for_each(|command| self.send(command))
    }

    fn contrast(&mut self, brightness: u8) -> io::Result<()> {
        self.send(Command::Intensity(protocol::intensity(brightness)))
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.is_none() {
            return Ok(());
        }
        let blanked = self
            .display(&Frame::BLANK)
            .and_then(|()| self.send(Command::Power(false)));
        self.port = None;
        blanked
    }
}

/// What a [`VirtualMatrix`] has been asked to show.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixLog {
    pub frame: Frame,
    pub frames_shown: usize,
    pub brightness: u8,
    pub powered: bool,
}

/// In-memory matrix for headless runs. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct VirtualMatrix {
    log: Arc<Mutex<MatrixLog>>,
}

impl VirtualMatrix {
    pub fn snapshot(&self) -> MatrixLog {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut MatrixLog)) {
        let mut log = self
            .log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *log);
    }
}

impl MatrixDevice for VirtualMatrix {
    fn open(&mut self, brightness: u8) -> io::Result<()> {
        self.update(|log| {
            log.powered = true;
            log.brightness = brightness;
            log.frame = Frame::BLANK;
        });
        Ok(())
    }

    fn display(&mut self, frame: &Frame) -> io::Result<()> {
        self.update(|log| {
            log.frame = *frame;
            log.frames_shown += 1;
        });
        Ok(())
    }

    fn contrast(&mut self, brightness: u8) -> io::Result<()> {
        self.update(|log| log.brightness = brightness);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.update(|log| {
            log.frame = Frame::BLANK;
            log.powered = false;
        });
        Ok(())
    }
}
