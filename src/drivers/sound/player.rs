use std::{
    io,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// Something that can play an audio file.
pub trait Player: Send + Sync + 'static {
    /// Checks that playback is possible at all.
    fn probe(&self) -> io::Result<()>;

    /// Starts one pass over `file` at `volume` percent.
    fn spawn(&self, file: &Path, volume: u8) -> io::Result<Box<dyn Playback>>;
}

/// One running pass.
pub trait Playback: Send {
    fn finished(&mut self) -> io::Result<bool>;
    fn kill(&mut self) -> io::Result<()>;
}

/// External player command. `{file}` and `{volume}` in any argument are
/// replaced before each spawn.
pub struct ProcessPlayer {
    argv: Vec<String>,
}

impl ProcessPlayer {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

pub fn expand(argv: &[String], file: &Path, volume: u8) -> Vec<String> {
    let file = file.to_string_lossy();
    let volume = volume.to_string();
    argv.iter()
        .map(|arg| arg.replace("{file}", &file).replace("{volume}", &volume))
        .collect()
}

impl Player for ProcessPlayer {
    fn probe(&self) -> io::Result<()> {
        let program = self
            .argv
            .first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty player command"))?;
        which::which(program)
            .map(|_| ())
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("{program}: {e}")))
    }

    fn spawn(&self, file: &Path, volume: u8) -> io::Result<Box<dyn Playback>> {
        let argv = expand(&self.argv, file, volume);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty player command"))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Box::new(child))
    }
}

impl Playback for Child {
    fn finished(&mut self) -> io::Result<bool> {
        Ok(self.try_wait()?.is_some())
    }

    fn kill(&mut self) -> io::Result<()> {
        match Child::kill(self) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.wait().map(|_| ())
    }
}

/// Silent player whose every pass lasts `length`. Clones share the log of
/// started passes.
#[derive(Debug, Clone)]
pub struct VirtualPlayer {
    length: Duration,
    started: Arc<Mutex<Vec<(PathBuf, u8)>>>,
}

impl VirtualPlayer {
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn started(&self) -> Vec<(PathBuf, u8)> {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for VirtualPlayer {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

struct VirtualPass {
    until: Instant,
}

impl Playback for VirtualPass {
    fn finished(&mut self) -> io::Result<bool> {
        Ok(Instant::now() >= self.until)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.until = Instant::now();
        Ok(())
    }
}

impl Player for VirtualPlayer {
    fn probe(&self) -> io::Result<()> {
        Ok(())
    }

    fn spawn(&self, file: &Path, volume: u8) -> io::Result<Box<dyn Playback>> {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((file.to_path_buf(), volume));
        Ok(Box::new(VirtualPass {
            until: Instant::now() + self.length,
        }))
    }
}
