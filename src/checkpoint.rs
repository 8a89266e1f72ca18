//! Layout of a checkpoint directory.
//!
//! Each stage owns up to three files under the root: `<stage>.stable.txt` (a completed result,
//! trusted on restart), `<stage>.working.txt` (the result being computed, never trusted on
//! restart), and `<stage>.log.txt` (diagnostic lines).
//! A working file becomes stable only through [CheckpointDir::promote].
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Alphabet,
    Graphs,
    Core,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Alphabet, Stage::Graphs, Stage::Core];
    pub fn name(self) -> &'static str {
        match self {
            Stage::Alphabet => "alphabet",
            Stage::Graphs => "graphs",
            Stage::Core => "core",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Stable,
    Working,
    Log,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Stable => "stable",
            Role::Working => "working",
            Role::Log => "log",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointDir {
    root: PathBuf,
}

impl CheckpointDir {
    /// Open `root`, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }
    pub fn root(&self) -> &Path {
        &self.root
    }
    pub fn path(&self, stage: Stage, role: Role) -> PathBuf {
        self.root.join(format!("{}.{}.txt", stage.name(), role.name()))
    }
    fn partial(&self, stage: Stage) -> PathBuf {
        self.root
            .join(format!("{}.{}.txt.partial", stage.name(), Role::Stable.name()))
    }
    pub fn has_stable(&self, stage: Stage) -> bool {
        self.path(stage, Role::Stable).is_file()
    }
    /// Remove the leftovers of an interrupted run of `stage`.
    pub fn clear(&self, stage: Stage) -> Result<()> {
        for path in [
            self.path(stage, Role::Working),
            self.path(stage, Role::Log),
            self.partial(stage),
        ]
        .iter()
        {
            if remove_if_exists(path)? {
                debug!("REMOVED\t{}", path.display());
            }
        }
        Ok(())
    }
    /// Create (or truncate) the working file of `stage`.
    pub fn working(&self, stage: Stage) -> Result<StageWriter> {
        StageWriter::create(self.path(stage, Role::Working))
    }
    /// Create (or truncate) the log file of `stage`.
    pub fn log(&self, stage: Stage) -> Result<TrainingLog> {
        let wtr = StageWriter::create(self.path(stage, Role::Log))?;
        Ok(TrainingLog { stage, wtr })
    }
    /// Turn the working file of `stage` into its stable file, then remove the working file.
    /// The stable file appears atomically: a crash leaves either no stable file or a complete one.
    pub fn promote(&self, stage: Stage) -> Result<()> {
        let working = self.path(stage, Role::Working);
        let partial = self.partial(stage);
        std::fs::copy(&working, &partial)?;
        File::open(&partial)?.sync_all()?;
        std::fs::rename(&partial, self.path(stage, Role::Stable))?;
        sync_directory(&self.root)?;
        std::fs::remove_file(&working)?;
        debug!("PROMOTED\t{}", stage);
        Ok(())
    }
}

// Make a rename in `path` durable.
#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<()> {
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(_) => Ok(true),
        Err(why) if why.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(why) => Err(why.into()),
    }
}

/// Buffered writer to a checkpoint file. The handle is released when it goes out of scope,
/// whether or not [StageWriter::finish] was called.
#[derive(Debug)]
pub struct StageWriter {
    path: PathBuf,
    wtr: BufWriter<File>,
}

impl StageWriter {
    fn create(path: PathBuf) -> Result<Self> {
        let wtr = BufWriter::new(File::create(&path)?);
        Ok(Self { path, wtr })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Flush the buffer and wait until the content reaches the disk.
    pub fn finish(self) -> Result<()> {
        let file = self.wtr.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

impl Write for StageWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.wtr.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.wtr.flush()
    }
}

/// Diagnostic trace of a stage. Every line is also sent to the `log` facade.
#[derive(Debug)]
pub struct TrainingLog {
    stage: Stage,
    wtr: StageWriter,
}

impl TrainingLog {
    pub fn line(&mut self, line: &str) -> Result<()> {
        debug!("{}\t{}", self.stage.name().to_uppercase(), line);
        writeln!(self.wtr, "{}", line)?;
        self.wtr.flush()?;
        Ok(())
    }
    pub fn finish(self) -> Result<()> {
        self.wtr.finish()
    }
}
