//! Logging setup for typeframe binaries.
//!
//! Installs a `tracing` subscriber with a stderr layer and, optionally, a
//! size-capped log file that keeps a few numbered predecessors
//! (`typeframe.log`, `typeframe.log.1`, ...).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "typeframe=info,typeframe_schema=info,typeframe_db=info";
const HOME_ENV: &str = "TYPEFRAME_HOME";
const KEEP_FILES: usize = 5;
const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Logging options.
#[derive(Debug, Clone)]
pub struct LogConfig<'a> {
    /// Base name of the log file.
    pub app_name: &'a str,
    /// Raise the stderr layer to `debug` for typeframe crates.
    pub verbose: bool,
    /// Write to a log file too. `None` disables file logging;
    /// `Some(None)` uses [`logs_dir`].
    pub log_dir: Option<Option<PathBuf>>,
}

impl<'a> LogConfig<'a> {
    pub fn new(app_name: &'a str) -> Self {
        Self {
            app_name,
            verbose: false,
            log_dir: Some(None),
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn without_file(mut self) -> Self {
        self.log_dir = None;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(Some(dir.into()));
        self
    }
}

/// Install the global subscriber. Fails if one is already installed.
///
/// `RUST_LOG` overrides the default filter for every layer.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let base_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    let console_filter = if config.verbose && std::env::var_os("RUST_LOG").is_none() {
        EnvFilter::new("typeframe=debug,typeframe_schema=debug,typeframe_db=debug")
    } else {
        base_filter()
    };
    let console = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(config.verbose)
        .with_filter(console_filter);

    let file = match &config.log_dir {
        None => None,
        Some(dir) => {
            let dir = match dir {
                Some(dir) => dir.clone(),
                None => logs_dir()?,
            };
            let writer = SharedLogFile::open(&dir, config.app_name)
                .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(base_filter()),
            )
        }
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

/// typeframe home: `$TYPEFRAME_HOME`, or `~/.typeframe`.
pub fn typeframe_home() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".typeframe"))
        .ok_or_else(|| anyhow!("Could not determine home directory; set {}", HOME_ENV))
}

/// Log directory under the typeframe home.
pub fn logs_dir() -> Result<PathBuf> {
    Ok(typeframe_home()?.join("logs"))
}

/// Append-only log file that starts over once it reaches `max_bytes`.
struct CappedLogFile {
    current: PathBuf,
    keep: usize,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl CappedLogFile {
    fn open(dir: &Path, name: &str, keep: usize, max_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let current = dir.join(format!("{}.log", file_stem(name)));
        let file = OpenOptions::new().create(true).append(true).open(&current)?;
        let written = file.metadata()?.len();
        let mut log = Self {
            current,
            keep: keep.max(1),
            max_bytes,
            file,
            written,
        };
        if log.written >= log.max_bytes {
            log.shift()?;
        }
        Ok(log)
    }

    fn numbered(&self, n: usize) -> PathBuf {
        let mut name = self.current.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    /// Move `x.log.N` to `x.log.N+1` (dropping the oldest), `x.log` to
    /// `x.log.1`, and reopen an empty `x.log`.
    fn shift(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let oldest = self.keep - 1;
        if oldest > 0 {
            let _ = fs::remove_file(self.numbered(oldest));
            for n in (1..oldest).rev() {
                let from = self.numbered(n);
                if from.exists() {
                    fs::rename(&from, self.numbered(n + 1))?;
                }
            }
            fs::rename(&self.current, self.numbered(1))?;
        } else {
            fs::remove_file(&self.current)?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for CappedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.shift()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct SharedLogFile(Arc<Mutex<CappedLogFile>>);

impl SharedLogFile {
    fn open(dir: &Path, name: &str) -> io::Result<Self> {
        let file = CappedLogFile::open(dir, name, KEEP_FILES, MAX_FILE_BYTES)?;
        Ok(Self(Arc::new(Mutex::new(file))))
    }

    fn with<T>(&self, f: impl FnOnce(&mut CappedLogFile) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self.0.lock().map_err(|_| io::Error::other("log file lock poisoned"))?;
        f(&mut guard)
    }
}

impl Write for SharedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with(|file| file.flush())
    }
}

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = SharedLogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "typeframe".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_stem_replaces_separators() {
        assert_eq!(file_stem("typeframe"), "typeframe");
        assert_eq!(file_stem("a/b c"), "a_b_c");
        assert_eq!(file_stem(""), "typeframe");
    }

    #[test]
    fn capped_file_shifts_and_keeps_limit() {
        let dir = TempDir::new().unwrap();
        let mut log = CappedLogFile::open(dir.path(), "app", 3, 10).unwrap();
        for _ in 0..5 {
            log.write_all(b"0123456789").unwrap();
        }
        log.flush().unwrap();

        assert!(dir.path().join("app.log").exists());
        assert!(dir.path().join("app.log.1").exists());
        assert!(dir.path().join("app.log.2").exists());
        assert!(!dir.path().join("app.log.3").exists());
        let current = fs::read(dir.path().join("app.log")).unwrap();
        assert_eq!(current.len(), 10);
    }

    #[test]
    fn oversized_existing_file_is_shifted_on_open() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.log"), vec![b'x'; 32]).unwrap();
        let log = CappedLogFile::open(dir.path(), "app", 2, 16).unwrap();
        assert_eq!(log.written, 0);
        assert_eq!(fs::read(dir.path().join("app.log.1")).unwrap().len(), 32);
    }

    #[test]
    fn home_honours_environment_override() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(HOME_ENV, dir.path());
        assert_eq!(typeframe_home().unwrap(), dir.path());
        assert_eq!(logs_dir().unwrap(), dir.path().join("logs"));
        std::env::remove_var(HOME_ENV);
    }
}
