//! Logging setup for filebind binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "filebind=info,filebind_params=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by filebind binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
    pub log_dir: PathBuf,
}

/// Initialize tracing with a size-rotated file writer and stderr output.
///
/// `RUST_LOG` overrides the default filter for both layers.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let writer = RotatingWriter::open(&config.log_dir, config.app_name)
        .with_context(|| format!("Failed to open log file in {}", config.log_dir.display()))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// Log file that rolls over to `<name>.log.1 .. <name>.log.N` when full.
struct RotatingFile {
    current: PathBuf,
    file: File,
    written: u64,
    max_files: usize,
    max_size: u64,
}

impl RotatingFile {
    fn open(path: PathBuf, max_files: usize, max_size: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            current: path,
            file,
            written,
            max_files: max_files.max(1),
            max_size,
        })
    }

    fn numbered(&self, index: usize) -> PathBuf {
        let mut name = self.current.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let keep = self.max_files - 1;
        if keep > 0 {
            for index in (1..keep).rev() {
                let from = self.numbered(index);
                if from.exists() {
                    fs::rename(&from, self.numbered(index + 1))?;
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

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
}

struct RotatingWriter {
    inner: Mutex<RotatingFile>,
}

impl RotatingWriter {
    fn open(dir: &Path, app_name: &str) -> io::Result<Self> {
        Self::open_with_limits(dir, app_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
    }

    fn open_with_limits(
        dir: &Path,
        app_name: &str,
        max_files: usize,
        max_size: u64,
    ) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", file_stem(app_name)));
        Ok(Self {
            inner: Mutex::new(RotatingFile::open(path, max_files, max_size)?),
        })
    }
}

struct RotatingGuard<'a>(MutexGuard<'a, RotatingFile>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        // A poisoned lock only means another thread panicked mid-write.
        RotatingGuard(self.inner.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

impl Write for RotatingGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.file.flush()
    }
}

fn file_stem(app_name: &str) -> String {
    let stem: String = app_name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if stem.is_empty() {
        "filebind".to_string()
    } else {
        stem
    }
}
