use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub component: String,
    pub function: Option<String>,
    pub message: String,
}

struct OpenLog {
    date: String,
    file: File,
}

/// Daily log files under one directory. Cloning shares the open file.
#[derive(Clone)]
pub struct LogManager {
    file: Arc<Mutex<Option<OpenLog>>>,
    log_dir: PathBuf,
}

impl LogManager {
    pub fn new(log_dir: impl AsRef<Path>) -> Result<Self, String> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)
            .map_err(|e| format!("Failed to create log directory: {}", e))?;

        Ok(Self {
            file: Arc::new(Mutex::new(None)),
            log_dir,
        })
    }

    fn today() -> String {
        chrono::Local::now().format("%Y-%m-%d").to_string()
    }

    fn path_for(&self, date: &str) -> PathBuf {
        self.log_dir.join(format!("app-{}.txt", date))
    }

    fn append(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Lock error: {}", e)))?;

        let today = Self::today();
        let needs_new_file = match guard.as_ref() {
            Some(open) => open.date != today || !self.path_for(&today).exists(),
            None => true,
        };

        if needs_new_file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(&today))?;
            *guard = Some(OpenLog { date: today, file });
        }

        if let Some(open) = guard.as_mut() {
            open.file.write_all(bytes)?;
            open.file.flush()?;
        }
        Ok(())
    }

    /// Writes an entry forwarded by the UI shell.
    pub fn write_log(&self, entry: LogEntry) -> Result<(), String> {
        let scope = if let Some(ref f) = entry.function {
            format!("{}/{}", entry.component, f)
        } else {
            entry.component.clone()
        };

        let log_line = format!(
            "[{}] {} {} {}\n",
            entry.timestamp, scope, entry.level, entry.message
        );

        self.append(log_line.as_bytes())
            .map_err(|e| format!("Failed to write log: {}", e))
    }

    pub fn list_log_files(&self) -> Result<Vec<String>, String> {
        let entries = fs::read_dir(&self.log_dir)
            .map_err(|e| format!("Failed to read log directory: {}", e))?;

        let mut log_files: Vec<String> = entries
            .filter_map(|entry| {
                entry.ok().and_then(|e| {
                    let path = e.path();
                    if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("txt") {
                        path.file_name()
                            .and_then(|n| n.to_str())
                            .map(|s| s.to_string())
                    } else {
                        None
                    }
                })
            })
            .collect();

        log_files.sort_by(|a, b| b.cmp(a)); // Most recent first
        Ok(log_files)
    }

    fn checked_path(&self, filename: &str) -> Result<PathBuf, String> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err("Invalid log file name".to_string());
        }
        let path = self.log_dir.join(filename);
        if !path.is_file() {
            return Err("Log file not found".to_string());
        }
        Ok(path)
    }

    pub fn read_log_file(&self, filename: &str) -> Result<String, String> {
        let path = self.checked_path(filename)?;
        fs::read_to_string(path).map_err(|e| format!("Failed to read log file: {}", e))
    }

    pub fn delete_log_file(&self, filename: &str) -> Result<(), String> {
        let path = self.checked_path(filename)?;
        fs::remove_file(path).map_err(|e| format!("Failed to delete log file: {}", e))
    }

    pub fn clear_all_logs(&self) -> Result<(), String> {
        let entries = fs::read_dir(&self.log_dir)
            .map_err(|e| format!("Failed to read log directory: {}", e))?;

        if let Ok(mut guard) = self.file.lock() {
            *guard = None;
        }

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension() == Some("txt".as_ref()) {
                fs::remove_file(path).map_err(|e| format!("Failed to delete log file: {}", e))?;
            }
        }

        Ok(())
    }

    pub fn log_dir_path(&self) -> String {
        self.log_dir.to_string_lossy().to_string()
    }
}

pub struct DailyLogWriter {
    manager: LogManager,
}

impl Write for DailyLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.manager.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogManager {
    type Writer = DailyLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DailyLogWriter {
            manager: self.clone(),
        }
    }
}

/// Installs the global subscriber writing into daily files under `log_dir`.
pub fn init_logging(log_dir: impl AsRef<Path>, level: Level) -> anyhow::Result<LogManager> {
    let manager = LogManager::new(log_dir).map_err(anyhow::Error::msg)?;

    tracing_subscriber::fmt()
        .with_writer(manager.clone())
        .with_ansi(false)
        .with_max_level(level)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    Ok(manager)
}
