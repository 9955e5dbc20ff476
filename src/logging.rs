//! 日志模块 - 提供文件日志和大小管理功能

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// 是否写入日志文件
    pub enabled: bool,
    /// 日志文件路径
    pub file: PathBuf,
    /// 最大日志文件大小（MB）
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("logs.log"),
            max_size_mb: 5, // 默认 5MB
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// 从环境变量加载，无效值回退到默认
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(enabled) = lookup("LOG_ENABLED") {
            config.enabled = !matches!(enabled.trim().to_lowercase().as_str(), "0" | "false" | "off");
        }
        if let Some(file) = lookup("LOG_FILE").filter(|f| !f.trim().is_empty()) {
            config.file = PathBuf::from(file.trim());
        }
        if let Some(size) = lookup("LOG_MAX_SIZE_MB").and_then(|s| s.trim().parse::<u32>().ok()) {
            // 限制范围 1-100 MB
            config.max_size_mb = size.clamp(1, 100);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            let level = level.trim().to_lowercase();
            let valid_levels = ["error", "warn", "info", "debug", "trace"];
            if valid_levels.contains(&level.as_str()) {
                config.level = level;
            }
        }

        config
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

type SharedWriter = Arc<Mutex<Option<BufWriter<File>>>>;

fn lock_writer(writer: &SharedWriter) -> io::Result<MutexGuard<'_, Option<BufWriter<File>>>> {
    writer
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))
}

/// 带大小限制的日志写入器，追加写入，超限后轮转为 `.old`
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: SharedWriter,
}

impl SizeRotatingWriter {
    pub fn new(file_path: &Path, max_size_mb: u32) -> io::Result<Self> {
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let max_size = (max_size_mb as u64) * 1024 * 1024;
        let writer = Self::open_file(file_path, max_size)?;

        Ok(Self {
            file_path: file_path.to_path_buf(),
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if let Ok(metadata) = fs::metadata(file_path) {
            if metadata.len() > max_size {
                Self::rotate_log(file_path)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件: logs.log -> logs.log.old
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = backup_path(file_path);

        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }

        fs::rename(file_path, &backup_path)?;
        Ok(())
    }

    /// 超过大小限制时关闭、轮转并重新打开
    fn rotate_if_needed(writer: &SharedWriter, file_path: &Path, max_size: u64) -> io::Result<()> {
        let oversized = fs::metadata(file_path)
            .map(|m| m.len() > max_size)
            .unwrap_or(false);
        if !oversized {
            return Ok(());
        }

        let mut guard = lock_writer(writer)?;
        if let Some(mut w) = guard.take() {
            let _ = w.flush();
        }

        Self::rotate_log(file_path)?;
        *guard = Some(Self::open_file(file_path, max_size)?);
        Ok(())
    }
}

fn backup_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_os_string();
    name.push(".old");
    PathBuf::from(name)
}

/// 日志写入器包装
pub struct LogWriter {
    inner: SharedWriter,
    file_path: PathBuf,
    max_size: u64,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = {
            let mut guard = lock_writer(&self.inner)?;
            match guard.as_mut() {
                Some(writer) => {
                    let n = writer.write(buf)?;
                    writer.flush()?;
                    n
                }
                None => return Err(io::Error::new(io::ErrorKind::Other, "Writer not available")),
            }
        };

        let _ = SizeRotatingWriter::rotate_if_needed(&self.inner, &self.file_path, self.max_size);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = lock_writer(&self.inner)?;
        match guard.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
        }
    }
}
