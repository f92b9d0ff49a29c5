use crate::services::config::Profile;
use crate::Error;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer,
};

/// 5 MiB
pub const MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

fn create_filter(level: LevelFilter) -> Result<EnvFilter, Error> {
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?
        .add_directive("serenity=warn".parse()?)
        .add_directive("poise=warn".parse()?)
        .add_directive("tungstenite=warn".parse()?)
        .add_directive("tokio_tungstenite=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("rustls=warn".parse()?))
}

/// Time, level and message only.
fn line_layer<S, W>(
    writer: W,
) -> fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format, W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt::layer().with_writer(writer).with_target(false)
}

/// Install the file and console loggers.
///
/// The file always gets debug output; the console follows the profile. The
/// returned guard flushes the file writer when dropped.
pub fn init(profile: Profile, dir: &Path) -> Result<WorkerGuard, Error> {
    let file = RotatingFile::open(dir.join(profile.log_file_name()), MAX_LOG_BYTES)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_logger = line_layer(non_blocking)
        .with_ansi(false)
        .with_filter(create_filter(LevelFilter::DEBUG)?);
    let stdout_logger =
        line_layer(io::stdout).with_filter(create_filter(profile.console_level())?);

    tracing_subscriber::registry()
        .with(file_logger)
        .with(stdout_logger)
        .try_init()?;

    Ok(guard)
}

/// Append-only log file capped at `max_bytes`, keeping one backup.
///
/// Once a write would push the file past the cap it is renamed to
/// `<name>.1`, replacing the previous backup, and a fresh file is started.
pub struct RotatingFile {
    path: PathBuf,
    backup: PathBuf,
    max_bytes: u64,
    written: u64,
    file: File,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> io::Result<Self> {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(".1");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();

        Ok(Self {
            path,
            backup: backup.into(),
            max_bytes,
            written,
            file,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        match fs::remove_file(&self.backup) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        // the live file may have been moved away under us
        match fs::rename(&self.path, &self.backup) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");
        fs::write(&path, "old\n").unwrap();

        let mut file = RotatingFile::open(&path, 1024).unwrap();
        file.write_all(b"new\n").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&path), "old\nnew\n");
        assert!(!dir.path().join("bot.log.1").exists());
    }

    #[test]
    fn test_rotates_past_cap_and_keeps_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");
        let backup = dir.path().join("bot.log.1");

        let mut file = RotatingFile::open(&path, 10).unwrap();
        file.write_all(b"first\n").unwrap();
        file.write_all(b"second\n").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&backup), "first\n");
        assert_eq!(read(&path), "second\n");

        file.write_all(b"third\n").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&backup), "second\n");
        assert_eq!(read(&path), "third\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_oversized_record_goes_to_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");

        let mut file = RotatingFile::open(&path, 4).unwrap();
        file.write_all(b"a very long line\n").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&path), "a very long line\n");
        assert!(!dir.path().join("bot.log.1").exists());
    }

    #[test]
    fn test_rotation_recreates_removed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");

        let mut file = RotatingFile::open(&path, 10).unwrap();
        file.write_all(b"first\n").unwrap();
        fs::remove_file(&path).unwrap();

        file.write_all(b"second\n").unwrap();
        file.write_all(b"third\n").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&path), "third\n");
        assert_eq!(read(&dir.path().join("bot.log.1")), "second\n");
    }

    #[test]
    fn test_lines_carry_level_and_message_without_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");
        let file = RotatingFile::open(&path, MAX_LOG_BYTES).unwrap();

        let layer = line_layer(std::sync::Mutex::new(file)).with_ansi(false);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "devonly_events", "Dev role added to someone");
        });

        let contents = read(&path);
        assert!(contents.contains("INFO"));
        assert!(contents.contains("Dev role added to someone"));
        assert!(!contents.contains("devonly_events"));
    }

    #[test]
    fn test_filter_accepts_profile_levels() {
        assert!(create_filter(Profile::Debug.console_level()).is_ok());
        assert!(create_filter(Profile::Production.console_level()).is_ok());
    }
}
