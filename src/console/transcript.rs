use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Append-only console log for one bring-up run.
///
/// Created exclusively (a later run never reopens it), flushed on every
/// append, and closed exactly once: either through [`Transcript::close`] or,
/// if the owner never got that far, by the drop guard which records the run
/// as aborted.
pub struct Transcript {
    path: PathBuf,
    file: Mutex<File>,
    closed: AtomicBool,
}

impl Transcript {
    /// Create `console_<guest>_<timestamp>.log` in `dir` and write the start banner.
    pub fn create(dir: &Path, guest: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating transcript directory {}", dir.display()))?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("console_{}_{}", guest, timestamp);

        let mut attempt = 0u32;
        let (path, file) = loop {
            let name = if attempt == 0 {
                format!("{}.log", base)
            } else {
                format!("{}_{}.log", base, attempt)
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempt < 100 => {
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("creating transcript {}", path.display()))
                }
            }
        };

        let transcript = Self {
            path,
            file: Mutex::new(file),
            closed: AtomicBool::new(false),
        };
        transcript.append(&format!(
            "Console log for {} - Started at {}\n",
            guest,
            chrono::Local::now()
        ))?;
        info!(target: "console", path = %transcript.path.display(), "console transcript created");
        Ok(transcript)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append text and flush it to disk immediately.
    pub fn append(&self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("transcript {} already closed", self.path.display());
        }
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("transcript lock poisoned"))?;
        file.write_all(text.as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("writing transcript {}", self.path.display()))
    }

    /// Everything written so far.
    pub fn contents(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading transcript {}", self.path.display()))
    }

    /// Write the end banner and final status. Only the first call writes.
    pub fn close(&self, success: bool, error: Option<&str>) {
        let status = if success { "SUCCESS" } else { "FAILED" };
        self.finish(status, error);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn finish(&self, status: &str, error: Option<&str>) {
        if self.is_closed() {
            return;
        }
        let mut trailer = format!(
            "\nConsole log ended at {}\nFinal status: {}\n",
            chrono::Local::now(),
            status
        );
        if let Some(error) = error {
            trailer.push_str(&format!("Error: {}\n", error));
        }
        if let Err(e) = self.append(&trailer) {
            warn!(target: "console", path = %self.path.display(), error = %e, "failed to finalize transcript");
        }
        self.closed.store(true, Ordering::SeqCst);
        info!(target: "console", path = %self.path.display(), "console log saved");
    }
}

impl Drop for Transcript {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.finish("ABORTED", None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_writes_banner() {
        let dir = TempDir::new().unwrap();
        let t = Transcript::create(dir.path(), "vm1").unwrap();
        let name = t.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("console_vm1_"));
        assert!(name.ends_with(".log"));
        assert!(t.contents().unwrap().starts_with("Console log for vm1 - Started at "));
    }

    #[test]
    fn test_names_never_collide() {
        let dir = TempDir::new().unwrap();
        let a = Transcript::create(dir.path(), "vm1").unwrap();
        let b = Transcript::create(dir.path(), "vm1").unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_close_is_written_once() {
        let dir = TempDir::new().unwrap();
        let t = Transcript::create(dir.path(), "vm1").unwrap();
        t.append("booting\n").unwrap();
        t.close(false, Some("Console timed out"));
        t.close(true, None);
        let text = t.contents().unwrap();
        assert_eq!(text.matches("Final status:").count(), 1);
        assert!(text.contains("Final status: FAILED\nError: Console timed out\n"));
        assert!(t.append("late").is_err());
    }

    #[test]
    fn test_drop_marks_aborted() {
        let dir = TempDir::new().unwrap();
        let path = {
            let t = Transcript::create(dir.path(), "vm1").unwrap();
            t.path().to_path_buf()
        };
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("Final status: ABORTED"));
    }
}
