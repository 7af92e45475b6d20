//! J-Link debug-probe driver
//!
//! Drives SEGGER's `JLinkExe` as an opaque subprocess: board parameters go
//! in as flags, a newline-delimited command script goes in on stdin, and
//! exit code 0 means success. Nothing here interprets the tool's protocol;
//! it is the process-boundary implementation of
//! [`rprovision_core::flasher::Flasher`].
//!
//! The executable is looked up on `PATH` first and then in the cached tools
//! directory, where it is marked executable before first use.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use rprovision_core::board::BoardProfile;
use rprovision_core::error::FlashError;
use rprovision_core::flasher::{Flasher, INTERFACE, SPEED_KHZ};

/// Executable name looked up on PATH and in the tools directory
pub const TOOL_NAME: &str = "JLinkExe";

/// Wall-clock limit for one tool invocation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL: usize = 800;

/// The J-Link commander, driven over stdin
pub struct JLink {
    tools_dir: PathBuf,
    timeout: Duration,
}

impl JLink {
    /// Driver that falls back to `tools_dir` when the tool is not on PATH
    ///
    /// The executable is resolved per invocation, so the tools directory
    /// only has to exist by the time the first flash or reset runs.
    pub fn new(tools_dir: PathBuf) -> Self {
        Self {
            tools_dir,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the subprocess timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn locate(&self) -> Result<PathBuf, FlashError> {
        if let Ok(exe) = which::which(TOOL_NAME) {
            log::debug!("using {} from PATH", exe.display());
            return Ok(exe);
        }

        let cached = self.tools_dir.join(TOOL_NAME);
        if !cached.is_file() {
            return Err(FlashError::ToolNotFound {
                searched: self.tools_dir.clone(),
            });
        }
        make_executable(&cached)?;
        log::debug!("using cached tool {}", cached.display());
        Ok(cached)
    }

    fn run_script(&self, profile: &BoardProfile, script: &str) -> Result<(), FlashError> {
        let exe = self.locate()?;
        log::debug!(
            "running {} for {} ({} @ {} kHz)",
            exe.display(),
            profile.flash_device_name,
            INTERFACE,
            SPEED_KHZ
        );

        let mut child = Command::new(&exe)
            .args(tool_args(profile))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // close stdin after the script so the tool sees EOF after quit
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }

        // drain both pipes while waiting so the tool never blocks on a full
        // pipe buffer
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = self.wait_with_deadline(&mut child)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if !status.success() {
            let detail = if stderr.is_empty() {
                // the commander reports most failures on stdout
                tail(&stdout)
            } else {
                tail(&stderr)
            };
            return Err(FlashError::Probe {
                status: status.code().unwrap_or(-1),
                stderr: detail,
            });
        }
        Ok(())
    }

    fn wait_with_deadline(&self, child: &mut Child) -> Result<ExitStatus, FlashError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FlashError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

impl Flasher for JLink {
    fn flash(&self, image: &Path, profile: &BoardProfile) -> Result<(), FlashError> {
        log::info!(
            "flashing {} onto {}",
            image.display(),
            profile.flash_device_name
        );
        self.run_script(profile, &flash_script(image))
    }

    fn reset(&self, profile: &BoardProfile) -> Result<(), FlashError> {
        log::info!("resetting {}", profile.flash_device_name);
        self.run_script(profile, RESET_SCRIPT)
    }
}

/// Fixed flag set selecting the target, interface, speed, and auto-connect
fn tool_args(profile: &BoardProfile) -> Vec<String> {
    vec![
        "-device".to_string(),
        profile.flash_device_name.to_string(),
        "-if".to_string(),
        INTERFACE.to_string(),
        "-speed".to_string(),
        SPEED_KHZ.to_string(),
        "-autoconnect".to_string(),
        "1".to_string(),
    ]
}

/// Command script: reset, load the image, reset, run, quit
fn flash_script(image: &Path) -> String {
    format!("r\nloadfile {}\nr\ng\nq\n", image.display())
}

/// Command script: reset, run, quit
const RESET_SCRIPT: &str = "r\ng\nq\n";

fn tail(output: &[u8]) -> String {
    let text = String::from_utf8_lossy(output);
    let text = text.trim_end();
    match text.char_indices().nth_back(STDERR_TAIL - 1) {
        Some((idx, _)) => text[idx..].to_string(),
        None => text.to_string(),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), FlashError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), FlashError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rprovision_core::board;

    #[test]
    fn test_tool_args_for_xg24() {
        let profile = board::resolve("xg24_ek2703a").unwrap();
        assert_eq!(
            tool_args(profile),
            vec![
                "-device",
                "EFR32MG24BxxxF1536",
                "-if",
                "SWD",
                "-speed",
                "4000",
                "-autoconnect",
                "1",
            ]
        );
    }

    #[test]
    fn test_flash_script_order() {
        let script = flash_script(Path::new("/tmp/merged.elf"));
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines, vec!["r", "loadfile /tmp/merged.elf", "r", "g", "q"]);
    }

    #[test]
    fn test_reset_script() {
        assert_eq!(RESET_SCRIPT, "r\ng\nq\n");
    }

    #[test]
    fn test_tail_keeps_short_output() {
        assert_eq!(tail(b"short error\n"), "short error");
    }

    #[test]
    fn test_tail_truncates_long_output() {
        let long = "x".repeat(STDERR_TAIL * 2);
        assert_eq!(tail(long.as_bytes()).len(), STDERR_TAIL);
    }

    #[test]
    fn test_missing_tool_reports_search_dir() {
        let dir = std::env::temp_dir().join("rprovision-jlink-missing");
        let jlink = JLink::new(dir.clone());
        // only meaningful when no JLinkExe is installed on the host
        if which::which(TOOL_NAME).is_err() {
            let err = jlink.locate().unwrap_err();
            assert!(matches!(err, FlashError::ToolNotFound { searched } if searched == dir));
        }
    }
}
