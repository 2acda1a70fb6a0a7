//! External transcoder invocation (ImageMagick-compatible command line)
//!
//! Last resort for RAW files that neither decode directly nor carry a usable
//! embedded thumbnail. The tool writes the finished JPEG itself; the caller
//! only verifies that something plausible came out.

use crate::error::StepError;
use crate::PreviewConfig;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;
use wait_timeout::ChildExt;

/// Stderr kept for error messages; anything past this is read and dropped
const STDERR_LIMIT: u64 = 16 * 1024;

/// Build the transcoder command for `original`, writing a JPEG to `output`
pub fn command(config: &PreviewConfig, original: &Path, output: &Path) -> Command {
    let mut target = OsString::from("JPG:");
    target.push(output.as_os_str());

    let mut cmd = Command::new(&config.transcoder.program);
    cmd.arg(original)
        .arg("-auto-orient")
        .arg("-thumbnail")
        .arg(config.thumbnail_geometry())
        .arg("-quality")
        .arg(config.jpeg_quality.to_string())
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    cmd
}

/// Run the transcoder and return the size of the file it produced
pub fn run(config: &PreviewConfig, original: &Path, output: &Path) -> Result<u64, StepError> {
    let program = &config.transcoder.program;
    let timeout = config.transcoder.timeout();

    debug!(program = %program, original = %original.display(), "invoking transcoder");

    let mut child = match command(config, original, output).spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StepError::ToolUnavailable(program.clone()));
        }
        Err(e) => return Err(e.into()),
    };

    // Drained concurrently so a chatty tool never blocks on a full pipe
    let stderr = child.stderr.take().map(|pipe| thread::spawn(move || drain(pipe)));

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            child.kill().ok();
            child.wait().ok();
            return Err(StepError::ToolTimeout(timeout));
        }
    };

    if !status.success() {
        let stderr = stderr.and_then(|reader| reader.join().ok()).unwrap_or_default();
        return Err(StepError::ToolFailed {
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    let size = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    if size < config.transcoder.min_output_bytes {
        return Err(StepError::OutputTooSmall(size));
    }

    Ok(size)
}

fn drain(mut pipe: impl Read) -> String {
    let mut kept = Vec::new();
    pipe.by_ref().take(STDERR_LIMIT).read_to_end(&mut kept).ok();
    io::copy(&mut pipe, &mut io::sink()).ok();
    String::from_utf8_lossy(&kept).into_owned()
}
