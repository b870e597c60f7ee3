use super::{MediaProbe, ProbeError};
use crate::scanner::metadata;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

/// `fpcalc -json` output.
#[derive(Debug, Deserialize)]
struct FpcalcOutput {
    duration: f64,
    fingerprint: String,
}

/// Probe backed by chromaprint's `fpcalc`, lofty tag reading and SHA-256.
pub struct ToolProbe {
    fpcalc: PathBuf,
}

impl ToolProbe {
    pub fn new(fpcalc: impl Into<PathBuf>) -> Self {
        Self {
            fpcalc: fpcalc.into(),
        }
    }

    fn tool_name(&self) -> String {
        self.fpcalc.display().to_string()
    }

    fn run_fpcalc(&self, path: &Path) -> Result<FpcalcOutput, ProbeError> {
        let output = Command::new(&self.fpcalc)
            .arg("-json")
            .arg(path)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ProbeError::ToolNotFound {
                    tool: self.tool_name(),
                },
                _ => ProbeError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ToolFailed {
                tool: self.tool_name(),
                path: path.display().to_string(),
                message: stderr.trim().to_string(),
            });
        }

        parse_fpcalc_output(&output.stdout).map_err(|e| ProbeError::InvalidOutput {
            tool: self.tool_name(),
            message: e.to_string(),
        })
    }
}

impl Default for ToolProbe {
    fn default() -> Self {
        Self::new("fpcalc")
    }
}

impl MediaProbe for ToolProbe {
    fn fingerprint(&self, path: &Path) -> Result<String, ProbeError> {
        let fp = self.run_fpcalc(path)?.fingerprint;
        if fp.is_empty() {
            return Err(ProbeError::InvalidOutput {
                tool: self.tool_name(),
                message: format!("empty fingerprint for {}", path.display()),
            });
        }
        Ok(fp)
    }

    /// Container duration via lofty, falling back to the decoded length fpcalc reports.
    fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        match metadata::read_tags(path) {
            Ok(tags) => {
                if let Some(secs) = tags.duration_secs {
                    return Ok(secs);
                }
            }
            Err(e) => log::debug!("No container duration for {}: {}", path.display(), e),
        }

        let secs = self.run_fpcalc(path)?.duration;
        if secs > 0.0 {
            Ok(secs)
        } else {
            Err(ProbeError::NoDuration(path.display().to_string()))
        }
    }

    fn content_hash(&self, path: &Path) -> Result<String, ProbeError> {
        hash_file(path)
    }

    fn rating(&self, path: &Path) -> Result<Option<f64>, ProbeError> {
        let tags = metadata::read_tags(path).map_err(|e| ProbeError::Tags {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(tags.rating)
    }
}

fn parse_fpcalc_output(stdout: &[u8]) -> serde_json::Result<FpcalcOutput> {
    serde_json::from_slice(stdout)
}

/// Hex SHA-256 of a file's bytes, read in 1 MiB chunks.
pub fn hash_file(path: &Path) -> Result<String, ProbeError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
