use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::collab::QrGenerator;
use crate::config::QrConfig;
use crate::error::{Result, SignError};

/// Modules across a typical URL-sized QR symbol, used to turn a requested
/// pixel width into qrencode's per-module size.
const APPROX_MODULES: u32 = 25;

/// Generates PNG QR codes with the `qrencode` command line tool.
#[derive(Debug, Clone)]
pub struct CommandQrGenerator {
    config: QrConfig,
}

impl CommandQrGenerator {
    pub fn new(config: QrConfig) -> Self {
        Self { config }
    }

    fn module_size(size: u32) -> u32 {
        (size / APPROX_MODULES).max(1)
    }
}

#[async_trait]
impl QrGenerator for CommandQrGenerator {
    async fn generate(&self, url: &str, size: u32) -> Result<Vec<u8>> {
        let output = Command::new(&self.config.program)
            .args(["-t", "PNG", "-o", "-"])
            .arg("-s")
            .arg(Self::module_size(size).to_string())
            .arg("-m")
            .arg(self.config.margin.to_string())
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SignError::Qr(format!("failed to start {}: {}", self.config.program, e)))?;

        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SignError::Qr(format!(
                "{} exit code {:?}: {}",
                self.config.program,
                output.status.code(),
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}
