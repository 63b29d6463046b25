use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::collab::Converter;
use crate::config::ConverterConfig;
use crate::error::{Result, SignError};

/// Converts documents by shelling out to an office converter
/// (`soffice --headless --convert-to pdf` by default).
///
/// Each call gets its own scratch directory. The child is killed if the
/// future is dropped, so a timed-out conversion does not linger.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    config: ConverterConfig,
}

impl CommandConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, document: Vec<u8>) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir()?;
        let input = scratch
            .path()
            .join(format!("document.{}", self.config.input_extension));
        tokio::fs::write(&input, &document).await?;

        tracing::debug!(
            program = %self.config.program,
            bytes = document.len(),
            "Converting document"
        );

        let output = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("--outdir")
            .arg(scratch.path())
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SignError::Convert(format!("failed to start {}: {}", self.config.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SignError::Convert(if stderr.trim().is_empty() {
                format!("{} exit code: {:?}", self.config.program, output.status.code())
            } else {
                stderr.trim().to_string()
            }));
        }

        let converted = scratch
            .path()
            .join(format!("document.{}", self.config.output_extension));
        match tokio::fs::read(&converted).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SignError::Convert(format!(
                "{} produced no {} output",
                self.config.program, self.config.output_extension
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn output_extension(&self) -> &str {
        &self.config.output_extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter(program: &str, args: &[&str]) -> CommandConverter {
        CommandConverter::new(ConverterConfig {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            input_extension: "html".to_string(),
            output_extension: "pdf".to_string(),
        })
    }

    #[tokio::test]
    async fn missing_program_is_transient() {
        let err = converter("courtsign-no-such-converter", &[])
            .convert(b"<p/>".to_vec())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let err = converter("sh", &["-c", "echo broken >&2; exit 3", "sh"])
            .convert(b"<p/>".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::Convert(msg) if msg.contains("broken")));
    }

    #[tokio::test]
    async fn reads_converted_output_from_outdir() {
        // Stand-in converter: copies the input next to itself with the
        // output extension. Arguments arrive as `--outdir <dir> <file>`.
        let script = r#"cp "$3" "$2/document.pdf""#;
        let bytes = converter("sh", &["-c", script, "sh"])
            .convert(b"%PDF-fake".to_vec())
            .await
            .unwrap();
        assert_eq!(bytes, b"%PDF-fake");
    }
}
