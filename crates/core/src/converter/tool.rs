//! Converter plugin that shells out to an external program.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::config::ToolConfig;
use super::error::ConverterError;
use super::traits::Converter;
use super::types::ConversionRequest;

/// Maximum amount of stderr kept in an error message.
const MAX_STDERR_BYTES: usize = 4096;

/// Runs a configured program once per conversion.
pub struct ToolConverter {
    name: String,
    config: ToolConfig,
}

impl ToolConverter {
    /// Creates a new tool converter.
    pub fn new(name: impl Into<String>, config: ToolConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// The configuration this converter runs with.
    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Substitutes the placeholders in the argument template.
    fn build_args(&self, request: &ConversionRequest) -> Vec<String> {
        let output_dir = request
            .output_path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let input = request.input_path.to_string_lossy();
        let output = request.output_path.to_string_lossy();

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output_dir}", &output_dir)
                    .replace("{output}", &output)
                    .replace("{source}", &request.source_format)
                    .replace("{target}", &request.target_format)
            })
            .collect()
    }

    fn spawn_error(&self, e: std::io::Error) -> ConverterError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConverterError::ToolNotFound {
                program: self.config.program.clone(),
            }
        } else {
            ConverterError::Io(e)
        }
    }
}

fn truncate_stderr(stderr: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut end = text.len().min(MAX_STDERR_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

async fn ensure_parent(path: &Path) -> Result<(), ConverterError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|_| ConverterError::OutputDirectoryFailed {
                path: parent.to_path_buf(),
            })?;
    }
    Ok(())
}

#[async_trait]
impl Converter for ToolConverter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn convert(&self, request: ConversionRequest) -> Result<PathBuf, ConverterError> {
        if !self.config.handles_target(&request.target_format) {
            return Err(ConverterError::unsupported(
                &request.source_format,
                &request.target_format,
            ));
        }

        if !tokio::fs::try_exists(&request.input_path).await? {
            return Err(ConverterError::InputNotFound {
                path: request.input_path.clone(),
            });
        }

        ensure_parent(&request.output_path).await?;

        let args = self.build_args(&request);
        debug!(
            "Running {} for job {}: {:?} {:?}",
            self.name, request.job_id, self.config.program, args
        );

        let start = Instant::now();
        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // Dropping the future on timeout kills the child.
        let output = match timeout(Duration::from_secs(self.config.timeout_secs), output).await {
            Ok(result) => result.map_err(|e| self.spawn_error(e))?,
            Err(_) => {
                return Err(ConverterError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                })
            }
        };

        if !output.status.success() {
            return Err(ConverterError::conversion_failed(
                format!(
                    "{} exited with code: {:?}",
                    self.config.program.display(),
                    output.status.code()
                ),
                truncate_stderr(&output.stderr),
            ));
        }

        if !tokio::fs::try_exists(&request.output_path).await? {
            return Err(ConverterError::conversion_failed(
                "Output file not created",
                truncate_stderr(&output.stderr),
            ));
        }

        debug!(
            "{} finished job {} in {} ms",
            self.name,
            request.job_id,
            start.elapsed().as_millis()
        );

        Ok(request.output_path)
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        Command::new(&self.config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path, target: &str) -> ConversionRequest {
        ConversionRequest::new(
            "job-1",
            dir.join("input.txt"),
            dir.join("out").join(format!("input.{}", target)),
            "txt",
            target,
        )
    }

    #[test]
    fn test_build_args_substitutes_placeholders() {
        let converter = ToolConverter::new(
            "pandoc",
            ToolConfig::new(
                "pandoc",
                &["{input}", "-f", "{source}", "-t", "{target}", "-o", "{output}", "{output_dir}"],
            ),
        );
        let req = ConversionRequest::new("j", "/up/a.md", "/out/a.html", "md", "html");
        let args = converter.build_args(&req);
        assert_eq!(
            args,
            vec!["/up/a.md", "-f", "md", "-t", "html", "-o", "/out/a.html", "/out"]
        );
    }

    #[test]
    fn test_truncate_stderr() {
        assert_eq!(truncate_stderr(b"  \n"), None);
        assert_eq!(truncate_stderr(b"oops\n"), Some("oops".to_string()));
        let long = vec![b'x'; MAX_STDERR_BYTES * 2];
        assert_eq!(truncate_stderr(&long).unwrap().len(), MAX_STDERR_BYTES);
    }

    #[tokio::test]
    async fn test_target_outside_allow_list_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let converter =
            ToolConverter::new("magick", ToolConfig::new("magick", &[]).with_targets(&["png"]));
        let err = converter.convert(request(dir.path(), "gif")).await.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let converter = ToolConverter::new("cp", ToolConfig::new("cp", &["{input}", "{output}"]));
        let err = converter.convert(request(dir.path(), "md")).await.unwrap_err();
        assert!(matches!(err, ConverterError::InputNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_tool_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), b"content").unwrap();
        let converter = ToolConverter::new("cp", ToolConfig::new("cp", &["{input}", "{output}"]));

        let written = converter.convert(request(dir.path(), "md")).await.unwrap();
        assert_eq!(written, dir.path().join("out").join("input.md"));
        assert_eq!(std::fs::read(&written).unwrap(), b"content");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), b"content").unwrap();
        let converter = ToolConverter::new(
            "sh",
            ToolConfig::new("sh", &["-c", "echo broken input >&2; exit 3"]),
        );

        let err = converter.convert(request(dir.path(), "md")).await.unwrap_err();
        match err {
            ConverterError::ConversionFailed { reason, stderr } => {
                assert!(reason.contains("Some(3)"));
                assert_eq!(stderr.as_deref(), Some("broken input"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), b"content").unwrap();
        let converter = ToolConverter::new("true", ToolConfig::new("true", &[]));

        let err = converter.convert(request(dir.path(), "md")).await.unwrap_err();
        assert!(matches!(err, ConverterError::ConversionFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), b"content").unwrap();
        let converter =
            ToolConverter::new("sleep", ToolConfig::new("sleep", &["5"]).with_timeout(1));

        let err = converter.convert(request(dir.path(), "md")).await.unwrap_err();
        assert!(matches!(err, ConverterError::Timeout { timeout_secs: 1 }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.txt"), b"content").unwrap();
        let converter = ToolConverter::new(
            "ghost",
            ToolConfig::new("definitely-not-a-real-binary-9f2c", &["{input}"]),
        );

        let err = converter.convert(request(dir.path(), "md")).await.unwrap_err();
        assert!(matches!(err, ConverterError::ToolNotFound { .. }));
        assert!(matches!(
            converter.validate().await,
            Err(ConverterError::ToolNotFound { .. })
        ));
    }
}
