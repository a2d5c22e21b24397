//! Document conversion via an external command.
//!
//! [`CommandConverter`] runs the configured converter binary against a
//! document on disk, collecting the converted text from stdout while
//! interpreting stderr chatter into sub-step progress events. The trait
//! seam lets the worker be tested without a real converter installed.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use docflow_core::signals;
use docflow_core::steps::unix_now;

use crate::events::{ProgressEvent, ProgressSender};
use crate::EngineError;

/// How many trailing stderr lines are kept for the failure message.
const STDERR_TAIL_LINES: usize = 40;

/// Output representation requested from the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
}

impl OutputFormat {
    fn as_arg(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        }
    }
}

/// Per-job conversion options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvertOptions {
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub force_ocr: bool,
}

/// Result of a conversion run.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Converted document text (Markdown, or raw JSON text).
    pub text: String,
    /// Parsed structure when JSON output was requested.
    pub structure: Option<serde_json::Value>,
    /// Converter-reported metadata.
    pub metadata: serde_json::Value,
}

/// Something that can turn a document file into text.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(
        &self,
        path: &Path,
        options: &ConvertOptions,
        progress: &ProgressSender,
    ) -> Result<ConversionOutput, EngineError>;
}

/// Runs a converter executable as a child process.
pub struct CommandConverter {
    program: String,
    extra_args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    async fn convert(
        &self,
        path: &Path,
        options: &ConvertOptions,
        progress: &ProgressSender,
    ) -> Result<ConversionOutput, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.extra_args)
            .arg(path)
            .arg("--format")
            .arg(options.output_format.as_arg());
        if options.force_ocr {
            cmd.arg("--force-ocr");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(EngineError::NotFound)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("converter stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("converter stderr not captured"))?;

        let stdout_task = async {
            let mut text = String::new();
            stdout.read_to_string(&mut text).await?;
            Ok::<_, std::io::Error>(text)
        };
        let stderr_task = relay_stderr(stderr, progress);

        let (text, tail) = tokio::join!(stdout_task, stderr_task);
        let text = text?;
        let status = child.wait().await?;

        if !status.success() {
            return Err(EngineError::ConversionFailed {
                exit_code: status.code(),
                stderr: tail.join("\n"),
            });
        }

        let structure = match options.output_format {
            OutputFormat::Json => Some(serde_json::from_str(&text)?),
            OutputFormat::Markdown => None,
        };
        Ok(ConversionOutput {
            metadata: serde_json::json!({ "format": options.output_format }),
            text,
            structure,
        })
    }
}

/// Read stderr line by line, turning recognizable activity into sub-step
/// events. Each distinct sub-step name fires once; engines re-print
/// progress bars constantly and repeats carry no new information. Returns
/// the trailing lines for error reporting.
async fn relay_stderr(
    stderr: tokio::process::ChildStderr,
    progress: &ProgressSender,
) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut tail: Vec<String> = Vec::new();
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        // Progress bars emit carriage-return updates within one line.
        for chunk in line.split('\r') {
            if let Some(name) = signals::interpret(chunk) {
                if seen.insert(name.clone()) {
                    let _ = progress.send(ProgressEvent::SubStepStarted {
                        name,
                        timestamp: unix_now(),
                    });
                }
            }
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use std::io::Write as _;

    fn script_converter(script: &str) -> (CommandConverter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-converter.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{script}").unwrap();
        drop(file);
        let converter = CommandConverter::new("sh", vec![path.to_string_lossy().into_owned()]);
        (converter, dir)
    }

    #[tokio::test]
    async fn captures_stdout_and_emits_sub_steps() {
        let (converter, _dir) = script_converter(
            r##"echo "Recognizing layout: 50%" >&2
echo "Recognizing layout: 90%" >&2
echo "Detecting bboxes: 10%" >&2
echo "# Converted document""##,
        );
        let (tx, mut rx) = events::channel();
        let out = converter
            .convert(Path::new("/dev/null"), &ConvertOptions::default(), &tx)
            .await
            .unwrap();
        drop(tx);

        assert!(out.text.contains("# Converted document"));
        assert!(out.structure.is_none());

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ProgressEvent::SubStepStarted { name, .. } = event {
                names.push(name);
            }
        }
        // The repeated layout line is deduplicated.
        assert_eq!(
            names,
            vec!["Recognizing document layout", "Detecting bounding boxes"]
        );
    }

    #[tokio::test]
    async fn nonzero_exit_reports_stderr_tail() {
        let (converter, _dir) = script_converter(
            r#"echo "model weights missing" >&2
exit 3"#,
        );
        let (tx, _rx) = events::channel();
        let err = converter
            .convert(Path::new("/dev/null"), &ConvertOptions::default(), &tx)
            .await
            .unwrap_err();
        match err {
            EngineError::ConversionFailed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("model weights missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_maps_to_not_found() {
        let converter = CommandConverter::new("definitely-not-a-real-binary", Vec::new());
        let (tx, _rx) = events::channel();
        let err = converter
            .convert(Path::new("/dev/null"), &ConvertOptions::default(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn json_format_parses_structure() {
        let (converter, _dir) = script_converter(r#"echo '{"pages": 2}'"#);
        let (tx, _rx) = events::channel();
        let options = ConvertOptions {
            output_format: OutputFormat::Json,
            force_ocr: false,
        };
        let out = converter
            .convert(Path::new("/dev/null"), &options, &tx)
            .await
            .unwrap();
        assert_eq!(out.structure.unwrap()["pages"], 2);
    }
}
