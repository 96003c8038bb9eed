//! Stream-to-stream transcoding through an external FFmpeg process.

use std::io;
use std::process::Stdio;

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Byte stream flowing into or out of a transcoder.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

const READ_BUFFER_SIZE: usize = 8192;

/// Container produced by a transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    WebM,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::WebM => "video/webm",
        }
    }

    fn ffmpeg_args(&self) -> Vec<&'static str> {
        match self {
            OutputFormat::WebM => vec![
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-f",
                "webm",
                "-c:v",
                "libvpx",
                "-qmin",
                "0",
                "-qmax",
                "50",
                "-crf",
                "5",
                "-b:v",
                "1024k",
                "-c:a",
                "libvorbis",
                "pipe:1",
            ],
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("transcoder process is missing its {pipe} pipe")]
    MissingPipe { pipe: &'static str },
}

/// Converts a sequential byte stream into another container format.
///
/// Output is sequential only; it cannot be seeked independently of the input.
pub trait Transcoder: Send + Sync {
    /// Starts transcoding `input` and returns the converted stream.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Spawn` - The external process could not be started
    /// - `TranscodeError::MissingPipe` - The process came up without its stdio pipes
    fn transcode(&self, input: ByteStream, format: OutputFormat)
    -> Result<ByteStream, TranscodeError>;
}

/// Transcoder backed by an `ffmpeg` binary on `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `program` instead of `ffmpeg`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn spawn_input_pump(mut input: ByteStream, mut stdin: ChildStdin) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut fed = 0u64;

            while let Some(chunk) = input.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Transcoder input failed after {} bytes: {}", fed, e);
                        break;
                    }
                };

                if let Err(e) = stdin.write_all(&bytes).await {
                    // The consumer went away and FFmpeg exited
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        debug!("FFmpeg closed its input after {} bytes", fed);
                    } else {
                        warn!(error = %e, "Failed to write to FFmpeg stdin");
                    }
                    break;
                }
                fed += bytes.len() as u64;
            }

            drop(stdin);
            debug!("Input pump finished, fed {} bytes to FFmpeg", fed);
        })
    }

    fn spawn_stderr_reader(stderr: ChildStderr) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();

            while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                if !line.trim().is_empty() {
                    warn!("FFmpeg stderr: {}", line.trim());
                }
                line.clear();
            }
        })
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(
        &self,
        input: ByteStream,
        format: OutputFormat,
    ) -> Result<ByteStream, TranscodeError> {
        info!(program = %self.program, ?format, "Starting transcode");

        let mut child = Command::new(&self.program)
            .args(format.ffmpeg_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(TranscodeError::MissingPipe { pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TranscodeError::MissingPipe { pipe: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TranscodeError::MissingPipe { pipe: "stderr" })?;

        let pump_handle = Self::spawn_input_pump(input, stdin);
        let stderr_handle = Self::spawn_stderr_reader(stderr);

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!("FFmpeg transcode completed"),
                Ok(status) => debug!("FFmpeg exited with status: {}", status),
                Err(e) => error!(error = %e, "Failed to wait for FFmpeg"),
            }

            let _ = pump_handle.await;
            let _ = stderr_handle.await;
        });

        let output = stream::unfold(stdout, |mut stdout| async move {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            match stdout.read(&mut buffer).await {
                Ok(0) => None,
                Ok(n) => {
                    buffer.truncate(n);
                    Some((Ok(Bytes::from(buffer)), stdout))
                }
                Err(e) => Some((Err(e), stdout)),
            }
        });

        Ok(output.boxed())
    }
}
