//! ffmpeg-backed conversion of an arbitrary audio byte stream into Ogg/Opus at
//! the fixed codec configuration expected by the voice transport.

use std::{path::PathBuf, process::Stdio};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, ChildStdout, Command},
};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, warn};

use super::{OPUS_APPLICATION, OPUS_CHANNELS, OPUS_FRAME_DURATION_MS, OPUS_SAMPLE_RATE};
use crate::error::Result;

/// Spawns ffmpeg processes that re-frame input audio as Ogg/Opus.
#[derive(Debug, Clone)]
pub struct Transmuxer {
    ffmpeg: PathBuf,
}

impl Transmuxer {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    fn args() -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            "pipe:0".into(),
            "-f".into(),
            "opus".into(),
            "-application".into(),
            OPUS_APPLICATION.into(),
            "-frame_duration".into(),
            OPUS_FRAME_DURATION_MS.to_string(),
            "-ar".into(),
            OPUS_SAMPLE_RATE.to_string(),
            "-ac".into(),
            OPUS_CHANNELS.to_string(),
            "pipe:1".into(),
        ]
    }

    /// Starts transmuxing `input`. Output becomes readable as soon as ffmpeg
    /// produces its first page; nothing is buffered up front.
    ///
    /// Must be called inside the tokio runtime: the returned stream bridges
    /// the child's stdout into a blocking reader bound to the current handle.
    pub fn transmux(&self, input: impl Into<Stdio>) -> Result<TransmuxedStream> {
        let mut child = Command::new(&self.ffmpeg)
            .args(Self::args())
            .stdin(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr("ffmpeg", stderr);
        }

        debug!("🎚️ ffmpeg iniciado (pid {:?})", child.id());
        Ok(TransmuxedStream {
            stdout,
            processes: ProcessGroup::new(vec![child]),
        })
    }
}

/// Ogg/Opus output of a running transmux pipeline.
pub struct TransmuxedStream {
    stdout: ChildStdout,
    processes: ProcessGroup,
}

impl TransmuxedStream {
    /// Adds an upstream process (e.g. the downloader feeding ffmpeg) whose
    /// lifetime should follow this stream.
    pub fn adopt(mut self, child: Child) -> Self {
        self.processes.children.push(child);
        self
    }

    /// Splits into a blocking reader over the Ogg bytes and the processes that
    /// produce them.
    pub fn into_parts(self) -> (SyncIoBridge<ChildStdout>, ProcessGroup) {
        (SyncIoBridge::new(self.stdout), self.processes)
    }
}

/// External processes owned by a packet source.
///
/// Released explicitly through [`ProcessGroup::release`] and, as a fallback,
/// when dropped.
#[derive(Debug, Default)]
pub struct ProcessGroup {
    children: Vec<Child>,
}

impl ProcessGroup {
    pub fn new(children: Vec<Child>) -> Self {
        Self { children }
    }

    /// Kills every process still running. Safe to call repeatedly.
    pub fn release(&mut self) {
        for mut child in self.children.drain(..) {
            if let Err(e) = child.start_kill() {
                // already exited
                debug!("Proceso {:?} ya finalizado: {}", child.id(), e);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.release();
    }
}

/// Forwards a child's stderr to the log, line by line, so the pipe never fills.
pub fn forward_stderr<R>(name: &'static str, stderr: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!("[{}] {}", name, line),
                Ok(None) => break,
                Err(e) => {
                    warn!("No se pudo leer stderr de {}: {}", name, e);
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_arguments_match_the_codec_contract() {
        let args = Transmuxer::args().join(" ");
        assert!(args.contains("-f opus"));
        assert!(args.contains("-application audio"));
        assert!(args.contains("-frame_duration 20"));
        assert!(args.contains("-ar 48000"));
        assert!(args.contains("-ac 2"));
        assert!(args.ends_with("pipe:1"));
    }

    #[test]
    fn releasing_an_empty_group_is_a_no_op() {
        let mut group = ProcessGroup::default();
        group.release();
        group.release();
        assert!(group.is_empty());
    }
}
