// src/system/redirect.rs

use super::lock;
use os_pipe::{PipeReader, PipeWriter};
use std::fmt;
use std::io::{self, Write};
use std::ops::BitOr;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("Not a valid pipe option: {0:#04b}. Select stdout and/or stderr.")]
    InvalidPipeOption(u8),
    #[error("{0} already piped out!")]
    AlreadyPiped(Stream),
    #[error("Could not create pipe: {0}")]
    Pipe(#[source] io::Error),
    #[error("Error when copying stream: {0}")]
    StreamCopy(#[source] io::Error),
    #[error("Stream copier thread panicked.")]
    CopierPanicked,
}

/// A standard stream that can be captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "Stdout"),
            Self::Stderr => write!(f, "Stderr"),
        }
    }
}

/// Bitmask selecting standard streams for `pipe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamMask(u8);

impl StreamMask {
    pub const NONE: Self = Self(0);
    /// Reserved: stdin is never captured.
    pub const STDIN: Self = Self(0x01);
    pub const STDOUT: Self = Self(0x02);
    pub const STDERR: Self = Self(0x04);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for StreamMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Shared byte buffer that receives captured output.
///
/// Clones share the same storage, so a clone handed to `pipe` can be read
/// by the caller once the chain has run.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured output, lossily decoded as UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.buffer)).into_owned()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        lock(&self.buffer).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.buffer).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.buffer).clear();
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.buffer).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Where child processes send stdout and stderr. `None` means inherit.
#[derive(Debug, Clone, Default)]
pub struct Streams {
    stdout: Option<Arc<PipeWriter>>,
    stderr: Option<Arc<PipeWriter>>,
}

impl Streams {
    pub fn is_piped(&self, stream: Stream) -> bool {
        self.slot(stream).is_some()
    }

    /// A fresh `Stdio` for a child: a dup of the pipe writer, or inherit.
    pub fn stdio(&self, stream: Stream) -> io::Result<Stdio> {
        match self.slot(stream) {
            Some(writer) => Ok(Stdio::from(writer.try_clone()?)),
            None => Ok(Stdio::inherit()),
        }
    }

    fn slot(&self, stream: Stream) -> Option<&Arc<PipeWriter>> {
        match stream {
            Stream::Stdout => self.stdout.as_ref(),
            Stream::Stderr => self.stderr.as_ref(),
        }
    }
}

/// An active pipe splice: the streams to run under, plus the copier draining them.
#[derive(Debug)]
pub struct Redirection {
    streams: Streams,
    copier: JoinHandle<io::Result<u64>>,
}

impl Redirection {
    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    /// Closes this side's write end and joins the copier.
    ///
    /// Every clone of [`Redirection::streams`] must be dropped first, otherwise
    /// the copier never sees end-of-file. Children still holding the write end
    /// (started in the background inside the scope) keep it open until they exit.
    pub fn finish(self) -> Result<u64, RedirectError> {
        let Self { streams, copier } = self;
        drop(streams);
        match copier.join() {
            Ok(copied) => copied.map_err(RedirectError::StreamCopy),
            Err(_) => Err(RedirectError::CopierPanicked),
        }
    }
}

/// Splices one fresh pipe into the streams selected by `mask` and starts
/// draining it into `sink`. Streams not selected keep their current target.
pub fn redirect(
    current: &Streams,
    mask: StreamMask,
    sink: &Capture,
) -> Result<Redirection, RedirectError> {
    let wants_stdout = mask.contains(StreamMask::STDOUT);
    let wants_stderr = mask.contains(StreamMask::STDERR);
    if !wants_stdout && !wants_stderr {
        return Err(RedirectError::InvalidPipeOption(mask.bits()));
    }
    if wants_stderr && current.is_piped(Stream::Stderr) {
        return Err(RedirectError::AlreadyPiped(Stream::Stderr));
    }
    if wants_stdout && current.is_piped(Stream::Stdout) {
        return Err(RedirectError::AlreadyPiped(Stream::Stdout));
    }

    let (reader, writer) = os_pipe::pipe().map_err(RedirectError::Pipe)?;
    let writer = Arc::new(writer);
    let streams = Streams {
        stdout: if wants_stdout {
            Some(Arc::clone(&writer))
        } else {
            current.stdout.clone()
        },
        stderr: if wants_stderr {
            Some(Arc::clone(&writer))
        } else {
            current.stderr.clone()
        },
    };
    drop(writer);

    let copier = spawn_copier(reader, sink.clone()).map_err(RedirectError::Pipe)?;
    log::debug!("Pipe spliced in for mask {:#04b}.", mask.bits());
    Ok(Redirection { streams, copier })
}

fn spawn_copier(mut reader: PipeReader, mut sink: Capture) -> io::Result<JoinHandle<io::Result<u64>>> {
    thread::Builder::new()
        .name("runchain-pipe".to_string())
        .spawn(move || io::copy(&mut reader, &mut sink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_mask_combination() {
        let both = StreamMask::STDOUT | StreamMask::STDERR;
        assert!(both.contains(StreamMask::STDOUT));
        assert!(both.contains(StreamMask::STDERR));
        assert!(!both.contains(StreamMask::STDIN));
        assert!(!StreamMask::NONE.contains(StreamMask::NONE));
    }

    #[test]
    fn test_redirect_rejects_masks_without_output_streams() {
        let streams = Streams::default();
        let sink = Capture::new();
        for mask in [StreamMask::NONE, StreamMask::STDIN, StreamMask::from_bits(0x08)] {
            let err = redirect(&streams, mask, &sink).unwrap_err();
            assert!(matches!(err, RedirectError::InvalidPipeOption(_)));
        }
    }

    #[test]
    fn test_redirect_rejects_already_piped_stream() {
        let sink = Capture::new();
        let outer = redirect(&Streams::default(), StreamMask::STDOUT, &sink).unwrap();

        let err = redirect(outer.streams(), StreamMask::STDOUT, &sink).unwrap_err();
        assert!(matches!(err, RedirectError::AlreadyPiped(Stream::Stdout)));

        // The other stream is still free.
        let inner = redirect(outer.streams(), StreamMask::STDERR, &sink).unwrap();
        assert!(inner.streams().is_piped(Stream::Stdout));
        assert!(inner.streams().is_piped(Stream::Stderr));

        inner.finish().unwrap();
        outer.finish().unwrap();
    }

    #[test]
    fn test_child_output_is_drained_into_capture() {
        let sink = Capture::new();
        let redirection = redirect(&Streams::default(), StreamMask::STDOUT, &sink).unwrap();

        let status = Command::new("sh")
            .arg("-c")
            .arg("echo captured")
            .stdout(redirection.streams().stdio(Stream::Stdout).unwrap())
            .status()
            .unwrap();
        assert!(status.success());

        let copied = redirection.finish().unwrap();
        assert_eq!(copied, 9);
        assert_eq!(sink.contents(), "captured\n");
    }

    #[test]
    fn test_unpiped_streams_inherit() {
        let streams = Streams::default();
        assert!(!streams.is_piped(Stream::Stdout));
        assert!(streams.stdio(Stream::Stderr).is_ok());
    }

    #[test]
    fn test_capture_clones_share_storage() {
        let capture = Capture::new();
        let mut writer = capture.clone();
        writer.write_all(b"abc").unwrap();
        assert_eq!(capture.contents(), "abc");
        assert_eq!(capture.len(), 3);
        capture.clear();
        assert!(writer.is_empty());
    }
}
