//! Incremental subtitle writer.
//!
//! One line per committed segment, written as soon as the segment exists:
//!
//! ```text
//! 00:00:10 - 00:00:14 : Second chunk here.
//! ```
//!
//! The `.srt` extension is kept for compatibility with existing consumers;
//! the line format is not SubRip.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{FcError, FcResult};
use crate::model::{PassKind, Segment};

/// `HH:MM:SS`, truncating fractional seconds. Negative input clamps to zero.
#[must_use]
pub fn format_timestamp(secs: f64) -> String {
    let whole = if secs.is_finite() && secs > 0.0 {
        secs.trunc() as u64
    } else {
        0
    };
    let hours = whole / 3600;
    let minutes = (whole % 3600) / 60;
    let seconds = whole % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[must_use]
pub fn format_line(segment: &Segment) -> String {
    format!(
        "{} - {} : {}",
        format_timestamp(segment.start_sec),
        format_timestamp(segment.end_sec),
        segment.text.trim()
    )
}

/// Output paths for a video: `<stem>_original.srt`, `<stem>_translated.srt`.
#[must_use]
pub fn subtitle_paths(dir: &Path, video_path: &Path) -> (PathBuf, PathBuf) {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "output".to_owned());
    (
        dir.join(format!("{stem}_original.srt")),
        dir.join(format!("{stem}_translated.srt")),
    )
}

/// Sink backed by the two files under a subtitle directory.
pub type FileSink = SubtitleSink<BufWriter<File>>;

/// Two line-oriented streams, one per pass.
#[derive(Debug)]
pub struct SubtitleSink<W: Write> {
    original: Option<W>,
    translated: Option<W>,
    paths: Vec<PathBuf>,
    lines_written: usize,
}

impl FileSink {
    /// Create (truncating) both files under `dir`.
    pub fn create(dir: &Path, video_path: &Path) -> FcResult<Self> {
        let (original_path, translated_path) = subtitle_paths(dir, video_path);
        let open = |path: &Path| {
            File::create(path).map(BufWriter::new).map_err(|err| {
                FcError::SinkWriteFailed(format!("cannot create `{}`: {err}", path.display()))
            })
        };
        let original = open(&original_path)?;
        let translated = open(&translated_path)?;
        tracing::debug!(
            original = %original_path.display(),
            translated = %translated_path.display(),
            "subtitle sink opened"
        );
        let mut sink = Self::from_writers(original, translated);
        sink.paths = vec![original_path, translated_path];
        Ok(sink)
    }
}

impl<W: Write> SubtitleSink<W> {
    #[must_use]
    pub fn from_writers(original: W, translated: W) -> Self {
        Self {
            original: Some(original),
            translated: Some(translated),
            paths: Vec::new(),
            lines_written: 0,
        }
    }

    /// Files backing this sink, empty for in-memory writers.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    #[must_use]
    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.original.is_none() && self.translated.is_none()
    }

    /// Append one line to the stream for `segment.pass`.
    pub fn write_segment(&mut self, segment: &Segment) -> FcResult<()> {
        let pass = segment.pass;
        let writer = self.writer_mut(pass)?;
        writeln!(writer, "{}", format_line(segment)).map_err(|err| {
            FcError::SinkWriteFailed(format!("{} stream: {err}", pass.as_str()))
        })?;
        self.lines_written += 1;
        Ok(())
    }

    /// Flush both streams so a partial run leaves readable output.
    pub fn flush(&mut self) -> FcResult<()> {
        for (pass, writer) in [
            (PassKind::Original, self.original.as_mut()),
            (PassKind::Translated, self.translated.as_mut()),
        ] {
            if let Some(writer) = writer {
                writer.flush().map_err(|err| {
                    FcError::SinkWriteFailed(format!("{} stream flush: {err}", pass.as_str()))
                })?;
            }
        }
        Ok(())
    }

    /// Flush and release both streams. A second call is a no-op.
    ///
    /// Both writers are released even when the first flush fails; the first
    /// error is returned.
    pub fn close(&mut self) -> FcResult<()> {
        let mut first_err = None;
        for (pass, writer) in [
            (PassKind::Original, self.original.take()),
            (PassKind::Translated, self.translated.take()),
        ] {
            if let Some(mut writer) = writer
                && let Err(err) = writer.flush()
                && first_err.is_none()
            {
                first_err = Some(FcError::SinkWriteFailed(format!(
                    "{} stream close: {err}",
                    pass.as_str()
                )));
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn writer_mut(&mut self, pass: PassKind) -> FcResult<&mut W> {
        let slot = match pass {
            PassKind::Original => self.original.as_mut(),
            PassKind::Translated => self.translated.as_mut(),
        };
        slot.ok_or_else(|| {
            FcError::SinkWriteFailed(format!("{} stream already closed", pass.as_str()))
        })
    }
}
