//! Transport framing: guarantees that one frame read yields one envelope.
//!
//! TCP is a byte stream, so one `read` does not necessarily return exactly
//! one `write` from the peer.  The dispatch code never deals with that: it
//! asks a [`Framing`] for the next frame and gets back the complete payload
//! of one handshake message or one envelope.
//!
//! Two framings are supported:
//!
//! ```text
//! LengthPrefixed:  [len:4 big-endian][payload:len]
//! SingleRead:      [payload]            (one write, one read of <= 4096 bytes)
//! ```
//!
//! `SingleRead` is the legacy wire format without any delimiter.  It only
//! works while every read happens to return exactly one peer write, and is
//! kept so that peers speaking the legacy format can still connect.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header used by [`Framing::LengthPrefixed`].
pub const LENGTH_HEADER_LEN: usize = 4;

/// Largest payload accepted by [`Framing::LengthPrefixed`] (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Read buffer size used by [`Framing::SingleRead`]; also its largest frame.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Errors produced while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying socket failed.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    /// The frame exceeds the framing's size limit.
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    TooLarge { len: usize, max: usize },
}

/// How envelopes are delimited on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Every frame carries a 4-byte big-endian length header.
    #[default]
    LengthPrefixed,
    /// No delimiter; one read of up to [`READ_BUFFER_SIZE`] bytes is one frame.
    SingleRead,
}

impl Framing {
    /// Largest payload this framing can carry.
    pub fn max_frame_len(self) -> usize {
        match self {
            Framing::LengthPrefixed => MAX_FRAME_LEN,
            Framing::SingleRead => READ_BUFFER_SIZE,
        }
    }

    /// Reads the next frame from `reader`.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly at a frame
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] if the stream ends inside a frame,
    /// [`FrameError::TooLarge`] for an oversized length header, and
    /// [`FrameError::Io`] for socket failures.
    pub async fn read_frame<R>(self, reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        match self {
            Framing::LengthPrefixed => {
                let mut header = [0u8; LENGTH_HEADER_LEN];
                let mut filled = 0;
                while filled < LENGTH_HEADER_LEN {
                    let n = reader.read(&mut header[filled..]).await?;
                    if n == 0 {
                        if filled == 0 {
                            return Ok(None);
                        }
                        return Err(FrameError::Truncated {
                            expected: LENGTH_HEADER_LEN,
                            received: filled,
                        });
                    }
                    filled += n;
                }

                let len = u32::from_be_bytes(header) as usize;
                if len > MAX_FRAME_LEN {
                    return Err(FrameError::TooLarge {
                        len,
                        max: MAX_FRAME_LEN,
                    });
                }

                let mut payload = vec![0u8; len];
                let mut received = 0;
                while received < len {
                    let n = reader.read(&mut payload[received..]).await?;
                    if n == 0 {
                        return Err(FrameError::Truncated {
                            expected: len,
                            received,
                        });
                    }
                    received += n;
                }
                Ok(Some(payload))
            }
            Framing::SingleRead => {
                let mut buf = vec![0u8; READ_BUFFER_SIZE];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(buf))
            }
        }
    }

    /// Writes `payload` as one frame and flushes the writer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the payload does not fit in one
    /// frame, and [`FrameError::Io`] if the write fails.
    pub async fn write_frame<W>(self, writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let max = self.max_frame_len();
        if payload.len() > max {
            return Err(FrameError::TooLarge {
                len: payload.len(),
                max,
            });
        }

        match self {
            Framing::LengthPrefixed => {
                let mut buf = Vec::with_capacity(LENGTH_HEADER_LEN + payload.len());
                buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
                buf.extend_from_slice(payload);
                writer.write_all(&buf).await?;
            }
            Framing::SingleRead => writer.write_all(payload).await?,
        }
        writer.flush().await?;
        Ok(())
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::LengthPrefixed => f.write_str("length_prefixed"),
            Framing::SingleRead => f.write_str("single_read"),
        }
    }
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "length_prefixed" => Ok(Framing::LengthPrefixed),
            "single_read" => Ok(Framing::SingleRead),
            other => Err(format!(
                "unknown framing '{other}' (expected length_prefixed or single_read)"
            )),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
