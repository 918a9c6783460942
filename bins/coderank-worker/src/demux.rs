//! Demultiplexer for the Docker combined log stream.
//!
//! With TTY disabled the daemon interleaves stdout and stderr into one
//! stream of frames: an 8-byte header (byte 0 = stream id, bytes 1-3
//! reserved, bytes 4-7 = big-endian payload length) followed by the
//! payload. This framing is the only place the two streams are told apart.

const HEADER_LEN: usize = 8;

pub const STDOUT_STREAM: u8 = 1;
pub const STDERR_STREAM: u8 = 2;

/// Separated stdout/stderr text recovered from one combined stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StdioStreams {
    pub stdout: String,
    pub stderr: String,
}

/// Walk the combined buffer frame by frame and split it into stdout and
/// stderr. A trailing partial frame (header present, payload short) ends the
/// walk cleanly; the partial tail is dropped. Frames with unknown stream ids
/// are skipped.
///
/// Bytes are accumulated per stream and converted to UTF-8 once at the end,
/// since a multi-byte sequence may straddle a frame boundary.
pub fn demux(buffer: &[u8]) -> StdioStreams {
    let mut stdout: Vec<u8> = Vec::new();
    let mut stderr: Vec<u8> = Vec::new();

    let mut offset = 0;
    while offset + HEADER_LEN <= buffer.len() {
        let stream_id = buffer[offset];
        let length = u32::from_be_bytes([
            buffer[offset + 4],
            buffer[offset + 5],
            buffer[offset + 6],
            buffer[offset + 7],
        ]) as usize;

        let payload_start = offset + HEADER_LEN;
        let payload_end = match payload_start.checked_add(length) {
            Some(end) if end <= buffer.len() => end,
            // Incomplete frame: stop without error.
            _ => break,
        };

        match stream_id {
            STDOUT_STREAM => stdout.extend_from_slice(&buffer[payload_start..payload_end]),
            STDERR_STREAM => stderr.extend_from_slice(&buffer[payload_start..payload_end]),
            _ => {}
        }

        offset = payload_end;
    }

    StdioStreams {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    }
}
