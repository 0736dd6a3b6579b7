//! Handle and transport configuration.

use std::fmt;
use std::time::Duration;

/// Whether I/O calls suspend the caller until progress is possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    /// Suspend until the operation can make progress.
    #[default]
    Blocking,
    /// Return `WouldBlock` immediately instead of suspending.
    NonBlocking,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Blocking => f.write_str("blocking"),
            Mode::NonBlocking => f.write_str("non-blocking"),
        }
    }
}

/// Configuration shared by a [`Context`](crate::Context) and its handles.
///
/// ```
/// use pattern_socket::{Mode, SocketOptions};
///
/// let opts = SocketOptions::default()
///     .with_default_mode(Mode::NonBlocking)
///     .with_max_line_len(1024);
/// assert_eq!(opts.max_line_len, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Mode of freshly created handles.
    pub default_mode: Mode,

    /// Size of the chunks `readline` pulls from the transport.
    pub read_chunk: usize,

    /// Longest line `readline` accumulates before giving up.
    pub max_line_len: usize,

    /// Bytes a broadcast endpoint queues per peer before dropping messages for it.
    pub fanout_high_water: usize,

    /// Live endpoints a transport hands out before allocation fails.
    pub max_endpoints: usize,

    /// How long a surveyor collects answers after each survey it writes.
    /// Reads past the deadline fail with `SurveyExpired`; `None` never expires.
    pub survey_deadline: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            default_mode: Mode::Blocking,
            read_chunk: 4096,
            max_line_len: 64 * 1024,
            fanout_high_water: 1024 * 1024,
            max_endpoints: 1024,
            survey_deadline: None,
        }
    }
}

impl SocketOptions {
    /// Same as `SocketOptions::default()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode of freshly created handles.
    pub fn with_default_mode(mut self, mode: Mode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Chunk size used by `readline`, at least one byte.
    pub fn with_read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes.max(1);
        self
    }

    /// Maximum accumulated line length.
    pub fn with_max_line_len(mut self, bytes: usize) -> Self {
        self.max_line_len = bytes;
        self
    }

    /// Per-peer queue bound of broadcast endpoints.
    pub fn with_fanout_high_water(mut self, bytes: usize) -> Self {
        self.fanout_high_water = bytes;
        self
    }

    /// Maximum number of live endpoints.
    pub fn with_max_endpoints(mut self, count: usize) -> Self {
        self.max_endpoints = count;
        self
    }

    /// Answer window of surveys.
    pub fn with_survey_deadline(mut self, deadline: Duration) -> Self {
        self.survey_deadline = Some(deadline);
        self
    }
}
