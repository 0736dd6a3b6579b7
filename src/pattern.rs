//! Messaging patterns a handle can participate in.

use std::fmt;
use std::str::FromStr;

use crate::error::SocketError;

/// The messaging topology of a handle.
///
/// The pattern is fixed when a handle is created and decides which
/// connection-establishment operations are legal for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Pattern {
    /// Client side of request/reply; connects to a reply listener.
    Request = 0,
    /// Server side of request/reply; listens and accepts per-client handles.
    Reply = 1,
    /// Survey originator; binds (or connects to respondents) and broadcasts to all of them.
    Survey = 2,
    /// Survey respondent; connects to a surveyor, or listens and accepts per-surveyor handles.
    Respond = 3,
    /// Broadcast publisher; binds and fans writes out to every subscriber.
    Publish = 4,
    /// Subscriber; connects to a publisher and only reads.
    Subscribe = 5,
    /// Same-host channel on the loopback interface, bus when bound, stream when connected.
    Local = 6,
    /// Raw stream endpoint without pattern semantics.
    Other = 7,
}

impl Pattern {
    /// All patterns, in discriminant order.
    pub const ALL: [Pattern; 8] = [
        Pattern::Request,
        Pattern::Reply,
        Pattern::Survey,
        Pattern::Respond,
        Pattern::Publish,
        Pattern::Subscribe,
        Pattern::Local,
        Pattern::Other,
    ];

    /// Lower case name of the pattern.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Reply => "reply",
            Self::Survey => "survey",
            Self::Respond => "respond",
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Local => "local",
            Self::Other => "other",
        }
    }

    /// Whether the handle may originate a connection.
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            Self::Request | Self::Survey | Self::Respond | Self::Subscribe | Self::Local | Self::Other
        )
    }

    /// Whether the handle may `bind_and_listen` and `accept` peers.
    pub fn can_listen(&self) -> bool {
        matches!(self, Self::Reply | Self::Respond | Self::Other)
    }

    /// Whether the handle supports the single-step bind shorthand.
    pub fn can_bind(&self) -> bool {
        matches!(self, Self::Publish | Self::Survey | Self::Local)
    }

    /// Whether data can be read from an established handle of this pattern.
    pub fn can_read(&self) -> bool {
        !matches!(self, Self::Publish)
    }

    /// Whether data can be written to an established handle of this pattern.
    pub fn can_write(&self) -> bool {
        !matches!(self, Self::Subscribe)
    }

    /// Pattern of the handles produced by `accept`, if the pattern listens.
    pub fn accepted_pattern(&self) -> Option<Pattern> {
        self.can_listen().then_some(*self)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = SocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "request" | "req" => Ok(Self::Request),
            "reply" | "rep" => Ok(Self::Reply),
            "survey" | "surveyor" => Ok(Self::Survey),
            "respond" | "respondent" => Ok(Self::Respond),
            "publish" | "pub" => Ok(Self::Publish),
            "subscribe" | "sub" => Ok(Self::Subscribe),
            "local" => Ok(Self::Local),
            "other" | "raw" => Ok(Self::Other),
            _ => Err(SocketError::InvalidPattern(s.to_string())),
        }
    }
}

impl TryFrom<u8> for Pattern {
    type Error = SocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Pattern::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| SocketError::InvalidPattern(value.to_string()))
    }
}
