//! Channel abstraction for outbound delivery.
//!
//! Every supported transport implements [`ChannelSender`]; the dispatch layer
//! only ever sees that trait plus the capability registry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod email;
pub mod registry;
pub mod sender;
pub mod social;
pub mod twilio;

pub use email::EmailSender;
pub use registry::{ChannelCapabilities, DestinationField, capabilities};
pub use sender::{ChannelSender, ConfiguredSenders, SendOutcome, SendPayload, SenderFactory, create_sender};
pub use social::{FacebookSender, TwitterSender};
pub use twilio::TwilioSender;

/// A distinct messaging transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    Sms,
    Whatsapp,
    Email,
    Twitter,
    Facebook,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::Sms,
        ChannelKind::Whatsapp,
        ChannelKind::Email,
        ChannelKind::Twitter,
        ChannelKind::Facebook,
    ];

    /// Storage / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Sms => "SMS",
            ChannelKind::Whatsapp => "WHATSAPP",
            ChannelKind::Email => "EMAIL",
            ChannelKind::Twitter => "TWITTER",
            ChannelKind::Facebook => "FACEBOOK",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SMS" => Ok(ChannelKind::Sms),
            "WHATSAPP" => Ok(ChannelKind::Whatsapp),
            "EMAIL" => Ok(ChannelKind::Email),
            "TWITTER" => Ok(ChannelKind::Twitter),
            "FACEBOOK" => Ok(ChannelKind::Facebook),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}
