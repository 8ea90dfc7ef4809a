//! Channel capability registry: static per-channel delivery facts.

use serde::Serialize;

use super::ChannelKind;
use crate::model::Contact;

/// Which contact field carries the destination address for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationField {
    PhoneNumber,
    Email,
    TwitterHandle,
    FacebookId,
}

impl DestinationField {
    /// Read this field off a contact, treating empty strings as absent.
    pub fn read<'a>(&self, contact: &'a Contact) -> Option<&'a str> {
        let value = match self {
            DestinationField::PhoneNumber => contact.phone_number.as_deref(),
            DestinationField::Email => contact.email.as_deref(),
            DestinationField::TwitterHandle => contact.twitter_handle.as_deref(),
            DestinationField::FacebookId => contact.facebook_id.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Delivery capabilities of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelCapabilities {
    pub channel: ChannelKind,
    pub destination: DestinationField,
    pub supports_media: bool,
    /// Transport prefix carried on addresses (`whatsapp:`), if any.
    pub address_prefix: Option<&'static str>,
}

/// Look up the capabilities of a channel.
pub fn capabilities(channel: ChannelKind) -> ChannelCapabilities {
    match channel {
        ChannelKind::Sms => ChannelCapabilities {
            channel,
            destination: DestinationField::PhoneNumber,
            supports_media: true,
            address_prefix: None,
        },
        ChannelKind::Whatsapp => ChannelCapabilities {
            channel,
            destination: DestinationField::PhoneNumber,
            supports_media: true,
            address_prefix: Some(crate::normalize::CHAT_PREFIX),
        },
        ChannelKind::Email => ChannelCapabilities {
            channel,
            destination: DestinationField::Email,
            supports_media: false,
            address_prefix: None,
        },
        ChannelKind::Twitter => ChannelCapabilities {
            channel,
            destination: DestinationField::TwitterHandle,
            supports_media: false,
            address_prefix: None,
        },
        ChannelKind::Facebook => ChannelCapabilities {
            channel,
            destination: DestinationField::FacebookId,
            supports_media: false,
            address_prefix: None,
        },
    }
}

/// Resolve the destination address a contact has for a channel.
pub fn destination_for<'a>(contact: &'a Contact, channel: ChannelKind) -> Option<&'a str> {
    capabilities(channel).destination.read(contact)
}
