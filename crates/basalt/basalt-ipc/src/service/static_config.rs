//! Per-service configuration fixed at creation time.
//!
//! The typed configurations live in the pattern modules; this module holds
//! the tagged union over them and the plain `#[repr(C)]` form stored in the
//! service's registry record.

use crate::{event, publish_subscribe, request_response};
use std::fmt;

const TYPE_NAME_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessagingPattern {
    PublishSubscribe,
    Event,
    RequestResponse,
}

impl MessagingPattern {
    pub(crate) fn as_raw(self) -> u64 {
        match self {
            MessagingPattern::PublishSubscribe => 1,
            MessagingPattern::Event => 2,
            MessagingPattern::RequestResponse => 3,
        }
    }

    pub(crate) fn from_raw(value: u64) -> Option<Self> {
        match value {
            1 => Some(MessagingPattern::PublishSubscribe),
            2 => Some(MessagingPattern::Event),
            3 => Some(MessagingPattern::RequestResponse),
            _ => None,
        }
    }
}

impl fmt::Display for MessagingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessagingPattern::PublishSubscribe => "publish_subscribe",
            MessagingPattern::Event => "event",
            MessagingPattern::RequestResponse => "request_response",
        };
        f.write_str(name)
    }
}

/// Layout of one payload element, compared when a service is opened.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TypeDetail {
    size: u64,
    alignment: u64,
    name_len: u64,
    name: [u8; TYPE_NAME_CAPACITY],
}

impl TypeDetail {
    pub(crate) const EMPTY: TypeDetail = TypeDetail {
        size: 0,
        alignment: 0,
        name_len: 0,
        name: [0; TYPE_NAME_CAPACITY],
    };

    pub fn of<T: 'static>() -> Self {
        let full = std::any::type_name::<T>();
        let mut len = full.len().min(TYPE_NAME_CAPACITY);
        while !full.is_char_boundary(len) {
            len -= 1;
        }

        let mut name = [0; TYPE_NAME_CAPACITY];
        name[..len].copy_from_slice(&full.as_bytes()[..len]);

        Self {
            size: std::mem::size_of::<T>() as u64,
            alignment: std::mem::align_of::<T>() as u64,
            name_len: len as u64,
            name,
        }
    }

    pub fn size(&self) -> usize {
        self.size as usize
    }

    pub fn alignment(&self) -> usize {
        self.alignment as usize
    }

    pub fn type_name(&self) -> &str {
        let len = (self.name_len as usize).min(TYPE_NAME_CAPACITY);
        std::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }
}

impl fmt::Debug for TypeDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDetail")
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("type_name", &self.type_name())
            .finish()
    }
}

/// Static configuration of a service, tagged by its messaging pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternConfig {
    PublishSubscribe(publish_subscribe::StaticConfig),
    Event(event::StaticConfig),
    RequestResponse(request_response::StaticConfig),
}

impl PatternConfig {
    pub fn messaging_pattern(&self) -> MessagingPattern {
        match self {
            PatternConfig::PublishSubscribe(_) => MessagingPattern::PublishSubscribe,
            PatternConfig::Event(_) => MessagingPattern::Event,
            PatternConfig::RequestResponse(_) => MessagingPattern::RequestResponse,
        }
    }

    pub(crate) fn to_raw(&self) -> RawStaticConfig {
        let mut raw = RawStaticConfig::EMPTY;
        raw.pattern = self.messaging_pattern().as_raw();
        match *self {
            PatternConfig::PublishSubscribe(c) => raw.publish_subscribe = c,
            PatternConfig::Event(c) => raw.event = c,
            PatternConfig::RequestResponse(c) => raw.request_response = c,
        }
        raw
    }

    pub(crate) fn from_raw(raw: &RawStaticConfig) -> Option<Self> {
        Some(match MessagingPattern::from_raw(raw.pattern)? {
            MessagingPattern::PublishSubscribe => PatternConfig::PublishSubscribe(raw.publish_subscribe),
            MessagingPattern::Event => PatternConfig::Event(raw.event),
            MessagingPattern::RequestResponse => PatternConfig::RequestResponse(raw.request_response),
        })
    }
}

/// Stored form of [`PatternConfig`]; only the part named by `pattern` is set.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RawStaticConfig {
    pattern: u64,
    publish_subscribe: publish_subscribe::StaticConfig,
    event: event::StaticConfig,
    request_response: request_response::StaticConfig,
}

impl RawStaticConfig {
    pub(crate) const EMPTY: RawStaticConfig = RawStaticConfig {
        pattern: 0,
        publish_subscribe: publish_subscribe::StaticConfig::EMPTY,
        event: event::StaticConfig::EMPTY,
        request_response: request_response::StaticConfig::EMPTY,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(32))]
    #[derive(Clone, Copy)]
    struct Wide {
        _bytes: [u8; 40],
    }

    #[test]
    fn type_detail_captures_layout() {
        let detail = TypeDetail::of::<Wide>();
        assert_eq!(detail.size(), 64);
        assert_eq!(detail.alignment(), 32);
        assert!(detail.type_name().ends_with("Wide"));
        assert_ne!(detail, TypeDetail::of::<u64>());
        assert_eq!(TypeDetail::of::<u64>(), TypeDetail::of::<u64>());
    }

    #[test]
    fn raw_form_keeps_only_the_tagged_part() {
        let config = PatternConfig::Event(event::StaticConfig::new(3, 4, 9));
        let raw = config.to_raw();
        assert_eq!(PatternConfig::from_raw(&raw), Some(config));
        assert_eq!(PatternConfig::from_raw(&RawStaticConfig::EMPTY), None);
    }
}
