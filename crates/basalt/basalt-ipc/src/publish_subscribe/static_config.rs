use crate::service::static_config::TypeDetail;
use basalt_config::PublishSubscribeDefaults;

/// Limits and payload layout of a publish-subscribe service.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticConfig {
    pub(crate) max_publishers: u64,
    pub(crate) max_subscribers: u64,
    pub(crate) subscriber_max_buffer_size: u64,
    pub(crate) subscriber_max_borrowed_samples: u64,
    pub(crate) publisher_max_loaned_samples: u64,
    pub(crate) max_slice_len: u64,
    pub(crate) enable_safe_overflow: u64,
    pub(crate) payload_type: TypeDetail,
}

impl StaticConfig {
    pub(crate) const EMPTY: StaticConfig = StaticConfig {
        max_publishers: 0,
        max_subscribers: 0,
        subscriber_max_buffer_size: 0,
        subscriber_max_borrowed_samples: 0,
        publisher_max_loaned_samples: 0,
        max_slice_len: 0,
        enable_safe_overflow: 0,
        payload_type: TypeDetail::EMPTY,
    };

    pub(crate) fn from_defaults(defaults: &PublishSubscribeDefaults, payload_type: TypeDetail) -> Self {
        Self {
            max_publishers: defaults.max_publishers as u64,
            max_subscribers: defaults.max_subscribers as u64,
            subscriber_max_buffer_size: defaults.subscriber_max_buffer_size as u64,
            subscriber_max_borrowed_samples: defaults.subscriber_max_borrowed_samples as u64,
            publisher_max_loaned_samples: defaults.publisher_max_loaned_samples as u64,
            max_slice_len: defaults.max_slice_len as u64,
            enable_safe_overflow: defaults.enable_safe_overflow as u64,
            payload_type,
        }
    }

    pub fn max_publishers(&self) -> usize {
        self.max_publishers as usize
    }

    pub fn max_subscribers(&self) -> usize {
        self.max_subscribers as usize
    }

    pub fn subscriber_max_buffer_size(&self) -> usize {
        self.subscriber_max_buffer_size as usize
    }

    pub fn subscriber_max_borrowed_samples(&self) -> usize {
        self.subscriber_max_borrowed_samples as usize
    }

    pub fn publisher_max_loaned_samples(&self) -> usize {
        self.publisher_max_loaned_samples as usize
    }

    /// Largest number of elements a single sample may carry.
    pub fn max_slice_len(&self) -> usize {
        self.max_slice_len as usize
    }

    pub fn has_safe_overflow(&self) -> bool {
        self.enable_safe_overflow != 0
    }

    pub fn payload_type(&self) -> &TypeDetail {
        &self.payload_type
    }
}
