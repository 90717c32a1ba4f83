use crate::service::static_config::TypeDetail;
use basalt_config::RequestResponseDefaults;

/// Limits and payload layouts of a request-response service.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticConfig {
    pub(crate) max_clients: u64,
    pub(crate) max_servers: u64,
    pub(crate) max_active_requests_per_client: u64,
    pub(crate) max_response_buffer_size: u64,
    pub(crate) max_borrowed_responses_per_pending_response: u64,
    pub(crate) max_loaned_requests: u64,
    pub(crate) server_max_loaned_responses: u64,
    pub(crate) enable_safe_overflow_for_requests: u64,
    pub(crate) enable_safe_overflow_for_responses: u64,
    pub(crate) request_type: TypeDetail,
    pub(crate) response_type: TypeDetail,
}

impl StaticConfig {
    pub(crate) const EMPTY: StaticConfig = StaticConfig {
        max_clients: 0,
        max_servers: 0,
        max_active_requests_per_client: 0,
        max_response_buffer_size: 0,
        max_borrowed_responses_per_pending_response: 0,
        max_loaned_requests: 0,
        server_max_loaned_responses: 0,
        enable_safe_overflow_for_requests: 0,
        enable_safe_overflow_for_responses: 0,
        request_type: TypeDetail::EMPTY,
        response_type: TypeDetail::EMPTY,
    };

    pub(crate) fn from_defaults(
        defaults: &RequestResponseDefaults,
        request_type: TypeDetail,
        response_type: TypeDetail,
    ) -> Self {
        Self {
            max_clients: defaults.max_clients as u64,
            max_servers: defaults.max_servers as u64,
            max_active_requests_per_client: defaults.max_active_requests_per_client as u64,
            max_response_buffer_size: defaults.max_response_buffer_size as u64,
            max_borrowed_responses_per_pending_response: defaults
                .max_borrowed_responses_per_pending_response
                as u64,
            max_loaned_requests: defaults.max_loaned_requests as u64,
            server_max_loaned_responses: defaults.server_max_loaned_responses as u64,
            enable_safe_overflow_for_requests: defaults.enable_safe_overflow_for_requests as u64,
            enable_safe_overflow_for_responses: defaults.enable_safe_overflow_for_responses as u64,
            request_type,
            response_type,
        }
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients as usize
    }

    pub fn max_servers(&self) -> usize {
        self.max_servers as usize
    }

    pub fn max_active_requests_per_client(&self) -> usize {
        self.max_active_requests_per_client as usize
    }

    pub fn max_response_buffer_size(&self) -> usize {
        self.max_response_buffer_size as usize
    }

    pub fn max_borrowed_responses_per_pending_response(&self) -> usize {
        self.max_borrowed_responses_per_pending_response as usize
    }

    pub fn max_loaned_requests(&self) -> usize {
        self.max_loaned_requests as usize
    }

    pub fn server_max_loaned_responses(&self) -> usize {
        self.server_max_loaned_responses as usize
    }

    pub fn has_safe_overflow_for_requests(&self) -> bool {
        self.enable_safe_overflow_for_requests != 0
    }

    pub fn has_safe_overflow_for_responses(&self) -> bool {
        self.enable_safe_overflow_for_responses != 0
    }

    pub fn request_type(&self) -> &TypeDetail {
        &self.request_type
    }

    pub fn response_type(&self) -> &TypeDetail {
        &self.response_type
    }
}
