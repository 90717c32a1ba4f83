use basalt_config::EventDefaults;

/// Limits of an event service, fixed by its creator.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticConfig {
    pub(crate) max_notifiers: u64,
    pub(crate) max_listeners: u64,
    pub(crate) event_id_max_value: u64,
}

impl StaticConfig {
    pub(crate) const EMPTY: StaticConfig = StaticConfig {
        max_notifiers: 0,
        max_listeners: 0,
        event_id_max_value: 0,
    };

    pub(crate) fn new(max_notifiers: usize, max_listeners: usize, event_id_max_value: usize) -> Self {
        Self {
            max_notifiers: max_notifiers as u64,
            max_listeners: max_listeners as u64,
            event_id_max_value: event_id_max_value as u64,
        }
    }

    pub(crate) fn from_defaults(defaults: &EventDefaults) -> Self {
        Self::new(
            defaults.max_notifiers,
            defaults.max_listeners,
            defaults.event_id_max_value,
        )
    }

    pub fn max_notifiers(&self) -> usize {
        self.max_notifiers as usize
    }

    pub fn max_listeners(&self) -> usize {
        self.max_listeners as usize
    }

    /// Largest event id a notifier may signal.
    pub fn event_id_max_value(&self) -> usize {
        self.event_id_max_value as usize
    }
}
