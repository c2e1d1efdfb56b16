//! Loading-flag recorder

use outbreak_data::LoadObserver;
use std::sync::Mutex;

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<(String, bool)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, bool)> {
        self.events.lock().unwrap().clone()
    }

    /// Flag transitions for one key, in order
    pub fn events_for(&self, key: &str) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, loading)| loading)
            .collect()
    }

    /// Last reported state of a key; false if never raised
    pub fn is_loading(&self, key: &str) -> bool {
        self.events_for(key).last().copied().unwrap_or(false)
    }
}

impl LoadObserver for RecordingObserver {
    fn loading_changed(&self, key: &str, loading: bool) {
        self.events
            .lock()
            .unwrap()
            .push((key.to_string(), loading));
    }
}
