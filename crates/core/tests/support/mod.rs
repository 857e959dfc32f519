//! Shared test helpers for `relaygate-core` integration tests.
//!
//! Provides a facade wired to a recording sink plus scripted adapter calls,
//! so scenarios can focus on behaviour instead of boilerplate.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relaygate_core::{RecordingEventSink, ResilienceFacade};
use relaygate_domain::{AdapterError, ResilienceSettings, VendorError, VendorErrorGroup};

/// Facade with a recording sink and a short default-bucket wait
pub fn facade() -> (ResilienceFacade, RecordingEventSink) {
    facade_with(ResilienceSettings {
        default_retry_wait: Duration::from_millis(10),
        ..Default::default()
    })
}

pub fn facade_with(settings: ResilienceSettings) -> (ResilienceFacade, RecordingEventSink) {
    let sink = RecordingEventSink::new();
    let facade = ResilienceFacade::new(&settings, Arc::new(sink.clone()))
        .expect("default tuning tables are valid");
    (facade, sink)
}

/// Counts invocations of an adapter call
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Adapter call that replays a fixed sequence of outcomes, then repeats the
/// last one
pub fn scripted<T: Clone>(
    outcomes: Vec<Result<T, AdapterError>>,
    counter: &CallCounter,
) -> impl FnMut() -> Result<T, AdapterError> {
    let script = Mutex::new(VecDeque::from(outcomes));
    let counter = counter.clone();
    move || {
        counter.hit();
        let mut script = script.lock();
        if script.len() > 1 {
            script.pop_front().expect("script is non-empty")
        } else {
            script.front().cloned().expect("script is non-empty")
        }
    }
}

/// Vendor failure raised by an RFC-style client
#[derive(Debug, Clone)]
pub struct RfcFault {
    pub group: VendorErrorGroup,
    pub message: String,
}

impl RfcFault {
    pub fn communication(message: &str) -> AdapterError {
        AdapterError::vendor(Self {
            group: VendorErrorGroup::Communication,
            message: message.to_string(),
        })
    }

    pub fn logon(message: &str) -> AdapterError {
        AdapterError::vendor(Self { group: VendorErrorGroup::Logon, message: message.to_string() })
    }
}

impl fmt::Display for RfcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl VendorError for RfcFault {
    fn error_group(&self) -> VendorErrorGroup {
        self.group
    }
}
