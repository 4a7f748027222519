use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Non-blocking gate that admits at most one holder at a time.
///
/// Losers of the race get `None` straight away; nothing waits and nothing
/// is queued. Clones share the same gate.
#[derive(Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

/// Proof of a granted entry.
///
/// A permit can be [shared](FlightPermit::share) with work that may outlive
/// the caller, such as a helper thread abandoned after a deadline. The gate
/// reopens exactly once, when the last handle is exited or dropped.
#[must_use = "dropping the permit immediately releases the gate"]
pub struct FlightPermit {
    hold: Arc<Hold>,
}

struct Hold {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Option<FlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                hold: Arc::new(Hold {
                    busy: self.busy.clone(),
                }),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl FlightPermit {
    /// Another handle on the same entry.
    pub fn share(&self) -> FlightPermit {
        FlightPermit {
            hold: self.hold.clone(),
        }
    }

    pub fn exit(self) {}
}

impl Drop for Hold {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
