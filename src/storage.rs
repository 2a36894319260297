use crate::{
    al_control::AlStatus,
    al_state::AlState,
    al_status_code::AlStatusCode,
    error::Error,
    watchdog::{CycleAction, CycleCounters, RunningFlags},
};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// State shared between the mainloop and interrupt handlers.
///
/// Create this as a `static` and call [`try_split`](AlStorage::try_split) once at startup.
///
/// ```rust
/// use ethercrab_al::AlStorage;
///
/// static STORAGE: AlStorage = AlStorage::new();
///
/// let (sync_events, link) = STORAGE.try_split().expect("can only split once");
/// ```
#[derive(Debug)]
pub struct AlStorage {
    counters: CycleCounters,
    /// Packed [`StatusSnapshot`].
    status: AtomicU32,
    is_split: AtomicBool,
}

impl Default for AlStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl AlStorage {
    /// Create new, unsplit storage.
    pub const fn new() -> Self {
        Self {
            counters: CycleCounters::new(),
            status: AtomicU32::new(INIT_STATUS),
            is_split: AtomicBool::new(false),
        }
    }

    /// Split the storage into an interrupt handle and a link for the
    /// [`Controller`](crate::Controller).
    ///
    /// Returns an error if called more than once.
    pub fn try_split(&self) -> Result<(SyncEvents<'_>, ControllerLink<'_>), Error> {
        self.is_split
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .map_err(|_| Error::AlreadySplit)?;

        Ok((
            SyncEvents {
                counters: &self.counters,
                status: &self.status,
            },
            ControllerLink {
                counters: &self.counters,
                status: &self.status,
            },
        ))
    }

    /// Last published AL status.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::unpack(self.status.load(Ordering::Acquire))
    }
}

/// `INIT`, no error.
const INIT_STATUS: u32 = 0x01;

/// Handle for interrupt contexts.
///
/// Every method only touches atomics and never blocks.
#[derive(Debug, Copy, Clone)]
pub struct SyncEvents<'sto> {
    counters: &'sto CycleCounters,
    status: &'sto AtomicU32,
}

impl<'sto> SyncEvents<'sto> {
    /// Call from the process data (SM2/SM3) interrupt.
    pub fn on_process_data_event(&self) -> CycleAction {
        self.counters.process_data_event()
    }

    /// Call from the DC SYNC0 interrupt.
    pub fn on_sync0_event(&self) -> CycleAction {
        self.counters.sync0_event()
    }

    /// Call from the DC SYNC1 interrupt.
    pub fn on_sync1_event(&self) -> CycleAction {
        self.counters.sync1_event()
    }

    /// Current running flags.
    pub fn running_flags(&self) -> RunningFlags {
        self.counters.flags()
    }

    /// Last published AL status.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::unpack(self.status.load(Ordering::Acquire))
    }
}

/// Link from the controller to the shared storage.
#[derive(Debug)]
pub struct ControllerLink<'sto> {
    pub(crate) counters: &'sto CycleCounters,
    status: &'sto AtomicU32,
}

impl<'sto> ControllerLink<'sto> {
    pub(crate) fn store_status(&self, snapshot: StatusSnapshot) {
        self.status.store(snapshot.pack(), Ordering::Release);
    }
}

/// AL status and status code as one consistent value.
///
/// Both are updated with a single atomic store, so a reader never sees the state of one
/// publication paired with the code of another.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusSnapshot {
    /// AL status register content.
    pub status: AlStatus,
    /// AL status code register content. Holds the explicit device ID when
    /// [`AlStatus::id_loaded`] is set.
    pub code: u16,
}

impl StatusSnapshot {
    /// Published AL state.
    pub fn state(&self) -> AlState {
        self.status.state
    }

    /// Status code, or `None` when the code register carries the device ID.
    pub fn status_code(&self) -> Option<AlStatusCode> {
        (!self.status.id_loaded).then(|| AlStatusCode::from(self.code))
    }

    fn pack(self) -> u32 {
        u32::from(self.status.to_byte()) | u32::from(self.code) << 16
    }

    fn unpack(raw: u32) -> Self {
        Self {
            status: AlStatus::from_byte(raw as u8),
            code: (raw >> 16) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_once() {
        let storage = AlStorage::new();

        assert!(storage.try_split().is_ok());
        assert_eq!(storage.try_split().unwrap_err(), Error::AlreadySplit);
    }

    #[test]
    fn initial_status() {
        let storage = AlStorage::new();

        assert_eq!(storage.status().state(), AlState::Init);
        assert_eq!(storage.status().status_code(), Some(AlStatusCode::NoError));
    }

    #[test]
    fn snapshot_is_consistent() {
        let storage = AlStorage::new();
        let (events, link) = storage.try_split().unwrap();

        let snapshot = StatusSnapshot {
            status: AlStatus {
                state: AlState::SafeOp,
                error: true,
                id_loaded: false,
            },
            code: AlStatusCode::SyncManagerWatchdog.into(),
        };

        link.store_status(snapshot);

        assert_eq!(events.status(), snapshot);
        assert_eq!(
            events.status().status_code(),
            Some(AlStatusCode::SyncManagerWatchdog)
        );
    }
}
