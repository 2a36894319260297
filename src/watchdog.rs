//! Process data and DC watchdogs.
//!
//! The interrupt side lives in [`CycleCounters`], which only uses atomics so it can be shared
//! between the PDI/SYNC interrupt handlers and the mainloop. The mainloop side is
//! [`WatchdogMonitor`], owned by the controller and ticked once per millisecond.

use crate::{
    al_status_code::AlStatusCode,
    config::SyncConfig,
    fmt,
    sync_mode::{SyncDecision, SyncMode},
};
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};

bitflags::bitflags! {
    /// Which data paths and clocks are currently running.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct RunningFlags: u8 {
        /// Outputs are copied to the application. Set in `OP` only.
        const OUTPUT_UPDATE_RUNNING = 0x01;
        /// Inputs are copied to the ESC. Set in `SAFE-OP` and `OP`.
        const INPUT_UPDATE_RUNNING = 0x02;
        /// The MainDevice configured DC SYNC generation.
        const DC_SYNC_ACTIVE = 0x04;
        /// SYNC pulses are arriving within their watchdog time.
        const DC_RUNNING = 0x08;
        /// SM2 events arrive in step with SYNC0.
        const SM_SYNC_SEQUENCE_VALID = 0x10;
        /// The process data interrupt is enabled.
        const ESC_INT_ENABLED = 0x20;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for RunningFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "RunningFlags({=u8:#x})", self.bits())
    }
}

/// Interrupt that drives one process data direction.
#[atomic_enum::atomic_enum]
#[derive(PartialEq, Default)]
pub enum CycleTrigger {
    /// Not interrupt driven, either free run or not running at all.
    #[default]
    None = 0,
    /// SM2/SM3 event.
    SmEvent = 1,
    /// DC SYNC0.
    Sync0 = 2,
    /// DC SYNC1.
    Sync1 = 3,
}

impl From<SyncMode> for CycleTrigger {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::FreeRun => CycleTrigger::None,
            SyncMode::SmSynchronous | SyncMode::SmSynchronousSecondary => CycleTrigger::SmEvent,
            SyncMode::DcSync0 => CycleTrigger::Sync0,
            SyncMode::DcSync1 => CycleTrigger::Sync1,
        }
    }
}

/// What the application should do in response to an interrupt.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleAction {
    /// Copy outputs from the ESC to the application.
    pub update_outputs: bool,
    /// Copy inputs from the application to the ESC.
    pub update_inputs: bool,
}

/// A missed SM2 event costs this much, each good cycle pays back one.
const SM_EVENT_MISS_PENALTY: u16 = 3;

/// Counters shared between interrupt handlers and the mainloop.
pub struct CycleCounters {
    flags: AtomicU8,
    output_trigger: AtomicCycleTrigger,
    input_trigger: AtomicCycleTrigger,
    /// Milliseconds since the last process data event.
    process_data_ms: AtomicU16,
    /// Milliseconds since the last SYNC0 pulse.
    sync0_ms: AtomicU16,
    /// Milliseconds since the last SYNC1 pulse.
    sync1_ms: AtomicU16,
    sm_event_missed: AtomicU16,
    sync_error_limit: AtomicU16,
    /// SYNC0 pulses since the last SM2 event.
    sync0_since_sm: AtomicU16,
    sm_sync0_value: AtomicU16,
    /// SYNC0 pulses since the inputs were last latched.
    sync0_since_latch: AtomicU16,
    input_latch_count: AtomicU16,
    first_outputs: AtomicBool,
}

impl core::fmt::Debug for CycleCounters {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CycleCounters")
            .field("flags", &self.flags())
            .field("process_data_ms", &self.process_data_ms.load(Ordering::Relaxed))
            .field("sync0_ms", &self.sync0_ms.load(Ordering::Relaxed))
            .field("sm_event_missed", &self.sm_event_missed())
            .field("first_outputs", &self.first_outputs_received())
            .finish_non_exhaustive()
    }
}

impl Default for CycleCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleCounters {
    /// Create counters with every data path stopped.
    pub const fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            output_trigger: AtomicCycleTrigger::new(CycleTrigger::None),
            input_trigger: AtomicCycleTrigger::new(CycleTrigger::None),
            process_data_ms: AtomicU16::new(0),
            sync0_ms: AtomicU16::new(0),
            sync1_ms: AtomicU16::new(0),
            sm_event_missed: AtomicU16::new(0),
            sync_error_limit: AtomicU16::new(0),
            sync0_since_sm: AtomicU16::new(0),
            sm_sync0_value: AtomicU16::new(0),
            sync0_since_latch: AtomicU16::new(0),
            input_latch_count: AtomicU16::new(0),
            first_outputs: AtomicBool::new(false),
        }
    }

    /// Current running flags.
    pub fn flags(&self) -> RunningFlags {
        RunningFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Set running flags. Counters of flags that were not already set are reset.
    pub(crate) fn insert_flags(&self, flags: RunningFlags) {
        let previous = RunningFlags::from_bits_truncate(
            self.flags.fetch_or(flags.bits(), Ordering::AcqRel),
        );

        self.reset_counters(flags.difference(previous));
    }

    /// Clear running flags.
    pub(crate) fn remove_flags(&self, flags: RunningFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    fn reset_counters(&self, started: RunningFlags) {
        if started.contains(RunningFlags::OUTPUT_UPDATE_RUNNING) {
            self.process_data_ms.store(0, Ordering::Relaxed);
        }

        if started.intersects(RunningFlags::DC_SYNC_ACTIVE | RunningFlags::DC_RUNNING) {
            self.sync0_ms.store(0, Ordering::Relaxed);
            self.sync1_ms.store(0, Ordering::Relaxed);
            self.sync0_since_sm.store(0, Ordering::Relaxed);
            self.sync0_since_latch.store(0, Ordering::Relaxed);
        }

        if started.contains(RunningFlags::DC_SYNC_ACTIVE) {
            // The sequence must prove itself before it is considered valid.
            self.sm_event_missed.store(
                self.sync_error_limit.load(Ordering::Relaxed),
                Ordering::Relaxed,
            );
        }
    }

    /// Program the interrupt triggers from a sync decision. Must be called before the running
    /// flags are set.
    pub(crate) fn arm(&self, decision: &SyncDecision, config: &SyncConfig) {
        self.output_trigger
            .store(CycleTrigger::from(decision.outputs), Ordering::Release);
        self.input_trigger
            .store(CycleTrigger::from(decision.inputs), Ordering::Release);
        self.sm_sync0_value
            .store(decision.sm_sync0_value, Ordering::Relaxed);
        self.input_latch_count.store(
            decision
                .subordinated
                .map(|s| s.input_latch_count)
                .unwrap_or(0),
            Ordering::Relaxed,
        );
        self.sync_error_limit
            .store(config.sync_error_limit, Ordering::Relaxed);
        self.first_outputs.store(false, Ordering::Release);
    }

    /// Stop all interrupt driven updates.
    pub(crate) fn disarm(&self) {
        self.remove_flags(RunningFlags::all());
        self.output_trigger
            .store(CycleTrigger::None, Ordering::Release);
        self.input_trigger.store(CycleTrigger::None, Ordering::Release);
        self.sm_sync0_value.store(0, Ordering::Relaxed);
        self.input_latch_count.store(0, Ordering::Relaxed);
        self.first_outputs.store(false, Ordering::Release);
    }

    /// At least one output frame arrived since `SAFE-OP` was entered.
    pub fn first_outputs_received(&self) -> bool {
        self.first_outputs.load(Ordering::Acquire)
    }

    /// Current SM/SYNC missed event counter.
    pub fn sm_event_missed(&self) -> u16 {
        self.sm_event_missed.load(Ordering::Relaxed)
    }

    /// Process data (SM2/SM3) event.
    pub fn process_data_event(&self) -> CycleAction {
        let flags = self.flags();

        self.process_data_ms.store(0, Ordering::Relaxed);

        if flags.contains(RunningFlags::INPUT_UPDATE_RUNNING) {
            self.first_outputs.store(true, Ordering::Release);
        }

        let sm_sync0_value = self.sm_sync0_value.load(Ordering::Relaxed);

        if flags.contains(RunningFlags::DC_SYNC_ACTIVE) && sm_sync0_value > 0 {
            // SM2 arrived within its SYNC0 window: a good cycle.
            if self.sync0_since_sm.swap(0, Ordering::Relaxed) <= sm_sync0_value {
                let _ = self.sm_event_missed.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |missed| missed.checked_sub(1),
                );
            }
        }

        CycleAction {
            update_outputs: flags.contains(RunningFlags::OUTPUT_UPDATE_RUNNING)
                && self.output_trigger.load(Ordering::Acquire) == CycleTrigger::SmEvent,
            update_inputs: flags.contains(RunningFlags::INPUT_UPDATE_RUNNING)
                && self.input_trigger.load(Ordering::Acquire) == CycleTrigger::SmEvent,
        }
    }

    /// DC SYNC0 pulse.
    pub fn sync0_event(&self) -> CycleAction {
        self.sync0_ms.store(0, Ordering::Relaxed);

        let mut flags = self.flags();

        if !flags.contains(RunningFlags::DC_SYNC_ACTIVE) {
            return CycleAction::default();
        }

        if !flags.contains(RunningFlags::DC_RUNNING) {
            self.insert_flags(RunningFlags::DC_RUNNING);
            flags |= RunningFlags::DC_RUNNING;
        }

        let sm_sync0_value = self.sm_sync0_value.load(Ordering::Relaxed);

        if sm_sync0_value > 0 {
            let since_sm = self.sync0_since_sm.fetch_add(1, Ordering::Relaxed) + 1;

            // A whole SM cycle passed without an SM2 event.
            if since_sm > sm_sync0_value {
                self.sync0_since_sm.store(0, Ordering::Relaxed);

                let limit = self.sync_error_limit.load(Ordering::Relaxed);

                let _ = self.sm_event_missed.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |missed| (missed < limit).then(|| missed + SM_EVENT_MISS_PENALTY),
                );
            }
        }

        let update_inputs = flags.contains(RunningFlags::INPUT_UPDATE_RUNNING)
            && self.input_trigger.load(Ordering::Acquire) == CycleTrigger::Sync0
            && self.latch_inputs();

        CycleAction {
            update_outputs: flags.contains(RunningFlags::OUTPUT_UPDATE_RUNNING)
                && self.output_trigger.load(Ordering::Acquire) == CycleTrigger::Sync0,
            update_inputs,
        }
    }

    /// Subordinated cycles latch the inputs every `input_latch_count` SYNC0 pulses.
    fn latch_inputs(&self) -> bool {
        let every = self.input_latch_count.load(Ordering::Relaxed);

        if every <= 1 {
            return true;
        }

        let count = self.sync0_since_latch.fetch_add(1, Ordering::Relaxed) + 1;

        if count >= every {
            self.sync0_since_latch.store(0, Ordering::Relaxed);

            true
        } else {
            false
        }
    }

    /// DC SYNC1 pulse.
    pub fn sync1_event(&self) -> CycleAction {
        self.sync1_ms.store(0, Ordering::Relaxed);

        let flags = self.flags();

        if !flags.contains(RunningFlags::DC_SYNC_ACTIVE) {
            return CycleAction::default();
        }

        CycleAction {
            update_outputs: flags.contains(RunningFlags::OUTPUT_UPDATE_RUNNING)
                && self.output_trigger.load(Ordering::Acquire) == CycleTrigger::Sync1,
            update_inputs: flags.contains(RunningFlags::INPUT_UPDATE_RUNNING)
                && self.input_trigger.load(Ordering::Acquire) == CycleTrigger::Sync1,
        }
    }
}

/// Increment a millisecond counter without wrapping, returning the new value.
fn count_ms(counter: &AtomicU16) -> u16 {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |ms| {
            Some(ms.saturating_add(1))
        })
        .unwrap_or(u16::MAX)
        .saturating_add(1)
}

/// A watchdog that expired.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogExpiry {
    /// No output frame within the SM watchdog time.
    ProcessData,
    /// SYNC0 pulses stopped.
    Sync0,
    /// SYNC1 pulses stopped.
    Sync1,
    /// Too many SM2 events were missed relative to SYNC0.
    SyncSequence,
    /// The DC system time difference left the configured window.
    PllLock,
}

impl WatchdogExpiry {
    /// AL status code published for this expiry.
    pub fn status_code(self) -> AlStatusCode {
        match self {
            WatchdogExpiry::ProcessData => AlStatusCode::SyncManagerWatchdog,
            WatchdogExpiry::Sync0 | WatchdogExpiry::Sync1 => AlStatusCode::FatalSyncError,
            WatchdogExpiry::SyncSequence => AlStatusCode::SynchronizationError,
            WatchdogExpiry::PllLock => AlStatusCode::PllError,
        }
    }
}

/// Millisecond side of the watchdogs.
///
/// Thresholds are in 1ms ticks, 0 disables a watchdog. Each expiry is reported once, until the
/// watchdog is satisfied again.
#[derive(Debug, Default)]
pub struct WatchdogMonitor {
    process_data_threshold: u16,
    sync0_threshold: u16,
    sync1_threshold: u16,
    pll_window_ns: Option<u32>,
    process_data_expired: bool,
    pll_locked: bool,
}

impl WatchdogMonitor {
    /// Create a monitor with every watchdog disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the process data watchdog threshold.
    pub fn set_process_data_threshold(&mut self, ticks: u16) {
        self.process_data_threshold = ticks;
        self.process_data_expired = false;
    }

    /// Set the DC watchdog thresholds from a sync decision.
    pub fn configure_dc(&mut self, decision: &SyncDecision, config: &SyncConfig) {
        self.sync0_threshold = decision.sync0_watchdog;
        self.sync1_threshold = decision.sync1_watchdog;
        self.pll_window_ns = config.pll_window_ns.filter(|_| decision.dc_active);
        self.pll_locked = true;
    }

    /// Disable every watchdog.
    pub fn disable(&mut self) {
        *self = Self::default();
    }

    /// Process data watchdog threshold in ticks.
    pub fn process_data_threshold(&self) -> u16 {
        self.process_data_threshold
    }

    /// SYNC0 watchdog threshold in ticks.
    pub fn sync0_threshold(&self) -> u16 {
        self.sync0_threshold
    }

    /// Run the process data watchdog. Call once per millisecond.
    pub fn tick_1ms(&mut self, counters: &CycleCounters) -> Option<WatchdogExpiry> {
        if self.process_data_threshold == 0 {
            return None;
        }

        if !counters
            .flags()
            .contains(RunningFlags::OUTPUT_UPDATE_RUNNING)
        {
            counters.process_data_ms.store(0, Ordering::Relaxed);
            self.process_data_expired = false;

            return None;
        }

        let elapsed = count_ms(&counters.process_data_ms);

        if elapsed < self.process_data_threshold {
            self.process_data_expired = false;

            return None;
        }

        if self.process_data_expired {
            return None;
        }

        fmt::warn!(
            "Process data watchdog expired after {} ms",
            self.process_data_threshold
        );

        self.process_data_expired = true;

        Some(WatchdogExpiry::ProcessData)
    }

    /// Run the DC watchdogs, SM/SYNC sequence supervision and PLL supervision. Call once per
    /// millisecond.
    ///
    /// `time_difference_ns` is the decoded DC system time difference, if available.
    pub fn check_dc_watchdogs(
        &mut self,
        counters: &CycleCounters,
        time_difference_ns: Option<i32>,
    ) -> Option<WatchdogExpiry> {
        let flags = counters.flags();

        if !flags.contains(RunningFlags::DC_SYNC_ACTIVE) {
            return None;
        }

        let mut expiry = None;

        let sync0_lost = self.sync0_threshold > 0
            && count_ms(&counters.sync0_ms) >= self.sync0_threshold;
        let sync1_lost = self.sync1_threshold > 0
            && count_ms(&counters.sync1_ms) >= self.sync1_threshold;

        if (sync0_lost || sync1_lost) && flags.contains(RunningFlags::DC_RUNNING) {
            counters.remove_flags(RunningFlags::DC_RUNNING);

            let lost = if sync0_lost {
                WatchdogExpiry::Sync0
            } else {
                WatchdogExpiry::Sync1
            };

            fmt::warn!("DC watchdog expired: {:?}", lost);

            expiry = Some(lost);
        }

        let flags = counters.flags();

        if flags.contains(RunningFlags::DC_RUNNING)
            && counters.sm_sync0_value.load(Ordering::Relaxed) > 0
        {
            let missed = counters.sm_event_missed();
            let limit = counters.sync_error_limit.load(Ordering::Relaxed);

            if missed < limit {
                counters.insert_flags(RunningFlags::SM_SYNC_SEQUENCE_VALID);
            } else if flags.contains(RunningFlags::SM_SYNC_SEQUENCE_VALID) {
                counters.remove_flags(RunningFlags::SM_SYNC_SEQUENCE_VALID);

                fmt::warn!("SM/SYNC sequence lost, {} missed", missed);

                expiry = expiry.or(Some(WatchdogExpiry::SyncSequence));
            }
        }

        if let (Some(window), Some(difference)) = (self.pll_window_ns, time_difference_ns) {
            let in_window = difference.unsigned_abs() <= window;

            if !in_window && self.pll_locked {
                fmt::warn!("PLL lost, system time difference {} ns", difference);

                expiry = expiry.or(Some(WatchdogExpiry::PllLock));
            }

            self.pll_locked = in_window;
        }

        expiry
    }
}
