//! The AL state machine.

mod transition;

pub use transition::{Plan, StartStep, StopStep, Transition};

use crate::{
    al_control::{AlControl, AlStatus},
    al_state::AlState,
    al_status_code::AlStatusCode,
    config::SubDeviceConfig,
    error::Error,
    esc::Esc,
    fmt,
    handler::{AlEventMask, Application, ProcessDataSizes},
    indicator::{ErrorIndication, Indicator, LedPattern},
    register::{RegisterAddress, system_time_difference_ns, watchdog_ticks},
    sm_check::{
        CheckScope, MAILBOX_READ, MAILBOX_WRITE, PROCESS_DATA_IN, PROCESS_DATA_OUT,
        SyncManagerValidator,
    },
    storage::{ControllerLink, StatusSnapshot},
    sync_manager_channel::SyncManagerChannel,
    sync_mode::{self, DcRegisters, SyncDecision, SyncMode},
    watchdog::{RunningFlags, WatchdogExpiry, WatchdogMonitor},
};
use core::task::Poll;

/// Who raised a local error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorOrigin {
    /// Raised with [`Controller::report_local_error`]. Stays active until
    /// [`Controller::report_local_error_cleared`].
    Application,
    /// Raised by an expired watchdog. Released when the MainDevice acknowledges the error.
    Watchdog,
}

/// A local error forcing the SubDevice down to `target`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalError {
    /// Highest state allowed while the error is active.
    pub target: AlState,
    /// Published status code.
    pub code: AlStatusCode,
    /// Error source.
    pub origin: ErrorOrigin,
}

/// An upward transition waiting for its start handler or for `OP` readiness.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingTransition {
    /// The step in progress.
    pub step: StartStep,
    /// Milliseconds left before the transition fails.
    pub remaining_ms: u32,
    /// The start handler returned `Ok`. Only the `OP` readiness checks remain.
    pub started: bool,
}

impl PendingTransition {
    /// State the transition started from.
    pub fn from(&self) -> AlState {
        self.step.from()
    }

    /// State the transition is heading to.
    pub fn to(&self) -> AlState {
        self.step.target()
    }
}

/// Everything the controller mutates, owned in one place.
#[derive(Debug)]
struct ControllerState {
    al_state: AlState,
    error_flag: bool,
    code: AlStatusCode,
    pending: Option<PendingTransition>,
    local_error: Option<LocalError>,
    /// Process data sizes of the current or pending `SAFE-OP`.
    sizes: ProcessDataSizes,
    /// Sync decision of the current or pending `SAFE-OP`.
    sync: Option<SyncDecision>,
    event_mask: AlEventMask,
    id_requested: bool,
    error_indication: ErrorIndication,
    /// Last (state, code) handed to [`Application::on_state_change`].
    published: (AlState, AlStatusCode),
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            al_state: AlState::Init,
            error_flag: false,
            code: AlStatusCode::NoError,
            pending: None,
            local_error: None,
            sizes: ProcessDataSizes::default(),
            sync: None,
            event_mask: AlEventMask::BASE,
            id_requested: false,
            error_indication: ErrorIndication::None,
            published: (AlState::Init, AlStatusCode::NoError),
        }
    }
}

/// The AL state machine of an EtherCAT SubDevice.
///
/// Owned by the mainloop. Interrupt handlers use the
/// [`SyncEvents`](crate::SyncEvents) handle split from the same [`AlStorage`](crate::AlStorage).
#[derive(Debug)]
pub struct Controller<'sto, E, A> {
    esc: E,
    app: A,
    config: SubDeviceConfig,
    link: ControllerLink<'sto>,
    state: ControllerState,
    monitor: WatchdogMonitor,
    run_led: Indicator,
    error_led: Indicator,
}

impl<'sto, E, A> Controller<'sto, E, A>
where
    E: Esc,
    A: Application,
{
    /// Create a controller in `INIT`.
    ///
    /// The process data sync managers are deactivated and `INIT` is published.
    pub fn new(
        esc: E,
        app: A,
        config: SubDeviceConfig,
        link: ControllerLink<'sto>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let mut this = Self {
            esc,
            app,
            config,
            link,
            state: ControllerState::default(),
            monitor: WatchdogMonitor::new(),
            run_led: Indicator::default(),
            error_led: Indicator::default(),
        };

        this.link.counters.disarm();
        this.set_process_data_channels(false, false);
        this.write_event_mask();
        this.publish();

        Ok(this)
    }

    /// Current AL state.
    pub fn al_state(&self) -> AlState {
        self.state.al_state
    }

    /// Last published status code.
    pub fn status_code(&self) -> AlStatusCode {
        self.state.code
    }

    /// Whether the error indication bit is set.
    pub fn error_flag(&self) -> bool {
        self.state.error_flag
    }

    /// Transition in progress, if any.
    pub fn pending(&self) -> Option<PendingTransition> {
        self.state.pending
    }

    /// Active local error, if any.
    pub fn local_error(&self) -> Option<LocalError> {
        self.state.local_error
    }

    /// Current running flags.
    pub fn running_flags(&self) -> RunningFlags {
        self.link.counters.flags()
    }

    /// Sync decision of the current `SAFE-OP` or `OP` session.
    pub fn sync_decision(&self) -> Option<SyncDecision> {
        self.state.sync
    }

    /// Process data sizes of the current `SAFE-OP` or `OP` session.
    pub fn process_data_sizes(&self) -> ProcessDataSizes {
        self.state.sizes
    }

    /// Last published status, as seen by other contexts.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot_value()
    }

    /// Configuration.
    pub fn config(&self) -> &SubDeviceConfig {
        &self.config
    }

    /// The ESC.
    pub fn esc(&self) -> &E {
        &self.esc
    }

    /// The ESC.
    pub fn esc_mut(&mut self) -> &mut E {
        &mut self.esc
    }

    /// The application.
    pub fn application(&self) -> &A {
        &self.app
    }

    /// The application.
    pub fn application_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// The AL control register changed. Reads it from the ESC and handles the request.
    pub fn on_al_control_event(&mut self) -> Result<(), Error> {
        let control = self
            .esc
            .read_register::<AlControl>(RegisterAddress::AlControl)?;

        self.on_master_control_write(control);

        Ok(())
    }

    /// Handle an AL control register write by the MainDevice.
    pub fn on_master_control_write(&mut self, control: AlControl) {
        let id_changed = self.state.id_requested != control.id_request;

        self.state.id_requested = control.id_request;

        self.request_transition(control.state, control.error);

        if id_changed {
            self.publish();
        }
    }

    /// Request a state change.
    ///
    /// While the error flag is set, requests other than `INIT` are ignored unless `ack` is set.
    pub fn request_transition(&mut self, requested: AlState, ack: bool) {
        if self.state.error_flag && !ack && requested != AlState::Init {
            fmt::trace!("Ignoring request for {} until error is acknowledged", requested);

            return;
        }

        if let Some(pending) = self.state.pending {
            if pending.to() == requested {
                return;
            }

            self.cancel_pending();
        }

        if ack {
            self.acknowledge();
        }

        let transition = Transition::new(self.state.al_state, requested);

        fmt::debug!(
            "AL control: {} -> {}{}",
            transition.from,
            transition.to,
            if ack { " (ack)" } else { "" }
        );

        match transition.classify() {
            Plan::Reject(code) => self.fail(code, ErrorIndication::InvalidConfiguration),
            Plan::Refresh => self.refresh(ack),
            Plan::Down => {
                let result = self.step_down_to(requested);

                self.finish(result, ErrorIndication::InvalidConfiguration);
            }
            Plan::Up(step) => self.start(step),
        }
    }

    /// Advance a pending transition. Call from the mainloop.
    pub fn poll_pending_transition(&mut self) {
        let Some(pending) = self.state.pending else {
            return;
        };

        if pending.remaining_ms == 0 {
            let code = if pending.started {
                self.op_blocker().unwrap_or(AlStatusCode::UnspecifiedError)
            } else {
                AlStatusCode::UnspecifiedError
            };

            fmt::warn!(
                "Transition {} -> {} timed out: {}",
                pending.from(),
                pending.to(),
                code
            );

            self.state.pending = None;

            self.abort(pending.step, code);

            return;
        }

        if !pending.started {
            match self.call_start(pending.step) {
                Poll::Pending => return,
                Poll::Ready(Err(code)) => {
                    self.state.pending = None;

                    self.abort(pending.step, code);

                    return;
                }
                Poll::Ready(Ok(())) => {
                    if let Some(p) = self.state.pending.as_mut() {
                        p.started = true;
                    }
                }
            }
        }

        if pending.step == StartStep::Outputs && self.op_blocker().is_some() {
            return;
        }

        self.state.pending = None;

        self.commit(pending.step);
    }

    /// Advance watchdogs, timeouts and indicators. Call once per millisecond.
    pub fn tick_1ms(&mut self) {
        if let Some(pending) = self.state.pending.as_mut() {
            pending.remaining_ms = pending.remaining_ms.saturating_sub(1);
        }

        let time_difference = self.read_time_difference();

        let counters = self.link.counters;

        let process_data = self.monitor.tick_1ms(counters);
        let dc = self.monitor.check_dc_watchdogs(counters, time_difference);

        if let Some(expiry) = process_data.or(dc) {
            self.on_watchdog_expiry(expiry);
        }

        if let Some(on) = self.run_led.tick_1ms() {
            self.app.set_run_indicator(on);
        }

        if let Some(on) = self.error_led.tick_1ms() {
            self.app.set_error_indicator(on);
        }
    }

    /// Force the SubDevice down to `target` because of an application error.
    ///
    /// A `target` of `OP` is treated as `SAFE-OP`: an error in `OP` always disables the outputs.
    /// Upward requests above `target` are refused with `code` until
    /// [`report_local_error_cleared`](Controller::report_local_error_cleared) is called.
    pub fn report_local_error(&mut self, target: AlState, code: AlStatusCode) {
        self.raise_local_error(LocalError {
            target,
            code,
            origin: ErrorOrigin::Application,
        });
    }

    /// The application error reported with
    /// [`report_local_error`](Controller::report_local_error) is gone.
    ///
    /// The error flag remains set until the MainDevice acknowledges it.
    pub fn report_local_error_cleared(&mut self) {
        if let Some(LocalError {
            origin: ErrorOrigin::Application,
            ..
        }) = self.state.local_error
        {
            fmt::debug!("Local error cleared");

            self.state.local_error = None;
        }
    }

    /// A sync manager activation changed. Re-checks the channels used by the current state.
    ///
    /// A broken mailbox drops the SubDevice to `INIT`, broken process data to `PRE-OP`.
    pub fn on_sync_manager_change_event(&mut self) {
        let scope = match self.state.al_state {
            AlState::PreOp => CheckScope::Mailbox,
            AlState::Bootstrap => CheckScope::Bootstrap,
            AlState::SafeOp | AlState::Op => CheckScope::ProcessData,
            AlState::Init | AlState::Other(_) => return,
        };

        let fault = match SyncManagerValidator::new(&self.config).check(
            &mut self.esc,
            scope,
            self.state.sizes,
        ) {
            Ok(()) => return,
            Err(fault) => fault,
        };

        fmt::warn!("Sync manager changed in {}: {}", self.state.al_state, fault);

        self.app.on_sync_manager_fault(fault);

        let target = if fault.is_mailbox() {
            AlState::Init
        } else {
            AlState::PreOp
        };

        self.cancel_pending();

        let result = self.step_down_to(target);

        if let Err(code) = result {
            fmt::warn!("Stop handler failed during fallback: {}", code);
        }

        self.fail(fault.status_code(scope), ErrorIndication::InvalidConfiguration);
    }

    /// Stop everything and return to `INIT` with no error.
    pub fn reset(&mut self) {
        self.cancel_pending();

        if let Err(code) = self.step_down_to(AlState::Init) {
            fmt::warn!("Stop handler failed during reset: {}", code);
        }

        self.link.counters.disarm();
        self.monitor.disable();

        let published = self.state.published;

        self.state = ControllerState {
            published,
            ..ControllerState::default()
        };

        self.set_process_data_channels(false, false);
        self.write_event_mask();
        self.publish();
    }

    fn acknowledge(&mut self) {
        self.state.error_flag = false;
        self.state.error_indication = ErrorIndication::None;

        if let Some(LocalError {
            origin: ErrorOrigin::Watchdog,
            ..
        }) = self.state.local_error
        {
            self.state.local_error = None;
        }
    }

    /// Same state requested again.
    fn refresh(&mut self, ack: bool) {
        if ack {
            self.state.code = AlStatusCode::NoError;

            if matches!(self.state.al_state, AlState::SafeOp | AlState::Op) {
                let sizes = self.state.sizes;

                self.set_process_data_channels(sizes.outputs > 0, sizes.inputs > 0);
            }
        }

        self.publish();
    }

    fn start(&mut self, step: StartStep) {
        let target = step.target();

        if let Some(local) = self.state.local_error {
            if target.rank() > local.target.rank() {
                fmt::debug!("Local error blocks {}: {}", target, local.code);

                self.fail(local.code, ErrorIndication::LocalError);

                return;
            }
        }

        if let Err(code) = self.prepare(step) {
            self.fail(code, Self::indication_for(step));

            return;
        }

        match self.call_start(step) {
            Poll::Ready(Ok(())) => {
                if step == StartStep::Outputs && self.op_blocker().is_some() {
                    self.make_pending(step, true);
                } else {
                    self.commit(step);
                }
            }
            Poll::Pending => self.make_pending(step, false),
            Poll::Ready(Err(code)) => self.abort(step, code),
        }
    }

    fn make_pending(&mut self, step: StartStep, started: bool) {
        let remaining_ms = self.config.timeouts.ticks_for(step.target());

        fmt::debug!(
            "Transition {} -> {} pending, {} ms",
            step.from(),
            step.target(),
            remaining_ms
        );

        self.state.pending = Some(PendingTransition {
            step,
            remaining_ms,
            started,
        });

        self.publish();
    }

    /// Validate everything needed before the start handler of `step` runs.
    fn prepare(&mut self, step: StartStep) -> Result<(), AlStatusCode> {
        match step {
            StartStep::Mailbox => self.check_sync_managers(CheckScope::Mailbox),
            StartStep::Bootstrap => {
                if self.config.mailbox.bootstrap.is_none() {
                    return Err(AlStatusCode::BootstrapNotSupported);
                }

                self.check_sync_managers(CheckScope::Bootstrap)
            }
            StartStep::Inputs => {
                self.state.sizes = self.app.generate_mapping()?;

                self.check_sync_managers(CheckScope::ProcessData)?;

                let dc = DcRegisters::read(&mut self.esc).map_err(|e| {
                    fmt::error!("Failed to read DC registers: {}", e);

                    AlStatusCode::UnspecifiedError
                })?;

                let decision = sync_mode::select(
                    self.state.sizes,
                    &dc,
                    self.app.sync_type_override(),
                    &self.config.sync,
                )?;

                fmt::debug!(
                    "Sync mode: outputs {:?}, inputs {:?}, DC {}",
                    decision.outputs,
                    decision.inputs,
                    decision.dc_active
                );

                self.state.sync = Some(decision);
                self.state.event_mask = Self::safeop_event_mask(self.state.sizes, &decision);

                Ok(())
            }
            StartStep::Outputs => self.check_sync_managers(CheckScope::ProcessData),
        }
    }

    fn check_sync_managers(&mut self, scope: CheckScope) -> Result<(), AlStatusCode> {
        SyncManagerValidator::new(&self.config)
            .check(&mut self.esc, scope, self.state.sizes)
            .map_err(|fault| {
                fmt::warn!("Sync manager check failed: {}", fault);

                self.app.on_sync_manager_fault(fault);

                fault.status_code(scope)
            })
    }

    fn mailbox_event_mask() -> AlEventMask {
        AlEventMask::BASE
            | AlEventMask::sync_manager(MAILBOX_WRITE)
            | AlEventMask::sync_manager(MAILBOX_READ)
    }

    fn safeop_event_mask(sizes: ProcessDataSizes, decision: &SyncDecision) -> AlEventMask {
        let mut mask = Self::mailbox_event_mask();

        if sizes.outputs > 0 {
            mask |= AlEventMask::sync_manager(PROCESS_DATA_OUT);
        } else if sizes.inputs > 0 {
            mask |= AlEventMask::sync_manager(PROCESS_DATA_IN);
        }

        if decision.dc_active {
            mask |= AlEventMask::DC_SYNC0;
        }

        if decision.sync1_watchdog > 0 {
            mask |= AlEventMask::DC_SYNC1;
        }

        mask
    }

    fn call_start(&mut self, step: StartStep) -> Poll<Result<(), AlStatusCode>> {
        match step {
            StartStep::Mailbox => self.app.start_mailbox_handler(),
            StartStep::Bootstrap => self.app.start_bootstrap_handler(),
            StartStep::Inputs => self.app.start_input_handler(&mut self.state.event_mask),
            StartStep::Outputs => self.app.start_output_handler(),
        }
    }

    /// Reason the SubDevice cannot enter `OP` yet.
    fn op_blocker(&self) -> Option<AlStatusCode> {
        let counters = self.link.counters;
        let flags = counters.flags();

        if flags.contains(RunningFlags::DC_SYNC_ACTIVE) && !flags.contains(RunningFlags::DC_RUNNING)
        {
            Some(AlStatusCode::NoSyncError)
        } else if !flags.contains(RunningFlags::SM_SYNC_SEQUENCE_VALID) {
            Some(AlStatusCode::SynchronizationError)
        } else if self.state.sizes.outputs > 0 && !counters.first_outputs_received() {
            Some(AlStatusCode::SyncManagerWatchdog)
        } else {
            None
        }
    }

    fn commit(&mut self, step: StartStep) {
        let counters = self.link.counters;

        match step {
            StartStep::Mailbox | StartStep::Bootstrap => {
                self.state.event_mask = Self::mailbox_event_mask();
            }
            StartStep::Inputs => {
                let decision = self.state.sync.unwrap_or_default();
                let sizes = self.state.sizes;

                counters.arm(&decision, &self.config.sync);

                let ticks = self.process_data_watchdog_ticks(sizes);

                self.monitor.configure_dc(&decision, &self.config.sync);
                self.monitor.set_process_data_threshold(ticks);

                let mut flags = RunningFlags::INPUT_UPDATE_RUNNING;

                if decision.dc_active {
                    flags |= RunningFlags::DC_SYNC_ACTIVE;
                }

                if !decision.dc_active || decision.sm_sync0_value == 0 {
                    flags |= RunningFlags::SM_SYNC_SEQUENCE_VALID;
                }

                if decision.dc_active
                    || decision.outputs != SyncMode::FreeRun
                    || decision.inputs != SyncMode::FreeRun
                {
                    flags |= RunningFlags::ESC_INT_ENABLED;
                }

                counters.insert_flags(flags);

                self.set_process_data_channels(sizes.outputs > 0, sizes.inputs > 0);
            }
            StartStep::Outputs => {
                if self.state.sizes.outputs > 0 {
                    self.set_sync_manager_enabled(PROCESS_DATA_OUT, true);
                }

                counters.insert_flags(RunningFlags::OUTPUT_UPDATE_RUNNING);
            }
        }

        self.state.al_state = step.target();
        self.state.error_flag = false;
        self.state.code = AlStatusCode::NoError;
        self.state.error_indication = ErrorIndication::None;

        fmt::info!("AL state {} -> {}", step.from(), step.target());

        self.write_event_mask();
        self.publish();
    }

    /// SM watchdog threshold in ticks, 0 if outputs are unused or the watchdog is disabled.
    fn process_data_watchdog_ticks(&mut self, sizes: ProcessDataSizes) -> u16 {
        if sizes.outputs == 0 {
            return 0;
        }

        let enabled = self
            .esc
            .read_register::<SyncManagerChannel>(RegisterAddress::sync_manager(PROCESS_DATA_OUT))
            .map(|sm| sm.control.watchdog_enable)
            .unwrap_or(false);

        if !enabled {
            return 0;
        }

        let divider = self
            .esc
            .read_register::<u16>(RegisterAddress::WatchdogDivider)
            .unwrap_or(0);
        let timeout = self
            .esc
            .read_register::<u16>(RegisterAddress::SyncManagerWatchdog)
            .unwrap_or(0);

        watchdog_ticks(divider, timeout)
    }

    /// The start handler of `step` failed or timed out: undo it and stay in the lower state.
    fn abort(&mut self, step: StartStep, code: AlStatusCode) {
        fmt::warn!(
            "Transition {} -> {} failed: {}",
            step.from(),
            step.target(),
            code
        );

        if let Err(stop_code) = self.run_stop_handler(step.undo()) {
            fmt::warn!("Stop handler failed during abort: {}", stop_code);
        }

        self.fail(code, Self::indication_for(step));
    }

    fn indication_for(step: StartStep) -> ErrorIndication {
        if step == StartStep::Bootstrap {
            ErrorIndication::BootError
        } else {
            ErrorIndication::InvalidConfiguration
        }
    }

    /// A differing request arrived while a transition was pending. The start handler may still
    /// be outstanding.
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.state.pending.take() {
            fmt::debug!("Cancelling pending {} -> {}", pending.from(), pending.to());

            if let Err(code) = self.run_stop_handler(pending.step.undo()) {
                fmt::warn!("Stop handler failed during cancel: {}", code);
            }
        }
    }

    /// Run the stop handler of `step` with its side effects, but leave the state unchanged.
    fn run_stop_handler(&mut self, step: StopStep) -> Result<(), AlStatusCode> {
        let counters = self.link.counters;

        match step {
            StopStep::Outputs => {
                // Outputs must be inert before anything else happens.
                self.set_sync_manager_enabled(PROCESS_DATA_OUT, false);
                counters.remove_flags(RunningFlags::OUTPUT_UPDATE_RUNNING);

                self.app.stop_output_handler()
            }
            StopStep::Inputs => {
                counters.disarm();
                self.monitor.disable();
                self.set_process_data_channels(false, false);
                self.state.event_mask = Self::mailbox_event_mask();
                self.write_event_mask();

                self.app.stop_input_handler()
            }
            StopStep::Mailbox => {
                self.state.event_mask = AlEventMask::BASE;
                self.write_event_mask();

                self.app.stop_mailbox_handler()
            }
            StopStep::Bootstrap => {
                self.state.event_mask = AlEventMask::BASE;
                self.write_event_mask();

                self.app.stop_bootstrap_handler()
            }
        }
    }

    /// Step down one state at a time. A failing stop handler completes its step but ends the
    /// chain.
    fn step_down_to(&mut self, target: AlState) -> Result<(), AlStatusCode> {
        while self.state.al_state != target {
            let Some(step) = StopStep::leaving(self.state.al_state) else {
                break;
            };

            let result = self.run_stop_handler(step);

            fmt::info!("AL state {} -> {}", self.state.al_state, step.target());

            self.state.al_state = step.target();

            if step == StopStep::Inputs {
                self.state.sync = None;
            }

            result?;
        }

        Ok(())
    }

    fn finish(&mut self, result: Result<(), AlStatusCode>, indication: ErrorIndication) {
        match result {
            Ok(()) => {
                self.state.error_flag = false;
                self.state.code = AlStatusCode::NoError;
                self.state.error_indication = ErrorIndication::None;

                self.publish();
            }
            Err(code) => self.fail(code, indication),
        }
    }

    /// Set the error flag and publish `code`. The state is left as is.
    fn fail(&mut self, code: AlStatusCode, indication: ErrorIndication) {
        self.state.error_flag = true;
        self.state.code = code;
        self.state.error_indication = indication;

        self.publish();
    }

    fn raise_local_error(&mut self, error: LocalError) {
        fmt::warn!(
            "Local error in {}: {}, falling back to {}",
            self.state.al_state,
            error.code,
            error.target
        );

        self.cancel_pending();

        // Outputs never stay live with an error pending, so OP is never a valid fallback.
        let error = if error.target.rank() >= AlState::Op.rank() {
            LocalError {
                target: AlState::SafeOp,
                ..error
            }
        } else {
            error
        };

        self.state.local_error = Some(error);

        if self.state.al_state.rank() > error.target.rank() {
            // BOOT can only fall back to INIT.
            let target = if self.state.al_state == AlState::Bootstrap {
                AlState::Init
            } else {
                error.target
            };

            if let Err(code) = self.step_down_to(target) {
                fmt::warn!("Stop handler failed during local error: {}", code);
            }
        }

        let indication = match error.origin {
            ErrorOrigin::Application => ErrorIndication::LocalError,
            ErrorOrigin::Watchdog => ErrorIndication::WatchdogTimeout,
        };

        self.fail(error.code, indication);
    }

    fn on_watchdog_expiry(&mut self, expiry: WatchdogExpiry) {
        if self.state.al_state != AlState::Op {
            fmt::debug!("{:?} outside OP, not changing state", expiry);

            return;
        }

        self.raise_local_error(LocalError {
            target: AlState::SafeOp,
            code: expiry.status_code(),
            origin: ErrorOrigin::Watchdog,
        });
    }

    fn read_time_difference(&mut self) -> Option<i32> {
        if self.config.sync.pll_window_ns.is_none()
            || !self
                .link
                .counters
                .flags()
                .contains(RunningFlags::DC_SYNC_ACTIVE)
        {
            return None;
        }

        self.esc
            .read_register::<u32>(RegisterAddress::DcSystemTimeDifference)
            .ok()
            .map(system_time_difference_ns)
    }

    fn set_process_data_channels(&mut self, outputs: bool, inputs: bool) {
        self.set_sync_manager_enabled(PROCESS_DATA_OUT, outputs);
        self.set_sync_manager_enabled(PROCESS_DATA_IN, inputs);
    }

    /// Clear or set the PDI deactivate bit of a sync manager.
    fn set_sync_manager_enabled(&mut self, index: u8, enabled: bool) {
        let address = RegisterAddress::sync_manager_pdi_control(index);

        let mut pdi_control = [0u8];

        self.esc.read(address, &mut pdi_control);

        if enabled {
            pdi_control[0] &= !0x01;
        } else {
            pdi_control[0] |= 0x01;
        }

        self.esc.write(address, &pdi_control);
    }

    fn write_event_mask(&mut self) {
        self.esc
            .write_register(RegisterAddress::AlEventMask, self.state.event_mask.bits());
    }

    fn snapshot_value(&self) -> StatusSnapshot {
        let id_loaded = !self.state.error_flag && self.state.id_requested;

        let device_id = self.config.device_id.filter(|_| id_loaded);

        StatusSnapshot {
            status: AlStatus {
                state: self.state.al_state,
                error: self.state.error_flag,
                id_loaded: device_id.is_some(),
            },
            code: device_id.unwrap_or(u16::from(self.state.code)),
        }
    }

    /// Write status code, then AL status, then the shared snapshot.
    fn publish(&mut self) {
        let snapshot = self.snapshot_value();

        self.esc
            .write_register(RegisterAddress::AlStatusCode, snapshot.code);
        self.esc
            .write_register(RegisterAddress::AlStatus, snapshot.status);
        self.link.store_status(snapshot);

        self.run_led
            .set_pattern(LedPattern::run(self.state.al_state));
        self.error_led.set_pattern(if self.state.error_flag {
            self.state.error_indication.pattern()
        } else {
            LedPattern::Off
        });

        let current = (self.state.al_state, self.state.code);

        if current != self.state.published {
            let (from, _) = self.state.published;

            self.state.published = current;

            self.app
                .on_state_change(from, self.state.al_state, self.state.code);
        }
    }
}
