//! A scripted application and a preconfigured RAM ESC for driving the state machine in tests.

#![allow(unused)]

use env_logger::Env;
use ethercrab_al::{
    AlEventMask, AlState, AlStatusCode, Application, Controller, Esc, ProcessDataSizes, RamEsc,
    SmFault, SyncEvents, SyncOverride,
    register::{DcActivation, RegisterAddress},
    sync_manager_channel::{Control, Direction, Enable, OperationMode, SyncManagerChannel},
};
use std::{collections::VecDeque, task::Poll};

pub const MAILBOX_LEN: u16 = 0x80;
pub const SM0_ADDRESS: u16 = 0x1000;
pub const SM1_ADDRESS: u16 = 0x1080;
pub const SM2_ADDRESS: u16 = 0x1100;
pub const SM3_ADDRESS: u16 = 0x1180;

pub fn init_logger() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

type StartScript = VecDeque<Poll<Result<(), AlStatusCode>>>;

/// Number of times each handler was called.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Calls {
    pub start_mailbox: u32,
    pub stop_mailbox: u32,
    pub start_bootstrap: u32,
    pub stop_bootstrap: u32,
    pub generate_mapping: u32,
    pub start_input: u32,
    pub stop_input: u32,
    pub start_output: u32,
    pub stop_output: u32,
}

/// Application whose start handlers follow a script. An empty script completes immediately.
#[derive(Debug, Default)]
pub struct ScriptedApp {
    pub sizes: ProcessDataSizes,
    pub mapping_error: Option<AlStatusCode>,
    pub bootstrap_supported: bool,
    pub mailbox_script: StartScript,
    pub input_script: StartScript,
    pub output_script: StartScript,
    pub stop_output_result: Option<AlStatusCode>,
    pub stop_input_result: Option<AlStatusCode>,
    pub extra_events: AlEventMask,
    pub sync_override: Option<SyncOverride>,
    pub calls: Calls,
    pub faults: Vec<SmFault>,
    pub changes: Vec<(AlState, AlState, AlStatusCode)>,
    pub run_led: Vec<bool>,
    pub error_led: Vec<bool>,
}

impl ScriptedApp {
    pub fn new(inputs: u16, outputs: u16) -> Self {
        Self {
            sizes: ProcessDataSizes::new(inputs, outputs),
            ..Self::default()
        }
    }

    fn next(script: &mut StartScript) -> Poll<Result<(), AlStatusCode>> {
        script.pop_front().unwrap_or(Poll::Ready(Ok(())))
    }

    fn stop(result: Option<AlStatusCode>) -> Result<(), AlStatusCode> {
        match result {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

impl Application for ScriptedApp {
    fn start_mailbox_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
        self.calls.start_mailbox += 1;

        Self::next(&mut self.mailbox_script)
    }

    fn stop_mailbox_handler(&mut self) -> Result<(), AlStatusCode> {
        self.calls.stop_mailbox += 1;

        Ok(())
    }

    fn start_bootstrap_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
        self.calls.start_bootstrap += 1;

        if self.bootstrap_supported {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(AlStatusCode::BootstrapNotSupported))
        }
    }

    fn stop_bootstrap_handler(&mut self) -> Result<(), AlStatusCode> {
        self.calls.stop_bootstrap += 1;

        Ok(())
    }

    fn generate_mapping(&mut self) -> Result<ProcessDataSizes, AlStatusCode> {
        self.calls.generate_mapping += 1;

        match self.mapping_error {
            Some(code) => Err(code),
            None => Ok(self.sizes),
        }
    }

    fn start_input_handler(&mut self, event_mask: &mut AlEventMask) -> Poll<Result<(), AlStatusCode>> {
        self.calls.start_input += 1;

        *event_mask |= self.extra_events;

        Self::next(&mut self.input_script)
    }

    fn stop_input_handler(&mut self) -> Result<(), AlStatusCode> {
        self.calls.stop_input += 1;

        Self::stop(self.stop_input_result)
    }

    fn start_output_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
        self.calls.start_output += 1;

        Self::next(&mut self.output_script)
    }

    fn stop_output_handler(&mut self) -> Result<(), AlStatusCode> {
        self.calls.stop_output += 1;

        Self::stop(self.stop_output_result)
    }

    fn sync_type_override(&self) -> Option<SyncOverride> {
        self.sync_override
    }

    fn on_sync_manager_fault(&mut self, fault: SmFault) {
        self.faults.push(fault);
    }

    fn on_state_change(&mut self, from: AlState, to: AlState, code: AlStatusCode) {
        self.changes.push((from, to, code));
    }

    fn set_run_indicator(&mut self, on: bool) {
        self.run_led.push(on);
    }

    fn set_error_indicator(&mut self, on: bool) {
        self.error_led.push(on);
    }
}

pub fn mailbox_channel(address: u16, direction: Direction) -> SyncManagerChannel {
    SyncManagerChannel {
        physical_start_address: address,
        length_bytes: MAILBOX_LEN,
        control: Control {
            operation_mode: OperationMode::Mailbox,
            direction,
            ..Control::default()
        },
        enable: Enable {
            enable: true,
            ..Enable::default()
        },
        ..SyncManagerChannel::default()
    }
}

pub fn process_data_channel(address: u16, len: u16, direction: Direction) -> SyncManagerChannel {
    SyncManagerChannel {
        physical_start_address: address,
        length_bytes: len,
        control: Control {
            operation_mode: OperationMode::Buffered,
            direction,
            ..Control::default()
        },
        enable: Enable {
            enable: len > 0,
            ..Enable::default()
        },
        ..SyncManagerChannel::default()
    }
}

/// An ESC with both mailbox channels set up the way a MainDevice would in `INIT`.
pub fn mailbox_esc() -> RamEsc {
    let mut esc = RamEsc::new();

    esc.poke_register(
        RegisterAddress::sync_manager(0),
        mailbox_channel(SM0_ADDRESS, Direction::MainDeviceWrite),
    );
    esc.poke_register(
        RegisterAddress::sync_manager(1),
        mailbox_channel(SM1_ADDRESS, Direction::MainDeviceRead),
    );

    esc
}

/// Program SM2 and SM3 as the MainDevice would in `PRE-OP`.
pub fn configure_process_data(esc: &mut RamEsc, outputs: u16, inputs: u16) {
    esc.poke_register(
        RegisterAddress::sync_manager(2),
        process_data_channel(SM2_ADDRESS, outputs, Direction::MainDeviceWrite),
    );
    esc.poke_register(
        RegisterAddress::sync_manager(3),
        process_data_channel(SM3_ADDRESS, inputs, Direction::MainDeviceRead),
    );
}

/// Enable the SM2 watchdog with the given timeout at the default divider (100us per increment).
pub fn enable_output_watchdog(esc: &mut RamEsc, timeout: u16) {
    let mut sm2 = esc
        .read_register::<SyncManagerChannel>(RegisterAddress::sync_manager(2))
        .expect("decode SM2");

    sm2.control.watchdog_enable = true;

    esc.poke_register(RegisterAddress::sync_manager(2), sm2);
    esc.poke_register(RegisterAddress::WatchdogDivider, 2498u16);
    esc.poke_register(RegisterAddress::SyncManagerWatchdog, timeout);
}

/// Program the DC sync unit as the MainDevice would before `SAFE-OP`.
pub fn configure_dc(esc: &mut RamEsc, sync0_cycle_ns: u32, sync1_cycle_ns: Option<u32>) {
    esc.poke_register(
        RegisterAddress::DcSyncActive,
        DcActivation {
            cyclic_operation: true,
            sync0: true,
            sync1: sync1_cycle_ns.is_some(),
            ..DcActivation::default()
        },
    );
    esc.poke_register(RegisterAddress::DcSync0CycleTime, sync0_cycle_ns);
    esc.poke_register(
        RegisterAddress::DcSync1CycleTime,
        sync1_cycle_ns.unwrap_or(0),
    );
}

pub type TestController<'sto> = Controller<'sto, RamEsc, ScriptedApp>;

/// Walk `INIT -> PRE-OP -> SAFE-OP`, programming the process data channels on the way.
pub fn to_safeop(controller: &mut TestController<'_>) {
    controller.request_transition(AlState::PreOp, false);

    assert_eq!(controller.al_state(), AlState::PreOp, "{:?}", controller.status_code());

    let sizes = controller.application().sizes;

    configure_process_data(controller.esc_mut(), sizes.outputs, sizes.inputs);

    controller.request_transition(AlState::SafeOp, false);

    assert_eq!(controller.al_state(), AlState::SafeOp, "{:?}", controller.status_code());
}

/// Walk up to `OP` without DC, delivering one frame of outputs.
pub fn to_op(controller: &mut TestController<'_>, events: &SyncEvents<'_>) {
    to_safeop(controller);

    controller.request_transition(AlState::Op, false);

    events.on_process_data_event();

    controller.poll_pending_transition();

    assert_eq!(controller.al_state(), AlState::Op, "{:?}", controller.status_code());
}
