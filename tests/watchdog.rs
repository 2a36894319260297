//! Watchdogs and sync supervision while in `OP`.

mod util;

use ethercrab_al::{
    AlState, AlStatusCode, AlStorage, Controller, ErrorOrigin, RunningFlags, SubDeviceConfig,
    SyncEvents,
    config::SyncConfig,
    register::RegisterAddress,
};
use pretty_assertions::assert_eq;
use util::{
    ScriptedApp, TestController, configure_dc, configure_process_data, enable_output_watchdog,
    mailbox_esc,
};

/// Walk up to `OP` with DC SYNC0 at 1ms, feeding one SYNC0 and one SM2 event per millisecond.
fn dc_to_op(controller: &mut TestController<'_>, events: &SyncEvents<'_>) {
    controller.request_transition(AlState::PreOp, false);

    let sizes = controller.application().sizes;

    configure_process_data(controller.esc_mut(), sizes.outputs, sizes.inputs);
    configure_dc(controller.esc_mut(), 1_000_000, None);

    controller.request_transition(AlState::SafeOp, false);
    controller.request_transition(AlState::Op, false);

    assert_eq!(controller.status_code(), AlStatusCode::NoError);
    assert!(controller.pending().is_some());

    for _ in 0..10 {
        if controller.al_state() == AlState::Op {
            break;
        }

        cycle(controller, events);
    }

    assert_eq!(controller.al_state(), AlState::Op);
}

fn cycle(controller: &mut TestController<'_>, events: &SyncEvents<'_>) {
    events.on_sync0_event();
    events.on_process_data_event();

    controller.tick_1ms();
    controller.poll_pending_transition();
}

#[test]
fn op_waits_for_dc() {
    util::init_logger();

    let storage = AlStorage::new();
    let (events, link) = storage.try_split().expect("split");

    let mut controller = Controller::new(
        mailbox_esc(),
        ScriptedApp::new(4, 4),
        SubDeviceConfig::default(),
        link,
    )
    .expect("controller");

    dc_to_op(&mut controller, &events);

    assert!(controller.running_flags().contains(
        RunningFlags::DC_RUNNING
            | RunningFlags::SM_SYNC_SEQUENCE_VALID
            | RunningFlags::OUTPUT_UPDATE_RUNNING
    ));

    // Stay in OP while the cycle keeps running.
    for _ in 0..20 {
        cycle(&mut controller, &events);
    }

    assert_eq!(controller.al_state(), AlState::Op);
    assert_eq!(controller.status_code(), AlStatusCode::NoError);
}

#[test]
fn sync0_loss() {
    let storage = AlStorage::new();
    let (events, link) = storage.try_split().expect("split");

    let mut controller = Controller::new(
        mailbox_esc(),
        ScriptedApp::new(4, 4),
        SubDeviceConfig::default(),
        link,
    )
    .expect("controller");

    dc_to_op(&mut controller, &events);

    controller.tick_1ms();
    controller.tick_1ms();

    assert_eq!(controller.al_state(), AlState::SafeOp);
    assert!(controller.error_flag());
    assert_eq!(controller.status_code(), AlStatusCode::FatalSyncError);
    assert_eq!(
        controller.local_error().map(|e| e.origin),
        Some(ErrorOrigin::Watchdog)
    );
    assert!(
        !controller
            .running_flags()
            .contains(RunningFlags::DC_RUNNING)
    );

    // Acknowledge releases the watchdog error. OP then waits for SYNC0 again.
    controller.request_transition(AlState::SafeOp, true);

    assert!(controller.local_error().is_none());
    assert!(!controller.error_flag());

    controller.request_transition(AlState::Op, false);

    assert!(controller.pending().is_some());

    cycle(&mut controller, &events);

    assert_eq!(controller.al_state(), AlState::Op);
}

#[test]
fn sm_sync_sequence_lost() {
    let storage = AlStorage::new();
    let (events, link) = storage.try_split().expect("split");

    let mut controller = Controller::new(
        mailbox_esc(),
        ScriptedApp::new(4, 4),
        SubDeviceConfig::default(),
        link,
    )
    .expect("controller");

    dc_to_op(&mut controller, &events);

    for _ in 0..5 {
        cycle(&mut controller, &events);
    }

    // SYNC0 keeps coming, SM2 stops.
    let mut ticks = 0;

    while controller.al_state() == AlState::Op && ticks < 20 {
        events.on_sync0_event();
        controller.tick_1ms();

        ticks += 1;
    }

    assert_eq!(controller.al_state(), AlState::SafeOp);
    assert_eq!(controller.status_code(), AlStatusCode::SynchronizationError);
    assert!(
        !controller
            .running_flags()
            .contains(RunningFlags::SM_SYNC_SEQUENCE_VALID)
    );
}

#[test]
fn process_data_watchdog() {
    let storage = AlStorage::new();
    let (events, link) = storage.try_split().expect("split");

    let mut controller = Controller::new(
        mailbox_esc(),
        ScriptedApp::new(2, 2),
        SubDeviceConfig::default(),
        link,
    )
    .expect("controller");

    controller.request_transition(AlState::PreOp, false);
    configure_process_data(controller.esc_mut(), 2, 2);
    // 5ms
    enable_output_watchdog(controller.esc_mut(), 50);
    controller.request_transition(AlState::SafeOp, false);
    controller.request_transition(AlState::Op, false);
    events.on_process_data_event();
    controller.poll_pending_transition();

    assert_eq!(controller.al_state(), AlState::Op);

    // Frames arriving in time keep the watchdog quiet.
    for _ in 0..20 {
        events.on_process_data_event();
        controller.tick_1ms();
    }

    for _ in 0..3 {
        controller.tick_1ms();
    }

    assert_eq!(controller.al_state(), AlState::Op);

    controller.tick_1ms();

    assert_eq!(controller.al_state(), AlState::SafeOp);
    assert_eq!(controller.status_code(), AlStatusCode::SyncManagerWatchdog);
    assert_eq!(controller.application().calls.stop_output, 1);

    for _ in 0..2 {
        controller.tick_1ms();
    }

    // Watchdog errors double flash the ERR LED.
    assert_eq!(controller.application().error_led.last(), Some(&true));
    assert_eq!(
        controller.snapshot().status_code(),
        Some(AlStatusCode::SyncManagerWatchdog)
    );
    assert_eq!(
        storage.status().status_code(),
        Some(AlStatusCode::SyncManagerWatchdog)
    );

    // The outputs channel stays deactivated until the MainDevice acknowledges.
    assert!(controller.esc().sync_manager_pdi_disabled(2));
    assert!(!controller.esc().sync_manager_pdi_disabled(3));

    let flags = controller.running_flags();

    controller.request_transition(AlState::SafeOp, true);

    assert_eq!(controller.al_state(), AlState::SafeOp);
    assert!(!controller.error_flag());
    assert_eq!(controller.status_code(), AlStatusCode::NoError);
    assert!(controller.local_error().is_none());
    assert!(!controller.esc().sync_manager_pdi_disabled(2));
    assert!(!controller.esc().sync_manager_pdi_disabled(3));
    assert_eq!(controller.running_flags(), flags);
}

#[test]
fn watchdog_outside_op_is_ignored() {
    let storage = AlStorage::new();
    let (_events, link) = storage.try_split().expect("split");

    let mut controller = Controller::new(
        mailbox_esc(),
        ScriptedApp::new(4, 4),
        SubDeviceConfig::default(),
        link,
    )
    .expect("controller");

    controller.request_transition(AlState::PreOp, false);

    let sizes = controller.application().sizes;

    configure_process_data(controller.esc_mut(), sizes.outputs, sizes.inputs);
    configure_dc(controller.esc_mut(), 1_000_000, None);

    controller.request_transition(AlState::SafeOp, false);

    // No SYNC0 at all, SAFE-OP stays.
    for _ in 0..10 {
        controller.tick_1ms();
    }

    assert_eq!(controller.al_state(), AlState::SafeOp);
    assert!(!controller.error_flag());
}

#[test]
fn pll_window() {
    let storage = AlStorage::new();
    let (events, link) = storage.try_split().expect("split");

    let config = SubDeviceConfig {
        sync: SyncConfig {
            pll_window_ns: Some(1_000),
            ..SyncConfig::default()
        },
        ..SubDeviceConfig::default()
    };

    let mut controller =
        Controller::new(mailbox_esc(), ScriptedApp::new(4, 4), config, link).expect("controller");

    dc_to_op(&mut controller, &events);

    // Local time 500ns behind: fine.
    controller
        .esc_mut()
        .poke_register(RegisterAddress::DcSystemTimeDifference, 0x8000_01f4u32);

    cycle(&mut controller, &events);

    assert_eq!(controller.al_state(), AlState::Op);

    // 5us ahead.
    controller
        .esc_mut()
        .poke_register(RegisterAddress::DcSystemTimeDifference, 5_000u32);

    cycle(&mut controller, &events);

    assert_eq!(controller.al_state(), AlState::SafeOp);
    assert_eq!(controller.status_code(), AlStatusCode::PllError);
}
