//! The application layer (AL) of an EtherCAT SubDevice.
//!
//! This crate implements the AL state machine a SubDevice runs on top of its EtherCAT SubDevice
//! Controller (ESC): `INIT`, `PRE-OP`, `BOOT`, `SAFE-OP` and `OP`, the Sync Manager checks that
//! guard each transition, selection of the process data sync mode, and the watchdogs supervising
//! cyclic operation.
//!
//! Register access goes through the [`Esc`] trait, application specific behaviour through the
//! [`Application`] trait. Both can be implemented by a firmware for real hardware, or by a test
//! harness using [`RamEsc`].
//!
//! The crate is `no_std` compatible. State shared with interrupt handlers lives in an
//! [`AlStorage`] which is split once into a [`SyncEvents`] handle for the interrupts and a
//! [`ControllerLink`] for the [`Controller`] owned by the mainloop.
//!
//! # Example
//!
//! ```rust
//! use core::task::Poll;
//! use ethercrab_al::{
//!     AlEventMask, AlState, AlStatusCode, AlStorage, Application, Controller, ProcessDataSizes,
//!     RamEsc, SubDeviceConfig,
//! };
//!
//! struct Digital;
//!
//! impl Application for Digital {
//!     fn start_mailbox_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
//!         Poll::Ready(Ok(()))
//!     }
//!
//!     fn stop_mailbox_handler(&mut self) -> Result<(), AlStatusCode> {
//!         Ok(())
//!     }
//!
//!     fn generate_mapping(&mut self) -> Result<ProcessDataSizes, AlStatusCode> {
//!         Ok(ProcessDataSizes::new(1, 1))
//!     }
//!
//!     fn start_input_handler(
//!         &mut self,
//!         _event_mask: &mut AlEventMask,
//!     ) -> Poll<Result<(), AlStatusCode>> {
//!         Poll::Ready(Ok(()))
//!     }
//!
//!     fn stop_input_handler(&mut self) -> Result<(), AlStatusCode> {
//!         Ok(())
//!     }
//!
//!     fn start_output_handler(&mut self) -> Poll<Result<(), AlStatusCode>> {
//!         Poll::Ready(Ok(()))
//!     }
//!
//!     fn stop_output_handler(&mut self) -> Result<(), AlStatusCode> {
//!         Ok(())
//!     }
//! }
//!
//! static STORAGE: AlStorage = AlStorage::new();
//!
//! let (_sync_events, link) = STORAGE.try_split().expect("can only split once");
//!
//! let mut controller =
//!     Controller::new(RamEsc::new(), Digital, SubDeviceConfig::default(), link)
//!         .expect("valid config");
//!
//! // No mailbox sync managers are configured in the empty RAM image.
//! controller.request_transition(AlState::PreOp, false);
//!
//! assert_eq!(controller.al_state(), AlState::Init);
//! assert!(controller.error_flag());
//! assert_eq!(STORAGE.status().state(), AlState::Init);
//! ```
//!
//! # Features
//!
//! - `std` (default): enables `log` and `std::error::Error` impls.
//! - `defmt`: log through `defmt` and derive `defmt::Format` for public types.
//! - `serde`: derive `Serialize`/`Deserialize` for configuration types.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

pub(crate) mod fmt;

pub mod al_control;
pub mod al_state;
pub mod al_status_code;
pub mod config;
pub mod controller;
pub mod error;
pub mod esc;
pub mod handler;
pub mod indicator;
pub mod register;
pub mod sm_check;
pub mod storage;
pub mod sync_manager_channel;
pub mod sync_mode;
pub mod watchdog;

pub use al_control::{AlControl, AlStatus};
pub use al_state::AlState;
pub use al_status_code::AlStatusCode;
pub use config::SubDeviceConfig;
pub use controller::{Controller, ErrorOrigin, LocalError, PendingTransition};
pub use error::{ConfigError, Error};
pub use esc::{Esc, RamEsc};
pub use handler::{AlEventMask, Application, ProcessDataSizes};
pub use sm_check::{CheckScope, SmFault, SmFaultKind, SyncManagerValidator};
pub use storage::{AlStorage, ControllerLink, StatusSnapshot, SyncEvents};
pub use sync_mode::{SyncDecision, SyncMode, SyncOverride};
pub use watchdog::{CycleAction, RunningFlags, WatchdogExpiry, WatchdogMonitor};
