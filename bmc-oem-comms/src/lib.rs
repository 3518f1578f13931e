// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! This crate drives the OEM BIOS update command set of a BMC over an
//! already-established IPMI session.
//!
//! The primary entry point is [`Bmc`], generic over the [`Transport`] that
//! carries requests. [`IpmitoolTransport`] is the stock transport.

mod bmc;
mod transport;

pub mod error;
pub mod ipmitool;

pub use bmc::run_firmware_update;
pub use bmc::BiosInfo;
pub use bmc::Bmc;
pub use bmc::UpdateConfig;
pub use bmc::UpdateProgress;
pub use bmc::DEFAULT_POLL_INTERVAL;
pub use ipmitool::IpmitoolConfig;
pub use ipmitool::IpmitoolTransport;
pub use tokio_util::sync::CancellationToken;
pub use transport::execute;
pub use transport::Transport;
