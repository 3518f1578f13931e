// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface for talking to a single BMC.

use crate::error::CommunicationError;
use crate::error::UpdateError;
use crate::transport::execute;
use crate::Transport;
use bmc_oem_messages::CancelUpgrade;
use bmc_oem_messages::ProductId;
use bmc_oem_messages::QueryBiosDate;
use bmc_oem_messages::QueryBiosVersion;
use bmc_oem_messages::QueryProductId;
use bmc_oem_messages::QueryProgress;
use bmc_oem_messages::TransferId;
use bmc_oem_messages::UpgradeProgress;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::Logger;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(crate) mod update;

pub use self::update::run_firmware_update;
pub use self::update::UpdateConfig;
pub use self::update::UpdateProgress;
pub use self::update::DEFAULT_POLL_INTERVAL;

type Result<T, E = CommunicationError> = std::result::Result<T, E>;

/// Identity of the board and its current BIOS, as reported by the BMC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BiosInfo {
    pub product_id: ProductId,
    pub version: String,
    pub date: String,
}

pub struct Bmc<T> {
    transport: T,
    config: UpdateConfig,
    progress_tx: watch::Sender<UpdateProgress>,
    log: Logger,
}

impl<T: Transport> Bmc<T> {
    pub fn new(transport: T, config: UpdateConfig, log: Logger) -> Self {
        let (progress_tx, _progress_rx) = watch::channel(UpdateProgress::Idle);
        Self { transport, config, progress_tx, log }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Watch the progress of BIOS updates started via
    /// [`Self::bios_update()`].
    pub fn subscribe_update_progress(&self) -> watch::Receiver<UpdateProgress> {
        self.progress_tx.subscribe()
    }

    /// Get the board's product ID.
    pub async fn product_id(&self) -> Result<ProductId> {
        execute(&self.transport, QueryProductId).await
    }

    /// Get the version string of the installed BIOS.
    pub async fn bios_version(&self) -> Result<String> {
        execute(&self.transport, QueryBiosVersion).await
    }

    /// Get the build date string of the installed BIOS.
    pub async fn bios_date(&self) -> Result<String> {
        execute(&self.transport, QueryBiosDate).await
    }

    /// Get the product ID, BIOS version, and BIOS date, in that order.
    pub async fn bios_info(&self) -> Result<BiosInfo> {
        let product_id = self.product_id().await?;
        let version = self.bios_version().await?;
        let date = self.bios_date().await?;
        debug!(
            self.log, "read BIOS info";
            "board_model_id" => product_id.board_model_id,
            "version" => &version,
            "date" => &date,
        );
        Ok(BiosInfo { product_id, version, date })
    }

    /// Get the flash progress of an existing transfer.
    pub async fn upgrade_progress(
        &self,
        transfer_id: TransferId,
    ) -> Result<UpgradeProgress> {
        execute(&self.transport, QueryProgress { transfer_id }).await
    }

    /// Abort an existing transfer, e.g. one left behind by a process that
    /// died mid-update.
    pub async fn cancel_upgrade(&self, transfer_id: TransferId) -> Result<()> {
        info!(self.log, "cancelling BIOS transfer"; "transfer_id" => %transfer_id);
        execute(&self.transport, CancelUpgrade { transfer_id }).await
    }

    /// Replace the BIOS with `image`.
    ///
    /// Runs the whole transfer (start, upload, flash, poll, finalize) before
    /// returning. Any failure after the transfer starts, including `cancel`
    /// firing, cancels the transfer on the BMC before the error is returned.
    /// Progress is published to [`Self::subscribe_update_progress()`].
    pub async fn bios_update(
        &self,
        image: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), UpdateError> {
        run_firmware_update(
            &self.transport,
            image,
            &self.config,
            cancel,
            &self.progress_tx,
            &self.log,
        )
        .await
    }
}
