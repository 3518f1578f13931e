// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::CommunicationError;
use crate::error::UpdateError;
use crate::error::UpdateStep;
use crate::transport::execute;
use crate::Transport;
use bmc_oem_messages::CancelUpgrade;
use bmc_oem_messages::FinalizeUpgrade;
use bmc_oem_messages::FlashImage;
use bmc_oem_messages::OemCommand;
use bmc_oem_messages::QueryProgress;
use bmc_oem_messages::StartUpgrade;
use bmc_oem_messages::TransferId;
use bmc_oem_messages::UploadChunk;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long to wait between flash progress polls unless configured
/// otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Wait between flash progress polls.
    pub poll_interval: Duration,
    /// `flag` field sent with the flash request.
    pub flash_flag: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, flash_flag: 0 }
    }
}

/// Advisory progress of a BIOS update, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UpdateProgress {
    Idle,
    Starting { image_size: u32 },
    Uploading { transfer_id: TransferId, bytes_sent: u32, total: u32 },
    Flashing { transfer_id: TransferId, percent: u8 },
    Finalizing { transfer_id: TransferId },
    Complete { transfer_id: TransferId },
    Cancelled { transfer_id: TransferId },
    Failed,
}

/// State of one transfer, from a successful start until it is finalized or
/// cancelled.
#[derive(Debug)]
struct TransferSession {
    transfer_id: TransferId,
    max_chunk_size: u32,
    bytes_sent: u32,
    last_reported_percent: Option<u8>,
}

/// Replace the BIOS behind `transport` with `image`.
///
/// The sequence is start, upload every chunk, flash, poll progress until
/// 100%, finalize. If anything fails after the start succeeds (including
/// `cancel` firing) and before finalize, the transfer is cancelled on the BMC
/// and the original error is returned; a failure of the cancel itself is only
/// logged.
pub async fn run_firmware_update<T>(
    transport: &T,
    image: &[u8],
    config: &UpdateConfig,
    cancel: &CancellationToken,
    progress: &watch::Sender<UpdateProgress>,
    log: &Logger,
) -> Result<(), UpdateError>
where
    T: Transport + ?Sized,
{
    let image_size = u32::try_from(image.len())
        .map_err(|_| UpdateError::ImageTooLarge { len: image.len() })?;

    let driver = UpdateDriver {
        transport,
        image,
        image_size,
        config,
        cancel,
        progress,
        log: log.new(o!("image_size" => image_size)),
    };
    driver.run().await
}

struct UpdateDriver<'a, T: ?Sized> {
    transport: &'a T,
    image: &'a [u8],
    image_size: u32,
    config: &'a UpdateConfig,
    cancel: &'a CancellationToken,
    progress: &'a watch::Sender<UpdateProgress>,
    log: Logger,
}

impl<T: Transport + ?Sized> UpdateDriver<'_, T> {
    async fn run(self) -> Result<(), UpdateError> {
        self.report(UpdateProgress::Starting { image_size: self.image_size });

        let mut session = match self.start().await {
            Ok(session) => session,
            Err(err) => {
                error!(self.log, "failed to start BIOS update"; &err);
                self.report(UpdateProgress::Failed);
                return Err(err);
            }
        };
        let transfer_id = session.transfer_id;

        match self.drive(&mut session).await {
            Ok(()) => {
                info!(self.log, "BIOS update complete"; "transfer_id" => %transfer_id);
                self.report(UpdateProgress::Complete { transfer_id });
                Ok(())
            }
            Err(err) if err.needs_cancel() => {
                error!(
                    self.log, "BIOS update failed; cancelling transfer";
                    "transfer_id" => %transfer_id,
                    "bytes_sent" => session.bytes_sent,
                    &err,
                );
                self.cancel_transfer(transfer_id).await;
                self.report(UpdateProgress::Cancelled { transfer_id });
                Err(err)
            }
            Err(err) => {
                error!(
                    self.log, "BIOS update failed";
                    "transfer_id" => %transfer_id,
                    &err,
                );
                self.report(UpdateProgress::Failed);
                Err(err)
            }
        }
    }

    /// Everything between a successful start and the end of the update.
    async fn drive(
        &self,
        session: &mut TransferSession,
    ) -> Result<(), UpdateError> {
        if session.max_chunk_size == 0 {
            return Err(UpdateError::ZeroMaxChunkSize {
                transfer_id: session.transfer_id,
            });
        }
        self.upload(session).await?;
        self.flash(session).await?;
        self.poll_until_flashed(session).await?;
        self.finalize(session).await
    }

    async fn start(&self) -> Result<TransferSession, UpdateError> {
        let response = self
            .issue(
                UpdateStep::Start,
                None,
                StartUpgrade { image_size: self.image_size },
                UpdateError::Start,
            )
            .await?;

        info!(
            self.log, "BIOS transfer started";
            "transfer_id" => %response.transfer_id,
            "max_chunk_size" => response.max_chunk_size,
        );
        Ok(TransferSession {
            transfer_id: response.transfer_id,
            max_chunk_size: response.max_chunk_size,
            bytes_sent: 0,
            last_reported_percent: None,
        })
    }

    async fn upload(
        &self,
        session: &mut TransferSession,
    ) -> Result<(), UpdateError> {
        let transfer_id = session.transfer_id;

        while session.bytes_sent < self.image_size {
            let offset = session.bytes_sent;
            let len = u32::min(session.max_chunk_size, self.image_size - offset);
            let start = offset as usize;
            let data = self.image[start..start + len as usize].to_vec();

            debug!(
                self.log, "sending BIOS chunk";
                "transfer_id" => %transfer_id,
                "offset" => offset,
                "len" => len,
            );
            self.issue(
                UpdateStep::Upload { offset },
                Some(transfer_id),
                UploadChunk { transfer_id, offset, data },
                |err| UpdateError::UploadChunk { transfer_id, offset, err },
            )
            .await?;

            session.bytes_sent += len;
            self.report(UpdateProgress::Uploading {
                transfer_id,
                bytes_sent: session.bytes_sent,
                total: self.image_size,
            });
        }

        info!(self.log, "BIOS image uploaded"; "transfer_id" => %transfer_id);
        Ok(())
    }

    async fn flash(&self, session: &TransferSession) -> Result<(), UpdateError> {
        let transfer_id = session.transfer_id;
        self.issue(
            UpdateStep::Flash,
            Some(transfer_id),
            FlashImage { transfer_id, flag: self.config.flash_flag },
            |err| UpdateError::Flash { transfer_id, err },
        )
        .await?;
        info!(self.log, "BIOS flash requested"; "transfer_id" => %transfer_id);
        Ok(())
    }

    /// Poll until the BMC reports the flash is complete. There is no retry
    /// cap; only `self.cancel` ends an endless flash.
    async fn poll_until_flashed(
        &self,
        session: &mut TransferSession,
    ) -> Result<(), UpdateError> {
        let transfer_id = session.transfer_id;

        loop {
            let progress = self
                .issue(
                    UpdateStep::Progress,
                    Some(transfer_id),
                    QueryProgress { transfer_id },
                    |err| UpdateError::Progress { transfer_id, err },
                )
                .await?;

            let percent = progress.completion_percent;
            if session.last_reported_percent != Some(percent) {
                debug!(
                    self.log, "BIOS flash progress";
                    "transfer_id" => %transfer_id,
                    "percent" => percent,
                );
                session.last_reported_percent = Some(percent);
                self.report(UpdateProgress::Flashing { transfer_id, percent });
            }

            if progress.is_complete() {
                return Ok(());
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(UpdateError::Interrupted {
                        transfer_id: Some(transfer_id),
                        step: UpdateStep::Progress,
                    });
                }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn finalize(
        &self,
        session: &TransferSession,
    ) -> Result<(), UpdateError> {
        let transfer_id = session.transfer_id;
        self.report(UpdateProgress::Finalizing { transfer_id });
        self.issue(
            UpdateStep::Finalize,
            Some(transfer_id),
            FinalizeUpgrade { transfer_id },
            |err| UpdateError::Finalize { transfer_id, err },
        )
        .await
    }

    /// Best-effort cancel of an open transfer. Not raced against
    /// `self.cancel`, which may already have fired.
    async fn cancel_transfer(&self, transfer_id: TransferId) {
        match execute(self.transport, CancelUpgrade { transfer_id }).await {
            Ok(()) => {
                info!(self.log, "BIOS transfer cancelled"; "transfer_id" => %transfer_id);
            }
            Err(err) => {
                warn!(
                    self.log, "failed to cancel BIOS transfer";
                    "transfer_id" => %transfer_id,
                    &err,
                );
            }
        }
    }

    /// Send one command, giving up early if `self.cancel` fires first.
    async fn issue<C, F>(
        &self,
        step: UpdateStep,
        transfer_id: Option<TransferId>,
        command: C,
        map_err: F,
    ) -> Result<C::Response, UpdateError>
    where
        C: OemCommand,
        F: FnOnce(CommunicationError) -> UpdateError,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                Err(UpdateError::Interrupted { transfer_id, step })
            }
            result = execute(self.transport, command) => result.map_err(map_err),
        }
    }

    fn report(&self, progress: UpdateProgress) {
        self.progress.send_replace(progress);
    }
}
