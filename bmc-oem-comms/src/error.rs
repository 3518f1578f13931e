// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bmc_oem_messages::DecodeError;
use bmc_oem_messages::TransferId;
use serde::Serialize;
use slog_error_chain::SlogInlineError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Failure to deliver a request to the BMC or to receive its response.
#[derive(Debug, Error, SlogInlineError)]
pub enum TransportError {
    #[error("I/O error talking to BMC session")]
    Io(#[from] io::Error),
    #[error("session command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
    #[error("BMC returned completion code {code:#04x}")]
    CompletionCode { code: u8 },
    #[error("malformed response from session: {0}")]
    MalformedResponse(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error, SlogInlineError)]
pub enum CommunicationError {
    #[error("failed to send {command} command")]
    Transport {
        command: &'static str,
        #[source]
        err: TransportError,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Step of a BIOS update at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum UpdateStep {
    Start,
    Upload { offset: u32 },
    Flash,
    Progress,
    Finalize,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Upload { offset } => write!(f, "upload at offset {offset}"),
            Self::Flash => write!(f, "flash request"),
            Self::Progress => write!(f, "progress poll"),
            Self::Finalize => write!(f, "finalize"),
        }
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum UpdateError {
    #[error("update image is too large ({len} bytes)")]
    ImageTooLarge { len: usize },
    #[error("failed to start BIOS upgrade")]
    Start(#[source] CommunicationError),
    #[error("BMC reported a maximum chunk size of 0 for transfer {transfer_id}")]
    ZeroMaxChunkSize { transfer_id: TransferId },
    #[error(
        "failed to upload chunk at offset {offset} of transfer {transfer_id}"
    )]
    UploadChunk {
        transfer_id: TransferId,
        offset: u32,
        #[source]
        err: CommunicationError,
    },
    #[error("failed to request flash of transfer {transfer_id}")]
    Flash {
        transfer_id: TransferId,
        #[source]
        err: CommunicationError,
    },
    #[error("failed to poll flash progress of transfer {transfer_id}")]
    Progress {
        transfer_id: TransferId,
        #[source]
        err: CommunicationError,
    },
    #[error("failed to finalize transfer {transfer_id}")]
    Finalize {
        transfer_id: TransferId,
        #[source]
        err: CommunicationError,
    },
    #[error("BIOS update interrupted during {step}")]
    Interrupted { transfer_id: Option<TransferId>, step: UpdateStep },
}

impl UpdateError {
    /// The step of the update that failed.
    pub fn step(&self) -> UpdateStep {
        match self {
            Self::ImageTooLarge { .. }
            | Self::Start(_)
            | Self::ZeroMaxChunkSize { .. } => UpdateStep::Start,
            Self::UploadChunk { offset, .. } => {
                UpdateStep::Upload { offset: *offset }
            }
            Self::Flash { .. } => UpdateStep::Flash,
            Self::Progress { .. } => UpdateStep::Progress,
            Self::Finalize { .. } => UpdateStep::Finalize,
            Self::Interrupted { step, .. } => *step,
        }
    }

    /// The transfer that was open when the update failed, if any.
    pub fn transfer_id(&self) -> Option<TransferId> {
        match self {
            Self::ImageTooLarge { .. } | Self::Start(_) => None,
            Self::ZeroMaxChunkSize { transfer_id }
            | Self::UploadChunk { transfer_id, .. }
            | Self::Flash { transfer_id, .. }
            | Self::Progress { transfer_id, .. }
            | Self::Finalize { transfer_id, .. } => Some(*transfer_id),
            Self::Interrupted { transfer_id, .. } => *transfer_id,
        }
    }

    /// Whether any image data had been accepted by the BMC before the
    /// failure.
    pub fn data_sent(&self) -> bool {
        match self.step() {
            UpdateStep::Start => false,
            UpdateStep::Upload { offset } => offset > 0,
            UpdateStep::Flash | UpdateStep::Progress | UpdateStep::Finalize => {
                true
            }
        }
    }

    /// Whether the transfer must be cancelled before returning this error.
    ///
    /// Only true between a successful start and the finalize step; once the
    /// flash has completed there is nothing left to roll back.
    pub(crate) fn needs_cancel(&self) -> bool {
        self.transfer_id().is_some()
            && !matches!(self.step(), UpdateStep::Finalize)
    }
}
