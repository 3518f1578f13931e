// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`Transport`] that drives a BMC session through the `ipmitool` binary.

use crate::error::TransportError;
use crate::Transport;
use async_trait::async_trait;
use bmc_oem_messages::OemRequest;
use slog::debug;
use slog::o;
use slog::Logger;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

pub const DEFAULT_INTERFACE: &str = "lanplus";
pub const DEFAULT_CIPHER_SUITE: u8 = 3;

/// Environment variable `ipmitool -E` reads the session password from.
pub const PASSWORD_ENV: &str = "IPMI_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmitoolConfig {
    /// Path to (or name of) the `ipmitool` binary.
    pub program: PathBuf,
    pub interface: String,
    pub host: String,
    pub username: String,
    /// Passed through the environment rather than the command line, so it
    /// does not show up in the process table.
    pub password: Option<String>,
    pub cipher_suite: u8,
}

impl IpmitoolConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("ipmitool"),
            interface: DEFAULT_INTERFACE.to_string(),
            host: host.into(),
            username: username.into(),
            password: None,
            cipher_suite: DEFAULT_CIPHER_SUITE,
        }
    }
}

pub struct IpmitoolTransport {
    config: IpmitoolConfig,
    log: Logger,
}

impl IpmitoolTransport {
    pub fn new(config: IpmitoolConfig, log: &Logger) -> Self {
        let log = log.new(o!(
            "bmc" => config.host.clone(),
            "interface" => config.interface.clone(),
        ));
        Self { config, log }
    }

    pub fn config(&self) -> &IpmitoolConfig {
        &self.config
    }

    fn args(&self, request: &OemRequest) -> Vec<OsString> {
        let config = &self.config;
        let mut args: Vec<OsString> = vec![
            "-I".into(),
            config.interface.clone().into(),
            "-H".into(),
            config.host.clone().into(),
            "-U".into(),
            config.username.clone().into(),
        ];
        if config.password.is_some() {
            args.push("-E".into());
        }
        args.push("-C".into());
        args.push(config.cipher_suite.to_string().into());

        let netfn_lun = request.netfn_lun();
        if netfn_lun.lun() != 0 {
            args.push("-l".into());
            args.push(netfn_lun.lun().to_string().into());
        }

        args.push("raw".into());
        args.push(format!("{:#04x}", netfn_lun.netfn().0).into());
        args.push(format!("{:#04x}", request.code()).into());
        args.extend(
            request.encode().into_iter().map(|b| format!("{b:#04x}").into()),
        );
        args
    }
}

#[async_trait]
impl Transport for IpmitoolTransport {
    async fn execute(
        &self,
        request: &OemRequest,
    ) -> Result<Vec<u8>, TransportError> {
        let mut command = Command::new(&self.config.program);
        command
            .args(self.args(request))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(password) = &self.config.password {
            command.env(PASSWORD_ENV, password);
        }

        debug!(
            self.log, "sending OEM command";
            "command" => request.name(),
            "code" => format!("{:#04x}", request.code()),
        );
        let output = command.output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            if let Some(code) = parse_completion_code(&stderr) {
                return Err(TransportError::CompletionCode { code });
            }
            return Err(TransportError::CommandFailed {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let data = parse_raw_output(&stdout)?;
        debug!(
            self.log, "received OEM response";
            "command" => request.name(),
            "len" => data.len(),
        );
        Ok(data)
    }
}

/// Pull the completion code out of `ipmitool raw`'s failure message, e.g.
///
/// ```text
/// Unable to send RAW command (channel=0x0 netfn=0x30 lun=0x0 cmd=0x61 rsp=0xc1): Invalid command
/// ```
fn parse_completion_code(stderr: &str) -> Option<u8> {
    let (_, rest) = stderr.split_once("rsp=0x")?;
    let digits: String =
        rest.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
    u8::from_str_radix(&digits, 16).ok()
}

/// `ipmitool raw` prints the response data as whitespace-separated hex
/// bytes, wrapped across lines.
fn parse_raw_output(stdout: &str) -> Result<Vec<u8>, TransportError> {
    stdout
        .split_whitespace()
        .map(|byte| {
            let decoded = hex::decode(byte).map_err(|err| {
                TransportError::MalformedResponse(format!(
                    "invalid byte {byte:?}: {err}"
                ))
            })?;
            match decoded[..] {
                [b] => Ok(b),
                _ => Err(TransportError::MalformedResponse(format!(
                    "expected one byte, got {byte:?}"
                ))),
            }
        })
        .collect()
}
