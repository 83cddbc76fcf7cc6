// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Launcher for real helper executables talking over stdin/stdout.

use std::ffi::OsString;
use std::process::{Command, Stdio};

use super::{HelperProcess, HelperProcessHandle, LaunchRequest, LaunchedHelper, ProcessLauncher};
use crate::channel::{InboundSink, StdioMessageChannel};
use crate::config::LaunchConfig;
use crate::error::LaunchError;
use crate::kinds::HelperKind;

pub struct ChildProcessLauncher {
    config: LaunchConfig,
}

impl ChildProcessLauncher {
    pub fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    /// Full argv for `request`, wrapper first when one is configured.
    pub fn command_line(&self, request: &LaunchRequest) -> Vec<OsString> {
        let mut argv = Vec::new();
        if let Some(wrapper) = &self.config.wrapper {
            argv.push(wrapper.as_os_str().to_owned());
        }
        argv.push(self.config.program.as_os_str().to_owned());
        argv.extend(self.config.args.iter().map(OsString::from));
        argv.push(format!("--channel-id={}", request.channel_id).into());
        argv.push(format!("--backend={}", request.backend).into());
        argv.push(format!("--kind={}", request.kind).into());
        if request.kind == HelperKind::Unsandboxed {
            argv.push("--disable-sandbox".into());
        }
        argv
    }

    fn command(&self, request: &LaunchRequest) -> Result<Command, LaunchError> {
        let argv = self.command_line(request);
        let Some((program, args)) = argv.split_first() else {
            return Err(LaunchError::ExecutableNotFound(String::new()));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        Ok(command)
    }
}

impl ProcessLauncher for ChildProcessLauncher {
    fn launch(
        &self,
        request: &LaunchRequest,
        sink: InboundSink,
    ) -> Result<LaunchedHelper, LaunchError> {
        let command = self.command(request)?;
        let name = self.config.program.display().to_string();
        let mut process = HelperProcessHandle::spawn(command, &name)?;

        // A helper that dies straight away (bad flags, missing libraries)
        // is a launch failure, not a crash.
        std::thread::sleep(self.config.early_exit_check());
        if !process.is_running() {
            let status = process.poll_exit(true);
            tracing::warn!("[Launcher] Helper '{}' {} before handshake", name, status);
            return Err(LaunchError::ExitedBeforeHandshake(status));
        }

        let stdin = process
            .take_stdin()
            .ok_or_else(|| LaunchError::Pipes("stdin not captured".into()))?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| LaunchError::Pipes("stdout not captured".into()))?;

        let channel = StdioMessageChannel::spawn(stdin, stdout, sink)
            .map_err(|e| LaunchError::Pipes(format!("failed to start reader: {}", e)))?;

        Ok(LaunchedHelper {
            process: Box::new(process),
            channel: Box::new(channel),
        })
    }
}
