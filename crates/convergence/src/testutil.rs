//! In-memory channel doubles shared by the unit tests

use crate::context::{Channel, Connector};
use crate::error::ChannelError;
use crate::model::MachineModel;
use crate::types::CommandOutput;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Channel answering commands from a script of canned outputs
///
/// Responses are matched by command prefix in insertion order. Queued
/// responses for one prefix are consumed in order and the last one
/// repeats. Unmatched commands exit with `default_exit` and no output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    responses: Vec<(String, VecDeque<Result<CommandOutput, ChannelError>>)>,
    default_exit: i32,
    closed_after: Option<usize>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, prefix: &str, response: Result<CommandOutput, ChannelError>) -> Self {
        match self.responses.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(response),
            None => self
                .responses
                .push((prefix.to_string(), VecDeque::from([response]))),
        }
        self
    }

    pub fn respond(self, prefix: &str, stdout: &str, exit_code: i32) -> Self {
        self.push(
            prefix,
            Ok(CommandOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                exit_code,
            }),
        )
    }

    pub fn respond_err(self, prefix: &str, stderr: &str, exit_code: i32) -> Self {
        self.push(
            prefix,
            Ok(CommandOutput {
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
                exit_code,
            }),
        )
    }

    pub fn time_out(self, prefix: &str) -> Self {
        self.push(prefix, Err(ChannelError::TimedOut(Duration::from_secs(1))))
    }

    pub fn default_exit(mut self, exit_code: i32) -> Self {
        self.default_exit = exit_code;
        self
    }

    /// Every command after the first `count` reports a closed channel
    pub fn closed_after(mut self, count: usize) -> Self {
        self.closed_after = Some(count);
        self
    }

    /// Commands received so far, shared across clones
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl Channel for ScriptedChannel {
    fn run(&mut self, command: &str, _timeout: Duration) -> Result<CommandOutput, ChannelError> {
        let sent = {
            let mut log = self.log.lock().map_err(|e| ChannelError::Failed(e.to_string()))?;
            log.push(command.to_string());
            log.len()
        };
        if let Some(limit) = self.closed_after
            && sent > limit
        {
            return Err(ChannelError::Closed("broken pipe".to_string()));
        }

        for (prefix, queue) in &mut self.responses {
            if command.starts_with(prefix.as_str()) {
                let response = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                if let Some(response) = response {
                    return response;
                }
            }
        }

        Ok(CommandOutput {
            exit_code: self.default_exit,
            ..Default::default()
        })
    }
}

/// Connector handing out scripted channels per host label
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    channels: HashMap<String, ScriptedChannel>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, label: &str, channel: ScriptedChannel) -> Self {
        self.channels.insert(label.to_string(), channel);
        self
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, machine: &MachineModel) -> Result<Box<dyn Channel>, ChannelError> {
        match self.channels.get(machine.label()) {
            Some(channel) => Ok(Box::new(channel.clone())),
            None => Err(ChannelError::Closed(format!(
                "ssh: connect to host {}: Connection refused",
                machine.label()
            ))),
        }
    }
}
