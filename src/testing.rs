// SPDX-FileCopyrightText: 2025-2026 TII (SSRC) and the Ghaf contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted command runner for unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use crate::exec::{CommandRunner, Invocation, Output};

type Handler = Box<dyn Fn(&Invocation) -> io::Result<Output> + Send + Sync>;

/// Answers invocations from a closure and records every call.
pub struct FakeRunner {
    handler: Handler,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<Invocation>>,
}

/// File name of the invoked program (`/usr/bin/ping` -> `ping`).
pub fn program_name(invocation: &Invocation) -> &str {
    invocation
        .program
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
}

impl FakeRunner {
    pub fn new(
        handler: impl Fn(&Invocation) -> io::Result<Output> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command exits 0 with no output.
    pub fn succeeding() -> Self {
        Self::new(|_| Ok(Output::exit(0)))
    }

    /// Make invocations of `program` take `delay` before answering.
    pub fn with_delay(mut self, program: &str, delay: Duration) -> Self {
        self.delays.insert(program.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls rendered as argv strings, in call order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: Invocation) -> impl Future<Output = io::Result<Output>> + Send {
        async move {
            self.calls.lock().unwrap().push(invocation.clone());

            if let Some(delay) = self.delays.get(program_name(&invocation)).copied() {
                match invocation.timeout {
                    Some(limit) if limit < delay => {
                        tokio::time::sleep(limit).await;
                        return Ok(Output {
                            timed_out: true,
                            ..Output::default()
                        });
                    }
                    _ => tokio::time::sleep(delay).await,
                }
            }

            (self.handler)(&invocation)
        }
    }
}
