#![allow(dead_code)] // Test utilities may not all be used in every test
//! Scripted session fakes shared by the integration suites.
//!
//! A [`ScriptedDialer`] hands out shells that answer commands from a canned
//! (substring, output) table, optionally failing commands matching a pattern,
//! so session-backed flows run without any network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use fleetmon::remote::{ConnectError, Dialer, ExecError, HostTarget, RemoteShell};

/// Canned remote behaviour.
#[derive(Clone, Default)]
pub struct Script {
    /// (substring, canned stdout) pairs; first match wins.
    pub responses: Vec<(String, String)>,
    /// Commands containing this substring fail with exit status 1.
    pub fail_contains: Option<String>,
}

impl Script {
    pub fn respond(mut self, pattern: &str, output: &str) -> Self {
        self.responses.push((pattern.into(), output.into()));
        self
    }

    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_contains = Some(pattern.into());
        self
    }
}

pub struct ScriptedShell {
    script: Script,
    executed: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl RemoteShell for ScriptedShell {
    fn exec(&mut self, command: &str) -> Result<String, ExecError> {
        self.executed.lock().push(command.to_string());
        if let Some(pattern) = &self.script.fail_contains
            && command.contains(pattern.as_str())
        {
            return Err(ExecError::CommandFailed {
                status: 1,
                output: format!("simulated failure running `{command}`"),
            });
        }
        for (pattern, output) in &self.script.responses {
            if command.contains(pattern.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(String::new())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedDialer {
    script: Script,
    refuse: bool,
    executed: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedDialer {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            refuse: false,
            executed: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A dialer whose every dial fails as unreachable.
    pub fn refusing() -> Self {
        let mut dialer = Self::new(Script::default());
        dialer.refuse = true;
        dialer
    }

    /// Commands executed across all shells this dialer handed out.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    /// Whether any handed-out shell was explicitly closed.
    pub fn saw_close(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Dialer for ScriptedDialer {
    fn dial(&self, target: &HostTarget) -> Result<Box<dyn RemoteShell>, ConnectError> {
        if self.refuse {
            return Err(ConnectError::Unreachable {
                addr: target.addr(),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(ScriptedShell {
            script: self.script.clone(),
            executed: Arc::clone(&self.executed),
            closed: Arc::clone(&self.closed),
        }))
    }
}
