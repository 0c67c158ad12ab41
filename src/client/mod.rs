use regex::Regex;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::HarnessConfig;
use crate::{HarnessError, Result};

/// Which update command to drive through the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// `admin update-bootstrap`: the client exits to replace itself.
    Bootstrap,
    /// `admin update-hypervisor`: completes in place, then restarts.
    Hypervisor,
    /// `admin update`: covers CLI and component updates.
    Full,
}

/// Interactive session with the external update client.
///
/// The client is spawned with piped stdio; reader threads forward stdout and
/// stderr chunks over a channel so `expect` can scan accumulated output
/// against a pattern under a deadline.
pub struct Session {
    child: Child,
    stdin: ChildStdin,
    rx: Receiver<Vec<u8>>,
    buffer: String,
    prompt: Regex,
    config: HarnessConfig,
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R, tx: Sender<Vec<u8>>) {
    std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

impl Session {
    /// Spawn the client and wait for its first prompt.
    pub fn spawn(executable: &str, args: &[String], config: &HarnessConfig) -> Result<Self> {
        debug!("Starting client: {} {}", executable, args.join(" "));

        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| HarnessError::Client(format!("failed to spawn {}: {}", executable, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Client("client stdin unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx);
        }

        let prompt = config.prompt_regex()?;
        let mut session = Self {
            child,
            stdin,
            rx,
            buffer: String::new(),
            prompt,
            config: config.clone(),
        };

        let startup = session.config.timeouts.startup();
        session.expect_prompt(startup)?;
        debug!("Client started");
        Ok(session)
    }

    pub fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("-> {}", line);
        writeln!(self.stdin, "{}", line)
            .and_then(|_| self.stdin.flush())
            .map_err(|e| HarnessError::Client(format!("failed to write to client: {}", e)))
    }

    /// Wait until `pattern` shows up in the output, returning everything
    /// before the match. Matched text is consumed from the buffer.
    pub fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.take_match(pattern) {
                return Ok(found);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::Client(format!(
                    "timed out after {:?} waiting for pattern `{}`",
                    timeout, pattern
                )));
            }

            match self.rx.recv_timeout(deadline - now) {
                Ok(chunk) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Err(RecvTimeoutError::Timeout) => {}
                // Both readers are gone and the buffer was already scanned
                // above, so no match is coming.
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(HarnessError::Client(format!(
                        "client exited while waiting for `{}`",
                        pattern
                    )));
                }
            }
        }
    }

    fn take_match(&mut self, pattern: &Regex) -> Option<String> {
        let m = pattern.find(&self.buffer)?;
        let (start, end) = (m.start(), m.end());
        let before = self.buffer[..start].to_string();
        self.buffer.drain(..end);
        Some(before)
    }

    fn expect_prompt(&mut self, timeout: Duration) -> Result<String> {
        let prompt = self.prompt.clone();
        self.expect(&prompt, timeout)
    }

    /// Send a command and collect its output up to the next prompt.
    pub fn command(&mut self, cmd: &str, timeout: Duration) -> Result<String> {
        self.send_line(cmd)?;
        let output = self.expect_prompt(timeout)?;
        debug!("<- {} bytes of output", output.len());
        Ok(output)
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    // Admin command wrappers

    pub fn update_manifest(&mut self) -> Result<String> {
        let timeout = self.config.timeouts.standard();
        self.command("admin update-manifest", timeout)
    }

    pub fn check_updates(&mut self) -> Result<String> {
        let timeout = self.config.timeouts.standard();
        self.command("admin check-updates", timeout)
    }

    pub fn get_config(&mut self) -> Result<String> {
        let timeout = self.config.timeouts.standard();
        self.command("admin get-config", timeout)
    }

    pub fn model_list(&mut self) -> Result<String> {
        let timeout = self.config.timeouts.standard();
        self.command("admin model-list", timeout)
    }

    /// Switch the active model. Fails if the client never reports a
    /// completed initialization.
    pub fn model_use(&mut self, model: &str) -> Result<String> {
        let pattern = Regex::new(&self.config.completion.model_switch)
            .map_err(|e| HarnessError::Config(format!("invalid model-switch pattern: {}", e)))?;
        let timeout = self.config.timeouts.update();
        let quick = self.config.timeouts.quick();
        self.send_line(&format!("admin model-use \"{}\" --confirm", model))?;
        self.expect(&pattern, timeout)?;
        self.expect_prompt(quick)
    }

    /// Drive one update command to completion. The client usually exits
    /// afterwards (to restart into the new version); callers respawn.
    pub fn run_update(&mut self, kind: UpdateKind) -> Result<()> {
        let (command, pattern) = match kind {
            UpdateKind::Bootstrap => (
                "admin update-bootstrap --confirm",
                self.config.completion.bootstrap.clone(),
            ),
            UpdateKind::Hypervisor => (
                "admin update-hypervisor --confirm",
                self.config.completion.hypervisor.clone(),
            ),
            UpdateKind::Full => (
                "admin update --confirm",
                self.config.completion.full.clone(),
            ),
        };
        let pattern = Regex::new(&pattern)
            .map_err(|e| HarnessError::Config(format!("invalid completion pattern: {}", e)))?;
        let timeout = self.config.timeouts.update();

        self.send_line(command)?;
        match self.expect(&pattern, timeout) {
            Ok(_) => {
                debug!("{:?} update completed, shutting client down for restart", kind);
                self.shutdown();
                Ok(())
            }
            // The client exiting mid-update is the expected path for
            // bootstrap updates, and tolerated for the rest.
            Err(e) if !self.is_alive() => {
                debug!("client exited during {:?} update: {}", kind, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the client to exit; kill it if it lingers.
    pub fn shutdown(&mut self) {
        if !self.is_alive() {
            return;
        }
        if self.send_line("exit").is_ok() {
            let deadline = Instant::now() + self.config.timeouts.quick();
            while Instant::now() < deadline {
                if !self.is_alive() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
        warn!("Client did not exit cleanly, killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
