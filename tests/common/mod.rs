// Shared fakes for vpilot integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use vpilot::console::{ConsoleLogin, LoginRequest, Transcript};
use vpilot::exec::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
use vpilot::nested::remote::classify;
use vpilot::nested::{RemoteShell, RemoteTarget};
use vpilot::{HostContext, StepError};

/// Command runner that answers from a script and records every call.
///
/// Rules are matched in insertion order against the command line; the first
/// rule whose pattern is a substring wins. Unmatched commands succeed with
/// empty output, except `domstate` which reports `shut off`.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), output));
        self
    }

    pub fn fail(&self, pattern: &str, stderr: &str) -> &Self {
        self.on(pattern, CommandOutput::failed(1, stderr))
    }

    /// Report `modules` as loaded from lsmod
    pub fn loaded(&self, modules: &[&str]) -> &Self {
        let mut out = String::from("Module                  Size  Used by\n");
        for m in modules {
            out.push_str(&format!("{:<24}12345  0\n", m));
        }
        self.on("lsmod", CommandOutput::ok(out))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(CommandSpec::display)
            .collect()
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose command line contains `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    /// Position of the first call containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> anyhow::Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.display();
        let rules = self.rules.lock().unwrap();
        if let Some((_, output)) = rules.iter().find(|(pattern, _)| line.contains(pattern.as_str())) {
            return Ok(output.clone());
        }
        if line.contains(" domstate ") {
            return Ok(CommandOutput::ok("shut off\n"));
        }
        Ok(CommandOutput::ok(""))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOutcome {
    LoggedIn,
    TimedOut,
    Closed,
}

/// Console that writes canned output to the transcript instead of attaching
pub struct FakeConsole {
    output: String,
    outcome: ConsoleOutcome,
    requests: Mutex<Vec<LoginRequest>>,
}

impl FakeConsole {
    pub fn new(output: &str, outcome: ConsoleOutcome) -> Arc<Self> {
        Arc::new(Self {
            output: output.to_string(),
            outcome,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn clean() -> Arc<Self> {
        Self::new(
            "Fedora Linux 43 (Server Edition)\nvm1 login: root\nPassword: \n[root@vm1 ~]# ",
            ConsoleOutcome::LoggedIn,
        )
    }

    pub fn attempts(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<LoginRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ConsoleLogin for FakeConsole {
    fn login(&self, request: &LoginRequest, transcript: &Transcript) -> Result<(), StepError> {
        self.requests.lock().unwrap().push(request.clone());
        transcript
            .append(&self.output)
            .map_err(|e| StepError::internal("Write transcript", e))?;
        match self.outcome {
            ConsoleOutcome::LoggedIn => Ok(()),
            ConsoleOutcome::TimedOut => Err(StepError::Timeout {
                step: "Console".to_string(),
                expected: "login prompt".to_string(),
                after: request.boot_timeout,
            }),
            ConsoleOutcome::Closed => Err(StepError::connectivity(
                "Console",
                "connection closed while waiting for login prompt",
            )),
        }
    }
}

/// Remote shell that records operations and fails on request.
///
/// `ls` calls return the configured listing; downloads create the local file.
#[derive(Default)]
pub struct FakeRemote {
    ops: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, StepError)>>,
    listing: Mutex<String>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_logs(names: &[&str], workspace: &str) -> Arc<Self> {
        let remote = Self::new();
        let listing: Vec<String> = names
            .iter()
            .map(|n| format!("{}/{}", workspace.trim_end_matches('/'), n))
            .collect();
        *remote.listing.lock().unwrap() = listing.join("\n");
        remote
    }

    /// Fail the first operation whose description contains `pattern`
    pub fn fail_on(&self, pattern: &str, err: StepError) {
        self.failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), err));
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.ops().iter().filter(|op| op.contains(pattern)).count()
    }

    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.ops().iter().position(|op| op.contains(pattern))
    }

    fn record(&self, op: String) -> Result<(), StepError> {
        self.ops.lock().unwrap().push(op.clone());
        let mut failures = self.failures.lock().unwrap();
        if let Some(idx) = failures.iter().position(|(p, _)| op.contains(p.as_str())) {
            let (_, err) = failures.remove(idx);
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteShell for FakeRemote {
    async fn exec(
        &self,
        _target: &RemoteTarget,
        _step: &str,
        command: &str,
    ) -> Result<String, StepError> {
        self.record(format!("exec: {}", command))?;
        if command.starts_with("ls ") {
            return Ok(self.listing.lock().unwrap().clone());
        }
        Ok(String::new())
    }

    async fn upload(
        &self,
        _target: &RemoteTarget,
        local: &Path,
        remote: &str,
    ) -> Result<(), StepError> {
        self.record(format!("upload: {} -> {}", local.display(), remote))
    }

    async fn download(
        &self,
        _target: &RemoteTarget,
        remote: &str,
        local: &Path,
    ) -> Result<(), StepError> {
        self.record(format!("download: {} -> {}", remote, local.display()))?;
        std::fs::write(local, format!("copied from {}\n", remote))
            .map_err(|e| StepError::step("Download", e.to_string()))
    }
}

/// Remote shell that runs everything on this machine: commands through
/// `sh -c`, copies as plain file copies. Remote paths are local paths.
#[derive(Default)]
pub struct LocalShell;

impl LocalShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    async fn exec(
        &self,
        _target: &RemoteTarget,
        step: &str,
        command: &str,
    ) -> Result<String, StepError> {
        let spec = CommandSpec::new("sh").args(["-c", command]);
        let output = SystemRunner
            .run(&spec)
            .await
            .map_err(|e| StepError::connectivity(step, format!("{:#}", e)))?;
        classify(step, output)
    }

    async fn upload(
        &self,
        _target: &RemoteTarget,
        local: &Path,
        remote: &str,
    ) -> Result<(), StepError> {
        std::fs::copy(local, remote)
            .map(|_| ())
            .map_err(|e| StepError::step("Upload", e.to_string()))
    }

    async fn download(
        &self,
        _target: &RemoteTarget,
        remote: &str,
        local: &Path,
    ) -> Result<(), StepError> {
        std::fs::copy(remote, local)
            .map(|_| ())
            .map_err(|e| StepError::step("Download", e.to_string()))
    }
}

/// Host context wired to fakes, with host files under `dir`
pub fn context(
    runner: Arc<ScriptedRunner>,
    console: Arc<FakeConsole>,
    remote: Arc<dyn RemoteShell>,
    dir: &Path,
) -> HostContext {
    let cmdline_source = dir.join("cmdline");
    std::fs::write(&cmdline_source, "BOOT_IMAGE=/vmlinuz root=/dev/sda2 ro\n").unwrap();
    HostContext {
        runner,
        console,
        remote,
        blacklist_path: dir.join("disable-kvm.conf"),
        cmdline_source,
    }
}

/// Write a file under `dir` and return its path
pub fn touch(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}
