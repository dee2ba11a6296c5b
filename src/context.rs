use std::path::PathBuf;
use std::sync::Arc;

use crate::console::{ConsoleLogin, PtyConsole};
use crate::exec::{CommandRunner, SystemRunner};
use crate::nested::{RemoteShell, SshRemote};
use crate::paths;

/// Host collaborators shared by every handler in one run.
///
/// Production code uses [`HostContext::system`]; tests swap in scripted
/// runners and fake consoles.
#[derive(Clone)]
pub struct HostContext {
    pub runner: Arc<dyn CommandRunner>,
    pub console: Arc<dyn ConsoleLogin>,
    pub remote: Arc<dyn RemoteShell>,
    /// Modprobe blacklist written when accelerator modules are disabled
    pub blacklist_path: PathBuf,
    /// Source of the host kernel command line in host-kernel mode
    pub cmdline_source: PathBuf,
}

impl HostContext {
    pub fn system() -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Self {
            remote: Arc::new(SshRemote::new(Arc::clone(&runner))),
            runner,
            console: Arc::new(PtyConsole),
            blacklist_path: paths::kvm_blacklist(),
            cmdline_source: paths::host_cmdline(),
        }
    }
}
