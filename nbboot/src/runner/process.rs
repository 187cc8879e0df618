//! Process-group helpers.
//!
//! Every command runs through `sh -c`, so the child pid belongs to the shell, not the
//! program it starts. Children are placed in their own process group and signals are
//! delivered to the whole group so pipelines and backgrounded helpers go down too.

use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Terminate,
    Kill,
}

/// Make the spawned child the leader of a new process group.
pub fn isolate_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Send `signal` to the process group led by `pid`. Returns false if delivery failed,
/// usually because the group has already exited.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: GroupSignal) -> bool {
    use nix::sys::signal::{Signal as NixSignal, killpg};
    use nix::unistd::Pid;

    let sig = match signal {
        GroupSignal::Terminate => NixSignal::SIGTERM,
        GroupSignal::Kill => NixSignal::SIGKILL,
    };
    match killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) => true,
        Err(e) => {
            tracing::trace!("killpg({}, {:?}) failed: {}", pid, sig, e);
            false
        }
    }
}

#[cfg(not(unix))]
pub fn signal_group(_pid: u32, _signal: GroupSignal) -> bool {
    false
}
