//! Signal delivery and operator interrupt handling

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Signals the supervisor sends to its children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT: lets the server close its sockets
    Interrupt,
    /// SIGKILL
    Kill,
}

/// Deliver `signal` to a whole process group
///
/// Children are spawned as process group leaders, so the group id equals
/// the child's pid. A group that is already gone is not an error.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: u32, signal: Signal) -> std::io::Result<()> {
    let raw = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Kill => libc::SIGKILL,
    };

    tracing::debug!("Sending {:?} to process group {}", signal, pgid);
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), raw) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

/// Operator interrupt, shared by everything that owns a child process
///
/// Owners observe the cancellation and kill their own children. Live
/// process groups are also registered here for the lifetime of their
/// owner, so a second Ctrl+C can kill them before the harness exits
/// without unwinding.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    token: CancellationToken,
    groups: Arc<Mutex<HashSet<u32>>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the operator interrupted
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Track a live process group until the returned guard is dropped
    pub(crate) fn register(&self, pgid: Option<u32>) -> GroupGuard {
        if let (Some(pgid), Ok(mut groups)) = (pgid, self.groups.lock()) {
            groups.insert(pgid);
        }
        GroupGuard {
            pgid,
            groups: Arc::clone(&self.groups),
        }
    }

    /// SIGKILL every registered process group
    pub(crate) fn kill_all(&self) {
        let Ok(groups) = self.groups.lock() else {
            return;
        };
        for pgid in groups.iter() {
            #[cfg(unix)]
            if let Err(e) = signal_group(*pgid, Signal::Kill) {
                tracing::warn!("Failed to kill process group {}: {}", pgid, e);
            }
            #[cfg(not(unix))]
            tracing::warn!("Cannot kill process group {} on this platform", pgid);
        }
    }

    #[cfg(test)]
    pub(crate) fn live_groups(&self) -> Vec<u32> {
        self.groups
            .lock()
            .map(|groups| groups.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Registration of one live process group; removed on drop
#[derive(Debug)]
pub(crate) struct GroupGuard {
    pgid: Option<u32>,
    groups: Arc<Mutex<HashSet<u32>>>,
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let (Some(pgid), Ok(mut groups)) = (self.pgid, self.groups.lock()) {
            groups.remove(&pgid);
        }
    }
}

/// Listen for Ctrl+C for the rest of the run
///
/// The first interrupt cancels the returned handle; whoever owns a live
/// process observes it and kills that process. A second interrupt kills
/// every registered process group and exits immediately.
pub fn install_interrupt_handler() -> Interrupt {
    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl+C: {}", e);
            return;
        }
        tracing::warn!("Interrupt received, stopping supervised processes");
        trigger.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Second interrupt, exiting immediately");
            trigger.kill_all();
            std::process::exit(130);
        }
    });

    interrupt
}
