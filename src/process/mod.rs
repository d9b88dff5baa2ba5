use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::Error;
use crate::types::Result;

/// Caller-supplied reload hook used instead of direct process control
pub type ReloadHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// How certificate reloads are communicated to the consumer
///
/// Selected once at construction: either reloads are delegated to an external
/// hook, or the supervisor manages a child process itself.
enum ReloadStrategy {
    /// Delegate every reload to the hook
    External(ReloadHook),
    /// Start the child when absent, signal it when running
    Managed(ManagedProcess),
}

/// Supervises the consumer process across repeated certificate rotations
pub struct ProcessSupervisor {
    strategy: ReloadStrategy,
}

impl ProcessSupervisor {
    /// Supervisor that delegates reloads to an external hook
    pub fn external(hook: ReloadHook) -> Self {
        Self {
            strategy: ReloadStrategy::External(hook),
        }
    }

    /// Supervisor that manages a child process started from `cmd`
    pub fn managed(
        cmd: impl Into<String>,
        cmd_args: impl Into<String>,
        renew_signal: Signal,
    ) -> Self {
        Self {
            strategy: ReloadStrategy::Managed(ManagedProcess {
                cmd: cmd.into(),
                cmd_args: cmd_args.into(),
                renew_signal,
                running: Arc::new(AtomicBool::new(false)),
                child_pid: Arc::new(Mutex::new(None)),
            }),
        }
    }

    /// Make the consumer pick up freshly written certificates
    ///
    /// Invoked once per successful artifact write; callers must not overlap
    /// invocations.
    pub fn reload(&self) -> Result<()> {
        match &self.strategy {
            ReloadStrategy::External(hook) => hook(),
            ReloadStrategy::Managed(process) => process.reload(),
        }
    }

    /// Whether a managed child process is currently running
    pub fn is_running(&self) -> bool {
        match &self.strategy {
            ReloadStrategy::External(_) => false,
            ReloadStrategy::Managed(process) => process.running.load(Ordering::SeqCst),
        }
    }

    /// Pid of the tracked child process, if one is running
    pub fn child_pid(&self) -> Option<u32> {
        match &self.strategy {
            ReloadStrategy::External(_) => None,
            ReloadStrategy::Managed(process) => *process.child_pid.lock().unwrap(),
        }
    }
}

/// State for the managed-child strategy
///
/// At most one child is tracked at a time. The running flag is the only state
/// shared with the exit-watcher task.
struct ManagedProcess {
    cmd: String,
    cmd_args: String,
    renew_signal: Signal,
    running: Arc<AtomicBool>,
    child_pid: Arc<Mutex<Option<u32>>>,
}

impl ManagedProcess {
    fn reload(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            self.start()
        } else {
            self.signal()
        }
    }

    /// Start the child with inherited stdio and track its exit asynchronously
    fn start(&self) -> Result<()> {
        let args = parse_cmd_args(&self.cmd_args)?;

        let mut command = Command::new(&self.cmd);
        command
            .args(&args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = command
            .spawn()
            .map_err(|e| Error::ProcessStart(format!("{}: {}", self.cmd, e)))?;

        *self.child_pid.lock().unwrap() = child.id();
        self.running.store(true, Ordering::SeqCst);
        debug!(cmd = %self.cmd, pid = ?child.id(), "Started process");

        let running = Arc::clone(&self.running);
        let child_pid = Arc::clone(&self.child_pid);
        tokio::spawn(async move {
            // A wait error is reported, never fatal to the sidecar
            if let Err(e) = child.wait().await {
                error!("Error waiting for process exit: {}", e);
            }
            *child_pid.lock().unwrap() = None;
            running.store(false, Ordering::SeqCst);
            debug!("Process exited");
        });

        Ok(())
    }

    /// Deliver the renew signal to the running child
    fn signal(&self) -> Result<()> {
        let pid = *self.child_pid.lock().unwrap();
        let pid = pid.ok_or_else(|| Error::SignalDelivery("no tracked child process".into()))?;

        debug!(pid, signal = %self.renew_signal, "Signaling process to reload certificates");
        signal::kill(Pid::from_raw(pid as i32), self.renew_signal)
            .map_err(|e| Error::SignalDelivery(format!("{}: {}", self.renew_signal, e)))
    }
}

/// Resolve a configured signal name, with or without the "SIG" prefix
pub fn resolve_signal(name: &str) -> Result<Signal> {
    let canonical = if name.starts_with("SIG") {
        name.to_string()
    } else {
        format!("SIG{}", name)
    };

    Signal::from_str(&canonical).map_err(|_| Error::Config(format!("unsupported renew signal: {}", name)))
}

/// Split a command-line argument string at whitespace, except inside a pair
/// of double quotes; the delimiting quotes are removed from the token
pub fn parse_cmd_args(input: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_quotes {
        return Err(Error::ArgParse(format!("unterminated quote in {:?}", input)));
    }
    if has_token {
        args.push(current);
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_parse_cmd_args() {
        assert_eq!(parse_cmd_args(r#"a "b c" d"#).unwrap(), vec!["a", "b c", "d"]);
        assert_eq!(parse_cmd_args("").unwrap(), Vec::<String>::new());
        assert_eq!(parse_cmd_args("  one   two  ").unwrap(), vec!["one", "two"]);
        assert_eq!(parse_cmd_args(r#""""#).unwrap(), vec![""]);
        assert!(matches!(parse_cmd_args(r#"a "b"#), Err(Error::ArgParse(_))));
    }

    #[test]
    fn test_resolve_signal() {
        assert_eq!(resolve_signal("SIGHUP").unwrap(), Signal::SIGHUP);
        assert_eq!(resolve_signal("USR1").unwrap(), Signal::SIGUSR1);
        assert!(matches!(resolve_signal("SIGBOGUS"), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_second_reload_signals_instead_of_restarting() {
        let supervisor = ProcessSupervisor::managed("sleep", "30", Signal::SIGCONT);

        supervisor.reload().unwrap();
        let pid = supervisor.child_pid().unwrap();

        // SIGCONT is harmless to a sleeping child
        supervisor.reload().unwrap();
        assert_eq!(supervisor.child_pid(), Some(pid));
        assert!(supervisor.is_running());

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    }

    #[tokio::test]
    async fn test_exit_watcher_resets_state() {
        let supervisor = ProcessSupervisor::managed("true", "", Signal::SIGCONT);

        supervisor.reload().unwrap();
        for _ in 0..500 {
            if !supervisor.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!supervisor.is_running());
        assert!(supervisor.child_pid().is_none());

        // Idle again, so the next reload starts a fresh child
        supervisor.reload().unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_reported() {
        let supervisor =
            ProcessSupervisor::managed("/nonexistent/definitely-missing", "", Signal::SIGHUP);

        assert!(matches!(supervisor.reload(), Err(Error::ProcessStart(_))));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_malformed_args_abort_before_start() {
        let supervisor = ProcessSupervisor::managed("sleep", r#""30"#, Signal::SIGHUP);

        assert!(matches!(supervisor.reload(), Err(Error::ArgParse(_))));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_external_hook_invoked() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let supervisor = ProcessSupervisor::external(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        supervisor.reload().unwrap();
        supervisor.reload().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_external_hook_error_propagates() {
        let supervisor = ProcessSupervisor::external(Box::new(|| {
            Err(Error::Internal("reload hook failed".into()))
        }));

        assert!(supervisor.reload().is_err());
    }
}
