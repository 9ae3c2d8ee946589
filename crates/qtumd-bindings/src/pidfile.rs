use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;

/// Reads the integer PID recorded in the daemon's PID file, if any.
pub fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse::<i32>().ok()
}

/// Whether `pid` names a live, signalable process. Sending the null signal
/// is the standard liveness probe; an `ESRCH` response means no such process.
pub fn is_running(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Sends the platform graceful-termination signal (`SIGINT`) to `pid`.
pub fn send_graceful_stop(pid: i32) -> std::io::Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGINT)
        .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_no_pid() {
        assert_eq!(read_pid(Path::new("/no/such/pid/file")), None);
    }

    #[test]
    fn nonexistent_pid_is_not_running() {
        // PID 1 exists (init); an astronomically high PID almost certainly doesn't.
        assert!(!is_running(i32::MAX - 1));
    }
}
