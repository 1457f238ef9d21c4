//! Child-process ownership for the command runner.

use tokio::io::AsyncReadExt;
use tokio::process::Child;

/// Owns a spawned tool until it has exited. Dropped while armed, it kills the
/// tool and, on Unix, everything the tool started in its process group.
pub struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Send SIGKILL to the process group, falling back to the child alone.
    pub fn kill_tree(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.child.id() {
                // SAFETY: killpg has no memory-safety preconditions.
                let rc = unsafe { libc::killpg(pid as i32, libc::SIGKILL) };
                if rc == -1 {
                    let _ = self.child.start_kill();
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.kill_tree();
        let _ = self.child.try_wait();
    }
}

/// Start the tool as a session leader so `kill_tree` reaches its descendants.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: the closure only calls async-signal-safe functions.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the child dies with us instead of running on as an orphan.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Read until EOF, keeping at most `max_bytes`. Returns the bytes and whether
/// anything was dropped.
pub async fn read_to_end_limited<R: tokio::io::AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_bytes.saturating_sub(buf.len());
        let take = remaining.min(n);
        buf.extend_from_slice(&tmp[..take]);
        if take < n {
            // Keep draining so the child never blocks on a full pipe.
            truncated = true;
        }
    }

    (buf, truncated)
}
