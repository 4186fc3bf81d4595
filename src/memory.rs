//! Resident memory of the current process, sampled around predictions.

use log::warn;
use sysinfo::{Pid, System};

pub struct MemorySampler {
    system: System,
    pid: Option<Pid>,
}

impl MemorySampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Memory sampling unavailable: {}", e);
                None
            }
        };
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Resident set size in KB, or `None` when the platform cannot report it.
    pub fn resident_kb(&mut self) -> Option<u64> {
        let pid = self.pid?;
        if !self.system.refresh_process(pid) {
            return None;
        }
        self.system.process(pid).map(|p| p.memory() / 1024)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed change between two readings; unknown when either side is.
pub fn delta_kb(before: Option<u64>, after: Option<u64>) -> Option<i64> {
    let before = i64::try_from(before?).ok()?;
    let after = i64::try_from(after?).ok()?;
    Some(after - before)
}
