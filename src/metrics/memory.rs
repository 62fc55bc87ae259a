use sysinfo::{Pid, System};

const BYTES_PER_MB: f32 = 1024.0 * 1024.0;

/// Process memory totals in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryUsage {
    /// Resident set size of the whole process
    pub process_mb: f32,
    /// Bytes currently handed out by the native allocator
    pub heap_mb: f32,
}

/// Reads process memory totals through sysinfo and the allocator.
pub struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                log::warn!("[MemoryProbe] Current pid unavailable: {}", err);
                None
            }
        };

        Self {
            system: System::new(),
            pid,
        }
    }

    pub fn resident_bytes(&mut self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        if !self.system.refresh_process(pid) {
            return 0;
        }
        self.system
            .process(pid)
            .map(|process| process.memory())
            .unwrap_or(0)
    }

    pub fn sample(&mut self) -> MemoryUsage {
        MemoryUsage {
            process_mb: self.resident_bytes() as f32 / BYTES_PER_MB,
            heap_mb: heap_allocated_bytes().unwrap_or(0) as f32 / BYTES_PER_MB,
        }
    }

    /// Coarse process-wide retention figure used by leak reports.
    ///
    /// Falls back to the resident size where allocator stats are missing.
    pub fn retained_heap_kb(&mut self) -> u64 {
        heap_allocated_bytes().unwrap_or_else(|| self.resident_bytes()) / 1024
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
        /// Bytes in use by the native allocator, arena plus mmapped chunks.
        pub fn heap_allocated_bytes() -> Option<u64> {
            // SAFETY: mallinfo2 has no preconditions and returns by value.
            let info = unsafe { libc::mallinfo2() };
            Some(info.uordblks as u64 + info.hblkhd as u64)
        }
    } else if #[cfg(target_os = "android")] {
        /// Bytes in use by the native allocator (bionic).
        pub fn heap_allocated_bytes() -> Option<u64> {
            // SAFETY: mallinfo has no preconditions and returns by value.
            let info = unsafe { libc::mallinfo() };
            Some(info.uordblks as u64)
        }
    } else {
        /// Allocator statistics are not available on this platform.
        pub fn heap_allocated_bytes() -> Option<u64> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_non_negative_totals() {
        let mut probe = MemoryProbe::new();
        let usage = probe.sample();
        assert!(usage.process_mb >= 0.0);
        assert!(usage.heap_mb >= 0.0);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn heap_grows_with_live_allocations() {
        let before = heap_allocated_bytes().unwrap();
        let block = vec![7u8; 8 * 1024 * 1024];
        let during = heap_allocated_bytes().unwrap();
        std::hint::black_box(&block);
        assert!(during > before);
    }
}
