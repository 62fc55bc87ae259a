use std::time::{Duration, Instant};

/// Delta sampler of process CPU utilization.
///
/// Each call compares the process CPU time consumed since the previous call
/// with the wall time elapsed, normalized by the number of cores.
pub struct CpuSampler {
    core_count: usize,
    last_cpu_time: Duration,
    last_wall_time: Instant,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self {
            core_count: num_cpus::get().max(1),
            last_cpu_time: process_cpu_time().unwrap_or_default(),
            last_wall_time: Instant::now(),
        }
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    /// Utilization since the previous call, in [0, 100].
    pub fn sample(&mut self) -> f32 {
        let now = Instant::now();
        // A failed OS read keeps the previous value so the delta is zero.
        let cpu_time = process_cpu_time().unwrap_or(self.last_cpu_time);

        let cpu_delta_ms = cpu_time.saturating_sub(self.last_cpu_time).as_secs_f64() * 1_000.0;
        let wall_delta_ms = now.saturating_duration_since(self.last_wall_time).as_secs_f64() * 1_000.0;

        self.last_cpu_time = cpu_time;
        self.last_wall_time = now;

        utilization(cpu_delta_ms, wall_delta_ms, self.core_count)
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// `(cpu_delta / wall_delta) * (100 / cores)`, clamped to [0, 100].
///
/// Returns 0 when no wall time elapsed (back-to-back calls, clock anomalies).
pub fn utilization(cpu_delta_ms: f64, wall_delta_ms: f64, core_count: usize) -> f32 {
    if wall_delta_ms <= 0.0 || !wall_delta_ms.is_finite() {
        return 0.0;
    }
    let cores = core_count.max(1) as f64;
    let percent = (cpu_delta_ms.max(0.0) / wall_delta_ms) * (100.0 / cores);
    percent.clamp(0.0, 100.0) as f32
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// User + system CPU time consumed by this process.
        fn process_cpu_time() -> Option<Duration> {
            let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
            // SAFETY: getrusage only writes into the struct we hand it.
            let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
            if rc != 0 {
                log::debug!("[CpuSampler] getrusage failed with {}", rc);
                return None;
            }
            // SAFETY: rc == 0 means the kernel filled the struct.
            let usage = unsafe { usage.assume_init() };
            Some(timeval_to_duration(usage.ru_utime) + timeval_to_duration(usage.ru_stime))
        }

        fn timeval_to_duration(tv: libc::timeval) -> Duration {
            Duration::from_secs(tv.tv_sec.max(0) as u64)
                + Duration::from_micros(tv.tv_usec.max(0) as u64)
        }
    } else {
        fn process_cpu_time() -> Option<Duration> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_a_core_on_four_cores_is_twelve_and_a_half() {
        assert!((utilization(500.0, 1_000.0, 4) - 12.5).abs() < f32::EPSILON);
    }

    #[test]
    fn non_positive_wall_delta_reports_zero() {
        assert_eq!(utilization(500.0, 0.0, 4), 0.0);
        assert_eq!(utilization(500.0, -10.0, 4), 0.0);
    }

    #[test]
    fn result_is_clamped_for_arbitrary_deltas() {
        for &(cpu, wall) in &[(0.0, 1.0), (10_000.0, 1.0), (1.0, 1e9), (3_999.0, 1_000.0)] {
            let value = utilization(cpu, wall, 1);
            assert!((0.0..=100.0).contains(&value), "{} out of range", value);
        }
        assert_eq!(utilization(10_000.0, 1.0, 2), 100.0);
    }

    #[test]
    fn zero_cores_is_treated_as_one() {
        assert_eq!(utilization(250.0, 1_000.0, 0), 25.0);
    }

    #[test]
    fn sampler_reports_values_in_range() {
        let mut sampler = CpuSampler::new();
        assert!(sampler.core_count() >= 1);

        let mut acc = 0u64;
        for i in 0..200_000u64 {
            acc = acc.wrapping_add(i * i);
        }
        std::hint::black_box(acc);

        let value = sampler.sample();
        assert!((0.0..=100.0).contains(&value));
    }
}
