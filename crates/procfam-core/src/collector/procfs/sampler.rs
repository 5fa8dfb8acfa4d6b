//! Per-process rate sampling.
//!
//! The kernel exposes cumulative CPU ticks and fault counters; consumers want
//! percentages and per-second rates. `UsageSampler` keeps the previous raw
//! counters per `(pid, birthday)` and turns each new reading into rates over
//! the elapsed wall time.

use std::collections::HashMap;

use crate::process::Pid;

/// Interval between garbage collection sweeps, in seconds.
pub const SWEEP_INTERVAL_SECS: f64 = 3600.0;

/// Samples taken closer together than this reuse the previous rates.
pub const MIN_SAMPLE_INTERVAL_SECS: f64 = 1.0;

/// Cumulative counters read from `/proc/[pid]/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawCounters {
    /// user + system CPU, seconds.
    pub cpu_secs: f64,
    pub minflt: u64,
    pub majflt: u64,
}

/// Derived per-process rates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    pub percent_cpu: f64,
    pub minor_fault_rate: f64,
    pub major_fault_rate: f64,
}

#[derive(Debug, Clone)]
struct SampleState {
    birthday: u64,
    taken_at: f64,
    counters: RawCounters,
    rates: Rates,
    garbage: bool,
}

/// Rate sampler with mark-and-sweep expiry of stale state.
#[derive(Debug)]
pub struct UsageSampler {
    states: HashMap<Pid, SampleState>,
    birthday_tolerance: u64,
    last_sweep: f64,
}

impl UsageSampler {
    pub fn new(birthday_tolerance: u64) -> Self {
        Self {
            states: HashMap::new(),
            birthday_tolerance,
            last_sweep: 0.0,
        }
    }

    /// Number of processes with retained state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Computes rates for one process reading taken at wall time `now`.
    ///
    /// `age_secs` is the process age, used for the first sample of a process.
    pub fn sample(
        &mut self,
        pid: Pid,
        birthday: u64,
        counters: RawCounters,
        age_secs: f64,
        now: f64,
    ) -> Rates {
        self.maybe_sweep(now);

        let previous = self
            .states
            .remove(&pid)
            .filter(|state| state.birthday.abs_diff(birthday) <= self.birthday_tolerance);

        let mut stored_at = now;
        let mut stored = counters;

        let rates = match previous {
            Some(prev) if counters.cpu_secs < prev.counters.cpu_secs => prev.rates,
            Some(prev) if now - prev.taken_at < MIN_SAMPLE_INTERVAL_SECS => {
                stored_at = prev.taken_at;
                stored = prev.counters;
                prev.rates
            }
            Some(prev) => {
                let elapsed = now - prev.taken_at;
                Rates {
                    percent_cpu: (counters.cpu_secs - prev.counters.cpu_secs) / elapsed * 100.0,
                    minor_fault_rate: counters.minflt.saturating_sub(prev.counters.minflt) as f64
                        / elapsed,
                    major_fault_rate: counters.majflt.saturating_sub(prev.counters.majflt) as f64
                        / elapsed,
                }
            }
            None if age_secs <= 0.0 => Rates::default(),
            None => Rates {
                percent_cpu: counters.cpu_secs / age_secs * 100.0,
                minor_fault_rate: counters.minflt as f64 / age_secs,
                major_fault_rate: counters.majflt as f64 / age_secs,
            },
        };

        self.states.insert(
            pid,
            SampleState {
                birthday,
                taken_at: stored_at,
                counters: stored,
                rates,
                garbage: false,
            },
        );

        Rates {
            percent_cpu: rates.percent_cpu.max(0.0),
            ..rates
        }
    }

    /// Drops state not sampled since the previous sweep.
    fn maybe_sweep(&mut self, now: f64) {
        if now - self.last_sweep <= SWEEP_INTERVAL_SECS {
            return;
        }
        self.last_sweep = now;
        self.states.retain(|_, state| !state.garbage);
        for state in self.states.values_mut() {
            state.garbage = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: f64 = 1_700_000_000.0;

    fn counters(cpu_secs: f64, minflt: u64, majflt: u64) -> RawCounters {
        RawCounters {
            cpu_secs,
            minflt,
            majflt,
        }
    }

    #[test]
    fn test_first_sample_uses_age() {
        let mut sampler = UsageSampler::new(2);
        let rates = sampler.sample(100, 5000, counters(5.0, 1000, 10), 10.0, T0);
        assert!((rates.percent_cpu - 50.0).abs() < 1e-9);
        assert!((rates.minor_fault_rate - 100.0).abs() < 1e-9);
        assert!((rates.major_fault_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_sample_zero_age() {
        let mut sampler = UsageSampler::new(2);
        let rates = sampler.sample(100, 5000, counters(5.0, 1000, 10), 0.0, T0);
        assert_eq!(rates, Rates::default());
    }

    #[test]
    fn test_delta_over_elapsed_time() {
        let mut sampler = UsageSampler::new(2);
        sampler.sample(100, 5000, counters(5.0, 1000, 10), 10.0, T0);
        let rates = sampler.sample(100, 5000, counters(7.0, 1400, 10), 14.0, T0 + 4.0);
        assert!((rates.percent_cpu - 50.0).abs() < 1e-9);
        assert!((rates.minor_fault_rate - 100.0).abs() < 1e-9);
        assert_eq!(rates.major_fault_rate, 0.0);
    }

    #[test]
    fn test_sub_second_sample_reuses_rates() {
        let mut sampler = UsageSampler::new(2);
        sampler.sample(100, 5000, counters(5.0, 1000, 10), 10.0, T0);
        let second = sampler.sample(100, 5000, counters(9.0, 1000, 10), 10.5, T0 + 0.5);
        assert!((second.percent_cpu - 50.0).abs() < 1e-9);

        // the baseline stayed at T0, so the next delta spans 2 seconds
        let third = sampler.sample(100, 5000, counters(6.0, 1000, 10), 12.0, T0 + 2.0);
        assert!((third.percent_cpu - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_counter_going_backwards_reuses_rates() {
        let mut sampler = UsageSampler::new(2);
        sampler.sample(100, 5000, counters(5.0, 1000, 10), 10.0, T0);
        let rates = sampler.sample(100, 5000, counters(1.0, 1000, 10), 15.0, T0 + 5.0);
        assert!((rates.percent_cpu - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_pid_reuse_resets_state() {
        let mut sampler = UsageSampler::new(2);
        sampler.sample(100, 5000, counters(5.0, 1000, 10), 10.0, T0);
        // a different process with the same pid, one second old
        let rates = sampler.sample(100, 9000, counters(0.5, 0, 0), 1.0, T0 + 4.0);
        assert!((rates.percent_cpu - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_sweep_drops_untouched_state() {
        let mut sampler = UsageSampler::new(2);
        sampler.sample(100, 5000, counters(1.0, 0, 0), 10.0, T0);
        sampler.sample(200, 6000, counters(1.0, 0, 0), 10.0, T0);
        assert_eq!(sampler.len(), 2);

        // first sweep only flags, pid 100 is touched again afterwards
        sampler.sample(100, 5000, counters(2.0, 0, 0), 10.0, T0 + SWEEP_INTERVAL_SECS + 1.0);
        assert_eq!(sampler.len(), 2);

        sampler.sample(100, 5000, counters(3.0, 0, 0), 10.0, T0 + 2.0 * SWEEP_INTERVAL_SECS + 2.0);
        assert_eq!(sampler.len(), 1);
    }
}
