use crate::case::controls::ControlDict;
use std::time::{Duration, Instant};

/// Fixed-step time loop state. `value` is recomputed as
/// `start + index * dt` on every advance so long runs do not drift, and the
/// directory name rendering is stable across restarts.
pub struct Time {
    pub value: f64,
    pub index: u64,
    pub dt: f64,
    start: f64,
    end: f64,
    write_interval: u64,
    clock_start: Instant,
    exec: Duration,
}

impl Time {
    pub fn new(ctrl: &ControlDict, start: f64) -> Self {
        Self {
            value: start,
            index: 0,
            dt: ctrl.delta_t,
            start,
            end: ctrl.end_time,
            write_interval: ctrl.write_interval,
            clock_start: Instant::now(),
            exec: Duration::ZERO,
        }
    }

    /// Advance to the next step; false once the end time is reached.
    pub fn advance(&mut self) -> bool {
        if self.value + 0.5 * self.dt >= self.end {
            return false;
        }
        self.index += 1;
        self.value = self.start + self.index as f64 * self.dt;
        true
    }

    pub fn name(&self) -> String {
        format_time(self.value)
    }

    pub fn output_step(&self) -> bool {
        self.index > 0 && self.index % self.write_interval == 0
    }

    pub fn add_exec(&mut self, d: Duration) {
        self.exec += d;
    }

    pub fn exec_seconds(&self) -> f64 {
        self.exec.as_secs_f64()
    }

    pub fn clock_seconds(&self) -> f64 {
        self.clock_start.elapsed().as_secs_f64()
    }
}

/// Render a time value as a directory name: six decimals, trailing zeros
/// trimmed, so `0.2 -> "0.2"` and `1.0 -> "1"`. Write and restart use the
/// same rendering, which is what keeps checkpoint paths stable.
pub fn format_time(value: f64) -> String {
    let s = format!("{:.6}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(end: f64, dt: f64, interval: u64) -> ControlDict {
        ControlDict {
            end_time: end,
            delta_t: dt,
            write_interval: interval,
        }
    }

    #[test]
    fn format_trims_zeros() {
        assert_eq!(format_time(0.0), "0");
        assert_eq!(format_time(0.2), "0.2");
        assert_eq!(format_time(1.0), "1");
        assert_eq!(format_time(1.35), "1.35");
        assert_eq!(format_time(0.1 + 0.2), "0.3");
    }

    #[test]
    fn loop_count_matches_interval() {
        let mut time = Time::new(&dict(1.0, 0.1, 1), 0.0);
        let mut steps = 0;
        while time.advance() {
            steps += 1;
        }
        assert_eq!(steps, 10);
        assert_eq!(time.name(), "1");
    }

    #[test]
    fn output_steps_follow_write_interval() {
        let mut time = Time::new(&dict(0.5, 0.1, 2), 0.0);
        let mut written = Vec::new();
        while time.advance() {
            if time.output_step() {
                written.push(time.name());
            }
        }
        assert_eq!(written, vec!["0.2", "0.4"]);
    }

    #[test]
    fn restart_resumes_from_nonzero_start() {
        let mut time = Time::new(&dict(1.0, 0.1, 1), 0.6);
        let mut names = Vec::new();
        while time.advance() {
            names.push(time.name());
        }
        assert_eq!(names, vec!["0.7", "0.8", "0.9", "1"]);
    }
}
