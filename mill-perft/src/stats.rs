//! Run statistics and progress reporting.

use std::time::Instant;

/// Resident set size in bytes.
#[cfg(target_os = "linux")]
pub fn resident_memory() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

/// Peak resident set size in bytes. macOS reports `ru_maxrss` in bytes, the
/// BSDs in kilobytes.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn resident_memory() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
    // SAFETY: getrusage only writes into the struct we hand it.
    let usage = unsafe {
        if libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) != 0 {
            return None;
        }
        usage.assume_init()
    };
    let max = u64::try_from(usage.ru_maxrss).ok()?;
    Some(if cfg!(target_os = "macos") { max } else { max * 1024 })
}

#[cfg(not(unix))]
pub fn resident_memory() -> Option<u64> {
    None
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    match unit {
        0 => format!("{} B", bytes),
        3 => format!("{:.2} GB", value),
        _ => format!("{:.1} {}", value, UNITS[unit]),
    }
}

/// Elapsed time as `HH:MM:SS`.
pub fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Timing for a counting run. The count itself lives elsewhere (usually a
/// shared atomic) and is passed in on each call.
#[derive(Debug)]
pub struct RunStats {
    unit: &'static str,
    start_time: Instant,
    last_log_time: Instant,
    last_log_count: u64,
}

impl RunStats {
    pub fn new(unit: &'static str) -> Self {
        let now = Instant::now();
        Self {
            unit,
            start_time: now,
            last_log_time: now,
            last_log_count: 0,
        }
    }

    /// Average rate since the start.
    pub fn per_sec(&self, count: u64) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            count as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn should_log(&self, interval_secs: u64) -> bool {
        self.last_log_time.elapsed().as_secs() >= interval_secs
    }

    /// One progress line with the rate since the previous one.
    pub fn log_progress(&mut self, count: u64) {
        let elapsed = self.last_log_time.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            count.saturating_sub(self.last_log_count) as f64 / elapsed
        } else {
            0.0
        };

        let mem = resident_memory().map_or(String::new(), |m| format!(" rss={}", format_bytes(m)));
        println!(
            "[{}] {} {} ({:.0}/s){}",
            format_clock(self.start_time.elapsed().as_secs()),
            count,
            self.unit,
            rate,
            mem,
        );

        self.last_log_time = Instant::now();
        self.last_log_count = count;
    }

    pub fn print_summary(&self, count: u64) {
        let secs = self.start_time.elapsed().as_secs_f64();
        println!("{} {} in {:.2}s ({:.0}/s)", count, self.unit, secs, self.per_sec(count));
        if let Some(mem) = resident_memory() {
            println!("Memory: {}", format_bytes(mem));
        }
    }
}
