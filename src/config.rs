//! # Kernel Configuration
//!
//! Compile-time constants governing the scheduler, plus the boot-time
//! [`KernelConfig`] that fixes the scheduling policy for the lifetime of
//! a kernel instance.

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Priorities
// ---------------------------------------------------------------------------

/// Lowest priority. The idle thread always runs at this level.
pub const PRI_MIN: u8 = 0;

/// Priority given to the initial thread and the usual choice for new ones.
pub const PRI_DEFAULT: u8 = 31;

/// Highest priority.
pub const PRI_MAX: u8 = 63;

// ---------------------------------------------------------------------------
// MLFQS
// ---------------------------------------------------------------------------

/// Lowest accepted nice value (most favourable to the thread).
pub const NICE_MIN: i32 = -20;

/// Highest accepted nice value.
pub const NICE_MAX: i32 = 20;

/// Nice value of freshly created threads.
pub const NICE_DEFAULT: i32 = 0;

/// MLFQS priorities are recomputed every this many ticks.
pub const PRIORITY_RECALC_TICKS: u64 = 4;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Default timer frequency in Hz (ticks per simulated second).
pub const TIMER_FREQ: u32 = 100;

/// Accepted timer frequencies. Below 19 Hz the interval timer cannot be
/// programmed; above 1000 Hz tick overhead dominates.
pub const TIMER_FREQ_RANGE: core::ops::RangeInclusive<u32> = 19..=1000;

/// Ticks a thread may run before it is forced to yield to an equal-priority
/// peer.
pub const TIME_SLICE: u32 = 4;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Default capacity of the thread table, idle and initial thread included.
pub const MAX_THREADS: usize = 64;

/// Per-thread stack size in bytes handed to the port.
pub const STACK_SIZE: usize = 4096;

/// Maximum length of a thread name in bytes. Longer names are truncated.
pub const THREAD_NAME_MAX: usize = 16;

/// How many `wait_on_lock -> holder` hops a donation follows.
pub const DONATION_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Boot-time configuration
// ---------------------------------------------------------------------------

/// Scheduling policy and limits, fixed when the kernel boots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Use the multi-level feedback queue scheduler instead of the
    /// priority scheduler with donation.
    pub mlfqs: bool,
    /// Timer interrupts per second.
    pub timer_freq: u32,
    /// Ticks per time slice.
    pub time_slice: u32,
    /// Capacity of the thread table.
    pub max_threads: usize,
    /// Stack bytes requested from the port for each new thread.
    pub stack_size: usize,
    /// Nested donation bound.
    pub donation_depth: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mlfqs: false,
            timer_freq: TIMER_FREQ,
            time_slice: TIME_SLICE,
            max_threads: MAX_THREADS,
            stack_size: STACK_SIZE,
            donation_depth: DONATION_DEPTH,
        }
    }
}

impl KernelConfig {
    /// Default configuration with the MLFQS scheduler selected.
    pub fn mlfqs() -> Self {
        Self {
            mlfqs: true,
            ..Self::default()
        }
    }

    /// Parse scheduler options from a kernel command line.
    ///
    /// Recognized: `-o mlfqs` and the short form `-mlfqs`. Other `-o`
    /// options are rejected; unrelated words are left for other layers.
    pub fn from_cmdline(cmdline: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut words = cmdline.split_whitespace();

        while let Some(word) = words.next() {
            match word {
                "-mlfqs" => config.mlfqs = true,
                "-o" => match words.next() {
                    Some("mlfqs") => config.mlfqs = true,
                    Some(other) => return Err(ConfigError::UnknownOption(other.into())),
                    None => return Err(ConfigError::MissingValue("-o")),
                },
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every field against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !TIMER_FREQ_RANGE.contains(&self.timer_freq) {
            return Err(ConfigError::TimerFrequency(self.timer_freq));
        }
        if self.time_slice == 0 {
            return Err(ConfigError::TimeSlice);
        }
        // Room for the initial thread and the idle thread.
        if self.max_threads < 2 {
            return Err(ConfigError::ThreadLimit(self.max_threads));
        }
        if self.donation_depth == 0 {
            return Err(ConfigError::DonationDepth);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert;

    const_assert!(PRI_MIN < PRI_DEFAULT);
    const_assert!(PRI_DEFAULT < PRI_MAX);
    const_assert!(NICE_MIN < NICE_DEFAULT && NICE_DEFAULT < NICE_MAX);
    const_assert!(MAX_THREADS >= 2);

    #[test]
    fn test_default_config_is_valid() {
        let config = KernelConfig::default();
        assert!(!config.mlfqs);
        assert_eq!(config.timer_freq, 100);
        assert_eq!(config.time_slice, 4);
        assert_eq!(config.donation_depth, 8);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_cmdline_selects_mlfqs() {
        assert!(KernelConfig::from_cmdline("-q -o mlfqs run alarm-single").unwrap().mlfqs);
        assert!(KernelConfig::from_cmdline("-mlfqs").unwrap().mlfqs);
        assert!(!KernelConfig::from_cmdline("-q run priority-donate-one").unwrap().mlfqs);
    }

    #[test]
    fn test_cmdline_rejects_unknown_option() {
        assert_eq!(
            KernelConfig::from_cmdline("-o fifo"),
            Err(ConfigError::UnknownOption("fifo".into()))
        );
        assert_eq!(
            KernelConfig::from_cmdline("run -o"),
            Err(ConfigError::MissingValue("-o"))
        );
    }

    #[test]
    fn test_validate_limits() {
        let slow = KernelConfig {
            timer_freq: 10,
            ..KernelConfig::default()
        };
        assert_eq!(slow.validate(), Err(ConfigError::TimerFrequency(10)));

        let tiny = KernelConfig {
            max_threads: 1,
            ..KernelConfig::default()
        };
        assert_eq!(tiny.validate(), Err(ConfigError::ThreadLimit(1)));

        let zero_slice = KernelConfig {
            time_slice: 0,
            ..KernelConfig::default()
        };
        assert_eq!(zero_slice.validate(), Err(ConfigError::TimeSlice));
    }
}
