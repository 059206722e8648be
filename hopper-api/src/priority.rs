//! Job priority classes
//!
//! Priorities are small ordered values. The raw byte is what travels in a
//! job's flags word; the scheduler groups raw values into a fixed number of
//! buckets when ordering work inside an actor.
//!
//! # Usage
//!
//! ```rust
//! use hopper_api::priority::{JobPriority, BUCKET_COUNT};
//!
//! let p = JobPriority::from_raw(0x1a);
//! assert_eq!(p, JobPriority::UserInitiated);
//! assert!(p.bucket_index() < BUCKET_COUNT);
//! ```

use std::fmt;

/// Number of priority buckets used by per-actor queues and the global run queue.
pub const BUCKET_COUNT: usize = 5;

/// Scheduling priority of a job.
///
/// Ordering follows the raw value, so `UserInteractive > Default > Background`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum JobPriority {
    /// No priority was requested
    #[default]
    Unspecified = 0x00,
    /// Maintenance and prefetching work
    Background = 0x09,
    /// Long-running work the user is aware of
    Utility = 0x11,
    /// The fallback class for ordinary work
    Default = 0x15,
    /// Work the user is waiting on
    UserInitiated = 0x19,
    /// Work driving the user interface
    UserInteractive = 0x21,
}

impl JobPriority {
    /// Alias for [`JobPriority::UserInitiated`]
    pub const HIGH: JobPriority = JobPriority::UserInitiated;
    /// Alias for [`JobPriority::Utility`]
    pub const LOW: JobPriority = JobPriority::Utility;

    /// Raw byte stored in a job's flags word.
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Maps a raw byte to the highest class that does not exceed it.
    pub const fn from_raw(raw: u8) -> JobPriority {
        if raw >= JobPriority::UserInteractive as u8 {
            JobPriority::UserInteractive
        } else if raw >= JobPriority::UserInitiated as u8 {
            JobPriority::UserInitiated
        } else if raw >= JobPriority::Default as u8 {
            JobPriority::Default
        } else if raw >= JobPriority::Utility as u8 {
            JobPriority::Utility
        } else if raw >= JobPriority::Background as u8 {
            JobPriority::Background
        } else {
            JobPriority::Unspecified
        }
    }

    /// Bucket used by the priority queues, 0 being the most urgent.
    pub const fn bucket_index(self) -> usize {
        let raw = self as u8;
        if raw > JobPriority::UserInitiated as u8 {
            0
        } else if raw > JobPriority::Default as u8 {
            1
        } else if raw > JobPriority::Utility as u8 {
            2
        } else if raw > JobPriority::Background as u8 {
            3
        } else {
            4
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPriority::Unspecified => "unspecified",
            JobPriority::Background => "background",
            JobPriority::Utility => "utility",
            JobPriority::Default => "default",
            JobPriority::UserInitiated => "user-initiated",
            JobPriority::UserInteractive => "user-interactive",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_constants() {
        assert_eq!(JobPriority::UserInteractive.value(), 0x21);
        assert_eq!(JobPriority::UserInitiated.value(), 0x19);
        assert_eq!(JobPriority::Default.value(), 0x15);
        assert_eq!(JobPriority::Utility.value(), 0x11);
        assert_eq!(JobPriority::Background.value(), 0x09);
        assert_eq!(JobPriority::Unspecified.value(), 0x00);
        assert_eq!(JobPriority::HIGH, JobPriority::UserInitiated);
        assert_eq!(JobPriority::LOW, JobPriority::Utility);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(JobPriority::UserInteractive.bucket_index(), 0);
        assert_eq!(JobPriority::UserInitiated.bucket_index(), 1);
        assert_eq!(JobPriority::Default.bucket_index(), 2);
        assert_eq!(JobPriority::Utility.bucket_index(), 3);
        assert_eq!(JobPriority::Background.bucket_index(), 4);
        assert_eq!(JobPriority::Unspecified.bucket_index(), 4);
    }

    #[test]
    fn test_from_raw_rounds_down() {
        assert_eq!(JobPriority::from_raw(0xff), JobPriority::UserInteractive);
        assert_eq!(JobPriority::from_raw(0x20), JobPriority::UserInitiated);
        assert_eq!(JobPriority::from_raw(0x15), JobPriority::Default);
        assert_eq!(JobPriority::from_raw(0x10), JobPriority::Background);
        assert_eq!(JobPriority::from_raw(0x01), JobPriority::Unspecified);
    }
}
