//! Per-call scheduling hint a service reports from `process()`.

use std::time::Duration;

/// Upper bound applied to sleep hints when the host is not allowed to idle.
pub const DEFAULT_MAX_SLEEP_LIMIT: Duration = Duration::from_millis(100);

/// Outcome of a single `ServiceControl::process` call.
///
/// Merging picks the most restrictive result:
/// `Quit` > `SleepLimit` (shorter duration wins) > `NoSleepLimit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessResult {
    /// No constraint on when `process()` is called next.
    #[default]
    NoSleepLimit,
    /// The host should not delay the next `process()` call by more than this.
    SleepLimit(Duration),
    /// The service requests voluntary termination.
    Quit,
}

impl ProcessResult {
    /// Combines two results, keeping the most restrictive one.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Quit, _) | (_, Self::Quit) => Self::Quit,
            (Self::NoSleepLimit, rhs) => rhs,
            (lhs, Self::NoSleepLimit) => lhs,
            (Self::SleepLimit(a), Self::SleepLimit(b)) => Self::SleepLimit(a.min(b)),
        }
    }

    /// Caps the sleep hint at [`DEFAULT_MAX_SLEEP_LIMIT`] when `allow_sleep`
    /// is `false`. `Quit` is never altered.
    #[must_use]
    pub fn allow_sleep(self, allow_sleep: bool) -> Self {
        if allow_sleep {
            return self;
        }
        match self {
            Self::NoSleepLimit => Self::SleepLimit(DEFAULT_MAX_SLEEP_LIMIT),
            Self::SleepLimit(d) => Self::SleepLimit(d.min(DEFAULT_MAX_SLEEP_LIMIT)),
            Self::Quit => Self::Quit,
        }
    }

    #[must_use]
    pub fn is_quit(self) -> bool {
        matches!(self, Self::Quit)
    }

    /// The sleep limit, if one applies.
    #[must_use]
    pub fn sleep_limit(self) -> Option<Duration> {
        match self {
            Self::SleepLimit(d) => Some(d),
            Self::NoSleepLimit | Self::Quit => None,
        }
    }
}

impl FromIterator<ProcessResult> for ProcessResult {
    fn from_iter<I: IntoIterator<Item = ProcessResult>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ProcessResult::NoSleepLimit, ProcessResult::merge)
    }
}
