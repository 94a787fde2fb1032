use chrono::Duration;

/// Interval used when the entered value is missing, zero or negative
pub const DEFAULT_EVENT_INTERVAL_MINUTES: i64 = 30;

/// Maximum gap between two images of the same species at the same site for
/// them to count as one detection event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventInterval {
    minutes: i64,
}

impl EventInterval {
    /// Non-positive values silently become the default
    pub fn new(minutes: i64) -> Self {
        if minutes > 0 {
            Self { minutes }
        } else {
            Self::default()
        }
    }

    /// Interpret user-entered text, falling back to the default when it is
    /// not a positive whole number
    pub fn parse(text: &str) -> Self {
        text.trim()
            .parse::<i64>()
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn minutes(self) -> i64 {
        self.minutes
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes)
    }
}

impl Default for EventInterval {
    fn default() -> Self {
        Self {
            minutes: DEFAULT_EVENT_INTERVAL_MINUTES,
        }
    }
}
