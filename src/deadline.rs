//! `grpc-timeout` parsing and deadline scheduling.
//!
//! The header format is `<digits>{1,8}<unit>` where unit is one of
//! `H` (hours), `M` (minutes), `S` (seconds), `m` (milliseconds),
//! `u` (microseconds) or `n` (nanoseconds). A malformed value is treated as
//! absent: the call simply runs without a deadline.

use std::time::Duration;

use http::HeaderMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// `grpc-timeout` header name.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Largest value representable in 8 digits.
const MAX_TIMEOUT_VALUE: u64 = 99_999_999;

/// Parse a `grpc-timeout` value. Returns `None` on any format violation.
///
/// ```
/// use std::time::Duration;
/// use grpc_wire::deadline::parse_timeout;
///
/// assert_eq!(parse_timeout("100m"), Some(Duration::from_millis(100)));
/// assert_eq!(parse_timeout("123456789S"), None);
/// ```
pub fn parse_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    Some(match unit {
        "H" => Duration::from_secs(amount * 3600),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    })
}

/// Encode a timeout using the finest unit whose value fits in 8 digits.
///
/// ```
/// use std::time::Duration;
/// use grpc_wire::deadline::encode_timeout;
///
/// assert_eq!(encode_timeout(Duration::from_millis(1500)), "1500000u");
/// assert_eq!(encode_timeout(Duration::from_secs(3600 * 30)), "108000S");
/// ```
pub fn encode_timeout(timeout: Duration) -> String {
    let nanos = timeout.as_nanos();
    const UNITS: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60 * 1_000_000_000, 'M'),
        (3600 * 1_000_000_000, 'H'),
    ];
    for (divisor, unit) in UNITS {
        let value = nanos / divisor;
        if value <= MAX_TIMEOUT_VALUE as u128 {
            return format!("{}{}", value, unit);
        }
    }
    format!("{}H", MAX_TIMEOUT_VALUE)
}

/// An absolute point in time after which a call is forcibly terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    scheduled_at: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            scheduled_at: Instant::now(),
            timeout,
        }
    }

    /// Read the deadline from request headers.
    ///
    /// Returns `None` when propagation is disabled, the header is missing, or
    /// the header is malformed.
    pub fn from_headers(headers: &HeaderMap, propagation_enabled: bool) -> Option<Self> {
        if !propagation_enabled {
            return None;
        }
        let value = headers.get(GRPC_TIMEOUT)?.to_str().ok()?;
        match parse_timeout(value) {
            Some(timeout) => Some(Self::after(timeout)),
            None => {
                tracing::debug!("Ignoring malformed {} header: {:?}", GRPC_TIMEOUT, value);
                None
            }
        }
    }

    /// When the deadline was created.
    #[inline]
    pub fn scheduled_at(&self) -> Instant {
        self.scheduled_at
    }

    /// The original timeout.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The instant at which the deadline expires.
    #[inline]
    pub fn expires_at(&self) -> Instant {
        self.scheduled_at + self.timeout
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.expires_at().saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at()
    }

    /// Header value carrying the remaining time to the next hop.
    pub fn to_header_value(&self) -> String {
        encode_timeout(self.remaining())
    }
}

/// A scheduled expiry callback. Dropping or cancelling the timer prevents the
/// callback from running.
#[derive(Debug)]
pub struct DeadlineTimer {
    handle: JoinHandle<()>,
}

impl DeadlineTimer {
    /// Run `on_expire` when `deadline` elapses.
    pub fn schedule<F>(deadline: Deadline, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline.expires_at()).await;
            on_expire();
        });
        Self { handle }
    }

    /// Cancel the timer. The callback will not run if it has not already.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the timer has fired or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
