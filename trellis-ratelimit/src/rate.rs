//! Rate rules and their constructors.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use trellis_core::RateLimitError;

/// One `(limit, period)` rule: at most `limit` admissions per `period`.
///
/// A zero `limit` denies every call. A zero `period` never limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    pub limit: u32,
    pub period: Duration,
}

impl Rate {
    pub const fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }

    /// `limit` admissions every `secs` seconds.
    pub const fn per_secs(limit: u32, secs: u64) -> Self {
        Self::new(limit, Duration::from_secs(secs))
    }

    pub fn denies_all(&self) -> bool {
        self.limit == 0
    }

    pub fn is_unlimited(&self) -> bool {
        self.period.is_zero()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.limit, self.period.as_secs())
    }
}

/// Parses the `limit/secs` form used in configuration, e.g. `10/60`.
impl FromStr for Rate {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| RateLimitError::InvalidRates {
            reason: format!("{s:?}: {reason}"),
        };
        let (limit, secs) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected limit/seconds"))?;
        let limit = limit
            .trim()
            .parse()
            .map_err(|_| invalid("limit is not a non-negative integer"))?;
        let secs = secs.trim();
        let secs = secs
            .strip_suffix('s')
            .unwrap_or(secs)
            .parse()
            .map_err(|_| invalid("period is not a whole number of seconds"))?;
        Ok(Self::per_secs(limit, secs))
    }
}

/// Build rules from flat `[limit, period, limit, period, ...]` pairs where
/// each period is counted in `unit`.
///
/// # Errors
/// Returns [`RateLimitError::InvalidRates`] when the list has an odd
/// length, `unit` is under one millisecond, or a period overflows.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use trellis_ratelimit::{rates_from_pairs, Rate};
///
/// let rates = rates_from_pairs(Duration::from_secs(1), &[10, 60, 100, 3600]).unwrap();
/// assert_eq!(rates, vec![Rate::per_secs(10, 60), Rate::per_secs(100, 3600)]);
/// ```
pub fn rates_from_pairs(unit: Duration, pairs: &[u32]) -> Result<Vec<Rate>, RateLimitError> {
    if pairs.len() % 2 != 0 {
        return Err(RateLimitError::InvalidRates {
            reason: format!("{} values do not form limit/period pairs", pairs.len()),
        });
    }
    if unit < Duration::from_millis(1) {
        return Err(RateLimitError::InvalidRates {
            reason: format!("unit {unit:?} is shorter than one millisecond"),
        });
    }

    pairs
        .chunks_exact(2)
        .map(|pair| {
            let period = unit
                .checked_mul(pair[1])
                .ok_or_else(|| RateLimitError::InvalidRates {
                    reason: format!("period {} x {unit:?} overflows", pair[1]),
                })?;
            Ok(Rate::new(pair[0], period))
        })
        .collect()
}

/// [`rates_from_pairs`] with one-second periods.
pub fn sec_rates(pairs: &[u32]) -> Result<Vec<Rate>, RateLimitError> {
    rates_from_pairs(Duration::from_secs(1), pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_scale_by_unit() {
        let rates = rates_from_pairs(Duration::from_millis(10), &[5, 3, 0, 0]).unwrap();
        assert_eq!(rates[0], Rate::new(5, Duration::from_millis(30)));
        assert!(rates[1].denies_all());
        assert!(rates[1].is_unlimited());
    }

    #[test]
    fn test_unbalanced_pairs_rejected() {
        assert!(matches!(
            sec_rates(&[10, 60, 5]),
            Err(RateLimitError::InvalidRates { .. })
        ));
    }

    #[test]
    fn test_sub_millisecond_unit_rejected() {
        assert!(matches!(
            rates_from_pairs(Duration::from_micros(999), &[1, 1]),
            Err(RateLimitError::InvalidRates { .. })
        ));
    }

    #[test]
    fn test_empty_pairs_are_valid() {
        assert_eq!(sec_rates(&[]), Ok(vec![]));
    }

    #[test]
    fn test_parse_and_display() {
        let rate: Rate = " 10/60 ".parse().unwrap();
        assert_eq!(rate, Rate::per_secs(10, 60));
        assert_eq!(rate.to_string(), "10/60s");
        assert_eq!("10/60s".parse::<Rate>(), Ok(rate));
        assert!("10".parse::<Rate>().is_err());
        assert!("-1/60".parse::<Rate>().is_err());
        assert!("10/soon".parse::<Rate>().is_err());
        assert!("10/60ss".parse::<Rate>().is_err());
        assert!("10/60sss".parse::<Rate>().is_err());
    }
}
