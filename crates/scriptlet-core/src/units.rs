//! Unit grammars: byte sizes (`"10GiB"`), CPU sets (`"0-3,8"`) and
//! durations (`"500ms"`, `"20s"`).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitsError {
    #[error("invalid value: {0:?}")]
    InvalidValue(String),

    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("value out of range: {0:?}")]
    Overflow(String),

    #[error("invalid cpuset value: {0:?}")]
    InvalidCpuset(String),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
}

/// Parse a byte-size string such as `"512MiB"`, `"10GB"` or `"4096"`.
///
/// Decimal suffixes (`kB`, `MB`, …) are powers of 1000, binary suffixes
/// (`KiB`, `MiB`, …) powers of 1024. Sizes must fit in an `i64`.
pub fn parse_byte_size(input: &str) -> Result<u64, UnitsError> {
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    if split == 0 {
        return Err(UnitsError::InvalidValue(input.to_string()));
    }

    let (digits, suffix) = input.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| UnitsError::InvalidInteger(input.to_string()))?;

    let multiplier: u64 = match suffix {
        "" | "B" | " bytes" => 1,
        "kB" => 1000,
        "MB" => 1000u64.pow(2),
        "GB" => 1000u64.pow(3),
        "TB" => 1000u64.pow(4),
        "PB" => 1000u64.pow(5),
        "EB" => 1000u64.pow(6),
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        "PiB" => 1 << 50,
        "EiB" => 1 << 60,
        _ => return Err(UnitsError::InvalidValue(input.to_string())),
    };

    value
        .checked_mul(multiplier)
        .filter(|&bytes| bytes <= i64::MAX as u64)
        .ok_or_else(|| UnitsError::Overflow(input.to_string()))
}

/// A set of CPU ids, held as sorted, disjoint, non-adjacent inclusive ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSet {
    ranges: Vec<(u64, u64)>,
}

impl CpuSet {
    fn from_ranges(mut ranges: Vec<(u64, u64)>) -> Self {
        ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
        for (low, high) in ranges {
            match merged.last_mut() {
                Some(last) if low <= last.1.saturating_add(1) => last.1 = last.1.max(high),
                _ => merged.push((low, high)),
            }
        }
        Self { ranges: merged }
    }

    /// Number of distinct ids. Saturates at `u64::MAX`.
    pub fn len(&self) -> u64 {
        self.ranges
            .iter()
            .fold(0u64, |n, &(low, high)| n.saturating_add((high - low).saturating_add(1)))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ranges.iter().any(|&(low, high)| (low..=high).contains(&id))
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(low, high)| low..=high)
    }
}

/// Parse a CPU set such as `"0,2,4-7"`.
pub fn parse_cpuset(input: &str) -> Result<CpuSet, UnitsError> {
    let invalid = || UnitsError::InvalidCpuset(input.to_string());
    let mut ranges = Vec::new();

    for chunk in input.split(',') {
        let range = match chunk.split_once('-') {
            Some((low, high)) => {
                let low: u64 = low.parse().map_err(|_| invalid())?;
                let high: u64 = high.parse().map_err(|_| invalid())?;
                if low > high {
                    return Err(invalid());
                }
                (low, high)
            }
            None => {
                let id: u64 = chunk.parse().map_err(|_| invalid())?;
                (id, id)
            }
        };
        ranges.push(range);
    }

    Ok(CpuSet::from_ranges(ranges))
}

/// Parse a duration string like `"5s"`, `"500ms"`, `"1m"` or `"2h"`.
/// A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, UnitsError> {
    let s = input.trim();
    let invalid = || UnitsError::InvalidDuration(input.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid())
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .parse::<u64>()
            .map(|h| Duration::from_secs(h * 3600))
            .map_err(|_| invalid())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_suffixes() {
        assert_eq!(parse_byte_size("4096").unwrap(), 4096);
        assert_eq!(parse_byte_size("10B").unwrap(), 10);
        assert_eq!(parse_byte_size("2kB").unwrap(), 2000);
        assert_eq!(parse_byte_size("1GB").unwrap(), 1_000_000_000);
        assert_eq!(parse_byte_size("512MiB").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_byte_size("1GiB").unwrap(), 1 << 30);
        assert_eq!(parse_byte_size("10GiB").unwrap(), 10 << 30);
    }

    #[test]
    fn byte_size_rejects_garbage() {
        assert!(matches!(parse_byte_size(""), Err(UnitsError::InvalidValue(_))));
        assert!(matches!(parse_byte_size("GiB"), Err(UnitsError::InvalidValue(_))));
        assert!(matches!(parse_byte_size("12XB"), Err(UnitsError::InvalidValue(_))));
        assert!(matches!(parse_byte_size("1.5GiB"), Err(UnitsError::InvalidValue(_))));
    }

    #[test]
    fn byte_size_overflow() {
        assert!(matches!(
            parse_byte_size("100000EiB"),
            Err(UnitsError::Overflow(_))
        ));
        // Fits in u64 but not in i64.
        assert!(matches!(parse_byte_size("10EiB"), Err(UnitsError::Overflow(_))));
        assert!(matches!(
            parse_byte_size("18446744073709551615"),
            Err(UnitsError::Overflow(_))
        ));
        assert_eq!(
            parse_byte_size("9223372036854775807").unwrap(),
            i64::MAX as u64
        );
    }

    #[test]
    fn cpuset_counts_distinct_ids() {
        assert_eq!(parse_cpuset("0,2,4,6").unwrap().len(), 4);
        assert_eq!(parse_cpuset("0-3").unwrap().len(), 4);
        assert_eq!(parse_cpuset("0-3,2,8").unwrap().len(), 5);
        assert_eq!(parse_cpuset("5").unwrap().iter().collect::<Vec<_>>(), vec![5]);
        assert_eq!(
            parse_cpuset("6-7,0-2,3").unwrap().iter().collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 6, 7]
        );
    }

    #[test]
    fn cpuset_wide_ranges_stay_compact() {
        let set = parse_cpuset("0-9223372036854775806,5,100-200").unwrap();
        assert_eq!(set.len(), i64::MAX as u64);
        assert!(set.contains(4_000_000_000));
        assert!(!set.contains(i64::MAX as u64));

        let full = parse_cpuset("0-18446744073709551615").unwrap();
        assert_eq!(full.len(), u64::MAX);
        assert!(!full.is_empty());
    }

    #[test]
    fn cpuset_rejects_bad_ranges() {
        assert!(parse_cpuset("").is_err());
        assert!(parse_cpuset("a-b").is_err());
        assert!(parse_cpuset("4-2").is_err());
        assert!(parse_cpuset("1,,2").is_err());
    }

    #[test]
    fn duration_grammar() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("20s").unwrap(), Duration::from_secs(20));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("soon").is_err());
    }
}
