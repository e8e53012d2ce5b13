use chrono::{DateTime, Local};
use std::time::SystemTime;

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Formats a timestamp in the classic ANSIC form, e.g. `Mon Jan  2 15:04:05 2006`.
#[inline]
pub fn format_ansic(stamp: SystemTime) -> String {
    let local: DateTime<Local> = stamp.into();
    local.format("%a %b %e %H:%M:%S %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ansic_shape() {
        let rendered = format_ansic(SystemTime::UNIX_EPOCH + Duration::from_secs(86400));
        // Weekday, month, day, time and year separated by whitespace.
        assert_eq!(rendered.split_whitespace().count(), 5);
        assert!(rendered.ends_with("1970"));
    }
}
