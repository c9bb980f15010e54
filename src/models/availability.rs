use serde::{Deserialize, Serialize};

/// Same-day time range as zero-padded `HH:MM:SS` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

impl TimeRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Normalize `HH:MM` or `HH:MM:SS` into zero-padded `HH:MM:SS`.
pub fn normalize_time(s: &str) -> anyhow::Result<String> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(anyhow::anyhow!("invalid time format: {s}"));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    let second: u32 = match parts.get(2) {
        Some(sec) => sec
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid second in: {s}"))?,
        None => 0,
    };
    if hour > 23 || minute > 59 || second > 59 {
        return Err(anyhow::anyhow!("time out of range: {s}"));
    }
    Ok(format!("{hour:02}:{minute:02}:{second:02}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_short_time() {
        assert_eq!(normalize_time("9:00").unwrap(), "09:00:00");
        assert_eq!(normalize_time("17:30").unwrap(), "17:30:00");
    }

    #[test]
    fn test_normalize_full_time() {
        assert_eq!(normalize_time("08:05:09").unwrap(), "08:05:09");
    }

    #[test]
    fn test_normalize_invalid_time() {
        assert!(normalize_time("25:00").is_err());
        assert!(normalize_time("12").is_err());
        assert!(normalize_time("aa:bb").is_err());
        assert!(normalize_time("10:00:61").is_err());
    }

    #[test]
    fn test_empty_range() {
        assert!(TimeRange::new("10:00:00", "10:00:00").is_empty());
        assert!(TimeRange::new("11:00:00", "10:00:00").is_empty());
        assert!(!TimeRange::new("10:00:00", "10:30:00").is_empty());
    }
}
