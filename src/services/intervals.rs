use chrono::{Duration, NaiveTime};

use crate::models::TimeRange;

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        if let Some(last) = merged.last_mut() {
            if range.start <= last.end {
                if range.end > last.end {
                    last.end = range.end.clone();
                }
                continue;
            }
        }
        merged.push(range.clone());
    }
    merged
}

/// Free sub-ranges of `full_day` that intersect no `occupied` range.
///
/// Occupied ranges are sorted and merged once (O(n log n)), then each full-day segment is swept
/// against the merged list with a cursor that only moves forward. Times are compared as
/// zero-padded `HH:MM:SS` strings, which is only sound for same-day ranges; callers split
/// anything crossing midnight.
pub fn subtract_occupied_from_full_day(
    full_day: &[TimeRange],
    occupied: &[TimeRange],
) -> Vec<TimeRange> {
    let mut busy: Vec<TimeRange> = occupied.iter().filter(|r| !r.is_empty()).cloned().collect();
    busy.sort_by(|a, b| a.start.cmp(&b.start));
    let busy = merge_overlapping(&busy);

    let mut free = Vec::new();
    let mut cursor = 0;

    for segment in full_day.iter().filter(|r| !r.is_empty()) {
        let mut current_start = segment.start.as_str();
        let segment_end = segment.end.as_str();

        while cursor < busy.len() && busy[cursor].end.as_str() <= current_start {
            cursor += 1;
        }

        let mut j = cursor;
        while j < busy.len() && busy[j].start.as_str() < segment_end {
            let b = &busy[j];
            if b.start.as_str() > current_start {
                free.push(TimeRange::new(current_start, b.start.as_str()));
            }
            if b.end.as_str() > current_start {
                current_start = b.end.as_str();
            }
            j += 1;
        }

        if current_start < segment_end {
            free.push(TimeRange::new(current_start, segment_end));
        }
    }

    free
}

/// Chop free ranges into consecutive slots of `duration_minutes`. A tail shorter than the
/// duration is dropped.
pub fn split_into_slots(free: &[TimeRange], duration_minutes: i64) -> anyhow::Result<Vec<TimeRange>> {
    anyhow::ensure!(duration_minutes > 0, "slot duration must be positive");
    let step = Duration::minutes(duration_minutes);

    let mut slots = Vec::new();
    for range in free {
        let start = NaiveTime::parse_from_str(&range.start, "%H:%M:%S")?;
        let end = NaiveTime::parse_from_str(&range.end, "%H:%M:%S")?;

        let mut cursor = start;
        loop {
            let (next, wrapped) = cursor.overflowing_add_signed(step);
            if wrapped != 0 || next > end {
                break;
            }
            slots.push(TimeRange::new(
                cursor.format("%H:%M:%S").to_string(),
                next.format("%H:%M:%S").to_string(),
            ));
            cursor = next;
        }
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: &str, end: &str) -> TimeRange {
        TimeRange::new(start, end)
    }

    #[test]
    fn test_lunch_break_splits_day() {
        let free = subtract_occupied_from_full_day(
            &[r("09:00:00", "17:00:00")],
            &[r("12:00:00", "13:00:00")],
        );
        assert_eq!(
            free,
            vec![r("09:00:00", "12:00:00"), r("13:00:00", "17:00:00")]
        );
    }

    #[test]
    fn test_fully_covered_day_is_empty() {
        let free = subtract_occupied_from_full_day(
            &[r("09:00:00", "17:00:00")],
            &[r("08:00:00", "18:00:00")],
        );
        assert!(free.is_empty());
    }

    #[test]
    fn test_no_occupied_returns_full_day() {
        let free = subtract_occupied_from_full_day(&[r("09:00:00", "17:00:00")], &[]);
        assert_eq!(free, vec![r("09:00:00", "17:00:00")]);
    }

    #[test]
    fn test_unsorted_overlapping_occupied_are_merged() {
        let free = subtract_occupied_from_full_day(
            &[r("09:00:00", "17:00:00")],
            &[
                r("14:00:00", "15:00:00"),
                r("10:00:00", "11:00:00"),
                r("10:30:00", "12:00:00"),
                r("15:00:00", "15:30:00"),
            ],
        );
        assert_eq!(
            free,
            vec![
                r("09:00:00", "10:00:00"),
                r("12:00:00", "14:00:00"),
                r("15:30:00", "17:00:00"),
            ]
        );
    }

    #[test]
    fn test_empty_intervals_are_ignored() {
        let free = subtract_occupied_from_full_day(
            &[r("09:00:00", "09:00:00"), r("10:00:00", "12:00:00")],
            &[r("11:00:00", "11:00:00")],
        );
        assert_eq!(free, vec![r("10:00:00", "12:00:00")]);
    }

    #[test]
    fn test_occupied_outside_segment_skipped() {
        let free = subtract_occupied_from_full_day(
            &[r("09:00:00", "12:00:00")],
            &[r("06:00:00", "07:00:00"), r("13:00:00", "14:00:00")],
        );
        assert_eq!(free, vec![r("09:00:00", "12:00:00")]);
    }

    #[test]
    fn test_multiple_segments_share_occupied_list() {
        let free = subtract_occupied_from_full_day(
            &[r("09:00:00", "12:00:00"), r("13:00:00", "18:00:00")],
            &[r("11:00:00", "14:00:00"), r("16:00:00", "16:30:00")],
        );
        assert_eq!(
            free,
            vec![
                r("09:00:00", "11:00:00"),
                r("14:00:00", "16:00:00"),
                r("16:30:00", "18:00:00"),
            ]
        );
    }

    #[test]
    fn test_occupied_touching_edges() {
        let free = subtract_occupied_from_full_day(
            &[r("09:00:00", "17:00:00")],
            &[r("09:00:00", "10:00:00"), r("16:00:00", "17:00:00")],
        );
        assert_eq!(free, vec![r("10:00:00", "16:00:00")]);
    }

    #[test]
    fn test_merge_adjacent() {
        let merged = merge_overlapping(&[r("09:00:00", "10:00:00"), r("10:00:00", "11:00:00")]);
        assert_eq!(merged, vec![r("09:00:00", "11:00:00")]);
    }

    #[test]
    fn test_split_into_slots_drops_short_tail() {
        let slots = split_into_slots(&[r("09:00:00", "10:45:00")], 30).unwrap();
        assert_eq!(
            slots,
            vec![
                r("09:00:00", "09:30:00"),
                r("09:30:00", "10:00:00"),
                r("10:00:00", "10:30:00"),
            ]
        );
    }

    #[test]
    fn test_split_stops_at_midnight() {
        let slots = split_into_slots(&[r("23:00:00", "23:59:59")], 30).unwrap();
        assert_eq!(
            slots,
            vec![r("23:00:00", "23:30:00")]
        );
    }

    #[test]
    fn test_split_rejects_zero_duration() {
        assert!(split_into_slots(&[r("09:00:00", "10:00:00")], 0).is_err());
    }
}
