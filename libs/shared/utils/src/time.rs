use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Timelike, Utc};

/// Clinic wall-clock offset; out-of-range values fall back to UTC.
pub fn clinic_offset(offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

pub fn local_hour(at: DateTime<Utc>, offset_minutes: i32) -> u32 {
    at.with_timezone(&clinic_offset(offset_minutes)).hour()
}

/// `[start, end)` of the clinic-local day containing `at`, expressed in UTC.
pub fn local_day_bounds(at: DateTime<Utc>, offset_minutes: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = clinic_offset(offset_minutes);
    let local_date = at.with_timezone(&offset).date_naive();
    let start = offset
        .from_local_datetime(&local_date.and_time(NaiveTime::MIN))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(at);

    (start, start + Duration::days(1))
}

/// Short human format used in SMS bodies, e.g. "Mon 03 Mar 2025 14:30".
pub fn format_clinic_time(at: DateTime<Utc>, offset_minutes: i32) -> String {
    at.with_timezone(&clinic_offset(offset_minutes))
        .format("%a %d %b %Y %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn local_hour_applies_offset() {
        assert_eq!(local_hour(at("2025-03-03T10:00:00Z"), 0), 10);
        assert_eq!(local_hour(at("2025-03-03T10:00:00Z"), 180), 13);
        assert_eq!(local_hour(at("2025-03-03T22:30:00Z"), 180), 1);
    }

    #[test]
    fn day_bounds_follow_local_midnight() {
        let (start, end) = local_day_bounds(at("2025-03-03T22:30:00Z"), 180);
        assert_eq!(start, at("2025-03-03T21:00:00Z"));
        assert_eq!(end, at("2025-03-04T21:00:00Z"));
    }

    #[test]
    fn formats_in_clinic_time() {
        assert_eq!(format_clinic_time(at("2025-03-03T11:30:00Z"), 180), "Mon 03 Mar 2025 14:30");
    }
}
