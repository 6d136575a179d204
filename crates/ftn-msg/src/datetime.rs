//! The FTS-0001 packed-message datetime: `"DD Mon YY  HH:MM:SS"`.
//!
//! Nineteen characters with a double space before the time. Plenty of
//! mailers emit a single space instead, so the parser accepts both.

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::FtnMsgError;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Formats a datetime in the packed-message format. Always 19 characters.
pub fn format_ftn_datetime(at: OffsetDateTime) -> String {
    format!(
        "{:02} {} {:02}  {:02}:{:02}:{:02}",
        at.day(),
        MONTHS[at.month() as usize - 1],
        at.year().rem_euclid(100),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Parses a packed-message datetime, accepting one or two spaces between the
/// year and the time. Two-digit years below 80 land in 20xx, the rest in
/// 19xx (FidoNet predates the year 2000 by two decades).
pub fn parse_ftn_datetime(s: &str) -> crate::Result<OffsetDateTime> {
    let bad = || FtnMsgError::InvalidDateTime(s.to_string());

    let mut parts = s.split_whitespace();
    let day: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let month = parts
        .next()
        .and_then(|name| MONTHS.iter().position(|m| m.eq_ignore_ascii_case(name)))
        .ok_or_else(bad)?;
    let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let time = parts.next().ok_or_else(bad)?;
    if parts.next().is_some() {
        return Err(bad());
    }

    let year = match year {
        0..=79 => 2000 + year,
        80..=99 => 1900 + year,
        _ => year,
    };

    let mut clock = time.split(':');
    let hour: u8 = clock.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let minute: u8 = clock.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let second: u8 = clock.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    if clock.next().is_some() {
        return Err(bad());
    }

    let month = Month::try_from(month as u8 + 1).map_err(|_| bad())?;
    let date = Date::from_calendar_date(year, month, day).map_err(|_| bad())?;
    let time = Time::from_hms(hour, minute, second).map_err(|_| bad())?;
    Ok(PrimitiveDateTime::new(date, time).assume_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn formats_with_double_space() {
        let at = datetime!(2026-02-03 04:05:06 UTC);
        assert_eq!(format_ftn_datetime(at), "03 Feb 26  04:05:06");
    }

    #[test]
    fn round_trips_to_seconds() {
        let at = datetime!(1999-12-31 23:59:59 UTC);
        let formatted = format_ftn_datetime(at);
        assert_eq!(formatted.len(), 19);
        assert_eq!(parse_ftn_datetime(&formatted).unwrap(), at);
    }

    #[test]
    fn accepts_single_space_variant() {
        let at = parse_ftn_datetime("03 Feb 26 04:05:06").unwrap();
        assert_eq!(at, datetime!(2026-02-03 04:05:06 UTC));
    }

    #[test]
    fn century_window() {
        assert_eq!(
            parse_ftn_datetime("01 Jan 99  00:00:00").unwrap().year(),
            1999
        );
        assert_eq!(
            parse_ftn_datetime("01 Jan 05  00:00:00").unwrap().year(),
            2005
        );
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "32 Jan 26  00:00:00", "01 Foo 26  00:00:00", "01 Jan 26"] {
            assert!(parse_ftn_datetime(input).is_err(), "accepted {input:?}");
        }
    }
}
