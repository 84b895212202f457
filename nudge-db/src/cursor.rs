//! Opaque keyset pagination cursor.
//!
//! The wire format is `<RFC3339 created_at>|<uuid>`, pointing at the last row
//! of the previous page. Microsecond precision matches what `timestamptz`
//! stores, so an encoded cursor compares exactly against the column it came
//! from.

use chrono::{DateTime, SecondsFormat, Utc};
use miette::Diagnostic;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Diagnostic)]
#[error("malformed pagination cursor")]
pub struct CursorParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}",
            self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.id
        )
    }
}

impl FromStr for PageCursor {
    type Err = CursorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (timestamp, id) = s.split_once('|').ok_or(CursorParseError)?;

        let created_at = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| CursorParseError)?
            .with_timezone(&Utc);
        let id = Uuid::parse_str(id).map_err(|_| CursorParseError)?;

        Ok(Self { created_at, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips_through_the_wire_format() {
        let cursor = PageCursor {
            created_at: Utc.with_ymd_and_hms(2026, 1, 25, 12, 30, 45).unwrap()
                + chrono::Duration::microseconds(123_456),
            id: Uuid::new_v4(),
        };

        let decoded: PageCursor = cursor.to_string().parse().unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn encodes_the_documented_shape() {
        let cursor = PageCursor {
            created_at: Utc.with_ymd_and_hms(2026, 1, 25, 12, 30, 45).unwrap(),
            id: Uuid::nil(),
        };
        assert_eq!(
            cursor.to_string(),
            "2026-01-25T12:30:45.000000Z|00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<PageCursor>().is_err());
        assert!("no-separator".parse::<PageCursor>().is_err());
        assert!("2026-01-25T12:30:45Z|not-a-uuid".parse::<PageCursor>().is_err());
        assert!(
            format!("not-a-timestamp|{}", Uuid::nil())
                .parse::<PageCursor>()
                .is_err()
        );
    }
}
