// Byte ranges for log and file retrieval
//
// Offsets follow the client API convention: `-1` means "unspecified", end
// offsets are exclusive. The HTTP `Range` header is inclusive on both ends.

use crate::error::{ClientError, Result};

/// Offset value meaning "not specified"
pub const UNSPECIFIED: i64 = -1;

/// A validated byte range, ready to become a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=first-last`, both inclusive
    Between { first: u64, last: u64 },
    /// `bytes=first-`
    From { first: u64 },
    /// `bytes=-length`
    Tail { length: u64 },
}

impl ByteRange {
    /// Validate raw offsets
    ///
    /// - `start >= 0`, `end` given: bytes `start..end` (end exclusive), requires `end > start`
    /// - `start >= 0`, no end: from `start` to the end of the file
    /// - `start == -1`, `tail_length` given: the last `tail_length` bytes, requires `> 0`
    pub fn from_offsets(start: i64, end: Option<i64>, tail_length: Option<i64>) -> Result<Option<Self>> {
        match (start, end, tail_length) {
            (UNSPECIFIED, None, None) => Ok(None),
            (UNSPECIFIED, None, Some(length)) => Self::tail(length).map(Some),
            (start, Some(end), None) if start >= 0 => Self::between(start, end).map(Some),
            (start, None, None) if start >= 0 => Self::from_start(start).map(Some),
            (_, Some(_), Some(_)) | (0.., None, Some(_)) => Err(ClientError::Validation(
                "a range takes either an end offset or a tail length, not both".to_string(),
            )),
            (start, _, _) => Err(ClientError::Validation(format!(
                "{} is not a valid value for start position, it should be 0 or greater",
                start
            ))),
        }
    }

    /// Bytes `start..end`, end exclusive
    pub fn between(start: i64, end: i64) -> Result<Self> {
        if start < 0 {
            return Err(ClientError::Validation(format!(
                "{} is not a valid value for start position, it should be 0 or greater",
                start
            )));
        }
        if end <= start {
            return Err(ClientError::Validation(format!(
                "{} is not a valid value for end position, it should be greater than start position which is {}",
                end, start
            )));
        }
        Ok(ByteRange::Between {
            first: start as u64,
            last: (end - 1) as u64,
        })
    }

    pub fn from_start(start: i64) -> Result<Self> {
        if start < 0 {
            return Err(ClientError::Validation(format!(
                "{} is not a valid value for start position, it should be 0 or greater",
                start
            )));
        }
        Ok(ByteRange::From {
            first: start as u64,
        })
    }

    /// The last `length` bytes
    pub fn tail(length: i64) -> Result<Self> {
        if length <= 0 {
            return Err(ClientError::Validation(format!(
                "{} is not a valid value for length, it should be 1 or greater",
                length
            )));
        }
        Ok(ByteRange::Tail {
            length: length as u64,
        })
    }

    /// Exclusive end offset, when the range has one
    pub fn end_exclusive(&self) -> Option<u64> {
        match self {
            ByteRange::Between { last, .. } => Some(last + 1),
            _ => None,
        }
    }

    pub fn header_value(&self) -> String {
        match self {
            ByteRange::Between { first, last } => format!("bytes={}-{}", first, last),
            ByteRange::From { first } => format!("bytes={}-", first),
            ByteRange::Tail { length } => format!("bytes=-{}", length),
        }
    }

    /// Parse a single-range `Range` header value
    pub fn parse_header(value: &str) -> Result<Self> {
        let invalid = || ClientError::Validation(format!("invalid range header: {}", value));

        let spec = value.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
        let (first, last) = spec.split_once('-').ok_or_else(invalid)?;

        match (first.is_empty(), last.is_empty()) {
            (true, false) => {
                let length: i64 = last.parse().map_err(|_| invalid())?;
                Self::tail(length)
            }
            (false, true) => {
                let first: i64 = first.parse().map_err(|_| invalid())?;
                Self::from_start(first)
            }
            (false, false) => {
                let first: i64 = first.parse().map_err(|_| invalid())?;
                let last: i64 = last.parse().map_err(|_| invalid())?;
                Self::between(first, last + 1)
            }
            (true, true) => Err(invalid()),
        }
    }
}

/// Which slice of an instance file to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQuery {
    pub app_name: String,
    pub instance: u32,
    pub path: String,
    pub start: i64,
    pub end: Option<i64>,
    pub tail_length: Option<i64>,
}

impl FileQuery {
    /// Whole file
    pub fn new(app_name: impl Into<String>, instance: u32, path: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            instance,
            path: path.into(),
            start: UNSPECIFIED,
            end: None,
            tail_length: None,
        }
    }

    /// From `start` to the end of the file
    pub fn starting_at(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    /// Bytes `start..end`, end exclusive
    pub fn between(mut self, start: i64, end: i64) -> Self {
        self.start = start;
        self.end = Some(end);
        self
    }

    /// The last `length` bytes
    pub fn tail(mut self, length: i64) -> Self {
        self.start = UNSPECIFIED;
        self.tail_length = Some(length);
        self
    }

    /// Validated range; `None` means the whole file
    pub fn range(&self) -> Result<Option<ByteRange>> {
        ByteRange::from_offsets(self.start, self.end, self.tail_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_between_converts_to_inclusive() {
        let range = ByteRange::between(5, 10).unwrap();
        assert_eq!(range, ByteRange::Between { first: 5, last: 9 });
        assert_eq!(range.header_value(), "bytes=5-9");
        assert_eq!(range.end_exclusive(), Some(10));
    }

    #[test]
    fn test_single_byte_range() {
        assert_eq!(ByteRange::between(5, 6).unwrap().header_value(), "bytes=5-5");
    }

    #[test]
    fn test_empty_and_inverted_ranges_rejected() {
        assert!(matches!(ByteRange::between(5, 5), Err(ClientError::Validation(_))));
        assert!(matches!(ByteRange::between(5, 3), Err(ClientError::Validation(_))));
        assert!(matches!(ByteRange::between(-2, 3), Err(ClientError::Validation(_))));
    }

    #[test]
    fn test_tail_length_must_be_positive() {
        assert!(matches!(ByteRange::tail(0), Err(ClientError::Validation(_))));
        assert!(matches!(ByteRange::tail(-1), Err(ClientError::Validation(_))));
        assert_eq!(ByteRange::tail(10).unwrap().header_value(), "bytes=-10");
    }

    #[test]
    fn test_from_start() {
        assert_eq!(ByteRange::from_start(0).unwrap().header_value(), "bytes=0-");
        assert!(ByteRange::from_start(-1).is_err());
    }

    #[test]
    fn test_from_offsets() {
        assert_eq!(ByteRange::from_offsets(UNSPECIFIED, None, None).unwrap(), None);
        assert_eq!(
            ByteRange::from_offsets(5, Some(10), None).unwrap(),
            Some(ByteRange::Between { first: 5, last: 9 })
        );
        assert_eq!(
            ByteRange::from_offsets(UNSPECIFIED, None, Some(10)).unwrap(),
            Some(ByteRange::Tail { length: 10 })
        );
        assert_eq!(
            ByteRange::from_offsets(7, None, None).unwrap(),
            Some(ByteRange::From { first: 7 })
        );
        assert!(ByteRange::from_offsets(5, Some(5), None).is_err());
        assert!(ByteRange::from_offsets(UNSPECIFIED, None, Some(0)).is_err());
        assert!(ByteRange::from_offsets(-5, None, None).is_err());
        assert!(ByteRange::from_offsets(UNSPECIFIED, Some(10), None).is_err());
        assert!(ByteRange::from_offsets(0, Some(10), Some(3)).is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            ByteRange::parse_header("bytes=5-9").unwrap(),
            ByteRange::Between { first: 5, last: 9 }
        );
        assert_eq!(ByteRange::parse_header("bytes=-10").unwrap(), ByteRange::Tail { length: 10 });
        assert_eq!(ByteRange::parse_header("bytes=3-").unwrap(), ByteRange::From { first: 3 });
        assert!(ByteRange::parse_header("bytes=-").is_err());
        assert!(ByteRange::parse_header("items=1-2").is_err());
        assert!(ByteRange::parse_header("bytes=9-5").is_err());
    }

    #[test]
    fn test_file_query_builders() {
        let query = FileQuery::new("web", 0, "logs/stdout.log").between(5, 10);
        assert_eq!(query.range().unwrap(), Some(ByteRange::Between { first: 5, last: 9 }));

        let query = FileQuery::new("web", 0, "logs/stdout.log").tail(10);
        assert_eq!(query.range().unwrap(), Some(ByteRange::Tail { length: 10 }));

        let query = FileQuery::new("web", 0, "logs/stdout.log");
        assert_eq!(query.range().unwrap(), None);

        let query = FileQuery::new("web", 0, "logs/stdout.log").tail(0);
        assert!(query.range().is_err());
    }

    proptest! {
        #[test]
        fn prop_exclusive_end_maps_to_inclusive_last(start in 0i64..1_000_000, len in 1i64..1_000_000) {
            let end = start + len;
            let range = ByteRange::between(start, end).unwrap();
            prop_assert_eq!(range.header_value(), format!("bytes={}-{}", start, end - 1));
            prop_assert_eq!(range.end_exclusive(), Some(end as u64));
            prop_assert_eq!(ByteRange::parse_header(&range.header_value()).unwrap(), range);
        }

        #[test]
        fn prop_non_positive_span_rejected(start in 0i64..1_000_000, back in 0i64..1_000) {
            prop_assert!(ByteRange::between(start, start - back).is_err());
        }
    }
}
