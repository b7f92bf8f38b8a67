//! Byte intervals derived from the HTTP `Range` header.

use axum::http::HeaderValue;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("malformed Range header `{0}`")]
    Malformed(String),
    #[error("range {from}-{until} not satisfiable for object of {size} bytes")]
    Unsatisfiable { from: u64, until: u64, size: u64 },
}

/// A syntactically valid `bytes=<from>-[<to>]` request, not yet checked against a size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub from: u64,
    pub until: Option<u64>,
}

impl RangeSpec {
    /// Parse a single `bytes=` range. Suffix ranges and multi-range sets are rejected.
    pub fn parse(header: &str) -> Result<Self, RangeError> {
        let malformed = || RangeError::Malformed(header.to_string());

        let spec = header.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
        let (from, until) = spec.split_once('-').ok_or_else(malformed)?;
        let from = from.trim().parse::<u64>().map_err(|_| malformed())?;
        let until = match until.trim() {
            "" => None,
            value => Some(value.parse::<u64>().map_err(|_| malformed())?),
        };

        Ok(Self { from, until })
    }

    /// Parse a raw header value. Bytes outside visible ASCII make it malformed.
    pub fn from_header(value: &HeaderValue) -> Result<Self, RangeError> {
        let raw = value.to_str().map_err(|_| {
            RangeError::Malformed(String::from_utf8_lossy(value.as_bytes()).into_owned())
        })?;
        Self::parse(raw)
    }

    /// Resolve against the object size; the open end means "to the last byte".
    pub fn to_interval(self, size: u64) -> Result<ByteInterval, RangeError> {
        let until = match self.until {
            Some(until) => until,
            None => size.checked_sub(1).ok_or(RangeError::Unsatisfiable {
                from: self.from,
                until: 0,
                size,
            })?,
        };
        ByteInterval::new(self.from, until, size)
    }
}

/// Inclusive byte interval, always `from <= until <= size - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteInterval {
    pub from: u64,
    pub until: u64,
}

impl ByteInterval {
    pub fn new(from: u64, until: u64, size: u64) -> Result<Self, RangeError> {
        if from > until || until >= size {
            return Err(RangeError::Unsatisfiable { from, until, size });
        }
        Ok(Self { from, until })
    }

    /// The whole object. `None` for empty objects, which have no valid interval.
    pub fn full(size: u64) -> Option<Self> {
        size.checked_sub(1).map(|until| Self { from: 0, until })
    }

    pub fn len(&self) -> u64 {
        self.until - self.from + 1
    }
}
