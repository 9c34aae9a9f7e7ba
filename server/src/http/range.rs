use regex::Regex;

#[derive(Debug, thiserror::Error)]
#[error("range not satisfiable")]
pub struct RangeNotSatisfiable;

/// Inclusive byte interval `[from, until]` to serve, plus whether a `Range`
/// header was present at all (governs 200 vs 206).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub from: u64,
    pub until: u64,
    pub partial: bool,
}

/// Compiled once and held by the HTTP endpoint state rather than
/// recompiled per request.
pub fn range_regex() -> Regex {
    Regex::new(r"(\d*)-(\d*)").expect("static range regex is valid")
}

/// Parses a single `Range: bytes=...` header against a file of `size` bytes.
/// `None` header means the whole file. Multi-range and out-of-bounds
/// requests are rejected per RFC 7233 single-range support only.
pub fn parse_range(regex: &Regex, header: Option<&str>, size: u64) -> Result<ByteRange, RangeNotSatisfiable> {
    let Some(header) = header else {
        if size == 0 {
            return Ok(ByteRange { from: 0, until: 0, partial: false });
        }
        return Ok(ByteRange {
            from: 0,
            until: size - 1,
            partial: false,
        });
    };

    if size == 0 {
        return Err(RangeNotSatisfiable);
    }

    let spec = header.strip_prefix("bytes=").ok_or(RangeNotSatisfiable)?;

    let mut matches = regex.captures_iter(spec);
    let first = matches.next().ok_or(RangeNotSatisfiable)?;

    if matches.next().is_some() {
        return Err(RangeNotSatisfiable);
    }

    let start = first.get(1).map(|m| m.as_str()).unwrap_or("");
    let end = first.get(2).map(|m| m.as_str()).unwrap_or("");

    let (from, until) = match (parse_endpoint(start)?, parse_endpoint(end)?) {
        (Some(s), Some(e)) => (s, e),
        (Some(s), None) => (s, size - 1),
        (None, Some(suffix_len)) => {
            if suffix_len == 0 {
                return Err(RangeNotSatisfiable);
            }
            (size.saturating_sub(suffix_len), size - 1)
        }
        (None, None) => return Err(RangeNotSatisfiable),
    };

    if from > until || until >= size {
        return Err(RangeNotSatisfiable);
    }

    Ok(ByteRange {
        from,
        until,
        partial: true,
    })
}

fn parse_endpoint(raw: &str) -> Result<Option<u64>, RangeNotSatisfiable> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<u64>().map(Some).map_err(|_| RangeNotSatisfiable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(header: &str, size: u64) -> Result<ByteRange, RangeNotSatisfiable> {
        parse_range(&range_regex(), Some(header), size)
    }

    #[test]
    fn absent_header_returns_full_body() {
        let range = parse_range(&range_regex(), None, 1024).unwrap();
        assert_eq!(range, ByteRange { from: 0, until: 1023, partial: false });
    }

    #[test]
    fn single_byte_range() {
        let range = parse("bytes=0-0", 1024).unwrap();
        assert_eq!(range, ByteRange { from: 0, until: 0, partial: true });
    }

    #[test]
    fn suffix_range_last_byte() {
        let range = parse("bytes=-1", 1024).unwrap();
        assert_eq!(range, ByteRange { from: 1023, until: 1023, partial: true });
    }

    #[test]
    fn open_ended_range() {
        let range = parse("bytes=512-", 1024).unwrap();
        assert_eq!(range, ByteRange { from: 512, until: 1023, partial: true });
    }

    #[test]
    fn out_of_bounds_start_rejected() {
        assert!(parse("bytes=1024-", 1024).is_err());
    }

    #[test]
    fn multi_range_rejected() {
        assert!(parse("bytes=0-10,20-30", 1024).is_err());
    }

    #[test]
    fn empty_file_rejects_any_range() {
        assert!(parse("bytes=0-0", 0).is_err());
        let range = parse_range(&range_regex(), None, 0).unwrap();
        assert_eq!(range, ByteRange { from: 0, until: 0, partial: false });
    }

    #[test]
    fn bad_unit_rejected() {
        assert!(parse("items=0-1", 1024).is_err());
    }
}
