//! Validation of every external input: create requests arriving over the
//! topic or the HTTP create path, and the raw query parameters of the read
//! path. Create requests are rejected when invalid; query parameters never
//! are, they fall back to defaults instead.

use crate::errors::{LoggerError, LoggerResult};
use crate::log_record::{
    DateRange, LogCreateRequest, LogFilter, LogLevel, NewLogRecord, Pagination, DEFAULT_LIMIT,
    DEFAULT_PAGE,
};

/// Validate a create request: level must be one of the known levels (any
/// case), source and message must be non-empty after trimming.
pub fn validate_create_request(req: &LogCreateRequest) -> LoggerResult<NewLogRecord> {
    let level: LogLevel = req.level.parse()?;

    if req.source.trim().is_empty() {
        return Err(LoggerError::validation("source", "source is required"));
    }

    if req.message.trim().is_empty() {
        return Err(LoggerError::validation("message", "message is required"));
    }

    Ok(NewLogRecord {
        level,
        source: req.source.clone(),
        message: req.message.clone(),
    })
}

/// Parse a non-negative integer parameter, `None` when absent or malformed.
pub fn parse_non_negative(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
}

/// Split a comma-separated level list. Tokens are kept exactly as sent, so
/// the cache key sees the caller's spelling; an empty parameter means no filter.
pub fn parse_level_filter(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(s) if !s.is_empty() => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Parse `from,to`. Any arity other than exactly two disables the filter.
/// Bounds are kept verbatim.
pub fn parse_date_filter(raw: Option<&str>) -> Option<DateRange> {
    match raw?.split(',').collect::<Vec<_>>().as_slice() {
        [from, to] => Some(DateRange {
            from: from.to_string(),
            to: to.to_string(),
        }),
        _ => None,
    }
}

/// Build the read-side query from raw parameters, degrading silently to
/// defaults. `page` wins over its legacy alias `offset`.
pub fn parse_log_query(
    limit: Option<&str>,
    page: Option<&str>,
    offset: Option<&str>,
    level_filter: Option<&str>,
    date_filter: Option<&str>,
) -> (LogFilter, Pagination) {
    let limit = parse_non_negative(limit).unwrap_or(DEFAULT_LIMIT);
    let page = parse_non_negative(page)
        .or_else(|| parse_non_negative(offset))
        .unwrap_or(DEFAULT_PAGE);

    let filter = LogFilter {
        level_filter: parse_level_filter(level_filter),
        date_filter: parse_date_filter(date_filter),
    };

    (filter, Pagination::new(limit, page))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(level: &str, source: &str, message: &str) -> LogCreateRequest {
        LogCreateRequest {
            level: level.into(),
            source: source.into(),
            message: message.into(),
        }
    }

    #[test]
    fn valid_request_is_normalised_to_enum_level() {
        let record = validate_create_request(&request("warn", "auth", "token expired")).unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.source, "auth");
        assert_eq!(record.message, "token expired");
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let err = validate_create_request(&request("trace", "auth", "x")).unwrap_err();
        assert!(err.to_string().contains("invalid log level"));

        let err = validate_create_request(&request("INFO", "   ", "x")).unwrap_err();
        assert!(err.to_string().contains("source is required"));

        let err = validate_create_request(&request("INFO", "auth", "\n\t")).unwrap_err();
        assert!(err.to_string().contains("message is required"));
    }

    #[test]
    fn malformed_numbers_fall_back_to_defaults() {
        let (_, pagination) = parse_log_query(Some("-5"), Some("abc"), None, None, None);
        assert_eq!(pagination, Pagination::new(DEFAULT_LIMIT, DEFAULT_PAGE));

        let (_, pagination) = parse_log_query(Some("25"), None, Some("3"), None, None);
        assert_eq!(pagination, Pagination::new(25, 3));

        let (_, pagination) = parse_log_query(None, Some("1"), Some("9"), None, None);
        assert_eq!(pagination.page, 1);
    }

    #[test]
    fn level_filter_keeps_tokens_as_sent() {
        assert_eq!(
            parse_level_filter(Some("error,Info, warn")),
            vec!["error".to_string(), "Info".to_string(), " warn".to_string()]
        );
        assert!(parse_level_filter(None).is_empty());
        assert!(parse_level_filter(Some("")).is_empty());
        assert_eq!(parse_level_filter(Some(",")), vec![String::new(), String::new()]);
    }

    #[test]
    fn date_filter_requires_exactly_two_bounds() {
        let range = parse_date_filter(Some("2024-01-01 00:00:00,2024-01-31 23:59:59")).unwrap();
        assert_eq!(range.from, "2024-01-01 00:00:00");
        assert_eq!(range.to, "2024-01-31 23:59:59");

        let padded = parse_date_filter(Some("2024-01-01, 2024-02-01")).unwrap();
        assert_eq!(padded.to, " 2024-02-01");

        assert!(parse_date_filter(Some("2024-01-01")).is_none());
        assert!(parse_date_filter(Some("a,b,c")).is_none());
        assert!(parse_date_filter(None).is_none());
    }
}
