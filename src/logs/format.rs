use crate::error::{Result, VigilError};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone};
use std::fmt;

/// strftime pattern used when no `log_date_format` is configured
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// Longest tokens first so `YYYY` wins over `YY` and `MM` over `M`.
const MOMENT_TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("YY", "%y"),
    ("MMMM", "%B"),
    ("MMM", "%b"),
    ("MM", "%m"),
    ("M", "%-m"),
    ("dddd", "%A"),
    ("ddd", "%a"),
    ("d", "%w"),
    ("DD", "%d"),
    ("D", "%-d"),
    ("HH", "%H"),
    ("H", "%-H"),
    ("hh", "%I"),
    ("h", "%-I"),
    ("mm", "%M"),
    ("m", "%-M"),
    ("ss", "%S"),
    ("s", "%-S"),
    ("SSS", "%3f"),
    ("ZZ", "%z"),
    ("Z", "%:z"),
    ("A", "%p"),
    ("a", "%P"),
];

// Fraction widths chrono cannot render.
const UNSUPPORTED_TOKENS: &[&str] = &["SS", "S"];

/// Per-line timestamp format for log sinks.
///
/// Accepts either a strftime pattern (anything containing `%`) or a moment-style
/// pattern such as `YYYY-MM-DD HH:mm:ss Z`, which is translated once at
/// construction. Text inside `[...]` in a moment pattern is copied literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    strftime: String,
}

impl TimestampFormat {
    pub fn parse(pattern: &str) -> Result<Self> {
        let strftime = if pattern.contains('%') {
            pattern.to_string()
        } else {
            translate_moment(pattern)?
        };

        if strftime.is_empty() {
            return Err(VigilError::ConfigValidationError(
                "log_date_format cannot be empty".to_string(),
            ));
        }

        if StrftimeItems::new(&strftime).any(|item| matches!(item, Item::Error)) {
            return Err(VigilError::ConfigValidationError(format!(
                "Invalid log_date_format: {}",
                pattern
            )));
        }

        Ok(Self { strftime })
    }

    /// The translated strftime pattern
    pub fn strftime(&self) -> &str {
        &self.strftime
    }

    pub fn render<Tz>(&self, at: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        at.format(&self.strftime).to_string()
    }
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self {
            strftime: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

fn translate_moment(pattern: &str) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;

    'outer: while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('[') {
            if let Some(end) = stripped.find(']') {
                out.push_str(&stripped[..end].replace('%', "%%"));
                rest = &stripped[end + 1..];
                continue;
            }
        }

        for (token, replacement) in MOMENT_TOKENS {
            if let Some(stripped) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = stripped;
                continue 'outer;
            }
        }

        if let Some(token) = UNSUPPORTED_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            return Err(VigilError::ConfigValidationError(format!(
                "Unsupported token {} in log_date_format: {}",
                token, pattern
            )));
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn fixed_time() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_moment_pattern_translation() {
        let format = TimestampFormat::parse("YYYY-MM-DD HH:mm:ss Z").unwrap();
        assert_eq!(format.strftime(), "%Y-%m-%d %H:%M:%S %:z");
        assert_eq!(format.render(&fixed_time()), "2024-03-09 14:05:07 +01:00");
    }

    #[test]
    fn test_single_letter_tokens() {
        let format = TimestampFormat::parse("D/M/YYYY H:m:s").unwrap();
        assert_eq!(format.strftime(), "%-d/%-m/%Y %-H:%-M:%-S");
        assert_eq!(format.render(&fixed_time()), "9/3/2024 14:5:7");

        let format = TimestampFormat::parse("h A").unwrap();
        assert_eq!(format.render(&fixed_time()), "2 PM");
    }

    #[test]
    fn test_unrenderable_fraction_rejected() {
        assert!(TimestampFormat::parse("HH:mm:ss.SS").is_err());
        assert!(TimestampFormat::parse("ss.S").is_err());
        assert!(TimestampFormat::parse("ss.SSS").is_ok());
    }

    #[test]
    fn test_strftime_passthrough() {
        let format = TimestampFormat::parse("%d/%m/%Y").unwrap();
        assert_eq!(format.render(&fixed_time()), "09/03/2024");
    }

    #[test]
    fn test_bracketed_literals() {
        let format = TimestampFormat::parse("[day] DD").unwrap();
        assert_eq!(format.render(&fixed_time()), "day 09");
    }

    #[test]
    fn test_invalid_strftime_rejected() {
        assert!(TimestampFormat::parse("%Q").is_err());
        assert!(TimestampFormat::parse("").is_err());
    }

    #[test]
    fn test_default_has_millis() {
        let rendered = TimestampFormat::default().render(&fixed_time());
        assert_eq!(rendered, "2024-03-09 14:05:07.000");
    }
}
