//! Record path templates.
//!
//! Segment files are named after the wall-clock instant of their first sample,
//! so a recording directory can be ordered and searched without a separate
//! index. A template such as `./recordings/%path/%Y-%m-%d_%H-%M-%S-%f` is
//! expanded with the stream name and the segment start, and the container
//! extension is appended.
//!
//! Supported directives:
//!
//! | Directive | Meaning |
//! |---|---|
//! | `%path` | stream name |
//! | `%Y` | year, 4 digits |
//! | `%m` `%d` `%H` `%M` `%S` | month, day, hour, minute, second, 2 digits |
//! | `%f` | microseconds, 6 digits |
//! | `%s` | unix seconds |
//!
//! All instants are UTC. Sub-microsecond precision is truncated on encode.

use crate::RecordFormat;
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};

/// Default template used when a path does not configure one.
pub const DEFAULT_RECORD_PATH: &str = "./recordings/%path/%Y-%m-%d_%H-%M-%S-%f";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Stream,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Micros,
    Unix,
}

impl Token {
    fn is_time(&self) -> bool {
        !matches!(self, Token::Literal(_) | Token::Stream)
    }
}

/// A segment path template bound to the naming directives above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    format: String,
    tokens: Vec<Token>,
}

impl PathTemplate {
    /// Parse a template string.
    pub fn new(format: impl Into<String>) -> Self {
        let format = format.into();
        let tokens = tokenize(&format);
        Self { format, tokens }
    }

    /// The raw template string.
    pub fn as_str(&self) -> &str {
        &self.format
    }

    /// Whether a start instant can be recovered from names built with this template.
    ///
    /// # Examples
    ///
    /// ```
    /// use tapedeck_common::paths::PathTemplate;
    ///
    /// assert!(PathTemplate::new("/rec/%path/%Y-%m-%d_%H-%M-%S-%f").is_decodable());
    /// assert!(PathTemplate::new("/rec/%path/%s").is_decodable());
    /// assert!(!PathTemplate::new("/rec/%path/%Y-%m-%d").is_decodable());
    /// ```
    #[must_use]
    pub fn is_decodable(&self) -> bool {
        let has = |t: Token| self.tokens.contains(&t);
        has(Token::Unix)
            || (has(Token::Year)
                && has(Token::Month)
                && has(Token::Day)
                && has(Token::Hour)
                && has(Token::Minute)
                && has(Token::Second))
    }

    /// Build the path of the segment of `stream` starting at `start`.
    pub fn encode(&self, stream: &str, start: DateTime<Utc>, format: RecordFormat) -> PathBuf {
        let mut out = String::with_capacity(self.format.len() + stream.len() + 8);

        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Stream => out.push_str(stream),
                Token::Year => out.push_str(&start.format("%Y").to_string()),
                Token::Month => out.push_str(&start.format("%m").to_string()),
                Token::Day => out.push_str(&start.format("%d").to_string()),
                Token::Hour => out.push_str(&start.format("%H").to_string()),
                Token::Minute => out.push_str(&start.format("%M").to_string()),
                Token::Second => out.push_str(&start.format("%S").to_string()),
                Token::Micros => {
                    out.push_str(&format!("{:06}", start.timestamp_subsec_micros() % 1_000_000))
                }
                Token::Unix => out.push_str(&start.timestamp().to_string()),
            }
        }

        out.push('.');
        out.push_str(format.extension());
        PathBuf::from(out)
    }

    /// Recover the start instant from a segment path of `stream`.
    ///
    /// Returns `None` when the path was not produced by this template.
    pub fn decode(&self, stream: &str, path: &Path) -> Option<DateTime<Utc>> {
        let mut rest = path.to_str()?;
        let mut fields = Fields::default();

        for token in &self.tokens {
            match token {
                Token::Literal(s) => rest = rest.strip_prefix(s.as_str())?,
                Token::Stream => rest = rest.strip_prefix(stream)?,
                Token::Year => fields.year = Some(take_digits(&mut rest, 4)? as i32),
                Token::Month => fields.month = Some(take_digits(&mut rest, 2)? as u32),
                Token::Day => fields.day = Some(take_digits(&mut rest, 2)? as u32),
                Token::Hour => fields.hour = Some(take_digits(&mut rest, 2)? as u32),
                Token::Minute => fields.minute = Some(take_digits(&mut rest, 2)? as u32),
                Token::Second => fields.second = Some(take_digits(&mut rest, 2)? as u32),
                Token::Micros => fields.micros = Some(take_digits(&mut rest, 6)? as u32),
                Token::Unix => fields.unix = Some(take_variable_digits(&mut rest)?),
            }
        }

        // Only the container extension may follow the last directive.
        if !rest.is_empty() {
            let ext = rest.strip_prefix('.')?;
            if ext.is_empty() || ext.contains(['/', '.']) {
                return None;
            }
        }

        fields.into_instant()
    }

    /// Directory holding every segment of `stream`.
    ///
    /// This is the literal part of the template before the first time
    /// directive, cut back to the last path separator.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use tapedeck_common::paths::PathTemplate;
    ///
    /// let template = PathTemplate::new("/rec/%path/%Y-%m-%d_%H-%M-%S-%f");
    /// assert_eq!(template.stream_dir("cam1"), Path::new("/rec/cam1"));
    /// ```
    #[must_use]
    pub fn stream_dir(&self, stream: &str) -> PathBuf {
        let mut prefix = String::new();
        for token in self.tokens.iter().take_while(|t| !t.is_time()) {
            match token {
                Token::Literal(s) => prefix.push_str(s),
                Token::Stream => prefix.push_str(stream),
                _ => unreachable!(),
            }
        }

        match prefix.rfind('/') {
            Some(0) => PathBuf::from("/"),
            Some(idx) => PathBuf::from(&prefix[..idx]),
            None => PathBuf::from("."),
        }
    }
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_PATH)
    }
}

#[derive(Default)]
struct Fields {
    year: Option<i32>,
    month: Option<u32>,
    day: Option<u32>,
    hour: Option<u32>,
    minute: Option<u32>,
    second: Option<u32>,
    micros: Option<u32>,
    unix: Option<i64>,
}

impl Fields {
    fn into_instant(self) -> Option<DateTime<Utc>> {
        let micros = self.micros.unwrap_or(0);

        if let Some(secs) = self.unix {
            return DateTime::from_timestamp(secs, micros * 1000);
        }

        NaiveDate::from_ymd_opt(self.year?, self.month?, self.day?)?
            .and_hms_micro_opt(self.hour?, self.minute?, self.second?, micros)
            .map(|dt| dt.and_utc())
    }
}

fn tokenize(format: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut rest = format;

    while let Some(c) = rest.chars().next() {
        if c == '%' {
            let token = if rest.starts_with("%path") {
                Some((Token::Stream, 5))
            } else {
                match rest.as_bytes().get(1) {
                    Some(b'Y') => Some((Token::Year, 2)),
                    Some(b'm') => Some((Token::Month, 2)),
                    Some(b'd') => Some((Token::Day, 2)),
                    Some(b'H') => Some((Token::Hour, 2)),
                    Some(b'M') => Some((Token::Minute, 2)),
                    Some(b'S') => Some((Token::Second, 2)),
                    Some(b'f') => Some((Token::Micros, 2)),
                    Some(b's') => Some((Token::Unix, 2)),
                    _ => None,
                }
            };

            if let Some((token, len)) = token {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(token);
                rest = &rest[len..];
                continue;
            }
        }

        literal.push(c);
        rest = &rest[c.len_utf8()..];
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    tokens
}

fn take_digits(rest: &mut &str, width: usize) -> Option<i64> {
    let digits = rest.get(..width)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    *rest = &rest[width..];
    digits.parse().ok()
}

fn take_variable_digits(rest: &mut &str) -> Option<i64> {
    let len = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    let value = rest[..len].parse().ok()?;
    *rest = &rest[len..];
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn instant(micros: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 8, 17, 13, 29).unwrap()
            + TimeDelta::microseconds(micros as i64)
    }

    #[test]
    fn test_encode_default_template() {
        let template = PathTemplate::new("./recordings/%path/%Y-%m-%d_%H-%M-%S-%f");
        let path = template.encode("cam1", instant(437452), RecordFormat::Fmp4);
        assert_eq!(
            path,
            PathBuf::from("./recordings/cam1/2024-08-08_17-13-29-437452.mp4")
        );
    }

    #[test]
    fn test_round_trip() {
        let template = PathTemplate::default();
        let start = instant(527827);
        let path = template.encode("site/cam2", start, RecordFormat::Fmp4);
        assert_eq!(template.decode("site/cam2", &path), Some(start));
    }

    #[test]
    fn test_round_trip_unix_seconds() {
        let template = PathTemplate::new("/data/%path/%s-%f");
        let start = instant(42);
        let path = template.encode("cam", start, RecordFormat::MpegTs);
        assert_eq!(path, PathBuf::from(format!("/data/cam/{}-000042.ts", start.timestamp())));
        assert_eq!(template.decode("cam", &path), Some(start));
    }

    #[test]
    fn test_encode_truncates_nanoseconds() {
        let template = PathTemplate::default();
        let start = instant(1) + TimeDelta::nanoseconds(999);
        let path = template.encode("cam", start, RecordFormat::Fmp4);
        assert_eq!(template.decode("cam", &path), Some(instant(1)));
    }

    #[test]
    fn test_decode_rejects_other_stream() {
        let template = PathTemplate::default();
        let path = template.encode("cam1", instant(0), RecordFormat::Fmp4);
        assert_eq!(template.decode("cam2", &path), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let template = PathTemplate::default();
        assert_eq!(
            template.decode("cam1", Path::new("./recordings/cam1/notes.txt")),
            None
        );
        assert_eq!(
            template.decode("cam1", Path::new("./recordings/cam1/2024-13-08_17-13-29-000000.mp4")),
            None
        );
        assert_eq!(
            template.decode("cam1", Path::new("./recordings/cam1/2024-08-08_17-13-29-000000.mp4.tmp")),
            None
        );
    }

    #[test]
    fn test_names_sort_chronologically() {
        let template = PathTemplate::default();
        let mut starts = vec![
            instant(0) + TimeDelta::days(40),
            instant(0),
            instant(999_999),
            instant(0) + TimeDelta::hours(5),
            instant(0) + TimeDelta::seconds(9),
        ];
        let mut names: Vec<PathBuf> = starts
            .iter()
            .map(|s| template.encode("cam", *s, RecordFormat::Fmp4))
            .collect();

        names.sort();
        starts.sort();

        let decoded: Vec<DateTime<Utc>> = names
            .iter()
            .map(|p| template.decode("cam", p).unwrap())
            .collect();
        assert_eq!(decoded, starts);
    }

    #[test]
    fn test_stream_dir() {
        assert_eq!(
            PathTemplate::default().stream_dir("cam1"),
            PathBuf::from("./recordings/cam1")
        );
        assert_eq!(
            PathTemplate::new("%path-%s").stream_dir("cam1"),
            PathBuf::from(".")
        );
        assert_eq!(
            PathTemplate::new("/%Y/%path").stream_dir("cam1"),
            PathBuf::from("/")
        );
    }

    #[test]
    fn test_unknown_directive_is_literal() {
        let template = PathTemplate::new("/rec/%q/%path/%s");
        let start = instant(0);
        let path = template.encode("cam", start, RecordFormat::Fmp4);
        assert!(path.to_str().unwrap().starts_with("/rec/%q/cam/"));
        assert_eq!(template.decode("cam", &path), Some(start));
    }
}
