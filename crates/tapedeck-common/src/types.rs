//! Container format enums shared by the recorder, the config and the playback server.
//!
//! All enums are serialized in lowercase to match the configuration file and
//! the `format` query parameter of the playback API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Container format a path is recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// Fragmented MP4 segments (ftyp + moov, then moof/mdat parts).
    #[default]
    Fmp4,
    /// MPEG transport stream segments.
    MpegTs,
}

impl RecordFormat {
    /// File extension appended to segment paths.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Fmp4 => "mp4",
            Self::MpegTs => "ts",
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fmp4 => write!(f, "fMP4"),
            Self::MpegTs => write!(f, "MPEG-TS"),
        }
    }
}

/// Container format produced for a playback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Fragmented MP4, samples repackaged without re-indexing.
    #[default]
    Fmp4,
    /// Progressive MP4 with a fully indexed moov.
    Mp4,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fmp4 => write!(f, "fmp4"),
            Self::Mp4 => write!(f, "mp4"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    /// An empty selector means the default fragmented output.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "fmp4" => Ok(Self::Fmp4),
            "mp4" => Ok(Self::Mp4),
            _ => Err(format!("invalid format: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_format_serialization() {
        let json = serde_json::to_string(&RecordFormat::Fmp4).unwrap();
        assert_eq!(json, r#""fmp4""#);

        let rf: RecordFormat = serde_json::from_str(r#""mpegts""#).unwrap();
        assert_eq!(rf, RecordFormat::MpegTs);
    }

    #[test]
    fn test_record_format_extension() {
        assert_eq!(RecordFormat::Fmp4.extension(), "mp4");
        assert_eq!(RecordFormat::MpegTs.extension(), "ts");
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("".parse::<OutputFormat>(), Ok(OutputFormat::Fmp4));
        assert_eq!("fmp4".parse::<OutputFormat>(), Ok(OutputFormat::Fmp4));
        assert_eq!("mp4".parse::<OutputFormat>(), Ok(OutputFormat::Mp4));
        assert!("mkv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Fmp4.to_string(), "fmp4");
        assert_eq!(OutputFormat::Mp4.to_string(), "mp4");
    }
}
