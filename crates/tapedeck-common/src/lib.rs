//! Tapedeck-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across tapedeck:
//!
//! - **Core Types**: Recording and output container formats
//! - **Path Templates**: Encoding and decoding segment file names from start instants
//! - **Time Helpers**: Duration parsing and timescale conversion
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use tapedeck_common::paths::PathTemplate;
//! use tapedeck_common::RecordFormat;
//!
//! let template = PathTemplate::new("/rec/%path/%Y-%m-%d_%H-%M-%S-%f");
//! let start = Utc.with_ymd_and_hms(2024, 8, 8, 17, 13, 29).unwrap();
//!
//! let path = template.encode("cam1", start, RecordFormat::Fmp4);
//! assert_eq!(path.to_str(), Some("/rec/cam1/2024-08-08_17-13-29-000000.mp4"));
//! assert_eq!(template.decode("cam1", &path), Some(start));
//! ```

pub mod error;
pub mod paths;
pub mod time;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
