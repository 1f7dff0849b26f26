//! Parsing of the process-wide options handed over with the loaded image.
//!
//! Three options are understood: `quiet` suppresses the discovery trace,
//! `rawbcd` disables the BCD rewrite, and `index=N` selects the WIM image
//! extraction works against. The raw-BCD flag is published to [`RAW_BCD`]
//! so that patch transforms, which outlive the options, can observe it on
//! every read.

use alloc::string::String;
use core::{
    error, fmt,
    sync::atomic::{AtomicBool, Ordering},
};

/// Process-wide raw-BCD flag consumed by the rewrite transform.
pub static RAW_BCD: AtomicBool = AtomicBool::new(false);

/// The options controlling a boot attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Options {
    /// Suppress the discovery trace.
    pub quiet: bool,
    /// Leave boot configuration databases unpatched.
    pub raw_bcd: bool,
    /// The WIM image index to extract from; 0 selects the archive's
    /// designated boot image.
    pub index: u32,
}

impl Options {
    /// Publishes the flags that are consumed through process-wide state.
    pub fn publish(&self) {
        RAW_BCD.store(self.raw_bcd, Ordering::Relaxed);
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            quiet: false,
            raw_bcd: false,
            index: 0,
        }
    }
}

/// Parses the loaded image's option string.
///
/// # Errors
///
/// Fails on an unrecognized option or a malformed `index=` value; the boot
/// attempt should not continue with options it does not understand.
pub fn parse(cmdline: &str) -> Result<Options, ParseCmdlineError> {
    let mut options = Options::default();

    for token in cmdline.split_whitespace() {
        if token == "quiet" {
            options.quiet = true;
        } else if token == "rawbcd" {
            options.raw_bcd = true;
        } else if let Some(value) = token.strip_prefix("index=") {
            options.index = value.parse().map_err(|_| ParseCmdlineError::InvalidIndex {
                value: value.into(),
            })?;
        } else {
            return Err(ParseCmdlineError::UnknownOption {
                option: token.into(),
            });
        }
    }

    Ok(options)
}

/// Various errors that can occur while parsing the option string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseCmdlineError {
    /// An option was not recognized.
    UnknownOption {
        /// The unrecognized token.
        option: String,
    },
    /// The `index=` value is not a number.
    InvalidIndex {
        /// The malformed value.
        value: String,
    },
}

impl fmt::Display for ParseCmdlineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOption { option } => write!(f, "unrecognized option {option:?}"),
            Self::InvalidIndex { value } => write!(f, "invalid image index {value:?}"),
        }
    }
}

impl error::Error for ParseCmdlineError {}
