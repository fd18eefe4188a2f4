#![forbid(unsafe_code)]

//! Public entry point for the ytdlp-wrapper crate.
//!
//! The binaries are thin front-ends; everything that talks to yt-dlp, parses
//! its output, or touches the SQLite history lives in these modules so it can
//! be shared and tested without a terminal.

pub mod config;
pub mod download;
pub mod error;
pub mod extractor;
pub mod output;
pub mod process;
pub mod store;
pub mod sync;
pub mod urls;
