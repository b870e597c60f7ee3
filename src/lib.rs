pub mod config;
pub mod db;
pub mod dedup;
pub mod fingerprint;
pub mod probe;
pub mod remote;
pub mod scanner;
pub mod sync;

/// Audio file extensions the library may contain
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "opus", "m4a", "aac", "wav",
    "aif", "aiff", "wv", "ape", "wma",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "mpsync";
