// ============================================================================
// ERROR.RS - Song Loading Errors
// ============================================================================
//
// Decoding is forgiving: out-of-range fields are clamped, never rejected.
// The few ways loading can still fail are listed here so library callers can
// tell them apart. Rendering has no error type; it cannot fail.
// ============================================================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SongError {
    #[error("song text is empty")]
    Empty,

    #[error("unsupported song format version {found} (supported {oldest}..={latest})")]
    UnsupportedVersion { found: u32, oldest: u32, latest: u32 },

    #[error("invalid song JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read song file: {0}")]
    Io(#[from] std::io::Error),
}
