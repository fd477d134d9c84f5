//! Authentication token sources.
//!
//! Right after a link opens the manager asks its [`TokenSource`] for a
//! token. `Some(token)` is sent as an `auth` frame; `None` skips auth.
//!
//! | Source | Behavior |
//! |--------|----------|
//! | [`NoToken`] | Never authenticates |
//! | [`StaticToken`] | Fixed token |
//! | [`FileToken`] | Reads the token file on every connect |
//! | `Fn() -> Option<String>` | Any closure |
//!
//! Sources are called on the manager's event loop and must return quickly.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

// ============================================================================
// TokenSource
// ============================================================================

/// Supplies the credential sent after connecting.
pub trait TokenSource: Send + Sync {
    /// Returns the current token, or `None` to skip authentication.
    fn token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

// ============================================================================
// NoToken
// ============================================================================

/// Source that never provides a token.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenSource for NoToken {
    fn token(&self) -> Option<String> {
        None
    }
}

// ============================================================================
// StaticToken
// ============================================================================

/// Fixed token.
#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Creates a source returning `token`. A blank token counts as none.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self((!token.trim().is_empty()).then_some(token))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StaticToken")
            .field(&self.0.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

// ============================================================================
// FileToken
// ============================================================================

/// Token stored in a file, re-read on each connect.
///
/// Surrounding whitespace is trimmed. A missing or empty file means no
/// token, so a login that writes the file later takes effect on the next
/// reconnect.
#[derive(Debug, Clone)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    /// Creates a source backed by `path`.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenSource for FileToken {
    fn token(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Token file not found");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read token file");
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
