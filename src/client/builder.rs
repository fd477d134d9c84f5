//! Builder for the connection manager.
//!
//! Provides a fluent API for configuring and starting a
//! [`ConnectionManager`].
//!
//! # Example
//!
//! ```no_run
//! use telemetry_link::ConnectionManager;
//! use telemetry_link::auth::StaticToken;
//!
//! # async fn example() -> telemetry_link::Result<()> {
//! let manager = ConnectionManager::builder()
//!     .url("wss://gateway.example/ws")
//!     .token_source(StaticToken::new("secret"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use url::Url;

use crate::auth::{NoToken, TokenSource};
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::transport::{Transport, WebSocketTransport};

use super::manager::ConnectionManager;

// ============================================================================
// ConnectionManagerBuilder
// ============================================================================

/// Builder for configuring a [`ConnectionManager`].
///
/// Use [`ConnectionManager::builder()`] to create one.
#[derive(Default)]
pub struct ConnectionManagerBuilder {
    /// Base options; `url` overrides their URL.
    options: ClientOptions,
    /// Gateway URL override.
    url: Option<String>,
    /// Token source; none means no auth frame.
    tokens: Option<Arc<dyn TokenSource>>,
    /// Transport; defaults to [`WebSocketTransport`].
    transport: Option<Arc<dyn Transport>>,
    /// Runtime for the event loop and timers.
    runtime: Option<Handle>,
}

impl fmt::Debug for ConnectionManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManagerBuilder")
            .field("options", &self.options)
            .field("url", &self.url)
            .field("tokens", &self.tokens.is_some())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

// ============================================================================
// ConnectionManagerBuilder Implementation
// ============================================================================

impl ConnectionManagerBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gateway URL.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the token source queried on every connect.
    #[inline]
    #[must_use]
    pub fn token_source(mut self, tokens: impl TokenSource + 'static) -> Self {
        self.tokens = Some(Arc::new(tokens));
        self
    }

    /// Sets the transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the runtime used for the event loop and timers.
    ///
    /// Defaults to the runtime `build()` is called from.
    #[inline]
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validates the configuration and starts the manager.
    ///
    /// Connects right away when `auto_connect` is set.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if options are invalid or no runtime is available
    /// - [`Error::InvalidUrl`] if the URL does not parse or is not `ws`/`wss`
    pub fn build(self) -> Result<ConnectionManager> {
        let mut options = self.options;
        if let Some(url) = self.url {
            options.url = url;
        }
        options.validate()?;

        let url = Self::validate_url(&options.url)?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                Error::config(
                    "No Tokio runtime available. Call build() inside a runtime \
                     or pass one with .runtime()",
                )
            })?,
        };

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::new()));
        let tokens = self.tokens.unwrap_or_else(|| Arc::new(NoToken));

        Ok(ConnectionManager::start(url, options, transport, tokens, runtime))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionManagerBuilder {
    /// Parses the URL and checks its scheme.
    fn validate_url(raw: &str) -> Result<Url> {
        let url = Url::parse(raw.trim()).map_err(|e| Error::invalid_url(raw, e.to_string()))?;
        WebSocketTransport::check_url(&url)?;
        Ok(url)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::client::ConnectionState;
    use crate::transport::testing::FakeTransport;

    fn idle() -> ClientOptions {
        ClientOptions::default().with_auto_connect(false)
    }

    #[test]
    fn test_new_creates_default_builder() {
        let builder = ConnectionManagerBuilder::new();
        assert!(builder.url.is_none());
        assert!(builder.tokens.is_none());
        assert!(builder.transport.is_none());
        assert_eq!(builder.options, ClientOptions::default());
    }

    #[test]
    fn test_validate_url_accepts_ws() {
        let url = ConnectionManagerBuilder::validate_url("ws://localhost:8080/ws").expect("valid");
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn test_validate_url_rejects_http() {
        let err = ConnectionManagerBuilder::validate_url("https://example.com").expect_err("http");
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        let err = ConnectionManagerBuilder::validate_url("not a url").expect_err("garbage");
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let result = ConnectionManagerBuilder::new()
            .options(idle())
            .transport(FakeTransport::new())
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_rejects_invalid_options() {
        let result = ConnectionManagerBuilder::new()
            .options(idle().with_queue_capacity(0))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_url_overrides_options() {
        let manager = ConnectionManagerBuilder::new()
            .options(idle())
            .url("wss://override.example/ws")
            .transport(FakeTransport::new())
            .build()
            .expect("build");

        assert_eq!(manager.url().as_str(), "wss://override.example/ws");
        assert_eq!(manager.options().url, "wss://override.example/ws");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        let manager = ConnectionManagerBuilder::new()
            .options(idle())
            .transport(FakeTransport::new())
            .runtime(runtime.handle().clone())
            .build()
            .expect("build");

        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
