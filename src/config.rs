/*
 * Copyright 2025 KeyGrid Project
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
//! Session configuration.
//!
//! All options are validated when the config is built and are immutable
//! afterwards; a [`Session`](crate::Session) constructed from a config never
//! revisits them.

use std::{fmt, fs::File, path::PathBuf, time::Duration};

use crate::{Error, Result};

pub const DEFAULT_ADDRESS: &str = "localhost:1408";
pub const DEFAULT_REQUEST_TIMEOUT_MILLIS: i64 = 60_000;
pub const DEFAULT_FORMAT: &str = "json";

/// TLS options for the transport channel.
///
/// When enabled, all three paths must point at readable files; the contents
/// are consumed by the transport, not parsed here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub enabled: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
}

impl TlsOptions {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for (label, path) in [
            ("caCertPath", &self.ca_cert_path),
            ("clientCertPath", &self.client_cert_path),
            ("clientKeyPath", &self.client_key_path),
        ] {
            let path = path
                .as_ref()
                .ok_or_else(|| Error::BadConfig(format!("TLS is enabled but {} is not set", label)))?;
            File::open(path).map_err(|e| {
                Error::BadConfig(format!("cannot read {} '{}': {}", label, path.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Immutable session options.
///
/// ```no_run
/// use keygrid::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .address("grid.example.com:1408")
///     .request_timeout_millis(30_000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    address: String,
    request_timeout: Option<Duration>,
    format: String,
    tls: TlsOptions,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// The `host:port` endpoint of the grid proxy.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The per-request deadline; `None` means unbounded.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// The default codec format for maps opened through
    /// [`Session::cache`](crate::Session::cache).
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::builder().build().expect("default config is valid")
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (format {})", self.address, self.format)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfigBuilder {
    address: String,
    request_timeout_millis: i64,
    format: String,
    tls: TlsOptions,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            request_timeout_millis: DEFAULT_REQUEST_TIMEOUT_MILLIS,
            format: DEFAULT_FORMAT.to_owned(),
            tls: TlsOptions::default(),
        }
    }
}

impl SessionConfigBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Per-request deadline in milliseconds. Zero or negative means
    /// unbounded.
    pub fn request_timeout_millis(mut self, millis: i64) -> Self {
        self.request_timeout_millis = millis;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Validates the options and freezes them.
    pub fn build(self) -> Result<SessionConfig> {
        validate_address(&self.address)?;
        self.tls.validate()?;
        let request_timeout = if self.request_timeout_millis <= 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_millis as u64))
        };
        Ok(SessionConfig {
            address: self.address,
            request_timeout,
            format: self.format,
            tls: self.tls,
        })
    }
}

/// The accepted shape is `host:port`: a non-empty, whitespace-free host
/// followed by one to five digits.
fn validate_address(address: &str) -> Result<()> {
    let bad = || Error::BadConfig(format!("invalid address '{}', expected host:port", address));
    let (host, port) = address.rsplit_once(':').ok_or_else(bad)?;
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(bad());
    }
    if port.is_empty() || port.len() > 5 || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    Ok(())
}
