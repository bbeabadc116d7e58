//! Server configuration.
//!
//! Read from an optional TOML file; every field has a default so an empty
//! file is valid.
//!
//! ```toml
//! socket = "/run/keyhost/keyhost.sock"
//! max_frame_len = 16777216
//! log_dir = "/var/log/keyhost"
//! ```

use std::path::{Path, PathBuf};

use keyhost_proto::{DEFAULT_MAX_FRAME_LEN, ImportProtocol};
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the socket when the configuration does not.
pub const SOCKET_ENV: &str = "KEYHOST_SOCKET";

const SOCKET_FILE: &str = "keyhost.sock";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or field types.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A field holds an unusable value.
	#[error("invalid {field}: {message}")]
	Invalid {
		/// Offending field.
		field: &'static str,
		/// What is wrong with it.
		message: String,
	},
}

/// Settings for the import server process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
	/// Unix socket to listen on; see [`ServerConfig::socket_path`] when unset.
	pub socket: Option<PathBuf>,
	/// Largest accepted frame in bytes.
	pub max_frame_len: usize,
	/// Directory for log files; logs go to stderr when unset.
	pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			socket: None,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
			log_dir: None,
		}
	}
}

impl ServerConfig {
	/// Parses and validates configuration from TOML text.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields and
	/// [`ConfigError::Invalid`] for out-of-range values.
	pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads configuration from `path`.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
	/// [`ServerConfig::from_toml`].
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml(&text)
	}

	/// Checks value ranges.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::Invalid`] when the frame limit is zero or does not fit the `u32` length prefix.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
			return Err(ConfigError::Invalid {
				field: "max_frame_len",
				message: format!("{} is outside 1..={}", self.max_frame_len, u32::MAX),
			});
		}
		Ok(())
	}

	/// Socket path to bind.
	///
	/// The configured `socket` wins, then [`SOCKET_ENV`], then `keyhost.sock`
	/// in the user runtime directory or, lacking one, the temp directory.
	#[must_use]
	pub fn socket_path(&self) -> PathBuf {
		self.socket
			.clone()
			.or_else(|| std::env::var_os(SOCKET_ENV).map(PathBuf::from))
			.unwrap_or_else(|| {
				dirs::runtime_dir()
					.filter(|dir| dir.is_dir())
					.unwrap_or_else(std::env::temp_dir)
					.join(SOCKET_FILE)
			})
	}

	/// Protocol binding honoring the frame limit.
	#[must_use]
	pub fn protocol(&self) -> ImportProtocol {
		ImportProtocol::with_max_frame_len(self.max_frame_len)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_file_uses_defaults() {
		assert_eq!(ServerConfig::from_toml("").expect("empty config"), ServerConfig::default());
	}

	#[test]
	fn fields_are_read() {
		let config = ServerConfig::from_toml(
			r#"
			socket = "/tmp/k.sock"
			max_frame_len = 4096
			log_dir = "/tmp/logs"
			"#,
		)
		.expect("valid config");

		assert_eq!(config.socket_path(), PathBuf::from("/tmp/k.sock"));
		assert_eq!(config.protocol().max_frame_len(), 4096);
		assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/logs")));
	}

	#[test]
	fn unset_socket_falls_back_to_a_directory() {
		if std::env::var_os(SOCKET_ENV).is_some() {
			return;
		}
		let path = ServerConfig::default().socket_path();
		assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(SOCKET_FILE));
		assert!(path.parent().is_some_and(Path::is_dir), "{}", path.display());
	}

	#[test]
	fn unknown_fields_are_rejected() {
		let err = ServerConfig::from_toml("sockett = \"/tmp/x\"").expect_err("typo must fail");
		assert!(matches!(err, ConfigError::Parse(_)));
	}

	#[test]
	fn zero_frame_limit_is_invalid() {
		let err = ServerConfig::from_toml("max_frame_len = 0").expect_err("zero must fail");
		assert!(matches!(
			err,
			ConfigError::Invalid {
				field: "max_frame_len",
				..
			}
		));
	}

	#[test]
	fn load_reads_file_and_reports_missing() -> std::io::Result<()> {
		let mut file = tempfile::NamedTempFile::new()?;
		writeln!(file, "max_frame_len = 1024")?;
		let config = ServerConfig::load(file.path()).expect("load");
		assert_eq!(config.max_frame_len, 1024);

		let missing = file.path().with_extension("missing");
		let err = ServerConfig::load(&missing).expect_err("missing file");
		assert!(matches!(err, ConfigError::Io { path, .. } if path == missing));
		Ok(())
	}
}
