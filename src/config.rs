use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CLIENT_NAME: &str = "devp2p-rust";

/// Runtime settings of the harness. Passed explicitly to sessions and the suite.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// name announced in our Hello
    pub client_name: String,
    pub dial_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub status_timeout_secs: u64,
    /// bound for a whole request/response or announcement exchange
    pub message_timeout_secs: u64,
    /// bound for a single read while waiting for a disconnect
    pub read_timeout_secs: u64,
    pub block_poll_interval_millis: u64,
    /// number of fixture blocks the remote node is expected to have imported
    pub chain_length: usize,
    /// size of the oversized numbers and blocks sent by the adversarial scenarios
    pub large_payload_bytes: usize,
    /// pretty print messages in failure reports
    pub pretty: bool,
}

impl Settings {
    ///
    /// Load settings: compiled in defaults, then `path` if given (and present), then
    /// `DEVP2P_*` environment variables.
    ///
    pub fn load(path: Option<&str>) -> crate::Result<Settings> {
        let defaults = Settings::default();
        let mut settings = Config::default();
        settings
            .set_default("client_name", defaults.client_name.as_str())?
            .set_default("dial_timeout_secs", defaults.dial_timeout_secs as i64)?
            .set_default("handshake_timeout_secs", defaults.handshake_timeout_secs as i64)?
            .set_default("status_timeout_secs", defaults.status_timeout_secs as i64)?
            .set_default("message_timeout_secs", defaults.message_timeout_secs as i64)?
            .set_default("read_timeout_secs", defaults.read_timeout_secs as i64)?
            .set_default(
                "block_poll_interval_millis",
                defaults.block_poll_interval_millis as i64,
            )?
            .set_default("chain_length", defaults.chain_length as i64)?
            .set_default("large_payload_bytes", defaults.large_payload_bytes as i64)?
            .set_default("pretty", defaults.pretty)?;

        if let Some(path) = path {
            settings.merge(File::with_name(path).required(false))?;
        }
        settings.merge(Environment::with_prefix("DEVP2P"))?;

        Ok(settings.try_into()?)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_millis)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            dial_timeout_secs: 20,
            handshake_timeout_secs: 10,
            status_timeout_secs: 20,
            message_timeout_secs: 20,
            read_timeout_secs: 10,
            block_poll_interval_millis: 100,
            chain_length: 1000,
            large_payload_bytes: 2 * 1024 * 1024,
            pretty: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_defaults_test() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.client_name, DEFAULT_CLIENT_NAME);
        assert_eq!(settings.chain_length, 1000);
        assert_eq!(settings.read_timeout(), Duration::from_secs(10));
        assert_eq!(settings.block_poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn load_file_overrides_test() {
        let path = std::env::temp_dir().join(format!("devp2p-settings-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "chain_length = 42\nmessage_timeout_secs = 3\npretty = true").unwrap();
        drop(file);

        let settings = Settings::load(path.to_str()).unwrap();
        assert_eq!(settings.chain_length, 42);
        assert_eq!(settings.message_timeout(), Duration::from_secs(3));
        assert!(settings.pretty);
        assert_eq!(settings.dial_timeout_secs, 20);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_ignored_test() {
        let settings = Settings::load(Some("/nonexistent/devp2p")).unwrap();
        assert_eq!(settings.large_payload_bytes, 2 * 1024 * 1024);
    }
}
