use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use herd_runtime::{Identity, ProxyDescriptor, SessionConfig};
use serde::Deserialize;

fn default_store_path() -> PathBuf {
	PathBuf::from("browser_ids.json")
}

/// One identity entry as written in the config file. A missing `proxy`
/// means direct egress.
#[derive(Debug, Deserialize)]
pub struct IdentityEntry {
	pub user_id: String,
	#[serde(default)]
	pub proxy: Option<String>,
}

/// Fleet configuration, loaded from a JSON file.
#[derive(Debug, Deserialize)]
pub struct Config {
	/// "what is my IP" endpoint probed before every connection.
	pub ip_check_url: String,
	/// Gateway host for the long-lived connections.
	pub wss_host: String,
	/// Where per-path device identities are persisted.
	#[serde(default = "default_store_path")]
	pub store_path: PathBuf,
	pub identities: Vec<IdentityEntry>,
}

impl Config {
	pub fn load(path: &Path) -> Result<Self> {
		let raw =
			fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
		let config: Config =
			serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
		if config.identities.is_empty() {
			bail!("config lists no identities");
		}
		Ok(config)
	}

	pub fn session(&self) -> SessionConfig {
		SessionConfig {
			ip_check_url: self.ip_check_url.clone(),
			wss_host: self.wss_host.clone(),
		}
	}

	/// Resolves every entry up front. A bad proxy rejects the whole
	/// config so a typo never silently downgrades an identity to direct
	/// egress.
	pub fn identities(&self) -> Result<Vec<Identity>> {
		self.identities
			.iter()
			.map(|entry| {
				let proxy = entry
					.proxy
					.as_deref()
					.map(ProxyDescriptor::parse)
					.transpose()
					.with_context(|| format!("identity {}: invalid proxy", entry.user_id))?;
				Ok(Identity {
					user_id: entry.user_id.clone(),
					proxy,
				})
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn write_config(json: &str) -> tempfile::NamedTempFile {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(json.as_bytes()).unwrap();
		file
	}

	#[test]
	fn loads_and_resolves_identities() {
		let file = write_config(
			r#"{
				"ip_check_url": "https://ip.example/json",
				"wss_host": "gateway.example",
				"identities": [
					{"user_id": "u1"},
					{"user_id": "u2", "proxy": "socks5://user:pw@10.0.0.1:1080"}
				]
			}"#,
		);

		let config = Config::load(file.path()).unwrap();
		assert_eq!(config.store_path, PathBuf::from("browser_ids.json"));

		let identities = config.identities().unwrap();
		assert_eq!(identities.len(), 2);
		assert!(identities[0].proxy.is_none());
		assert!(identities[1].proxy.is_some());
	}

	#[test]
	fn empty_identity_list_is_rejected() {
		let file = write_config(
			r#"{"ip_check_url": "https://ip.example/json", "wss_host": "g", "identities": []}"#,
		);
		assert!(Config::load(file.path()).is_err());
	}

	#[test]
	fn invalid_proxy_rejects_the_config() {
		let file = write_config(
			r#"{
				"ip_check_url": "https://ip.example/json",
				"wss_host": "gateway.example",
				"identities": [{"user_id": "u1", "proxy": "ftp://nope:21"}]
			}"#,
		);
		let config = Config::load(file.path()).unwrap();
		let err = config.identities().unwrap_err();
		assert!(err.to_string().contains("u1"));
	}
}
