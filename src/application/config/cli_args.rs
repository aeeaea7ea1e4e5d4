use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::data_directory::DataDirectory;
use crate::application::loops::vault_loop::CoordinatorConfig;
use crate::application::loops::vault_loop::Provisioning;
use crate::application::loops::vault_loop::UserpassAccount;
use crate::state::vault::encryption::KdfParams;
use crate::state::vault::encryption::Passphrase;

/// The `lyndrix-core` program bootstraps and supervises the portal's secret
/// store.
///
/// The auto-unseal passphrase is never taken from the command line. Set the
/// `LYNDRIX_MASTER_KEY` environment variable instead.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// The data directory that holds the encrypted credential envelope
    ///
    /// The default varies by operating system, e.g.
    ///
    /// Linux:   /home/alice/.local/share/lyndrix
    ///
    /// macOS:   /Users/Alice/Library/Application Support/org.lyndrix.lyndrix
    #[clap(long, value_name = "DIR", env = "LYNDRIX_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the Vault-compatible secret backend.
    #[clap(long, env = "VAULT_URL", default_value = "http://127.0.0.1:8200")]
    pub vault_url: String,

    /// Location of the encrypted credential envelope.
    ///
    /// Defaults to `<data-dir>/security/vault_keys.enc`.
    #[clap(long, value_name = "FILE")]
    pub envelope_file: Option<PathBuf>,

    /// Mount point of the KV version 2 secrets engine.
    #[clap(long, env = "VAULT_MOUNT", default_value = "secret")]
    pub kv_mount: String,

    /// Path segment every gateway secret is stored under.
    #[clap(long, default_value = "lyndrix")]
    pub secret_namespace: String,

    /// Seconds to wait between probes while the backend is unreachable, and
    /// between re-probes while waiting for a passphrase.
    #[clap(long = "probe-backoff-secs", default_value = "5", value_parser = duration_from_seconds_str)]
    pub probe_backoff: Duration,

    /// Seconds between watchdog liveness checks while connected.
    #[clap(long = "watchdog-interval-secs", default_value = "10", value_parser = duration_from_seconds_str)]
    pub watchdog_interval: Duration,

    /// Timeout in seconds for a single request to the backend.
    #[clap(long = "vault-request-timeout-secs", default_value = "10", value_parser = duration_from_seconds_str)]
    pub vault_request_timeout: Duration,

    /// Userpass login to provision for the portal after the store opens.
    ///
    /// Requires --vault-password as well.
    #[clap(long, env = "VAULT_USER", requires = "vault_password")]
    pub vault_user: Option<String>,

    /// Password for the provisioned userpass login.
    #[clap(long, env = "VAULT_PASSWORD", hide_env_values = true)]
    pub vault_password: Option<Passphrase>,

    /// Port on which the control REST API listens.
    #[clap(long, default_value = "9800", value_name = "PORT")]
    pub rest_port: u16,

    /// IP on which the control REST API listens.
    #[clap(long, default_value_t = IpAddr::from(Ipv4Addr::LOCALHOST))]
    pub rest_listen_addr: IpAddr,

    /// Browser origin allowed to submit passphrases to the control API, e.g.
    /// the portal's own `https://portal.home.arpa`. May be repeated.
    ///
    /// Without one, browsers refuse cross-origin init and unseal requests.
    /// The read-only routes are open to any origin.
    #[clap(
        long = "cors-origin",
        env = "LYNDRIX_CORS_ORIGIN",
        value_delimiter = ',',
        value_name = "ORIGIN"
    )]
    pub cors_origins: Vec<String>,

    /// Argon2id passes for envelope key derivation and password hashing.
    ///
    /// Changing any KDF parameter makes an existing envelope unreadable.
    #[clap(long, default_value = "3")]
    pub kdf_time_cost: u32,

    /// Argon2id memory in KiB.
    #[clap(long, default_value = "65536")]
    pub kdf_memory_kib: u32,

    /// Argon2id lanes.
    #[clap(long, default_value = "4")]
    pub kdf_parallelism: u32,

    /// Enable tokio tracing for consumption by the tokio-console application
    /// note: this will attempt to connect to localhost:6669
    #[clap(long, name = "tokio-console", default_value = "false")]
    pub tokio_console: bool,
}

impl Default for Args {
    fn default() -> Self {
        let empty: Vec<String> = vec![];
        Self::parse_from(empty)
    }
}

fn duration_from_seconds_str(s: &str) -> Result<Duration, std::num::ParseIntError> {
    Ok(Duration::from_secs(s.parse()?))
}

impl Args {
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            time_cost: self.kdf_time_cost,
            memory_cost_kib: self.kdf_memory_kib,
            parallelism: self.kdf_parallelism,
        }
    }

    /// explicit `--envelope-file`, else the data directory default
    pub fn envelope_path(&self, data_dir: &DataDirectory) -> PathBuf {
        self.envelope_file
            .clone()
            .unwrap_or_else(|| data_dir.envelope_file_path())
    }

    pub fn provisioning(&self) -> Provisioning {
        let userpass = match (&self.vault_user, &self.vault_password) {
            (Some(username), Some(password)) if !username.is_empty() => Some(UserpassAccount {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        Provisioning::for_namespace(&self.secret_namespace, userpass)
    }

    pub fn coordinator_config(&self, data_dir: &DataDirectory) -> CoordinatorConfig {
        CoordinatorConfig {
            envelope_path: self.envelope_path(data_dir),
            kv_mount: self.kv_mount.clone(),
            probe_backoff: self.probe_backoff,
            watchdog_interval: self.watchdog_interval,
            kdf_params: self.kdf_params(),
            provisioning: self.provisioning(),
        }
    }
}
