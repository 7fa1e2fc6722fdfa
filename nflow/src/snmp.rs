//! The mock SNMP responder boundary.
//!
//! Collectors commonly poll the exporting device over SNMP for interface
//! names and counters. This module holds what the generator hands to a mock
//! agent: a bind address, a community string, one v3 user and a flat OID
//! table. The agent itself plugs in through [`Responder`]. The bundled
//! [`Listener`] binds the socket and drains requests without answering.

use std::{io, net::Ipv6Addr};

use async_trait::async_trait;
use nflow_signal::Watcher;
use serde::Deserialize;
use tokio::{net::UdpSocket, sync::oneshot};
use tracing::{debug, info, warn};

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> String {
    "161".to_string()
}

fn default_community() -> String {
    "public".to_string()
}

fn default_v3_username() -> String {
    "nflow".to_string()
}

fn default_v3_authentication_passphrase() -> String {
    "authpassphrase".to_string()
}

fn default_v3_privacy_passphrase() -> String {
    "privacypassphrase".to_string()
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
/// Configuration of the mock SNMP responder.
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_ip")]
    pub ip: String,
    /// UDP port to listen on
    #[serde(
        default = "default_port",
        deserialize_with = "crate::config::string_or_number"
    )]
    pub port: String,
    /// v1/v2c community
    #[serde(default = "default_community")]
    pub community: String,
    /// v3 user name
    #[serde(default = "default_v3_username")]
    pub v3_username: String,
    /// v3 authentication passphrase, MD5
    #[serde(default = "default_v3_authentication_passphrase")]
    pub v3_authentication_passphrase: String,
    /// v3 privacy passphrase, DES
    #[serde(default = "default_v3_privacy_passphrase")]
    pub v3_privacy_passphrase: String,
    /// The OIDs the responder answers for
    #[serde(rename = "mockOIDs", default)]
    pub mock_oids: Vec<MockOid>,
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// One OID entry as written in the configuration.
pub struct MockOid {
    /// Dotted OID
    pub oid: String,
    /// The value, parsed according to `kind`
    pub value: String,
    /// `string` or `uint64`
    #[serde(rename = "type")]
    pub kind: String,
}

/// A typed OID value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidValue {
    /// ASN.1 OCTET STRING
    OctetString(String),
    /// SNMP Counter64
    Counter64(u64),
}

/// One entry of the table handed to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEntry {
    /// Dotted OID
    pub oid: String,
    /// Value returned on GET
    pub value: OidValue,
}

/// SNMPv3 user security parameters. Authentication is MD5, privacy DES.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsmUser {
    /// User name
    pub username: String,
    /// Authentication passphrase
    pub authentication_passphrase: String,
    /// Privacy passphrase
    pub privacy_passphrase: String,
}

/// Everything a [`Responder`] needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// `host:port` to bind
    pub bind: String,
    /// v1/v2c community
    pub community: String,
    /// The v3 user
    pub user: UsmUser,
    /// OIDs in configuration order
    pub table: Vec<MockEntry>,
}

impl Config {
    /// Build the agent settings, dropping OID entries that cannot be typed.
    #[must_use]
    pub fn agent_settings(&self) -> AgentSettings {
        let bind = if self.ip.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        };
        AgentSettings {
            bind,
            community: self.community.clone(),
            user: UsmUser {
                username: self.v3_username.clone(),
                authentication_passphrase: self.v3_authentication_passphrase.clone(),
                privacy_passphrase: self.v3_privacy_passphrase.clone(),
            },
            table: mock_table(&self.mock_oids),
        }
    }
}

/// Type every configured OID. Entries with an unknown type or a `uint64`
/// value that does not parse are skipped with a warning.
#[must_use]
pub fn mock_table(oids: &[MockOid]) -> Vec<MockEntry> {
    oids.iter()
        .filter_map(|entry| {
            let value = match entry.kind.as_str() {
                "string" => OidValue::OctetString(entry.value.clone()),
                "uint64" => match entry.value.parse::<u64>() {
                    Ok(v) => OidValue::Counter64(v),
                    Err(err) => {
                        warn!(
                            "skipping OID {}: value {:?} is not a uint64: {err}",
                            entry.oid, entry.value
                        );
                        return None;
                    }
                },
                other => {
                    warn!("skipping OID {}: unknown type {other:?}", entry.oid);
                    return None;
                }
            };
            Some(MockEntry {
                oid: entry.oid.clone(),
                value,
            })
        })
        .collect()
}

/// Errors produced by a [`Responder`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The listening socket could not be bound
    #[error("Failed to bind SNMP mock to {address}: {source}")]
    Bind {
        /// The address as configured
        address: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A mock SNMP agent.
#[async_trait]
pub trait Responder: Send + 'static {
    /// Bind, send on `bound`, then serve until `shutdown`.
    ///
    /// Implementations must not send on `bound` before the socket is
    /// listening. Dropping `bound` unsent tells the caller the responder
    /// will never be ready.
    async fn serve(
        self,
        settings: AgentSettings,
        bound: oneshot::Sender<()>,
        shutdown: Watcher,
    ) -> Result<(), Error>;
}

#[derive(Debug, Default, Clone, Copy)]
/// Binds the SNMP socket and discards every request.
///
/// Enough for collectors that only need the port to exist; replace with a
/// full agent through [`Responder`] when answers are required.
pub struct Listener;

#[async_trait]
impl Responder for Listener {
    async fn serve(
        self,
        settings: AgentSettings,
        bound: oneshot::Sender<()>,
        shutdown: Watcher,
    ) -> Result<(), Error> {
        let socket = UdpSocket::bind(&settings.bind)
            .await
            .map_err(|source| Error::Bind {
                address: settings.bind.clone(),
                source,
            })?;
        info!(
            "SNMP mock listening on {} with {} OIDs",
            socket.local_addr()?,
            settings.table.len()
        );
        // The caller may have stopped waiting; serving continues regardless.
        let _ = bound.send(());

        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);
        let mut buf = vec![0; 65_535];
        loop {
            tokio::select! {
                res = socket.recv_from(&mut buf) => {
                    let (bytes, peer) = res?;
                    debug!("discarding {bytes} byte SNMP request from {peer}");
                }
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    fn oid(oid: &str, value: &str, kind: &str) -> MockOid {
        MockOid {
            oid: oid.to_string(),
            value: value.to_string(),
            kind: kind.to_string(),
        }
    }

    #[test]
    fn table_types_entries_and_skips_bad_ones() {
        let table = mock_table(&[
            oid("1.3.6.1.2.1.2.2.1.2.1", "eth0", "string"),
            oid("1.3.6.1.2.1.31.1.1.1.6.1", "18446744073709551615", "uint64"),
            oid("1.3.6.1.2.1.31.1.1.1.6.2", "-1", "uint64"),
            oid("1.3.6.1.2.1.1.3.0", "100", "timeticks"),
        ]);
        assert_eq!(
            table,
            vec![
                MockEntry {
                    oid: "1.3.6.1.2.1.2.2.1.2.1".to_string(),
                    value: OidValue::OctetString("eth0".to_string()),
                },
                MockEntry {
                    oid: "1.3.6.1.2.1.31.1.1.1.6.1".to_string(),
                    value: OidValue::Counter64(u64::MAX),
                },
            ]
        );
    }

    #[test]
    fn agent_settings_carry_credentials() {
        let config: Config = serde_yaml::from_str(
            "ip: 127.0.0.1\nport: 1161\ncommunity: secret\nv3-username: alice\n",
        )
        .unwrap();
        let settings = config.agent_settings();
        assert_eq!(settings.bind, "127.0.0.1:1161");
        assert_eq!(settings.community, "secret");
        assert_eq!(settings.user.username, "alice");
        assert_eq!(settings.user.privacy_passphrase, "privacypassphrase");
        assert!(settings.table.is_empty());
    }

    #[tokio::test]
    async fn listener_signals_once_bound() {
        let settings = AgentSettings {
            bind: "127.0.0.1:0".to_string(),
            community: "public".to_string(),
            user: UsmUser {
                username: "nflow".to_string(),
                authentication_passphrase: "a".to_string(),
                privacy_passphrase: "p".to_string(),
            },
            table: Vec::new(),
        };
        let (bound, bound_rx) = oneshot::channel();
        let (shutdown_watcher, shutdown) = nflow_signal::signal();
        let handle = tokio::spawn(Listener.serve(settings, bound, shutdown_watcher));

        timeout(Duration::from_secs(5), bound_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!handle.is_finished());

        shutdown.signal_and_wait().await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn listener_bind_failure_is_never_bound() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let settings = AgentSettings {
            bind: taken.local_addr().unwrap().to_string(),
            community: "public".to_string(),
            user: UsmUser {
                username: "nflow".to_string(),
                authentication_passphrase: "a".to_string(),
                privacy_passphrase: "p".to_string(),
            },
            table: Vec::new(),
        };
        let (bound, bound_rx) = oneshot::channel();
        let (shutdown_watcher, _shutdown) = nflow_signal::signal();
        let res = Listener.serve(settings, bound, shutdown_watcher).await;
        assert!(matches!(res, Err(Error::Bind { .. })));
        assert!(bound_rx.await.is_err());
    }
}
