//! Traffic profile catalog.
//!
//! Maps the symbolic traffic type a flow is configured with onto the
//! destination port and IP protocol number written into its records. The
//! lookup is total over [`TrafficType`]; only parsing a label can fail.

use std::{fmt, str::FromStr};

use crate::Error;

/// IANA protocol number for ICMP
pub const IPPROTO_ICMP: u8 = 1;
/// IANA protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IANA protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// A traffic type a flow can be configured to emulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrafficType {
    /// tcp/21
    Ftp,
    /// tcp/22
    Ssh,
    /// udp/53
    Dns,
    /// tcp/80
    Http,
    /// tcp/443
    Https,
    /// udp/123, used when no traffic type is given
    #[default]
    Ntp,
    /// udp/161
    Snmp,
    /// icmp, port 0
    Icmp,
    /// tcp/993
    Imaps,
    /// tcp/3306
    Mysql,
    /// udp/6681
    P2p,
    /// udp/6682
    Bittorrent,
    /// udp/389
    Cldap,
}

impl TrafficType {
    /// Every entry in the catalog.
    pub const ALL: [TrafficType; 13] = [
        Self::Ftp,
        Self::Ssh,
        Self::Dns,
        Self::Http,
        Self::Https,
        Self::Ntp,
        Self::Snmp,
        Self::Icmp,
        Self::Imaps,
        Self::Mysql,
        Self::P2p,
        Self::Bittorrent,
        Self::Cldap,
    ];

    /// Destination port for this traffic type.
    #[must_use]
    pub const fn port(self) -> u16 {
        match self {
            Self::Ftp => 21,
            Self::Ssh => 22,
            Self::Dns => 53,
            Self::Http => 80,
            Self::Https => 443,
            Self::Ntp => 123,
            Self::Snmp => 161,
            Self::Icmp => 0,
            Self::Imaps => 993,
            Self::Mysql => 3306,
            Self::P2p => 6681,
            Self::Bittorrent => 6682,
            Self::Cldap => 389,
        }
    }

    /// IP protocol number for this traffic type.
    #[must_use]
    pub const fn protocol(self) -> u8 {
        match self {
            Self::Ftp | Self::Ssh | Self::Http | Self::Https | Self::Imaps | Self::Mysql => {
                IPPROTO_TCP
            }
            Self::Dns | Self::Ntp | Self::Snmp | Self::P2p | Self::Bittorrent | Self::Cldap => {
                IPPROTO_UDP
            }
            Self::Icmp => IPPROTO_ICMP,
        }
    }

    /// The label this traffic type is configured with.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ftp => "ftp",
            Self::Ssh => "ssh",
            Self::Dns => "dns",
            Self::Http => "http",
            Self::Https => "https",
            Self::Ntp => "ntp",
            Self::Snmp => "snmp",
            Self::Icmp => "icmp",
            Self::Imaps => "imaps",
            Self::Mysql => "mysql",
            Self::P2p => "p2p",
            Self::Bittorrent => "bittorrent",
            Self::Cldap => "cldap",
        }
    }
}

impl fmt::Display for TrafficType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrafficType {
    type Err = Error;

    /// Labels are case-insensitive. The empty label selects the default, NTP.
    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let label = label.trim();
        if label.is_empty() {
            return Ok(Self::default());
        }
        Self::ALL
            .into_iter()
            .find(|tt| tt.name().eq_ignore_ascii_case(label))
            .ok_or_else(|| Error::UnrecognizedTrafficType(label.to_string()))
    }
}
