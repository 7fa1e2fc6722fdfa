//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Deserializer};

use crate::{generator, snmp};

/// Environment variable that, when set, holds the configuration document
/// itself and takes precedence over any path.
pub const CONFIG_ENV: &str = "NFLOW_CONFIG";

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// A generator definition cannot be run
    #[error("Generator {index} is invalid: {source}")]
    Generator {
        /// Position of the generator in `generators`
        index: usize,
        /// What is wrong with it
        #[source]
        source: Box<generator::Error>,
    },
}

/// Main configuration struct for this program
#[derive(Debug, Default, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The mock SNMP responder, started before any generator if present
    #[serde(default)]
    pub snmp: Option<snmp::Config>,
    /// One entry per collector
    #[serde(default)]
    pub generators: Vec<generator::Config>,
}

impl Config {
    /// Read and parse the document at `path`.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or is not a valid
    /// configuration document.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        contents.parse()
    }

    /// Check every flow of every generator without touching the network.
    ///
    /// # Errors
    ///
    /// Returns the first generator whose flows cannot be resolved, for
    /// instance because of an unrecognized traffic type.
    pub fn validate(&self) -> Result<(), Error> {
        for (index, generator) in self.generators.iter().enumerate() {
            generator
                .validate()
                .map_err(|source| Error::Generator {
                    index,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

/// Ports are written either as YAML integers or strings.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Number(u64),
        Text(String),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Number(n) => n.to_string(),
        Scalar::Text(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use super::*;

    #[test]
    fn config_deserializes() {
        let contents = r#"
snmp:
  ip: 127.0.0.1
  port: 1161
  community: testing
  mockOIDs:
    - oid: 1.3.6.1.2.1.2.2.1.2.1
      value: eth0
      type: string
    - oid: 1.3.6.1.2.1.31.1.1.1.6.1
      value: "1234"
      type: uint64
generators:
  - collector:
      ip: 127.0.0.1
      port: 2055
    flows:
      - reporting-intervall: 1s
        packets-per-flow: 5
        bytes-per-flow: 500
        traffic-type: dns
      - reporting-intervall: 250ms
        bytes-per-flow: 1500
        sample-intervall: 10
        false-index: true
  - collector:
      ip: localhost
      port: "9995"
    flows:
      - reporting-intervall: 1m 30s
        bytes-per-flow: 64
        traffic-type: ssh
"#;
        let config: Config = contents.parse().unwrap();

        let snmp = config.snmp.as_ref().unwrap();
        assert_eq!(snmp.ip, "127.0.0.1");
        assert_eq!(snmp.port, "1161");
        assert_eq!(snmp.community, "testing");
        assert_eq!(snmp.mock_oids.len(), 2);
        assert_eq!(snmp.mock_oids[1].kind, "uint64");

        assert_eq!(config.generators.len(), 2);
        let first = &config.generators[0];
        assert_eq!(first.collector.port, "2055");
        assert_eq!(first.flows[0].reporting_interval, Duration::from_secs(1));
        assert_eq!(first.flows[0].packets_per_flow, 5);
        assert_eq!(first.flows[0].traffic_type, "dns");
        assert_eq!(first.flows[1].reporting_interval, Duration::from_millis(250));
        assert_eq!(first.flows[1].packets_per_flow, 10);
        assert_eq!(first.flows[1].traffic_type, "");
        assert_eq!(first.flows[1].sample_interval, 10);
        assert!(first.flows[1].false_index);

        let second = &config.generators[1];
        assert_eq!(second.collector.ip, "localhost");
        assert_eq!(second.collector.port, "9995");
        assert_eq!(second.flows[0].reporting_interval, Duration::from_secs(90));
        assert_eq!(second.flows[0].sample_interval, 1);
        assert!(!second.flows[0].false_index);

        config.validate().unwrap();
    }

    #[test]
    fn snmp_defaults() {
        let config: Config = "snmp: {}\n".parse().unwrap();
        let snmp = config.snmp.unwrap();
        assert_eq!(snmp.port, "161");
        assert_eq!(snmp.community, "public");
        assert!(!snmp.v3_username.is_empty());
        assert!(snmp.mock_oids.is_empty());
        assert!(config.generators.is_empty());
    }

    #[test]
    fn unparsable_interval_is_rejected() {
        let contents = r"
generators:
  - collector: { ip: 127.0.0.1, port: 2055 }
    flows:
      - reporting-intervall: often
        bytes-per-flow: 500
";
        assert!(matches!(
            contents.parse::<Config>(),
            Err(Error::SerdeYaml(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let contents = r"
generators:
  - collector: { ip: 127.0.0.1, port: 2055 }
    flows: []
    colour: blue
";
        assert!(contents.parse::<Config>().is_err());
    }

    #[test]
    fn validate_reports_unrecognized_traffic_type() {
        let contents = r"
generators:
  - collector: { ip: 127.0.0.1, port: 2055 }
    flows:
      - reporting-intervall: 1s
        bytes-per-flow: 500
  - collector: { ip: 127.0.0.1, port: 2056 }
    flows:
      - reporting-intervall: 1s
        bytes-per-flow: 500
        traffic-type: FOO
";
        let config: Config = contents.parse().unwrap();
        match config.validate() {
            Err(Error::Generator { index, source }) => {
                assert_eq!(index, 1);
                assert!(source.to_string().contains("FOO"));
            }
            other => panic!("unexpected validation result: {other:?}"),
        }
    }

    #[test]
    fn from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "generators:\n  - collector: {{ ip: 127.0.0.1, port: 2055 }}\n    flows: []"
        )
        .unwrap();
        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.generators.len(), 1);
    }

    #[test]
    fn from_path_missing_file() {
        let err = Config::from_path(Path::new("/nonexistent/nflow.yaml")).unwrap_err();
        assert!(matches!(err, Error::ReadFile { .. }));
    }
}
