use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::naming;
use crate::{GceError, Result};

pub const LABEL_PREFIX: &str = "gce.";
pub const LABEL_LB_TYPE: &str = "gce.lb.type";
pub const LABEL_LB_GROUP: &str = "gce.lb.group";
pub const LABEL_LB_ADDRESS: &str = "gce.lb.address";
pub const LABEL_LB_SOURCE_RANGES: &str = "gce.lb.source.ranges";
pub const LABEL_LB_SOURCE_TAGS: &str = "gce.lb.source.tags";
pub const LABEL_LB_SESSION_AFFINITY: &str = "gce.lb.session.affinity";

const KNOWN_LABELS: [&str; 6] = [
    LABEL_LB_TYPE,
    LABEL_LB_GROUP,
    LABEL_LB_ADDRESS,
    LABEL_LB_SOURCE_RANGES,
    LABEL_LB_SOURCE_TAGS,
    LABEL_LB_SESSION_AFFINITY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Lowercase spelling used in names and firewall rules.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }

    /// Spelling expected by forwarding rules.
    pub fn as_ip_protocol(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = GceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(GceError::Validation(format!("unknown protocol {other:?}"))),
        }
    }
}

/// A published host port, written `80/tcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortBinding {
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }

    pub fn tcp(port: u16) -> Self {
        Self::new(port, Protocol::Tcp)
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

impl FromStr for PortBinding {
    type Err = GceError;

    /// Parses `80/tcp`; a bare `80` means tcp.
    fn from_str(s: &str) -> Result<Self> {
        let (port, protocol) = match s.split_once('/') {
            Some((port, proto)) => (port, proto.parse()?),
            None => (s, Protocol::Tcp),
        };
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| GceError::Validation(format!("invalid port {s:?}: {e}")))?;
        Ok(Self::new(port, protocol))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionAffinity {
    None,
    ClientIp,
    ClientIpProto,
}

impl SessionAffinity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAffinity::None => "NONE",
            SessionAffinity::ClientIp => "CLIENT_IP",
            SessionAffinity::ClientIpProto => "CLIENT_IP_PROTO",
        }
    }
}

impl FromStr for SessionAffinity {
    type Err = GceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(SessionAffinity::None),
            "CLIENT_IP" => Ok(SessionAffinity::ClientIp),
            "CLIENT_IP_PROTO" => Ok(SessionAffinity::ClientIpProto),
            _ => Err(GceError::Validation(format!(
                "invalid label {LABEL_LB_SESSION_AFFINITY:?} value {s:?}, must be one of NONE, CLIENT_IP, CLIENT_IP_PROTO"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub ranges: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalancerType {
    Static,
    Ephemeral,
}

impl FromStr for LoadBalancerType {
    type Err = GceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "static" => Ok(LoadBalancerType::Static),
            "ephemeral" => Ok(LoadBalancerType::Ephemeral),
            "" => Err(GceError::Validation(format!(
                "invalid label {LABEL_LB_TYPE:?}, should be provided"
            ))),
            _ => Err(GceError::Validation(format!(
                "invalid label {LABEL_LB_TYPE:?} value must be `static` or `ephemeral`"
            ))),
        }
    }
}

/// Load-balancing objects declared by one container's labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub group_name: Option<String>,
    /// Short (12 char) container id.
    pub container: String,
    pub network: Option<String>,
    /// Empty for an ephemeral address, else an IPv4 literal or the name of a
    /// reserved regional address.
    pub address: String,
    pub ports: Vec<PortBinding>,
    pub source: SourceFilter,
    pub session_affinity: Option<SessionAffinity>,
}

/// Labels under the `gce.` namespace; an empty map means the container is
/// not managed.
pub fn managed_labels(labels: &HashMap<String, String>) -> HashMap<String, String> {
    labels
        .iter()
        .filter(|(k, _)| k.starts_with(LABEL_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl NetworkConfig {
    /// Builds a config from a container's `gce.*` labels and its published
    /// ports. Unknown `gce.*` keys are rejected.
    pub fn from_labels(
        container: &str,
        labels: &HashMap<String, String>,
        ports: Vec<PortBinding>,
    ) -> Result<Self> {
        for key in labels.keys() {
            if key.starts_with(LABEL_PREFIX) && !KNOWN_LABELS.contains(&key.as_str()) {
                return Err(GceError::Validation(format!("unknown label {key:?}")));
            }
        }

        let get = |key: &str| labels.get(key).map(String::as_str).unwrap_or_default();

        let lb_type: LoadBalancerType = get(LABEL_LB_TYPE).parse()?;
        let address = get(LABEL_LB_ADDRESS).trim().to_string();
        if lb_type == LoadBalancerType::Static && address.is_empty() {
            return Err(GceError::Validation(format!(
                "invalid label {LABEL_LB_ADDRESS:?}, cannot be empty when {LABEL_LB_TYPE:?} is static"
            )));
        }

        let session_affinity = match labels.get(LABEL_LB_SESSION_AFFINITY) {
            Some(value) => Some(value.parse()?),
            None => None,
        };

        let group_name = Some(get(LABEL_LB_GROUP).trim())
            .filter(|g| !g.is_empty())
            .map(String::from);

        let config = NetworkConfig {
            group_name,
            container: container.to_string(),
            network: None,
            address,
            ports,
            source: SourceFilter {
                ranges: split_list(get(LABEL_LB_SOURCE_RANGES)),
                tags: split_list(get(LABEL_LB_SOURCE_TAGS)),
            },
            session_affinity,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container.is_empty() {
            return Err(GceError::Validation(
                "invalid network config, container field cannot be empty".into(),
            ));
        }
        if self.ports.is_empty() {
            return Err(GceError::Validation(
                "invalid network config, ports field cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// The explicit group name, else `<container>-<instance>`.
    pub fn group(&self, instance: &str) -> String {
        match &self.group_name {
            Some(group) if !group.is_empty() => group.clone(),
            _ => format!("{}-{}", self.container, instance),
        }
    }

    /// First 8 hex chars of md5(group + address + "port/proto"...).
    pub fn id(&self, instance: &str) -> String {
        let mut unique = self.group(instance);
        unique.push_str(&self.address);
        for port in &self.ports {
            unique.push_str(&port.to_string());
        }
        let digest = format!("{:x}", md5::compute(unique.as_bytes()));
        digest[..8].to_string()
    }

    /// Shared by the target pool, the firewall and the instance tag.
    pub fn name(&self, instance: &str) -> String {
        format!(
            "{}{}-{}",
            naming::NETWORK_NAME_PREFIX,
            self.group(instance),
            self.id(instance)
        )
    }

    pub fn forwarding_rule_name(&self, instance: &str, port: &PortBinding) -> String {
        format!("{}-{}-{}", self.name(instance), port.port, port.protocol)
    }

    pub fn network(&self) -> &str {
        self.network
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(naming::DEFAULT_NETWORK)
    }

    /// Firewall source ranges; open to everyone only when neither ranges
    /// nor tags were given.
    pub fn source_ranges(&self) -> Vec<String> {
        if self.source.ranges.is_empty() && self.source.tags.is_empty() {
            vec![naming::ANY_SOURCE_RANGE.to_string()]
        } else {
            self.source.ranges.clone()
        }
    }

    /// Whether the address names a reserved address that must be resolved.
    pub fn address_needs_lookup(&self) -> bool {
        !self.address.is_empty() && self.address.parse::<std::net::Ipv4Addr>().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn group_defaults_to_container_and_instance() {
        let config = NetworkConfig {
            container: "bar".into(),
            ..Default::default()
        };
        assert_eq!(config.group("foo"), "bar-foo");

        let config = NetworkConfig {
            group_name: Some("qux".into()),
            ..Default::default()
        };
        assert_eq!(config.group("foo"), "qux");
    }

    #[test]
    fn id_and_name_are_content_derived() {
        let config = NetworkConfig {
            group_name: Some("bar".into()),
            ..Default::default()
        };
        assert_eq!(config.name("foo"), "docker-network-bar-37b51d19");

        let config = NetworkConfig {
            container: "bar".into(),
            ..Default::default()
        };
        assert_eq!(config.name("foo"), "docker-network-bar-foo-339ddb11");

        let config = NetworkConfig {
            group_name: Some("web".into()),
            address: "10.0.0.5".into(),
            ports: vec![PortBinding::tcp(80), PortBinding::tcp(443)],
            ..Default::default()
        };
        assert_eq!(config.id("any"), "f65e172e");
    }

    #[test]
    fn forwarding_rule_name_appends_port_and_protocol() {
        let config = NetworkConfig {
            group_name: Some("g".into()),
            container: "abc".into(),
            ports: vec![PortBinding::tcp(80)],
            ..Default::default()
        };
        assert_eq!(config.name("host"), "docker-network-g-63ba1bd3");
        assert_eq!(
            config.forwarding_rule_name("host", &config.ports[0]),
            "docker-network-g-63ba1bd3-80-tcp"
        );
    }

    #[test]
    fn source_ranges_default_only_without_tags() {
        let mut config = NetworkConfig::default();
        assert_eq!(config.source_ranges(), vec!["0.0.0.0/0".to_string()]);

        config.source.tags = vec!["lb".into()];
        assert!(config.source_ranges().is_empty());

        config.source.ranges = vec!["10.0.0.0/8".into()];
        assert_eq!(config.source_ranges(), vec!["10.0.0.0/8".to_string()]);
    }

    #[test]
    fn validate_requires_ports_and_container() {
        let config = NetworkConfig {
            container: "abc".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GceError::Validation(_))));

        let config = NetworkConfig {
            ports: vec![PortBinding::tcp(80)],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn port_binding_parsing() {
        assert_eq!("80/tcp".parse::<PortBinding>().unwrap(), PortBinding::tcp(80));
        assert_eq!(
            "53/udp".parse::<PortBinding>().unwrap(),
            PortBinding::new(53, Protocol::Udp)
        );
        assert_eq!("8080".parse::<PortBinding>().unwrap(), PortBinding::tcp(8080));
        assert!("http/tcp".parse::<PortBinding>().is_err());
        assert!("80/icmp".parse::<PortBinding>().is_err());
    }

    #[test]
    fn from_labels_builds_config() {
        let config = NetworkConfig::from_labels(
            "abcdef012345",
            &labels(&[
                (LABEL_LB_TYPE, "static"),
                (LABEL_LB_ADDRESS, "my-address"),
                (LABEL_LB_GROUP, "web"),
                (LABEL_LB_SOURCE_RANGES, "10.0.0.0/8, 192.168.0.0/16"),
                (LABEL_LB_SOURCE_TAGS, "frontend"),
                (LABEL_LB_SESSION_AFFINITY, "CLIENT_IP"),
            ]),
            vec![PortBinding::tcp(80)],
        )
        .unwrap();

        assert_eq!(config.group_name.as_deref(), Some("web"));
        assert_eq!(config.address, "my-address");
        assert!(config.address_needs_lookup());
        assert_eq!(config.source.ranges, vec!["10.0.0.0/8", "192.168.0.0/16"]);
        assert_eq!(config.source.tags, vec!["frontend"]);
        assert_eq!(config.session_affinity, Some(SessionAffinity::ClientIp));
        assert_eq!(config.network(), "global/networks/default");
    }

    #[test]
    fn from_labels_rejects_bad_labels() {
        let ports = || vec![PortBinding::tcp(80)];

        let missing_type = NetworkConfig::from_labels("c", &labels(&[(LABEL_LB_GROUP, "g")]), ports());
        assert!(matches!(missing_type, Err(GceError::Validation(_))));

        let bad_type =
            NetworkConfig::from_labels("c", &labels(&[(LABEL_LB_TYPE, "dynamic")]), ports());
        assert!(bad_type.is_err());

        let static_without_address =
            NetworkConfig::from_labels("c", &labels(&[(LABEL_LB_TYPE, "static")]), ports());
        assert!(static_without_address.is_err());

        let unknown = NetworkConfig::from_labels(
            "c",
            &labels(&[(LABEL_LB_TYPE, "ephemeral"), ("gce.lb.port", "80")]),
            ports(),
        );
        assert!(matches!(unknown, Err(GceError::Validation(msg)) if msg.contains("gce.lb.port")));

        let affinity = NetworkConfig::from_labels(
            "c",
            &labels(&[(LABEL_LB_TYPE, "ephemeral"), (LABEL_LB_SESSION_AFFINITY, "sticky")]),
            ports(),
        );
        assert!(affinity.is_err());

        let no_ports =
            NetworkConfig::from_labels("c", &labels(&[(LABEL_LB_TYPE, "ephemeral")]), vec![]);
        assert!(no_ports.is_err());
    }

    #[test]
    fn literal_and_empty_addresses_are_not_resolved() {
        let mut config = NetworkConfig::default();
        assert!(!config.address_needs_lookup());
        config.address = "35.1.2.3".into();
        assert!(!config.address_needs_lookup());
    }

    #[test]
    fn managed_labels_filters_prefix() {
        let managed = managed_labels(&labels(&[
            (LABEL_LB_TYPE, "ephemeral"),
            ("com.docker.compose.project", "x"),
        ]));
        assert_eq!(managed.len(), 1);
        assert!(managed.contains_key(LABEL_LB_TYPE));
    }
}
