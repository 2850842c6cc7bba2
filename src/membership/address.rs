use crate::util::BadDataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use url::{Host, Url};

/// Transport a cluster peer is reached over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
    Sctp,
    Ws,
    Wss,
    #[default]
    Bin,
    Hep,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
            Transport::Tls => "tls",
            Transport::Sctp => "sctp",
            Transport::Ws => "ws",
            Transport::Wss => "wss",
            Transport::Bin => "bin",
            Transport::Hep => "hep",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = BadDataError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "udp" => Ok(Transport::Udp),
            "tcp" => Ok(Transport::Tcp),
            "tls" => Ok(Transport::Tls),
            "sctp" => Ok(Transport::Sctp),
            "ws" => Ok(Transport::Ws),
            "wss" => Ok(Transport::Wss),
            "bin" => Ok(Transport::Bin),
            "hep" | "hep_udp" | "hep_tcp" => Ok(Transport::Hep),
            _ => Err(BadDataError::UnsupportedTransport {
                transport: raw.to_string(),
            }),
        }
    }
}

/// A parsed node URL. Both `proto:host:port` and `proto://host:port` are
/// accepted; the transport is optional in the first form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUrl {
    pub transport: Option<Transport>,
    pub host: String,
    pub port: u16,
}

impl NodeUrl {
    pub fn parse(raw: &str) -> Result<Self, BadDataError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(bad_url(raw, "empty url"));
        }
        if raw.contains("://") {
            Self::parse_hierarchical(raw)
        } else {
            Self::parse_host_port(raw)
        }
    }

    fn parse_hierarchical(raw: &str) -> Result<Self, BadDataError> {
        let url = Url::parse(raw).map_err(|err| bad_url(raw, &err.to_string()))?;
        let transport = url.scheme().parse::<Transport>()?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(bad_url(raw, "missing host")),
        };
        let port = url.port().ok_or_else(|| bad_url(raw, "missing port"))?;
        if port == 0 {
            return Err(bad_url(raw, "port 0"));
        }
        Ok(Self {
            transport: Some(transport),
            host,
            port,
        })
    }

    fn parse_host_port(raw: &str) -> Result<Self, BadDataError> {
        let (transport, rest) = match raw.split_once(':') {
            Some((head, tail))
                if !head.is_empty()
                    && !head.starts_with('[')
                    && head.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
                    && tail.contains(':') =>
            {
                (Some(head.parse::<Transport>()?), tail)
            }
            _ => (None, raw),
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| bad_url(raw, "expected host:port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() || (host.contains(':') && host.parse::<IpAddr>().is_err()) {
            return Err(bad_url(raw, "bad host"));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| bad_url(raw, "bad port"))?;
        Ok(Self {
            transport,
            host: host.to_string(),
            port,
        })
    }
}

fn bad_url(raw: &str, reason: &str) -> BadDataError {
    BadDataError::BadUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Name resolution seam used while loading peers.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr>;
}

/// Resolves through the operating system; IP literals never hit DNS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no addresses returned")
        })
    }
}
