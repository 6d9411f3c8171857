//! Outbound destination resolution per RFC 3263: NAPTR for transport
//! discovery, SRV for host/port selection with RFC 2782 priority and
//! weight handling, A/AAAA as the fallback.

use crate::sip::{Host, Transport, Uri};
use crate::Result;
use std::collections::BTreeMap;
use std::net::IpAddr;
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    proto::rr::RecordType,
    TokioAsyncResolver,
};

/// One resolved candidate, tried in order until one is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsTarget {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub priority: u16,
}

impl DnsTarget {
    pub fn new(host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct NaptrRecord {
    order: u16,
    preference: u16,
    transport: Transport,
    replacement: String,
}

#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, uri: &Uri) -> Result<Vec<DnsTarget>>;
}

/// System-DNS resolver. TTL caching is provided by the underlying
/// resolver's internal cache.
#[derive(Clone)]
pub struct SipResolver {
    resolver: TokioAsyncResolver,
    enable_naptr: bool,
    enable_srv: bool,
}

impl SipResolver {
    pub fn from_system() -> Result<Self> {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Ok(Self {
            resolver,
            enable_naptr: true,
            enable_srv: true,
        })
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            enable_naptr: true,
            enable_srv: true,
        }
    }

    /// Disables NAPTR and SRV lookups, going straight to A/AAAA.
    pub fn without_srv(mut self) -> Self {
        self.enable_naptr = false;
        self.enable_srv = false;
        self
    }

    fn default_transport(uri: &Uri) -> Transport {
        if uri.is_secure() {
            Transport::Tls
        } else {
            uri.transport().unwrap_or(Transport::Udp)
        }
    }

    async fn resolve_internal(&self, uri: &Uri) -> Result<Vec<DnsTarget>> {
        let host = match uri.host() {
            Host::Ip(ip) => {
                // Numeric IP: no DNS procedures apply.
                let port = uri
                    .host_port
                    .port_or(Self::default_transport(uri).default_port());
                return Ok(vec![DnsTarget::new(
                    ip.to_string(),
                    port,
                    Self::default_transport(uri),
                )]);
            }
            Host::Domain(domain) => domain.clone(),
        };

        // Explicit port skips NAPTR/SRV (RFC 3263 §4.1).
        if let Some(port) = uri.host_port.port {
            let ips = self.lookup_a_aaaa(&host).await?;
            return Ok(ips
                .into_iter()
                .map(|ip| DnsTarget::new(ip.to_string(), port, Self::default_transport(uri)))
                .collect());
        }

        let transports = if self.enable_naptr && uri.transport().is_none() {
            match self.lookup_naptr(&host).await {
                Ok(transports) => transports,
                Err(_) => self.default_transport_order(uri),
            }
        } else {
            self.default_transport_order(uri)
        };

        let mut all_targets = Vec::new();
        if self.enable_srv {
            for transport in &transports {
                if let Ok(targets) = self.lookup_srv(&host, *transport, uri.is_secure()).await {
                    all_targets.extend(targets);
                }
            }
        }

        if all_targets.is_empty() {
            let transport = Self::default_transport(uri);
            let ips = self.lookup_a_aaaa(&host).await?;
            for ip in ips {
                all_targets.push(DnsTarget::new(
                    ip.to_string(),
                    transport.default_port(),
                    transport,
                ));
            }
        }

        if all_targets.is_empty() {
            Err(crate::Error::DnsResolutionError(format!(
                "no DNS targets found for {}",
                host
            )))
        } else {
            Ok(all_targets)
        }
    }

    fn default_transport_order(&self, uri: &Uri) -> Vec<Transport> {
        if uri.is_secure() {
            vec![Transport::Tls]
        } else if let Some(transport) = uri.transport() {
            vec![transport]
        } else {
            vec![Transport::Udp, Transport::Tcp]
        }
    }

    async fn lookup_naptr(&self, host: &str) -> Result<Vec<Transport>> {
        let lookup = self
            .resolver
            .lookup(format!("{}.", host), RecordType::NAPTR)
            .await
            .map_err(|e| crate::Error::DnsResolutionError(e.to_string()))?;

        let mut records = Vec::new();
        for rec in lookup.iter() {
            if let Some(rdata) = rec.as_naptr() {
                let service = String::from_utf8_lossy(rdata.services()).to_ascii_uppercase();
                let replacement = rdata.replacement().to_utf8();

                let transport = if service.contains("SIPS+D2T") {
                    Some(Transport::Tls)
                } else if service.contains("SIP+D2T") {
                    Some(Transport::Tcp)
                } else if service.contains("SIP+D2U") {
                    Some(Transport::Udp)
                } else if service.contains("SIPS+D2W") {
                    Some(Transport::Wss)
                } else if service.contains("SIP+D2W") {
                    Some(Transport::Ws)
                } else {
                    None
                };

                if let Some(transport) = transport {
                    records.push(NaptrRecord {
                        order: rdata.order(),
                        preference: rdata.preference(),
                        transport,
                        replacement: replacement.trim_end_matches('.').to_string(),
                    });
                }
            }
        }

        if records.is_empty() {
            return Err(crate::Error::DnsResolutionError(
                "no usable NAPTR records".to_string(),
            ));
        }

        records.sort();
        Ok(records.into_iter().map(|r| r.transport).collect())
    }

    async fn lookup_srv(
        &self,
        host: &str,
        transport: Transport,
        sips: bool,
    ) -> Result<Vec<DnsTarget>> {
        let service = match transport {
            Transport::Tls | Transport::Wss => "_sips",
            _ if sips => "_sips",
            _ => "_sip",
        };
        let proto = match transport {
            Transport::Udp => "udp",
            _ => "tcp",
        };
        let srv_name = format!("{}._{}.{}", service, proto, host);

        let lookup = self
            .resolver
            .srv_lookup(srv_name)
            .await
            .map_err(|e| crate::Error::DnsResolutionError(e.to_string()))?;

        let mut priority_groups: BTreeMap<u16, Vec<(u16, String, u16)>> = BTreeMap::new();
        for rec in lookup.iter() {
            let target = rec.target().to_utf8();
            priority_groups.entry(rec.priority()).or_default().push((
                rec.weight(),
                target.trim_end_matches('.').to_string(),
                rec.port(),
            ));
        }

        let mut targets = Vec::new();
        for (priority, records) in priority_groups {
            for (host, port) in select_by_weight(records) {
                targets.push(DnsTarget::new(host, port, transport).with_priority(priority));
            }
        }

        if targets.is_empty() {
            Err(crate::Error::DnsResolutionError(
                "no SRV records found".to_string(),
            ))
        } else {
            Ok(targets)
        }
    }

    async fn lookup_a_aaaa(&self, host: &str) -> Result<Vec<IpAddr>> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| crate::Error::DnsResolutionError(e.to_string()))?;

        let mut ipv6_addrs = Vec::new();
        let mut ipv4_addrs = Vec::new();
        for ip in lookup.iter() {
            match ip {
                IpAddr::V6(addr) => ipv6_addrs.push(IpAddr::V6(addr)),
                IpAddr::V4(addr) => ipv4_addrs.push(IpAddr::V4(addr)),
            }
        }

        // Interleave v6/v4 so a broken family does not starve the other.
        let mut result = Vec::new();
        let max_len = ipv6_addrs.len().max(ipv4_addrs.len());
        for i in 0..max_len {
            if i < ipv6_addrs.len() {
                result.push(ipv6_addrs[i]);
            }
            if i < ipv4_addrs.len() {
                result.push(ipv4_addrs[i]);
            }
        }

        if result.is_empty() {
            Err(crate::Error::DnsResolutionError(format!(
                "no A/AAAA records for {}",
                host
            )))
        } else {
            Ok(result)
        }
    }
}

#[async_trait::async_trait]
impl Resolver for SipResolver {
    async fn resolve(&self, uri: &Uri) -> Result<Vec<DnsTarget>> {
        self.resolve_internal(uri).await
    }
}

/// Weighted SRV target selection per RFC 2782.
fn select_by_weight(mut records: Vec<(u16, String, u16)>) -> Vec<(String, u16)> {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let mut result = Vec::new();

    while !records.is_empty() {
        let total_weight: u32 = records.iter().map(|(w, _, _)| *w as u32).sum();
        let idx = if total_weight == 0 {
            rng.gen_range(0..records.len())
        } else {
            let pick = rng.gen_range(0..total_weight);
            let mut cumulative = 0u32;
            records
                .iter()
                .position(|(w, _, _)| {
                    cumulative += *w as u32;
                    cumulative > pick
                })
                .unwrap_or(0)
        };
        let (_, host, port) = records.remove(idx);
        result.push((host, port));
    }

    result
}

/// Fixed-answer resolver for tests and static deployments.
#[derive(Clone)]
pub struct StaticResolver {
    targets: Vec<DnsTarget>,
}

impl StaticResolver {
    pub fn new(targets: Vec<DnsTarget>) -> Self {
        Self { targets }
    }

    pub fn single(host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            targets: vec![DnsTarget::new(host, port, transport)],
        }
    }
}

#[async_trait::async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _uri: &Uri) -> Result<Vec<DnsTarget>> {
        Ok(self.targets.clone())
    }
}
