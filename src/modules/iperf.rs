//! iperf3 plumbing shared by the client and server screens: command lines, JSON results,
//! avahi discovery output and the value formats shown on the panel.

use std::collections::HashSet;

use serde_json::Value;

use crate::config::ModuleDependencies;
use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 5201;
pub const DEFAULT_IPERF3: &str = "/usr/bin/iperf3";
pub const SERVICE_TYPE: &str = "_iperf3._tcp";
pub const CLIENT_SECTION: &str = "throughputclient";
pub const SERVER_SECTION: &str = "throughputserver";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn label(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TCP" => Some(Protocol::Tcp),
            "UDP" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Parameters of one client run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestParams {
    pub server: String,
    pub port: u16,
    pub protocol: Protocol,
    pub duration_s: u32,
    /// Mbps; 0 lets iperf3 pick.
    pub bandwidth_mbps: u32,
    pub parallel: u32,
    pub reverse: bool,
}

impl TestParams {
    pub fn command(&self, iperf3: &str) -> String {
        let mut cmd = format!(
            "{iperf3} -c {} -p {} -t {} -J",
            self.server, self.port, self.duration_s
        );
        if self.protocol == Protocol::Udp {
            cmd.push_str(" -u -l 9000 -w 1M");
        }
        if self.bandwidth_mbps > 0 {
            cmd.push_str(&format!(" -b {}m", self.bandwidth_mbps));
        }
        if self.parallel > 1 {
            cmd.push_str(&format!(" -P {}", self.parallel));
        }
        if self.reverse {
            cmd.push_str(" -R");
        }
        cmd
    }
}

pub fn server_command(iperf3: &str, port: u16) -> String {
    format!("{iperf3} -s -p {port} --udp-counters-64bit")
}

pub fn publish_command(local_ip: &str, port: u16) -> String {
    format!("avahi-publish -s \"MicroPanel iperf3 {local_ip}\" {SERVICE_TYPE} {port}")
}

pub fn browse_command() -> String {
    format!("avahi-browse -p -t -r {SERVICE_TYPE}")
}

/// Client path first, then the server's, then the packaged binary.
pub fn iperf3_path(deps: &ModuleDependencies) -> String {
    deps.get(CLIENT_SECTION, "iperf3_path")
        .or_else(|| deps.get(SERVER_SECTION, "iperf3_path"))
        .unwrap_or(DEFAULT_IPERF3)
        .to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestResult {
    Tcp {
        mbps: f64,
        retransmits: u64,
    },
    Udp {
        mbps: f64,
        jitter_ms: f64,
        lost_percent: f64,
        lost_packets: u64,
        packets: u64,
    },
}

impl TestResult {
    pub fn mbps(&self) -> f64 {
        match self {
            TestResult::Tcp { mbps, .. } | TestResult::Udp { mbps, .. } => *mbps,
        }
    }
}

/// Summary from `iperf3 -J` output: `end.sum_sent` for TCP, `end.sum` for UDP.
pub fn parse_result(json: &str, protocol: Protocol) -> Result<TestResult> {
    let doc: Value = serde_json::from_str(json)?;
    let end = doc
        .get("end")
        .ok_or_else(|| Error::Parse("iperf3 output has no 'end' section".into()))?;
    let number = |section: &Value, key: &str| section.get(key).and_then(Value::as_f64);
    match protocol {
        Protocol::Tcp => {
            let sum = end
                .get("sum_sent")
                .ok_or_else(|| Error::Parse("iperf3 output has no 'sum_sent'".into()))?;
            let bps = number(sum, "bits_per_second")
                .ok_or_else(|| Error::Parse("missing bits_per_second".into()))?;
            Ok(TestResult::Tcp {
                mbps: bps / 1_000_000.0,
                retransmits: number(sum, "retransmits").unwrap_or(0.0) as u64,
            })
        }
        Protocol::Udp => {
            let sum = end
                .get("sum")
                .ok_or_else(|| Error::Parse("iperf3 output has no 'sum'".into()))?;
            let bps = number(sum, "bits_per_second").unwrap_or(0.0);
            if bps <= 0.0 {
                return Err(Error::Parse("UDP test reported no bandwidth".into()));
            }
            Ok(TestResult::Udp {
                mbps: bps / 1_000_000.0,
                jitter_ms: number(sum, "jitter_ms").unwrap_or(0.0),
                lost_percent: number(sum, "lost_percent").unwrap_or(0.0),
                lost_packets: number(sum, "lost_packets").unwrap_or(0.0) as u64,
                packets: number(sum, "packets").unwrap_or(0.0) as u64,
            })
        }
    }
}

/// `Kbps` below 1 Mbps, `Gbps` from 1000 Mbps.
pub fn format_rate(mbps: f64) -> String {
    if mbps < 1.0 {
        format!("{:.1}Kbps", mbps * 1000.0)
    } else if mbps < 1000.0 {
        format!("{mbps:.1}Mbps")
    } else {
        format!("{:.2}Gbps", mbps / 1000.0)
    }
}

/// Bandwidth setting as shown in the main menu: `Auto`, `500M`, `2.5G`.
pub fn bandwidth_label(mbps: u32) -> String {
    if mbps == 0 {
        "Auto".to_string()
    } else if mbps >= 1000 {
        let gbps = format!("{:.2}", f64::from(mbps) / 1000.0);
        format!("{}G", gbps.trim_end_matches('0').trim_end_matches('.'))
    } else {
        format!("{mbps}M")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredServer {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

/// Parse `avahi-browse -p -r` output. Only IPv4 records are kept, first one per address.
pub fn parse_discovery(output: &str) -> Vec<DiscoveredServer> {
    let mut seen = HashSet::new();
    let mut servers = Vec::new();
    for line in output.lines().filter(|l| l.contains(";IPv4;")) {
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < 4 {
            continue;
        }
        let name = fields[3].replace("\\032", " ").replace("\\.", ".");
        let resolved = fields[0] == "=";
        let from_name = name
            .rsplit_once(' ')
            .map(|(_, last)| last)
            .filter(|ip| looks_like_ipv4(ip));
        let from_record = fields
            .get(7)
            .copied()
            .filter(|ip| resolved && looks_like_ipv4(ip));
        let Some(ip) = from_name.or(from_record).map(str::to_string) else {
            continue;
        };
        if !seen.insert(ip.clone()) {
            continue;
        }
        let port = fields
            .get(8)
            .filter(|_| resolved)
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);
        servers.push(DiscoveredServer { name, ip, port });
    }
    servers
}

fn looks_like_ipv4(text: &str) -> bool {
    text.contains('.') && !text.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_JSON: &str = r#"{"start": {}, "end": {
        "sum_sent": {"bits_per_second": 950000000.0, "retransmits": 3},
        "sum_received": {"bits_per_second": 949000000.0}
    }}"#;

    #[test]
    fn tcp_result_reads_sum_sent() {
        let result = parse_result(TCP_JSON, Protocol::Tcp).unwrap();
        assert_eq!(
            result,
            TestResult::Tcp {
                mbps: 950.0,
                retransmits: 3
            }
        );
        assert_eq!(format_rate(result.mbps()), "950.0Mbps");
    }

    #[test]
    fn udp_result_requires_bandwidth() {
        let json = r#"{"end": {"sum": {"bits_per_second": 10000000, "jitter_ms": 0.0123,
            "lost_percent": 0.5, "lost_packets": 1, "packets": 200}}}"#;
        match parse_result(json, Protocol::Udp).unwrap() {
            TestResult::Udp {
                mbps,
                jitter_ms,
                packets,
                ..
            } => {
                assert_eq!(mbps, 10.0);
                assert_eq!(jitter_ms, 0.0123);
                assert_eq!(packets, 200);
            }
            other => panic!("unexpected {other:?}"),
        }
        let empty = r#"{"end": {"sum": {"bits_per_second": 0}}}"#;
        assert!(parse_result(empty, Protocol::Udp).is_err());
        assert!(parse_result("{\"error\": \"refused\"}", Protocol::Tcp).is_err());
    }

    #[test]
    fn rate_and_bandwidth_formats() {
        assert_eq!(format_rate(0.5), "500.0Kbps");
        assert_eq!(format_rate(2500.0), "2.50Gbps");
        assert_eq!(bandwidth_label(0), "Auto");
        assert_eq!(bandwidth_label(500), "500M");
        assert_eq!(bandwidth_label(2500), "2.5G");
        assert_eq!(bandwidth_label(10000), "10G");
    }

    #[test]
    fn command_line_follows_parameters() {
        let mut params = TestParams {
            server: "10.0.0.2".into(),
            port: 5201,
            protocol: Protocol::Tcp,
            duration_s: 10,
            bandwidth_mbps: 0,
            parallel: 1,
            reverse: false,
        };
        assert_eq!(params.command("iperf3"), "iperf3 -c 10.0.0.2 -p 5201 -t 10 -J");
        params.protocol = Protocol::Udp;
        params.bandwidth_mbps = 100;
        params.parallel = 4;
        params.reverse = true;
        assert_eq!(
            params.command("iperf3"),
            "iperf3 -c 10.0.0.2 -p 5201 -t 10 -J -u -l 9000 -w 1M -b 100m -P 4 -R"
        );
    }

    #[test]
    fn discovery_keeps_ipv4_and_dedups() {
        let out = "\
+;eth0;IPv4;MicroPanel\\032iperf3\\032192\\.168\\.1\\.20;_iperf3._tcp;local
=;eth0;IPv4;MicroPanel\\032iperf3\\032192\\.168\\.1\\.20;_iperf3._tcp;local;pi.local;192.168.1.20;5201;
=;eth0;IPv6;MicroPanel\\032iperf3\\032192\\.168\\.1\\.20;_iperf3._tcp;local;pi.local;fe80::1;5201;
=;eth0;IPv4;lab-server;_iperf3._tcp;local;lab.local;192.168.1.30;5202;
";
        let servers = parse_discovery(out);
        assert_eq!(
            servers,
            vec![
                DiscoveredServer {
                    name: "MicroPanel iperf3 192.168.1.20".into(),
                    ip: "192.168.1.20".into(),
                    port: 5201
                },
                DiscoveredServer {
                    name: "lab-server".into(),
                    ip: "192.168.1.30".into(),
                    port: 5202
                },
            ]
        );
    }
}
