//! ONVIF WS-Discovery
//!
//! Sends a SOAP Probe over UDP to the WS-Discovery multicast group and to
//! every local IPv4 broadcast address, then collects `XAddrs` from the
//! ProbeMatches that arrive before the deadline.

use super::xml::extract_xml_values;
use crate::camera::{CameraDescription, CameraType};
use crate::error::Result;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

/// WS-Discovery UDP port
pub const WS_DISCOVERY_PORT: u16 = 3702;

/// WS-Discovery multicast group
pub const WS_DISCOVERY_MULTICAST: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Default RTSP port for discovered devices
pub const RTSP_PORT: u16 = 554;

/// Build a Probe for NetworkVideoTransmitter devices
pub fn probe_message(message_id: Uuid) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope" xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
<e:Header>
<w:MessageID>uuid:{}</w:MessageID>
<w:To e:mustUnderstand="true">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>
<w:Action e:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>
</e:Header>
<e:Body>
<d:Probe><d:Types>dn:NetworkVideoTransmitter</d:Types></d:Probe>
</e:Body>
</e:Envelope>"#,
        message_id
    )
}

/// Parse `ip -o -4 addr show` output into broadcast addresses
pub fn parse_broadcast_addresses(output: &str) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for line in output.lines() {
        // "2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0"
        let mut parts = line.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "brd" {
                if let Some(addr) = parts.next().and_then(|a| a.parse::<Ipv4Addr>().ok()) {
                    if !addrs.contains(&addr) {
                        addrs.push(addr);
                    }
                }
            }
        }
    }
    addrs
}

/// Broadcast address of every local IPv4 interface
pub async fn broadcast_addresses() -> Vec<Ipv4Addr> {
    let output = match Command::new("ip")
        .args(["-o", "-4", "addr", "show"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to list interfaces");
            return Vec::new();
        }
    };

    parse_broadcast_addresses(&String::from_utf8_lossy(&output.stdout))
}

/// Host part of an XAddr such as `http://10.0.0.5:80/onvif/device_service`
pub fn xaddr_host(xaddr: &str) -> Option<String> {
    let rest = xaddr.split_once("://").map(|(_, r)| r).unwrap_or(xaddr);
    let authority = rest.split('/').next()?;
    let authority = authority.rsplit('@').next()?;

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        authority.split(':').next()?
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Camera URI for a discovered device host
pub fn rtsp_uri(host: &str, rtsp_path: &str) -> String {
    format!(
        "rtsp://{}:{}/{}",
        host,
        RTSP_PORT,
        rtsp_path.trim_start_matches('/')
    )
}

/// Unique IPv4 hosts advertised in a ProbeMatches reply
pub fn parse_probe_matches(xml: &str) -> Vec<String> {
    let mut hosts = Vec::new();
    for xaddrs in extract_xml_values(xml, "XAddrs") {
        // space-separated list; prefer the first IPv4 address
        let host = xaddrs
            .split_whitespace()
            .filter_map(xaddr_host)
            .find(|h| h.parse::<Ipv4Addr>().is_ok());
        if let Some(host) = host {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
    }
    hosts
}

/// Run one WS-Discovery round
pub async fn discover_onvif(timeout: Duration, rtsp_path: &str) -> Result<Vec<CameraDescription>> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let probe = probe_message(Uuid::new_v4());
    let mut targets = vec![WS_DISCOVERY_MULTICAST];
    targets.extend(broadcast_addresses().await);

    for target in &targets {
        let addr = SocketAddr::V4(SocketAddrV4::new(*target, WS_DISCOVERY_PORT));
        if let Err(e) = socket.send_to(probe.as_bytes(), addr).await {
            tracing::debug!(target = %addr, error = %e, "WS-Discovery probe send failed");
        }
    }

    let deadline = Instant::now() + timeout;
    let mut hosts = BTreeSet::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, from))) => {
                let reply = String::from_utf8_lossy(&buf[..len]);
                let found = parse_probe_matches(&reply);
                tracing::debug!(from = %from, hosts = ?found, "WS-Discovery reply");
                hosts.extend(found);
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "WS-Discovery receive error");
            }
            Err(_) => break,
        }
    }

    tracing::info!(
        probes_sent = targets.len(),
        cameras_found = hosts.len(),
        "ONVIF discovery finished"
    );

    Ok(hosts
        .into_iter()
        .map(|host| {
            CameraDescription::new(CameraType::Ip, rtsp_uri(&host, rtsp_path))
                .with_name(format!("ONVIF {}", host))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_message_contains_id() {
        let id = Uuid::new_v4();
        let probe = probe_message(id);
        assert!(probe.contains(&format!("uuid:{}", id)));
        assert!(probe.contains("NetworkVideoTransmitter"));
    }

    #[test]
    fn test_parse_broadcast_addresses() {
        let output = "1: lo    inet 127.0.0.1/8 scope host lo\n\
2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0\n\
3: wlan0    inet 10.0.0.7/16 brd 10.0.255.255 scope global dynamic wlan0\n";
        assert_eq!(
            parse_broadcast_addresses(output),
            vec![
                Ipv4Addr::new(192, 168, 1, 255),
                Ipv4Addr::new(10, 0, 255, 255)
            ]
        );
    }

    #[test]
    fn test_xaddr_host() {
        assert_eq!(
            xaddr_host("http://192.168.1.20:8080/onvif/device_service"),
            Some("192.168.1.20".to_string())
        );
        assert_eq!(
            xaddr_host("http://[fe80::1]/onvif/device_service"),
            Some("fe80::1".to_string())
        );
        assert_eq!(xaddr_host("http:///onvif"), None);
    }

    #[test]
    fn test_parse_probe_matches_prefers_ipv4() {
        let reply = r#"<s:Envelope><s:Body><d:ProbeMatches>
<d:ProbeMatch><d:XAddrs>http://[fe80::1]/onvif/device_service http://192.168.1.20/onvif/device_service</d:XAddrs></d:ProbeMatch>
<d:ProbeMatch><d:XAddrs>http://192.168.1.20:80/onvif/device_service</d:XAddrs></d:ProbeMatch>
</d:ProbeMatches></s:Body></s:Envelope>"#;
        assert_eq!(parse_probe_matches(reply), vec!["192.168.1.20"]);
    }

    #[test]
    fn test_rtsp_uri() {
        assert_eq!(rtsp_uri("10.0.0.5", "/onvif1"), "rtsp://10.0.0.5:554/onvif1");
    }
}
