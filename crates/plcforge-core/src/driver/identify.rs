/// Vendor identification by minimal protocol handshake
///
/// Each probe opens a fresh short-lived socket, sends the smallest frame
/// the protocol answers unauthenticated, and accepts on a vendor-specific
/// marker in the reply. Probes run strictly sequentially; the first
/// success wins and a failed probe leaves no state behind.
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::Vendor;

/// Well-known ports per protocol. Overridable so tests can point probes
/// at local fixture listeners.
#[derive(Debug, Clone)]
pub struct IdentifyConfig {
    pub siemens_port: u16,
    pub ethernet_ip_port: u16,
    pub fins_port: u16,
    pub modbus_port: u16,
    pub timeout: Duration,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            siemens_port: 102,
            ethernet_ip_port: 44818,
            fins_port: 9600,
            modbus_port: 502,
            timeout: Duration::from_secs(2),
        }
    }
}

/// COTP connection request (ISO-on-TCP), as S7 engineering tools send it.
const COTP_CONNECT_REQUEST: [u8; 22] = [
    0x03, 0x00, 0x00, 0x16, // TPKT header
    0x11, 0xe0, 0x00, 0x00, // COTP CR
    0x00, 0x01, 0x00, 0xc0, // source ref, class
    0x01, 0x0a, 0xc1, 0x02, // TSAP calling
    0x01, 0x00, 0xc2, 0x02, // TSAP called
    0x01, 0x02,
];

/// EtherNet/IP List Identity request.
const ENIP_LIST_IDENTITY: [u8; 24] = [
    0x63, 0x00, // command: List Identity
    0x00, 0x00, // length
    0x00, 0x00, 0x00, 0x00, // session handle
    0x00, 0x00, 0x00, 0x00, // status
    0x00, 0x00, 0x00, 0x00, // sender context
    0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, // options
];

/// FINS node address assignment request.
const FINS_NODE_ADDRESS: [u8; 20] = [
    0x46, 0x49, 0x4e, 0x53, // "FINS"
    0x00, 0x00, 0x00, 0x0c, // length
    0x00, 0x00, 0x00, 0x00, // command
    0x00, 0x00, 0x00, 0x00, // error code
    0x00, 0x00, 0x00, 0x00, // client node (request assignment)
];

/// Modbus TCP "read device identification" request.
const MODBUS_READ_DEVICE_ID: [u8; 11] = [
    0x00, 0x01, // transaction id
    0x00, 0x00, // protocol id (Modbus)
    0x00, 0x05, // length
    0x01, // unit id
    0x2b, // function: encapsulated interface transport
    0x0e, // MEI type: read device id
    0x01, // basic identification
    0x00, // object id
];

/// Identify the vendor of the controller at `host` by trying each
/// protocol handshake in order. Returns `Vendor::Unknown` when no probe
/// matches; the caller must then supply the vendor explicitly.
pub fn identify_vendor(host: &str, config: &IdentifyConfig) -> Vendor {
    tracing::debug!("identifying vendor at {host}");

    if probe_siemens(host, config.siemens_port, config.timeout) {
        return Vendor::Siemens;
    }
    if probe_allen_bradley(host, config.ethernet_ip_port, config.timeout) {
        return Vendor::AllenBradley;
    }
    if probe_omron(host, config.fins_port, config.timeout) {
        return Vendor::Omron;
    }
    if probe_delta(host, config.modbus_port, config.timeout) {
        return Vendor::Delta;
    }

    tracing::debug!("no handshake matched at {host}");
    Vendor::Unknown
}

fn tcp_exchange(host: &str, port: u16, timeout: Duration, request: &[u8]) -> Option<Vec<u8>> {
    let addr = (host, port).to_socket_addrs().ok()?.next()?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout).ok()?;
    stream.set_read_timeout(Some(timeout)).ok()?;
    stream.set_write_timeout(Some(timeout)).ok()?;
    stream.write_all(request).ok()?;

    let mut buf = [0u8; 1024];
    let n = stream.read(&mut buf).ok()?;
    Some(buf[..n].to_vec())
}

/// Siemens S7: COTP connection confirm starts with the TPKT marker.
fn probe_siemens(host: &str, port: u16, timeout: Duration) -> bool {
    match tcp_exchange(host, port, timeout, &COTP_CONNECT_REQUEST) {
        Some(reply) => reply.len() >= 4 && reply[0..2] == [0x03, 0x00],
        None => false,
    }
}

/// Allen-Bradley: List Identity reply echoes the command byte.
fn probe_allen_bradley(host: &str, port: u16, timeout: Duration) -> bool {
    match tcp_exchange(host, port, timeout, &ENIP_LIST_IDENTITY) {
        Some(reply) => reply.len() >= 24 && reply[0] == 0x63,
        None => false,
    }
}

/// Omron: FINS replies begin with the ASCII magic.
fn probe_omron(host: &str, port: u16, timeout: Duration) -> bool {
    let probe = || -> Option<bool> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.set_read_timeout(Some(timeout)).ok()?;
        socket.send_to(&FINS_NODE_ADDRESS, (host, port)).ok()?;

        let mut buf = [0u8; 1024];
        let (n, _) = socket.recv_from(&mut buf).ok()?;
        Some(n >= 16 && buf[0..4] == *b"FINS")
    };
    probe().unwrap_or(false)
}

/// Delta/Modbus: any reply with protocol id zero indicates a Modbus
/// endpoint, including exception responses.
fn probe_delta(host: &str, port: u16, timeout: Duration) -> bool {
    match tcp_exchange(host, port, timeout, &MODBUS_READ_DEVICE_ID) {
        Some(reply) => reply.len() >= 8 && reply[2..4] == [0x00, 0x00],
        None => false,
    }
}
