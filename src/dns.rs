//! DNS message parsing and construction.
//!
//! Only what the upstream lookup needs: build a single-question recursive
//! query and pull address records out of the reply.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const HEADER_LEN: usize = 12;

/// Record type A.
pub const TYPE_A: u16 = 1;
/// Record type AAAA.
pub const TYPE_AAAA: u16 = 28;
/// Class IN.
pub const CLASS_IN: u16 = 1;

/// Response code for a name that does not exist.
pub const RCODE_NXDOMAIN: u8 = 3;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_TRUNCATED: u16 = 0x0200;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;

/// A DNS query for one name and record type.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Create a recursive IN-class query.
    pub fn new(id: u16, domain: &str, qtype: u16) -> Self {
        Self {
            id,
            domain: domain.trim_end_matches('.').to_lowercase(),
            qtype,
            qclass: CLASS_IN,
        }
    }

    /// Encode the query to wire format bytes.
    ///
    /// Returns `None` if a label is empty or longer than 63 bytes.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        let mut data = Vec::with_capacity(HEADER_LEN + self.domain.len() + 6);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&FLAG_RECURSION_DESIRED.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        encode_domain(&mut data, &self.domain)?;
        data.extend_from_slice(&self.qtype.to_be_bytes());
        data.extend_from_slice(&self.qclass.to_be_bytes());

        Some(data)
    }
}

/// A parsed DNS reply, reduced to the fields the resolver uses.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub answers: Vec<DnsRecord>,
}

/// A DNS resource record from the answer section.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsRecord {
    /// The address carried by an A or AAAA record.
    pub fn address(&self) -> Option<IpAddr> {
        match (self.rtype, self.rdata.len()) {
            (TYPE_A, 4) => {
                let octets: [u8; 4] = self.rdata[..].try_into().ok()?;
                Some(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            (TYPE_AAAA, 16) => {
                let octets: [u8; 16] = self.rdata[..].try_into().ok()?;
                Some(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            _ => None,
        }
    }
}

impl DnsResponse {
    /// Parse a reply from raw bytes.
    ///
    /// Returns `None` for packets that are not replies or are malformed.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        if flags & FLAG_RESPONSE == 0 {
            return None;
        }

        let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;
        let ancount = u16::from_be_bytes([data[6], data[7]]) as usize;

        let mut pos = HEADER_LEN;

        // Skip question section
        for _ in 0..qdcount {
            pos = skip_name(data, pos)?;
            pos += 4; // QTYPE + QCLASS
        }

        let mut answers = Vec::with_capacity(ancount);
        for _ in 0..ancount {
            pos = skip_name(data, pos)?;
            if pos + 10 > data.len() {
                return None;
            }

            let rtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let class = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
            let ttl = u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
            let rdlength = u16::from_be_bytes([data[pos + 8], data[pos + 9]]) as usize;
            pos += 10;

            if pos + rdlength > data.len() {
                return None;
            }
            answers.push(DnsRecord {
                rtype,
                class,
                ttl,
                rdata: data[pos..pos + rdlength].to_vec(),
            });
            pos += rdlength;
        }

        Some(Self { id, flags, answers })
    }

    /// Response code from the low four bits of the flags.
    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000F) as u8
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TRUNCATED != 0
    }

    /// Addresses of the given record type, in answer order.
    pub fn addresses(&self, qtype: u16) -> impl Iterator<Item = IpAddr> + '_ {
        self.answers
            .iter()
            .filter(move |r| r.rtype == qtype && r.class == CLASS_IN)
            .filter_map(DnsRecord::address)
    }
}

fn encode_domain(buf: &mut Vec<u8>, domain: &str) -> Option<()> {
    for label in domain.split('.') {
        if label.is_empty() || label.len() > 63 {
            return None;
        }
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    Some(())
}

/// Skip an encoded name starting at `pos` (handles compression pointers).
fn skip_name(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let b = *data.get(pos)?;
        if b == 0 {
            return Some(pos + 1);
        }
        if b >= 0xC0 {
            return if pos + 2 <= data.len() { Some(pos + 2) } else { None };
        }
        pos += 1 + b as usize;
    }
}
