//! Parser for inbound name service replies.
//!
//! A reply is a fixed 56 byte header followed by either a node status name table
//! (record type 0x21) or a list of 6 byte address records (record type 0x20).

use crate::codec::{RECORD_NB, RECORD_NBSTAT};
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;

pub const HEADER_LEN: usize = 56;
pub const NAME_RECORD_LEN: usize = 18;
pub const ADDRESS_RECORD_LEN: usize = 6;

/// Name suffix of the workstation/server entry that carries the host name.
pub const SUFFIX_HOST: u8 = 0x20;
/// Name suffix of the messenger entry that carries the logged-in user.
pub const SUFFIX_USER: u8 = 0x03;
/// Name flag bit marking the host's own primary entry.
pub const FLAG_PRIMARY: u16 = 0x0800;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("reply truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
    #[error("question count is {0}, expected 0")]
    UnexpectedQuestions(u16),
    #[error("answer count is 0")]
    NoAnswers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: u16,
    pub flags: u16,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
    pub question_name: [u8; 34],
    pub record_type: u16,
    pub record_class: u16,
    pub record_ttl: u32,
    pub record_length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameRecord {
    pub name: [u8; 15],
    pub suffix: u8,
    pub flags: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRecord {
    pub flags: u16,
    pub address: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Status,
    Name,
    Other(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub header: ReplyHeader,
    pub host_name: Option<[u8; 15]>,
    pub user_name: Option<[u8; 15]>,
    pub names: Vec<NameRecord>,
    pub addresses: Vec<AddressRecord>,
    pub hw_addr: Option<[u8; 6]>,
}

impl Reply {
    pub fn kind(&self) -> ReplyKind {
        match self.header.record_type {
            RECORD_NBSTAT => ReplyKind::Status,
            RECORD_NB => ReplyKind::Name,
            other => ReplyKind::Other(other),
        }
    }

    /// Neither a name table nor an address list came through.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.addresses.is_empty()
    }

    /// `aa:bb:cc:dd:ee:ff`, or `None` when absent or all zero.
    pub fn hw_addr_string(&self) -> Option<String> {
        let hw = self.hw_addr?;
        if hw == [0u8; 6] {
            return None;
        }
        Some(
            hw.iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":"),
        )
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReplyError> {
        if self.remaining() < n {
            return Err(ReplyError::Truncated { needed: n, remaining: self.remaining() });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn skip_rest(&mut self) {
        self.pos = self.buf.len();
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ReplyError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ReplyError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ReplyError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ReplyError> {
        Ok(u32::from_be_bytes(self.array()?))
    }
}

fn read_header(c: &mut Cursor<'_>) -> Result<ReplyHeader, ReplyError> {
    Ok(ReplyHeader {
        xid: c.u16()?,
        flags: c.u16()?,
        question_count: c.u16()?,
        answer_count: c.u16()?,
        authority_count: c.u16()?,
        additional_count: c.u16()?,
        question_name: c.array()?,
        record_type: c.u16()?,
        record_class: c.u16()?,
        record_ttl: c.u32()?,
        record_length: c.u16()?,
    })
}

/// Parse one datagram. Truncated records inside an otherwise valid reply are
/// skipped; the header itself must be complete and carry answers but no questions.
pub fn parse_reply(buf: &[u8]) -> Result<Reply, ReplyError> {
    let mut c = Cursor::new(buf);
    let header = read_header(&mut c)?;
    if header.question_count != 0 {
        return Err(ReplyError::UnexpectedQuestions(header.question_count));
    }
    if header.answer_count == 0 {
        return Err(ReplyError::NoAnswers);
    }

    let mut reply = Reply {
        header,
        host_name: None,
        user_name: None,
        names: Vec::new(),
        addresses: Vec::new(),
        hw_addr: None,
    };

    match reply.kind() {
        ReplyKind::Status => read_name_table(&mut c, &mut reply)?,
        ReplyKind::Name => read_addresses(&mut c, &mut reply),
        ReplyKind::Other(_) => {}
    }
    Ok(reply)
}

fn read_name_table(c: &mut Cursor<'_>, reply: &mut Reply) -> Result<(), ReplyError> {
    let count = c.u8()?;
    for idx in 0..count {
        let record = match c.array::<NAME_RECORD_LEN>() {
            Ok(raw) => NameRecord {
                name: raw[..15].try_into().unwrap_or([0u8; 15]),
                suffix: raw[15],
                flags: u16::from_be_bytes([raw[16], raw[17]]),
            },
            Err(e) => {
                debug!(idx, count, "skipping name record: {}", e);
                c.skip_rest();
                continue;
            }
        };
        match record.suffix {
            SUFFIX_HOST => reply.host_name = Some(record.name),
            SUFFIX_USER => reply.user_name = Some(record.name),
            _ => {}
        }
        reply.names.push(record);
    }
    match c.array::<6>() {
        Ok(hw) => reply.hw_addr = Some(hw),
        Err(e) => debug!("status reply has no hardware address: {}", e),
    }
    Ok(())
}

fn read_addresses(c: &mut Cursor<'_>, reply: &mut Reply) {
    let count = usize::from(reply.header.record_length) / ADDRESS_RECORD_LEN;
    for idx in 0..count {
        match c.array::<ADDRESS_RECORD_LEN>() {
            Ok(raw) => reply.addresses.push(AddressRecord {
                flags: u16::from_be_bytes([raw[0], raw[1]]),
                address: Ipv4Addr::new(raw[2], raw[3], raw[4], raw[5]),
            }),
            Err(e) => debug!(idx, count, "skipping address record: {}", e),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Byte builders for synthetic replies.

    use crate::codec::{RECORD_NB, RECORD_NBSTAT};
    use std::net::Ipv4Addr;

    fn header(record_type: u16, record_length: u16) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&0x1234u16.to_be_bytes()); // xid
        b.extend_from_slice(&0x8400u16.to_be_bytes()); // flags: response, authoritative
        b.extend_from_slice(&0u16.to_be_bytes()); // QDCOUNT
        b.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
        b.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
        b.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
        b.push(0x20);
        b.extend_from_slice(&[b'A'; 32]);
        b.push(0);
        b.extend_from_slice(&record_type.to_be_bytes());
        b.extend_from_slice(&1u16.to_be_bytes()); // class IN
        b.extend_from_slice(&0u32.to_be_bytes()); // ttl
        b.extend_from_slice(&record_length.to_be_bytes());
        b
    }

    pub fn name_entry(name: &str, suffix: u8, flags: u16) -> [u8; 18] {
        let mut e = [b' '; 18];
        let n = name.len().min(15);
        e[..n].copy_from_slice(&name.as_bytes()[..n]);
        e[15] = suffix;
        e[16..].copy_from_slice(&flags.to_be_bytes());
        e
    }

    pub fn status_reply(entries: &[[u8; 18]], hw: [u8; 6]) -> Vec<u8> {
        let len = 1 + entries.len() * 18 + 6;
        let mut b = header(RECORD_NBSTAT, len as u16);
        b.push(entries.len() as u8);
        for e in entries {
            b.extend_from_slice(e);
        }
        b.extend_from_slice(&hw);
        b
    }

    pub fn name_reply(addrs: &[Ipv4Addr]) -> Vec<u8> {
        let mut b = header(RECORD_NB, (addrs.len() * 6) as u16);
        for a in addrs {
            b.extend_from_slice(&0x0000u16.to_be_bytes());
            b.extend_from_slice(&a.octets());
        }
        b
    }

    /// Typical Windows host: workstation, server, user and workgroup entries.
    pub fn windows_status(host: &str, user: &str, group: &str) -> Vec<u8> {
        status_reply(
            &[
                name_entry(host, 0x00, 0x0400),
                name_entry(host, 0x20, 0x0400),
                name_entry(user, 0x03, 0x0400),
                name_entry(group, 0x00, 0x8400),
            ],
            [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
        )
    }
}
