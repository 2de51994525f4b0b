//! NetBIOS name codec and the two outbound query templates.

/// Well-known NetBIOS name service port.
pub const NETBIOS_PORT: u16 = 137;

/// Answer record type carrying an address list (name query reply).
pub const RECORD_NB: u16 = 0x0020;
/// Answer record type carrying a node status name table.
pub const RECORD_NBSTAT: u16 = 0x0021;

/// Length of an encoded name on the wire.
pub const ENCODED_NAME_LEN: usize = 32;
/// Offset of the encoded name inside both query templates.
pub const QUERY_NAME_OFFSET: usize = 13;

const NIBBLE_BIAS: u8 = b'A';
const PADDING: [u8; 2] = *b"CA";

/// Expand 16 raw bytes into 32 "half-ASCII" bytes, one letter per nibble.
/// NUL bytes are written as the space encoding `CA`.
pub fn encode_name(raw: &[u8; 16]) -> [u8; ENCODED_NAME_LEN] {
    let mut encoded = [0u8; ENCODED_NAME_LEN];
    for (i, &b) in raw.iter().enumerate() {
        let pair = if b == 0 { PADDING } else { [(b >> 4) + NIBBLE_BIAS, (b & 0x0F) + NIBBLE_BIAS] };
        encoded[i * 2..i * 2 + 2].copy_from_slice(&pair);
    }
    encoded
}

/// Inverse of [`encode_name`]; `CA` decodes back to NUL.
///
/// A space (0x20) also encodes as `CA`, so it comes back as NUL. Names
/// containing spaces do not survive an encode/decode round trip.
pub fn decode_name(encoded: &[u8; ENCODED_NAME_LEN]) -> [u8; 16] {
    let mut raw = [0u8; 16];
    for (i, pair) in encoded.chunks_exact(2).enumerate() {
        if pair == PADDING {
            continue;
        }
        let hi = pair[0].wrapping_sub(NIBBLE_BIAS) & 0x0F;
        let lo = pair[1].wrapping_sub(NIBBLE_BIAS) & 0x0F;
        raw[i] = (hi << 4) | lo;
    }
    raw
}

/// Strip NUL padding and surrounding whitespace from a raw name field.
pub fn trim_name(raw: &[u8]) -> String {
    let kept: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();
    String::from_utf8_lossy(&kept).trim().to_string()
}

pub fn random_xid() -> u16 {
    rand::random()
}

/// Node status request for the wildcard name `*`.
pub fn status_query(xid: u16) -> Vec<u8> {
    let mut q = Vec::with_capacity(50);
    q.extend_from_slice(&xid.to_be_bytes()); // transaction id
    q.extend_from_slice(&0x0000u16.to_be_bytes()); // flags
    q.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    q.push(ENCODED_NAME_LEN as u8);
    // "*" followed by fifteen NULs, nibble encoded.
    q.extend_from_slice(b"CK");
    q.extend_from_slice(&[b'A'; ENCODED_NAME_LEN - 2]);
    q.push(0); // end name
    q.extend_from_slice(&RECORD_NBSTAT.to_be_bytes());
    q.extend_from_slice(&1u16.to_be_bytes()); // class IN
    q
}

/// Name query for `name` (upper-cased, at most 15 bytes).
pub fn name_query(xid: u16, name: &str) -> Vec<u8> {
    let mut raw = [0u8; 16];
    let upper = name.to_uppercase();
    let bytes = upper.as_bytes();
    let n = bytes.len().min(15);
    raw[..n].copy_from_slice(&bytes[..n]);

    let mut q = Vec::with_capacity(50);
    q.extend_from_slice(&xid.to_be_bytes()); // transaction id
    q.extend_from_slice(&0x0100u16.to_be_bytes()); // flags: recursion desired
    q.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    q.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    q.push(ENCODED_NAME_LEN as u8);
    q.extend_from_slice(&encode_name(&raw));
    q.push(0); // end name
    q.extend_from_slice(&RECORD_NB.to_be_bytes());
    q.extend_from_slice(&1u16.to_be_bytes()); // class IN
    q
}
