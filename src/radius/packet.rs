// src/radius/packet.rs
//! RADIUS wire codec: RFC 2865 (authentication) plus the RFC 3576 dynamic
//! authorization extensions (CoA-Request, Disconnect-Request).

use bytes::{BufMut, BytesMut};
use md5::{Digest, Md5};
use rand::Rng;

use crate::error::BillingError;

pub const HEADER_LEN: usize = 20;
const MAX_ATTR_VALUE: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCode {
    AccessRequest,
    AccessAccept,
    AccessReject,
    AccountingRequest,
    AccountingResponse,
    DisconnectRequest,
    DisconnectAck,
    DisconnectNak,
    CoaRequest,
    CoaAck,
    CoaNak,
}

impl PacketCode {
    pub fn to_u8(self) -> u8 {
        match self {
            PacketCode::AccessRequest => 1,
            PacketCode::AccessAccept => 2,
            PacketCode::AccessReject => 3,
            PacketCode::AccountingRequest => 4,
            PacketCode::AccountingResponse => 5,
            PacketCode::DisconnectRequest => 40,
            PacketCode::DisconnectAck => 41,
            PacketCode::DisconnectNak => 42,
            PacketCode::CoaRequest => 43,
            PacketCode::CoaAck => 44,
            PacketCode::CoaNak => 45,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => PacketCode::AccessRequest,
            2 => PacketCode::AccessAccept,
            3 => PacketCode::AccessReject,
            4 => PacketCode::AccountingRequest,
            5 => PacketCode::AccountingResponse,
            40 => PacketCode::DisconnectRequest,
            41 => PacketCode::DisconnectAck,
            42 => PacketCode::DisconnectNak,
            43 => PacketCode::CoaRequest,
            44 => PacketCode::CoaAck,
            45 => PacketCode::CoaNak,
            _ => return None,
        })
    }
}

// Standard attribute types used by this engine
pub mod attr {
    pub const USER_NAME: u8 = 1;
    pub const USER_PASSWORD: u8 = 2;
    pub const NAS_IP_ADDRESS: u8 = 4;
    pub const FILTER_ID: u8 = 11;
    pub const REPLY_MESSAGE: u8 = 18;
    pub const VENDOR_SPECIFIC: u8 = 26;
    pub const SESSION_TIMEOUT: u8 = 27;
    pub const CALLING_STATION_ID: u8 = 31;
    pub const NAS_IDENTIFIER: u8 = 32;
    pub const ACCT_SESSION_ID: u8 = 44;
    pub const ACCT_TERMINATE_CAUSE: u8 = 49;
    pub const ERROR_CAUSE: u8 = 101;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub typ: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RadiusPacket {
    pub code: PacketCode,
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl RadiusPacket {
    pub fn new(code: PacketCode) -> Self {
        let mut rng = rand::thread_rng();
        let mut authenticator = [0u8; 16];
        // Access-Request carries a random Request Authenticator; CoA and
        // Disconnect overwrite it at encode time (RFC 3576 §3).
        if code == PacketCode::AccessRequest {
            rng.fill(&mut authenticator);
        }

        Self {
            code,
            identifier: rng.gen(),
            authenticator,
            attributes: Vec::new(),
        }
    }

    pub fn add_string(&mut self, typ: u8, value: &str) {
        self.add_bytes(typ, value.as_bytes());
    }

    pub fn add_bytes(&mut self, typ: u8, value: &[u8]) {
        let value = &value[..value.len().min(MAX_ATTR_VALUE)];
        self.attributes.push(Attribute {
            typ,
            value: value.to_vec(),
        });
    }

    pub fn add_u32(&mut self, typ: u8, value: u32) {
        self.add_bytes(typ, &value.to_be_bytes());
    }

    pub fn add_ipv4(&mut self, typ: u8, addr: std::net::Ipv4Addr) {
        self.add_bytes(typ, &addr.octets());
    }

    /// Vendor-Specific (type 26): 4-byte vendor id, then one sub-TLV.
    pub fn add_vsa(&mut self, vendor_id: u32, vsa_type: u8, value: &[u8]) {
        let value = &value[..value.len().min(MAX_ATTR_VALUE - 6)];
        let mut buf = Vec::with_capacity(6 + value.len());
        buf.extend_from_slice(&vendor_id.to_be_bytes());
        buf.push(vsa_type);
        buf.push((value.len() + 2) as u8);
        buf.extend_from_slice(value);
        self.attributes.push(Attribute {
            typ: attr::VENDOR_SPECIFIC,
            value: buf,
        });
    }

    /// Hide and attach User-Password per RFC 2865 §5.2: the padded password
    /// is XORed block-by-block against a chained MD5 keystream of
    /// secret + authenticator.
    pub fn add_user_password(&mut self, password: &str, secret: &str) {
        let hidden = hide_password(password.as_bytes(), secret.as_bytes(), &self.authenticator);
        self.attributes.push(Attribute {
            typ: attr::USER_PASSWORD,
            value: hidden,
        });
    }

    pub fn get_string(&self, typ: u8) -> Option<String> {
        self.attributes
            .iter()
            .find(|a| a.typ == typ)
            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
    }

    fn encoded_len(&self) -> usize {
        HEADER_LEN + self.attributes.iter().map(|a| 2 + a.value.len()).sum::<usize>()
    }

    /// Serialize the packet, computing the Request Authenticator for CoA and
    /// Disconnect requests: MD5(Code + Id + Length + 16 zero octets +
    /// Attributes + Secret).
    pub fn encode(&mut self, secret: &str) -> Vec<u8> {
        if matches!(
            self.code,
            PacketCode::CoaRequest | PacketCode::DisconnectRequest
        ) {
            let zeroed = self.encode_raw([0u8; 16]);
            let mut hasher = Md5::new();
            hasher.update(&zeroed);
            hasher.update(secret.as_bytes());
            self.authenticator.copy_from_slice(&hasher.finalize());
        }

        self.encode_raw(self.authenticator)
    }

    fn encode_raw(&self, authenticator: [u8; 16]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.code.to_u8());
        buf.put_u8(self.identifier);
        buf.put_u16(self.encoded_len() as u16);
        buf.put_slice(&authenticator);
        for a in &self.attributes {
            buf.put_u8(a.typ);
            buf.put_u8((a.value.len() + 2) as u8);
            buf.put_slice(&a.value);
        }
        buf.to_vec()
    }

    pub fn parse(data: &[u8]) -> Result<Self, BillingError> {
        if data.len() < HEADER_LEN {
            return Err(BillingError::InvalidRequest(
                "RADIUS packet shorter than header".to_string(),
            ));
        }

        let code = PacketCode::from_u8(data[0]).ok_or_else(|| {
            BillingError::InvalidRequest(format!("unknown RADIUS code {}", data[0]))
        })?;
        let identifier = data[1];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if length < HEADER_LEN || length > data.len() {
            return Err(BillingError::InvalidRequest(
                "RADIUS length field out of bounds".to_string(),
            ));
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..20]);

        let mut attributes = Vec::new();
        let mut offset = HEADER_LEN;
        while offset + 2 <= length {
            let typ = data[offset];
            let attr_len = data[offset + 1] as usize;
            if attr_len < 2 || offset + attr_len > length {
                return Err(BillingError::InvalidRequest(
                    "malformed RADIUS attribute".to_string(),
                ));
            }
            attributes.push(Attribute {
                typ,
                value: data[offset + 2..offset + attr_len].to_vec(),
            });
            offset += attr_len;
        }

        Ok(Self {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// Validate a Response Authenticator against the request it answers:
    /// MD5(Code + Id + Length + RequestAuth + Attributes + Secret).
    pub fn verify_response(response: &[u8], request_auth: &[u8; 16], secret: &str) -> bool {
        if response.len() < HEADER_LEN {
            return false;
        }

        let mut hasher = Md5::new();
        hasher.update(&response[0..4]);
        hasher.update(request_auth);
        hasher.update(&response[HEADER_LEN..]);
        hasher.update(secret.as_bytes());
        let expected = hasher.finalize();

        expected.as_slice() == &response[4..20]
    }
}

fn hide_password(password: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
    let blocks = password.len().div_ceil(16).max(1);
    let mut padded = vec![0u8; blocks * 16];
    padded[..password.len()].copy_from_slice(password);

    let mut out = Vec::with_capacity(padded.len());
    let mut prev: Vec<u8> = authenticator.to_vec();

    for chunk in padded.chunks(16) {
        let mut hasher = Md5::new();
        hasher.update(secret);
        hasher.update(&prev);
        let key = hasher.finalize();

        let cipher: Vec<u8> = chunk.iter().zip(key.iter()).map(|(p, k)| p ^ k).collect();
        out.extend_from_slice(&cipher);
        prev = cipher;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhide(hidden: &[u8], secret: &[u8], authenticator: &[u8; 16]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut prev: Vec<u8> = authenticator.to_vec();
        for chunk in hidden.chunks(16) {
            let mut hasher = Md5::new();
            hasher.update(secret);
            hasher.update(&prev);
            let key = hasher.finalize();
            out.extend(chunk.iter().zip(key.iter()).map(|(c, k)| c ^ k));
            prev = chunk.to_vec();
        }
        out
    }

    #[test]
    fn test_encode_parse_round_trip() {
        let mut packet = RadiusPacket::new(PacketCode::DisconnectRequest);
        packet.add_string(attr::USER_NAME, "alice@pppoe");
        packet.add_string(attr::ACCT_SESSION_ID, "81723a9f");
        packet.add_u32(attr::SESSION_TIMEOUT, 3600);

        let wire = packet.encode("s3cret");
        let parsed = RadiusPacket::parse(&wire).unwrap();

        assert_eq!(parsed.code, PacketCode::DisconnectRequest);
        assert_eq!(parsed.identifier, packet.identifier);
        assert_eq!(parsed.get_string(attr::USER_NAME).unwrap(), "alice@pppoe");
        assert_eq!(parsed.get_string(attr::ACCT_SESSION_ID).unwrap(), "81723a9f");
        assert_eq!(parsed.attributes.len(), 3);
    }

    #[test]
    fn test_coa_request_authenticator() {
        let mut packet = RadiusPacket::new(PacketCode::CoaRequest);
        packet.add_string(attr::USER_NAME, "bob");
        let wire = packet.encode("secret");

        // Recompute per RFC 3576 §3 over the zero-authenticator image
        let mut zeroed = wire.clone();
        zeroed[4..20].fill(0);
        let mut hasher = Md5::new();
        hasher.update(&zeroed);
        hasher.update(b"secret");
        let expected = hasher.finalize();

        assert_eq!(&wire[4..20], expected.as_slice());
    }

    #[test]
    fn test_password_hiding_round_trip() {
        let auth = [7u8; 16];
        let hidden = hide_password(b"correct horse battery", b"shared", &auth);
        assert_eq!(hidden.len(), 32);

        let recovered = unhide(&hidden, b"shared", &auth);
        assert_eq!(&recovered[..21], b"correct horse battery");
        assert!(recovered[21..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_short_password_pads_to_one_block() {
        let auth = [1u8; 16];
        assert_eq!(hide_password(b"pw", b"s", &auth).len(), 16);
    }

    #[test]
    fn test_response_authenticator_verification() {
        let mut request = RadiusPacket::new(PacketCode::DisconnectRequest);
        request.add_string(attr::ACCT_SESSION_ID, "abc");
        let request_wire = request.encode("secret");
        let request_auth: [u8; 16] = request_wire[4..20].try_into().unwrap();

        // Build the ACK the NAS would send
        let mut ack = RadiusPacket {
            code: PacketCode::DisconnectAck,
            identifier: request.identifier,
            authenticator: [0u8; 16],
            attributes: Vec::new(),
        };
        let mut ack_wire = ack.encode_raw([0u8; 16]);
        let mut hasher = Md5::new();
        hasher.update(&ack_wire[0..4]);
        hasher.update(request_auth);
        hasher.update(&ack_wire[HEADER_LEN..]);
        hasher.update(b"secret");
        ack.authenticator.copy_from_slice(&hasher.finalize());
        ack_wire[4..20].copy_from_slice(&ack.authenticator);

        assert!(RadiusPacket::verify_response(&ack_wire, &request_auth, "secret"));
        assert!(!RadiusPacket::verify_response(&ack_wire, &request_auth, "wrong"));
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert!(RadiusPacket::parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_vsa_encoding() {
        let mut packet = RadiusPacket::new(PacketCode::CoaRequest);
        packet.add_vsa(14988, 8, b"10M/5M");
        let vsa = &packet.attributes[0];
        assert_eq!(vsa.typ, attr::VENDOR_SPECIFIC);
        assert_eq!(&vsa.value[0..4], &14988u32.to_be_bytes());
        assert_eq!(vsa.value[4], 8);
        assert_eq!(vsa.value[5] as usize, 2 + b"10M/5M".len());
        assert_eq!(&vsa.value[6..], b"10M/5M");
    }
}
