//! Typed argument values and schema-driven field coding.
//!
//! Box values are byte strings; this module converts between them and the
//! typed values declared by a command's schema. [`decode_fields`] validates
//! an inbound box against a field list (missing or malformed fields are a
//! decode error, reported to the peer as `ArgumentDecodeError`);
//! [`encode_fields`] writes typed values into an outbound box in schema
//! order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::spec::{ArgKind, FieldSpec};
use crate::error::{Result, WireError};
use crate::identity::{Certificate, CertificateRequest, HostPort, PeerAddress};
use crate::wire::WireBox;

/// One decoded argument or response value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Integer(i64),
    Str(Bytes),
    Text(String),
    StrList(Vec<Bytes>),
    Address(PeerAddress),
    HostPort(HostPort),
    Cert(Certificate),
    CertReq(CertificateRequest),
}

/// Decoded values of a box, keyed by field name.
#[derive(Debug, Default)]
pub struct ArgValues {
    values: Vec<(&'static str, ArgValue)>,
}

impl ArgValues {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            ArgValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// A non-negative integer field interpreted as a channel id.
    pub fn channel_id(&self, name: &str) -> Option<u64> {
        u64::try_from(self.integer(name)?).ok()
    }

    pub fn str_bytes(&self, name: &str) -> Option<&Bytes> {
        match self.get(name)? {
            ArgValue::Str(b) => Some(b),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ArgValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn str_list(&self, name: &str) -> Option<&[Bytes]> {
        match self.get(name)? {
            ArgValue::StrList(items) => Some(items),
            _ => None,
        }
    }

    pub fn address(&self, name: &str) -> Option<&PeerAddress> {
        match self.get(name)? {
            ArgValue::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn host_port(&self, name: &str) -> Option<&HostPort> {
        match self.get(name)? {
            ArgValue::HostPort(hp) => Some(hp),
            _ => None,
        }
    }

    pub fn certificate(&self, name: &str) -> Option<&Certificate> {
        match self.get(name)? {
            ArgValue::Cert(c) => Some(c),
            _ => None,
        }
    }

    pub fn certificate_request(&self, name: &str) -> Option<&CertificateRequest> {
        match self.get(name)? {
            ArgValue::CertReq(r) => Some(r),
            _ => None,
        }
    }
}

/// Decode one raw box value according to its declared kind.
pub fn decode_value(name: &str, kind: ArgKind, raw: &[u8]) -> Result<ArgValue> {
    let bad = |reason: String| WireError::BadArgument {
        name: name.to_string(),
        reason,
    };

    match kind {
        ArgKind::Integer => {
            let text = std::str::from_utf8(raw)
                .map_err(|_| bad("integer is not UTF-8".into()))?;
            let value: i64 = text
                .parse()
                .map_err(|_| bad(format!("not a decimal integer: {:?}", text)))?;
            Ok(ArgValue::Integer(value))
        }
        ArgKind::Str => Ok(ArgValue::Str(Bytes::copy_from_slice(raw))),
        ArgKind::Text => {
            let text = std::str::from_utf8(raw).map_err(|_| bad("text is not UTF-8".into()))?;
            Ok(ArgValue::Text(text.to_string()))
        }
        ArgKind::StrList => {
            let mut buf = raw;
            let mut items = Vec::new();
            while buf.has_remaining() {
                if buf.remaining() < 2 {
                    return Err(bad("truncated list element length".into()));
                }
                let len = buf.get_u16() as usize;
                if buf.remaining() < len {
                    return Err(bad("truncated list element".into()));
                }
                items.push(Bytes::copy_from_slice(&buf[..len]));
                buf.advance(len);
            }
            Ok(ArgValue::StrList(items))
        }
        ArgKind::Address => {
            let text = std::str::from_utf8(raw).map_err(|_| bad("address is not UTF-8".into()))?;
            let addr = text.parse::<PeerAddress>().map_err(|e| bad(e.to_string()))?;
            Ok(ArgValue::Address(addr))
        }
        ArgKind::HostPort => {
            let text =
                std::str::from_utf8(raw).map_err(|_| bad("host:port is not UTF-8".into()))?;
            let hp = text.parse::<HostPort>().map_err(|e| bad(e.to_string()))?;
            Ok(ArgValue::HostPort(hp))
        }
        ArgKind::Cert => Ok(ArgValue::Cert(Certificate::from_bytes(raw.to_vec()))),
        ArgKind::CertReq => Ok(ArgValue::CertReq(CertificateRequest::from_bytes(
            raw.to_vec(),
        ))),
    }
}

/// Encode one typed value into its box representation.
pub fn encode_value(value: &ArgValue) -> Result<Bytes> {
    match value {
        ArgValue::Integer(i) => Ok(Bytes::from(i.to_string())),
        ArgValue::Str(b) => Ok(b.clone()),
        ArgValue::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        ArgValue::StrList(items) => {
            let mut buf = BytesMut::new();
            for item in items {
                if item.len() > u16::MAX as usize {
                    return Err(WireError::MalformedBox(
                        "list element exceeds 65535 bytes".into(),
                    ));
                }
                buf.put_u16(item.len() as u16);
                buf.put_slice(item);
            }
            Ok(buf.freeze())
        }
        ArgValue::Address(a) => Ok(Bytes::from(a.to_string())),
        ArgValue::HostPort(hp) => Ok(Bytes::from(hp.to_string())),
        ArgValue::Cert(c) => Ok(Bytes::copy_from_slice(c.as_bytes())),
        ArgValue::CertReq(r) => Ok(Bytes::copy_from_slice(r.as_bytes())),
    }
}

/// Decode a box's fields against a schema. Every declared field must be
/// present and well formed.
pub fn decode_fields(schema: &[FieldSpec], bx: &WireBox) -> Result<ArgValues> {
    let mut values = Vec::with_capacity(schema.len());
    for spec in schema {
        let raw = bx
            .get(spec.name)
            .ok_or_else(|| WireError::MissingArgument(spec.name.to_string()))?;
        values.push((spec.name, decode_value(spec.name, spec.kind, raw)?));
    }
    Ok(ArgValues { values })
}

/// Encode typed values into a box in schema order. Every declared field
/// must be supplied.
pub fn encode_fields(
    schema: &[FieldSpec],
    values: &[(&'static str, ArgValue)],
    bx: &mut WireBox,
) -> Result<()> {
    for spec in schema {
        let value = values
            .iter()
            .find(|(name, _)| *name == spec.name)
            .map(|(_, v)| v)
            .ok_or_else(|| WireError::MissingArgument(spec.name.to_string()))?;
        bx.insert(spec.name, encode_value(value)?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::spec::{catalogue, CommandKind};

    fn spec_for(kind: CommandKind) -> crate::command::spec::CommandSpec {
        catalogue()
            .into_iter()
            .find(|s| s.kind == kind)
            .expect("catalogue covers all kinds")
    }

    #[test]
    fn test_integer_roundtrip() {
        let encoded = encode_value(&ArgValue::Integer(-42)).unwrap();
        assert_eq!(&encoded[..], b"-42");
        let decoded = decode_value("id", ArgKind::Integer, &encoded).unwrap();
        assert_eq!(decoded, ArgValue::Integer(-42));
    }

    #[test]
    fn test_integer_rejects_garbage() {
        assert!(decode_value("id", ArgKind::Integer, b"seven").is_err());
        assert!(decode_value("id", ArgKind::Integer, &[0xFF]).is_err());
    }

    #[test]
    fn test_str_list_roundtrip() {
        let list = ArgValue::StrList(vec![
            Bytes::from_static(b"q2q-example"),
            Bytes::from_static(b"q2q-example2"),
        ]);
        let encoded = encode_value(&list).unwrap();
        let decoded = decode_value("protocols", ArgKind::StrList, &encoded).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn test_str_list_empty_and_truncated() {
        assert_eq!(
            decode_value("protocols", ArgKind::StrList, b"").unwrap(),
            ArgValue::StrList(vec![])
        );
        // claims a 5-byte element, provides 2
        assert!(decode_value("protocols", ArgKind::StrList, &[0, 5, b'a', b'b']).is_err());
        assert!(decode_value("protocols", ArgKind::StrList, &[0]).is_err());
    }

    #[test]
    fn test_address_and_host_port() {
        let addr = decode_value("From", ArgKind::Address, b"glyph@divmod.com").unwrap();
        assert_eq!(
            encode_value(&addr).unwrap(),
            Bytes::from_static(b"glyph@divmod.com")
        );

        let hp = decode_value("address", ArgKind::HostPort, b"198.51.100.2:8788").unwrap();
        assert_eq!(
            encode_value(&hp).unwrap(),
            Bytes::from_static(b"198.51.100.2:8788")
        );

        assert!(decode_value("From", ArgKind::Address, b"not-an-address").is_err());
    }

    #[test]
    fn test_decode_fields_for_each_command() {
        // round-trip valid arguments through a box for every command
        for spec in catalogue() {
            let supplied: Vec<(&'static str, ArgValue)> = spec
                .arguments
                .iter()
                .map(|f| (f.name, sample_value(f.kind)))
                .collect();

            let mut bx = WireBox::request(spec.name, Some(1));
            encode_fields(spec.arguments, &supplied, &mut bx).unwrap();

            let decoded = decode_fields(spec.arguments, &bx).unwrap();
            for (name, value) in &supplied {
                assert_eq!(decoded.get(name), Some(value), "{}:{}", spec.name, name);
            }
        }
    }

    fn sample_value(kind: ArgKind) -> ArgValue {
        match kind {
            ArgKind::Integer => ArgValue::Integer(7),
            ArgKind::Str => ArgValue::Str(Bytes::from_static(b"payload")),
            ArgKind::Text => ArgValue::Text("a description".into()),
            ArgKind::StrList => ArgValue::StrList(vec![Bytes::from_static(b"proto")]),
            ArgKind::Address => ArgValue::Address("user@example.com".parse().unwrap()),
            ArgKind::HostPort => ArgValue::HostPort("203.0.113.1:1234".parse().unwrap()),
            ArgKind::Cert => ArgValue::Cert(Certificate::from_bytes(b"cert".to_vec())),
            ArgKind::CertReq => {
                ArgValue::CertReq(CertificateRequest::from_bytes(b"csr".to_vec()))
            }
        }
    }

    #[test]
    fn test_decode_fields_missing_argument() {
        let spec = spec_for(CommandKind::Virtual);
        let bx = WireBox::request("virtual", Some(1));
        let err = decode_fields(spec.arguments, &bx).unwrap_err();
        assert!(matches!(err, WireError::MissingArgument(_)));
    }

    #[test]
    fn test_decode_fields_malformed_argument() {
        let spec = spec_for(CommandKind::Virtual);
        let mut bx = WireBox::request("virtual", Some(1));
        bx.insert("id", &b"not-a-number"[..]).unwrap();
        let err = decode_fields(spec.arguments, &bx).unwrap_err();
        assert!(matches!(err, WireError::BadArgument { .. }));
    }

    #[test]
    fn test_channel_id_accessor() {
        let spec = spec_for(CommandKind::Choke);
        let mut bx = WireBox::request("choke", None);
        bx.insert("id", &b"9"[..]).unwrap();
        let args = decode_fields(spec.arguments, &bx).unwrap();
        assert_eq!(args.channel_id("id"), Some(9));

        let mut bx = WireBox::request("choke", None);
        bx.insert("id", &b"-9"[..]).unwrap();
        let args = decode_fields(spec.arguments, &bx).unwrap();
        assert_eq!(args.channel_id("id"), None);
    }

    #[test]
    fn test_encode_fields_missing_value() {
        let spec = spec_for(CommandKind::Identify);
        let mut bx = WireBox::answer(1);
        let err = encode_fields(spec.response, &[], &mut bx).unwrap_err();
        assert!(matches!(err, WireError::MissingArgument(_)));
    }
}
