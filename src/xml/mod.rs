//! The KSR/SKR interchange format.
//!
//! Requests and responses travel between the ZSK and KSK operators as XML
//! documents. The reader is strict: every element and attribute is either
//! understood or rejected, integers must be in range, base64 must decode.
//! The writer produces one fixed rendering (stable attribute order,
//! two-space indentation, base64 wrapped at 64 columns) so that two
//! ceremonies' output can be compared with a line diff.

pub mod read;
pub mod write;

use std::fmt;

pub use self::read::{parse_request, parse_response};
pub use self::write::{write_request, write_response};

//============ Error Types ===================================================

//------------ XmlError ------------------------------------------------------

/// A document failed to parse.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum XmlError {
    /// The input is not well-formed XML.
    Malformed(String),

    /// The input is XML but not a KSR/SKR document.
    Schema(String),

    /// An algorithm number outside the signing registry.
    UnsupportedAlgorithm(u8),

    /// Two keys in one bundle share a key identifier.
    DuplicateKeyIdentifier {
        bundle_id: String,
        key_identifier: String,
    },
}

//--- Display and Error

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            XmlError::Malformed(reason) => {
                write!(f, "malformed XML: {}", reason)
            }
            XmlError::Schema(reason) => {
                write!(f, "schema violation: {}", reason)
            }
            XmlError::UnsupportedAlgorithm(value) => {
                write!(f, "unsupported algorithm {}", value)
            }
            XmlError::DuplicateKeyIdentifier {
                bundle_id,
                key_identifier,
            } => {
                write!(
                    f,
                    "duplicate key identifier '{}' in bundle {}",
                    key_identifier, bundle_id
                )
            }
        }
    }
}

impl std::error::Error for XmlError {}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::time::{parse_duration, Timestamp};
    use crate::base::{
        AlgorithmPolicy, Bundle, Key, Request, Response, SecAlg, Signature,
        SignaturePolicy, FLAG_SEP, FLAG_ZONE, PROTOCOL_DNSSEC,
    };
    use bytes::Bytes;

    fn zsk_policy() -> SignaturePolicy {
        SignaturePolicy::new(
            parse_duration("P10D").unwrap(),
            parse_duration("P10D").unwrap(),
            parse_duration("P21D").unwrap(),
            parse_duration("P21D").unwrap(),
            parse_duration("P16D").unwrap(),
            parse_duration("P9D").unwrap(),
            vec![AlgorithmPolicy::Rsa {
                algorithm: SecAlg::RsaSha256,
                bits: 2048,
                exponent: 65537,
            }],
        )
    }

    fn ksk_policy() -> SignaturePolicy {
        SignaturePolicy::new(
            parse_duration("P10D").unwrap(),
            parse_duration("P10D").unwrap(),
            parse_duration("P21D").unwrap(),
            parse_duration("P21D").unwrap(),
            parse_duration("P16D").unwrap(),
            parse_duration("P9D").unwrap(),
            vec![AlgorithmPolicy::Ecdsa {
                algorithm: SecAlg::EcdsaP256Sha256,
                bits: 256,
            }],
        )
    }

    fn key(id: &str, flags: u16) -> Key {
        Key::new(
            id.to_string(),
            4711,
            172800,
            flags,
            PROTOCOL_DNSSEC,
            SecAlg::RsaSha256,
            Bytes::from_static(&[3, 1, 0, 1, 0xAB, 0xCD, 0xEF]),
        )
    }

    fn signature(key_id: &str) -> Signature {
        Signature::new(
            key_id.to_string(),
            172800,
            SecAlg::RsaSha256,
            0,
            172800,
            Timestamp::from_unix(1_514_764_800),
            Timestamp::from_unix(1_516_579_200),
            4711,
            ".".to_string(),
            Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
        )
    }

    fn request() -> Request {
        let bundles = (0..2)
            .map(|i| {
                Bundle::new(
                    format!("bundle-{}", i),
                    Timestamp::from_unix(1_514_764_800 + i * 864_000),
                    Timestamp::from_unix(1_516_579_200 + i * 864_000),
                    vec![key("zsk-1", FLAG_ZONE)],
                    vec![signature("zsk-1")],
                    vec!["hint-1".to_string()],
                )
            })
            .collect();
        Request::new(
            "4fe9bb10-6f6b-4503-8593-000000000001".to_string(),
            3,
            ".".to_string(),
            None,
            zsk_policy(),
            bundles,
        )
    }

    fn response() -> Response {
        let bundles = vec![Bundle::new(
            "bundle-0".to_string(),
            Timestamp::from_unix(1_514_764_800),
            Timestamp::from_unix(1_516_579_200),
            vec![key("zsk-1", FLAG_ZONE), key("ksk-1", FLAG_ZONE | FLAG_SEP)],
            vec![signature("ksk-1")],
            Vec::new(),
        )];
        Response::new(
            "4fe9bb10-6f6b-4503-8593-000000000001".to_string(),
            4,
            ".".to_string(),
            Some(Timestamp::from_unix(1_514_851_200)),
            ksk_policy(),
            zsk_policy(),
            bundles,
        )
    }

    #[test]
    fn request_round_trip() {
        let request = request();
        let xml = write_request(&request);
        assert_eq!(parse_request(&xml).unwrap(), request);
    }

    #[test]
    fn response_round_trip() {
        let response = response();
        let xml = write_response(&response);
        assert_eq!(parse_response(&xml).unwrap(), response);
    }

    #[test]
    fn emission_is_stable() {
        let response = response();
        assert_eq!(write_response(&response), write_response(&response));
    }

    #[test]
    fn emission_wraps_base64() {
        let long_key = Key::new(
            "zsk-long".to_string(),
            1,
            172800,
            FLAG_ZONE,
            PROTOCOL_DNSSEC,
            SecAlg::RsaSha256,
            Bytes::from(vec![0x55u8; 120]),
        );
        let request = Request::new(
            "id".to_string(),
            1,
            ".".to_string(),
            None,
            zsk_policy(),
            vec![Bundle::new(
                "bundle-0".to_string(),
                Timestamp::from_unix(0),
                Timestamp::from_unix(1),
                vec![long_key],
                vec![signature("zsk-long")],
                Vec::new(),
            )],
        );
        let xml = write_request(&request);
        // 120 octets encode to 160 characters, so the payload has to have
        // been split across lines.
        for line in xml.lines() {
            assert!(line.len() <= 90, "line too long: {}", line);
        }
        assert_eq!(parse_request(&xml).unwrap(), request);
    }
}
