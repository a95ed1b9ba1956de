//! Canonical DNSSEC serialization.
//!
//! Everything that ends up under a signature or a digest is produced here:
//! DNSKEY RDATA, canonical owner names, the signed-data form of an RRSIG
//! over a DNSKEY RRset, key tags and DS digests. The rules are those of
//! [RFC 4034], sections 6.1 through 6.3 and appendix B, and [RFC 4035],
//! section 5.3.2.
//!
//! [RFC 4034]: https://tools.ietf.org/html/rfc4034
//! [RFC 4035]: https://tools.ietf.org/html/rfc4035

use super::{Key, SecAlg, Signature};
use bytes::Bytes;
use ring::digest;
use std::cmp::Ordering;
use std::fmt;

/// The DNSKEY record type.
pub const RTYPE_DNSKEY: u16 = 48;

/// The IN class.
pub const CLASS_IN: u16 = 1;

//------------ Names ---------------------------------------------------------

/// Appends the canonical wire form of a domain name.
///
/// Canonical form per RFC 4034, section 6.2: uncompressed, all ASCII
/// letters lowercased. Both `"example."` and `"example"` denote the same
/// absolute name; the root is `"."` or the empty string.
pub fn compose_name(
    name: &str,
    target: &mut Vec<u8>,
) -> Result<(), WireError> {
    let start = target.len();
    for label in name.split('.') {
        if label.is_empty() {
            // Only acceptable for the trailing dot or the root itself.
            continue;
        }
        if label.len() > 63 {
            return Err(WireError::BadName);
        }
        target.push(label.len() as u8);
        target.extend(label.bytes().map(|ch| ch.to_ascii_lowercase()));
    }
    target.push(0);
    if target.len() - start > 255 {
        return Err(WireError::BadName);
    }
    Ok(())
}

/// The number of labels of a name, not counting the root.
///
/// This is the value of the RRSIG labels field for a non-wildcard owner.
pub fn label_count(name: &str) -> u8 {
    name.split('.').filter(|label| !label.is_empty()).count() as u8
}

//------------ DNSKEY RDATA --------------------------------------------------

/// Returns the DNSKEY RDATA of a key.
///
/// `flags(2) || protocol(1) || algorithm(1) || public_key`, network byte
/// order.
pub fn dnskey_rdata(key: &Key) -> Vec<u8> {
    let mut rdata = Vec::with_capacity(4 + key.public_key().len());
    rdata.extend_from_slice(&key.flags().to_be_bytes());
    rdata.push(key.protocol());
    rdata.push(key.algorithm().to_int());
    rdata.extend_from_slice(key.public_key());
    rdata
}

/// Compares two keys by their canonical RDATA byte order.
///
/// This is the order of keys within a canonical RRset.
pub fn canonical_key_cmp(a: &Key, b: &Key) -> Ordering {
    dnskey_rdata(a).cmp(&dnskey_rdata(b))
}

/// Computes the key tag of a key per RFC 4034, appendix B.
///
/// Algorithm 1 keys use the historic exception: the tag is the next to
/// last two octets of the RDATA. Everything else folds a ones-complement
/// style checksum over the RDATA.
pub fn key_tag(key: &Key) -> u16 {
    let rdata = dnskey_rdata(key);
    if key.algorithm() == SecAlg::RsaMd5 {
        if rdata.len() < 3 {
            return 0;
        }
        return u16::from_be_bytes([
            rdata[rdata.len() - 3],
            rdata[rdata.len() - 2],
        ]);
    }

    let mut ac: u32 = 0;
    for (i, &byte) in rdata.iter().enumerate() {
        if i & 1 == 0 {
            ac += u32::from(byte) << 8;
        } else {
            ac += u32::from(byte);
        }
    }
    ac += (ac >> 16) & 0xFFFF;
    (ac & 0xFFFF) as u16
}

/// Computes the SHA-256 DS digest of a key.
///
/// Per RFC 4034, section 5.1.4: the digest of the canonical owner name
/// concatenated with the DNSKEY RDATA.
pub fn ds_digest_sha256(
    owner: &str,
    key: &Key,
) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    compose_name(owner, &mut buf)?;
    buf.extend_from_slice(&dnskey_rdata(key));
    Ok(digest::digest(&digest::SHA256, &buf).as_ref().to_vec())
}

//------------ RRSIG signed data ---------------------------------------------

/// Returns the data a signature signs (or claims to sign).
///
/// Per RFC 4035, section 5.3.2: the RRSIG RDATA with the signature field
/// excluded and the signer's name in canonical form, followed by the
/// canonical RRset, here always the DNSKEY RRset of one bundle, one entry
/// per key, sorted by canonical RDATA order.
pub fn signed_data(
    sig: &Signature,
    keys: &[Key],
) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();

    buf.extend_from_slice(&RTYPE_DNSKEY.to_be_bytes());
    buf.push(sig.algorithm().to_int());
    buf.push(sig.labels());
    buf.extend_from_slice(&sig.original_ttl().to_be_bytes());
    buf.extend_from_slice(&sig.expiration().into_int().to_be_bytes());
    buf.extend_from_slice(&sig.inception().into_int().to_be_bytes());
    buf.extend_from_slice(&sig.key_tag().to_be_bytes());
    compose_name(sig.signers_name(), &mut buf)?;

    let mut rdatas: Vec<Vec<u8>> = keys.iter().map(dnskey_rdata).collect();
    rdatas.sort();

    for rdata in rdatas {
        if rdata.len() > usize::from(u16::MAX) {
            return Err(WireError::LongRdata);
        }
        compose_name(sig.signers_name(), &mut buf)?;
        buf.extend_from_slice(&RTYPE_DNSKEY.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&sig.original_ttl().to_be_bytes());
        buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(&rdata);
    }
    Ok(buf)
}

//------------ RsaPublicKey --------------------------------------------------

/// An RSA public key in its DNSKEY encoding per RFC 3110, section 2.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RsaPublicKey {
    exponent: u64,
    modulus: Bytes,
}

impl RsaPublicKey {
    pub fn new(exponent: u64, modulus: Bytes) -> Self {
        RsaPublicKey { exponent, modulus }
    }

    pub fn exponent(&self) -> u64 {
        self.exponent
    }

    pub fn modulus(&self) -> &Bytes {
        &self.modulus
    }

    /// The size of the modulus in bits.
    pub fn bits(&self) -> u16 {
        (self.modulus.len() * 8) as u16
    }

    /// Parses the DNSKEY public key field of an RSA key.
    pub fn decode(public_key: &[u8]) -> Result<Self, WireError> {
        if public_key.len() < 3 {
            return Err(WireError::BadRsaKey);
        }
        let (exp_len, off) = match public_key[0] {
            0 => (
                usize::from(u16::from_be_bytes([
                    public_key[1],
                    public_key[2],
                ])),
                3,
            ),
            len => (usize::from(len), 1),
        };
        if exp_len == 0 || exp_len > 8 {
            // An exponent above 64 bits is outside anything a signing
            // policy can express.
            return Err(WireError::BadRsaKey);
        }
        if public_key.len() <= off + exp_len {
            return Err(WireError::BadRsaKey);
        }
        let mut exponent: u64 = 0;
        for &byte in &public_key[off..off + exp_len] {
            exponent = exponent << 8 | u64::from(byte);
        }
        Ok(RsaPublicKey {
            exponent,
            modulus: Bytes::copy_from_slice(&public_key[off + exp_len..]),
        })
    }

    /// Encodes the key into the DNSKEY public key field form.
    pub fn encode(&self) -> Bytes {
        let exp = self.exponent.to_be_bytes();
        let skip = exp.iter().take_while(|&&byte| byte == 0).count();
        let exp = &exp[skip.min(exp.len() - 1)..];
        let mut buf = Vec::with_capacity(1 + exp.len() + self.modulus.len());
        buf.push(exp.len() as u8);
        buf.extend_from_slice(exp);
        buf.extend_from_slice(&self.modulus);
        buf.into()
    }

    /// Splits the encoded form into exponent and modulus slices.
    ///
    /// This is the form the verifier wants.
    pub fn split(public_key: &[u8]) -> Result<(&[u8], &[u8]), WireError> {
        if public_key.len() < 3 {
            return Err(WireError::BadRsaKey);
        }
        let (exp_len, off) = match public_key[0] {
            0 => (
                usize::from(u16::from_be_bytes([
                    public_key[1],
                    public_key[2],
                ])),
                3,
            ),
            len => (usize::from(len), 1),
        };
        if exp_len == 0 || public_key.len() <= off + exp_len {
            return Err(WireError::BadRsaKey);
        }
        Ok(public_key[off..].split_at(exp_len))
    }
}

//------------ ECDSA helpers -------------------------------------------------

/// The size in bits of the curve an ECDSA public key point belongs to.
///
/// DNSKEY stores the uncompressed point without the 0x04 marker, so the
/// field is simply `x || y`.
pub fn ecdsa_point_bits(public_key: &[u8]) -> u16 {
    (public_key.len() * 4) as u16
}

//============ Error Types ===================================================

//------------ WireError -----------------------------------------------------

/// A value cannot be canonically serialized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WireError {
    /// A domain name has an over-long label or exceeds 255 octets.
    BadName,

    /// A DNSKEY RDATA exceeds what an RDLENGTH can carry.
    LongRdata,

    /// An RSA public key field does not follow RFC 3110.
    BadRsaKey,
}

//--- Display and Error

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            WireError::BadName => f.write_str("invalid domain name"),
            WireError::LongRdata => f.write_str("record data too long"),
            WireError::BadRsaKey => {
                f.write_str("invalid RSA public key encoding")
            }
        }
    }
}

impl std::error::Error for WireError {}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;
    use crate::base::{FLAG_SEP, FLAG_ZONE, PROTOCOL_DNSSEC};
    use crate::utils::base64;

    // The 2017 root zone KSK ("KSK-2017"), tag 20326.
    const ROOT_KSK_2017: &str = "\
        AwEAAaz/tAm8yTn4Mfeh5eyI96WSVexTBAvkMgJzkKTOiW1vkIbzxeF3+/\
        4RgWOq7HrxRixHlFlExOLAJr5emLvN7SWXgnLh4+B5xQlNVz8Og8kvArMt\
        NROxVQuCaSnIDdD5LKyWbRd2n9WGe2R8PzgCmr3EgVLrjyBxWezF0jLHwV\
        N8efS3rCj/EWgvIWgb9tarpVUDK/b58Da+sqqls3eNbuv7pr+eoZG+SrDK\
        6nWeL3c6H5Apxz7LjVc1uTIdsIXxuOLYA4/ilBmSVIzuDWfdRUfhHdY6+c\
        n8HFRm+2hM8AnXGXws9555KrUB5qihylGa8subX2Nn6UwNR1AkUTV74bU=";

    fn root_ksk() -> Key {
        Key::new(
            "kjqmt7v".to_string(),
            20326,
            172800,
            FLAG_ZONE | FLAG_SEP,
            PROTOCOL_DNSSEC,
            SecAlg::RsaSha256,
            base64::decode(ROOT_KSK_2017).unwrap(),
        )
    }

    #[test]
    fn name_composition() {
        let mut buf = Vec::new();
        compose_name(".", &mut buf).unwrap();
        assert_eq!(buf, b"\0");

        let mut buf = Vec::new();
        compose_name("Example.COM.", &mut buf).unwrap();
        assert_eq!(buf, b"\x07example\x03com\0");

        let mut buf = Vec::new();
        compose_name("example.com", &mut buf).unwrap();
        assert_eq!(buf, b"\x07example\x03com\0");

        let mut buf = Vec::new();
        let long = "a".repeat(64);
        assert_eq!(
            compose_name(&long, &mut buf),
            Err(WireError::BadName)
        );

        assert_eq!(label_count("."), 0);
        assert_eq!(label_count(""), 0);
        assert_eq!(label_count("example.com."), 2);
    }

    #[test]
    fn root_key_tag() {
        assert_eq!(key_tag(&root_ksk()), 20326);
    }

    #[test]
    fn root_ds_digest() {
        // The published root trust anchor DS digest.
        let expected = base64::decode(
            "4G1EuAuPHTmpXAsNfGXQhFjogECbvGg0VxBCN8f47I0=",
        )
        .unwrap();
        assert_eq!(
            ds_digest_sha256(".", &root_ksk()).unwrap(),
            expected.as_ref()
        );
    }

    #[test]
    fn rsa_key_round_trip() {
        let raw = base64::decode(ROOT_KSK_2017).unwrap();
        let key = RsaPublicKey::decode(&raw).unwrap();
        assert_eq!(key.exponent(), 65537);
        assert_eq!(key.bits(), 2048);
        assert_eq!(key.encode(), raw);

        let (e, n) = RsaPublicKey::split(&raw).unwrap();
        assert_eq!(e, &[0x01, 0x00, 0x01]);
        assert_eq!(n.len(), 256);

        assert!(RsaPublicKey::decode(b"").is_err());
        assert!(RsaPublicKey::decode(b"\x03\x01").is_err());
    }

    #[test]
    fn rdata_and_order() {
        let key = root_ksk();
        let rdata = dnskey_rdata(&key);
        assert_eq!(&rdata[..4], &[0x01, 0x01, 3, 8]);
        assert_eq!(rdata.len(), 4 + key.public_key().len());

        let zsk = Key::new(
            "z1".to_string(),
            0,
            172800,
            FLAG_ZONE,
            PROTOCOL_DNSSEC,
            SecAlg::RsaSha256,
            key.public_key().clone(),
        );
        // The ZSK flags field (0x0100) sorts before the KSK one (0x0101).
        assert_eq!(canonical_key_cmp(&zsk, &key), Ordering::Less);
    }

    #[test]
    fn ecdsa_bits() {
        assert_eq!(ecdsa_point_bits(&[0u8; 64]), 256);
        assert_eq!(ecdsa_point_bits(&[0u8; 96]), 384);
    }
}
