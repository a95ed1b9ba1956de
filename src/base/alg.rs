//! DNSSEC Algorithm Numbers.

use serde::de;
use std::cmp;
use std::fmt;
use std::hash;
use std::str;

//------------ SecAlg -------------------------------------------------------

/// Security Algorithm Numbers.
///
/// These numbers identify the public key algorithm of DNSKEY records and the
/// signature algorithm of RRSIG records. For the currently registered values
/// see the [IANA registration].
///
/// [IANA registration]: http://www.iana.org/assignments/dns-sec-alg-numbers/dns-sec-alg-numbers.xhtml#dns-sec-alg-numbers-1
#[derive(Clone, Copy, Debug)]
pub enum SecAlg {
    /// RSA/MD5
    ///
    /// Deprecated by RFC 3110 due to weaknesses of the MD5 hash algorithm.
    /// Only relevant here because its key tag is computed differently from
    /// every other algorithm.
    RsaMd5,

    /// Diffie-Hellman
    Dh,

    /// DSA/SHA1
    Dsa,

    /// RSA/SHA-1
    RsaSha1,

    /// DSA-NSEC3-SHA1
    ///
    /// An alias for `Dsa` for use within NSEC3 records.
    DsaNsec3Sha1,

    /// RSASHA1-NSEC3-SHA1
    ///
    /// An alias for `RsaSha1` for use within NSEC3 records.
    RsaSha1Nsec3Sha1,

    /// RSA/SHA-256
    ///
    /// Described in RFC 5702. The algorithm the root zone keys use.
    RsaSha256,

    /// RSA/SHA-512
    ///
    /// Described in RFC 5702.
    RsaSha512,

    /// GOST R 34.10-2001
    EccGost,

    /// ECDSA Curve P-256 with SHA-256
    ///
    /// Described in RFC 6605.
    EcdsaP256Sha256,

    /// ECDSA Curve P-384 with SHA-384
    ///
    /// Described in RFC 6605.
    EcdsaP384Sha384,

    /// Ed25519
    ///
    /// Described in RFC 8080.
    Ed25519,

    /// Ed448
    ///
    /// Described in RFC 8080.
    Ed448,

    /// A raw algorithm value given through its integer value.
    Int(u8),
}

impl SecAlg {
    /// Returns the algorithm value for the given integer value.
    pub fn from_int(value: u8) -> SecAlg {
        use self::SecAlg::*;

        match value {
            1 => RsaMd5,
            2 => Dh,
            3 => Dsa,
            5 => RsaSha1,
            6 => DsaNsec3Sha1,
            7 => RsaSha1Nsec3Sha1,
            8 => RsaSha256,
            10 => RsaSha512,
            12 => EccGost,
            13 => EcdsaP256Sha256,
            14 => EcdsaP384Sha384,
            15 => Ed25519,
            16 => Ed448,
            _ => Int(value),
        }
    }

    /// Returns the integer value for this algorithm value.
    pub fn to_int(self) -> u8 {
        use self::SecAlg::*;

        match self {
            RsaMd5 => 1,
            Dh => 2,
            Dsa => 3,
            RsaSha1 => 5,
            DsaNsec3Sha1 => 6,
            RsaSha1Nsec3Sha1 => 7,
            RsaSha256 => 8,
            RsaSha512 => 10,
            EccGost => 12,
            EcdsaP256Sha256 => 13,
            EcdsaP384Sha384 => 14,
            Ed25519 => 15,
            Ed448 => 16,
            Int(value) => value,
        }
    }

    /// Returns whether this is one of the RSA algorithms.
    pub fn is_rsa(self) -> bool {
        matches!(
            SecAlg::from_int(self.to_int()),
            SecAlg::RsaSha1
                | SecAlg::RsaSha1Nsec3Sha1
                | SecAlg::RsaSha256
                | SecAlg::RsaSha512
        )
    }

    /// Returns whether this is one of the ECDSA algorithms.
    pub fn is_ecdsa(self) -> bool {
        matches!(
            SecAlg::from_int(self.to_int()),
            SecAlg::EcdsaP256Sha256 | SecAlg::EcdsaP384Sha384
        )
    }

    /// Returns whether this is one of the DSA algorithms.
    pub fn is_dsa(self) -> bool {
        matches!(
            SecAlg::from_int(self.to_int()),
            SecAlg::Dsa | SecAlg::DsaNsec3Sha1
        )
    }

    /// Returns whether the algorithm number is registered for signing.
    ///
    /// Unknown numbers and the reserved values are not. Documents carrying
    /// them are rejected at parse time.
    pub fn is_known(self) -> bool {
        !matches!(SecAlg::from_int(self.to_int()), SecAlg::Int(_))
    }
}

//--- From

impl From<u8> for SecAlg {
    fn from(value: u8) -> SecAlg {
        SecAlg::from_int(value)
    }
}

impl From<SecAlg> for u8 {
    fn from(value: SecAlg) -> u8 {
        value.to_int()
    }
}

//--- FromStr

impl str::FromStr for SecAlg {
    type Err = FromStrError;

    /// Returns the algorithm value for the given string.
    ///
    /// Recognized are the mnemonics equivalent to the algorithm number not
    /// regarding case as well as decimal integer numbers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use self::SecAlg::*;

        if s.eq_ignore_ascii_case("RSAMD5") {
            Ok(RsaMd5)
        } else if s.eq_ignore_ascii_case("DH") {
            Ok(Dh)
        } else if s.eq_ignore_ascii_case("DSA") {
            Ok(Dsa)
        } else if s.eq_ignore_ascii_case("RSASHA1") {
            Ok(RsaSha1)
        } else if s.eq_ignore_ascii_case("DSA-NSEC3-SHA1") {
            Ok(DsaNsec3Sha1)
        } else if s.eq_ignore_ascii_case("RSASHA1-NSEC3-SHA1") {
            Ok(RsaSha1Nsec3Sha1)
        } else if s.eq_ignore_ascii_case("RSASHA256") {
            Ok(RsaSha256)
        } else if s.eq_ignore_ascii_case("RSASHA512") {
            Ok(RsaSha512)
        } else if s.eq_ignore_ascii_case("ECC-GOST") {
            Ok(EccGost)
        } else if s.eq_ignore_ascii_case("ECDSAP256SHA256") {
            Ok(EcdsaP256Sha256)
        } else if s.eq_ignore_ascii_case("ECDSAP384SHA384") {
            Ok(EcdsaP384Sha384)
        } else if s.eq_ignore_ascii_case("ED25519") {
            Ok(Ed25519)
        } else if s.eq_ignore_ascii_case("ED448") {
            Ok(Ed448)
        } else {
            match u8::from_str(s) {
                Ok(value) => Ok(SecAlg::from_int(value)),
                Err(..) => Err(FromStrError),
            }
        }
    }
}

//--- Display

impl fmt::Display for SecAlg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::SecAlg::*;

        match *self {
            RsaMd5 => "RSAMD5".fmt(f),
            Dh => "DH".fmt(f),
            Dsa => "DSA".fmt(f),
            RsaSha1 => "RSASHA1".fmt(f),
            DsaNsec3Sha1 => "DSA-NSEC3-SHA1".fmt(f),
            RsaSha1Nsec3Sha1 => "RSASHA1-NSEC3-SHA1".fmt(f),
            RsaSha256 => "RSASHA256".fmt(f),
            RsaSha512 => "RSASHA512".fmt(f),
            EccGost => "ECC-GOST".fmt(f),
            EcdsaP256Sha256 => "ECDSAP256SHA256".fmt(f),
            EcdsaP384Sha384 => "ECDSAP384SHA384".fmt(f),
            Ed25519 => "ED25519".fmt(f),
            Ed448 => "ED448".fmt(f),
            Int(value) => match SecAlg::from_int(value) {
                Int(value) => value.fmt(f),
                value => value.fmt(f),
            },
        }
    }
}

//--- PartialEq and Eq

impl PartialEq for SecAlg {
    fn eq(&self, other: &SecAlg) -> bool {
        self.to_int() == other.to_int()
    }
}

impl PartialEq<u8> for SecAlg {
    fn eq(&self, other: &u8) -> bool {
        self.to_int() == *other
    }
}

impl PartialEq<SecAlg> for u8 {
    fn eq(&self, other: &SecAlg) -> bool {
        *self == other.to_int()
    }
}

impl Eq for SecAlg {}

//--- PartialOrd and Ord

impl PartialOrd for SecAlg {
    fn partial_cmp(&self, other: &SecAlg) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SecAlg {
    fn cmp(&self, other: &SecAlg) -> cmp::Ordering {
        self.to_int().cmp(&other.to_int())
    }
}

//--- Hash

impl hash::Hash for SecAlg {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.to_int().hash(state)
    }
}

//--- Deserialize
//
// Configuration files name algorithms by mnemonic; raw integers are
// accepted, too.

impl<'de> de::Deserialize<'de> for SecAlg {
    fn deserialize<D: de::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = SecAlg;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a DNSSEC algorithm mnemonic or number")
            }

            fn visit_str<E: de::Error>(
                self,
                v: &str,
            ) -> Result<Self::Value, E> {
                v.parse().map_err(|_| {
                    E::custom(format!("unknown algorithm '{}'", v))
                })
            }

            fn visit_u64<E: de::Error>(
                self,
                v: u64,
            ) -> Result<Self::Value, E> {
                if v > u8::MAX.into() {
                    return Err(E::custom("algorithm number out of range"));
                }
                Ok(SecAlg::from_int(v as u8))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

//------------ FromStrError --------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FromStrError;

impl fmt::Display for FromStrError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("unknown algorithm")
    }
}

impl std::error::Error for FromStrError {}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn int_round_trip() {
        for value in 0..=255u8 {
            assert_eq!(SecAlg::from_int(value).to_int(), value);
        }
    }

    #[test]
    fn from_str() {
        assert_eq!("RSASHA256".parse(), Ok(SecAlg::RsaSha256));
        assert_eq!("rsasha256".parse(), Ok(SecAlg::RsaSha256));
        assert_eq!("ECDSAP256SHA256".parse(), Ok(SecAlg::EcdsaP256Sha256));
        assert_eq!("8".parse(), Ok(SecAlg::RsaSha256));
        assert_eq!("bogus".parse::<SecAlg>(), Err(FromStrError));
    }

    #[test]
    fn classification() {
        assert!(SecAlg::RsaSha256.is_rsa());
        assert!(!SecAlg::RsaSha256.is_ecdsa());
        assert!(SecAlg::EcdsaP256Sha256.is_ecdsa());
        assert!(SecAlg::from_int(13).is_ecdsa());
        assert!(SecAlg::Dsa.is_dsa());
        assert!(SecAlg::RsaSha256.is_known());
        assert!(!SecAlg::Int(99).is_known());
    }
}
