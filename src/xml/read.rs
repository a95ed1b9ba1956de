//! Parsing KSR/SKR documents.
//!
//! The reader first collects the document into a small element tree, then
//! walks it with helpers that reject anything the schema does not allow.
//! Collecting first keeps the walking code free of event-stream
//! bookkeeping; the documents are a few hundred kilobytes at most.

use super::XmlError;
use crate::base::time::{parse_duration, Timestamp};
use crate::base::{
    AlgorithmPolicy, Bundle, Key, Request, Response, SecAlg, Signature,
    SignaturePolicy, PROTOCOL_DNSSEC,
};
use crate::utils::base64;
use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;

//------------ Entry Points --------------------------------------------------

/// Parses a Key Signing Request.
pub fn parse_request(xml: &str) -> Result<Request, XmlError> {
    let root = read_root(xml)?;
    let (id, serial, domain) = read_header(&root)?;
    let body = single_child(&root)?;
    if body.name != "Request" {
        return Err(XmlError::Schema(format!(
            "expected a Request document, found '{}'",
            body.name
        )));
    }
    let timestamp = read_timestamp_attr(body)?;

    body.check_children(&["RequestPolicy", "RequestBundle"])?;
    let policy = body.single("RequestPolicy")?;
    policy.check_children(&["ZSK"])?;
    let zsk_policy = read_signature_policy(policy.single("ZSK")?)?;

    let mut bundles = Vec::new();
    for elem in body.children("RequestBundle") {
        bundles.push(read_bundle(elem, true)?);
    }
    if bundles.is_empty() {
        return Err(XmlError::Schema(
            "a request carries at least one bundle".to_string(),
        ));
    }

    Ok(Request::new(id, serial, domain, timestamp, zsk_policy, bundles))
}

/// Parses a Signed Key Response.
pub fn parse_response(xml: &str) -> Result<Response, XmlError> {
    let root = read_root(xml)?;
    let (id, serial, domain) = read_header(&root)?;
    let body = single_child(&root)?;
    if body.name != "Response" {
        return Err(XmlError::Schema(format!(
            "expected a Response document, found '{}'",
            body.name
        )));
    }
    let timestamp = read_timestamp_attr(body)?;

    body.check_children(&["ResponsePolicy", "ResponseBundle"])?;
    let policy = body.single("ResponsePolicy")?;
    policy.check_children(&["KSK", "ZSK"])?;
    let ksk_policy = read_signature_policy(policy.single("KSK")?)?;
    let zsk_policy = read_signature_policy(policy.single("ZSK")?)?;

    let mut bundles = Vec::new();
    for elem in body.children("ResponseBundle") {
        bundles.push(read_bundle(elem, false)?);
    }
    if bundles.is_empty() {
        return Err(XmlError::Schema(
            "a response carries at least one bundle".to_string(),
        ));
    }

    Ok(Response::new(
        id, serial, domain, timestamp, ksk_policy, zsk_policy, bundles,
    ))
}

//------------ Document Walking ----------------------------------------------

fn read_root(xml: &str) -> Result<Element, XmlError> {
    let root = Element::parse(xml)?;
    if root.name != "KSR" {
        return Err(XmlError::Schema(format!(
            "expected KSR root element, found '{}'",
            root.name
        )));
    }
    Ok(root)
}

fn read_header(root: &Element) -> Result<(String, u32, String), XmlError> {
    root.check_attrs(&["id", "serial", "domain"])?;
    let id = root.req_attr("id")?.to_string();
    let serial = root
        .req_attr("serial")?
        .parse::<u32>()
        .map_err(|_| XmlError::Schema("bad serial attribute".to_string()))?;
    let domain = root.req_attr("domain")?.to_string();
    Ok((id, serial, domain))
}

fn single_child(root: &Element) -> Result<&Element, XmlError> {
    if root.elements.len() != 1 {
        return Err(XmlError::Schema(
            "KSR carries exactly one Request or Response".to_string(),
        ));
    }
    Ok(&root.elements[0])
}

fn read_timestamp_attr(
    body: &Element,
) -> Result<Option<Timestamp>, XmlError> {
    body.check_attrs(&["timestamp"])?;
    match body.attr("timestamp") {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| {
            XmlError::Schema(format!("bad timestamp '{}'", value))
        }),
    }
}

fn read_signature_policy(
    elem: &Element,
) -> Result<SignaturePolicy, XmlError> {
    elem.check_attrs(&[])?;
    elem.check_children(&[
        "PublishSafety",
        "RetireSafety",
        "MaxSignatureValidity",
        "MinSignatureValidity",
        "MaxValidityOverlap",
        "MinValidityOverlap",
        "SignatureAlgorithm",
    ])?;

    let mut algorithms = Vec::new();
    for alg in elem.children("SignatureAlgorithm") {
        algorithms.push(read_algorithm_policy(alg)?);
    }
    if algorithms.is_empty() {
        return Err(XmlError::Schema(format!(
            "{} policy without a SignatureAlgorithm",
            elem.name
        )));
    }

    Ok(SignaturePolicy::new(
        read_duration(elem.single("PublishSafety")?)?,
        read_duration(elem.single("RetireSafety")?)?,
        read_duration(elem.single("MaxSignatureValidity")?)?,
        read_duration(elem.single("MinSignatureValidity")?)?,
        read_duration(elem.single("MaxValidityOverlap")?)?,
        read_duration(elem.single("MinValidityOverlap")?)?,
        algorithms,
    ))
}

fn read_algorithm_policy(
    elem: &Element,
) -> Result<AlgorithmPolicy, XmlError> {
    elem.check_attrs(&["algorithm"])?;
    let algorithm = read_algorithm_value(elem.req_attr("algorithm")?)?;
    if elem.elements.len() != 1 {
        return Err(XmlError::Schema(
            "SignatureAlgorithm carries exactly one parameter element"
                .to_string(),
        ));
    }
    let params = &elem.elements[0];
    match params.name.as_str() {
        "RSA" => {
            params.check_attrs(&["size", "exponent"])?;
            Ok(AlgorithmPolicy::Rsa {
                algorithm,
                bits: read_attr_int(params, "size")?,
                exponent: read_attr_int(params, "exponent")?,
            })
        }
        "DSA" => {
            params.check_attrs(&["size"])?;
            Ok(AlgorithmPolicy::Dsa {
                algorithm,
                bits: read_attr_int(params, "size")?,
            })
        }
        "ECDSA" => {
            params.check_attrs(&["size"])?;
            Ok(AlgorithmPolicy::Ecdsa {
                algorithm,
                bits: read_attr_int(params, "size")?,
            })
        }
        other => Err(XmlError::Schema(format!(
            "unknown algorithm parameters '{}'",
            other
        ))),
    }
}

fn read_bundle(elem: &Element, request: bool) -> Result<Bundle, XmlError> {
    elem.check_attrs(&["id"])?;
    let id = elem.req_attr("id")?.to_string();
    if request {
        elem.check_children(&[
            "Inception",
            "Expiration",
            "Signer",
            "Key",
            "Signature",
        ])?;
    } else {
        elem.check_children(&["Inception", "Expiration", "Key", "Signature"])?;
    }

    let inception = read_timestamp(elem.single("Inception")?)?;
    let expiration = read_timestamp(elem.single("Expiration")?)?;

    let mut signers = Vec::new();
    for signer in elem.children("Signer") {
        signer.check_attrs(&["keyIdentifier"])?;
        signers.push(signer.req_attr("keyIdentifier")?.to_string());
    }

    let mut keys = Vec::new();
    let mut seen = HashSet::new();
    for key in elem.children("Key") {
        let key = read_key(key)?;
        if !seen.insert(key.key_identifier().to_string()) {
            return Err(XmlError::DuplicateKeyIdentifier {
                bundle_id: id,
                key_identifier: key.key_identifier().to_string(),
            });
        }
        keys.push(key);
    }
    if keys.is_empty() {
        return Err(XmlError::Schema(format!(
            "bundle {} carries no keys",
            id
        )));
    }

    let mut signatures = Vec::new();
    for sig in elem.children("Signature") {
        signatures.push(read_signature(sig)?);
    }
    if signatures.is_empty() {
        return Err(XmlError::Schema(format!(
            "bundle {} carries no signatures",
            id
        )));
    }

    Ok(Bundle::new(id, inception, expiration, keys, signatures, signers))
}

fn read_key(elem: &Element) -> Result<Key, XmlError> {
    elem.check_attrs(&["keyIdentifier", "keyTag"])?;
    elem.check_children(&[
        "TTL",
        "Flags",
        "Protocol",
        "Algorithm",
        "PublicKey",
    ])?;

    let protocol: u8 = read_int(elem.single("Protocol")?)?;
    if protocol != PROTOCOL_DNSSEC {
        return Err(XmlError::Schema(format!(
            "key {} has protocol {}, must be {}",
            elem.req_attr("keyIdentifier")?,
            protocol,
            PROTOCOL_DNSSEC
        )));
    }

    Ok(Key::new(
        elem.req_attr("keyIdentifier")?.to_string(),
        read_attr_int(elem, "keyTag")?,
        read_int(elem.single("TTL")?)?,
        read_int(elem.single("Flags")?)?,
        protocol,
        read_algorithm(elem.single("Algorithm")?)?,
        read_base64(elem.single("PublicKey")?)?,
    ))
}

fn read_signature(elem: &Element) -> Result<Signature, XmlError> {
    elem.check_attrs(&["keyIdentifier"])?;
    elem.check_children(&[
        "TTL",
        "TypeCovered",
        "Algorithm",
        "Labels",
        "OriginalTTL",
        "SignatureInception",
        "SignatureExpiration",
        "KeyTag",
        "SignersName",
        "SignatureData",
    ])?;

    let type_covered = elem.single("TypeCovered")?.text();
    if type_covered != "DNSKEY" {
        return Err(XmlError::Schema(format!(
            "signature covers {}, only DNSKEY is allowed",
            type_covered
        )));
    }

    Ok(Signature::new(
        elem.req_attr("keyIdentifier")?.to_string(),
        read_int(elem.single("TTL")?)?,
        read_algorithm(elem.single("Algorithm")?)?,
        read_int(elem.single("Labels")?)?,
        read_int(elem.single("OriginalTTL")?)?,
        read_timestamp(elem.single("SignatureInception")?)?,
        read_timestamp(elem.single("SignatureExpiration")?)?,
        read_int(elem.single("KeyTag")?)?,
        elem.single("SignersName")?.text().to_string(),
        read_base64(elem.single("SignatureData")?)?,
    ))
}

//------------ Leaf Readers --------------------------------------------------

fn read_int<T: std::str::FromStr>(elem: &Element) -> Result<T, XmlError> {
    elem.text().parse().map_err(|_| {
        XmlError::Schema(format!(
            "bad integer '{}' in {}",
            elem.text(),
            elem.name
        ))
    })
}

fn read_attr_int<T: std::str::FromStr>(
    elem: &Element,
    name: &str,
) -> Result<T, XmlError> {
    elem.req_attr(name)?.parse().map_err(|_| {
        XmlError::Schema(format!(
            "bad integer in attribute {} of {}",
            name, elem.name
        ))
    })
}

fn read_timestamp(elem: &Element) -> Result<Timestamp, XmlError> {
    elem.text().parse().map_err(|_| {
        XmlError::Schema(format!(
            "bad timestamp '{}' in {}",
            elem.text(),
            elem.name
        ))
    })
}

fn read_duration(elem: &Element) -> Result<time::Duration, XmlError> {
    parse_duration(elem.text()).map_err(|_| {
        XmlError::Schema(format!(
            "bad duration '{}' in {}",
            elem.text(),
            elem.name
        ))
    })
}

fn read_base64(elem: &Element) -> Result<Bytes, XmlError> {
    base64::decode(elem.text()).map_err(|err| {
        XmlError::Schema(format!("bad base64 in {}: {}", elem.name, err))
    })
}

fn read_algorithm_value(value: &str) -> Result<SecAlg, XmlError> {
    let number = value.parse::<u8>().map_err(|_| {
        XmlError::Schema(format!("bad algorithm number '{}'", value))
    })?;
    let algorithm = SecAlg::from_int(number);
    if !algorithm.is_known() {
        return Err(XmlError::UnsupportedAlgorithm(number));
    }
    Ok(algorithm)
}

fn read_algorithm(elem: &Element) -> Result<SecAlg, XmlError> {
    read_algorithm_value(elem.text())
}

//------------ Element -------------------------------------------------------

/// One element of the document tree.
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    elements: Vec<Element>,
    text: String,
}

impl Element {
    /// Reads a document and returns its root element.
    fn parse(xml: &str) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|err| XmlError::Malformed(err.to_string()))?;
            match event {
                Event::Start(start) => {
                    if root.is_some() {
                        return Err(XmlError::Malformed(
                            "content after the root element".to_string(),
                        ));
                    }
                    stack.push(Element::from_start(&start)?);
                }
                Event::Empty(start) => {
                    if root.is_some() {
                        return Err(XmlError::Malformed(
                            "content after the root element".to_string(),
                        ));
                    }
                    let elem = Element::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.elements.push(elem),
                        None => root = Some(elem),
                    }
                }
                Event::End(_) => {
                    // quick-xml has already checked tag nesting.
                    let elem = stack.pop().ok_or_else(|| {
                        XmlError::Malformed("unbalanced end tag".to_string())
                    })?;
                    match stack.last_mut() {
                        Some(parent) => parent.elements.push(elem),
                        None => root = Some(elem),
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(|err| {
                        XmlError::Malformed(err.to_string())
                    })?;
                    match stack.last_mut() {
                        Some(elem) => elem.text.push_str(&text),
                        None => {
                            return Err(XmlError::Malformed(
                                "text outside the root element".to_string(),
                            ))
                        }
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8(data.to_vec()).map_err(
                        |_| XmlError::Malformed("bad CDATA".to_string()),
                    )?;
                    match stack.last_mut() {
                        Some(elem) => elem.text.push_str(&text),
                        None => {
                            return Err(XmlError::Malformed(
                                "text outside the root element".to_string(),
                            ))
                        }
                    }
                }
                Event::Decl(_) | Event::Comment(_) | Event::PI(_)
                | Event::DocType(_) => {}
                Event::Eof => break,
                _ => {
                    return Err(XmlError::Malformed(
                        "unsupported XML construct".to_string(),
                    ))
                }
            }
        }

        if !stack.is_empty() {
            return Err(XmlError::Malformed(
                "unexpected end of document".to_string(),
            ));
        }
        root.ok_or_else(|| XmlError::Malformed("empty document".to_string()))
    }

    fn from_start(
        start: &quick_xml::events::BytesStart,
    ) -> Result<Element, XmlError> {
        let name = String::from_utf8(start.name().as_ref().to_vec())
            .map_err(|_| {
                XmlError::Malformed("bad element name".to_string())
            })?;
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr
                .map_err(|err| XmlError::Malformed(err.to_string()))?;
            let key = String::from_utf8(attr.key.as_ref().to_vec())
                .map_err(|_| {
                    XmlError::Malformed("bad attribute name".to_string())
                })?;
            let value = attr
                .unescape_value()
                .map_err(|err| XmlError::Malformed(err.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Element {
            name,
            attrs,
            elements: Vec::new(),
            text: String::new(),
        })
    }

    fn text(&self) -> &str {
        self.text.trim()
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn req_attr(&self, name: &str) -> Result<&str, XmlError> {
        self.attr(name).ok_or_else(|| {
            XmlError::Schema(format!(
                "{} lacks the {} attribute",
                self.name, name
            ))
        })
    }

    fn children<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> {
        self.elements.iter().filter(move |elem| elem.name == name)
    }

    /// Returns the single child with the given name.
    fn single<'a>(&'a self, name: &'a str) -> Result<&'a Element, XmlError> {
        let mut iter = self.children(name);
        let first = iter.next().ok_or_else(|| {
            XmlError::Schema(format!("{} lacks a {}", self.name, name))
        })?;
        if iter.next().is_some() {
            return Err(XmlError::Schema(format!(
                "{} carries more than one {}",
                self.name, name
            )));
        }
        Ok(first)
    }

    /// Rejects child elements outside the allowed set.
    fn check_children(&self, allowed: &[&str]) -> Result<(), XmlError> {
        for elem in &self.elements {
            if !allowed.contains(&elem.name.as_str()) {
                return Err(XmlError::Schema(format!(
                    "unexpected element {} in {}",
                    elem.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// Rejects attributes outside the allowed set.
    fn check_attrs(&self, allowed: &[&str]) -> Result<(), XmlError> {
        for (key, _) in &self.attrs {
            if !allowed.contains(&key.as_str()) {
                return Err(XmlError::Schema(format!(
                    "unexpected attribute {} on {}",
                    key, self.name
                )));
            }
        }
        Ok(())
    }
}

//============ Test ==========================================================
