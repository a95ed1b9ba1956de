//! Emitting KSR/SKR documents.
//!
//! Output is built line by line with a fixed attribute order and two-space
//! indentation. The rendering is part of the external contract: ceremony
//! output is archived and compared textually, so the same document must
//! serialize to the same bytes on every platform and run.

use crate::base::time::fmt_duration;
use crate::base::{
    AlgorithmPolicy, Bundle, Key, Request, Response, Signature,
    SignaturePolicy,
};
use crate::utils::base64;
use quick_xml::escape::escape;
use std::fmt::Write;

/// The column base64 payloads wrap at.
const BASE64_WIDTH: usize = 64;

//------------ Entry Points --------------------------------------------------

/// Serializes a request.
pub fn write_request(request: &Request) -> String {
    let mut out = Out::new();
    out.line(&format!(
        r#"<KSR id="{}" serial="{}" domain="{}">"#,
        escape(request.id()),
        request.serial(),
        escape(request.domain())
    ));
    out.indented(|out| {
        out.open_body("Request", request.timestamp().map(|ts| ts.to_string()));
        out.indented(|out| {
            out.line("<RequestPolicy>");
            out.indented(|out| {
                write_policy(out, "ZSK", request.zsk_policy());
            });
            out.line("</RequestPolicy>");
            for bundle in request.bundles() {
                write_bundle(out, "RequestBundle", bundle, true);
            }
        });
        out.line("</Request>");
    });
    out.line("</KSR>");
    out.finish()
}

/// Serializes a response.
pub fn write_response(response: &Response) -> String {
    let mut out = Out::new();
    out.line(&format!(
        r#"<KSR id="{}" serial="{}" domain="{}">"#,
        escape(response.id()),
        response.serial(),
        escape(response.domain())
    ));
    out.indented(|out| {
        out.open_body(
            "Response",
            response.timestamp().map(|ts| ts.to_string()),
        );
        out.indented(|out| {
            out.line("<ResponsePolicy>");
            out.indented(|out| {
                write_policy(out, "KSK", response.ksk_policy());
                write_policy(out, "ZSK", response.zsk_policy());
            });
            out.line("</ResponsePolicy>");
            for bundle in response.bundles() {
                write_bundle(out, "ResponseBundle", bundle, false);
            }
        });
        out.line("</Response>");
    });
    out.line("</KSR>");
    out.finish()
}

//------------ Sections ------------------------------------------------------

fn write_policy(out: &mut Out, name: &str, policy: &SignaturePolicy) {
    out.line(&format!("<{}>", name));
    out.indented(|out| {
        out.text_element(
            "PublishSafety",
            &fmt_duration(policy.publish_safety()),
        );
        out.text_element(
            "RetireSafety",
            &fmt_duration(policy.retire_safety()),
        );
        out.text_element(
            "MaxSignatureValidity",
            &fmt_duration(policy.max_signature_validity()),
        );
        out.text_element(
            "MinSignatureValidity",
            &fmt_duration(policy.min_signature_validity()),
        );
        out.text_element(
            "MaxValidityOverlap",
            &fmt_duration(policy.max_validity_overlap()),
        );
        out.text_element(
            "MinValidityOverlap",
            &fmt_duration(policy.min_validity_overlap()),
        );
        for algorithm in policy.algorithms() {
            write_algorithm(out, algorithm);
        }
    });
    out.line(&format!("</{}>", name));
}

fn write_algorithm(out: &mut Out, policy: &AlgorithmPolicy) {
    out.line(&format!(
        r#"<SignatureAlgorithm algorithm="{}">"#,
        policy.algorithm().to_int()
    ));
    out.indented(|out| match *policy {
        AlgorithmPolicy::Rsa { bits, exponent, .. } => {
            out.line(&format!(
                r#"<RSA size="{}" exponent="{}"/>"#,
                bits, exponent
            ));
        }
        AlgorithmPolicy::Dsa { bits, .. } => {
            out.line(&format!(r#"<DSA size="{}"/>"#, bits));
        }
        AlgorithmPolicy::Ecdsa { bits, .. } => {
            out.line(&format!(r#"<ECDSA size="{}"/>"#, bits));
        }
    });
    out.line("</SignatureAlgorithm>");
}

fn write_bundle(out: &mut Out, name: &str, bundle: &Bundle, request: bool) {
    out.line(&format!(r#"<{} id="{}">"#, name, escape(bundle.id())));
    out.indented(|out| {
        out.text_element("Inception", &bundle.inception().to_string());
        out.text_element("Expiration", &bundle.expiration().to_string());
        if request {
            for signer in bundle.signers() {
                out.line(&format!(
                    r#"<Signer keyIdentifier="{}"/>"#,
                    escape(signer)
                ));
            }
        }
        for key in bundle.keys() {
            write_key(out, key);
        }
        for sig in bundle.signatures() {
            write_signature(out, sig);
        }
    });
    out.line(&format!("</{}>", name));
}

fn write_key(out: &mut Out, key: &Key) {
    out.line(&format!(
        r#"<Key keyIdentifier="{}" keyTag="{}">"#,
        escape(key.key_identifier()),
        key.key_tag()
    ));
    out.indented(|out| {
        out.text_element("TTL", &key.ttl().to_string());
        out.text_element("Flags", &key.flags().to_string());
        out.text_element("Protocol", &key.protocol().to_string());
        out.text_element(
            "Algorithm",
            &key.algorithm().to_int().to_string(),
        );
        out.base64_element("PublicKey", key.public_key());
    });
    out.line("</Key>");
}

fn write_signature(out: &mut Out, sig: &Signature) {
    out.line(&format!(
        r#"<Signature keyIdentifier="{}">"#,
        escape(sig.key_identifier())
    ));
    out.indented(|out| {
        out.text_element("TTL", &sig.ttl().to_string());
        out.text_element("TypeCovered", "DNSKEY");
        out.text_element(
            "Algorithm",
            &sig.algorithm().to_int().to_string(),
        );
        out.text_element("Labels", &sig.labels().to_string());
        out.text_element("OriginalTTL", &sig.original_ttl().to_string());
        out.text_element(
            "SignatureInception",
            &sig.inception().to_string(),
        );
        out.text_element(
            "SignatureExpiration",
            &sig.expiration().to_string(),
        );
        out.text_element("KeyTag", &sig.key_tag().to_string());
        out.text_element(
            "SignersName",
            escape(sig.signers_name()).as_ref(),
        );
        out.base64_element("SignatureData", sig.signature());
    });
    out.line("</Signature>");
}

//------------ Out -----------------------------------------------------------

/// The output under construction.
struct Out {
    buf: String,
    depth: usize,
}

impl Out {
    fn new() -> Self {
        Out {
            buf: String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"),
            depth: 0,
        }
    }

    fn finish(self) -> String {
        self.buf
    }

    /// Writes one indented line.
    fn line(&mut self, content: &str) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
        self.buf.push_str(content);
        self.buf.push('\n');
    }

    /// Runs `op` with the indentation level raised by one.
    fn indented<F: FnOnce(&mut Self)>(&mut self, op: F) {
        self.depth += 1;
        op(self);
        self.depth -= 1;
    }

    /// Opens the Request/Response element with its optional timestamp.
    fn open_body(&mut self, name: &str, timestamp: Option<String>) {
        match timestamp {
            Some(ts) => {
                self.line(&format!(r#"<{} timestamp="{}">"#, name, ts))
            }
            None => self.line(&format!("<{}>", name)),
        }
    }

    /// Writes `<name>text</name>` on one line.
    fn text_element(&mut self, name: &str, text: &str) {
        self.line(&format!("<{0}>{1}</{0}>", name, text));
    }

    /// Writes an element with wrapped base64 content.
    fn base64_element(&mut self, name: &str, data: &[u8]) {
        let mut indent = String::new();
        for _ in 0..self.depth + 1 {
            indent.push_str("  ");
        }
        let mut line = String::new();
        write!(line, "<{}>", name).unwrap();
        line.push_str(&base64::encode_wrapped(data, BASE64_WIDTH, &indent));
        write!(line, "</{}>", name).unwrap();
        self.line(&line);
    }
}
