//! Key file parsing.
//!
//! Key files use the `authorized_keys`-style one-key-per-line layout:
//!
//! ```text
//! # comment
//! ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA… alice@laptop
//! ssh-ed25519-cert-v01@openssh.com AAAAIHNzaC1lZDI1NTE5LWNlcnQt… alice-cert
//! ```
//!
//! The leading type token must agree with the algorithm encoded inside the
//! blob.  Anything after the blob is kept as the key's comment.  Lines are
//! handled as bytes; comments that are not UTF-8 are converted lossily.
//!
//! A single bad line fails the whole load: the daemon refuses to start with a
//! partial key set.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ssh_encoding::{Decode, Encode, Reader};
use ssh_key::public::KeyData;
use ssh_key::{Algorithm, PublicKey};
use tracing::debug;

use crate::error::{KeyFileError, LineError};
use crate::index::fingerprint;
use crate::wire::ListedIdentity;

/// Algorithm-name suffix shared by every OpenSSH certificate type.
pub(crate) const CERT_SUFFIX: &str = "-cert-v01@openssh.com";

/// A certificate read from a key file, with the comment from its line.
///
/// The certificate is kept as the blob it was read from; only the fields
/// needed to index it are decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertEntry {
    /// Certificate encoding, exactly as found in the key file.
    pub blob: Vec<u8>,
    /// Certificate algorithm, e.g. `ssh-ed25519-cert-v01@openssh.com`.
    pub algorithm: String,
    /// The key the certificate was issued over.
    pub signed_key: KeyData,
    pub key_id: String,
    pub comment: String,
}

impl CertEntry {
    /// SHA-256 fingerprint of the key the certificate was issued over.
    pub fn signed_key_fingerprint(&self) -> String {
        fingerprint(&self.signed_key)
    }

    /// The certificate as an entry of an identities answer.
    pub fn listed(&self) -> ListedIdentity {
        ListedIdentity::new(self.blob.clone(), self.comment.clone())
    }
}

/// One parsed key file line.
#[derive(Clone, Debug)]
pub enum KeyRecord {
    /// A bare public key.
    Plain(PublicKey),
    /// An OpenSSH certificate.
    Certificate(CertEntry),
}

impl KeyRecord {
    /// The certificate, if this record is one.
    pub fn as_certificate(&self) -> Option<&CertEntry> {
        match self {
            Self::Plain(_) => None,
            Self::Certificate(entry) => Some(entry),
        }
    }

    /// Fingerprint of the underlying key material.
    ///
    /// For certificates this is the signed key, not the certificate blob.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Plain(key) => fingerprint(key.key_data()),
            Self::Certificate(entry) => entry.signed_key_fingerprint(),
        }
    }
}

/// Load every key file in `paths`, in order.
///
/// Stops at the first file that cannot be opened or parsed.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<KeyRecord>, KeyFileError> {
    let mut records = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let file_name = path.display().to_string();
        let file = File::open(path).map_err(|source| KeyFileError::Io {
            file: file_name.clone(),
            source,
        })?;

        let parsed = parse_keys(BufReader::new(file), &file_name)?;
        debug!(file = %file_name, count = parsed.len(), "loaded key file");
        records.extend(parsed);
    }

    Ok(records)
}

/// Parse all key lines from `reader`.
///
/// `file` is only used to label errors and log lines.
pub fn parse_keys(mut reader: impl BufRead, file: &str) -> Result<Vec<KeyRecord>, KeyFileError> {
    let mut records = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).map_err(|source| KeyFileError::Io {
            file: file.to_string(),
            source,
        })?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let line = buf.trim_ascii();
        if line.is_empty() || line.starts_with(b"#") {
            continue;
        }

        let record = parse_line(line).map_err(|e| e.at(file, line_no))?;
        debug!(file, line = line_no, fingerprint = %record.fingerprint(), "parsed key line");
        records.push(record);
    }

    Ok(records)
}

/// Parse one non-blank, non-comment line.
pub fn parse_line(line: &[u8]) -> Result<KeyRecord, LineError> {
    let (key_type, rest) = next_word(line.trim_ascii());
    if rest.is_empty() {
        return Err(LineError::MissingBlob(String::from_utf8_lossy(key_type).into_owned()));
    }

    let (blob, comment) = next_word(rest);
    let bytes = STANDARD.decode(blob)?;

    let key_type = std::str::from_utf8(key_type).map_err(|_| {
        let lossy = String::from_utf8_lossy(key_type);
        LineError::KeyFormat(format!("key type {lossy:?} is not UTF-8"))
    })?;
    decode_blob(key_type, &bytes, &String::from_utf8_lossy(comment))
}

/// Split off the first whitespace-delimited word.
fn next_word(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(u8::is_ascii_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_ascii()),
        None => (line, &line[..0]),
    }
}

fn decode_blob(key_type: &str, bytes: &[u8], comment: &str) -> Result<KeyRecord, LineError> {
    let mut header = bytes;
    let algorithm = String::decode(&mut header).map_err(|e| format_err("unreadable key blob", e))?;

    if algorithm != key_type {
        return Err(LineError::KeyFormat(format!(
            "declared key type {key_type:?} does not match blob type {algorithm:?}"
        )));
    }

    if algorithm.ends_with(CERT_SUFFIX) {
        let (signed_key, key_id) =
            read_certificate(bytes).map_err(|e| format_err("invalid certificate", e))?;

        Ok(KeyRecord::Certificate(CertEntry {
            blob: bytes.to_vec(),
            algorithm,
            signed_key,
            key_id,
            comment: comment.to_string(),
        }))
    } else {
        let mut reader = bytes;
        let key_data = KeyData::decode(&mut reader).map_err(|e| format_err("invalid public key", e))?;
        let key_data = reader
            .finish(key_data)
            .map_err(|e| format_err("invalid public key", e))?;

        Ok(KeyRecord::Plain(PublicKey::new(key_data, comment)))
    }
}

/// Walk an OpenSSH certificate, returning the signed key and the key ID.
///
/// Every field is checked for presence and framing, but validity times,
/// options and the signature are skipped over uninterpreted.
/// `ssh_key::Certificate` refuses `valid_before` values above `i64::MAX`,
/// which is exactly what `ssh-keygen -V always:forever` writes.
fn read_certificate(bytes: &[u8]) -> ssh_key::Result<(KeyData, String)> {
    let mut reader = bytes;
    let algorithm = Algorithm::new_certificate(&String::decode(&mut reader)?)?;

    reader.drain_prefixed()?; // nonce
    let signed_key = read_key_fields(&algorithm, &mut reader)?;
    let _serial = u64::decode(&mut reader)?;
    let _cert_type = u32::decode(&mut reader)?;
    let key_id = Vec::<u8>::decode(&mut reader)?;
    reader.drain_prefixed()?; // valid principals
    let _valid_after = u64::decode(&mut reader)?;
    let _valid_before = u64::decode(&mut reader)?;
    reader.drain_prefixed()?; // critical options
    reader.drain_prefixed()?; // extensions
    reader.drain_prefixed()?; // reserved
    reader.drain_prefixed()?; // signature key
    reader.drain_prefixed()?; // signature

    let key_id = String::from_utf8_lossy(&key_id).into_owned();
    Ok(reader.finish((signed_key, key_id))?)
}

/// Decode the public key fields embedded in a certificate.
///
/// They are laid out as in a plain key blob minus the leading algorithm
/// name, so the name is put back in front and the result decoded as a key.
fn read_key_fields(algorithm: &Algorithm, reader: &mut &[u8]) -> ssh_key::Result<KeyData> {
    let mut prefixed = Vec::new();
    algorithm.as_str().encode(&mut prefixed)?;
    let header = prefixed.len();
    prefixed.extend_from_slice(reader);

    let mut fields = prefixed.as_slice();
    let key = KeyData::decode(&mut fields)?;
    let consumed = prefixed.len() - fields.len() - header;

    let rest: &[u8] = *reader;
    *reader = &rest[consumed..];
    Ok(key)
}

fn format_err(what: &str, err: impl std::fmt::Display) -> LineError {
    LineError::KeyFormat(format!("{what}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{certificate, encoded, forever_certificate, keypair};
    use ssh_key::Certificate;

    fn parse(text: impl AsRef<[u8]>) -> Result<Vec<KeyRecord>, KeyFileError> {
        parse_keys(text.as_ref(), "test-keys")
    }

    fn key_line(key: &PublicKey) -> String {
        key.to_openssh().expect("encode key")
    }

    fn cert_line(cert: &Certificate) -> String {
        cert.to_openssh().expect("encode certificate")
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let records = parse("\n   \n# a comment\n\t# indented comment\r\n").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn parses_key_and_certificate_in_file_order() {
        let user = keypair(1);
        let ca = keypair(2);
        let cert = certificate(user.public_key(), &ca, "alice");

        let text = format!(
            "# user key\n{} alice@laptop\n\n{} alice-cert\n",
            key_line(user.public_key()),
            cert_line(&cert)
        );
        let records = parse(&text).unwrap();
        assert_eq!(records.len(), 2);

        match &records[0] {
            KeyRecord::Plain(key) => {
                assert_eq!(key.key_data(), user.public_key().key_data());
                assert_eq!(key.comment(), "alice@laptop");
            }
            other => panic!("expected plain key, got {other:?}"),
        }
        match &records[1] {
            KeyRecord::Certificate(entry) => {
                assert_eq!(&entry.signed_key, user.public_key().key_data());
                assert_eq!(entry.blob, encoded(&cert));
                assert_eq!(entry.algorithm, "ssh-ed25519-cert-v01@openssh.com");
                assert_eq!(entry.key_id, "alice");
                assert_eq!(entry.comment, "alice-cert");
            }
            other => panic!("expected certificate, got {other:?}"),
        }

        // Both records resolve to the same underlying key.
        assert_eq!(records[0].fingerprint(), records[1].fingerprint());
    }

    #[test]
    fn forever_valid_certificate_is_accepted() {
        let user = keypair(11);
        let blob = forever_certificate(user.public_key(), &keypair(12), "forever");
        let line = format!("ssh-ed25519-cert-v01@openssh.com {} no-expiry", STANDARD.encode(&blob));

        let records = parse(&line).unwrap();
        let entry = records[0].as_certificate().expect("certificate record");
        assert_eq!(entry.blob, blob);
        assert_eq!(&entry.signed_key, user.public_key().key_data());
        assert_eq!(entry.key_id, "forever");
        assert_eq!(entry.comment, "no-expiry");
    }

    #[test]
    fn truncated_certificate_is_key_format_error() {
        let blob = forever_certificate(keypair(13).public_key(), &keypair(14), "cut");
        let line = format!(
            "ssh-ed25519-cert-v01@openssh.com {}",
            STANDARD.encode(&blob[..blob.len() - 10])
        );
        assert!(matches!(parse(&line), Err(KeyFileError::KeyFormat { line: 1, .. })));
    }

    #[test]
    fn same_blob_gives_same_fingerprint() {
        let line = key_line(keypair(3).public_key());
        let first = parse_line(line.as_bytes()).unwrap();
        let second = parse_line(line.as_bytes()).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert!(first.fingerprint().starts_with("SHA256:"));
    }

    #[test]
    fn comment_is_optional_and_tabs_separate_fields() {
        let key = keypair(4);
        let encoded = key_line(key.public_key());
        let (key_type, rest) = next_word(encoded.as_bytes());
        let (blob, _) = next_word(rest);

        let line = [key_type, b"\t", blob].concat();
        match parse_line(&line).unwrap() {
            KeyRecord::Plain(parsed) => assert_eq!(parsed.comment(), ""),
            other => panic!("expected plain key, got {other:?}"),
        }
    }

    #[test]
    fn non_utf8_comments_do_not_fail_the_file() {
        let key = keypair(15);
        let mut text = b"# r\xe9sum\xe9 keys\n".to_vec();
        text.extend_from_slice(key_line(key.public_key()).as_bytes());
        text.extend_from_slice(b" caf\xe9\n");

        let records = parse(&text).unwrap();
        match &records[..] {
            [KeyRecord::Plain(parsed)] => assert_eq!(parsed.comment(), "caf\u{fffd}"),
            other => panic!("expected one plain key, got {other:?}"),
        }
    }

    #[test]
    fn invalid_base64_fails_whole_file() {
        let good = key_line(keypair(5).public_key());
        let text = format!("{good}\nssh-rsa not-valid-base64!!\n");
        match parse(&text) {
            Err(KeyFileError::Decode { file, line, .. }) => {
                assert_eq!(file, "test-keys");
                assert_eq!(line, 2);
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn missing_blob_is_reported() {
        match parse("ssh-ed25519\n") {
            Err(KeyFileError::MissingBlob { line, key_type, .. }) => {
                assert_eq!(line, 1);
                assert_eq!(key_type, "ssh-ed25519");
            }
            other => panic!("expected missing blob error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_blob_is_key_format_error() {
        let blob = STANDARD.encode(b"definitely not an ssh key");
        match parse(format!("ssh-ed25519 {blob}")) {
            Err(err @ KeyFileError::KeyFormat { .. }) => assert_eq!(err.line(), Some(1)),
            other => panic!("expected key format error, got {other:?}"),
        }
    }

    #[test]
    fn type_token_must_match_blob() {
        let cert = certificate(keypair(6).public_key(), &keypair(7), "bob");
        let line = cert_line(&cert);
        let (_, rest) = next_word(line.as_bytes());

        let mut text = b"ssh-ed25519 ".to_vec();
        text.extend_from_slice(rest);
        match parse(&text) {
            Err(KeyFileError::KeyFormat { reason, .. }) => {
                assert!(reason.contains("does not match"), "unexpected reason: {reason}");
            }
            other => panic!("expected key format error, got {other:?}"),
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let key = keypair(8);
        let mut bytes = encoded(key.public_key().key_data());
        bytes.extend_from_slice(b"junk");

        let line = format!("ssh-ed25519 {}", STANDARD.encode(bytes));
        assert!(matches!(parse(&line), Err(KeyFileError::KeyFormat { .. })));
    }

    #[test]
    fn load_files_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.pub");
        let second = dir.path().join("second.pub");
        let key_a = keypair(9);
        let key_b = keypair(10);
        std::fs::write(&first, key_line(key_a.public_key())).unwrap();
        std::fs::write(&second, format!("# only one\n{}\n", key_line(key_b.public_key()))).unwrap();

        let records = load_files(&[&first, &second]).unwrap();
        let fingerprints: Vec<String> = records.iter().map(KeyRecord::fingerprint).collect();
        assert_eq!(
            fingerprints,
            vec![
                fingerprint(key_a.public_key().key_data()),
                fingerprint(key_b.public_key().key_data()),
            ]
        );
    }

    #[test]
    fn load_files_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.pub");
        match load_files(&[&missing]) {
            Err(err @ KeyFileError::Io { .. }) => {
                assert!(err.file().ends_with("absent.pub"));
                assert_eq!(err.line(), None);
            }
            other => panic!("expected io error, got {other:?}"),
        }
    }
}
