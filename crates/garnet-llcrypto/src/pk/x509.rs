//! Minimal X.509 handling: pulling an RSA subject key out of a DER
//! certificate.
//!
//! The link handshake identifies peers by digests of their bare RSA keys,
//! but those keys arrive wrapped in X.509 certificates.  We do not verify
//! certificate chains here (the certificates in question are
//! self-signed or cross-signed blobs whose real authentication happens in
//! the AUTHENTICATE exchange); we only need to find the
//! subjectPublicKeyInfo and decode the key inside it.

use der_parser::ber::{BerObject, BerObjectContent};
use der_parser::der::parse_der;

use crate::pk::rsa::PublicKey;
use crate::{Error, Result};

/// The OID identifying an rsaEncryption subject key.
const RSA_ENCRYPTION_OID: &str = "1.2.840.113549.1.1.1";

/// Extract the subject's RSA public key from a DER-encoded X.509
/// certificate.
///
/// Returns an error if the outer structure is not a certificate, or if
/// the subject key is not an RSA key.
pub fn subject_rsa_key(cert_der: &[u8]) -> Result<PublicKey> {
    let (_, cert) = parse_der(cert_der).map_err(|_| Error::BadDer)?;
    let cert_fields = cert.as_sequence().map_err(|_| Error::BadDer)?;
    // Certificate ::= SEQUENCE { tbsCertificate, signatureAlgorithm, sig }
    let tbs = cert_fields.first().ok_or(Error::BadDer)?;
    let tbs_fields = tbs.as_sequence().map_err(|_| Error::BadDer)?;

    // The subjectPublicKeyInfo is the only tbsCertificate field shaped
    // like SEQUENCE { AlgorithmIdentifier, BIT STRING }, so we scan for it
    // rather than counting past the optional version field.
    tbs_fields
        .iter()
        .find_map(spki_rsa_key)
        .ok_or(Error::BadDer)
}

/// If `obj` is a subjectPublicKeyInfo carrying an rsaEncryption key,
/// decode and return that key.
fn spki_rsa_key(obj: &BerObject<'_>) -> Option<PublicKey> {
    let fields = obj.as_sequence().ok()?;
    if fields.len() != 2 {
        return None;
    }
    let algorithm = fields[0].as_sequence().ok()?;
    let oid = match &algorithm.first()?.content {
        BerObjectContent::OID(oid) => oid,
        _ => return None,
    };
    if oid.to_id_string() != RSA_ENCRYPTION_OID {
        return None;
    }
    let key_bits = fields[1].as_bitstring().ok()?;
    PublicKey::from_der(key_bits.data)
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use hex_literal::hex;

    // A certificate of the kind presented in a link handshake.
    const LINK_CERT: [u8; 585] = hex!(
        "30820245308201aea00302010202084ebee3c7a4cc0a73300d06092a864886f7"
        "0d01010b050030223120301e06035504030c177777772e6473687a6c7869676f"
        "7163367a7a732e636f6d301e170d3137303531353030303030305a170d313830"
        "3530363233353935395a30243122302006035504030c197777772e6779366534"
        "356e68753576627a613337682e6e657430820122300d06092a864886f70d0101"
        "0105000382010f003082010a0282010100a60f46f4ffd5e122dc5e8e7c3c5461"
        "f8dc56da9355f34014f8c7ca6bea26f524559e341d7f86d80cb001dbb61299e1"
        "c42e03b7325949c5b0020d512ff1f3155dc05d4976abadf9bb2a53b25824f490"
        "22eaffa353ae4118ee82993b0d126790252504552f72ca217fc558ab58661611"
        "5424c924f50a86ef1243ad88712181e86f1f951a4a1f577c0e4b997b180ce487"
        "bdee6c6037d30271329f7e88ac22369ead292dccf5d08ff8267f3b43bc305415"
        "ab46738c854da449b0214adee8f05c144e5fae3d28d6c11c022d3cedf5bb1e69"
        "21232113df9896bf64337e04a96cea082505070f1fb96047bb323d7a41624011"
        "26df0efe3b62176d9aaf2bc3aa66c53c0d0203010001300d06092a864886f70d"
        "01010b0500038181003f2d889d1a6fec3c8a919348e3d23c69d390624419e8c6"
        "5f6f0e61e4bb6825aa71a21d5509759490d0b6cfe3c8bdaf9768d85bd7bcd340"
        "cc1380cda9e7fc98e77dc2df17cc667ea6e431d7e9fb304a0c194f7a216f7706"
        "d5a279621ddedd82fc2c0b073ccc71c4295864909f4a63697d3e3b5851417e1d"
        "914fde54b4b124542c"
    );

    #[test]
    fn extracts_rsa_key() {
        let key = subject_rsa_key(&LINK_CERT).unwrap();
        assert_eq!(key.bits(), 2048);
        assert!(key.exponent_is(65537));
    }

    #[test]
    fn rejects_junk() {
        assert!(subject_rsa_key(b"not a certificate").is_err());
        assert!(subject_rsa_key(&[0x30, 0x03, 0x02, 0x01, 0x00]).is_err());
    }
}
