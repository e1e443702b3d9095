//! Types related to binding messages to specific circuits

use zeroize::Zeroizing;

/// Number of bytes of circuit binding material negotiated per circuit.
pub(crate) const CIRC_BINDING_LEN: usize = 20;

/// Cryptographic information used to bind a message to a specific
/// circuit.
///
/// This is the "derivative key data" that a circuit-creation handshake
/// produces alongside the cipher and digest keys: it proves that a
/// message refers to this circuit and was not replayed from another.
/// The legacy handshakes also put it on the wire in their CREATED
/// replies.
///
/// In the protocol specifications, this value is called `KH`.
#[derive(Clone)]
pub struct CircuitBinding(
    // We use a Box here to avoid moves that would bypass the
    // zeroize-on-drop semantics.
    //
    // (This is not super-critical, since the impact of leaking one of
    // these keys is slight, but it's best not to leak them at all.)
    Box<Zeroizing<[u8; CIRC_BINDING_LEN]>>,
);

impl From<[u8; CIRC_BINDING_LEN]> for CircuitBinding {
    fn from(value: [u8; CIRC_BINDING_LEN]) -> Self {
        Self(Box::new(Zeroizing::new(value)))
    }
}

impl TryFrom<&[u8]> for CircuitBinding {
    type Error = crate::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value: &[u8; CIRC_BINDING_LEN] = &value
            .try_into()
            .or(Err(Self::Error::InvalidKDFOutputLength))?;
        Ok(Self::from(*value))
    }
}
