//! The messages that channel cells carry.

use super::{BoxedCellBody, CELL_DATA_LEN, ChanCmd, RawCellBody};
use std::net::IpAddr;
use tor_bytes::{
    self, EncodeError, EncodeResult, Error, Readable, Reader, Result, Writeable, Writer,
};

use caret::caret_int;

/// Trait for the 'body' of a channel message: everything after the
/// command byte (and, for variable-length cells, the length field).
pub trait Body: Readable {
    /// Parse a body from `r`, which must be truncated to exactly the
    /// body's bytes.
    fn decode_from_reader(r: &mut Reader<'_>) -> Result<Self> {
        r.extract()
    }
    /// Consume this message and write its body onto `w`.
    ///
    /// No framing, no padding: just the body.
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()>;
}

/// Any message a channel peer may send us.
///
/// One variant per command we implement, plus [`Unrecognized`] for the
/// rest: an unknown command is something to dispatch on (and drop),
/// never a parse error.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum AnyChanMsg {
    /// Fixed-length padding, to be discarded
    Padding(Padding),
    /// Variable-length padding, likewise
    Vpadding(Vpadding),
    /// Circuit creation, in the legacy format (TAP or tagged ntor)
    Create(Create),
    /// Circuit creation with no public-key crypto at all
    CreateFast(CreateFast),
    /// Circuit creation, current format
    Create2(Create2),
    /// Our reply to a Create
    Created(Created),
    /// Our reply to a CreateFast
    CreatedFast(CreatedFast),
    /// Our reply to a Create2
    Created2(Created2),
    /// Onion-encrypted traffic on an established circuit
    Relay(Relay),
    /// Like Relay, but allowed to ask for an extension; rationed
    RelayEarly(RelayEarly),
    /// Circuit teardown
    Destroy(Destroy),
    /// Negotiation: the sender's clock and addresses
    Netinfo(Netinfo),
    /// Negotiation: the link protocol versions the sender speaks
    Versions(Versions),
    /// Negotiation: certificates beyond the transport's own
    Certs(Certs),
    /// Negotiation: unpredictable material plus accepted auth methods
    AuthChallenge(AuthChallenge),
    /// Negotiation: an initiating relay proving its identity
    Authenticate(Authenticate),
    /// Reserved, never acted on
    Authorize(Authorize),
    /// Anything whose command we don't implement
    Unrecognized(Unrecognized),
}

impl crate::chancell::ChanMsg for AnyChanMsg {
    fn cmd(&self) -> ChanCmd {
        use AnyChanMsg::*;
        match self {
            Padding(_) => ChanCmd::PADDING,
            Vpadding(_) => ChanCmd::VPADDING,
            Create(_) => ChanCmd::CREATE,
            CreateFast(_) => ChanCmd::CREATE_FAST,
            Create2(_) => ChanCmd::CREATE2,
            Created(_) => ChanCmd::CREATED,
            CreatedFast(_) => ChanCmd::CREATED_FAST,
            Created2(_) => ChanCmd::CREATED2,
            Relay(_) => ChanCmd::RELAY,
            RelayEarly(_) => ChanCmd::RELAY_EARLY,
            Destroy(_) => ChanCmd::DESTROY,
            Netinfo(_) => ChanCmd::NETINFO,
            Versions(_) => ChanCmd::VERSIONS,
            Certs(_) => ChanCmd::CERTS,
            AuthChallenge(_) => ChanCmd::AUTH_CHALLENGE,
            Authenticate(_) => ChanCmd::AUTHENTICATE,
            Authorize(_) => ChanCmd::AUTHORIZE,
            Unrecognized(m) => m.cmd(),
        }
    }

    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        use AnyChanMsg::*;
        match self {
            Padding(m) => Body::encode_onto(m, w),
            Vpadding(m) => Body::encode_onto(m, w),
            Create(m) => Body::encode_onto(m, w),
            CreateFast(m) => Body::encode_onto(m, w),
            Create2(m) => Body::encode_onto(m, w),
            Created(m) => Body::encode_onto(m, w),
            CreatedFast(m) => Body::encode_onto(m, w),
            Created2(m) => Body::encode_onto(m, w),
            Relay(m) => Body::encode_onto(m, w),
            RelayEarly(m) => Body::encode_onto(m, w),
            Destroy(m) => Body::encode_onto(m, w),
            Netinfo(m) => Body::encode_onto(m, w),
            Versions(m) => Body::encode_onto(m, w),
            Certs(m) => Body::encode_onto(m, w),
            AuthChallenge(m) => Body::encode_onto(m, w),
            Authenticate(m) => Body::encode_onto(m, w),
            Authorize(m) => Body::encode_onto(m, w),
            Unrecognized(m) => m.encode_onto(w),
        }
    }

    fn decode_from_reader(cmd: ChanCmd, r: &mut Reader<'_>) -> Result<Self> {
        Ok(match cmd {
            ChanCmd::PADDING => AnyChanMsg::Padding(Body::decode_from_reader(r)?),
            ChanCmd::VPADDING => AnyChanMsg::Vpadding(Body::decode_from_reader(r)?),
            ChanCmd::CREATE => AnyChanMsg::Create(Body::decode_from_reader(r)?),
            ChanCmd::CREATE_FAST => AnyChanMsg::CreateFast(Body::decode_from_reader(r)?),
            ChanCmd::CREATE2 => AnyChanMsg::Create2(Body::decode_from_reader(r)?),
            ChanCmd::CREATED => AnyChanMsg::Created(Body::decode_from_reader(r)?),
            ChanCmd::CREATED_FAST => AnyChanMsg::CreatedFast(Body::decode_from_reader(r)?),
            ChanCmd::CREATED2 => AnyChanMsg::Created2(Body::decode_from_reader(r)?),
            ChanCmd::RELAY => AnyChanMsg::Relay(Body::decode_from_reader(r)?),
            ChanCmd::RELAY_EARLY => AnyChanMsg::RelayEarly(Body::decode_from_reader(r)?),
            ChanCmd::DESTROY => AnyChanMsg::Destroy(Body::decode_from_reader(r)?),
            ChanCmd::NETINFO => AnyChanMsg::Netinfo(Body::decode_from_reader(r)?),
            ChanCmd::VERSIONS => AnyChanMsg::Versions(Body::decode_from_reader(r)?),
            ChanCmd::CERTS => AnyChanMsg::Certs(Body::decode_from_reader(r)?),
            ChanCmd::AUTH_CHALLENGE => AnyChanMsg::AuthChallenge(Body::decode_from_reader(r)?),
            ChanCmd::AUTHENTICATE => AnyChanMsg::Authenticate(Body::decode_from_reader(r)?),
            ChanCmd::AUTHORIZE => AnyChanMsg::Authorize(Body::decode_from_reader(r)?),
            _ => AnyChanMsg::Unrecognized(Unrecognized::decode_with_cmd(cmd, r)?),
        })
    }
}

/// A Padding message: a full-size cell of nothing.
///
/// Peers send these to blur their traffic patterns, or just to keep a
/// quiet connection from looking dead.  We drop them on arrival.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Padding {}
impl Padding {
    /// Build a padding message.
    pub fn new() -> Self {
        Padding {}
    }
}
impl Body for Padding {
    fn encode_onto<W: Writer + ?Sized>(self, _w: &mut W) -> EncodeResult<()> {
        Ok(())
    }
}
impl Readable for Padding {
    fn take_from(_b: &mut Reader<'_>) -> Result<Self> {
        Ok(Padding {})
    }
}

/// A Vpadding message: padding again, but in a variable-length cell.
///
/// Dropped on arrival, like [`Padding`]; only the length is
/// meaningful.
#[derive(Clone, Debug)]
pub struct Vpadding {
    /// How many zero bytes the body carries.
    len: u16,
}
impl Vpadding {
    /// Build a vpadding message of `len` bytes.
    pub fn new(len: u16) -> Self {
        Vpadding { len }
    }
}
impl Body for Vpadding {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_zeros(self.len as usize);
        Ok(())
    }
}
impl Readable for Vpadding {
    fn take_from(b: &mut Reader<'_>) -> Result<Self> {
        if b.remaining() > u16::MAX as usize {
            return Err(Error::InvalidMessage(
                "Too many bytes in VPADDING cell".into(),
            ));
        }
        Ok(Vpadding {
            len: b.remaining() as u16,
        })
    }
}

/// Declare one of the legacy handshake bodies: a blob whose first
/// `$len` bytes are the handshake, in a cell padded out like any other
/// fixed-length cell.
macro_rules! fixed_len_handshake {
    {
        $(#[$meta:meta])*
        $name:ident , $cmd:ident, $len:ident
    } => {
        $(#[$meta])*
        #[derive(Clone,Debug)]
        pub struct $name {
            /// The handshake bytes themselves.
            handshake: Vec<u8>
        }
        impl $name {
            /// Wrap `handshake` as a message of this kind.
            pub fn new<B>(handshake: B) -> Self
                where B: Into<Vec<u8>>
            {
                let handshake = handshake.into();
                $name { handshake }
            }
            /// Borrow the handshake bytes.
            pub fn handshake(&self) -> &[u8] {
                &self.handshake
            }
            /// Consume this message, keeping only the handshake bytes.
            pub fn into_handshake(self) -> Vec<u8> {
                self.handshake
            }
        }
        impl Body for $name {
            fn encode_onto<W: Writer + ?Sized>(self, w: &mut W)  -> EncodeResult<()> {
                w.write_all(&self.handshake[..]);
                Ok(())
            }
        }
        impl Readable for $name {
            fn take_from(b: &mut Reader<'_>) -> Result<Self> {
                Ok($name {
                    handshake: b.take($len)?.into(),
                })
            }
        }
    }
}

/// Length of the client's half of a TAP handshake: a hybrid-encrypted
/// DH public value.
pub const TAP_C_HANDSHAKE_LEN: usize = 128 + 16 + 42;
/// Length of the relay's TAP reply: a DH public value and a key hash.
pub const TAP_S_HANDSHAKE_LEN: usize = 128 + 20;

/// Length of the client's half of a CREATE_FAST handshake.
pub const FAST_C_HANDSHAKE_LEN: usize = 20;
/// Length of the relay's CREATE_FAST reply.
pub const FAST_S_HANDSHAKE_LEN: usize = 20 + 20;

fixed_len_handshake! {
    /// A Create message asks for a circuit in the oldest format.
    ///
    /// Nominally this carries a TAP onion skin (RSA-1024 plus
    /// DH-1024), but a tagged ntor request can ride in the same space:
    /// the distinction lives in the payload, not the command.  Success
    /// earns a Created reply; failure, a Destroy.
    Create, CREATE, TAP_C_HANDSHAKE_LEN
}
fixed_len_handshake! {
    /// A Created message answers a Create.
    Created, CREATED, TAP_S_HANDSHAKE_LEN
}
fixed_len_handshake! {
    /// A CreateFast message asks for a circuit without any public-key
    /// cryptography, so it proves nothing about who is asking.
    ///
    /// That is tolerable only for the first hop, where the encrypted
    /// transport already protects the exchange.  Success earns a
    /// CreatedFast reply; failure, a Destroy.
    CreateFast, CREATE_FAST, FAST_C_HANDSHAKE_LEN
}
fixed_len_handshake! {
    /// A CreatedFast message answers a CreateFast.
    CreatedFast, CREATED_FAST, FAST_S_HANDSHAKE_LEN
}

caret_int! {
    /// Handshake type, corresponding to `HTYPE` in a CREATE2 cell.
    pub struct HandshakeType(u16) {
        /// The original Tor handshake, based on RSA-1024 and DH-1024.
        TAP = 0,

        // 1 is reserved

        /// The ntor+curve25519+sha256 handshake.
        NTOR = 2,
        /// ntor extended with extra data.  Not supported here.
        NTOR_V3 = 3,
    }
}

/// A Create2 message asks for a circuit in the current format: an
/// explicit handshake type, a length, and the handshake itself.
///
/// In practice nearly every Create2 carries an ntor request.  Success
/// earns a Created2 reply; failure, a Destroy.
#[derive(Clone, Debug)]
pub struct Create2 {
    /// Which kind of handshake the body holds.
    handshake_type: HandshakeType,
    /// The handshake bytes themselves.
    handshake: Vec<u8>,
}
impl Body for Create2 {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_u16(self.handshake_type.into());
        let handshake_len = self
            .handshake
            .len()
            .try_into()
            .map_err(|_| EncodeError::BadLengthValue)?;
        w.write_u16(handshake_len);
        w.write_all(&self.handshake[..]);
        Ok(())
    }
}
impl Readable for Create2 {
    fn take_from(b: &mut Reader<'_>) -> Result<Self> {
        let handshake_type = HandshakeType::from(b.take_u16()?);
        let hlen = b.take_u16()?;
        let handshake = b.take(hlen as usize)?.into();
        Ok(Create2 {
            handshake_type,
            handshake,
        })
    }
}
impl Create2 {
    /// Wrap `handshake` as a Create2 request of the given type.
    pub fn new<B>(handshake_type: HandshakeType, handshake: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        let handshake = handshake.into();
        Create2 {
            handshake_type,
            handshake,
        }
    }

    /// Return which kind of handshake this request carries.
    pub fn handshake_type(&self) -> HandshakeType {
        self.handshake_type
    }

    /// Borrow the handshake bytes.
    pub fn body(&self) -> &[u8] {
        &self.handshake[..]
    }
}

/// A Created2 message answers a Create2 whose handshake we could
/// service, carrying the relay's half of the exchange.
#[derive(Clone, Debug)]
pub struct Created2 {
    /// The relay's handshake reply.
    handshake: Vec<u8>,
}
impl Created2 {
    /// Wrap `handshake` as a Created2 reply.
    pub fn new<B>(handshake: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        let handshake = handshake.into();
        Created2 { handshake }
    }
    /// Consume this message, keeping only the handshake reply.
    pub fn into_body(self) -> Vec<u8> {
        self.handshake
    }
}
impl Body for Created2 {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        let handshake_len = self
            .handshake
            .len()
            .try_into()
            .map_err(|_| EncodeError::BadLengthValue)?;
        w.write_u16(handshake_len);
        w.write_all(&self.handshake[..]);
        Ok(())
    }
}
impl Readable for Created2 {
    fn take_from(b: &mut Reader<'_>) -> Result<Self> {
        let hlen = b.take_u16()?;
        let handshake = b.take(hlen as usize)?.into();
        Ok(Created2 { handshake })
    }
}

/// A Relay message: the payload unit of an established circuit.
///
/// From the channel's point of view the body is an opaque,
/// onion-encrypted block: every hop strips one layer of encryption and
/// then either "recognizes" the result as its own or sends it onward.
/// The cleartext layout, once recognized, is the business of
/// [`crate::relaycell`].
#[derive(Clone)]
pub struct Relay {
    /// The relay cell body, exactly as it travels inside the cell.
    body: BoxedCellBody,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The body is ciphertext (or worse, cleartext); don't dump it.
        f.debug_struct("Relay").finish_non_exhaustive()
    }
}

impl Relay {
    /// Build a Relay message around `data`, zero-padding it out to the
    /// full cell length.
    pub fn new<P: AsRef<[u8]>>(data: P) -> Self {
        let data = data.as_ref();
        let mut body: RawCellBody = [0_u8; CELL_DATA_LEN];
        body[..data.len()].copy_from_slice(data);
        Relay {
            body: Box::new(body),
        }
    }

    /// Consume this message and return its body, ready for the crypto
    /// layer.
    pub fn into_relay_body(self) -> BoxedCellBody {
        self.body
    }

    /// Consume this message and rewrap it as a RELAY_EARLY.
    pub fn into_early(self) -> AnyChanMsg {
        AnyChanMsg::RelayEarly(RelayEarly(self))
    }
}

impl From<BoxedCellBody> for Relay {
    fn from(body: BoxedCellBody) -> Self {
        Relay { body }
    }
}

impl Body for Relay {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_all(&self.body[..]);
        Ok(())
    }
}
impl Readable for Relay {
    fn take_from(b: &mut Reader<'_>) -> Result<Self> {
        let body: RawCellBody = b.extract()?;
        Ok(Relay {
            body: Box::new(body),
        })
    }
}

/// A Relay message that is allowed to carry a circuit-extension
/// request.
///
/// Only a handful of these may arrive on any one circuit; the circuit
/// layer enforces the cap.
#[derive(Clone, Debug)]
pub struct RelayEarly(Relay);

impl From<Relay> for RelayEarly {
    fn from(r: Relay) -> Self {
        RelayEarly(r)
    }
}

impl RelayEarly {
    /// Consume this message and return its body, ready for the crypto
    /// layer.
    pub fn into_relay_body(self) -> BoxedCellBody {
        self.0.body
    }
}

impl Body for RelayEarly {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        self.0.encode_onto(w)
    }
}
impl Readable for RelayEarly {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(RelayEarly(r.extract()?))
    }
}

/// A Destroy message tears one circuit down.
///
/// It carries a one-byte reason code.  The reason is worth logging,
/// but a circuit goes away the same way no matter what the code says,
/// and an unlisted code is not an error.
#[derive(Clone, Debug)]
pub struct Destroy {
    /// Why the circuit is going away.
    reason: DestroyReason,
}
impl Destroy {
    /// Build a destroy message carrying `reason`.
    pub fn new(reason: DestroyReason) -> Self {
        Destroy { reason }
    }
    /// Return the advertised reason for tearing the circuit down.
    pub fn reason(&self) -> DestroyReason {
        self.reason
    }
}
impl Body for Destroy {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_u8(self.reason.into());
        Ok(())
    }
}
impl Readable for Destroy {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Destroy {
            reason: r.take_u8()?.into(),
        })
    }
}

caret_int! {
    /// A code explaining why a circuit was destroyed.
    ///
    /// Only relays report real reasons; clients send NONE for
    /// everything, so as not to leak what went wrong on their side.
    pub struct DestroyReason(u8) {
        /// No reason given (what clients always send)
        NONE = 0,
        /// The peer broke the protocol on this circuit
        PROTOCOL = 1,
        /// Something went wrong inside the relay
        INTERNAL = 2,
        /// The circuit's owner asked for it to be closed
        REQUESTED = 3,
        /// The relay is asleep and not taking work
        HIBERNATING = 4,
        /// Out of memory, sockets, or circuit ids
        RESOURCELIMIT = 5,
        /// The next relay could not be reached
        CONNECTFAILED = 6,
        /// The next relay was reachable, but with the wrong identity
        OR_IDENTITY = 7,
        /// A channel underneath this circuit went away
        CHANNEL_CLOSED = 8,
        /// The circuit reached the end of its natural lifetime
        FINISHED = 9,
        /// Building the circuit took too long
        TIMEOUT = 10,
        /// Torn down by the network, not by the circuit's owner
        DESTROYED = 11,
        /// The requested onion service does not exist
        NOSUCHSERVICE = 12,
    }
}

/// Address type code for IPv4 in a NETINFO cell.
const NETINFO_ADDR_IPV4: u8 = 0x04;
/// Address type code for IPv6 in a NETINFO cell.
const NETINFO_ADDR_IPV6: u8 = 0x06;

/// One address, in the type/length/value form NETINFO cells use.
///
/// `None` stands for an address that carries no information: an
/// unrecognized type code (which must not be fatal), or the
/// unspecified address a sender puts in a slot it has nothing to say
/// about.
struct NetinfoAddr(Option<IpAddr>);

impl Readable for NetinfoAddr {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let atype = r.take_u8()?;
        let alen = r.take_u8()? as usize;
        let value = r.take(alen)?;
        let addr = match (atype, alen) {
            (NETINFO_ADDR_IPV4, 4) => {
                let octets: [u8; 4] =
                    value.try_into().expect("4-byte slice was not 4 bytes!?");
                Some(IpAddr::from(octets))
            }
            (NETINFO_ADDR_IPV6, 16) => {
                let octets: [u8; 16] =
                    value.try_into().expect("16-byte slice was not 16 bytes!?");
                Some(IpAddr::from(octets))
            }
            (_, _) => None,
        };
        Ok(NetinfoAddr(addr.filter(|a| !a.is_unspecified())))
    }
}

impl Writeable for NetinfoAddr {
    fn write_onto<W: Writer + ?Sized>(&self, w: &mut W) -> EncodeResult<()> {
        match self.0 {
            Some(IpAddr::V4(a)) => {
                w.write_u8(NETINFO_ADDR_IPV4);
                w.write_u8(4);
                w.write_all(&a.octets());
            }
            Some(IpAddr::V6(a)) => {
                w.write_u8(NETINFO_ADDR_IPV6);
                w.write_u8(16);
                w.write_all(&a.octets());
            }
            // "Nothing to say" still has to fill its slot: 0.0.0.0.
            None => {
                w.write_u8(NETINFO_ADDR_IPV4);
                w.write_u8(4);
                w.write_zeros(4);
            }
        }
        Ok(())
    }
}

/// A Netinfo message closes out link negotiation.
///
/// Both sides send one: it carries the sender's clock reading, the
/// address the sender saw at the far end of the connection, and (from
/// relays) the addresses the sender answers on.  Once these have been
/// exchanged, circuits may flow.
#[derive(Clone, Debug)]
pub struct Netinfo {
    /// The sender's clock, as seconds since the epoch.  Zero from
    /// clients, who keep their clocks to themselves.
    timestamp: u32,
    /// The address the sender saw at the far end of the connection.
    observed_addr: Option<IpAddr>,
    /// Addresses the sender itself answers on.  Empty from clients.
    my_addrs: Vec<IpAddr>,
}

impl Netinfo {
    /// Build the Netinfo a client sends: no time, no addresses of its
    /// own.
    pub fn from_client(observed_addr: Option<IpAddr>) -> Self {
        Netinfo {
            timestamp: 0,
            observed_addr,
            my_addrs: Vec::new(),
        }
    }
    /// Build the Netinfo a relay sends, with its clock reading and the
    /// addresses it advertises.
    pub fn from_relay<V>(timestamp: u32, observed_addr: Option<IpAddr>, my_addrs: V) -> Self
    where
        V: Into<Vec<IpAddr>>,
    {
        Netinfo {
            timestamp,
            observed_addr,
            my_addrs: my_addrs.into(),
        }
    }
    /// Return the sender's clock reading, unless it declined to give
    /// one.
    pub fn timestamp(&self) -> Option<std::time::SystemTime> {
        use std::time::{Duration, SystemTime};
        (self.timestamp != 0)
            .then(|| SystemTime::UNIX_EPOCH + Duration::from_secs(self.timestamp.into()))
    }
}

impl Body for Netinfo {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_u32(self.timestamp);
        w.write(&NetinfoAddr(self.observed_addr))?;
        let n_addrs: u8 = self
            .my_addrs
            .len()
            .try_into()
            .map_err(|_| EncodeError::BadLengthValue)?;
        w.write_u8(n_addrs);
        for addr in self.my_addrs {
            w.write(&NetinfoAddr(Some(addr)))?;
        }
        Ok(())
    }
}
impl Readable for Netinfo {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let timestamp = r.take_u32()?;
        let NetinfoAddr(observed_addr) = r.extract()?;
        let n_addrs = r.take_u8()?;
        let mut my_addrs = Vec::with_capacity(n_addrs.into());
        for _ in 0..n_addrs {
            let NetinfoAddr(addr) = r.extract()?;
            // Slots we couldn't interpret just disappear.
            my_addrs.extend(addr);
        }
        Ok(Netinfo {
            timestamp,
            observed_addr,
            my_addrs,
        })
    }
}

/// A Versions message opens link negotiation.
///
/// It lists every link protocol version the sender is willing to
/// speak; the two sides settle on the highest version they share.
///
/// Versions cells are peculiar: they always travel with the old
/// two-byte circuit id, since nothing has been negotiated yet when one
/// is sent.  [`Versions::encode_for_handshake`] produces that form;
/// the ordinary codec should never be asked to carry one.
#[derive(Clone, Debug)]
pub struct Versions {
    /// Link protocol versions the sender supports.
    versions: Vec<u16>,
}
impl Versions {
    /// Build a Versions message from a list of link protocols.
    ///
    /// Fails if the list could not fit in one cell.
    pub fn new<B>(vs: B) -> crate::Result<Self>
    where
        B: Into<Vec<u16>>,
    {
        let versions = vs.into();
        if versions.len() >= (u16::MAX / 2) as usize {
            return Err(crate::Error::CantEncode("Too many versions"));
        }
        Ok(Versions { versions })
    }

    /// Encode this message as the very first cell of a connection:
    /// two-byte circuit id zero, then command, length, and body.
    pub fn encode_for_handshake(self) -> EncodeResult<Vec<u8>> {
        let body_len = self.versions.len() * 2;
        let mut out = Vec::with_capacity(5 + body_len);
        out.write_u16(0); // the pre-negotiation circuit id
        out.write_u8(ChanCmd::VERSIONS.into());
        out.write_u16(body_len as u16);
        self.encode_onto(&mut out)?;
        Ok(out)
    }

    /// Return the highest link protocol present both here and in
    /// `my_protos`, if any is.
    pub fn best_shared_link_protocol(&self, my_protos: &[u16]) -> Option<u16> {
        my_protos
            .iter()
            .copied()
            // 0 is not a version anybody speaks.
            .filter(|v| *v != 0 && self.versions.contains(v))
            .max()
    }
}
impl Body for Versions {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        for v in self.versions {
            w.write_u16(v);
        }
        Ok(())
    }
}
impl Readable for Versions {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let mut versions = Vec::with_capacity(r.remaining() / 2);
        while r.remaining() >= 2 {
            versions.push(r.take_u16()?);
        }
        // Half a version means a corrupt cell.
        r.should_be_exhausted()?;
        Ok(Versions { versions })
    }
}

caret_int! {
    /// Type code of a certificate carried in a CERTS cell.
    pub struct CertType(u8) {
        /// Link key, signed with RSA identity (X.509)
        TLS_LINK_X509 = 1,
        /// Self-signed RSA identity certificate (X.509)
        RSA_ID_X509 = 2,
        /// RSA link authentication key, signed with RSA identity (X.509)
        LINK_AUTH_X509 = 3,
        /// Ed25519 signing key, signed with identity key
        IDENTITY_V_SIGNING = 4,
        /// TLS link certificate, signed with ed25519 signing key
        SIGNING_V_TLS_CERT = 5,
        /// Ed25519 authentication key, signed with ed25519 signing key
        SIGNING_V_LINK_AUTH = 6,
        /// RSA identity, signed with ed25519 identity key
        RSA_ID_V_IDENTITY = 7,
    }
}

/// A Certs message carries the certificates that the transport
/// handshake itself did not.
///
/// A relay sends one during link negotiation to tie its link key to
/// its identity, and an initiating relay sends one back before it
/// authenticates.  The certificate bodies stay opaque DER here; the
/// consumer decides which of them (if any) to decode.
#[derive(Clone, Debug)]
pub struct Certs {
    /// The certificates, as (type, DER body) pairs, in wire order.
    certs: Vec<(CertType, Vec<u8>)>,
}

impl Certs {
    /// Return a certs message with nothing in it.
    pub fn new_empty() -> Self {
        Certs { certs: Vec::new() }
    }

    /// Append one certificate of the given type.
    ///
    /// The body is not validated, or even parsed.
    pub fn push_cert_body<B>(&mut self, certtype: CertType, cert: B)
    where
        B: Into<Vec<u8>>,
    {
        self.certs.push((certtype, cert.into()));
    }

    /// Return the body of the first certificate of type `tp`, if one
    /// is present.
    pub fn cert_body(&self, tp: CertType) -> Option<&[u8]> {
        self.certs
            .iter()
            .find(|(t, _)| *t == tp)
            .map(|(_, body)| &body[..])
    }

    /// Return how many certificates this message carries.
    pub fn n_certs(&self) -> usize {
        self.certs.len()
    }
}

impl Body for Certs {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        let n_certs: u8 = self
            .certs
            .len()
            .try_into()
            .map_err(|_| EncodeError::BadLengthValue)?;
        w.write_u8(n_certs);
        for (certtype, cert) in self.certs {
            w.write_u8(certtype.into());
            let cert_len: u16 = cert
                .len()
                .try_into()
                .map_err(|_| EncodeError::BadLengthValue)?;
            w.write_u16(cert_len);
            w.write_all(&cert);
        }
        Ok(())
    }
}
impl Readable for Certs {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let n = r.take_u8()?;
        let mut certs = Vec::with_capacity(n.into());
        for _ in 0..n {
            let certtype: CertType = r.take_u8()?.into();
            let cert_len = r.take_u16()?;
            certs.push((certtype, r.take(cert_len as usize)?.into()));
        }
        Ok(Certs { certs })
    }
}

/// How many random bytes an authentication challenge carries.
pub const CHALLENGE_LEN: usize = 32;

/// An AuthChallenge message, sent by the accepting side during
/// negotiation.
///
/// It puts some bytes the initiator cannot predict onto the channel
/// (so an authentication transcript cannot be replayed) and lists the
/// authentication methods the sender will accept.  Clients ignore it;
/// only relays authenticate.
#[derive(Clone, Debug)]
pub struct AuthChallenge {
    /// The unpredictable bytes.
    challenge: [u8; CHALLENGE_LEN],
    /// Authentication methods the sender will accept.
    methods: Vec<u16>,
}
impl AuthChallenge {
    /// Build an AuthChallenge from a (randomly chosen) challenge and
    /// the set of methods the sender accepts.
    pub fn new<B, M>(challenge: B, methods: M) -> Self
    where
        B: Into<[u8; CHALLENGE_LEN]>,
        M: Into<Vec<u16>>,
    {
        AuthChallenge {
            challenge: challenge.into(),
            methods: methods.into(),
        }
    }
    /// Return the methods the sender said it would accept.
    pub fn methods(&self) -> &[u16] {
        &self.methods
    }
}

impl Body for AuthChallenge {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_all(&self.challenge[..]);
        let n_methods = self
            .methods
            .len()
            .try_into()
            .map_err(|_| EncodeError::BadLengthValue)?;
        w.write_u16(n_methods);
        for m in self.methods {
            w.write_u16(m);
        }
        Ok(())
    }
}
impl Readable for AuthChallenge {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let challenge = r.extract()?;
        let n_methods = r.take_u16()?;
        let mut methods = Vec::new();
        for _ in 0..n_methods {
            methods.push(r.take_u16()?);
        }
        Ok(AuthChallenge { challenge, methods })
    }
}

/// An Authenticate message: an initiating relay's identity proof.
///
/// The transport layer never authenticates the initiating side, so a
/// relay that opened the connection proves who it is here instead.
/// What the proof body means depends on the method code.
#[derive(Clone, Debug)]
pub struct Authenticate {
    /// Which authentication method the proof uses.
    authtype: u16,
    /// The proof itself, opaque at this layer.
    auth: Vec<u8>,
}
impl Authenticate {
    /// Wrap `body` as an Authenticate proof of method `authtype`.
    pub fn new<B>(authtype: u16, body: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        Authenticate {
            authtype,
            auth: body.into(),
        }
    }
    /// Return the method code of this proof.
    pub fn authtype(&self) -> u16 {
        self.authtype
    }
    /// Borrow the proof body.
    pub fn body(&self) -> &[u8] {
        &self.auth
    }
}
impl Body for Authenticate {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_u16(self.authtype);
        let authlen = self
            .auth
            .len()
            .try_into()
            .map_err(|_| EncodeError::BadLengthValue)?;
        w.write_u16(authlen);
        w.write_all(&self.auth[..]);
        Ok(())
    }
}
impl Readable for Authenticate {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        let authtype = r.take_u16()?;
        let authlen = r.take_u16()?;
        let auth = r.take(authlen as usize)?.into();
        Ok(Authenticate { authtype, auth })
    }
}

/// An Authorize message.  The command is reserved, so all we can do is
/// carry its bytes around.
#[derive(Clone, Debug)]
pub struct Authorize {
    /// Whatever the sender put in the cell.
    content: Vec<u8>,
}
impl Authorize {
    /// Wrap `content` as an Authorize message.
    pub fn new<B>(content: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        let content = content.into();
        Authorize { content }
    }
}
impl Body for Authorize {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_all(&self.content[..]);
        Ok(())
    }
}
impl Readable for Authorize {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Authorize {
            content: r.take(r.remaining())?.into(),
        })
    }
}

/// A message whose command we don't implement.
///
/// The protocol requires these to be tolerated (and dropped), not
/// treated as errors, so we keep the command and bytes together and
/// let the dispatcher decide.
#[derive(Clone, Debug)]
pub struct Unrecognized {
    /// The command the cell arrived under.
    cmd: ChanCmd,
    /// The cell's bytes, uninterpreted.
    content: Vec<u8>,
}
impl Unrecognized {
    /// Wrap `content` as a message with an arbitrary command.
    pub fn new<B>(cmd: ChanCmd, content: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        let content = content.into();
        Unrecognized { cmd, content }
    }
    /// Return the command this message arrived under.
    pub fn cmd(&self) -> ChanCmd {
        self.cmd
    }
    /// Read a body from `r`, labeling it with `cmd`.
    pub fn decode_with_cmd(cmd: ChanCmd, r: &mut Reader<'_>) -> Result<Unrecognized> {
        let mut u = Unrecognized::take_from(r)?;
        u.cmd = cmd;
        Ok(u)
    }
}
impl Body for Unrecognized {
    fn encode_onto<W: Writer + ?Sized>(self, w: &mut W) -> EncodeResult<()> {
        w.write_all(&self.content[..]);
        Ok(())
    }
}
impl Readable for Unrecognized {
    fn take_from(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Unrecognized {
            cmd: 0.into(),
            content: r.take(r.remaining())?.into(),
        })
    }
}

/// Helper: declare a From<> implementation from a message type into
/// AnyChanMsg.
macro_rules! msg_into_any {
    ($body:ident) => {
        impl From<$body> for AnyChanMsg {
            fn from(body: $body) -> AnyChanMsg {
                AnyChanMsg::$body(body)
            }
        }
    };
}

msg_into_any!(Padding);
msg_into_any!(Vpadding);
msg_into_any!(Create);
msg_into_any!(CreateFast);
msg_into_any!(Create2);
msg_into_any!(Created);
msg_into_any!(CreatedFast);
msg_into_any!(Created2);
msg_into_any!(Relay);
msg_into_any!(RelayEarly);
msg_into_any!(Destroy);
msg_into_any!(Netinfo);
msg_into_any!(Versions);
msg_into_any!(Certs);
msg_into_any!(AuthChallenge);
msg_into_any!(Authenticate);
msg_into_any!(Authorize);
msg_into_any!(Unrecognized);

/// Declare a conversion straight from a connection-level message (one
/// that never carries a circuit id) into a finished cell.
macro_rules! msg_into_cell {
    ($body:ident) => {
        impl From<$body> for super::AnyChanCell {
            fn from(body: $body) -> super::AnyChanCell {
                super::AnyChanCell::new(None, body.into())
            }
        }
    };
}

msg_into_cell!(Padding);
msg_into_cell!(Vpadding);
msg_into_cell!(Netinfo);
msg_into_cell!(Versions);
msg_into_cell!(Certs);
msg_into_cell!(AuthChallenge);
msg_into_cell!(Authenticate);
msg_into_cell!(Authorize);

/// Declare a ChanMsg implementation for one message type, tying it to
/// its fixed command.
macro_rules! msg_impl_chanmsg {
    ($($body:ident,)*) =>
    {paste::paste!{
       $(impl crate::chancell::ChanMsg for $body {
            fn cmd(&self) -> crate::chancell::ChanCmd { crate::chancell::ChanCmd::[< $body:snake:upper >] }
            fn encode_onto<W: tor_bytes::Writer + ?Sized>(self, w: &mut W) -> tor_bytes::EncodeResult<()> {
                crate::chancell::msg::Body::encode_onto(self, w)
            }
            fn decode_from_reader(cmd: ChanCmd, r: &mut tor_bytes::Reader<'_>) -> tor_bytes::Result<Self> {
                if cmd != crate::chancell::ChanCmd::[< $body:snake:upper >] {
                    return Err(tor_bytes::Error::InvalidMessage(
                        format!("Expected {} command; got {cmd}", stringify!([< $body:snake:upper >])).into()
                    ));
                }
                crate::chancell::msg::Body::decode_from_reader(r)
            }
        })*
    }}
}

// We implement ChanMsg for every body type, so that you can write code
// that does e.g. ChanCell<Relay>.
msg_impl_chanmsg!(
    Padding,
    Vpadding,
    Create,
    CreateFast,
    Create2,
    Created,
    CreatedFast,
    Created2,
    Relay,
    RelayEarly,
    Destroy,
    Netinfo,
    Versions,
    Certs,
    AuthChallenge,
    Authenticate,
    Authorize,
);

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::chancell::ChanMsg;

    #[test]
    fn destroy_reason() {
        // Known reasons log by name, unknown ones by number.
        assert_eq!(DestroyReason::CONNECTFAILED.to_string(), "CONNECTFAILED");
        assert_eq!(DestroyReason::from(200).to_string(), "200");

        let d = Destroy::new(DestroyReason::PROTOCOL);
        assert_eq!(d.reason(), DestroyReason::PROTOCOL);
    }

    #[test]
    fn netinfo_tolerates_unknown_address_types() {
        use tor_bytes::Reader;

        let mut body = Vec::new();
        body.write_u32(0x5f00_0000);
        body.extend_from_slice(&[0x2a, 2, 9, 9]); // observed addr, unknown type
        body.write_u8(2);
        body.extend_from_slice(&[0x04, 4, 127, 0, 0, 1]);
        body.extend_from_slice(&[0x2a, 3, 1, 2, 3]); // advertised addr, unknown type

        let mut r = Reader::from_slice(&body);
        let ni: Netinfo = r.extract().unwrap();
        r.should_be_exhausted().unwrap();

        // Re-encoding keeps only what we understood: the unknown
        // observed address becomes "unspecified", and the unknown
        // advertised one is gone.
        let mut out = Vec::new();
        Body::encode_onto(ni, &mut out).unwrap();
        let mut expect = Vec::new();
        expect.write_u32(0x5f00_0000);
        expect.extend_from_slice(&[0x04, 4, 0, 0, 0, 0]);
        expect.write_u8(1);
        expect.extend_from_slice(&[0x04, 4, 127, 0, 0, 1]);
        assert_eq!(out, expect);
    }

    #[test]
    fn versions_negotiation() {
        let vs = Versions::new([3_u16, 4, 5]).unwrap();
        assert_eq!(vs.best_shared_link_protocol(&[3, 4]), Some(4));
        assert_eq!(vs.best_shared_link_protocol(&[3]), Some(3));
        assert_eq!(vs.best_shared_link_protocol(&[1, 2]), None);
        assert_eq!(vs.best_shared_link_protocol(&[]), None);
    }

    #[test]
    fn versions_handshake_encoding() {
        let vs = Versions::new([4_u16, 5]).unwrap();
        let encoded = vs.encode_for_handshake().unwrap();
        assert_eq!(encoded, vec![0, 0, 7, 0, 4, 0, 4, 0, 5]);
    }

    #[test]
    fn certs_lookup() {
        let mut certs = Certs::new_empty();
        certs.push_cert_body(CertType::RSA_ID_X509, &[5_u8, 5][..]);
        certs.push_cert_body(CertType::TLS_LINK_X509, &[6_u8][..]);
        assert_eq!(certs.n_certs(), 2);
        assert_eq!(certs.cert_body(CertType::RSA_ID_X509), Some(&[5_u8, 5][..]));
        assert_eq!(certs.cert_body(CertType::LINK_AUTH_X509), None);
    }

    #[test]
    fn create_tag_is_payload_visible() {
        // CREATE cells don't distinguish handshakes by command; the tag
        // at the head of the payload has to survive parsing untouched.
        let mut payload = Vec::from(&b"ntorNTORntorNTOR"[..]);
        payload.resize(TAP_C_HANDSHAKE_LEN, 3);
        let c = Create::new(payload.clone());
        assert_eq!(c.handshake(), &payload[..]);
        assert!(c.handshake().starts_with(b"ntorNTORntorNTOR"));
    }

    #[test]
    fn unrecognized_keeps_cmd() {
        let mut r = tor_bytes::Reader::from_slice(&[1, 2, 3]);
        let u = Unrecognized::decode_with_cmd(77.into(), &mut r).unwrap();
        assert_eq!(u.cmd(), ChanCmd::from(77));

        let any = AnyChanMsg::from(u);
        assert_eq!(any.cmd(), ChanCmd::from(77));
    }
}
