//! Code to handle incoming cells on a channel.
//!
//! The role of this code is to run in a separate asynchronous task,
//! and dispatch cells: circuit-creation requests go to the handshake
//! implementations, relay cells go to the right circuit, and
//! connection-level cells are handled in place.
//!
//! Each connection is one fault domain: an error here tears down this
//! channel and its circuits, and nothing else.

use std::sync::Arc;

use futures::channel::mpsc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::select;
use futures::sink::SinkExt;
use futures::stream::{Fuse, SplitSink, SplitStream, StreamExt};
use tor_error::internal;
use tracing::{debug, info, trace, warn};

use crate::channel::circmap::CircMap;
use crate::channel::{CellFrame, ChannelConfig, CtrlMsg, UniqId};
use crate::circuit::Circuit;
use crate::crypto::cell::Tor1RelayCrypto;
use crate::crypto::handshake::ntor::{NTOR_C_HANDSHAKE_LEN, NTOR_HANDSHAKE_TAG, NtorServer};
use crate::crypto::handshake::tap::TapServer;
use crate::crypto::handshake::{
    CircuitKeys, RelayHandshakeError, RelayHandshakeResult, ServerHandshake, fast::CreateFastServer,
};
use crate::router::RelayKeys;
use crate::util::err::ReactorError;
use crate::util::token_bucket::TokenBucket;
use crate::{Error, Result};
use garnet_cell::chancell::msg::{AnyChanMsg, DestroyReason, HandshakeType};
use garnet_cell::chancell::{AnyChanCell, BoxedCellBody, ChanCell, ChanMsg, CircId, msg};

/// Object to handle incoming cells and outgoing traffic on a channel.
///
/// This type is returned when you finish a channel handshake; you need
/// to spawn a new task that calls `run()` on it.
#[must_use = "If you don't call run() on a reactor, the channel won't work."]
pub struct Reactor<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> {
    /// A Stream from which we can read cells.
    ///
    /// This is backed by the TLS connection from the handshake.
    input: Fuse<SplitStream<CellFrame<T>>>,
    /// A Sink to which we can write cells.
    output: SplitSink<CellFrame<T>, AnyChanCell>,
    /// A receiver for control messages from `Channel` objects.
    control: Fuse<mpsc::UnboundedReceiver<CtrlMsg>>,
    /// A receiver for cells queued by `Channel` objects.
    cells: Fuse<mpsc::Receiver<AnyChanCell>>,
    /// A map from circuit ID to live circuits.
    circs: CircMap,
    /// The relay's long-lived keys, needed for circuit handshakes.
    keys: Arc<RelayKeys>,
    /// Rate limiter for circuit-creation requests.
    create_bucket: TokenBucket,
    /// Largest number of live circuits this peer may hold open.
    max_circuits: usize,
    /// A unique identifier for this channel.
    unique_id: UniqId,
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Reactor<T> {
    /// Construct a reactor around a framed, negotiated transport.
    pub(crate) fn new(
        frame: CellFrame<T>,
        control: mpsc::UnboundedReceiver<CtrlMsg>,
        cells: mpsc::Receiver<AnyChanCell>,
        keys: Arc<RelayKeys>,
        config: &ChannelConfig,
        unique_id: UniqId,
    ) -> Self {
        let (output, input) = frame.split();
        Reactor {
            input: input.fuse(),
            output,
            control: control.fuse(),
            cells: cells.fuse(),
            circs: CircMap::new(),
            keys,
            create_bucket: TokenBucket::new(config.create_burst, config.create_rate_per_sec),
            max_circuits: config.max_circuits,
            unique_id,
        }
    }

    /// Launch the reactor, and run until the channel closes or we
    /// encounter an error.
    ///
    /// Once this function returns, the channel is dead, and can't be
    /// used again.
    pub async fn run(mut self) -> Result<()> {
        trace!("{}: Running reactor", self.unique_id);
        let result = loop {
            match self.run_once().await {
                Ok(()) => (),
                Err(ReactorError::Shutdown) => break Ok(()),
                Err(ReactorError::Err(e)) => break Err(e),
            }
        };
        debug!("{}: Reactor stopped: {:?}", self.unique_id, result);
        // Destroying the circuits cancels any work on them and releases
        // their crypto state.
        self.circs.clear();
        let _ = self.output.close().await;
        result
    }

    /// Helper for run(): handles only one action.
    async fn run_once(&mut self) -> std::result::Result<(), ReactorError> {
        select! {
            ctrl = self.control.select_next_some() => {
                match ctrl {
                    CtrlMsg::Shutdown => return Err(ReactorError::Shutdown),
                }
            }

            cell = self.cells.select_next_some() => {
                self.send_cell(cell).await?;
            }

            ret = self.input.next() => {
                let item = ret.ok_or(ReactorError::Shutdown)?;
                let cell = item.map_err(Error::from)?;
                self.handle_cell(cell).await?;
            }
        }
        Ok(())
    }

    /// Helper: send a cell on the outbound sink.
    async fn send_cell(&mut self, cell: AnyChanCell) -> Result<()> {
        self.output.send(cell).await.map_err(Error::from)
    }

    /// Helper: send a DESTROY cell for circuit `id`.
    async fn send_destroy(&mut self, id: CircId, reason: DestroyReason) -> Result<()> {
        trace!(
            "{}: sending DESTROY for circuit {}: {}",
            self.unique_id,
            id,
            reason
        );
        self.send_cell(ChanCell::new(Some(id), msg::Destroy::new(reason).into()))
            .await
    }

    /// Process a cell received on the open channel.
    async fn handle_cell(&mut self, cell: AnyChanCell) -> Result<()> {
        let (circid, m) = cell.into_circid_and_msg();
        match &m {
            AnyChanMsg::Relay(_) | AnyChanMsg::Padding(_) | AnyChanMsg::Vpadding(_) => {} // too frequent to log.
            m => trace!(
                "{}: received {} for {}",
                self.unique_id,
                m.cmd(),
                CircId::get_or_zero(circid)
            ),
        }

        match m {
            // These are always ignored.
            AnyChanMsg::Padding(_) | AnyChanMsg::Vpadding(_) => Ok(()),

            // A late NETINFO is harmless; AUTHORIZE is unused but legal.
            AnyChanMsg::Netinfo(_) => Ok(()),
            AnyChanMsg::Authorize(_) => {
                debug!("{}: ignoring AUTHORIZE cell", self.unique_id);
                Ok(())
            }

            // Negotiation cells may not recur once the channel is open.
            AnyChanMsg::Versions(_) => Err(Error::ChanProto(
                "VERSIONS cell after negotiation".into(),
            )),
            m @ (AnyChanMsg::Certs(_)
            | AnyChanMsg::AuthChallenge(_)
            | AnyChanMsg::Authenticate(_)) => Err(Error::ChanProto(format!(
                "{} cell on open channel",
                m.cmd()
            ))),

            // We never initiate circuits, so nothing can be CREATED.
            m @ (AnyChanMsg::Created(_) | AnyChanMsg::CreatedFast(_) | AnyChanMsg::Created2(_)) => {
                Err(Error::ChanProto(format!(
                    "{} cell on responder channel",
                    m.cmd()
                )))
            }

            m @ (AnyChanMsg::Create(_) | AnyChanMsg::CreateFast(_) | AnyChanMsg::Create2(_)) => {
                self.handle_create_cell(circid, m).await
            }

            AnyChanMsg::Relay(r) => {
                self.handle_relay_cell(circid, false, r.into_relay_body())
                    .await
            }
            AnyChanMsg::RelayEarly(r) => {
                self.handle_relay_cell(circid, true, r.into_relay_body())
                    .await
            }

            AnyChanMsg::Destroy(d) => self.handle_destroy_cell(circid, d.reason()),

            // Unknown commands are logged and dropped, never answered.
            AnyChanMsg::Unrecognized(u) => {
                debug!(
                    "{}: dropping cell with unrecognized command {}",
                    self.unique_id,
                    u.cmd()
                );
                Ok(())
            }

            // AnyChanMsg is #[non_exhaustive]; every variant that exists
            // today is handled above.
            _ => unreachable!("unhandled AnyChanMsg variant"),
        }
    }

    /// Service one CREATE-family cell.
    ///
    /// Failures here are per-circuit: the peer gets a DESTROY with a
    /// reason, and the channel stays up.
    async fn handle_create_cell(&mut self, circid: Option<CircId>, m: AnyChanMsg) -> Result<()> {
        let Some(id) = circid else {
            return Err(Error::ChanProto("CREATE cell without circuit ID".into()));
        };
        if !self.create_bucket.take() {
            info!(
                "{}: circuit creation rate exceeded; refusing circuit {}",
                self.unique_id, id
            );
            return self.send_destroy(id, DestroyReason::RESOURCELIMIT).await;
        }
        if self.circs.contains(id) {
            info!("{}: circuit ID {} is already in use", self.unique_id, id);
            return self.send_destroy(id, DestroyReason::PROTOCOL).await;
        }
        if self.circs.len() >= self.max_circuits {
            info!("{}: too many circuits; refusing {}", self.unique_id, id);
            return self.send_destroy(id, DestroyReason::RESOURCELIMIT).await;
        }

        let outcome = self.run_create_handshake(m);
        match outcome {
            Ok((keys, reply)) => {
                let pair = Tor1RelayCrypto::from_circuit_keys(&keys)?;
                self.circs.insert(id, Circuit::new(id, pair))?;
                debug!("{}: circuit {} created", self.unique_id, id);
                // The reply goes out after the circuit is registered,
                // and before we look at any later cell.
                self.send_cell(ChanCell::new(Some(id), reply)).await
            }
            Err(e) => {
                warn!(
                    "{}: circuit handshake for {} failed: {}",
                    self.unique_id, id, e
                );
                let reason = match e {
                    RelayHandshakeError::Fmt(_) => DestroyReason::PROTOCOL,
                    _ => DestroyReason::INTERNAL,
                };
                self.send_destroy(id, reason).await
            }
        }
    }

    /// Run the correct circuit-creation handshake for `m`, producing
    /// circuit keys and a reply message.
    fn run_create_handshake(
        &mut self,
        m: AnyChanMsg,
    ) -> RelayHandshakeResult<(CircuitKeys, AnyChanMsg)> {
        let mut rng = rand::rng();
        match m {
            AnyChanMsg::CreateFast(m) => CreateFastServer::server(&mut rng, &(), m.handshake())
                .map(|(keys, reply)| (keys, msg::CreatedFast::new(reply).into())),
            AnyChanMsg::Create(m) => {
                let p = m.handshake();
                if p.starts_with(NTOR_HANDSHAKE_TAG) {
                    // A tagged CREATE carries an ntor request in the
                    // space of a TAP onion skin.
                    let hs = &p[NTOR_HANDSHAKE_TAG.len()
                        ..NTOR_HANDSHAKE_TAG.len() + NTOR_C_HANDSHAKE_LEN];
                    NtorServer::server(&mut rng, self.keys.ntor(), hs)
                        .map(|(keys, reply)| (keys, msg::Created::new(reply).into()))
                } else {
                    let onion = self.keys.onion();
                    TapServer::server(&mut rng, &onion, p)
                        .map(|(keys, reply)| (keys, msg::Created::new(reply).into()))
                }
            }
            AnyChanMsg::Create2(m) => match m.handshake_type() {
                HandshakeType::NTOR => NtorServer::server(&mut rng, self.keys.ntor(), m.body())
                    .map(|(keys, reply)| (keys, msg::Created2::new(reply).into())),
                HandshakeType::TAP => {
                    let onion = self.keys.onion();
                    TapServer::server(&mut rng, &onion, m.body())
                        .map(|(keys, reply)| (keys, msg::Created2::new(reply).into()))
                }
                other => {
                    info!(
                        "{}: refusing unsupported handshake type {}",
                        self.unique_id, other
                    );
                    Err(RelayHandshakeError::BadClientHandshake)
                }
            },
            _ => Err(internal!("non-CREATE cell in create handler").into()),
        }
    }

    /// Give a RELAY or RELAY_EARLY cell to the circuit it belongs to.
    async fn handle_relay_cell(
        &mut self,
        circid: Option<CircId>,
        early: bool,
        body: BoxedCellBody,
    ) -> Result<()> {
        let Some(id) = circid else {
            return Err(Error::ChanProto("Relay cell without circuit ID".into()));
        };
        let outcome = self
            .circs
            .get_mut(id)
            .map(|circ| circ.handle_relay_cell(early, body));
        match outcome {
            None => {
                // A relay cell for a circuit we don't know: tell the
                // peer that circuit is gone, and move on.
                trace!("{}: relay cell on unknown circuit {}", self.unique_id, id);
                self.send_destroy(id, DestroyReason::CHANNEL_CLOSED).await
            }
            Some(Ok(replies)) => {
                for reply in replies {
                    self.send_cell(reply).await?;
                }
                Ok(())
            }
            Some(Err(e)) => {
                info!("{}: destroying circuit {}: {}", self.unique_id, id, e);
                self.circs.remove(id);
                let reason = match e {
                    Error::CircProto(_) | Error::BytesErr(_) | Error::CellErr(_)
                    | Error::ChanProto(_) => DestroyReason::PROTOCOL,
                    _ => DestroyReason::INTERNAL,
                };
                self.send_destroy(id, reason).await
            }
        }
    }

    /// Handle a DESTROY cell by dropping the corresponding circuit, if
    /// we have one.
    fn handle_destroy_cell(&mut self, circid: Option<CircId>, reason: DestroyReason) -> Result<()> {
        let Some(id) = circid else {
            return Err(Error::ChanProto("DESTROY cell without circuit ID".into()));
        };
        match self.circs.remove(id) {
            Some(_) => {
                debug!(
                    "{}: peer destroyed circuit {}: {}",
                    self.unique_id,
                    id,
                    reason
                );
            }
            None => {
                trace!("{}: DESTROY for unknown circuit {}", self.unique_id, id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::channel::codec::test::MsgBuf;
    use crate::channel::handshake::test::{decode_cells, encode_cell};
    use crate::channel::handshake::InboundHandshake;
    use crate::crypto::handshake::fast::CreateFastClient;
    use crate::crypto::handshake::ntor::NtorClient;
    use crate::crypto::handshake::ClientHandshake;
    use crate::crypto::testing::FakePRNG;
    use crate::router::testing::testing_keys;
    use futures::executor::block_on;
    use hex_literal::hex;

    /// Drive a whole session from canned bytes: handshake, then the
    /// reactor until the peer's input is exhausted.
    #[test]
    fn full_session() {
        let keys = Arc::new(testing_keys());

        // The CREATE_FAST "key material" our fake client sends.
        let x = hex!("000102030405060708090a0b0c0d0e0f10111213");
        let mut fake_rng = FakePRNG::new(&x);
        let (fast_state, fast_msg) = CreateFastClient::client1(&mut fake_rng, &()).unwrap();

        // An ntor request for the relay's real onion key.
        let mut rng = rand::rng();
        let (ntor_state, ntor_msg) =
            NtorClient::client1(&mut rng, keys.ntor().public()).unwrap();

        let fast_id = CircId::new(0x8000_0001).unwrap();
        let ntor_id = CircId::new(0x8000_0002).unwrap();

        let mut input = msg::Versions::new([3_u16, 4, 5])
            .unwrap()
            .encode_for_handshake()
            .unwrap();
        input.extend_from_slice(&encode_cell(4, msg::Netinfo::from_client(None).into()));
        // A CREATE_FAST...
        input.extend_from_slice(&encode_cell(
            4,
            ChanCell::new(Some(fast_id), msg::CreateFast::new(fast_msg).into()),
        ));
        // ...a duplicate on the same circuit ID...
        input.extend_from_slice(&encode_cell(
            4,
            ChanCell::new(Some(fast_id), msg::CreateFast::new(&x[..]).into()),
        ));
        // ...an ntor CREATE2 on a new ID...
        input.extend_from_slice(&encode_cell(
            4,
            ChanCell::new(
                Some(ntor_id),
                msg::Create2::new(HandshakeType::NTOR, ntor_msg).into(),
            ),
        ));
        // ...a RELAY cell on a circuit that doesn't exist...
        input.extend_from_slice(&encode_cell(
            4,
            ChanCell::new(
                CircId::new(0x8000_0099),
                msg::Relay::new(&[0_u8; 509][..]).into(),
            ),
        ));
        // ...and a DESTROY for the first circuit.
        input.extend_from_slice(&encode_cell(
            4,
            ChanCell::new(
                Some(fast_id),
                msg::Destroy::new(DestroyReason::NONE).into(),
            ),
        ));

        let mb = MsgBuf::new(input);
        let out = mb.out_handle();

        block_on(async {
            let (_channel, reactor) = InboundHandshake::new(mb)
                .accept(&keys, &ChannelConfig::default(), None, &[])
                .await
                .unwrap();
            // EOF on the input counts as a clean shutdown.
            reactor.run().await.unwrap();
        });

        let out = out.lock().unwrap();
        // Skip our VERSIONS cell; everything after it is 4-byte-id
        // framed.
        assert_eq!(&out[..9], &[0, 0, 7, 0, 4, 0, 3, 0, 4]);
        let cells = decode_cells(4, &out[9..]);
        let cmds: Vec<_> = cells.iter().map(|c| c.msg().cmd()).collect();
        use garnet_cell::chancell::ChanCmd;
        assert_eq!(
            cmds,
            vec![
                ChanCmd::CERTS,
                ChanCmd::AUTH_CHALLENGE,
                ChanCmd::NETINFO,
                ChanCmd::CREATED_FAST,
                ChanCmd::DESTROY,
                ChanCmd::CREATED2,
                ChanCmd::DESTROY,
            ]
        );

        // The CREATED_FAST completes the client's handshake, and its
        // circuit ID matches the request.
        assert_eq!(cells[3].circid(), Some(fast_id));
        let created_fast = match cells[3].msg() {
            AnyChanMsg::CreatedFast(m) => m.clone(),
            _ => panic!("wrong cell"),
        };
        CreateFastClient::client2(fast_state, created_fast.into_handshake()).unwrap();

        // The duplicate CREATE_FAST got a DESTROY with reason
        // PROTOCOL on the same ID.
        assert_eq!(cells[4].circid(), Some(fast_id));
        match cells[4].msg() {
            AnyChanMsg::Destroy(d) => assert_eq!(d.reason(), DestroyReason::PROTOCOL),
            _ => panic!("wrong cell"),
        }

        // The CREATED2 parses as SERVER_PK || AUTH and convinces the
        // client.
        assert_eq!(cells[5].circid(), Some(ntor_id));
        let created2 = match cells[5].msg() {
            AnyChanMsg::Created2(m) => m.clone(),
            _ => panic!("wrong cell"),
        };
        let reply = created2.into_body();
        assert_eq!(reply.len(), 64);
        NtorClient::client2(ntor_state, reply).unwrap();

        // The RELAY cell on an unknown circuit got CHANNEL_CLOSED.
        assert_eq!(cells[6].circid(), CircId::new(0x8000_0099));
        match cells[6].msg() {
            AnyChanMsg::Destroy(d) => {
                assert_eq!(d.reason(), DestroyReason::CHANNEL_CLOSED);
            }
            _ => panic!("wrong cell"),
        }
    }

    /// The rate limiter turns a flood of CREATE cells into
    /// RESOURCELIMIT destroys.
    #[test]
    fn create_flood_is_rate_limited() {
        let keys = Arc::new(testing_keys());
        let config = ChannelConfig {
            create_burst: 2,
            create_rate_per_sec: 1,
            ..Default::default()
        };

        let mut input = msg::Versions::new([4_u16])
            .unwrap()
            .encode_for_handshake()
            .unwrap();
        input.extend_from_slice(&encode_cell(4, msg::Netinfo::from_client(None).into()));
        for i in 1..=4_u32 {
            input.extend_from_slice(&encode_cell(
                4,
                ChanCell::new(
                    CircId::new(0x8000_0000 + i),
                    msg::CreateFast::new(&[3_u8; 20][..]).into(),
                ),
            ));
        }

        let mb = MsgBuf::new(input);
        let out = mb.out_handle();
        block_on(async {
            let (_channel, reactor) = InboundHandshake::new(mb)
                .accept(&keys, &config, None, &[])
                .await
                .unwrap();
            reactor.run().await.unwrap();
        });

        let out = out.lock().unwrap();
        let cells = decode_cells(4, &out[9..]);
        let mut reasons = Vec::new();
        for cell in &cells[3..] {
            match cell.msg() {
                AnyChanMsg::CreatedFast(_) => reasons.push(None),
                AnyChanMsg::Destroy(d) => reasons.push(Some(d.reason())),
                m => panic!("unexpected {} cell", m.cmd()),
            }
        }
        assert_eq!(
            reasons,
            vec![
                None,
                None,
                Some(DestroyReason::RESOURCELIMIT),
                Some(DestroyReason::RESOURCELIMIT),
            ]
        );
    }
}
