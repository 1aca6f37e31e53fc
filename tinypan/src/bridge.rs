//! TX encapsulation/queuing bridge between the generic netif abstraction
//! and the radio (spec §4.5). Two transport modes share one `TxBridge`
//! tagged-variant dispatch (spec §9: "model as a tagged variant rather than
//! runtime-polymorphic objects, so the fast path remains allocation-free
//! and inlinable").

use debug::{logln, LL};

use crate::channel::BnepChannel;
use crate::codec::{self, EthernetFrame};
use crate::slip;
use crate::txqueue::{TxQueue, TxQueueError};
use tinypan_hal::{EtherAddr, Hal, Netif, SendResult};

const LOG_LEVEL: LL = LL::Debug;

/// Outbound failure surfaced to the IP stack (spec §6.2).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BridgeError {
    OutOfMemory,
    NotConnected,
    BadArgument,
}

/// `FORCE_UNCOMPRESSED_TX` knob (spec §4.5.1): forces 15-byte general
/// Ethernet headers unconditionally, for peers with buggy compressed-frame
/// parsers. Default off.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BridgeConfig {
    pub force_uncompressed_tx: bool,
}

/// BNEP/Ethernet transport bridge (spec §4.5.1).
///
/// The fast/slow path split here is the simpler of the two designs spec §9
/// allows ("An implementer may choose the simpler two-copy design at the
/// cost of latency and one additional static buffer"): this crate has no
/// concrete `pbuf` type to perform the in-place header-shift trick against
/// (that type belongs to the IP-stack collaborator, out of scope per §1),
/// so both paths build the BNEP frame into a local scratch buffer; "fast"
/// means sending it straight to the HAL with no queue touch, "slow" means
/// cloning it into a `TxQueue` slot. See `DESIGN.md` for the tradeoff.
pub struct EthernetBridge {
    config: BridgeConfig,
    queue: TxQueue,
}

impl EthernetBridge {
    pub const fn new(config: BridgeConfig) -> EthernetBridge {
        EthernetBridge { config, queue: TxQueue::new() }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drop every queued frame (spec §5 `stop` cancellation primitive).
    pub fn flush(&mut self) {
        self.queue.clear();
    }

    fn compressed_header_allowed(&self, channel: &BnepChannel, dst: EtherAddr, src: EtherAddr) -> bool {
        !self.config.force_uncompressed_tx && dst == channel.remote_addr() && src == channel.local_addr()
    }

    /// Encapsulate `(dst, src, ethertype, payload)` as a BNEP frame into
    /// `out`, choosing the 3-byte compressed header when both addresses
    /// match the session's and compression isn't force-disabled, else the
    /// 15-byte general header (spec §4.2, §4.5.1 step c).
    fn encapsulate(
        &self,
        channel: &BnepChannel,
        dst: EtherAddr,
        src: EtherAddr,
        ethertype: u16,
        payload: &[u8],
        out: &mut [u8],
    ) -> Result<usize, BridgeError> {
        if self.compressed_header_allowed(channel, dst, src) {
            codec::build_compressed_ethernet(out, ethertype, payload).map_err(|_| BridgeError::OutOfMemory)
        } else {
            codec::build_general_ethernet(out, dst, src, ethertype, payload)
                .map_err(|_| BridgeError::OutOfMemory)
        }
    }

    /// Outbound path (spec §4.5.1). `frame` is a full Ethernet II frame
    /// (14-byte header + payload) handed down by the IP stack; `contiguous`
    /// tells us whether it's a single segment (a chained/fragmented pbuf
    /// always takes the slow path).
    pub fn send_ethernet_frame<H: Hal>(
        &mut self,
        channel: &BnepChannel,
        hal: &mut H,
        frame: &[u8],
        contiguous: bool,
    ) -> Result<(), BridgeError> {
        if channel.state() != crate::channel::BnepChannelState::Connected {
            return Err(BridgeError::NotConnected);
        }
        if frame.len() < 14 {
            return Err(BridgeError::BadArgument);
        }
        let dst = EtherAddr::from_slice(&frame[0..6]);
        let src = EtherAddr::from_slice(&frame[6..12]);
        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
        let payload = &frame[14..];

        let fast_path = contiguous && self.queue.is_empty() && hal.l2cap_can_send();
        let mut scratch = [0u8; crate::txqueue::TX_SLOT_CAP];
        let n = self.encapsulate(channel, dst, src, ethertype, payload, &mut scratch)?;

        if fast_path {
            match hal.l2cap_send(&scratch[..n]) {
                SendResult::Sent => return Ok(()),
                SendResult::Busy => {
                    // Race: the HAL went busy between the precondition check
                    // and the send. Clone the already-built frame into the
                    // queue rather than drop it or re-encapsulate.
                    return self
                        .queue
                        .enqueue(&scratch[..n])
                        .map_err(|e| self.log_enqueue_failure(e));
                }
                SendResult::Error => {
                    logln!(LL::Debug, "bridge: tx dropped, hal send error");
                    return Ok(());
                }
            }
        }

        self.queue.enqueue(&scratch[..n]).map_err(|e| self.log_enqueue_failure(e))
    }

    fn log_enqueue_failure(&self, e: TxQueueError) -> BridgeError {
        logln!(LL::Debug, "bridge: tx queue rejected frame");
        let _ = e;
        BridgeError::OutOfMemory
    }

    /// Inbound path (spec §4.5.1 "Inbound path"): render a fully-resolved
    /// BNEP data frame back into Ethernet-II shape and hand it to the IP
    /// stack. `out` stands in for a pbuf-pool allocation (spec §5: "never
    /// `malloc`"); a binding supplies a pool-backed scratch buffer here
    /// rather than this crate touching the heap.
    pub fn deliver_inbound<N: Netif>(&self, netif: &mut N, frame: &EthernetFrame, out: &mut [u8]) {
        let total = 14 + frame.payload.len();
        if total > out.len() {
            logln!(LL::Debug, "bridge: rx frame too large for pbuf, dropping");
            return;
        }
        out[0..6].copy_from_slice(&frame.dst.0);
        out[6..12].copy_from_slice(&frame.src.0);
        out[12..14].copy_from_slice(&frame.ethertype.to_be_bytes());
        out[14..total].copy_from_slice(frame.payload);
        netif.ethernet_input(&out[..total]);
    }

    /// Drain on "can-send-now" (spec §4.5.3): the channel's pending control
    /// frame always goes first; the data queue is only drained once it's
    /// clear.
    pub fn drain<H: Hal>(&mut self, channel: &mut BnepChannel, hal: &mut H) {
        if !channel.drain_pending(hal) {
            return;
        }
        while let Some(slot) = self.queue.peek() {
            match hal.l2cap_send(slot.as_bytes()) {
                SendResult::Sent => self.queue.pop(),
                SendResult::Busy => {
                    hal.l2cap_request_can_send_now();
                    break;
                }
                SendResult::Error => {
                    logln!(LL::Debug, "bridge: dropping queued tx frame, send error");
                    self.queue.pop();
                }
            }
        }
    }
}

/// RFC 1055 SLIP transport bridge (spec §4.5.2). Bypasses BNEP entirely:
/// the netif's own SLIP emitter/processor owns the framing, this bridge
/// only moves already-escaped bytes between the HAL and the `RxByteRing`.
pub struct SlipBridge {
    queue: TxQueue,
    rx: slip::RxByteRing<{ slip::RX_BUFFER_SIZE }>,
}

impl SlipBridge {
    pub const fn new() -> SlipBridge {
        SlipBridge { queue: TxQueue::new(), rx: slip::RxByteRing::new() }
    }

    pub fn flush(&mut self) {
        self.queue.clear();
    }

    /// Enqueue a run of already SLIP-escaped bytes exactly as produced by
    /// the netif's emitter (spec §4.5.2).
    pub fn send_escaped(&mut self, hal: &mut impl Hal, bytes: &[u8]) -> Result<(), BridgeError> {
        if self.queue.is_empty() && hal.l2cap_can_send() {
            match hal.l2cap_send(bytes) {
                SendResult::Sent => return Ok(()),
                SendResult::Busy => {
                    return self.queue.enqueue(bytes).map_err(|_| BridgeError::OutOfMemory);
                }
                SendResult::Error => {
                    logln!(LL::Debug, "bridge: slip tx dropped, hal send error");
                    return Ok(());
                }
            }
        }
        self.queue.enqueue(bytes).map_err(|_| BridgeError::OutOfMemory)
    }

    /// Buffer raw inbound bytes ahead of the netif's `serial_read` drain.
    pub fn on_rx_bytes(&mut self, bytes: &[u8]) {
        self.rx.push_slice(bytes);
    }

    pub fn serial_read(&mut self, buf: &mut [u8]) -> usize {
        self.rx.drain_into(buf)
    }

    pub fn has_pending_rx(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Drain on "can-send-now": no control-frame priority slot in SLIP mode
    /// (there is no BNEP control channel), just flush the data ring.
    pub fn drain(&mut self, hal: &mut impl Hal) {
        while let Some(slot) = self.queue.peek() {
            match hal.l2cap_send(slot.as_bytes()) {
                SendResult::Sent => self.queue.pop(),
                SendResult::Busy => {
                    hal.l2cap_request_can_send_now();
                    break;
                }
                SendResult::Error => {
                    logln!(LL::Debug, "bridge: dropping queued slip frame, send error");
                    self.queue.pop();
                }
            }
        }
    }
}

/// Which transport a given build runs, selected once at `TinyPan::new`
/// (spec §4.5/§9). Mirrors `tinypan_hal::TransportMode` one-to-one but owns
/// the actual bridge state for that mode.
pub enum TxBridge {
    Ethernet(EthernetBridge),
    Slip(SlipBridge),
}

impl TxBridge {
    pub fn flush(&mut self) {
        match self {
            TxBridge::Ethernet(b) => b.flush(),
            TxBridge::Slip(b) => b.flush(),
        }
    }

    pub fn drain<H: Hal>(&mut self, channel: &mut BnepChannel, hal: &mut H) {
        match self {
            TxBridge::Ethernet(b) => b.drain(channel, hal),
            TxBridge::Slip(b) => b.drain(hal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BnepChannel, BnepChannelState};
    use std::vec::Vec;
    use tinypan_hal::{BDAddr, HalError, HalEvent};

    struct MockHal {
        sent: Vec<([u8; 64], usize)>,
        busy_next: bool,
        can_send: bool,
        requested: u32,
    }

    impl MockHal {
        fn new() -> MockHal {
            MockHal { sent: Vec::new(), busy_next: false, can_send: true, requested: 0 }
        }
    }

    impl Hal for MockHal {
        fn init(&mut self) -> Result<(), HalError> {
            Ok(())
        }
        fn deinit(&mut self) {}
        fn local_address(&self) -> BDAddr {
            BDAddr::default()
        }
        fn monotonic_ms(&self) -> u32 {
            0
        }
        fn l2cap_connect(&mut self, _remote: BDAddr, _psm: u16, _local_mtu: u16) -> Result<(), HalError> {
            Ok(())
        }
        fn l2cap_disconnect(&mut self) {}
        fn l2cap_send(&mut self, bytes: &[u8]) -> SendResult {
            if self.busy_next {
                self.busy_next = false;
                return SendResult::Busy;
            }
            let mut buf = [0u8; 64];
            buf[..bytes.len()].copy_from_slice(bytes);
            self.sent.push((buf, bytes.len()));
            SendResult::Sent
        }
        fn l2cap_can_send(&self) -> bool {
            self.can_send
        }
        fn l2cap_request_can_send_now(&mut self) {
            self.requested += 1;
        }
        fn poll_event(&mut self) -> Option<HalEvent> {
            None
        }
        fn poll_rx(&mut self, _buf: &mut [u8]) -> Option<usize> {
            None
        }
    }

    fn connected_channel() -> (BnepChannel, EtherAddr, EtherAddr) {
        let mut hal = MockHal::new();
        let mut ch = BnepChannel::new();
        let local = EtherAddr([0x02, 0, 0, 0, 0, 1]);
        let remote = EtherAddr([0xAA; 6]);
        ch.open(&mut hal, local, remote);
        ch.on_inbound(&mut hal, &[0x01, 0x02, 0x00, 0x00]).unwrap();
        assert_eq!(ch.state(), BnepChannelState::Connected);
        (ch, local, remote)
    }

    #[test]
    fn fast_path_compresses_when_addresses_match_session() {
        let (ch, local, remote) = connected_channel();
        let mut hal = MockHal::new();
        let mut bridge = EthernetBridge::new(BridgeConfig::default());

        let mut frame = Vec::new();
        frame.extend_from_slice(&remote.0); // dst
        frame.extend_from_slice(&local.0); // src
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend_from_slice(&[1, 2, 3]);

        bridge.send_ethernet_frame(&ch, &mut hal, &frame, true).unwrap();
        assert_eq!(bridge.queue_len(), 0);
        let (buf, len) = hal.sent[0];
        assert_eq!(&buf[..len], &[0x02, 0x08, 0x00, 1, 2, 3]);
    }

    #[test]
    fn uncompressed_when_addresses_dont_match_session() {
        let (ch, _local, _remote) = connected_channel();
        let mut hal = MockHal::new();
        let mut bridge = EthernetBridge::new(BridgeConfig::default());

        let other_dst = EtherAddr([9; 6]);
        let other_src = EtherAddr([8; 6]);
        let mut frame = Vec::new();
        frame.extend_from_slice(&other_dst.0);
        frame.extend_from_slice(&other_src.0);
        frame.extend_from_slice(&0x0806u16.to_be_bytes());
        frame.extend_from_slice(&[9, 9]);

        bridge.send_ethernet_frame(&ch, &mut hal, &frame, true).unwrap();
        let (buf, len) = hal.sent[0];
        assert_eq!(buf[0], 0x00); // general ethernet tag
        assert_eq!(len, 15 + 2);
    }

    #[test]
    fn force_uncompressed_knob_overrides_compression() {
        let (ch, local, remote) = connected_channel();
        let mut hal = MockHal::new();
        let mut bridge = EthernetBridge::new(BridgeConfig { force_uncompressed_tx: true });

        let mut frame = Vec::new();
        frame.extend_from_slice(&remote.0);
        frame.extend_from_slice(&local.0);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend_from_slice(&[1]);

        bridge.send_ethernet_frame(&ch, &mut hal, &frame, true).unwrap();
        assert_eq!(hal.sent[0].0[0], 0x00);
    }

    #[test]
    fn not_connected_is_rejected() {
        let mut hal = MockHal::new();
        let ch = BnepChannel::new();
        let mut bridge = EthernetBridge::new(BridgeConfig::default());
        let frame = [0u8; 20];
        assert_eq!(
            bridge.send_ethernet_frame(&ch, &mut hal, &frame, true),
            Err(BridgeError::NotConnected)
        );
    }

    #[test]
    fn short_frame_is_bad_argument() {
        let (ch, _local, _remote) = connected_channel();
        let mut hal = MockHal::new();
        let mut bridge = EthernetBridge::new(BridgeConfig::default());
        let frame = [0u8; 10];
        assert_eq!(
            bridge.send_ethernet_frame(&ch, &mut hal, &frame, true),
            Err(BridgeError::BadArgument)
        );
    }

    #[test]
    fn non_contiguous_pbuf_takes_slow_path() {
        let (ch, local, remote) = connected_channel();
        let mut hal = MockHal::new();
        let mut bridge = EthernetBridge::new(BridgeConfig::default());

        let mut frame = Vec::new();
        frame.extend_from_slice(&remote.0);
        frame.extend_from_slice(&local.0);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend_from_slice(&[1, 2]);

        bridge.send_ethernet_frame(&ch, &mut hal, &frame, false).unwrap();
        assert!(hal.sent.is_empty());
        assert_eq!(bridge.queue_len(), 1);
    }

    #[test]
    fn busy_race_on_fast_path_enqueues_intact_frame() {
        let (ch, local, remote) = connected_channel();
        let mut hal = MockHal::new();
        hal.busy_next = true;
        let mut bridge = EthernetBridge::new(BridgeConfig::default());

        let mut frame = Vec::new();
        frame.extend_from_slice(&remote.0);
        frame.extend_from_slice(&local.0);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend_from_slice(&[7, 7, 7]);

        bridge.send_ethernet_frame(&ch, &mut hal, &frame, true).unwrap();
        assert_eq!(bridge.queue_len(), 1);
        assert!(hal.sent.is_empty());
    }

    #[test]
    fn drain_prioritizes_pending_control_over_data_queue() {
        let mut hal = MockHal::new();
        hal.busy_next = true; // force the setup request to arm pending
        let mut ch = BnepChannel::new();
        let local = EtherAddr([0x02, 0, 0, 0, 0, 1]);
        let remote = EtherAddr([0xAA; 6]);
        ch.open(&mut hal, local, remote); // arms pending, requests can-send-now

        let mut bridge = EthernetBridge::new(BridgeConfig::default());
        bridge.queue.enqueue(&[0x02, 0x08, 0x00, 1]).unwrap();

        bridge.drain(&mut ch, &mut hal);
        // Pending control frame (the setup request) drains first; data
        // frame also drains since the control slot cleared successfully.
        assert_eq!(hal.sent.len(), 2);
        assert_eq!(&hal.sent[0].0[..hal.sent[0].1], &[0x01, 0x01, 0x02, 0x11, 0x16, 0x11, 0x15]);
        assert_eq!(&hal.sent[1].0[..hal.sent[1].1], &[0x02, 0x08, 0x00, 1]);
        assert_eq!(bridge.queue_len(), 0);
    }

    #[test]
    fn drain_stops_data_queue_when_pending_still_busy() {
        let mut hal = MockHal::new();
        let mut ch = BnepChannel::new();
        let local = EtherAddr([0x02, 0, 0, 0, 0, 1]);
        let remote = EtherAddr([0xAA; 6]);
        ch.open(&mut hal, local, remote); // sends fine this time

        // Re-arm pending via a second control reply that the HAL reports
        // busy for (a filter-set reply, in this case).
        hal.busy_next = true;
        let filter_set = [0x01, crate::codec::BnepControlType::FilterNetTypeSet as u8, 0x00, 0x01];
        ch.on_inbound(&mut hal, &filter_set).ok();

        let mut bridge = EthernetBridge::new(BridgeConfig::default());
        bridge.queue.enqueue(&[0x02, 0x08, 0x00, 1]).unwrap();
        bridge.drain(&mut ch, &mut hal);
        assert_eq!(bridge.queue_len(), 1, "data queue must not drain while control is still pending");
    }

    #[test]
    fn inbound_rebuilds_ethernet_frame_for_netif() {
        let (ch, local, remote) = connected_channel();
        let _ = ch;
        let bridge = EthernetBridge::new(BridgeConfig::default());

        struct CapturingNetif {
            captured: Vec<u8>,
        }
        impl Netif for CapturingNetif {
            fn ethernet_input(&mut self, frame: &[u8]) {
                self.captured.extend_from_slice(frame);
            }
        }
        let mut netif = CapturingNetif { captured: Vec::new() };
        let frame = EthernetFrame { dst: local, src: remote, ethertype: 0x0800, payload: &[9, 9] };
        let mut out = [0u8; 64];
        bridge.deliver_inbound(&mut netif, &frame, &mut out);

        assert_eq!(&netif.captured[0..6], &local.0);
        assert_eq!(&netif.captured[6..12], &remote.0);
        assert_eq!(&netif.captured[14..], &[9, 9]);
    }

    #[test]
    fn slip_bridge_round_trips_escaped_bytes_through_rx_ring() {
        let mut bridge = SlipBridge::new();
        bridge.on_rx_bytes(&[1, 2, 3]);
        assert!(bridge.has_pending_rx());
        let mut out = [0u8; 8];
        let n = bridge.serial_read(&mut out);
        assert_eq!(&out[..n], &[1, 2, 3]);
        assert!(!bridge.has_pending_rx());
    }

    #[test]
    fn slip_bridge_enqueues_on_busy_and_drains_fifo() {
        let mut hal = MockHal::new();
        hal.busy_next = true;
        let mut bridge = SlipBridge::new();
        bridge.send_escaped(&mut hal, &[0xAA, 0xBB]).unwrap();
        assert!(hal.sent.is_empty());

        bridge.drain(&mut hal);
        assert_eq!(&hal.sent[0].0[..hal.sent[0].1], &[0xAA, 0xBB]);
    }
}
