//! Public facade: lifecycle, IP-info cache, the next-timeout oracle, and
//! event fan-out (spec §4.6, §6.4).
//!
//! `TinyPan` is the "owning core" spec §9 calls for: supervisor, channel,
//! and bridge sit as sibling fields, each driven explicitly by `process()`
//! rather than holding references to one another. The HAL and netif
//! collaborators are owned by value (generic `H: Hal`, `N: Netif`) since
//! the single-threaded cooperative model (spec §5) means nothing else ever
//! needs to reach them concurrently.

use debug::{logln, LL};

use crate::bridge::{BridgeConfig, EthernetBridge, SlipBridge, TxBridge};
use crate::channel::{BnepChannel, ChannelEvent};
use crate::codec::CodecError;
use crate::supervisor::{Config, Supervisor, SupervisorAction, SupervisorState};
use crate::txqueue::TX_SLOT_CAP;
use tinypan_hal::{EtherAddr, Hal, HalEvent, IpInfo, Netif, TransportMode, BNEP_PSM, L2CAP_MTU_MIN};

const LOG_LEVEL: LL = LL::Debug;

/// Programmer-error / lifecycle failure (spec §7 "Programmer errors").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FacadeError {
    AlreadyStarted,
}

/// Application-facing event (spec §6.4). Edge-triggered: a given cycle
/// emits each of these at most once, `StateChanged` always first (spec §5
/// ordering guarantee).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Event {
    StateChanged(SupervisorState),
    Connected,
    Disconnected,
    IpAcquired,
    IpLost,
    Error,
}

#[derive(Default)]
struct CycleFlags {
    connected: bool,
    disconnected: bool,
    ip_acquired: bool,
    ip_lost: bool,
    error: bool,
}

/// Top-level facade (spec §4.6): `config_init`/`init`/`start`/`stop`/
/// `process` lifecycle, plus the accessors an application polls between
/// `process()` calls.
pub struct TinyPan<H: Hal, N: Netif> {
    hal: H,
    netif: N,
    mode: TransportMode,
    supervisor: Supervisor,
    channel: BnepChannel,
    bridge: TxBridge,
    ip_info: IpInfo,
    last_reported_state: SupervisorState,
    event_cb: Option<fn(Event)>,
}

impl<H: Hal, N: Netif> TinyPan<H, N> {
    /// Build the facade. `hal.init()` must already have succeeded; this
    /// crate never calls it implicitly, mirroring the explicit `init`
    /// step spec §4.6 names separately from construction.
    pub fn new(hal: H, netif: N, mode: TransportMode, config: Config) -> TinyPan<H, N> {
        let bridge = match mode {
            TransportMode::Ethernet => TxBridge::Ethernet(EthernetBridge::new(BridgeConfig::default())),
            TransportMode::Slip => TxBridge::Slip(SlipBridge::new()),
        };
        TinyPan {
            hal,
            netif,
            mode,
            supervisor: Supervisor::new(config),
            channel: BnepChannel::new(),
            bridge,
            ip_info: IpInfo::default(),
            last_reported_state: SupervisorState::Idle,
            event_cb: None,
        }
    }

    pub fn set_event_callback(&mut self, cb: fn(Event)) {
        self.event_cb = Some(cb);
    }

    pub fn state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    pub fn state_name(&self) -> &'static str {
        match self.supervisor.state() {
            SupervisorState::Idle => "Idle",
            SupervisorState::Connecting => "Connecting",
            SupervisorState::BnepSetup => "BnepSetup",
            SupervisorState::Dhcp => "Dhcp",
            SupervisorState::Online => "Online",
            SupervisorState::Reconnecting => "Reconnecting",
            SupervisorState::Error => "Error",
            SupervisorState::Scanning => "Scanning",
            SupervisorState::Stalled => "Stalled",
        }
    }

    /// `is_online` is a pure function of `(state, has_ip)` (spec §8
    /// invariant 3).
    pub fn is_online(&self) -> bool {
        self.supervisor.state() == SupervisorState::Online && self.ip_info.has_ip
    }

    pub fn ip_info(&self) -> IpInfo {
        self.ip_info
    }

    /// `Idle -> Connecting`, or the escape hatch out of the terminal
    /// `Error` state (spec §4.4, §3). Returns `AlreadyStarted` if a
    /// connection attempt or session is already in progress; callers that
    /// want to force a clean restart from a live session should `stop()`
    /// first.
    pub fn start(&mut self) -> Result<(), FacadeError> {
        if !matches!(self.supervisor.state(), SupervisorState::Idle | SupervisorState::Error) {
            return Err(FacadeError::AlreadyStarted);
        }
        let now = self.hal.monotonic_ms();
        let mut flags = CycleFlags::default();
        let action = self.supervisor.start(now);
        self.act(action, now, &mut flags);
        self.fan_out(&flags);
        Ok(())
    }

    /// Cancellation primitive (spec §5): tears down L2CAP, resets the BNEP
    /// channel, flushes the TX queue, clears `IpInfo`, forces `Idle`, and
    /// unconditionally emits one `Disconnected` event when the prior state
    /// wasn't already `Idle`.
    pub fn stop(&mut self) {
        let now = self.hal.monotonic_ms();
        let was_idle = self.supervisor.state() == SupervisorState::Idle;
        self.supervisor.stop(now);
        self.hal.l2cap_disconnect();
        self.channel.reset();
        self.bridge.flush();
        self.ip_info = IpInfo::default();

        let mut flags = CycleFlags::default();
        flags.disconnected = !was_idle;
        self.fan_out(&flags);
    }

    /// Release the HAL. Consumes `self`, matching spec §4.6 `deinit`.
    pub fn deinit(mut self) {
        self.stop();
        self.hal.deinit();
    }

    /// Milliseconds the host may sleep before the next call to `process()`
    /// is needed (spec §4.4, §4.6). Combines the supervisor's timeout
    /// oracle with the IP stack's own (via `dhcp_hint_ms`, when the caller
    /// has one), clamping active handshake states to `HANDSHAKE_CLAMP_MS`
    /// so a missed transition is bounded even under coarse host scheduling.
    pub fn next_timeout_ms(&self, dhcp_hint_ms: Option<u32>) -> u32 {
        const HANDSHAKE_CLAMP_MS: u32 = 50;
        let now = self.hal.monotonic_ms();
        let mut t = self.supervisor.next_timeout_ms(now);
        if matches!(self.supervisor.state(), SupervisorState::Connecting | SupervisorState::BnepSetup) {
            t = t.min(HANDSHAKE_CLAMP_MS);
        }
        if let Some(hint) = dhcp_hint_ms {
            t = t.min(hint);
        }
        t
    }

    /// Run one cooperative-polling cycle (spec §4.6, §5). Drains HAL
    /// events, drains inbound L2CAP PDUs, checks state-machine timeouts,
    /// and polls the netif for a fresh IP binding, then fans out events in
    /// the order spec §5 requires.
    pub fn process(&mut self) {
        let now = self.hal.monotonic_ms();
        let mut flags = CycleFlags::default();

        while let Some(event) = self.hal.poll_event() {
            let action = match event {
                HalEvent::Connected => self.supervisor.on_l2cap_connected(now),
                HalEvent::Disconnected => self.supervisor.on_l2cap_disconnected(now),
                HalEvent::ConnectFailed => self.supervisor.on_l2cap_connect_failed(now),
                HalEvent::CanSendNow => {
                    self.bridge.drain(&mut self.channel, &mut self.hal);
                    SupervisorAction::None
                }
            };
            self.act(action, now, &mut flags);
        }

        if matches!(self.mode, TransportMode::Ethernet) {
            self.drain_inbound_ethernet(now, &mut flags);
        } else {
            self.drain_inbound_slip();
            self.netif.process_rx_queue();
        }

        let timeout_action = self.supervisor.poll_timeout(now);
        self.act(timeout_action, now, &mut flags);

        if let Some(info) = self.netif.poll_ip_info() {
            let had_ip = self.ip_info.has_ip;
            self.ip_info = info;
            if info.has_ip && !had_ip {
                let action = self.supervisor.on_ip_acquired(now);
                self.act(action, now, &mut flags);
                flags.ip_acquired = true;
            } else if !info.has_ip && had_ip {
                let action = self.supervisor.on_ip_lost(now);
                self.act(action, now, &mut flags);
                flags.ip_lost = true;
            }
        }

        self.fan_out(&flags);
    }

    fn drain_inbound_ethernet(&mut self, now: u32, flags: &mut CycleFlags) {
        let mut rx_buf = [0u8; L2CAP_MTU_MIN as usize];
        let mut eth_out = [0u8; TX_SLOT_CAP];
        loop {
            let n = match self.hal.poll_rx(&mut rx_buf) {
                Some(n) => n,
                None => break,
            };
            match self.channel.on_inbound(&mut self.hal, &rx_buf[..n]) {
                Ok(ChannelEvent::SetupResult(code)) => {
                    let action = self.supervisor.on_bnep_setup_result(code, now);
                    self.act(action, now, flags);
                }
                Ok(ChannelEvent::DataFrame(frame)) => {
                    if let TxBridge::Ethernet(bridge) = &self.bridge {
                        bridge.deliver_inbound(&mut self.netif, &frame, &mut eth_out);
                    }
                }
                Ok(ChannelEvent::None) => {}
                Err(e) => self.log_codec_error(e),
            }
        }
    }

    fn drain_inbound_slip(&mut self) {
        if let TxBridge::Slip(bridge) = &mut self.bridge {
            let mut buf = [0u8; L2CAP_MTU_MIN as usize];
            loop {
                let n = match self.hal.poll_rx(&mut buf) {
                    Some(n) => n,
                    None => break,
                };
                bridge.on_rx_bytes(&buf[..n]);
            }
        }
    }

    fn log_codec_error(&self, e: CodecError) {
        logln!(LL::Debug, "facade: dropping malformed inbound bnep frame");
        let _ = e;
    }

    fn act(&mut self, action: SupervisorAction, now: u32, flags: &mut CycleFlags) {
        match action {
            SupervisorAction::None => {}
            SupervisorAction::StartL2capConnect => {
                let remote = self.supervisor.config().remote_addr;
                if self.hal.l2cap_connect(remote, BNEP_PSM, L2CAP_MTU_MIN).is_err() {
                    let next = self.supervisor.on_l2cap_connect_failed(now);
                    self.act(next, now, flags);
                }
            }
            SupervisorAction::SendBnepSetupRequest | SupervisorAction::ResendBnepSetupRequest => {
                let local = EtherAddr::from_bdaddr(self.hal.local_address());
                let remote = EtherAddr(self.supervisor.config().remote_addr.0);
                self.channel.open(&mut self.hal, local, remote);
            }
            SupervisorAction::DisconnectAndReset => {
                self.hal.l2cap_disconnect();
                self.channel.reset();
                self.bridge.flush();
                flags.disconnected = true;
            }
            SupervisorAction::BringNetifUpAndStartDhcp => {
                self.netif.link_set_up();
                self.netif.dhcp_start();
                flags.connected = true;
            }
            SupervisorAction::RestartDhcp => {
                self.netif.dhcp_stop();
                self.netif.dhcp_start();
            }
            SupervisorAction::EnteredErrorState => {
                flags.error = true;
            }
        }
    }

    fn fan_out(&mut self, flags: &CycleFlags) {
        let current = self.supervisor.state();
        if current != self.last_reported_state {
            self.last_reported_state = current;
            self.emit(Event::StateChanged(current));
        }
        if flags.connected {
            self.emit(Event::Connected);
        }
        if flags.disconnected {
            self.emit(Event::Disconnected);
        }
        if flags.ip_acquired {
            self.emit(Event::IpAcquired);
        }
        if flags.ip_lost {
            self.emit(Event::IpLost);
        }
        if flags.error {
            self.emit(Event::Error);
        }
    }

    fn emit(&self, event: Event) {
        if let Some(cb) = self.event_cb {
            cb(event);
        }
    }

    /// Outbound entry point for an Ethernet-mode netif (spec §6.2
    /// `link_output`). `frame` is a full Ethernet II frame; `contiguous`
    /// should be `true` unless the caller's pbuf is chained across more
    /// than one segment.
    pub fn link_output(&mut self, frame: &[u8], contiguous: bool) -> Result<(), crate::bridge::BridgeError> {
        match &mut self.bridge {
            TxBridge::Ethernet(bridge) => bridge.send_ethernet_frame(&self.channel, &mut self.hal, frame, contiguous),
            TxBridge::Slip(_) => Err(crate::bridge::BridgeError::BadArgument),
        }
    }

    /// Outbound entry point for a SLIP-mode netif (spec §4.5.2): `bytes`
    /// are already RFC 1055 escaped by the caller's SLIP emitter.
    pub fn serial_write(&mut self, bytes: &[u8]) -> Result<(), crate::bridge::BridgeError> {
        match &mut self.bridge {
            TxBridge::Slip(bridge) => bridge.send_escaped(&mut self.hal, bytes),
            TxBridge::Ethernet(_) => Err(crate::bridge::BridgeError::BadArgument),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::vec::Vec;
    use tinypan_hal::{BDAddr, HalError, SendResult};

    thread_local! {
        static EVENTS: RefCell<Vec<Event>> = RefCell::new(Vec::new());
    }

    fn recorded_events() -> Vec<Event> {
        EVENTS.with(|e| e.borrow_mut().drain(..).collect())
    }

    fn record(event: Event) {
        EVENTS.with(|e| e.borrow_mut().push(event));
    }

    struct MockHal {
        now: u32,
        events: VecDeque<HalEvent>,
        rx: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl MockHal {
        fn new() -> MockHal {
            MockHal { now: 0, events: VecDeque::new(), rx: VecDeque::new(), sent: Vec::new() }
        }
    }

    impl Hal for MockHal {
        fn init(&mut self) -> Result<(), HalError> {
            Ok(())
        }
        fn deinit(&mut self) {}
        fn local_address(&self) -> BDAddr {
            BDAddr([0x10, 0x20, 0x30, 0x40, 0x50, 0x60])
        }
        fn monotonic_ms(&self) -> u32 {
            self.now
        }
        fn l2cap_connect(&mut self, _remote: BDAddr, _psm: u16, _local_mtu: u16) -> Result<(), HalError> {
            self.events.push_back(HalEvent::Connected);
            Ok(())
        }
        fn l2cap_disconnect(&mut self) {}
        fn l2cap_send(&mut self, bytes: &[u8]) -> SendResult {
            self.sent.push(bytes.to_vec());
            SendResult::Sent
        }
        fn l2cap_can_send(&self) -> bool {
            true
        }
        fn l2cap_request_can_send_now(&mut self) {}
        fn poll_event(&mut self) -> Option<HalEvent> {
            self.events.pop_front()
        }
        fn poll_rx(&mut self, buf: &mut [u8]) -> Option<usize> {
            let frame = self.rx.pop_front()?;
            buf[..frame.len()].copy_from_slice(&frame);
            Some(frame.len())
        }
    }

    struct MockNetif {
        ip: Option<IpInfo>,
        input: Vec<Vec<u8>>,
    }

    impl MockNetif {
        fn new() -> MockNetif {
            MockNetif { ip: None, input: Vec::new() }
        }
    }

    impl Netif for MockNetif {
        fn ethernet_input(&mut self, frame: &[u8]) {
            self.input.push(frame.to_vec());
        }
        fn link_set_up(&mut self) {}
        fn dhcp_start(&mut self) {}
        fn poll_ip_info(&mut self) -> Option<IpInfo> {
            self.ip.take()
        }
    }

    fn cfg() -> Config {
        Config::new(BDAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
    }

    #[test]
    fn s1_happy_handshake_reaches_online_via_process() {
        let _ = recorded_events();
        let mut tp = TinyPan::new(MockHal::new(), MockNetif::new(), TransportMode::Ethernet, cfg());
        tp.set_event_callback(record);

        tp.start().unwrap();
        assert_eq!(tp.state(), SupervisorState::Connecting);

        // l2cap_connect() queued a Connected event; draining it drives the
        // BNEP setup request and advances to BnepSetup.
        tp.process();
        assert_eq!(tp.state(), SupervisorState::BnepSetup);

        // Feed back a successful setup response.
        tp.hal.rx.push_back([0x01u8, 0x02, 0x00, 0x00].to_vec());
        tp.process();
        assert_eq!(tp.state(), SupervisorState::Dhcp);

        tp.netif.ip =
            Some(IpInfo { ip: 0x0A00_0001, netmask: 0xFFFF_FF00, gateway: 0x0A00_00FE, dns: 0, has_ip: true });
        tp.process();
        assert_eq!(tp.state(), SupervisorState::Online);
        assert!(tp.is_online());

        let events = recorded_events();
        assert_eq!(
            events,
            [
                Event::StateChanged(SupervisorState::Connecting),
                Event::StateChanged(SupervisorState::BnepSetup),
                Event::StateChanged(SupervisorState::Dhcp),
                Event::Connected,
                Event::StateChanged(SupervisorState::Online),
                Event::IpAcquired,
            ]
        );
    }

    #[test]
    fn s7_filter_set_declined_does_not_disturb_state() {
        let mut tp = TinyPan::new(MockHal::new(), MockNetif::new(), TransportMode::Ethernet, cfg());
        tp.start().unwrap();
        tp.process(); // -> BnepSetup, setup request sent

        tp.hal.rx.push_back([0x01u8, 0x02, 0x00, 0x00].to_vec()); // setup success
        tp.process();
        assert_eq!(tp.state(), SupervisorState::Dhcp);

        tp.hal.rx.push_back([0x01u8, 0x03, 0x00, 0x01].to_vec()); // filter net type set
        tp.process();
        assert_eq!(tp.state(), SupervisorState::Dhcp, "unrelated control frame must not disturb state");
        assert!(tp.hal.sent.iter().any(|f| f[1] == 0x04), "a filter response must have been sent");
    }

    #[test]
    fn stop_forces_idle_and_clears_ip() {
        let mut tp = TinyPan::new(MockHal::new(), MockNetif::new(), TransportMode::Ethernet, cfg());
        tp.start().unwrap();
        tp.process();
        tp.stop();
        assert_eq!(tp.state(), SupervisorState::Idle);
        assert!(!tp.is_online());
        assert!(!tp.ip_info().has_ip);
    }
}
