//! Top-level connection state machine: timeouts, exponential-backoff
//! reconnection, and event dispatch (spec §4.4).
//!
//! Pure state machine: this module never touches a `Hal` or `Netif`
//! directly. Every transition returns a [`SupervisorAction`] describing the
//! one side effect the caller (the facade, `tinypan::facade`) must carry
//! out, mirroring the teacher's `DhcpClient::cycle_clock` returning a
//! `PacketNeeded` for its caller to act on rather than reaching out to the
//! radio itself.

use debug::{logln, LL};

use crate::codec::SetupResponseCode;
use crate::tick::{elapsed, has_elapsed};
use tinypan_hal::BDAddr;

const LOG_LEVEL: LL = LL::Debug;

/// L2CAP connect timeout (spec §4.4).
pub const L2CAP_CONNECT_TIMEOUT_MS: u32 = 10_000;
/// BNEP setup round-trip timeout, per attempt (spec §4.4).
pub const BNEP_SETUP_TIMEOUT_MS: u32 = 5_000;
/// Number of BNEP setup retries before giving up and reconnecting (spec §4.4).
pub const BNEP_SETUP_RETRIES: u8 = 3;
/// DHCP timeout: observational only. The supervisor never acts on this; the
/// IP-stack collaborator is the one that keeps retrying (spec §4.4).
pub const DHCP_TIMEOUT_MS: u32 = 30_000;

/// Top-level connection state (spec §3).
///
/// `Scanning` and `Stalled` are reserved names for a future link-health
/// monitor (spec §9 Open Questions) and are never constructed by this
/// crate; they exist purely so code matching on every `SupervisorState`
/// variant compiles against the full set the spec names.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SupervisorState {
    Idle,
    Connecting,
    BnepSetup,
    Dhcp,
    Online,
    Reconnecting,
    Error,
    Scanning,
    Stalled,
}

/// Timing bookkeeping for the current state (spec §3). All comparisons
/// against `now_ms` go through [`crate::tick`]'s wrap-safe arithmetic.
#[derive(Clone, Copy, Debug)]
pub struct SupervisorTiming {
    pub state_entered_at_ms: u32,
    pub last_action_at_ms: u32,
    pub current_reconnect_delay_ms: u32,
    pub reconnect_attempts: u8,
    pub setup_retries: u8,
}

impl SupervisorTiming {
    pub const fn new() -> SupervisorTiming {
        SupervisorTiming {
            state_entered_at_ms: 0,
            last_action_at_ms: 0,
            current_reconnect_delay_ms: 0,
            reconnect_attempts: 0,
            setup_retries: 0,
        }
    }
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        SupervisorTiming::new()
    }
}

/// User-facing configuration (spec §3). Copied into the supervisor at
/// `init`, the way the teacher's COM layer copies small fixed-size state in
/// at setup rather than holding a reference to caller-owned storage.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub remote_addr: BDAddr,
    pub reconnect_interval_ms: u16,
    pub reconnect_max_ms: u16,
    /// Reserved for a future link-health monitor (spec §9); read by nothing
    /// in this crate.
    pub heartbeat_interval_ms: u16,
    /// Reserved for a future link-health monitor (spec §9); read by nothing
    /// in this crate.
    pub heartbeat_retries: u8,
    /// `0` means unlimited reconnect attempts.
    pub max_reconnect_attempts: u8,
}

impl Config {
    pub const fn new(remote_addr: BDAddr) -> Config {
        Config {
            remote_addr,
            reconnect_interval_ms: 1000,
            reconnect_max_ms: 30_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_retries: 3,
            max_reconnect_attempts: 0,
        }
    }
}

/// The one side effect a transition asks its caller to carry out. Kept
/// deliberately coarse: a handful of variants rather than one per
/// transition, since several transitions share the same side effect (spec
/// §9: "advance state fully, then fan out", never mid-transition).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SupervisorAction {
    /// Nothing for the caller to do beyond observing the new state.
    None,
    /// Ask the HAL to begin an L2CAP connection to `Config::remote_addr`.
    StartL2capConnect,
    /// Emit a BNEP setup request on the now-open L2CAP channel.
    SendBnepSetupRequest,
    /// Re-emit the BNEP setup request after a per-attempt timeout.
    ResendBnepSetupRequest,
    /// Tear down the L2CAP connection and reset the BNEP channel; a
    /// reconnect has just been scheduled.
    DisconnectAndReset,
    /// BNEP setup succeeded: bring the netif link up and start DHCP.
    BringNetifUpAndStartDhcp,
    /// The IP stack reported its address lost: restart DHCP.
    RestartDhcp,
    /// Reconnect attempts are exhausted; the supervisor has gone terminal.
    EnteredErrorState,
}

/// Top-level connection supervisor (spec §4.4).
pub struct Supervisor {
    state: SupervisorState,
    timing: SupervisorTiming,
    config: Config,
}

impl Supervisor {
    pub const fn new(config: Config) -> Supervisor {
        Supervisor { state: SupervisorState::Idle, timing: SupervisorTiming::new(), config }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn timing(&self) -> SupervisorTiming {
        self.timing
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn enter(&mut self, state: SupervisorState, now_ms: u32) {
        self.state = state;
        self.timing.state_entered_at_ms = now_ms;
        self.timing.last_action_at_ms = now_ms;
    }

    fn schedule_reconnect(&mut self, now_ms: u32) -> SupervisorAction {
        self.timing.current_reconnect_delay_ms = if self.timing.current_reconnect_delay_ms == 0 {
            self.config.reconnect_interval_ms as u32
        } else {
            (self.timing.current_reconnect_delay_ms * 2).min(self.config.reconnect_max_ms as u32)
        };
        logln!(LL::Debug, "supervisor: scheduling reconnect");
        self.enter(SupervisorState::Reconnecting, now_ms);
        SupervisorAction::DisconnectAndReset
    }

    /// `Idle -> Connecting`. Also the escape hatch out of the terminal
    /// `Error` state (spec §3: "`Error` is terminal until a new `start`").
    pub fn start(&mut self, now_ms: u32) -> SupervisorAction {
        self.timing.current_reconnect_delay_ms = 0;
        self.timing.reconnect_attempts = 0;
        self.enter(SupervisorState::Connecting, now_ms);
        SupervisorAction::StartL2capConnect
    }

    /// Any state `-> Idle` (spec §4.4 "any (not Idle), `stop` -> Idle").
    pub fn stop(&mut self, now_ms: u32) -> SupervisorAction {
        let was_idle = self.state == SupervisorState::Idle;
        self.timing = SupervisorTiming::new();
        self.enter(SupervisorState::Idle, now_ms);
        if was_idle {
            SupervisorAction::None
        } else {
            SupervisorAction::DisconnectAndReset
        }
    }

    /// `Connecting -> BnepSetup` on a successful L2CAP connect.
    pub fn on_l2cap_connected(&mut self, now_ms: u32) -> SupervisorAction {
        if self.state != SupervisorState::Connecting {
            return SupervisorAction::None;
        }
        self.timing.setup_retries = 0;
        self.enter(SupervisorState::BnepSetup, now_ms);
        SupervisorAction::SendBnepSetupRequest
    }

    /// `Connecting -> Reconnecting` on a failed/timed-out L2CAP connect.
    pub fn on_l2cap_connect_failed(&mut self, now_ms: u32) -> SupervisorAction {
        if self.state != SupervisorState::Connecting {
            return SupervisorAction::None;
        }
        self.schedule_reconnect(now_ms)
    }

    /// `{Connecting, BnepSetup, Dhcp, Online} -> Reconnecting` on an L2CAP
    /// disconnect reported out of band (spec §4.4).
    pub fn on_l2cap_disconnected(&mut self, now_ms: u32) -> SupervisorAction {
        match self.state {
            SupervisorState::Connecting
            | SupervisorState::BnepSetup
            | SupervisorState::Dhcp
            | SupervisorState::Online => self.schedule_reconnect(now_ms),
            _ => SupervisorAction::None,
        }
    }

    /// The peer answered our BNEP setup request. `Success -> Dhcp`,
    /// reconnect backoff reset to zero (spec §4.4: "Resetting to 0 happens
    /// only on a successful handshake transition"); anything else ->
    /// `Reconnecting`.
    pub fn on_bnep_setup_result(&mut self, code: SetupResponseCode, now_ms: u32) -> SupervisorAction {
        if self.state != SupervisorState::BnepSetup {
            return SupervisorAction::None;
        }
        if code == SetupResponseCode::Success {
            self.timing.current_reconnect_delay_ms = 0;
            self.timing.reconnect_attempts = 0;
            self.enter(SupervisorState::Dhcp, now_ms);
            SupervisorAction::BringNetifUpAndStartDhcp
        } else {
            logln!(LL::Debug, "supervisor: bnep setup rejected");
            self.schedule_reconnect(now_ms)
        }
    }

    /// `Dhcp -> Online` when the IP stack publishes an address.
    pub fn on_ip_acquired(&mut self, now_ms: u32) -> SupervisorAction {
        if self.state != SupervisorState::Dhcp {
            return SupervisorAction::None;
        }
        self.enter(SupervisorState::Online, now_ms);
        SupervisorAction::None
    }

    /// `Online -> Dhcp` when the IP stack reports its address lost.
    pub fn on_ip_lost(&mut self, now_ms: u32) -> SupervisorAction {
        if self.state != SupervisorState::Online {
            return SupervisorAction::None;
        }
        self.enter(SupervisorState::Dhcp, now_ms);
        SupervisorAction::RestartDhcp
    }

    /// Drive state-machine timeouts; call once per `process()` cycle
    /// regardless of whether any event arrived this cycle.
    pub fn poll_timeout(&mut self, now_ms: u32) -> SupervisorAction {
        match self.state {
            SupervisorState::Connecting => {
                if has_elapsed(now_ms, self.timing.state_entered_at_ms, L2CAP_CONNECT_TIMEOUT_MS) {
                    self.schedule_reconnect(now_ms)
                } else {
                    SupervisorAction::None
                }
            }
            SupervisorState::BnepSetup => {
                if has_elapsed(now_ms, self.timing.state_entered_at_ms, BNEP_SETUP_TIMEOUT_MS) {
                    if self.timing.setup_retries < BNEP_SETUP_RETRIES {
                        self.timing.setup_retries += 1;
                        self.enter(SupervisorState::BnepSetup, now_ms);
                        SupervisorAction::ResendBnepSetupRequest
                    } else {
                        self.schedule_reconnect(now_ms)
                    }
                } else {
                    SupervisorAction::None
                }
            }
            SupervisorState::Reconnecting => {
                if has_elapsed(
                    now_ms,
                    self.timing.state_entered_at_ms,
                    self.timing.current_reconnect_delay_ms,
                ) {
                    let cap = self.config.max_reconnect_attempts;
                    if cap == 0 || self.timing.reconnect_attempts < cap {
                        self.timing.reconnect_attempts += 1;
                        self.enter(SupervisorState::Connecting, now_ms);
                        SupervisorAction::StartL2capConnect
                    } else {
                        logln!(LL::Debug, "supervisor: max reconnect attempts reached");
                        self.enter(SupervisorState::Error, now_ms);
                        SupervisorAction::EnteredErrorState
                    }
                } else {
                    SupervisorAction::None
                }
            }
            // Dhcp: observational only (spec §4.4); the IP stack keeps
            // trying on its own and the supervisor never aborts it.
            _ => SupervisorAction::None,
        }
    }

    /// Milliseconds until the next timeout-driven transition in the current
    /// state, or `u32::MAX` where no timeout is active (spec §4.4). The
    /// facade further clamps this during handshake states; see
    /// `facade::TinyPan::next_timeout_ms`.
    pub fn next_timeout_ms(&self, now_ms: u32) -> u32 {
        let target = match self.state {
            SupervisorState::Connecting => L2CAP_CONNECT_TIMEOUT_MS,
            SupervisorState::BnepSetup => BNEP_SETUP_TIMEOUT_MS,
            SupervisorState::Reconnecting => self.timing.current_reconnect_delay_ms,
            _ => return u32::MAX,
        };
        target.saturating_sub(elapsed(now_ms, self.timing.state_entered_at_ms))
    }
}
