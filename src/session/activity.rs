//! Interaction-driven idle/expiry tracking, decoupled from any rendering
//! layer. An explicit timer task plus an event subscription with a clear
//! start/stop lifecycle: `start` spawns the timer, `stop` aborts it and drops
//! the subscription, so navigation can never leak timers or double-subscribe.
//!
//! State machine: `Active -> Idle` after the idle window of silence,
//! `Idle -> Active` on any qualifying interaction, `Active|Idle -> Expired`
//! once the session window lapses. `Expired` is terminal and one-shot: the
//! timer fires the logout callback exactly once and exits.

use std::time::Duration;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::session::state::SharedSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Active,
    Idle,
    Expired,
}

/// Qualifying interactions. Anything here counts as user presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub idle_timeout: Duration,
    pub session_timeout: Duration,
    /// Timer resolution; transitions are detected on this cadence.
    pub tick: Duration,
}

impl MonitorConfig {
    pub fn from_engine(cfg: &EngineConfig) -> Self {
        MonitorConfig {
            idle_timeout: cfg.idle_timeout,
            session_timeout: cfg.session_timeout,
            tick: Duration::from_secs(1),
        }
    }
}

/// Handle to a running monitor. Dropping or `stop`ping it detaches the event
/// subscription and kills the timer immediately.
pub struct MonitorHandle {
    events: mpsc::UnboundedSender<Interaction>,
    state_rx: watch::Receiver<ActivityState>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Report a qualifying interaction. Cheap and non-blocking; callers wire
    /// this to their input event sources.
    pub fn record(&self, interaction: Interaction) {
        let _ = self.events.send(interaction);
    }

    pub fn state(&self) -> ActivityState { *self.state_rx.borrow() }

    pub fn subscribe(&self) -> watch::Receiver<ActivityState> { self.state_rx.clone() }

    pub fn stop(self) {
        self.task.abort();
        debug!(target: "brandsight::activity", "monitor stopped");
    }
}

/// Start the monitor. `on_expire` runs exactly once, when and if the session
/// window lapses with no interaction; it is where token/vault teardown hooks
/// in. Session-state bookkeeping (`last_activity`, the expiry notice and the
/// login redirect) is handled here.
pub fn start(
    cfg: MonitorConfig,
    session: SharedSession,
    on_expire: Box<dyn FnOnce() + Send>,
) -> MonitorHandle {
    let (events, mut rx_events) = mpsc::unbounded_channel::<Interaction>();
    let (tx_state, state_rx) = watch::channel(ActivityState::Active);
    debug!(target: "brandsight::activity",
        "monitor started idle={}s session={}s",
        cfg.idle_timeout.as_secs(), cfg.session_timeout.as_secs());

    let task = tokio::spawn(async move {
        let mut last_interaction = Instant::now();
        let mut state = ActivityState::Active;
        let mut on_expire = Some(on_expire);
        let mut ticker = tokio::time::interval(cfg.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                ev = rx_events.recv() => {
                    match ev {
                        Some(_) => {
                            last_interaction = Instant::now();
                            session.touch_activity();
                            if state == ActivityState::Idle {
                                state = ActivityState::Active;
                                tx_state.send_replace(state);
                                debug!(target: "brandsight::activity", "idle -> active");
                            }
                        }
                        // Handle dropped: detach cleanly without transitions.
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let silent_for = last_interaction.elapsed();
                    if silent_for >= cfg.session_timeout {
                        state = ActivityState::Expired;
                        tx_state.send_replace(state);
                        warn!(target: "brandsight::activity",
                            "session expired after {}s of silence", silent_for.as_secs());
                        session.force_logout("session_expired");
                        if let Some(expire) = on_expire.take() { expire(); }
                        // Terminal: no transitions leave Expired.
                        break;
                    }
                    if silent_for >= cfg.idle_timeout && state == ActivityState::Active {
                        state = ActivityState::Idle;
                        tx_state.send_replace(state);
                        debug!(target: "brandsight::activity", "active -> idle");
                    }
                }
            }
        }
    });

    MonitorHandle { events, state_rx, task }
}
