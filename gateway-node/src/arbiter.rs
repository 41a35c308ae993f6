//! Exclusive ownership of the cellular modem
//!
//! Two consumers want the one modem: the cellular link (a long-lived PPP data
//! session) and the BLE bridge (short command-mode leases for UICC
//! transactions). The arbiter is the only holder of the [`ModemManager`];
//! everything else goes through it.
//!
//! A lease is admitted without blocking indefinitely: if another modem
//! operation is in flight and does not finish within the caller's timeout,
//! `acquire` fails with [`ArbiterError::Busy`] and the caller tries later.
//! Releasing a lease always ends in one of two terminal actions: the modem is
//! closed (the lease opened it) or put back into the mode it had before.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use gateway_mcu::{IpInfo, ModemConnectParams, ModemError, ModemManager, ModemMode};
use log::{debug, error, info, warn};

use crate::lock;

#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    #[error("modem is already leased")]
    AlreadyInUse,
    #[error("modem is busy, try again later")]
    Busy,
    #[error("failed to switch modem to {0} mode")]
    ModeSwitchFailed(ModemMode),
    #[error(transparent)]
    Modem(#[from] ModemError),
}

#[derive(Debug, Clone, Copy)]
struct LeaseState {
    id: u64,
    opened_by_lease: bool,
    saved_mode: ModemMode,
    switch_timeout: Duration,
}

#[derive(Debug, Default)]
struct ArbiterState {
    /// A modem call is running outside the state lock
    busy: bool,
    /// The cellular link has the modem open for PPP
    data_session: bool,
    lease: Option<LeaseState>,
    next_lease: u64,
}

pub struct ModemArbiter {
    modem: Mutex<Box<dyn ModemManager>>,
    state: Mutex<ArbiterState>,
    changed: Condvar,
}

impl ModemArbiter {
    pub fn new(modem: Box<dyn ModemManager>) -> Self {
        Self {
            modem: Mutex::new(modem),
            state: Mutex::new(ArbiterState::default()),
            changed: Condvar::new(),
        }
    }

    /// Take a command-mode lease on the modem
    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<ModemLease, ArbiterError> {
        let deadline = Instant::now().checked_add(timeout);
        {
            let mut state = self.wait_idle(deadline)?;
            if state.lease.is_some() {
                return Err(ArbiterError::AlreadyInUse);
            }
            state.busy = true;
        }

        let result = self.take_over(timeout);

        let mut state = self.lock_state();
        state.busy = false;
        let result = result.map(|(opened_by_lease, saved_mode)| {
            state.next_lease += 1;
            let id = state.next_lease;
            state.lease = Some(LeaseState {
                id,
                opened_by_lease,
                saved_mode,
                switch_timeout: timeout,
            });
            info!("modem leased (saved mode {saved_mode}, opened by lease: {opened_by_lease})");
            ModemLease {
                arbiter: self.clone(),
                id,
                released: false,
            }
        });
        drop(state);
        self.changed.notify_all();
        result
    }

    fn take_over(&self, timeout: Duration) -> Result<(bool, ModemMode), ArbiterError> {
        let mut modem = lock(&self.modem);
        match modem.modem_mode() {
            Err(ModemError::NotOpen) => {
                debug!("modem closed, opening in command mode");
                modem
                    .connect_modem(&ModemConnectParams::command_mode(), Some(timeout))
                    .map_err(|e| match e {
                        ModemError::Timeout => {
                            warn!("modem open timed out, try again later");
                            ArbiterError::Busy
                        }
                        ModemError::InUse => ArbiterError::AlreadyInUse,
                        other => ArbiterError::Modem(other),
                    })?;
                Ok((true, ModemMode::Command))
            }
            Err(e) => Err(e.into()),
            Ok(ModemMode::Ppp) => {
                modem.change_modem_mode(ModemMode::Command, timeout).map_err(|e| {
                    error!("switching modem to command mode failed: {e}");
                    ArbiterError::ModeSwitchFailed(ModemMode::Command)
                })?;
                Ok((false, ModemMode::Ppp))
            }
            Ok(ModemMode::Command) => Ok((false, ModemMode::Command)),
        }
    }

    fn release(&self, id: u64) {
        let lease = {
            let mut state = self.lock_state();
            while state.busy {
                state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            match state.lease {
                Some(lease) if lease.id == id => {
                    state.lease = None;
                    state.busy = true;
                    lease
                }
                _ => return,
            }
        };

        {
            let mut modem = lock(&self.modem);
            if lease.saved_mode == ModemMode::Ppp {
                if let Err(e) = modem.change_modem_mode(ModemMode::Ppp, lease.switch_timeout) {
                    error!("restoring modem to ppp mode failed: {e}");
                }
            }
            if lease.opened_by_lease {
                match modem.disconnect_modem(None) {
                    Ok(()) => debug!("modem closed after lease"),
                    Err(e) => error!("closing modem after lease failed: {e}"),
                }
            }
        }
        info!("modem lease released");

        self.lock_state().busy = false;
        self.changed.notify_all();
    }

    /// Open the modem for the cellular link and bring up PPP
    pub fn open_data_session(
        &self,
        params: &ModemConnectParams,
        timeout: Option<Duration>,
    ) -> Result<Option<IpInfo>, ArbiterError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        {
            let mut state = self.wait_idle(deadline)?;
            if state.lease.is_some() {
                return Err(ArbiterError::AlreadyInUse);
            }
            state.busy = true;
        }

        let result = lock(&self.modem).connect_modem(params, timeout);

        let mut state = self.lock_state();
        state.busy = false;
        if result.is_ok() {
            state.data_session = true;
        }
        drop(state);
        self.changed.notify_all();
        result.map_err(ArbiterError::from)
    }

    /// Close the cellular link's session
    ///
    /// Waits up to `timeout` for an outstanding lease. If the lease outlives
    /// the wait, ownership passes to it and its release closes the modem.
    pub fn close_data_session(&self, timeout: Option<Duration>) -> Result<(), ArbiterError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.lock_state();
        loop {
            if !state.busy && state.lease.is_none() {
                break;
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if !state.busy && remaining.is_zero() {
                break;
            }
            state = if remaining == Duration::MAX || state.busy {
                self.changed.wait(state).unwrap_or_else(PoisonError::into_inner)
            } else {
                self.changed
                    .wait_timeout(state, remaining)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            };
        }

        if !state.data_session {
            return Ok(());
        }

        if let Some(lease) = state.lease.as_mut() {
            warn!("modem still leased while closing ppp, the lease will close it");
            lease.opened_by_lease = true;
            lease.saved_mode = ModemMode::Command;
            state.data_session = false;
            return Ok(());
        }

        state.busy = true;
        drop(state);

        let result = lock(&self.modem).disconnect_modem(timeout);

        let mut state = self.lock_state();
        state.busy = false;
        state.data_session = false;
        drop(state);
        self.changed.notify_all();
        result.map_err(ArbiterError::from)
    }

    pub fn init(&self) -> Result<(), ModemError> {
        lock(&self.modem).init()
    }

    pub fn deinit(&self) -> Result<(), ModemError> {
        lock(&self.modem).deinit()
    }

    /// DNS servers negotiated over PPP, up to `count`
    pub fn dns_servers(&self, count: usize) -> Vec<std::net::IpAddr> {
        let modem = lock(&self.modem);
        (0..count).filter_map(|i| modem.dns_server(i)).collect()
    }

    pub fn is_leased(&self) -> bool {
        self.lock_state().lease.is_some()
    }

    pub fn has_data_session(&self) -> bool {
        self.lock_state().data_session
    }

    fn lock_state(&self) -> MutexGuard<'_, ArbiterState> {
        lock(&self.state)
    }

    /// Wait until no modem call is in flight; `None` waits without limit
    fn wait_idle(&self, deadline: Option<Instant>) -> Result<MutexGuard<'_, ArbiterState>, ArbiterError> {
        let mut state = self.lock_state();
        while state.busy {
            state = match deadline {
                None => self.changed.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ArbiterError::Busy);
                    }
                    self.changed
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        Ok(state)
    }
}

/// A held command-mode lease; dropping it releases the modem
pub struct ModemLease {
    arbiter: Arc<ModemArbiter>,
    id: u64,
    released: bool,
}

impl ModemLease {
    /// Restore or close the modem and give up ownership
    pub fn release(mut self) {
        self.released = true;
        self.arbiter.release(self.id);
    }
}

impl Drop for ModemLease {
    fn drop(&mut self) {
        if !self.released {
            self.arbiter.release(self.id);
        }
    }
}

impl std::fmt::Debug for ModemLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemLease").field("id", &self.id).finish()
    }
}
