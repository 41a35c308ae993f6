//! Connection lifecycle state machine for I/O transports
//!
//! One instance runs per transport on its own thread:
//!
//! ```text
//! Stopped -> Starting -> Started | FailedToStart -> Stopping -> Stopped
//! ```
//!
//! The connect phase retries up to `max_retries` times. Between attempts the
//! task waits on its signal for `retry_interval`, so a Stop issued during the
//! wait aborts the sequence at the next retry boundary. An attempt already
//! handed to the transport is never interrupted.
//!
//! After connecting (or giving up) the task idles on its signal until told to
//! stop, restart or shut down.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use gateway_mcu::{ConnectivityType, IpInfo};
use log::{debug, error, info, warn};

use crate::link::Link;
use crate::notification::{Command, Commands};
use crate::status::CommonStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("connect timed out")]
    Timeout,
    #[error("modem is in use elsewhere")]
    ModemInUse,
    #[error("{0}")]
    Failed(String),
}

impl ConnectError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectError::ModemInUse)
    }
}

/// What a lifecycle needs from a transport
pub trait Transport: Send {
    fn kind(&self) -> ConnectivityType;

    fn init(&mut self) -> Result<(), ConnectError>;

    /// One connect attempt, bounded by the transport's own deadline
    fn connect(&mut self) -> Result<IpInfo, ConnectError>;

    fn disconnect(&mut self) -> Result<(), ConnectError>;

    fn is_connected(&self) -> bool;

    /// DNS servers to publish once connected
    fn dns_servers(&self) -> Vec<IpAddr>;

    fn deinit(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
}

/// Reject addresses a lower layer reports for a link that is not really up
///
/// IPv4 must be non-zero. IPv6 must be non-zero in each of its four 32-bit
/// words.
pub fn is_valid_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_unspecified(),
        IpAddr::V6(v6) => v6
            .octets()
            .chunks(4)
            .all(|word| word.iter().any(|b| *b != 0)),
    }
}

enum Outcome {
    Connected,
    Failed,
    /// Stopped during a retry wait; carries commands still to handle
    Aborted(Commands),
}

enum Next {
    Reconnect,
    Exit,
}

pub struct Lifecycle<T: Transport> {
    transport: T,
    link: Arc<Link>,
    policy: RetryPolicy,
    initialized: bool,
}

impl<T: Transport> Lifecycle<T> {
    pub fn new(transport: T, link: Arc<Link>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            link,
            policy,
            initialized: false,
        }
    }

    /// Task body; returns after Shutdown
    pub fn run(mut self) {
        info!("{}: task started", self.name());
        loop {
            let pending = match self.connect_with_retries() {
                Outcome::Connected | Outcome::Failed => Commands::empty(),
                Outcome::Aborted(rest) => rest,
            };
            match self.idle(pending) {
                Next::Reconnect => continue,
                Next::Exit => break,
            }
        }

        if self.initialized {
            self.transport.deinit();
        }
        self.link.context().set_status(CommonStatus::Stopped);
        info!("{}: task exiting", self.name());
    }

    fn name(&self) -> &'static str {
        self.link.context().name()
    }

    fn set_status(&self, status: CommonStatus) {
        self.link.context().set_status(status);
    }

    fn connect_with_retries(&mut self) -> Outcome {
        self.set_status(CommonStatus::Starting);

        if !self.initialized {
            if let Err(e) = self.transport.init() {
                error!("{}: init failed: {e}", self.name());
                self.set_status(CommonStatus::FailedToStart);
                return Outcome::Failed;
            }
            self.initialized = true;
        }

        let max = self.policy.max_retries;
        for attempt in 1..=max {
            if attempt > 1 {
                let commands = self.link.context().wait(Some(self.policy.retry_interval));
                if commands.contains(Command::Stop) || commands.contains(Command::Shutdown) {
                    info!("{}: connect aborted by operator", self.name());
                    self.set_status(CommonStatus::FailedToStart);
                    return Outcome::Aborted(commands.without(Command::Stop).without(Command::Start));
                }
                if !commands.is_empty() {
                    debug!("{}: ignoring {commands:?} while connecting", self.name());
                }
            }

            info!("{}: connect attempt {attempt}/{max}", self.name());
            match self.transport.connect() {
                Ok(info) if is_valid_address(&info.ip) => {
                    let dns = self.transport.dns_servers();
                    info!("{}: connected, ip {} dns {:?}", self.name(), info.ip, dns);
                    self.link.publish(info.ip, dns);
                    self.set_status(CommonStatus::Started);
                    return Outcome::Connected;
                }
                Ok(info) => {
                    warn!("{}: connect returned invalid address {}, disconnecting", self.name(), info.ip);
                    self.set_status(CommonStatus::Stopping);
                    if let Err(e) = self.transport.disconnect() {
                        error!("{}: disconnect failed: {e}", self.name());
                    }
                    self.set_status(CommonStatus::Starting);
                }
                Err(e) if !e.is_retryable() => {
                    error!("{}: {e}, giving up", self.name());
                    self.set_status(CommonStatus::FailedToStart);
                    return Outcome::Failed;
                }
                Err(e) => warn!("{}: attempt {attempt} failed: {e}", self.name()),
            }
        }

        error!("{}: exceeded {max} connect attempts", self.name());
        self.set_status(CommonStatus::FailedToStart);
        Outcome::Failed
    }

    fn idle(&mut self, mut pending: Commands) -> Next {
        loop {
            let commands = if pending.is_empty() {
                self.link.context().wait(None)
            } else {
                std::mem::take(&mut pending)
            };

            let Some(command) = commands.dominant() else {
                debug!("{}: ignoring notification {:#x}", self.name(), commands.bits());
                continue;
            };

            match command {
                Command::Start if self.is_up() => {
                    info!("{}: already started", self.name());
                }
                Command::Start => {
                    self.disconnect();
                    return Next::Reconnect;
                }
                Command::Stop => self.disconnect(),
                Command::Restart => {
                    self.disconnect();
                    return Next::Reconnect;
                }
                Command::Shutdown => {
                    self.disconnect();
                    return Next::Exit;
                }
            }
        }
    }

    fn is_up(&self) -> bool {
        self.link.is_up() && self.transport.is_connected()
    }

    /// Leave whatever state we are in for Stopped
    fn disconnect(&mut self) {
        if self.link.status() == CommonStatus::Started || self.transport.is_connected() {
            self.set_status(CommonStatus::Stopping);
            if let Err(e) = self.transport.disconnect() {
                error!("{}: disconnect failed: {e}", self.name());
            }
            self.link.clear_addressing();
        }
        self.set_status(CommonStatus::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wait_until;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct Script {
        connects: Arc<AtomicUsize>,
        disconnects: Arc<AtomicUsize>,
        connected: Arc<AtomicBool>,
        results: Arc<Mutex<Vec<Result<IpInfo, ConnectError>>>>,
        fallback: Arc<Mutex<Option<Result<IpInfo, ConnectError>>>>,
    }

    struct ScriptedTransport {
        script: Script,
    }

    impl Transport for ScriptedTransport {
        fn kind(&self) -> ConnectivityType {
            ConnectivityType::WifiStation
        }

        fn init(&mut self) -> Result<(), ConnectError> {
            Ok(())
        }

        fn connect(&mut self) -> Result<IpInfo, ConnectError> {
            self.script.connects.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut results = self.script.results.lock().unwrap();
                if results.is_empty() {
                    None
                } else {
                    Some(results.remove(0))
                }
            };
            let result = next
                .or_else(|| self.script.fallback.lock().unwrap().clone())
                .unwrap_or(Ok(ok_ip()));
            if result.is_ok() {
                self.script.connected.store(true, Ordering::SeqCst);
            }
            result
        }

        fn disconnect(&mut self) -> Result<(), ConnectError> {
            self.script.disconnects.fetch_add(1, Ordering::SeqCst);
            self.script.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.script.connected.load(Ordering::SeqCst)
        }

        fn dns_servers(&self) -> Vec<IpAddr> {
            vec![IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))]
        }

        fn deinit(&mut self) {}
    }

    fn ok_ip() -> IpInfo {
        IpInfo::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
    }

    fn zero_ip() -> IpInfo {
        IpInfo::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    fn spawn(script: &Script, max_retries: u32, interval_ms: u64) -> (Arc<Link>, JoinHandle<()>) {
        let link = Arc::new(Link::new(ConnectivityType::WifiStation));
        let lifecycle = Lifecycle::new(
            ScriptedTransport { script: script.clone() },
            link.clone(),
            RetryPolicy {
                max_retries,
                retry_interval: Duration::from_millis(interval_ms),
            },
        );
        let task = thread::spawn(move || lifecycle.run());
        (link, task)
    }

    fn shutdown(link: &Link, task: JoinHandle<()>) {
        link.notify(Command::Shutdown);
        task.join().unwrap();
        assert_eq!(link.status(), CommonStatus::Stopped);
    }

    #[test]
    fn address_validity() {
        assert!(!is_valid_address(&IpAddr::V4(Ipv4Addr::UNSPECIFIED)));
        assert!(is_valid_address(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
        assert!(!is_valid_address(&IpAddr::V6(Ipv6Addr::UNSPECIFIED)));
        assert!(!is_valid_address(&IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1))));
        assert!(is_valid_address(&IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 1, 0, 1, 0, 1))));
    }

    #[test]
    fn connects_and_publishes() {
        let script = Script::default();
        let (link, task) = spawn(&script, 3, 10);
        assert!(wait_until(Duration::from_secs(2), || link.is_up()));
        assert_eq!(link.ip(), Some(ok_ip().ip));
        assert_eq!(link.dns().len(), 1);
        shutdown(&link, task);
        assert_eq!(link.ip(), None);
    }

    #[test]
    fn start_while_started_is_a_no_op() {
        let script = Script::default();
        let (link, task) = spawn(&script, 3, 10);
        assert!(wait_until(Duration::from_secs(2), || link.is_up()));

        link.notify(Command::Start);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(link.status(), CommonStatus::Started);
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 0);
        shutdown(&link, task);
    }

    #[test]
    fn zero_address_exhausts_retries() {
        let script = Script::default();
        *script.fallback.lock().unwrap() = Some(Ok(zero_ip()));
        let start = Instant::now();
        let (link, task) = spawn(&script, 3, 100);

        assert!(wait_until(Duration::from_secs(3), || {
            link.status() == CommonStatus::FailedToStart
        }));
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(script.connects.load(Ordering::SeqCst), 3);
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 3);
        assert_eq!(link.ip(), None);
        shutdown(&link, task);
    }

    #[test]
    fn stop_during_retry_wait_aborts() {
        let script = Script::default();
        *script.fallback.lock().unwrap() = Some(Err(ConnectError::Timeout));
        let (link, task) = spawn(&script, 10, 200);

        assert!(wait_until(Duration::from_secs(1), || {
            script.connects.load(Ordering::SeqCst) == 1
        }));
        link.notify(Command::Stop);
        assert!(wait_until(Duration::from_millis(200), || {
            link.status() == CommonStatus::FailedToStart
        }));
        thread::sleep(Duration::from_millis(250));
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        shutdown(&link, task);
    }

    #[test]
    fn modem_in_use_is_not_retried() {
        let script = Script::default();
        *script.fallback.lock().unwrap() = Some(Err(ConnectError::ModemInUse));
        let (link, task) = spawn(&script, 5, 10);
        assert!(wait_until(Duration::from_secs(1), || {
            link.status() == CommonStatus::FailedToStart
        }));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        shutdown(&link, task);
    }

    #[test]
    fn start_after_failure_retries() {
        let script = Script::default();
        script.results.lock().unwrap().push(Err(ConnectError::ModemInUse));
        let (link, task) = spawn(&script, 3, 10);
        assert!(wait_until(Duration::from_secs(1), || {
            link.status() == CommonStatus::FailedToStart
        }));

        link.notify(Command::Start);
        assert!(wait_until(Duration::from_secs(1), || link.is_up()));
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
        shutdown(&link, task);
    }

    #[test]
    fn stop_then_restart() {
        let script = Script::default();
        let (link, task) = spawn(&script, 3, 10);
        assert!(wait_until(Duration::from_secs(1), || link.is_up()));

        link.notify(Command::Stop);
        assert!(wait_until(Duration::from_secs(1), || link.status() == CommonStatus::Stopped));
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(link.ip(), None);

        link.notify(Command::Restart);
        assert!(wait_until(Duration::from_secs(1), || link.is_up()));
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
        shutdown(&link, task);
    }

    #[test]
    fn ip_lost_reconnects() {
        let script = Script::default();
        let (link, task) = spawn(&script, 3, 10);
        assert!(wait_until(Duration::from_secs(1), || link.is_up()));

        link.ip_lost();
        assert!(wait_until(Duration::from_secs(1), || {
            script.connects.load(Ordering::SeqCst) == 2 && link.is_up()
        }));
        assert_eq!(script.disconnects.load(Ordering::SeqCst), 1);
        shutdown(&link, task);
    }

    #[test]
    fn shutdown_during_retry_wait_ends_task() {
        let script = Script::default();
        *script.fallback.lock().unwrap() = Some(Err(ConnectError::Failed("no ap".into())));
        let (link, task) = spawn(&script, 10, 200);
        assert!(wait_until(Duration::from_secs(1), || {
            script.connects.load(Ordering::SeqCst) == 1
        }));
        link.notify(Command::Shutdown);
        task.join().unwrap();
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
    }
}
