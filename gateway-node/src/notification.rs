//! Per-task notification signal
//!
//! Each task owns one [`Signal`]: a 32-bit word that other tasks (and
//! collaborator callbacks) OR bits into, and that the owning task blocks on.
//! Setting never blocks and never loses a bit; waiting reads and clears in one
//! atomic step. Only the thread that first waits on a signal may wait on it.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

/// Clear every bit on exit
pub const CLEAR_ALL: u32 = u32::MAX;

#[derive(Debug, Default)]
pub struct Signal {
    bits: AtomicU32,
    waiter: OnceLock<Thread>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// OR `bits` into the signal and wake the waiter
    ///
    /// Lock-free, so it is safe from callback context.
    pub fn set(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::AcqRel);
        if let Some(waiter) = self.waiter.get() {
            waiter.unpark();
        }
    }

    /// Bits set and not yet consumed
    pub fn pending(&self) -> u32 {
        self.bits.load(Ordering::Acquire)
    }

    /// Block until any bit is set or `timeout` elapses (`None` waits forever)
    ///
    /// Bits in `clear_on_entry` are dropped before waiting; bits in
    /// `clear_on_exit` are cleared atomically with the read. Returns `None` on
    /// timeout.
    pub fn wait(&self, clear_on_entry: u32, clear_on_exit: u32, timeout: Option<Duration>) -> Option<u32> {
        let current = thread::current();
        let waiter = self.waiter.get_or_init(|| current.clone());
        assert_eq!(waiter.id(), current.id(), "signal waited on from a second thread");

        if clear_on_entry != 0 {
            self.bits.fetch_and(!clear_on_entry, Ordering::AcqRel);
        }

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            let value = self.bits.fetch_and(!clear_on_exit, Ordering::AcqRel);
            if value != 0 {
                return Some(value);
            }

            match (timeout, deadline) {
                (None, _) | (Some(_), None) => thread::park(),
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        }
    }

    /// Send a typed command
    pub fn post(&self, command: Command) {
        self.set(command.bit());
    }

    /// Wait for commands; an empty set means the wait timed out
    pub fn wait_commands(&self, timeout: Option<Duration>) -> Commands {
        Commands(self.wait(0, CLEAR_ALL, timeout).unwrap_or(0))
    }
}

/// Control commands every task understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Stop,
    Restart,
    Shutdown,
}

impl Command {
    pub const fn bit(self) -> u32 {
        match self {
            Command::Start => 0x01,
            Command::Stop => 0x02,
            Command::Restart => 0x04,
            Command::Shutdown => 0x08,
        }
    }

    const ALL: [Command; 4] = [Command::Start, Command::Stop, Command::Restart, Command::Shutdown];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => f.write_str("Start"),
            Command::Stop => f.write_str("Stop"),
            Command::Restart => f.write_str("Restart"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// The commands merged into one wakeup
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Commands(u32);

impl Commands {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, command: Command) -> bool {
        self.0 & command.bit() != 0
    }

    /// True when no known command is present
    pub fn is_empty(self) -> bool {
        Command::ALL.iter().all(|c| !self.contains(*c))
    }

    pub fn with(self, command: Command) -> Self {
        Self(self.0 | command.bit())
    }

    pub fn without(self, command: Command) -> Self {
        Self(self.0 & !command.bit())
    }

    /// Resolve a merged wakeup to the one command to act on
    ///
    /// Shutdown wins, then Restart. Stop and Start landing together mean the
    /// operator asked for a stop followed by a start, which is a restart.
    pub fn dominant(self) -> Option<Command> {
        if self.contains(Command::Shutdown) {
            Some(Command::Shutdown)
        } else if self.contains(Command::Restart)
            || (self.contains(Command::Stop) && self.contains(Command::Start))
        {
            Some(Command::Restart)
        } else if self.contains(Command::Stop) {
            Some(Command::Stop)
        } else if self.contains(Command::Start) {
            Some(Command::Start)
        } else {
            None
        }
    }
}

impl From<Command> for Commands {
    fn from(command: Command) -> Self {
        Self(command.bit())
    }
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for command in Command::ALL {
            if self.contains(command) {
                set.entry(&command);
            }
        }
        let unknown = self.0 & !Command::ALL.iter().fold(0, |acc, c| acc | c.bit());
        if unknown != 0 {
            set.entry(&format_args!("{unknown:#x}"));
        }
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn bits_accumulate_until_waited() {
        let signal = Signal::new();
        signal.set(0x1);
        signal.set(0x4);
        signal.set(0x1);
        assert_eq!(signal.wait(0, CLEAR_ALL, Some(Duration::ZERO)), Some(0x5));
        assert_eq!(signal.pending(), 0);
    }

    #[test]
    fn wait_times_out_with_nothing() {
        let signal = Signal::new();
        let start = Instant::now();
        assert_eq!(signal.wait(0, CLEAR_ALL, Some(Duration::from_millis(30))), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn clear_masks_are_honored() {
        let signal = Signal::new();
        signal.set(0x3);
        assert_eq!(signal.wait(0x1, 0x0, Some(Duration::ZERO)), Some(0x2));
        assert_eq!(signal.pending(), 0x2);
    }

    #[test]
    fn set_wakes_blocked_waiter() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_commands(None))
        };
        thread::sleep(Duration::from_millis(20));
        signal.post(Command::Restart);
        let commands = waiter.join().unwrap();
        assert_eq!(commands.dominant(), Some(Command::Restart));
    }

    #[test]
    fn merged_stop_start_is_a_restart() {
        let merged = Commands::from(Command::Stop).with(Command::Start);
        assert_eq!(merged.dominant(), Some(Command::Restart));
        assert_eq!(merged.with(Command::Shutdown).dominant(), Some(Command::Shutdown));
        assert_eq!(Commands::from(Command::Stop).dominant(), Some(Command::Stop));
    }

    #[test]
    fn unknown_bits_are_not_commands() {
        let commands = Commands::from_bits(0x100);
        assert!(commands.is_empty());
        assert_eq!(commands.dominant(), None);
        assert_eq!(format!("{commands:?}"), "{0x100}");
    }
}
