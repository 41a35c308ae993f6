//! Terminal console over stdin/stdout
//!
//! A terminal delivers whole lines, so every non-blank character of a line
//! is handed to the menu as a separate keystroke.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use gateway_mcu::Console;

#[derive(Default)]
pub struct StdinConsole {
    pending: VecDeque<char>,
}

impl StdinConsole {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Console for StdinConsole {
    fn read_key(&mut self) -> Option<char> {
        while self.pending.is_empty() {
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => self.pending.extend(line.chars().filter(|c| !c.is_whitespace())),
                Err(e) => {
                    log::error!("console read failed: {e}");
                    return None;
                }
            }
        }
        self.pending.pop_front()
    }

    fn print_line(&mut self, line: &str) {
        let mut out = io::stdout().lock();
        // stdout gone: nowhere left to report it
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}
