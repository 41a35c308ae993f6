//! Console Abstraction Traits

/// Trait for the interactive console
///
/// Reads block until a key arrives; `None` means the input is gone for good.
pub trait Console: Send {
    /// Read one keystroke
    fn read_key(&mut self) -> Option<char>;

    /// Print one line
    fn print_line(&mut self, line: &str);
}
