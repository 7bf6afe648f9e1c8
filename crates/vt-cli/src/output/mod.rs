//! Terminal output helpers
//!
//! Status lines go to stderr so stdout carries only remote command output
//! (or JSON), which keeps the binary usable in pipelines.

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use vt_core::CommandResult;

fn print_status(color: Color, marker: &str, msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(color),
        Print(marker),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message with a green check mark
pub fn print_success(msg: &str) {
    print_status(Color::Green, "✓ ", msg);
}

/// Print an error message with a red cross
pub fn print_error(msg: &str) {
    print_status(Color::Red, "✗ ", msg);
}

/// Print a warning with a yellow marker
pub fn print_warning(msg: &str) {
    print_status(Color::Yellow, "! ", msg);
}

/// Print an informational message
pub fn print_info(msg: &str) {
    print_status(Color::Cyan, "→ ", msg);
}

/// Relay remote stdout and stderr to the local ones
pub fn print_command_output(result: &CommandResult) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.stdout.as_bytes())?;
    stdout.flush()?;

    let mut stderr = std::io::stderr().lock();
    stderr.write_all(result.stderr.as_bytes())?;
    stderr.flush()
}

/// Process exit code for a remote exit code, truncated the way shells do
pub fn exit_code_byte(code: i32) -> u8 {
    (code & 0xff) as u8
}
