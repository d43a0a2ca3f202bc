//! Named command signals the core reacts to.
//!
//! Commands are opaque, unparameterized triggers arriving from outside the
//! core (the host's command palette in an editor; a stdin control line in
//! the standalone daemon). They travel on a broadcast channel so the
//! compile-trigger scope can re-subscribe every time it is rebuilt.

use crate::log;
use std::io::BufRead;
use tokio::sync::broadcast;

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Compile every currently open surface now.
    CompileNow,
    /// Toggle the host panel (rendered outside the core).
    TogglePanel,
}

/// Create the command channel.
pub fn command_channel() -> broadcast::Sender<Command> {
    broadcast::channel(COMMAND_BUFFER).0
}

/// Feed commands from stdin control lines (`compile`, `toggle`).
pub fn spawn_stdin_commands(tx: broadcast::Sender<Command>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match line.trim() {
                "compile" => {
                    let _ = tx.send(Command::CompileNow);
                }
                "toggle" => {
                    let _ = tx.send(Command::TogglePanel);
                }
                "" => {}
                other => {
                    log!("control"; "unknown command `{other}` (expected `compile` or `toggle`)");
                }
            }
        }
    });
}
