//! Terminal presentation of pairing codes
//!
//! The session asks for an out-of-band pairing step by emitting a code; the
//! operator scans it from the terminal as a QR code.

use std::io::{self, Write};

use qrcode::{Color, QrCode};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use wacheck_core::{SessionEvent, SessionState};

/// Light border (in modules) around the code; scanners need it
const QUIET_ZONE: usize = 2;

/// Render `code` as a QR code made of half-block characters.
///
/// Light modules are drawn as ink so the result scans on dark terminal
/// backgrounds. Returns `None` when the payload does not fit a QR code.
pub fn render_qr(code: &str) -> Option<String> {
    let qr = QrCode::new(code.as_bytes()).ok()?;
    let width = qr.width();
    let size = width + 2 * QUIET_ZONE;

    let is_light = |x: usize, y: usize| -> bool {
        if x < QUIET_ZONE || y < QUIET_ZONE || x >= width + QUIET_ZONE || y >= width + QUIET_ZONE
        {
            return true;
        }
        qr[(x - QUIET_ZONE, y - QUIET_ZONE)] == Color::Light
    };

    let mut result = String::new();
    // Each character represents 2 vertical pixels
    for y in (0..size).step_by(2) {
        for x in 0..size {
            let top = is_light(x, y);
            let bottom = y + 1 < size && is_light(x, y + 1);
            let ch = match (top, bottom) {
                (true, true) => '\u{2588}',  // Full block █
                (true, false) => '\u{2580}', // Upper half ▀
                (false, true) => '\u{2584}', // Lower half ▄
                (false, false) => ' ',
            };
            result.push(ch);
        }
        result.push('\n');
    }
    Some(result)
}

/// Write the operator-facing output for one event
fn present(event: &SessionEvent, out: &mut impl Write) -> io::Result<()> {
    match event {
        SessionEvent::CredentialRequired { code } => {
            writeln!(out, "Scan this code with the phone that owns the account:")?;
            match render_qr(code) {
                Some(qr) => write!(out, "{}", qr)?,
                None => writeln!(out, "{}", code)?,
            }
            out.flush()
        }
        SessionEvent::StateChanged {
            to: SessionState::Ready,
            ..
        } => {
            writeln!(out, "Session ready.")?;
            out.flush()
        }
        SessionEvent::StateChanged { .. } => Ok(()),
    }
}

/// Print pairing codes (and readiness) to stderr until the session goes away
pub fn spawn_presenter(mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = present(&event, &mut io::stderr().lock()) {
                        tracing::warn!("Failed to present session event: {}", e);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Pairing presenter lagged behind session events");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Pairing presenter stopped");
    })
}
