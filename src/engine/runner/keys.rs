//! Single-key console commands available while watching.

use std::io::IsTerminal;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    /// Leave the process right away.
    Quit,
    /// Rebuild the feature-detection script.
    Features,
}

pub(crate) fn map_key(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
        KeyCode::Char('q') => Some(Command::Quit),
        KeyCode::Char('m') => Some(Command::Features),
        _ => None,
    }
}

/// Keeps the terminal in raw mode for as long as it lives.
pub(crate) struct RawMode;

impl RawMode {
    pub(crate) fn restore(&self) {
        if let Err(e) = disable_raw_mode() {
            tracing::warn!("couldn't restore the terminal: {e}");
        }
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Start reading key presses on a background thread. Returns `None` when
/// stdin is not an interactive terminal, in which case no keys are read.
///
/// The callback returns `false` to stop the reader.
pub(crate) fn listen<F>(mut on_command: F) -> Option<RawMode>
where
    F: FnMut(Command) -> bool + Send + 'static,
{
    if !std::io::stdin().is_terminal() {
        tracing::debug!("stdin is not a terminal, keyboard commands are disabled");
        return None;
    }

    if let Err(e) = enable_raw_mode() {
        tracing::warn!("couldn't enable raw mode, keyboard commands are disabled: {e}");
        return None;
    }

    std::thread::spawn(move || {
        loop {
            if !event::poll(Duration::from_millis(100)).unwrap_or(false) {
                continue;
            }

            match event::read() {
                Ok(Event::Key(key)) => {
                    tracing::trace!("key pressed: {:?}", key);
                    if let Some(command) = map_key(&key)
                        && !on_command(command)
                    {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("couldn't read from the terminal: {e}");
                    break;
                }
            }
        }
    });

    tracing::info!("press 'm' to rebuild feature detection, 'q' to quit");
    Some(RawMode)
}
