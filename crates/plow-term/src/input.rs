// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Raw-mode keyboard listener.

use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use plow_core::Key;

/// Decode one crossterm key event. Key-up events (reported by some
/// terminals) are ignored by the caller via `None`.
pub fn map_key(event: KeyEvent) -> Option<Key> {
    if event.kind == KeyEventKind::Release {
        return None;
    }
    let key = match event.code {
        KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => Key::CtrlC,
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Esc => Key::Esc,
        KeyCode::Enter => Key::Enter,
        _ => Key::Other,
    };
    Some(key)
}

/// Spawn the key listener. The returned channel yields decoded keys until
/// `cancel` flips true or the event stream ends; read errors are forwarded
/// so the session can fail rather than go deaf.
pub fn spawn_key_listener(mut cancel: watch::Receiver<bool>) -> mpsc::Receiver<anyhow::Result<Key>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut events = EventStream::new();
        loop {
            tokio::select! {
                maybe = events.next() => {
                    match maybe {
                        Some(Ok(Event::Key(key_event))) => {
                            if let Some(key) = map_key(key_event) {
                                trace!(?key, "key pressed");
                                if tx.send(Ok(key)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = tx.send(Err(e.into())).await;
                            return;
                        }
                        None => return,
                    }
                }
                res = cancel.changed() => {
                    if res.is_err() || *cancel.borrow() {
                        return;
                    }
                }
            }
        }
    });
    rx
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
