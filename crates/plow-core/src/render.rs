// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Fixed-rate reply rendering.
//!
//! Fragments arrive much faster than a terminal can repaint, so the reply
//! is never painted per-chunk. A ticker samples the latest published frame
//! on a fixed period; the `watch` channel's changed flag is the dirty flag,
//! so an unchanged reply costs nothing and a burst of fragments collapses
//! into one repaint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::machine::{ReplyFrame, SessionView};

/// Spawn the reply ticker. It stops on its own when the reply phase ends
/// (the machine publishes a non-live frame), when the frame sender goes
/// away, or when `cancel` flips true.
pub fn spawn_render_ticker<V: SessionView>(
    mut frame_rx: watch::Receiver<ReplyFrame>,
    view: Arc<Mutex<V>>,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // A slow terminal must not cause a burst of catch-up repaints.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match frame_rx.has_changed() {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(_) => break,
                    }
                    let frame = frame_rx.borrow_and_update().clone();
                    if !frame.live {
                        // The machine paints the final text itself.
                        break;
                    }
                    view.lock().await.render_reply(&frame.text).await;
                }
                res = cancel.changed() => {
                    if res.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
