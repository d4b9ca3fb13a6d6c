// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Terminal frontend: spinner, markdown rendering, the in-place build
//! table, and the raw-mode key listener.

pub mod input;
pub mod markdown;
pub mod screen;
pub mod spinner;

pub use input::spawn_key_listener;
pub use markdown::render_markdown;
pub use screen::TerminalScreen;
pub use spinner::Spinner;
