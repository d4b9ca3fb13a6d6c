// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Filesystem persistence: the plan directory (plan.json plus built files)
//! and the append-only conversation log.

pub mod convo;
pub mod plan;

pub use convo::ConversationFile;
pub use plan::PlanDir;
