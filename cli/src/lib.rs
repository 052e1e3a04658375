// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! bringup CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command handlers, terminal prompts and progress output

pub mod commands;
pub mod console;
pub mod signals;
