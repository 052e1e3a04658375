// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the bringup CLI

pub mod config;
pub mod deploy;

pub use self::config::ConfigCommand;
pub use self::deploy::PromptMode;
