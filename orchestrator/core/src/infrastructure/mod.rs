// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! Adapters to the host: external commands, processes and signals, network
//! probes, the container runtime, collaborator commands and persisted state.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Everything that touches the operating system

pub mod collaborators;
pub mod command;
pub mod container;
pub mod probe;
pub mod process;
pub mod retry;
pub mod state_store;
