// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types and decisions: host profile, deployment mode, phases, backup
//! manifests, service handles, autostart channels and errors.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types shared by every application service; no I/O

pub mod autostart;
pub mod backup;
pub mod config;
pub mod error;
pub mod phase;
pub mod profile;
pub mod service;
