// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! bringup core
//!
//! Profiles a Linux host, picks a deployment mode, and drives the phased
//! deployment of a web application plus its auxiliary receiver daemon.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Library consumed by the `bringup` CLI

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
