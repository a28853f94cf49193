// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod config;
pub mod context;
pub mod errors;
pub mod message;
