// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod errors;
pub mod field;
pub mod geometry;
pub mod repository;
pub mod sync;
