// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod api;
pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod installations;
pub mod launch;
pub mod pkce;
pub mod renewal;
pub mod retry;
pub mod scheduler;
pub mod session;
