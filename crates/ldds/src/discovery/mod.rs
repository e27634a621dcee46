// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Discovery-side bookkeeping for remote endpoints.

pub mod proxy;

pub use proxy::{ProxyReader, ProxyWriter};
