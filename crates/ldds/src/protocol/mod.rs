// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! RTPS wire protocol pieces used by the core: submessage framing and the
//! secure submessage identifiers.

pub mod submsg;
