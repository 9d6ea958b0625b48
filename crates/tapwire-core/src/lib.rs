// Copyright [2026] [Tapwire Contributors]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Tapwire Contributors
// SPDX-License-Identifier: Apache-2.0

//! tapwire-core
//!
//! The interception and forwarding engine of the tapwire gRPC proxy:
//! - canonical JSON codec over dynamic protobuf messages
//! - a service binding built once at startup, with a type-name override table
//! - per-call hold/release gates driven by an operator panel
//! - queue-bridged duplex streaming with one pump per method
//! - a generic dispatcher serving arbitrary methods of one bound service

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod binding;
pub mod bridge;
pub mod canon;
pub mod client;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod observer;
pub mod panel;
pub mod record;

pub use crate::error::{ProxyError, ProxyResult};
pub use crate::gate::ReleaseMode;
pub use crate::record::{CallStatus, RecordId};
