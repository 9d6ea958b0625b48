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

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
#![forbid(unsafe_code)]

use std::collections::HashMap;

pub mod pb {
    tonic::include_proto!("example");
}

/// Serialized `FileDescriptorSet` for the demo contract. The proxy decodes
/// this into a descriptor pool at startup to drive its dynamic message layer.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("example_descriptor");

/// Full name of the demo service.
pub const EXAMPLE_SERVICE: &str = "example.ExampleService";

/// Methods whose message names do not follow the `<Method>Request` /
/// `<Method>Response` convention, keyed by the conventional name.
pub fn type_name_overrides() -> HashMap<String, String> {
    [
        ("UnaryMethodRequest", "ExampleRequest"),
        ("UnaryMethodResponse", "ExampleResponse"),
        ("BiDiStreamRequest", "ExampleRequest"),
        ("BiDiStreamResponse", "ExampleResponse"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}
