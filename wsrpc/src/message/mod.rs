//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Wire messages: envelopes, bodies, typed operations, and error records.

pub mod builtins;
mod envelope;
mod error_details;
mod types;

pub use envelope::{ops, Envelope};
pub use error_details::{ErrorDetails, StackFrame, DEFAULT_MAX_STACK_DEPTH};
pub use types::{CodecError, JsonConverter, MessageType, RawJson, SimpleJsonConverter};

pub(crate) use envelope::epoch_millis;
