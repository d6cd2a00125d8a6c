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

//! The serializable error record carried by `ERROR` replies.

use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::error::Error as StdError;

/// Default number of stack frames included when a caller asks for a bounded
/// trace without picking a depth.
pub const DEFAULT_MAX_STACK_DEPTH: usize = 3;

/// One frame of a captured stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// The module path (or type) owning the frame.
    pub class: String,
    /// The function name within `class`.
    pub method: String,
    /// Source file, when the capture resolved one.
    #[serde(default)]
    pub file: Option<String>,
    /// Source line, when the capture resolved one.
    #[serde(default)]
    pub line: Option<u32>,
}

/// A subset of information from an error that is safe to serialize and send
/// to a peer.
///
/// `reasons` carries the error-source chain, innermost last. The stack trace
/// is capped per call-site: a cap of `0` includes no frames at all, a
/// positive cap truncates, and `usize::MAX` is effectively verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    error: String,
    #[serde(default)]
    reasons: Option<Vec<String>>,
    #[serde(default, rename = "stackTrace")]
    stack_trace: Option<Vec<StackFrame>>,
}

impl ErrorDetails {
    /// Creates details carrying only an error message.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reasons: None,
            stack_trace: None,
        }
    }

    /// Creates details with an explicit reason chain, innermost last.
    #[must_use]
    pub fn with_reasons(error: impl Into<String>, reasons: Vec<String>) -> Self {
        Self {
            error: error.into(),
            reasons: (!reasons.is_empty()).then_some(reasons),
            stack_trace: None,
        }
    }

    /// Attaches a stack trace, truncated to `max_depth` frames.
    ///
    /// A depth of `0` discards the trace entirely.
    #[must_use]
    pub fn with_stack_trace(mut self, frames: Vec<StackFrame>, max_depth: usize) -> Self {
        self.stack_trace = if max_depth == 0 || frames.is_empty() {
            None
        } else {
            let mut frames = frames;
            frames.truncate(max_depth);
            Some(frames)
        };
        self
    }

    /// Builds details from an error and its source chain.
    ///
    /// The chain is collected through [`StdError::source`], innermost last.
    /// When `max_stack_depth` is non-zero a stack trace is captured at the
    /// call site, best effort.
    #[must_use]
    pub fn from_error(error: &(dyn StdError + 'static), max_stack_depth: usize) -> Self {
        let mut reasons = Vec::new();
        let mut cause = error.source();
        while let Some(current) = cause {
            reasons.push(current.to_string());
            cause = current.source();
        }

        let details = Self::with_reasons(error.to_string(), reasons);
        if max_stack_depth == 0 {
            details
        } else {
            details.with_stack_trace(capture_frames(), max_stack_depth)
        }
    }

    /// The error message.
    #[must_use]
    pub fn error(&self) -> &str {
        &self.error
    }

    /// The chain of causes, innermost last.
    #[must_use]
    pub fn reasons(&self) -> Option<&[String]> {
        self.reasons.as_deref()
    }

    /// The capped stack trace.
    #[must_use]
    pub fn stack_trace(&self) -> Option<&[StackFrame]> {
        self.stack_trace.as_deref()
    }
}

/// Captures the current stack as frames, parsed from the standard backtrace
/// rendering. Frames that cannot be parsed are skipped.
fn capture_frames() -> Vec<StackFrame> {
    let rendered = Backtrace::force_capture().to_string();
    let mut frames = Vec::new();
    let mut lines = rendered.lines().peekable();

    while let Some(line) = lines.next() {
        let line = line.trim();
        let Some((index, symbol)) = line.split_once(": ") else {
            continue;
        };
        if index.parse::<u32>().is_err() {
            continue;
        }

        let (class, method) = match symbol.rsplit_once("::") {
            Some((class, method)) => (class.to_owned(), method.to_owned()),
            None => (String::new(), symbol.to_owned()),
        };

        let (file, line_number) = match lines.peek().map(|next| next.trim()) {
            Some(location) if location.starts_with("at ") => {
                lines.next();
                let location = &location[3..];
                // Trailing column is "file:line:column"; keep file and line.
                let mut parts = location.rsplitn(3, ':');
                let _column = parts.next();
                let line_number = parts.next().and_then(|l| l.parse::<u32>().ok());
                let file = parts.next().map(str::to_owned);
                (file, line_number)
            }
            _ => (None, None),
        };

        frames.push(StackFrame {
            class,
            method,
            file,
            line: line_number,
        });
    }

    frames
}
