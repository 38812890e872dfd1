// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Code Stream
//!
//! Output sink for generated source. Indents every line to the current brace
//! depth and checks that braces are closed in the order they were opened, so a
//! generator bug shows up as an error instead of as uncompilable output.

use std::fmt::{self, Write};

use crate::error::{CodegenError, Result};

const INDENT: &str = "    ";

/// Level used by [`CodeStream::scope`]
const SCOPE_LEVEL: u32 = 0;

/// Indentation-aware text sink
#[derive(Debug, Default)]
pub struct CodeStream {
    buffer: String,
    braces: Vec<u32>,
    at_line_start: bool,
}

impl CodeStream {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            braces: Vec::new(),
            at_line_start: true,
        }
    }

    /// Current brace depth
    pub fn depth(&self) -> usize {
        self.braces.len()
    }

    /// Open a brace tagged with `level`; must be closed with the same tag
    pub fn open_brace(&mut self, level: u32) -> Result<()> {
        if !self.at_line_start {
            self.buffer.push(' ');
        }
        self.write_str("{\n")?;
        self.braces.push(level);
        Ok(())
    }

    /// Close the innermost brace, which must carry `level`
    pub fn close_brace(&mut self, level: u32) -> Result<()> {
        match self.braces.last() {
            Some(open) if *open == level => {
                self.braces.pop();
            }
            other => {
                return Err(CodegenError::UnbalancedScope {
                    expected: other.copied(),
                    actual: level,
                })
            }
        }

        if !self.at_line_start {
            self.write_str("\n")?;
        }
        self.write_str("}\n")?;
        Ok(())
    }

    /// Emit `{ ... }` around whatever `body` writes
    pub fn scope<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(&mut CodeStream) -> Result<()>,
    {
        self.open_brace(SCOPE_LEVEL)?;
        body(self)?;
        self.close_brace(SCOPE_LEVEL)
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Finish the stream; fails if a brace is still open
    pub fn into_string(self) -> Result<String> {
        if let Some(open) = self.braces.last() {
            return Err(CodegenError::UnbalancedScope {
                expected: Some(*open),
                actual: u32::MAX,
            });
        }
        Ok(self.buffer)
    }
}

impl Write for CodeStream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.at_line_start && ch != '\n' {
                for _ in 0..self.braces.len() {
                    self.buffer.push_str(INDENT);
                }
            }
            self.buffer.push(ch);
            self.at_line_start = ch == '\n';
        }
        Ok(())
    }
}
