// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Conversion between SQL values and guest wire values
//!
//! Integers travel as raw `i64`. Text lives in guest memory:
//!
//! ```text
//! offset      offset+1          offset+1+len
//! +-----+--------------------+------+
//! | tag | utf-8 bytes        | 0x00 |
//! +-----+--------------------+------+
//! ```
//!
//! and travels as the `i32` offset of the tag byte. The host asks the guest's
//! allocator export for `len + 2` bytes before writing an argument.

use crate::error::{ExecutorError, ExecutorResult};
use std::ops::Range;
use wasmtime::Val;

/// Byte view of a guest's linear memory
pub trait GuestMemory {
    fn data(&self) -> &[u8];
    fn data_mut(&mut self) -> &mut [u8];
}

/// Guest memory plus the guest's allocator entry point
pub trait GuestAllocator: GuestMemory {
    /// Reserve `size` bytes in guest memory and return their offset
    fn allocate(&mut self, size: u32) -> ExecutorResult<u32>;
}

/// Stateless value conversion, parameterized by the text tag byte
#[derive(Debug, Clone, Copy)]
pub struct ValueMarshaler {
    text_tag: u8,
}

impl ValueMarshaler {
    pub fn new(text_tag: u8) -> Self {
        Self { text_tag }
    }

    pub fn text_tag(&self) -> u8 {
        self.text_tag
    }

    pub fn to_guest_integer(&self, value: i64) -> Val {
        Val::I64(value)
    }

    pub fn from_guest_integer(&self, value: &Val) -> ExecutorResult<i64> {
        value.i64().ok_or_else(|| {
            ExecutorError::UnsupportedType(format!("expected an i64 result, got {:?}", value))
        })
    }

    /// Copy `value` into guest memory and return the offset as an `i32`
    pub fn to_guest_text<G>(&self, value: &str, guest: &mut G) -> ExecutorResult<Val>
    where
        G: GuestAllocator + ?Sized,
    {
        let bytes = value.as_bytes();
        if bytes.contains(&0) {
            return Err(ExecutorError::UnsupportedType(
                "text argument contains a NUL byte".to_string(),
            ));
        }

        let size = bytes
            .len()
            .checked_add(2)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                ExecutorError::Allocation(format!("text of {} bytes is too large", bytes.len()))
            })?;

        let offset = guest.allocate(size)?;
        if offset == 0 {
            return Err(ExecutorError::Allocation(
                "allocator returned a null offset".to_string(),
            ));
        }

        let memory = guest.data_mut();
        let range = checked_range(offset as usize, size as usize, memory.len()).map_err(|_| {
            ExecutorError::Allocation(format!(
                "allocator returned offset {} but {} bytes do not fit in {} bytes of memory",
                offset,
                size,
                memory.len()
            ))
        })?;

        let slot = &mut memory[range];
        let (tag, rest) = slot.split_at_mut(1);
        let (body, terminator) = rest.split_at_mut(bytes.len());
        tag[0] = self.text_tag;
        body.copy_from_slice(bytes);
        terminator[0] = 0;

        Ok(Val::I32(offset as i32))
    }

    /// Decode the tagged, NUL-terminated text stored at `offset`
    pub fn from_guest_text<M>(&self, offset: u32, memory: &M) -> ExecutorResult<String>
    where
        M: GuestMemory + ?Sized,
    {
        let data = memory.data();
        let start = offset as usize;

        let tag_range = checked_range(start, 1, data.len())?;
        let tag = data[tag_range][0];
        if tag != self.text_tag {
            return Err(ExecutorError::UnsupportedType(format!(
                "unexpected type tag {} at offset {} (text is {})",
                tag, offset, self.text_tag
            )));
        }

        let body = &data[start + 1..];
        let len = body
            .iter()
            .position(|b| *b == 0)
            .ok_or(ExecutorError::MemoryOutOfBounds {
                offset: start + 1,
                len: body.len() + 1,
                size: data.len(),
            })?;

        String::from_utf8(body[..len].to_vec()).map_err(|e| {
            ExecutorError::UnsupportedType(format!("result text is not valid UTF-8: {}", e))
        })
    }
}

fn checked_range(offset: usize, len: usize, size: usize) -> ExecutorResult<Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(ExecutorError::MemoryOutOfBounds { offset, len, size }),
    }
}
