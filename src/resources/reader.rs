//! Sequential little-endian reads over an in-memory byte stream.
//!
//! Scene containers and mesh files have no header, magic or version: every
//! value is read in a fixed order. How the reader reacts to a stream that ends
//! early depends on the [`Validation`] mode it was created with.

use std::{
    io::{self, Cursor, Read},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::{
    config::Validation,
    resources::error::{Result, SceneError},
};

pub struct BinaryReader {
    cursor: Cursor<Vec<u8>>,
    validation: Validation,
}

impl BinaryReader {
    pub fn new(bytes: Vec<u8>, validation: Validation) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            validation,
        }
    }

    /// Reads the whole file into memory.
    pub fn open(path: &Path, validation: Validation) -> io::Result<Self> {
        Ok(Self::new(std::fs::read(path)?, validation))
    }

    pub fn validation(&self) -> Validation {
        self.validation
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn remaining(&self) -> u64 {
        (self.cursor.get_ref().len() as u64).saturating_sub(self.cursor.position())
    }

    fn guard<T: Default>(&mut self, offset: u64, result: io::Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => match self.validation {
                Validation::Trusted => {
                    // a partial read leaves the cursor mid-value, park it at the end
                    let end = self.cursor.get_ref().len() as u64;
                    self.cursor.set_position(end);
                    Ok(T::default())
                }
                Validation::Strict => Err(SceneError::UnexpectedEof { offset }),
            },
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let offset = self.position();
        let value = self.cursor.read_i32::<LittleEndian>();
        self.guard(offset, value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let offset = self.position();
        let value = self.cursor.read_u8();
        self.guard(offset, value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let offset = self.position();
        let value = self.cursor.read_u16::<LittleEndian>();
        self.guard(offset, value)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let offset = self.position();
        let value = self.cursor.read_f32::<LittleEndian>();
        self.guard(offset, value)
    }

    /// A `uint8` flag, true only when it equals one.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? == 1)
    }

    pub fn read_float2(&mut self) -> Result<[f32; 2]> {
        Ok([self.read_f32()?, self.read_f32()?])
    }

    pub fn read_float3(&mut self) -> Result<[f32; 3]> {
        Ok([self.read_f32()?, self.read_f32()?, self.read_f32()?])
    }

    pub fn read_float4(&mut self) -> Result<[f32; 4]> {
        Ok([
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ])
    }

    /// Four unsigned bytes.
    pub fn read_byte4(&mut self) -> Result<[u8; 4]> {
        Ok([
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
        ])
    }

    /// A 4x4 float matrix, rows in file order.
    pub fn read_matrix(&mut self) -> Result<[[f32; 4]; 4]> {
        Ok([
            self.read_float4()?,
            self.read_float4()?,
            self.read_float4()?,
            self.read_float4()?,
        ])
    }

    /// `int32` byte length followed by that many raw bytes.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_count("string byte", 1)?;
        let offset = self.position();
        let mut bytes = vec![0; len];
        let read = self.cursor.read_exact(&mut bytes);
        self.guard(offset, read)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads an `int32` element count for elements of `stride` bytes.
    ///
    /// Strict mode rejects negative counts and counts that cannot fit in the
    /// rest of the stream. Trusted mode reads negative counts as zero and clamps
    /// oversized ones to what is left, the remaining elements reading as zero.
    pub fn read_count(&mut self, what: &'static str, stride: usize) -> Result<usize> {
        let offset = self.position();
        let count = self.read_i32()?;
        let available = self.remaining() / stride.max(1) as u64;
        let invalid = count < 0 || count as u64 > available;
        match (self.validation, invalid) {
            (_, false) => Ok(count as usize),
            (Validation::Strict, true) => Err(SceneError::InvalidCount {
                what,
                count: count as i64,
                offset,
            }),
            (Validation::Trusted, true) if count < 0 => {
                log::warn!("negative {what} count {count} at offset {offset}, reading none");
                Ok(0)
            }
            (Validation::Trusted, true) => {
                log::warn!(
                    "{what} count {count} at offset {offset} exceeds the remaining data, clamping to {available}"
                );
                Ok(available as usize)
            }
        }
    }

    /// Reads `count` elements with `read`.
    pub fn read_vec<T>(
        &mut self,
        count: usize,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }
}
