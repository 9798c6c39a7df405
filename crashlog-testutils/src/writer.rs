/// Byte order used by [`ByteWriter`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

/// A growable byte buffer with explicit byte order, used to assemble binary test inputs.
#[derive(Clone, Debug)]
pub struct ByteWriter {
    order: Order,
    bytes: Vec<u8>,
}

impl ByteWriter {
    /// Creates an empty little-endian writer.
    pub fn new() -> Self {
        Self::with_order(Order::Little)
    }

    /// Creates an empty writer with the given byte order.
    pub fn with_order(order: Order) -> Self {
        ByteWriter {
            order,
            bytes: Vec::new(),
        }
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Writes a single byte.
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    /// Writes a signed byte.
    pub fn i8(&mut self, value: i8) -> &mut Self {
        self.u8(value as u8)
    }

    /// Writes a 16-bit value.
    pub fn u16(&mut self, value: u16) -> &mut Self {
        match self.order {
            Order::Little => self.raw(&value.to_le_bytes()),
            Order::Big => self.raw(&value.to_be_bytes()),
        }
    }

    /// Writes a 32-bit value.
    pub fn u32(&mut self, value: u32) -> &mut Self {
        match self.order {
            Order::Little => self.raw(&value.to_le_bytes()),
            Order::Big => self.raw(&value.to_be_bytes()),
        }
    }

    /// Writes a 64-bit value.
    pub fn u64(&mut self, value: u64) -> &mut Self {
        match self.order {
            Order::Little => self.raw(&value.to_le_bytes()),
            Order::Big => self.raw(&value.to_be_bytes()),
        }
    }

    /// Writes an unsigned LEB128 value.
    pub fn uleb(&mut self, mut value: u64) -> &mut Self {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                return self.u8(byte);
            }
            self.u8(byte | 0x80);
        }
    }

    /// Writes a signed LEB128 value.
    pub fn sleb(&mut self, mut value: i64) -> &mut Self {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
            if done {
                return self.u8(byte);
            }
            self.u8(byte | 0x80);
        }
    }

    /// Writes a NUL-terminated string.
    pub fn cstr(&mut self, value: &str) -> &mut Self {
        self.raw(value.as_bytes()).u8(0)
    }

    /// Writes a string into a fixed-size, zero-padded field.
    pub fn fixed_str(&mut self, value: &str, size: usize) -> &mut Self {
        let mut field = vec![0u8; size];
        let len = value.len().min(size);
        field[..len].copy_from_slice(&value.as_bytes()[..len]);
        self.raw(&field)
    }

    /// Writes raw bytes.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Pads with zeros until the length is a multiple of `align`.
    pub fn align(&mut self, align: usize) -> &mut Self {
        while self.bytes.len() % align != 0 {
            self.bytes.push(0);
        }
        self
    }

    /// Overwrites a previously written 32-bit value, e.g. a length field.
    pub fn patch_u32(&mut self, offset: usize, value: u32) -> &mut Self {
        let bytes = match self.order {
            Order::Little => value.to_le_bytes(),
            Order::Big => value.to_be_bytes(),
        };
        self.bytes[offset..offset + 4].copy_from_slice(&bytes);
        self
    }

    /// Returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}
