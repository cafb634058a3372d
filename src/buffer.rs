//! Byte holders that zero their contents when released.
//!
//! Anything that carries key material, plaintext or device-unique data
//! lives in one of these. Wiping goes through [`zeroize`], which fences
//! the stores so the compiler cannot elide them on drop paths.

use zeroize::Zeroize;

/// Fixed-size secret holder (keys, IVs, tags, signatures).
pub struct SecureArray<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> SecureArray<N> {
    pub const fn zeroed() -> Self {
        Self { data: [0u8; N] }
    }

    /// Copies `source`, or returns `None` when the length is not exactly
    /// `N` (including the empty slice a failed reader hands out).
    pub fn from_slice(source: &[u8]) -> Option<Self> {
        if source.len() != N {
            return None;
        }
        let mut data = [0u8; N];
        data.copy_from_slice(source);
        Some(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; N] {
        &mut self.data
    }

    /// Overwrites the contents with zeros in place.
    pub fn clear(&mut self) {
        self.data.zeroize();
    }
}

impl<const N: usize> From<[u8; N]> for SecureArray<N> {
    fn from(data: [u8; N]) -> Self {
        Self { data }
    }
}

impl<const N: usize> Clone for SecureArray<N> {
    fn clone(&self) -> Self {
        Self { data: self.data }
    }
}

impl<const N: usize> Drop for SecureArray<N> {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

/// Variable-length buffer over a fixed backing store. The whole backing
/// store is wiped on release, not just the occupied prefix.
pub struct SecureVec<const N: usize> {
    data: [u8; N],
    len: usize,
}

impl<const N: usize> SecureVec<N> {
    pub const fn new() -> Self {
        Self {
            data: [0u8; N],
            len: 0,
        }
    }

    pub fn from_slice(source: &[u8]) -> Option<Self> {
        let mut buf = Self::new();
        buf.extend_from_slice(source).ok()?;
        Some(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    pub fn extend_from_slice(&mut self, source: &[u8]) -> Result<(), ()> {
        if source.len() > N - self.len {
            return Err(());
        }
        self.data[self.len..self.len + source.len()].copy_from_slice(source);
        self.len += source.len();
        Ok(())
    }

    /// Grows zero-filled or shrinks; shrinking wipes the abandoned tail.
    pub fn resize(&mut self, new_len: usize) -> Result<(), ()> {
        if new_len > N {
            return Err(());
        }
        if new_len < self.len {
            self.data[new_len..self.len].zeroize();
        }
        self.len = new_len;
        Ok(())
    }

    pub fn push_u16_le(&mut self, value: u16) -> Result<(), ()> {
        self.extend_from_slice(&value.to_le_bytes())
    }

    pub fn push_u32_le(&mut self, value: u32) -> Result<(), ()> {
        self.extend_from_slice(&value.to_le_bytes())
    }

    pub fn push_u64_le(&mut self, value: u64) -> Result<(), ()> {
        self.extend_from_slice(&value.to_le_bytes())
    }

    /// Wipes the full backing store and empties the buffer.
    pub fn clear(&mut self) {
        self.wipe();
    }

    fn wipe(&mut self) {
        self.data.zeroize();
        self.len = 0;
    }
}

impl<const N: usize> Default for SecureVec<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AsRef<[u8]> for SecureVec<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> Drop for SecureVec<N> {
    fn drop(&mut self) {
        self.wipe();
    }
}
