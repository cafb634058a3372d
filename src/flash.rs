//! Persistent subscription records, one flash page per subscribable
//! channel.
//!
//! The page driver itself belongs to the platform; the core only needs
//! raw reads and whole-page (erase then program) writes through
//! [`FlashPages`]. Record format inside a page: `u16 length_LE` followed
//! by `length` payload bytes. An erased page reads all ones, so a length
//! of `0xFFFF` means "empty"; a length of `0` means "invalidated". The
//! payload is the encrypted subscription message exactly as received.

use crate::buffer::SecureVec;
use crate::host_comms::MAX_INPUT_BODY;
use crate::FatalError;

/// Hardware-level flash fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashError;

/// Raw page access provided by the platform flash driver. `write_page`
/// erases the page and programs `data` from its start (with the
/// instruction cache disabled around the operation on real hardware);
/// the rest of the page is left erased.
pub trait FlashPages {
    fn read(&self, page: u8, offset: usize, out: &mut [u8]) -> Result<(), FlashError>;
    fn write_page(&mut self, page: u8, data: &[u8]) -> Result<(), FlashError>;
}

impl<F: FlashPages> FlashPages for &mut F {
    fn read(&self, page: u8, offset: usize, out: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(page, offset, out)
    }

    fn write_page(&mut self, page: u8, data: &[u8]) -> Result<(), FlashError> {
        (**self).write_page(page, data)
    }
}

/// Largest payload a page record may carry, matching the largest command
/// body the transport accepts.
pub const MAX_RECORD_PAYLOAD: usize = MAX_INPUT_BODY;

const RECORD_HEADER_LEN: usize = 2;
const LENGTH_EMPTY: u16 = 0xFFFF;
const LENGTH_INVALIDATED: u16 = 0;

/// Length-prefixed subscription records stored one per page.
pub struct SubscriptionStore<F: FlashPages> {
    flash: F,
}

impl<F: FlashPages> SubscriptionStore<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Returns the record stored in `page`, or `None` for an erased or
    /// invalidated page. A record length above [`MAX_RECORD_PAYLOAD`] can
    /// only come from tampering and is fatal.
    pub fn load(&self, page: u8) -> Result<Option<SecureVec<MAX_RECORD_PAYLOAD>>, FatalError> {
        let mut length_bytes = [0u8; RECORD_HEADER_LEN];
        self.flash
            .read(page, 0, &mut length_bytes)
            .map_err(|_| FatalError::FlashFault)?;
        let length = u16::from_le_bytes(length_bytes);
        if length == LENGTH_EMPTY || length == LENGTH_INVALIDATED {
            return Ok(None);
        }
        let length = length as usize;
        if length > MAX_RECORD_PAYLOAD {
            return Err(FatalError::StorageCorrupted);
        }
        let mut record = SecureVec::new();
        // Length was bounds-checked against the capacity above.
        let _ = record.resize(length);
        self.flash
            .read(page, RECORD_HEADER_LEN, record.as_mut_slice())
            .map_err(|_| FatalError::FlashFault)?;
        Ok(Some(record))
    }

    /// Persists `data` into `page`, overwriting any existing record.
    pub fn save(&mut self, page: u8, data: &[u8]) -> Result<(), FatalError> {
        if data.len() > MAX_RECORD_PAYLOAD {
            return Err(FatalError::StorageCorrupted);
        }
        let mut record: SecureVec<{ MAX_RECORD_PAYLOAD + RECORD_HEADER_LEN }> = SecureVec::new();
        // Capacity checked above.
        let _ = record.push_u16_le(data.len() as u16);
        let _ = record.extend_from_slice(data);
        self.flash
            .write_page(page, record.as_slice())
            .map_err(|_| FatalError::FlashFault)
    }
}
