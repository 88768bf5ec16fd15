//! Index meta page.
//!
//! Page 0 of every index file records the key type and the current root.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::types::{AttrType, PageNum};

/// Magic bytes to identify an index file
pub const MAGIC: &[u8; 16] = b"SlottedIndexV01\0";

/// Bytes covered by the checksum
const CHECKSUMMED: usize = 21;

/// Index meta page
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       16    Magic string "SlottedIndexV01\0"
/// 16      1     Key type (0 = Int, 1 = Real, 2 = VarChar)
/// 17      4     Root page number
/// 21      4     Checksum of bytes 0..21 (CRC32)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMeta {
    pub key_type: AttrType,
    pub root: PageNum,
}

impl IndexMeta {
    pub fn new(key_type: AttrType, root: PageNum) -> Self {
        Self { key_type, root }
    }

    /// Read the meta page
    pub fn read(page: &PageBuf) -> Result<Self> {
        if page.slice(0, MAGIC.len())? != MAGIC {
            return Err(StorageError::invalid_db("invalid magic bytes"));
        }

        let stored_checksum = page.read_u32(CHECKSUMMED)?;
        let computed_checksum = crc32fast::hash(page.slice(0, CHECKSUMMED)?);
        if stored_checksum != computed_checksum {
            return Err(StorageError::corruption("index meta page checksum mismatch"));
        }

        let key_type = AttrType::from_byte(page.read_u8(16)?)
            .ok_or_else(|| StorageError::invalid_db("unknown key type"))?;
        let root = PageNum::new(page.read_u32(17)?);
        if root.is_none() {
            return Err(StorageError::corruption("index root points at the meta page"));
        }

        Ok(Self { key_type, root })
    }

    /// Encode the meta page
    pub fn to_page(&self) -> Result<PageBuf> {
        let mut page = PageBuf::new();
        page.write_bytes(0, MAGIC)?;
        page.write_u8(16, self.key_type as u8)?;
        page.write_u32(17, self.root.value())?;

        let checksum = crc32fast::hash(page.slice(0, CHECKSUMMED)?);
        page.write_u32(CHECKSUMMED, checksum)?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_roundtrip() -> Result<()> {
        let meta = IndexMeta::new(AttrType::VarChar, PageNum::new(17));
        let page = meta.to_page()?;
        assert_eq!(IndexMeta::read(&page)?, meta);
        Ok(())
    }

    #[test]
    fn test_invalid_magic() -> Result<()> {
        let mut page = IndexMeta::new(AttrType::Int, PageNum::new(1)).to_page()?;
        page.write_bytes(0, b"InvalidMagic0000")?;
        assert!(matches!(
            IndexMeta::read(&page),
            Err(StorageError::InvalidDatabaseFile(_))
        ));
        Ok(())
    }

    #[test]
    fn test_checksum_validation() -> Result<()> {
        let mut page = IndexMeta::new(AttrType::Int, PageNum::new(1)).to_page()?;
        // Corrupt the root pointer
        page.write_u8(19, 0xFF)?;
        assert!(matches!(IndexMeta::read(&page), Err(StorageError::Corruption(_))));
        Ok(())
    }
}
