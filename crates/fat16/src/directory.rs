use alloc::string::String;
use core::fmt;

use bitflags::bitflags;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::FsError;

pub const DIRECTORY_ENTRY_SIZE: usize = 32;

/// First name byte of the entry that terminates a directory.
const END_OF_DIRECTORY: u8 = 0x00;
/// First name byte of a deleted entry.
const DELETED: u8 = 0xE5;
/// Attribute value shared by every long file name fragment.
const LONG_NAME: u8 = 0x0F;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_LABEL = 0x08;
        const SUBDIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// On-disk layout of a short directory entry.
///
/// See <https://wiki.osdev.org/FAT#Standard_8.3_format>
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes)]
#[repr(C)]
pub struct RawDirectoryEntry {
    pub name: [u8; 11],
    pub attributes: u8,
    pub reserved: u8,
    pub create_time_tenths: u8,
    pub create_time: U16<LittleEndian>,
    pub create_date: U16<LittleEndian>,
    pub access_date: U16<LittleEndian>,
    pub first_cluster_high: U16<LittleEndian>,
    pub write_time: U16<LittleEndian>,
    pub write_date: U16<LittleEndian>,
    pub first_cluster_low: U16<LittleEndian>,
    pub size: U32<LittleEndian>,
}

/// Space padded 8.3 name exactly as stored on disk.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    pub const DOT: Self = Self(*b".          ");
    pub const DOT_DOT: Self = Self(*b"..         ");

    /// Encodes a user supplied name such as `test.txt` into its padded,
    /// upper-cased on-disk form.
    pub fn encode(name: &str) -> Result<Self, FsError> {
        match name {
            "." => return Ok(Self::DOT),
            ".." => return Ok(Self::DOT_DOT),
            _ => {}
        }

        let (base, ext) = name.split_once('.').unwrap_or((name, ""));
        if base.is_empty() || ext.contains('.') {
            return Err(FsError::InvalidName);
        }
        if base.len() > 8 || ext.len() > 3 {
            return Err(FsError::NameTooLong);
        }

        let mut out = [b' '; 11];
        for (slot, byte) in out[..8].iter_mut().zip(base.bytes()) {
            *slot = encode_byte(byte)?;
        }
        for (slot, byte) in out[8..].iter_mut().zip(ext.bytes()) {
            *slot = encode_byte(byte)?;
        }
        Ok(Self(out))
    }

    /// Lower-cased `base.ext` form, with the dot omitted when there is no
    /// extension.
    pub fn display(&self) -> String {
        let base = trim_padding(&self.0[..8]);
        let ext = trim_padding(&self.0[8..]);

        let mut out = String::with_capacity(12);
        out.extend(base.iter().map(|&b| char::from(b.to_ascii_lowercase())));
        if !ext.is_empty() {
            out.push('.');
            out.extend(ext.iter().map(|&b| char::from(b.to_ascii_lowercase())));
        }
        out
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({:?})", self.display())
    }
}

fn encode_byte(byte: u8) -> Result<u8, FsError> {
    const FORBIDDEN: &[u8] = b"\"*+,/:;<=>?[\\]| ";
    if !byte.is_ascii() || byte.is_ascii_control() || FORBIDDEN.contains(&byte) {
        return Err(FsError::InvalidName);
    }
    Ok(byte.to_ascii_uppercase())
}

fn trim_padding(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Decoded 32 byte directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: ShortName,
    pub attributes: u8,
    pub first_cluster: u16,
    pub size: u32,
}

impl DirectoryEntry {
    pub fn new(name: ShortName, attributes: Attributes, first_cluster: u16, size: u32) -> Self {
        Self {
            name,
            attributes: attributes.bits(),
            first_cluster,
            size,
        }
    }

    /// Decodes the record at the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let raw = RawDirectoryEntry::read_from_prefix(bytes)?;
        Some(Self {
            name: ShortName(raw.name),
            attributes: raw.attributes,
            first_cluster: raw.first_cluster_low.get(),
            size: raw.size.get(),
        })
    }

    /// Full 32 byte record with every other field zeroed.
    pub fn encode(&self) -> [u8; DIRECTORY_ENTRY_SIZE] {
        let mut raw = RawDirectoryEntry::new_zeroed();
        raw.name = self.name.0;
        raw.attributes = self.attributes;
        raw.first_cluster_low = self.first_cluster.into();
        raw.size = self.size.into();

        let mut out = [0; DIRECTORY_ENTRY_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Rewrites only the size field of the record at the start of `record`,
    /// leaving timestamps and reserved bytes untouched.
    pub fn patch_size(record: &mut [u8], size: u32) -> Option<()> {
        let raw = RawDirectoryEntry::mut_from_prefix(record)?;
        raw.size = size.into();
        Some(())
    }

    pub fn flags(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attributes)
    }

    /// Marks the end of the directory; nothing after it is read.
    pub fn is_end_of_directory(&self) -> bool {
        self.name.0[0] == END_OF_DIRECTORY
    }

    pub fn is_deleted(&self) -> bool {
        self.name.0[0] == DELETED
    }

    pub fn is_long_name_fragment(&self) -> bool {
        self.attributes == LONG_NAME
    }

    /// Whether the entry names a visible file or directory.
    pub fn is_live(&self) -> bool {
        !self.is_end_of_directory()
            && !self.is_deleted()
            && !self.is_long_name_fragment()
            && !self.flags().contains(Attributes::VOLUME_LABEL)
    }

    pub fn is_directory(&self) -> bool {
        self.flags().contains(Attributes::SUBDIRECTORY)
    }

    pub fn display_name(&self) -> String {
        self.name.display()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_match_disk_format() {
        assert_eq!(core::mem::size_of::<RawDirectoryEntry>(), DIRECTORY_ENTRY_SIZE);
        assert_eq!(core::mem::offset_of!(RawDirectoryEntry, attributes), 11);
        assert_eq!(core::mem::offset_of!(RawDirectoryEntry, first_cluster_low), 26);
        assert_eq!(core::mem::offset_of!(RawDirectoryEntry, size), 28);
    }

    #[test]
    fn parses_raw_record() {
        let mut record = [0; 32];
        record[..11].copy_from_slice(b"TEST    TXT");
        record[11] = 0x20;
        record[26..28].copy_from_slice(&5u16.to_le_bytes());
        record[28..32].copy_from_slice(&600u32.to_le_bytes());

        let entry = DirectoryEntry::parse(&record).unwrap();
        assert_eq!(entry.name, ShortName(*b"TEST    TXT"));
        assert_eq!(entry.flags(), Attributes::ARCHIVE);
        assert_eq!(entry.first_cluster, 5);
        assert_eq!(entry.size, 600);
        assert_eq!(entry.display_name(), "test.txt");
        assert!(entry.is_live());
        assert_eq!(entry.encode(), record);
    }

    #[test]
    fn patch_size_keeps_other_fields() {
        let mut record = [0x11; 32];
        DirectoryEntry::patch_size(&mut record, 0x0102_0304).unwrap();
        assert_eq!(&record[28..], &[0x04, 0x03, 0x02, 0x01]);
        assert!(record[..28].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn filters_hidden_records() {
        let name = ShortName::encode("a.txt").unwrap();
        let live = DirectoryEntry::new(name, Attributes::ARCHIVE, 3, 1);
        assert!(live.is_live());

        let mut deleted = live.clone();
        deleted.name.0[0] = 0xE5;
        assert!(deleted.is_deleted() && !deleted.is_live());

        let lfn = DirectoryEntry { attributes: 0x0F, ..live.clone() };
        assert!(lfn.is_long_name_fragment() && !lfn.is_live());

        let label = DirectoryEntry::new(name, Attributes::VOLUME_LABEL, 0, 0);
        assert!(!label.is_live());

        let end = DirectoryEntry::parse(&[0; 32]).unwrap();
        assert!(end.is_end_of_directory() && !end.is_live());

        let dir = DirectoryEntry::new(ShortName::DOT, Attributes::SUBDIRECTORY, 4, 0);
        assert!(dir.is_live() && dir.is_directory());
    }

    #[test]
    fn encodes_names() {
        assert_eq!(ShortName::encode("test.txt"), Ok(ShortName(*b"TEST    TXT")));
        assert_eq!(ShortName::encode("README"), Ok(ShortName(*b"README     ")));
        assert_eq!(ShortName::encode("a.b"), Ok(ShortName(*b"A       B  ")));
        assert_eq!(ShortName::encode(".."), Ok(ShortName::DOT_DOT));
        assert_eq!(ShortName::encode("longername.txt"), Err(FsError::NameTooLong));
        assert_eq!(ShortName::encode("file.text"), Err(FsError::NameTooLong));
        assert_eq!(ShortName::encode(""), Err(FsError::InvalidName));
        assert_eq!(ShortName::encode(".profile"), Err(FsError::InvalidName));
        assert_eq!(ShortName::encode("a.b.c"), Err(FsError::InvalidName));
        assert_eq!(ShortName::encode("a b"), Err(FsError::InvalidName));
        assert_eq!(ShortName::encode("what?"), Err(FsError::InvalidName));
    }

    #[test]
    fn displays_names() {
        assert_eq!(ShortName(*b"KERNEL  ELF").display(), "kernel.elf");
        assert_eq!(ShortName(*b"BOOT       ").display(), "boot");
        assert_eq!(ShortName::DOT_DOT.display(), "..");
    }
}
