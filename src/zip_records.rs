//! Fixed-width little-endian binary records for the ZIP container format and
//! for the exploded-archive sidecars. Every record here round-trips through
//! `read`/`write` with explicit signature checks on decode; nothing here
//! validates compressed payloads or CRCs.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

/// `PK\x03\x04` — precedes every entry's compressed payload.
pub const LFH_MARKER: [u8; 4] = *b"PK\x03\x04";
/// `PK\x01\x02` — one per entry, found in the Central Directory.
pub const CDE_MARKER: [u8; 4] = *b"PK\x01\x02";
/// `PK\x07\x08` — optional, precedes a Data Descriptor when present.
pub const DD_MARKER: [u8; 4] = *b"PK\x07\x08";
/// `PK\x05\x06` — trailing record locating the Central Directory.
pub const EOCD_MARKER: [u8; 4] = *b"PK\x05\x06";

/// Bit 3 of the general-purpose flag: sizes/CRC were streamed and follow in
/// a Data Descriptor rather than being known up front in the LFH.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x08;

fn check_marker(got: &[u8; 4], want: [u8; 4], what: &str) -> io::Result<()> {
    if *got != want {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{what}: expected marker {want:?}, got {got:?}"),
        ));
    }
    Ok(())
}

/// Local File Header, fixed-width portion only (`filename`/`extra_field`
/// bytes follow it in the stream and are handled by the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub needed_version: u16,
    pub flag: u16,
    pub compression: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc: u32,
    pub compressed_size: u32,
    pub raw_size: u32,
    pub filename_len: u16,
    pub extra_field_len: u16,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let mut marker = [0u8; 4];
        r.read_exact(&mut marker)?;
        check_marker(&marker, LFH_MARKER, "local file header")?;

        Ok(Self {
            needed_version: r.read_u16::<LE>()?,
            flag: r.read_u16::<LE>()?,
            compression: r.read_u16::<LE>()?,
            mod_time: r.read_u16::<LE>()?,
            mod_date: r.read_u16::<LE>()?,
            crc: r.read_u32::<LE>()?,
            compressed_size: r.read_u32::<LE>()?,
            raw_size: r.read_u32::<LE>()?,
            filename_len: r.read_u16::<LE>()?,
            extra_field_len: r.read_u16::<LE>()?,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&LFH_MARKER)?;
        w.write_u16::<LE>(self.needed_version)?;
        w.write_u16::<LE>(self.flag)?;
        w.write_u16::<LE>(self.compression)?;
        w.write_u16::<LE>(self.mod_time)?;
        w.write_u16::<LE>(self.mod_date)?;
        w.write_u32::<LE>(self.crc)?;
        w.write_u32::<LE>(self.compressed_size)?;
        w.write_u32::<LE>(self.raw_size)?;
        w.write_u16::<LE>(self.filename_len)?;
        w.write_u16::<LE>(self.extra_field_len)?;
        Ok(())
    }

    pub fn has_streamed_sizes(&self) -> bool {
        self.flag & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// Central Directory Entry, fixed-width portion only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    pub creator_version: u16,
    pub needed_version: u16,
    pub flag: u16,
    pub compression: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc: u32,
    pub compressed_size: u32,
    pub raw_size: u32,
    pub filename_len: u16,
    pub extra_field_len: u16,
    pub comment_len: u16,
    pub disk_num_start: u16,
    pub internal_attr: u16,
    pub external_attr: u32,
    pub offset: u32,
}

impl CentralDirectoryEntry {
    pub const SIZE: usize = 46;

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let mut marker = [0u8; 4];
        r.read_exact(&mut marker)?;
        check_marker(&marker, CDE_MARKER, "central directory entry")?;

        Ok(Self {
            creator_version: r.read_u16::<LE>()?,
            needed_version: r.read_u16::<LE>()?,
            flag: r.read_u16::<LE>()?,
            compression: r.read_u16::<LE>()?,
            mod_time: r.read_u16::<LE>()?,
            mod_date: r.read_u16::<LE>()?,
            crc: r.read_u32::<LE>()?,
            compressed_size: r.read_u32::<LE>()?,
            raw_size: r.read_u32::<LE>()?,
            filename_len: r.read_u16::<LE>()?,
            extra_field_len: r.read_u16::<LE>()?,
            comment_len: r.read_u16::<LE>()?,
            disk_num_start: r.read_u16::<LE>()?,
            internal_attr: r.read_u16::<LE>()?,
            external_attr: r.read_u32::<LE>()?,
            offset: r.read_u32::<LE>()?,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&CDE_MARKER)?;
        w.write_u16::<LE>(self.creator_version)?;
        w.write_u16::<LE>(self.needed_version)?;
        w.write_u16::<LE>(self.flag)?;
        w.write_u16::<LE>(self.compression)?;
        w.write_u16::<LE>(self.mod_time)?;
        w.write_u16::<LE>(self.mod_date)?;
        w.write_u32::<LE>(self.crc)?;
        w.write_u32::<LE>(self.compressed_size)?;
        w.write_u32::<LE>(self.raw_size)?;
        w.write_u16::<LE>(self.filename_len)?;
        w.write_u16::<LE>(self.extra_field_len)?;
        w.write_u16::<LE>(self.comment_len)?;
        w.write_u16::<LE>(self.disk_num_start)?;
        w.write_u16::<LE>(self.internal_attr)?;
        w.write_u32::<LE>(self.external_attr)?;
        w.write_u32::<LE>(self.offset)?;
        Ok(())
    }
}

/// Optional trailing record carrying CRC/sizes when the LFH omitted them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc: u32,
    pub compressed_size: u32,
    pub raw_size: u32,
}

impl DataDescriptor {
    /// Size of the descriptor body, not counting an optional marker.
    pub const SIZE: usize = 12;

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            crc: r.read_u32::<LE>()?,
            compressed_size: r.read_u32::<LE>()?,
            raw_size: r.read_u32::<LE>()?,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u32::<LE>(self.crc)?;
        w.write_u32::<LE>(self.compressed_size)?;
        w.write_u32::<LE>(self.raw_size)?;
        Ok(())
    }
}

/// End of Central Directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_num: u16,
    pub first_disk: u16,
    pub local_entries: u16,
    pub total_entries: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let mut marker = [0u8; 4];
        r.read_exact(&mut marker)?;
        check_marker(&marker, EOCD_MARKER, "end of central directory")?;

        Ok(Self {
            disk_num: r.read_u16::<LE>()?,
            first_disk: r.read_u16::<LE>()?,
            local_entries: r.read_u16::<LE>()?,
            total_entries: r.read_u16::<LE>()?,
            directory_size: r.read_u32::<LE>()?,
            directory_offset: r.read_u32::<LE>()?,
            comment_len: r.read_u16::<LE>()?,
        })
    }

    /// Attempts to parse an EOCD from a buffer that may not start with the
    /// marker; returns the record plus the byte offset it was found at.
    pub fn find_in(buf: &[u8]) -> Option<(Self, usize)> {
        let pos = buf.windows(4).rposition(|w| w == EOCD_MARKER)?;
        if buf.len() < pos + Self::SIZE {
            return None;
        }
        let mut cursor = &buf[pos..pos + Self::SIZE];
        Self::read(&mut cursor).ok().map(|eocd| (eocd, pos))
    }
}

/// Sidecar header: `<Q Q>` — original archive size and CD start offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpHeader {
    pub filesize: u64,
    pub directory_offset: u64,
}

impl JumpHeader {
    pub const SIZE: usize = 16;

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            filesize: r.read_u64::<LE>()?,
            directory_offset: r.read_u64::<LE>()?,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u64::<LE>(self.filesize)?;
        w.write_u64::<LE>(self.directory_offset)?;
        Ok(())
    }
}

/// Sidecar entry: `<Q Q>` — `(archive_offset_of_LFH, stream_sidecar_offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpEntry {
    pub archive_offset: u64,
    pub stream_offset: u64,
}

impl JumpEntry {
    pub const SIZE: usize = 16;

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            archive_offset: r.read_u64::<LE>()?,
            stream_offset: r.read_u64::<LE>()?,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u64::<LE>(self.archive_offset)?;
        w.write_u64::<LE>(self.stream_offset)?;
        Ok(())
    }
}

/// Fixed-width prefix of a stream item: an LFH layout, `descriptor_len: u8`,
/// and the 20-byte SHA-1 digest of the payload. Variable-length
/// `filename ‖ extra_field` bytes (and, if `descriptor_len > 0`, descriptor
/// bytes) immediately follow in the stream sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamItemHeader {
    pub lfh: LocalFileHeader,
    pub descriptor_len: u8,
    pub sha: [u8; 20],
}

impl StreamItemHeader {
    pub const SIZE: usize = LocalFileHeader::SIZE + 1 + 20;

    pub fn read(r: &mut impl Read) -> io::Result<Self> {
        let lfh = LocalFileHeader::read(r)?;
        let descriptor_len = r.read_u8()?;
        let mut sha = [0u8; 20];
        r.read_exact(&mut sha)?;
        Ok(Self {
            lfh,
            descriptor_len,
            sha,
        })
    }

    pub fn write(&self, w: &mut impl Write) -> io::Result<()> {
        self.lfh.write(w)?;
        w.write_u8(self.descriptor_len)?;
        w.write_all(&self.sha)?;
        Ok(())
    }

    pub fn var_fields_len(&self) -> usize {
        self.lfh.filename_len as usize + self.lfh.extra_field_len as usize
    }
}
