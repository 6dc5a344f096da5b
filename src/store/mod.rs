//! Append-only storage file.
//!
//! Every record is length-prefixed, carries a status byte (live or
//! tombstoned) and a CRC32 of its payload, framed the way
//! `robt::vlog`/`wral::journal` frame their records: a fixed header
//! followed by an opaque payload, read back with [crate::read_file] and
//! written with [crate::write_file]. On [StorageFile::open] the file is
//! scanned header-by-header; a trailing record that fails its length or
//! checksum check (the mark of a writer that crashed mid-append) is
//! discarded by truncating the file back to the last good record
//! boundary, rather than failing the open.

use crc::{Crc, CRC_32_ISCSI};

use std::{
    convert::TryFrom,
    ffi, fs,
    io::{Seek, SeekFrom},
    path::Path,
};

use crate::Result;

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// `length:u32 | status:u8 | crc:u32` followed by `length` payload bytes.
const HEADER_LEN: u64 = 4 + 1 + 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    Live = 1,
    Deleted = 0,
}

impl Status {
    fn from_byte(b: u8) -> Result<Status> {
        match b {
            1 => Ok(Status::Live),
            0 => Ok(Status::Deleted),
            b => err_at!(DecodeFail, msg: "invalid record status byte {}", b),
        }
    }
}

/// Location of one record within a [StorageFile]. Indexes persist these
/// as their value, to be resolved back into a document on read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Handle {
    pub offset: u64,
    pub length: u64,
}

impl Handle {
    fn record_len(&self) -> u64 {
        HEADER_LEN + self.length
    }
}

/// An append-only, crash-recoverable record log.
pub struct StorageFile {
    loc: ffi::OsString,
    fd: fs::File,
    size: u64,
}

impl StorageFile {
    /// Create a brand new, empty storage file. Fails if one already
    /// exists at `path`.
    pub fn create(path: &Path) -> Result<StorageFile> {
        crate::util::create_file_a(path.as_os_str())?; // creates, ensures parent dirs, fails if exists
        let fd = crate::util::open_file_rw(path.as_os_str())?;
        Ok(StorageFile {
            loc: path.as_os_str().to_os_string(),
            fd,
            size: 0,
        })
    }

    /// Open an existing storage file, recovering from a crash by
    /// truncating any trailing partial/corrupt record.
    pub fn open(path: &Path) -> Result<StorageFile> {
        let mut fd = crate::util::open_file_rw(path.as_os_str())?;

        let good_size = Self::scan_valid_prefix(&mut fd)?;
        let actual_size = err_at!(IOError, fd.metadata())?.len();
        if good_size < actual_size {
            err_at!(IOError, fd.set_len(good_size))?;
        }

        Ok(StorageFile {
            loc: path.as_os_str().to_os_string(),
            fd,
            size: good_size,
        })
    }

    fn scan_valid_prefix(fd: &mut fs::File) -> Result<u64> {
        let len = err_at!(IOError, fd.metadata())?.len();
        let mut fpos = 0_u64;

        while fpos < len {
            if fpos + HEADER_LEN > len {
                break;
            }
            let header = read_file!(fd, SeekFrom::Start(fpos), HEADER_LEN, "reading record header");
            let header = match header {
                Ok(header) => header,
                Err(_) => break,
            };
            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            if Status::from_byte(header[4]).is_err() {
                break;
            }
            let want_crc = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);

            if fpos + HEADER_LEN + length > len {
                break;
            }
            let payload = match read_file!(
                fd,
                SeekFrom::Start(fpos + HEADER_LEN),
                length,
                "reading record payload"
            ) {
                Ok(payload) => payload,
                Err(_) => break,
            };
            if CRC.checksum(&payload) != want_crc {
                break;
            }

            fpos += HEADER_LEN + length;
        }

        Ok(fpos)
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn to_location(&self) -> ffi::OsString {
        self.loc.clone()
    }

    /// Append `payload` as a live record, returning its [Handle].
    pub fn append(&mut self, payload: &[u8]) -> Result<Handle> {
        let length = err_at!(FailConvert, u32::try_from(payload.len()))?;
        let crc = CRC.checksum(payload);

        let mut buf = Vec::with_capacity(HEADER_LEN as usize + payload.len());
        buf.extend_from_slice(&length.to_be_bytes());
        buf.push(Status::Live as u8);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(payload);

        let handle = Handle {
            offset: self.size,
            length: payload.len() as u64,
        };
        err_at!(IOError, self.fd.seek(SeekFrom::Start(self.size)))?;
        write_file!(self.fd, &buf, self.loc, "appending record")?;
        self.size += handle.record_len();

        Ok(handle)
    }

    /// Read back the payload referenced by `handle`, verifying its CRC.
    pub fn read(&mut self, handle: &Handle) -> Result<Vec<u8>> {
        let payload = read_file!(
            self.fd,
            SeekFrom::Start(handle.offset + HEADER_LEN),
            handle.length,
            "reading record"
        )?;

        let header = read_file!(
            self.fd,
            SeekFrom::Start(handle.offset),
            HEADER_LEN,
            "reading record header"
        )?;
        let want_crc = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
        if CRC.checksum(&payload) != want_crc {
            err_at!(DecodeFail, msg: "checksum mismatch at offset {}", handle.offset)?
        }
        if Status::from_byte(header[4])? == Status::Deleted {
            err_at!(RecordDeleted, msg: "record at offset {} is deleted", handle.offset)?
        }

        Ok(payload)
    }

    /// Flip the status byte of `handle` to [Status::Deleted] in place.
    pub fn mark_deleted(&mut self, handle: &Handle) -> Result<()> {
        let status = [Status::Deleted as u8];
        err_at!(IOError, self.fd.seek(SeekFrom::Start(handle.offset + 4)))?;
        write_file!(self.fd, &status, self.loc, "marking record deleted")?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        err_at!(IOError, self.fd.sync_all())
    }

    /// Walk every record from the start, live and deleted alike, calling
    /// `visit` with its handle, status and payload. Used by compaction
    /// to decide what survives into the rewritten file.
    pub fn for_each<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(Handle, Status, &[u8]) -> Result<()>,
    {
        let mut fpos = 0_u64;
        while fpos < self.size {
            let header = read_file!(
                self.fd,
                SeekFrom::Start(fpos),
                HEADER_LEN,
                "reading record header"
            )?;
            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let status = Status::from_byte(header[4])?;

            let handle = Handle { offset: fpos, length };
            let payload = read_file!(
                self.fd,
                SeekFrom::Start(fpos + HEADER_LEN),
                length,
                "reading record payload"
            )?;

            visit(handle, status, &payload)?;
            fpos += HEADER_LEN + length;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
