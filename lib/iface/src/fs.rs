// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal filesystem interface.
//!
//! Not every provider is a real filesystem — append-only stores expose a
//! small fixed namespace through the same surface. Unsupported
//! operations answer `NotImplemented`.

use bitflags::bitflags;
use num_derive::FromPrimitive;

pub const FS_NAME_LEN_MAX: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum FsError {
    Failed = 1,
    BadArg,
    Null,
    /// Nothing left to read.
    Empty,
    /// No space left to write.
    Full,
    NotOpened,
    NotImplemented,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct FsMode: u32 {
        const APPEND = 1 << 0;
        const TRUNCATE = 1 << 1;
        const CREATE = 1 << 2;
        const READONLY = 1 << 3;
        const WRITEONLY = 1 << 4;
        const READWRITE = 1 << 5;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Whence {
    Set = 0,
    Cur,
    End,
}

/// Opaque open-file handle, provider-assigned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct File(pub u32);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsStat {
    pub size: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FsInfo {
    pub size_total: usize,
    pub size_used: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub name: heapless::String<FS_NAME_LEN_MAX>,
    pub size: usize,
}

/// Directory read cursor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dir(pub u32);

pub trait Fs: Send + Sync {
    fn open(&self, path: &str, mode: FsMode) -> Result<File, FsError>;

    fn close(&self, f: File) -> Result<(), FsError>;

    /// Returns the number of bytes read; `Empty` once exhausted.
    fn read(&self, f: File, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Returns the number of bytes written, possibly short; `Full` when
    /// nothing more fits.
    fn write(&self, f: File, buf: &[u8]) -> Result<usize, FsError>;

    fn lseek(
        &self,
        _f: File,
        _offset: i64,
        _whence: Whence,
    ) -> Result<u64, FsError> {
        Err(FsError::NotImplemented)
    }

    fn remove(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotImplemented)
    }

    fn rename(
        &self,
        _old_path: &str,
        _new_path: &str,
    ) -> Result<(), FsError> {
        Err(FsError::NotImplemented)
    }

    fn stat(&self, _path: &str) -> Result<FsStat, FsError> {
        Err(FsError::NotImplemented)
    }

    fn fflush(&self, _f: File) -> Result<(), FsError> {
        Err(FsError::NotImplemented)
    }

    fn info(&self) -> Result<FsInfo, FsError> {
        Err(FsError::NotImplemented)
    }

    fn opendir(&self, _path: &str) -> Result<Dir, FsError> {
        Err(FsError::NotImplemented)
    }

    fn readdir(&self, _d: Dir) -> Result<Option<DirEntry>, FsError> {
        Err(FsError::NotImplemented)
    }

    fn closedir(&self, _d: Dir) -> Result<(), FsError> {
        Err(FsError::NotImplemented)
    }
}
