//! Typed views over decompressed file contents
//!
//! Format decoders live outside this crate; they plug in by implementing
//! [`Resource`] and are reached through [`FileLookup::as_resource`].
//!
//! [`FileLookup::as_resource`]: crate::FileLookup::as_resource

use crate::{Result, VfsError};
use std::io;

/// A value decoded from the bytes of one packed file
pub trait Resource: Sized {
    /// Decode `data`; `path` is the file's full path when known
    fn from_packed(data: Vec<u8>, path: Option<&str>) -> Result<Self>;
}

impl Resource for Vec<u8> {
    fn from_packed(data: Vec<u8>, _path: Option<&str>) -> Result<Self> {
        Ok(data)
    }
}

/// UTF-8 text such as `.exl` sheet lists. A leading byte order mark is dropped.
impl Resource for String {
    fn from_packed(mut data: Vec<u8>, path: Option<&str>) -> Result<Self> {
        if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
            data.drain(..3);
        }
        Self::from_utf8(data).map_err(|e| {
            VfsError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not UTF-8 text: {e}", path.unwrap_or("file")),
            ))
        })
    }
}
