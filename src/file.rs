//! File-backed device over `std::fs`.
//!
//! Maps the mode-string grammar onto `OpenOptions`: `r` read, `w` create and
//! truncate, `a` append, `+` update, `x` exclusive create. The `b`/`t`
//! distinction is recorded but has no effect on these platforms.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::device::{Backend, Device, DeviceFlags, IoStatus, SeekPos};
use crate::error::DeviceResult;
use crate::mode::OpenMode;

pub struct FileDevice {
    file: File,
}

impl FileDevice {
    /// Open `path` with an `fopen`-style mode string and wrap it in a device.
    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> DeviceResult<Device> {
        let parsed = OpenMode::parse(mode)?;
        let mut opts = OpenOptions::new();
        opts.read(parsed.read).write(parsed.write);
        if parsed.append {
            opts.append(true);
        }
        if parsed.truncate {
            opts.truncate(true);
        }
        if parsed.write {
            if parsed.exclusive {
                opts.create_new(true);
            } else {
                opts.create(true);
            }
        }
        let file = opts.open(path.as_ref())?;
        Device::open(FileDevice { file }, mode)
    }
}

impl Backend for FileDevice {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn flags(&self) -> DeviceFlags {
        DeviceFlags::SEEKABLE
    }

    fn read(&mut self, buf: &mut [u8]) -> DeviceResult<IoStatus> {
        match self.file.read(buf)? {
            0 => Ok(IoStatus::End),
            n => Ok(IoStatus::Ready(n)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> DeviceResult<IoStatus> {
        match self.file.write(buf)? {
            0 => Ok(IoStatus::End),
            n => Ok(IoStatus::Ready(n)),
        }
    }

    fn flush(&mut self) -> DeviceResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn seek(&mut self, pos: SeekPos) -> DeviceResult<u64> {
        let target = match pos {
            SeekPos::Start(p) => SeekFrom::Start(p),
            SeekPos::Current(d) => SeekFrom::Current(d),
            SeekPos::End(d) => SeekFrom::End(d),
        };
        Ok(self.file.seek(target)?)
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;

    #[test]
    fn test_file_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.bin");

        let mut dev = FileDevice::open(&path, "w").unwrap();
        dev.write(b"persisted").unwrap();
        dev.close().unwrap();

        let mut dev = FileDevice::open(&path, "r").unwrap();
        let mut out = Vec::new();
        dev.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"persisted");
    }

    #[test]
    fn test_file_update_mode_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.bin");

        let mut dev = FileDevice::open(&path, "w+").unwrap();
        dev.write(b"0123456789").unwrap();
        dev.seek(SeekPos::Start(4)).unwrap();
        let mut buf = [0u8; 2];
        dev.read(&mut buf).unwrap();
        assert_eq!(&buf, b"45");
    }

    #[test]
    fn test_file_exclusive_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("once.bin");
        FileDevice::open(&path, "wx").unwrap().close().unwrap();
        assert!(matches!(
            FileDevice::open(&path, "wx"),
            Err(DeviceError::Io(_))
        ));
    }

    #[test]
    fn test_file_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let mut dev = FileDevice::open(&path, "w").unwrap();
        dev.write(b"one").unwrap();
        dev.close().unwrap();

        let mut dev = FileDevice::open(&path, "a").unwrap();
        dev.write(b"two").unwrap();
        dev.close().unwrap();

        let mut dev = FileDevice::open(&path, "r").unwrap();
        let mut out = Vec::new();
        dev.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"onetwo");
    }
}
