//! Remote filesystem service.
//!
//! Implements the file service command set over a registered channel:
//! open/create/replace/temp, read/write/seek/setsize, delete/rename,
//! directory creation, enumeration and stat, drive listing and volume
//! info, plus host↔device and device-side file copies.
//!
//! Long transfers run in chunks of `SENDLEN` bytes per request. The
//! attribute word on the wire uses the device's bit layout; callers see
//! the portable `PSI_A_*` layout, translated at the boundary. Paths use
//! forward slashes on the host side and are converted to backslashes
//! when sent; paths received from the device are returned untouched.

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::error::{Error, ErrorKind, Result};
use crate::ncp::Ncp;
use crate::time::PsiTime;
use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::rc::Rc;

/// Payload bytes carried per chunk on long transfers.
pub const SENDLEN: usize = 2048;

// Device (EPOC) attribute layout.
pub const EPOC_ATTR_RONLY: u32 = 0x0001;
pub const EPOC_ATTR_HIDDEN: u32 = 0x0002;
pub const EPOC_ATTR_SYSTEM: u32 = 0x0004;
pub const EPOC_ATTR_VOLUME: u32 = 0x0008;
pub const EPOC_ATTR_DIRECTORY: u32 = 0x0010;
pub const EPOC_ATTR_ARCHIVE: u32 = 0x0020;
pub const EPOC_ATTR_NORMAL: u32 = 0x0080;
pub const EPOC_ATTR_TEMPORARY: u32 = 0x0100;
pub const EPOC_ATTR_COMPRESSED: u32 = 0x0800;
/// Ask the directory enumerator to include UID records.
pub const EPOC_ATTR_GETUID: u32 = 0x1000_0000;

// Portable attribute layout.
pub const PSI_A_RDONLY: u32 = 0x0001;
pub const PSI_A_HIDDEN: u32 = 0x0002;
pub const PSI_A_SYSTEM: u32 = 0x0004;
pub const PSI_A_DIR: u32 = 0x0008;
pub const PSI_A_ARCHIVE: u32 = 0x0010;
pub const PSI_A_VOLUME: u32 = 0x0020;
pub const PSI_A_NORMAL: u32 = 0x0040;
pub const PSI_A_TEMP: u32 = 0x0080;
pub const PSI_A_COMPRESSED: u32 = 0x0100;
/// Synthesised on every translation from the device; never sent.
pub const PSI_A_READ: u32 = 0x0200;

// Device open modes.
pub const EPOC_OMODE_SHARE_EXCLUSIVE: u32 = 0x0000;
pub const EPOC_OMODE_SHARE_READERS: u32 = 0x0001;
pub const EPOC_OMODE_SHARE_ANY: u32 = 0x0002;
pub const EPOC_OMODE_BINARY: u32 = 0x0000;
pub const EPOC_OMODE_TEXT: u32 = 0x0020;
pub const EPOC_OMODE_READ_WRITE: u32 = 0x0200;

// Portable open flags.
pub const PSI_O_RDONLY: u32 = 0x0000;
pub const PSI_O_WRONLY: u32 = 0x0001;
pub const PSI_O_RDWR: u32 = 0x0002;
pub const PSI_O_EXCL: u32 = 0x0004;

#[derive(Debug, Copy, Clone)]
enum Command {
    CloseHandle = 0x01,
    OpenDir = 0x10,
    ReadDir = 0x12,
    GetDriveList = 0x13,
    DriveInfo = 0x14,
    SetVolumeLabel = 0x15,
    OpenFile = 0x16,
    TempFile = 0x17,
    ReadFile = 0x18,
    WriteFile = 0x19,
    SeekFile = 0x1a,
    Delete = 0x1b,
    RemoteEntry = 0x1c,
    SetSize = 0x1e,
    Rename = 0x1f,
    MkDirAll = 0x20,
    RmDir = 0x21,
    SetAtt = 0x22,
    Att = 0x23,
    SetModified = 0x24,
    Modified = 0x25,
    CreateFile = 0x2c,
    ReplaceFile = 0x2d,
    ReadWriteFile = 0x30,
}

impl Command {
    fn value(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeekMode {
    Set = 1,
    Cur = 2,
    End = 3,
}

/// One directory entry as reported by the device, attributes already in
/// the portable layout.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub short_name: String,
    pub attr: u32,
    pub size: u32,
    pub mtime: PsiTime,
    pub uid: [u32; 3],
}

/// Open directory enumeration: the remote handle plus the batch of
/// entries not yet handed out.
pub struct DirHandle {
    handle: u32,
    buf: Buffer,
}

/// Combined stat result.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo {
    pub attr: u32,
    pub size: u32,
    pub mtime: PsiTime,
}

#[derive(Debug, Clone)]
pub struct DriveInfo {
    pub attr: u32,
    pub unique_id: u32,
    pub total: u64,
    pub free: u64,
    pub name: String,
}

pub struct Rfsv {
    chan: Channel,
}

impl Rfsv {
    pub fn new(ncp: Rc<RefCell<Ncp>>) -> Rfsv {
        Rfsv {
            chan: Channel::new(ncp, "SYS$RFSV"),
        }
    }

    /// Open with portable flags; translated to a device open mode.
    pub fn open(&mut self, name: &str, mode: u32) -> Result<u32> {
        self.fopen(op_mode(mode), name)
    }

    /// Open with an explicit device-layout mode word.
    pub fn fopen(&mut self, attr: u32, name: &str) -> Result<u32> {
        self.open_with(Command::OpenFile, attr, name)
    }

    /// Create a new file; fails if it already exists.
    pub fn fcreate(&mut self, attr: u32, name: &str) -> Result<u32> {
        self.open_with(Command::CreateFile, attr, name)
    }

    /// Create or truncate.
    pub fn freplace(&mut self, attr: u32, name: &str) -> Result<u32> {
        self.open_with(Command::ReplaceFile, attr, name)
    }

    /// Open a server-chosen temporary file; returns handle and its path.
    pub fn mktemp(&mut self) -> Result<(u32, String)> {
        let resp = self.chan.request(Command::TempFile.value(), &Buffer::new())?;
        let handle = resp.dword_at(0).ok_or_else(Error::truncated)?;
        let len = resp.word_at(4).ok_or_else(Error::truncated)? as usize;
        let raw = resp.bytes_at(6, len).ok_or_else(Error::truncated)?;
        Ok((handle, String::from_utf8_lossy(raw).into_owned()))
    }

    pub fn fclose(&mut self, handle: u32) -> Result<()> {
        let mut a = Buffer::new();
        a.add_dword(handle);
        self.chan.request(Command::CloseHandle.value(), &a)?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, issued in SENDLEN chunks. Stops
    /// early when the device returns a short chunk (end of file).
    pub fn fread(&mut self, handle: u32, buf: &mut [u8]) -> Result<usize> {
        let mut count = 0;
        while count < buf.len() {
            let want = (buf.len() - count).min(SENDLEN);
            let mut a = Buffer::new();
            a.add_dword(handle);
            a.add_dword(want as u32);
            let resp = self.chan.request(Command::ReadFile.value(), &a)?;
            let chunk = resp.as_slice();
            if chunk.len() > want {
                return Err(Error::new(ErrorKind::Corrupt, "oversized read chunk"));
            }
            buf[count..count + chunk.len()].copy_from_slice(chunk);
            count += chunk.len();
            if chunk.len() < want {
                break;
            }
        }
        Ok(count)
    }

    /// Write `buf`, issued in SENDLEN chunks.
    pub fn fwrite(&mut self, handle: u32, buf: &[u8]) -> Result<usize> {
        let mut count = 0;
        while count < buf.len() {
            let len = (buf.len() - count).min(SENDLEN);
            let mut a = Buffer::new();
            a.add_dword(handle);
            a.add_bytes(&buf[count..count + len]);
            self.chan.request(Command::WriteFile.value(), &a)?;
            count += len;
        }
        Ok(count)
    }

    /// Unix-like seek with one exception: seeking beyond end of file
    /// extends the file, and the gap contains garbage instead of zeroes.
    pub fn fseek(&mut self, handle: u32, pos: i64, mode: SeekMode) -> Result<u32> {
        let mut mypos = pos;
        let mut savpos: i64 = 0;

        if mode == SeekMode::Cur && mypos >= 0 {
            // Get and save the current position.
            savpos = self.seek_raw(handle, 0, SeekMode::Cur)? as i64;
            if mypos == 0 {
                return Ok(savpos as u32);
            }
        }
        if mode == SeekMode::End && mypos >= 0 {
            // Get and save the end position, then pre-extend the file so
            // the final seek lands inside it.
            savpos = self.seek_raw(handle, 0, SeekMode::End)? as i64;
            if mypos == 0 {
                return Ok(savpos as u32);
            }
            self.fsetsize(handle, (savpos + mypos) as u32)?;
            mypos = 0;
        }
        let realpos = self.seek_raw(handle, mypos as u32, mode)?;
        let calcpos = match mode {
            SeekMode::Set => pos,
            SeekMode::Cur => savpos + pos,
            SeekMode::End => return Ok(realpos),
        };
        if calcpos > realpos as i64 {
            // Beyond end of file.
            self.fsetsize(handle, calcpos as u32)?;
            return self.seek_raw(handle, calcpos as u32, SeekMode::Set);
        }
        Ok(realpos)
    }

    pub fn fsetsize(&mut self, handle: u32, size: u32) -> Result<()> {
        let mut a = Buffer::new();
        a.add_dword(handle);
        a.add_dword(size);
        self.chan.request(Command::SetSize.value(), &a)?;
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<()> {
        let mut a = Buffer::new();
        add_name(&mut a, &convert_slash(name));
        self.chan.request(Command::Delete.value(), &a)?;
        Ok(())
    }

    pub fn rename(&mut self, oldname: &str, newname: &str) -> Result<()> {
        let mut a = Buffer::new();
        add_name(&mut a, &convert_slash(oldname));
        add_name(&mut a, &convert_slash(newname));
        self.chan.request(Command::Rename.value(), &a)?;
        Ok(())
    }

    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        let mut a = Buffer::new();
        add_name(&mut a, &dir_name(name));
        self.chan.request(Command::MkDirAll.value(), &a)?;
        Ok(())
    }

    pub fn rmdir(&mut self, name: &str) -> Result<()> {
        let mut a = Buffer::new();
        add_name(&mut a, &dir_name(name));
        self.chan.request(Command::RmDir.value(), &a)?;
        Ok(())
    }

    /// Open a directory for enumeration; `attr` is in the portable
    /// layout and selects which entries are reported.
    pub fn opendir(&mut self, attr: u32, name: &str) -> Result<DirHandle> {
        let handle = self.fopendir(std_to_attr(attr), name)?;
        Ok(DirHandle {
            handle,
            buf: Buffer::new(),
        })
    }

    /// Device-layout flavour of `opendir`, returning the bare handle.
    pub fn fopendir(&mut self, attr: u32, name: &str) -> Result<u32> {
        self.open_with(Command::OpenDir, attr | EPOC_ATTR_GETUID, name)
    }

    /// Next directory entry. The device delivers entries in batches; a
    /// new READ_DIR is issued when the current batch is exhausted. End
    /// of enumeration is reported as `Eof`.
    pub fn readdir(&mut self, dh: &mut DirHandle) -> Result<DirEntry> {
        if dh.buf.len() < 17 {
            let mut a = Buffer::new();
            a.add_dword(dh.handle);
            dh.buf = self.chan.request(Command::ReadDir.value(), &a)?;
        }
        parse_entry(&mut dh.buf).ok_or_else(Error::truncated)
    }

    pub fn closedir(&mut self, dh: DirHandle) -> Result<()> {
        self.fclose(dh.handle)
    }

    /// Enumerate a whole directory. `Eof` from the device is the normal
    /// end of the listing and is not surfaced as an error.
    pub fn dir(&mut self, name: &str) -> Result<Vec<DirEntry>> {
        let mut dh = self.opendir(PSI_A_HIDDEN | PSI_A_SYSTEM | PSI_A_DIR, name)?;
        let mut entries = Vec::new();
        let res = loop {
            match self.readdir(&mut dh) {
                Ok(e) => entries.push(e),
                Err(e) => break e,
            }
        };
        let _ = self.closedir(dh);
        if res.kind() == ErrorKind::Eof {
            Ok(entries)
        } else {
            Err(res)
        }
    }

    /// Count directory entries without collecting them.
    pub fn dircount(&mut self, name: &str) -> Result<u32> {
        let mut dh = self.opendir(PSI_A_HIDDEN | PSI_A_SYSTEM | PSI_A_DIR, name)?;
        let mut count = 0;
        let res = loop {
            match self.readdir(&mut dh) {
                Ok(_) => count += 1,
                Err(e) => break e,
            }
        };
        let _ = self.closedir(dh);
        if res.kind() == ErrorKind::Eof {
            Ok(count)
        } else {
            Err(res)
        }
    }

    /// File attributes in the portable layout.
    pub fn fgetattr(&mut self, name: &str) -> Result<u32> {
        let mut a = Buffer::new();
        add_name(&mut a, &convert_slash(name));
        let resp = self.chan.request(Command::Att.value(), &a)?;
        let attr = resp.dword_at(0).ok_or_else(Error::truncated)?;
        Ok(attr_to_std(attr))
    }

    /// Combined stat: attributes, size and modification time.
    pub fn fgeteattr(&mut self, name: &str) -> Result<EntryInfo> {
        let mut a = Buffer::new();
        add_name(&mut a, &convert_slash(name));
        let resp = self.chan.request(Command::RemoteEntry.value(), &a)?;
        match (resp.dword_at(4), resp.dword_at(8), resp.dword_at(12), resp.dword_at(16)) {
            (Some(attr), Some(size), Some(lo), Some(hi)) => Ok(EntryInfo {
                attr: attr_to_std(attr),
                size,
                mtime: PsiTime::new(hi, lo),
            }),
            _ => Err(Error::truncated()),
        }
    }

    /// Set and clear attribute bits, both in the portable layout.
    pub fn fsetattr(&mut self, name: &str, set: u32, clear: u32) -> Result<()> {
        let mut a = Buffer::new();
        a.add_dword(std_to_attr(set));
        a.add_dword(std_to_attr(clear));
        add_name(&mut a, &convert_slash(name));
        self.chan.request(Command::SetAtt.value(), &a)?;
        Ok(())
    }

    pub fn fgetmtime(&mut self, name: &str) -> Result<PsiTime> {
        let mut a = Buffer::new();
        add_name(&mut a, &convert_slash(name));
        let resp = self.chan.request(Command::Modified.value(), &a)?;
        match (resp.dword_at(0), resp.dword_at(4)) {
            (Some(lo), Some(hi)) => Ok(PsiTime::new(hi, lo)),
            _ => Err(Error::truncated()),
        }
    }

    pub fn fsetmtime(&mut self, name: &str, mtime: PsiTime) -> Result<()> {
        let mut a = Buffer::new();
        a.add_dword(mtime.lo());
        a.add_dword(mtime.hi());
        add_name(&mut a, &convert_slash(name));
        self.chan.request(Command::SetModified.value(), &a)?;
        Ok(())
    }

    /// Bitmask of present drives, bit 0 = A.
    pub fn devlist(&mut self) -> Result<u32> {
        let resp = self.chan.request(Command::GetDriveList.value(), &Buffer::new())?;
        if resp.len() != 26 {
            return Err(Error::truncated());
        }
        let mut devbits = 0u32;
        for i in (0..26).rev() {
            devbits <<= 1;
            if resp.byte_at(i) != Some(0) {
                devbits |= 1;
            }
        }
        Ok(devbits)
    }

    /// Volume information for a drive (0 = A).
    pub fn devinfo(&mut self, drive: u32) -> Result<DriveInfo> {
        let mut a = Buffer::new();
        a.add_dword(drive);
        let resp = self.chan.request(Command::DriveInfo.value(), &a)?;
        let attr = resp.dword_at(0).ok_or_else(Error::truncated)?;
        let unique_id = resp.dword_at(16).ok_or_else(Error::truncated)?;
        let total = resp.long_at(20).ok_or_else(Error::truncated)?;
        let free = resp.long_at(28).ok_or_else(Error::truncated)?;
        let len = resp.dword_at(36).ok_or_else(Error::truncated)? as usize;
        let raw = resp.bytes_at(40, len).ok_or_else(Error::truncated)?;
        let raw = raw.strip_suffix(&[0u8]).unwrap_or(raw);
        Ok(DriveInfo {
            attr,
            unique_id,
            total,
            free,
            name: String::from_utf8_lossy(raw).into_owned(),
        })
    }

    pub fn set_volume_name(&mut self, drive: char, name: &str) -> Result<()> {
        let mut a = Buffer::new();
        a.add_dword(drive as u32 - 'A' as u32);
        a.add_word(name.len() as u16);
        a.add_string_t(name);
        self.chan.request(Command::SetVolumeLabel.value(), &a)?;
        Ok(())
    }

    /// Copy a device file to the host. The callback runs after every
    /// chunk; returning false cancels the copy and removes the local
    /// destination.
    pub fn copy_from_device(
        &mut self,
        from: &str,
        to: &Path,
        mut cb: Option<&mut dyn FnMut(u64) -> bool>,
    ) -> Result<u64> {
        let handle = self.fopen(EPOC_OMODE_SHARE_READERS | EPOC_OMODE_BINARY, from)?;
        let mut out = match File::create(to) {
            Ok(f) => f,
            Err(e) => {
                let _ = self.fclose(handle);
                return Err(Error::new(
                    ErrorKind::WriteError,
                    &format!("cannot create {}: {}", to.display(), e),
                ));
            }
        };
        let mut buf = vec![0u8; SENDLEN];
        let mut total: u64 = 0;
        let mut result: Result<()> = Ok(());
        loop {
            let len = match self.fread(handle, &mut buf) {
                Ok(l) => l,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            if len > 0 {
                if let Err(e) = out.write_all(&buf[..len]) {
                    result = Err(Error::new(
                        ErrorKind::WriteError,
                        &format!("write to {} failed: {}", to.display(), e),
                    ));
                    break;
                }
                total += len as u64;
                if let Some(cb) = cb.as_mut() {
                    if !cb(total) {
                        result = Err(Error::from_kind(ErrorKind::Cancelled));
                        break;
                    }
                }
            }
            if len < SENDLEN {
                break;
            }
        }
        let _ = self.fclose(handle);
        drop(out);
        if let Err(e) = result {
            if e.kind() == ErrorKind::Cancelled {
                let _ = std::fs::remove_file(to);
            }
            return Err(e);
        }
        Ok(total)
    }

    /// Copy a host file to the device. A cancelled copy deletes the
    /// partially written remote file.
    pub fn copy_to_device(
        &mut self,
        from: &Path,
        to: &str,
        mut cb: Option<&mut dyn FnMut(u64) -> bool>,
    ) -> Result<u64> {
        let mut input = match File::open(from) {
            Ok(f) => f,
            Err(_) => return Err(Error::from_kind(ErrorKind::NotFound)),
        };
        let attr = EPOC_OMODE_BINARY | EPOC_OMODE_SHARE_EXCLUSIVE | EPOC_OMODE_READ_WRITE;
        let handle = match self.fcreate(attr, to) {
            Ok(h) => h,
            Err(_) => self.freplace(attr, to)?,
        };
        let mut buf = vec![0u8; SENDLEN];
        let mut total: u64 = 0;
        let mut result: Result<()> = Ok(());
        loop {
            let len = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(l) => l,
                Err(e) => {
                    result = Err(Error::new(
                        ErrorKind::Unknown,
                        &format!("read from {} failed: {}", from.display(), e),
                    ));
                    break;
                }
            };
            if let Err(e) = self.fwrite(handle, &buf[..len]) {
                result = Err(e);
                break;
            }
            total += len as u64;
            if let Some(cb) = cb.as_mut() {
                if !cb(total) {
                    result = Err(Error::from_kind(ErrorKind::Cancelled));
                    break;
                }
            }
        }
        let _ = self.fclose(handle);
        if let Err(e) = result {
            if e.kind() == ErrorKind::Cancelled {
                let _ = self.remove(to);
            }
            return Err(e);
        }
        Ok(total)
    }

    /// Device-side copy, batched so the data never crosses the serial
    /// line. Any failure removes the target.
    pub fn copy_on_device(
        &mut self,
        from: &str,
        to: &str,
        mut cb: Option<&mut dyn FnMut(u64) -> bool>,
    ) -> Result<u64> {
        // The source must exist before the target is created.
        self.fgeteattr(from)?;
        let from_handle = self.fopen(EPOC_OMODE_SHARE_READERS | EPOC_OMODE_BINARY, from)?;
        let attr = EPOC_OMODE_BINARY | EPOC_OMODE_SHARE_EXCLUSIVE | EPOC_OMODE_READ_WRITE;
        let to_handle = match self.fcreate(attr, to) {
            Ok(h) => h,
            Err(_) => match self.freplace(attr, to) {
                Ok(h) => h,
                Err(e) => {
                    let _ = self.fclose(from_handle);
                    return Err(e);
                }
            },
        };
        let batch = (SENDLEN * 10) as u32;
        let mut total: u64 = 0;
        let mut result: Result<()> = Ok(());
        loop {
            let mut b = Buffer::new();
            b.add_dword(batch);
            b.add_dword(to_handle);
            b.add_dword(from_handle);
            let resp = match self.chan.request(Command::ReadWriteFile.value(), &b) {
                Ok(r) => r,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            let len = match resp.dword_at(0) {
                Some(l) if resp.len() == 4 => l,
                _ => {
                    result = Err(Error::truncated());
                    break;
                }
            };
            total += len as u64;
            if let Some(cb) = cb.as_mut() {
                if !cb(total) {
                    result = Err(Error::from_kind(ErrorKind::Cancelled));
                    break;
                }
            }
            if len != batch {
                break;
            }
        }
        let _ = self.fclose(from_handle);
        let _ = self.fclose(to_handle);
        if let Err(e) = result {
            let _ = self.remove(to);
            return Err(e);
        }
        Ok(total)
    }

    fn open_with(&mut self, command: Command, attr: u32, name: &str) -> Result<u32> {
        let n = convert_slash(name);
        let mut a = Buffer::new();
        a.add_dword(attr);
        add_name(&mut a, &n);
        let resp = self.chan.request(command.value(), &a)?;
        resp.dword_at(0).ok_or_else(Error::truncated)
    }

    fn seek_raw(&mut self, handle: u32, pos: u32, mode: SeekMode) -> Result<u32> {
        let mut a = Buffer::new();
        a.add_dword(pos);
        a.add_dword(handle);
        a.add_dword(mode as u32);
        let resp = self.chan.request(Command::SeekFile.value(), &a)?;
        resp.dword_at(0).ok_or_else(Error::truncated)
    }
}

/// Portable open flags to device open mode.
pub fn op_mode(mode: u32) -> u32 {
    let mut ret = 0;
    if mode & 0x3 != PSI_O_RDONLY {
        ret |= EPOC_OMODE_READ_WRITE;
    }
    if ret == 0 && mode & PSI_O_EXCL == 0 {
        ret |= EPOC_OMODE_SHARE_READERS;
    }
    ret
}

/// Translate device attributes to the portable layout. `PSI_A_READ` is
/// always set: everything readable on the device is readable here.
pub fn attr_to_std(attr: u32) -> u32 {
    let mut res = 0;
    if attr & EPOC_ATTR_RONLY != 0 {
        res |= PSI_A_RDONLY;
    }
    if attr & EPOC_ATTR_HIDDEN != 0 {
        res |= PSI_A_HIDDEN;
    }
    if attr & EPOC_ATTR_SYSTEM != 0 {
        res |= PSI_A_SYSTEM;
    }
    if attr & EPOC_ATTR_DIRECTORY != 0 {
        res |= PSI_A_DIR;
    }
    if attr & EPOC_ATTR_ARCHIVE != 0 {
        res |= PSI_A_ARCHIVE;
    }
    if attr & EPOC_ATTR_VOLUME != 0 {
        res |= PSI_A_VOLUME;
    }
    if attr & EPOC_ATTR_NORMAL != 0 {
        res |= PSI_A_NORMAL;
    }
    if attr & EPOC_ATTR_TEMPORARY != 0 {
        res |= PSI_A_TEMP;
    }
    if attr & EPOC_ATTR_COMPRESSED != 0 {
        res |= PSI_A_COMPRESSED;
    }
    res | PSI_A_READ
}

/// Translate portable attributes to the device layout.
pub fn std_to_attr(attr: u32) -> u32 {
    let mut res = 0;
    if attr & PSI_A_RDONLY != 0 {
        res |= EPOC_ATTR_RONLY;
    }
    if attr & PSI_A_HIDDEN != 0 {
        res |= EPOC_ATTR_HIDDEN;
    }
    if attr & PSI_A_SYSTEM != 0 {
        res |= EPOC_ATTR_SYSTEM;
    }
    if attr & PSI_A_DIR != 0 {
        res |= EPOC_ATTR_DIRECTORY;
    }
    if attr & PSI_A_ARCHIVE != 0 {
        res |= EPOC_ATTR_ARCHIVE;
    }
    if attr & PSI_A_VOLUME != 0 {
        res |= EPOC_ATTR_VOLUME;
    }
    if attr & PSI_A_NORMAL != 0 {
        res |= EPOC_ATTR_NORMAL;
    }
    if attr & PSI_A_TEMP != 0 {
        res |= EPOC_ATTR_TEMPORARY;
    }
    if attr & PSI_A_COMPRESSED != 0 {
        res |= EPOC_ATTR_COMPRESSED;
    }
    res
}

/// "drwhsa"-style rendering of a portable attribute word.
pub fn attr_string(attr: u32) -> String {
    let mut s = String::with_capacity(6);
    s.push(if attr & PSI_A_DIR != 0 { 'd' } else { '-' });
    s.push(if attr & PSI_A_RDONLY != 0 { 'r' } else { 'w' });
    s.push(if attr & PSI_A_HIDDEN != 0 { 'h' } else { '-' });
    s.push(if attr & PSI_A_SYSTEM != 0 { 's' } else { '-' });
    s.push(if attr & PSI_A_ARCHIVE != 0 { 'a' } else { '-' });
    s.push(if attr & PSI_A_VOLUME != 0 { 'v' } else { '-' });
    s
}

fn convert_slash(name: &str) -> String {
    name.replace('/', "\\")
}

/// Directory arguments carry a trailing backslash.
fn dir_name(name: &str) -> String {
    let mut n = convert_slash(name);
    if !n.is_empty() && !n.ends_with('\\') {
        n.push('\\');
    }
    n
}

fn add_name(a: &mut Buffer, name: &str) {
    a.add_word(name.len() as u16);
    a.add_string(name);
}

/// Split one entry off the front of a READ_DIR batch. Entries are
/// 4-byte aligned after each of the two names.
fn parse_entry(b: &mut Buffer) -> Option<DirEntry> {
    let short_len = b.dword_at(0)? as usize;
    let attr = attr_to_std(b.dword_at(4)?);
    let size = b.dword_at(8)?;
    let mtime = PsiTime::new(b.dword_at(16)?, b.dword_at(12)?);
    let uid = [b.dword_at(20)?, b.dword_at(24)?, b.dword_at(28)?];
    let long_len = b.dword_at(32)? as usize;
    let mut d = 36;
    let name = String::from_utf8_lossy(b.bytes_at(d, long_len)?).into_owned();
    d += long_len;
    while d % 4 != 0 {
        d += 1;
    }
    let short_name = String::from_utf8_lossy(b.bytes_at(d, short_len)?).into_owned();
    d += short_len;
    while d % 4 != 0 {
        d += 1;
    }
    b.discard_first_bytes(d);
    Some(DirEntry {
        name,
        short_name,
        attr,
        size,
        mtime,
        uid,
    })
}
