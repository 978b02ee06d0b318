//! Platform device primitives.
//!
//! The [`Device`] trait is the boundary between a [`DeviceHandle`](crate::DeviceHandle)
//! and the operating system. [`RawDevice`] implements it for device nodes and
//! regular files on Unix systems.

#[cfg(target_os = "linux")]
use crate::media;
use crate::media::{MediaInformation, TableOfContents};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Raw read, seek and geometry primitives of an opened device.
///
/// Geometry queries return `Ok(None)` when the device does not support
/// them; the geometry resolver then falls back to other strategies.
pub trait Device: Send {
    /// Read into `buf` at the current device position.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Move the device position to the absolute `offset`.
    fn seek(&mut self, offset: u64) -> io::Result<u64>;

    /// Query the total media size in bytes from device metadata.
    fn query_media_size(&mut self) -> io::Result<Option<u64>>;

    /// Determine the media size by seeking to the end of the device.
    ///
    /// The device position afterwards is unspecified.
    fn seek_end(&mut self) -> io::Result<u64>;

    /// Query the logical sector size in bytes.
    fn query_bytes_per_sector(&mut self) -> io::Result<Option<u32>> {
        Ok(None)
    }

    /// Query the largest single transfer the device accepts, in bytes.
    fn query_max_transfer_size(&mut self) -> io::Result<Option<u32>> {
        Ok(None)
    }

    /// Query the media type, bus type and identification strings.
    fn query_media_information(&mut self) -> io::Result<Option<MediaInformation>> {
        Ok(None)
    }

    /// Query the sessions and tracks of an optical disc.
    fn query_table_of_contents(&mut self) -> io::Result<Option<TableOfContents>> {
        Ok(None)
    }
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        (**self).seek(offset)
    }

    fn query_media_size(&mut self) -> io::Result<Option<u64>> {
        (**self).query_media_size()
    }

    fn seek_end(&mut self) -> io::Result<u64> {
        (**self).seek_end()
    }

    fn query_bytes_per_sector(&mut self) -> io::Result<Option<u32>> {
        (**self).query_bytes_per_sector()
    }

    fn query_max_transfer_size(&mut self) -> io::Result<Option<u32>> {
        (**self).query_max_transfer_size()
    }

    fn query_media_information(&mut self) -> io::Result<Option<MediaInformation>> {
        (**self).query_media_information()
    }

    fn query_table_of_contents(&mut self) -> io::Result<Option<TableOfContents>> {
        (**self).query_table_of_contents()
    }
}

#[cfg(target_os = "linux")]
mod ioctl {
    //! Block device ioctl requests from `<linux/fs.h>` and CD-ROM requests
    //! from `<linux/cdrom.h>`.

    const fn io(nr: u64) -> u64 {
        (0x12 << 8) | nr
    }

    #[cfg(any(
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "sparc64"
    ))]
    const IOC_READ: u64 = 2 << 29;
    #[cfg(not(any(
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "sparc64"
    )))]
    const IOC_READ: u64 = 2 << 30;

    const fn ior(nr: u64, size: usize) -> u64 {
        IOC_READ | ((size as u64) << 16) | (0x12 << 8) | nr
    }

    /// Maximum number of sectors per request (unsigned short).
    pub const BLKSECTGET: u64 = io(103);
    /// Logical sector size (int).
    pub const BLKSSZGET: u64 = io(104);
    /// Device size in bytes (u64).
    pub const BLKGETSIZE64: u64 = ior(114, std::mem::size_of::<libc::size_t>());

    pub const CDROMREADTOCHDR: u64 = 0x5305;
    pub const CDROMREADTOCENTRY: u64 = 0x5306;
    pub const CDROMMULTISESSION: u64 = 0x5310;

    pub const CDROM_LBA: u8 = 0x01;
    pub const CDROM_MSF: u8 = 0x02;
    pub const CDROM_LEADOUT: u8 = 0xaa;
    pub const CDROM_DATA_TRACK: u8 = 0x04;

    /// `struct cdrom_tochdr`.
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct TocHeader {
        pub first_track: u8,
        pub last_track: u8,
    }

    /// `struct cdrom_tocentry`.
    #[repr(C)]
    #[derive(Debug, Default)]
    #[allow(dead_code)]
    pub struct TocEntry {
        pub track: u8,
        /// `cdte_adr` and `cdte_ctrl` bit fields.
        pub adr_ctrl: u8,
        pub format: u8,
        /// `union cdrom_addr`: an LBA or minute, second and frame bytes.
        pub addr: i32,
        pub datamode: u8,
    }

    impl TocEntry {
        pub fn control(&self) -> u8 {
            if cfg!(target_endian = "little") {
                self.adr_ctrl >> 4
            } else {
                self.adr_ctrl & 0x0f
            }
        }
    }

    /// `struct cdrom_multisession`.
    #[repr(C)]
    #[derive(Debug, Default)]
    pub struct Multisession {
        pub addr: i32,
        pub xa_flag: u8,
        pub addr_format: u8,
    }
}

/// A device node or regular file opened read-only.
#[derive(Debug)]
pub struct RawDevice {
    path: PathBuf,
    file: File,
    is_block_device: bool,
}

impl RawDevice {
    /// Open the device at `path` for reading.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let is_block_device = file.metadata()?.file_type().is_block_device();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            is_block_device,
        })
    }

    /// Path the device was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the opened node is a block device.
    pub fn is_block_device(&self) -> bool {
        self.is_block_device
    }

    /// Advise the kernel that the device will be read sequentially.
    ///
    /// This doubles the read-ahead window on Linux. It is a no-op elsewhere.
    pub fn advise_sequential(&self) -> io::Result<()> {
        #[cfg(target_os = "linux")]
        {
            let ret = unsafe {
                libc::posix_fadvise(
                    self.file.as_raw_fd(),
                    0,
                    0,
                    libc::POSIX_FADV_SEQUENTIAL,
                )
            };
            if ret != 0 {
                return Err(io::Error::from_raw_os_error(ret));
            }
        }
        Ok(())
    }
}

impl Device for RawDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek(&mut self, offset: u64) -> io::Result<u64> {
        self.file.seek(SeekFrom::Start(offset))
    }

    fn query_media_size(&mut self) -> io::Result<Option<u64>> {
        if self.is_block_device {
            return self.block_media_size();
        }
        let metadata = self.file.metadata()?;
        if metadata.file_type().is_file() {
            Ok(Some(metadata.len()))
        } else {
            Ok(None)
        }
    }

    fn seek_end(&mut self) -> io::Result<u64> {
        self.file.seek(SeekFrom::End(0))
    }

    fn query_bytes_per_sector(&mut self) -> io::Result<Option<u32>> {
        if !self.is_block_device {
            return Ok(None);
        }
        self.block_sector_size()
    }

    fn query_max_transfer_size(&mut self) -> io::Result<Option<u32>> {
        if !self.is_block_device {
            return Ok(None);
        }
        self.block_max_transfer_size()
    }

    fn query_media_information(&mut self) -> io::Result<Option<MediaInformation>> {
        if !self.is_block_device {
            return Ok(None);
        }
        self.block_media_information()
    }

    fn query_table_of_contents(&mut self) -> io::Result<Option<TableOfContents>> {
        if !self.is_block_device {
            return Ok(None);
        }
        self.block_table_of_contents()
    }
}

#[cfg(target_os = "linux")]
impl RawDevice {
    /// Issue `request` with a pointer to `value` as its argument.
    fn ioctl<T>(&self, request: u64, value: &mut T) -> io::Result<()> {
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, value as *mut T) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ioctl_read<T: Default>(&self, request: u64) -> io::Result<T> {
        let mut value = T::default();
        self.ioctl(request, &mut value)?;
        Ok(value)
    }

    fn block_media_size(&self) -> io::Result<Option<u64>> {
        self.ioctl_read::<u64>(ioctl::BLKGETSIZE64).map(Some)
    }

    fn block_sector_size(&self) -> io::Result<Option<u32>> {
        let size = self.ioctl_read::<libc::c_int>(ioctl::BLKSSZGET)?;
        Ok(u32::try_from(size).ok().filter(|&size| size > 0))
    }

    fn block_max_transfer_size(&self) -> io::Result<Option<u32>> {
        let sectors = self.ioctl_read::<libc::c_ushort>(ioctl::BLKSECTGET)?;
        Ok(Some(u32::from(sectors) * 512).filter(|&size| size > 0))
    }

    fn block_media_information(&self) -> io::Result<Option<MediaInformation>> {
        use std::os::unix::fs::MetadataExt;

        let rdev = self.file.metadata()?.rdev();
        Ok(media::sysfs::block_directory(Path::new(media::sysfs::ROOT), rdev)
            .map(|dir| media::sysfs::read_information(&dir)))
    }

    fn block_table_of_contents(&self) -> io::Result<Option<TableOfContents>> {
        let mut header = ioctl::TocHeader::default();
        if let Err(e) = self.ioctl(ioctl::CDROMREADTOCHDR, &mut header) {
            // Not an optical drive, or no disc in it.
            return match e.raw_os_error() {
                Some(libc::ENOTTY | libc::EINVAL | libc::ENOSYS | libc::ENOMEDIUM) => Ok(None),
                _ => Err(e),
            };
        }

        let mut entries = Vec::new();
        for number in header.first_track..=header.last_track {
            let (start_sector, is_data) = self.toc_entry(number)?;
            entries.push(media::TocEntry {
                number,
                start_sector,
                is_data,
            });
        }
        let (lead_out, _) = self.toc_entry(ioctl::CDROM_LEADOUT)?;

        TableOfContents::from_entries(&entries, lead_out, self.last_session_start()).map(Some)
    }

    /// Start sector of a track and whether it holds data.
    fn toc_entry(&self, track: u8) -> io::Result<(u64, bool)> {
        let mut entry = ioctl::TocEntry {
            track,
            format: ioctl::CDROM_LBA,
            ..Default::default()
        };
        self.ioctl(ioctl::CDROMREADTOCENTRY, &mut entry)?;

        let sector = address_to_lba(entry.format, entry.addr)?;
        Ok((sector, entry.control() & ioctl::CDROM_DATA_TRACK != 0))
    }

    /// First sector of the last session of a multi-session disc.
    fn last_session_start(&self) -> Option<u64> {
        let mut session = ioctl::Multisession {
            addr_format: ioctl::CDROM_LBA,
            ..Default::default()
        };
        self.ioctl(ioctl::CDROMMULTISESSION, &mut session).ok()?;
        if session.xa_flag == 0 {
            return None;
        }
        address_to_lba(session.addr_format, session.addr).ok()
    }
}

/// Convert a `union cdrom_addr` in the given format to a sector number.
#[cfg(target_os = "linux")]
fn address_to_lba(format: u8, addr: i32) -> io::Result<u64> {
    let lba = match format {
        ioctl::CDROM_LBA => i64::from(addr),
        ioctl::CDROM_MSF => {
            let [minute, second, frame, _] = addr.to_ne_bytes();
            media::msf_to_lba(minute, second, frame)
        }
        format => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported TOC address format: {}", format),
            ))
        }
    };
    u64::try_from(lba).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("TOC address before the start of the disc: {}", lba),
        )
    })
}

#[cfg(not(target_os = "linux"))]
impl RawDevice {
    fn block_media_size(&self) -> io::Result<Option<u64>> {
        Ok(None)
    }

    fn block_sector_size(&self) -> io::Result<Option<u32>> {
        Ok(None)
    }

    fn block_max_transfer_size(&self) -> io::Result<Option<u32>> {
        Ok(None)
    }

    fn block_media_information(&self) -> io::Result<Option<MediaInformation>> {
        Ok(None)
    }

    fn block_table_of_contents(&self) -> io::Result<Option<TableOfContents>> {
        Ok(None)
    }
}
