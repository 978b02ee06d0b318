//! Media information and optical disc layout.
//!
//! On Linux the media information of a block device is read from sysfs
//! (`/sys/dev/block/<major>:<minor>`), and the sessions and tracks of an
//! optical disc from its table of contents.

use std::fmt;
use std::io;

/// Kind of media behind a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    /// Non-removable media such as an internal disk.
    Fixed,
    /// Removable media such as a USB stick.
    Removable,
    /// CD, DVD or Blu-ray disc.
    OpticalDisc,
    /// Memory card or RAM disk.
    Memory,
    #[default]
    Unknown,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            MediaType::Fixed => "Fixed",
            MediaType::Removable => "Removable",
            MediaType::OpticalDisc => "Optical",
            MediaType::Memory => "Memory",
            MediaType::Unknown => "Unknown",
        })
    }
}

/// Bus the device is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusType {
    Ata,
    Scsi,
    Usb,
    FireWire,
    #[default]
    Unknown,
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            BusType::Ata => "ATA/ATAPI",
            BusType::Scsi => "SCSI",
            BusType::Usb => "USB",
            BusType::FireWire => "FireWire (IEEE1394)",
            BusType::Unknown => "Unknown",
        })
    }
}

/// Media type, bus type and identification strings of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInformation {
    pub media_type: MediaType,
    pub bus_type: BusType,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
}

impl MediaInformation {
    /// Identification string named `identifier`: `"vendor"`, `"model"` or
    /// `"serial_number"`.
    ///
    /// Returns `None` for other identifiers and for values the device does
    /// not report.
    pub fn value(&self, identifier: &str) -> Option<&str> {
        let value = match identifier {
            "vendor" => &self.vendor,
            "model" => &self.model,
            "serial_number" => &self.serial_number,
            _ => return None,
        };
        value.as_deref()
    }
}

/// A contiguous run of sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRange {
    pub start_sector: u64,
    pub number_of_sectors: u64,
}

impl SectorRange {
    /// Create a new SectorRange.
    pub fn new(start_sector: u64, number_of_sectors: u64) -> Self {
        Self {
            start_sector,
            number_of_sectors,
        }
    }

    /// Sector after the last sector of the range.
    pub fn end_sector(&self) -> u64 {
        self.start_sector.saturating_add(self.number_of_sectors)
    }
}

/// Content type of an optical disc track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Audio,
    Data,
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            TrackType::Audio => "audio",
            TrackType::Data => "data",
        })
    }
}

/// A track of an optical disc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    /// Track number as recorded on the disc.
    pub number: u8,
    pub start_sector: u64,
    pub number_of_sectors: u64,
    pub track_type: TrackType,
}

/// Sessions and tracks of an optical disc.
///
/// Both are empty for media without a table of contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOfContents {
    pub sessions: Vec<SectorRange>,
    pub tracks: Vec<Track>,
}

/// Table of contents entry as reported by the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TocEntry {
    pub number: u8,
    pub start_sector: u64,
    pub is_data: bool,
}

impl TableOfContents {
    /// Build the layout from the track entries, the lead-out sector and
    /// the first sector of the last session of a multi-session disc.
    ///
    /// Drives only report where the last session starts, so all earlier
    /// sessions are returned as a single range.
    pub(crate) fn from_entries(
        entries: &[TocEntry],
        lead_out: u64,
        last_session: Option<u64>,
    ) -> io::Result<Self> {
        let mut tracks = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let end = entries.get(i + 1).map_or(lead_out, |next| next.start_sector);
            if end < entry.start_sector {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "track {} ends at sector {} before it starts at {}",
                        entry.number, end, entry.start_sector
                    ),
                ));
            }
            tracks.push(Track {
                number: entry.number,
                start_sector: entry.start_sector,
                number_of_sectors: end - entry.start_sector,
                track_type: if entry.is_data {
                    TrackType::Data
                } else {
                    TrackType::Audio
                },
            });
        }

        let mut sessions = Vec::new();
        if let Some(first) = entries.first() {
            let start = first.start_sector;
            match last_session.filter(|&last| last > start && last < lead_out) {
                Some(last) => {
                    sessions.push(SectorRange::new(start, last - start));
                    sessions.push(SectorRange::new(last, lead_out - last));
                }
                None => sessions.push(SectorRange::new(start, lead_out - start)),
            }
        }
        Ok(Self { sessions, tracks })
    }
}

/// Convert a minute/second/frame address to a logical block address.
pub(crate) fn msf_to_lba(minute: u8, second: u8, frame: u8) -> i64 {
    const FRAMES_PER_SECOND: i64 = 75;
    // The first 2 seconds of a disc precede block 0.
    const MSF_OFFSET: i64 = 150;

    (i64::from(minute) * 60 + i64::from(second)) * FRAMES_PER_SECOND + i64::from(frame)
        - MSF_OFFSET
}

#[cfg(target_os = "linux")]
pub(crate) mod sysfs {
    //! Media information of Linux block devices from sysfs.

    use super::{BusType, MediaInformation, MediaType};
    use std::fs;
    use std::path::{Path, PathBuf};

    pub const ROOT: &str = "/sys";

    /// Split a Linux `dev_t` into its major and minor number.
    pub fn split_device_number(rdev: u64) -> (u64, u64) {
        let major = ((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0x0000_0fff);
        let minor = ((rdev >> 12) & 0xffff_ff00) | (rdev & 0x0000_00ff);
        (major, minor)
    }

    /// Sysfs directory of the whole disk behind the block device `rdev`.
    ///
    /// A partition resolves to its parent disk.
    pub fn block_directory(root: &Path, rdev: u64) -> Option<PathBuf> {
        let (major, minor) = split_device_number(rdev);
        let dir = fs::canonicalize(root.join(format!("dev/block/{}:{}", major, minor))).ok()?;
        if dir.join("partition").exists() {
            return dir.parent().map(Path::to_path_buf);
        }
        Some(dir)
    }

    /// Read the media information of the disk described by `dir`.
    ///
    /// Missing attributes are reported as unknown.
    pub fn read_information(dir: &Path) -> MediaInformation {
        let device = dir.join("device");
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let media_type = if read_attribute(&device.join("type")).as_deref() == Some("5") {
            // SCSI peripheral device type of CD/DVD drives.
            MediaType::OpticalDisc
        } else if name.starts_with("mmcblk") || name.starts_with("ram") {
            MediaType::Memory
        } else {
            match read_attribute(&dir.join("removable")).as_deref() {
                Some("1") => MediaType::Removable,
                Some(_) => MediaType::Fixed,
                None => MediaType::Unknown,
            }
        };

        MediaInformation {
            media_type,
            bus_type: bus_type(&device),
            vendor: read_attribute(&device.join("vendor")),
            model: read_attribute(&device.join("model")),
            serial_number: read_attribute(&device.join("serial"))
                .or_else(|| read_unit_serial_number(&device.join("vpd_pg80"))),
        }
    }

    fn read_attribute(path: &Path) -> Option<String> {
        fs::read(path).ok().and_then(|value| trimmed(&value))
    }

    /// Serial number from a SCSI unit serial number VPD page (0x80).
    fn read_unit_serial_number(path: &Path) -> Option<String> {
        let page = fs::read(path).ok()?;
        if page.len() <= 4 || page[1] != 0x80 {
            return None;
        }
        let length = usize::from(page[3]).min(page.len() - 4);
        trimmed(&page[4..4 + length])
    }

    fn trimmed(value: &[u8]) -> Option<String> {
        let value = String::from_utf8_lossy(value);
        let value = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        (!value.is_empty()).then(|| value.to_string())
    }

    fn bus_type(device: &Path) -> BusType {
        let Ok(path) = fs::canonicalize(device) else {
            return BusType::Unknown;
        };
        for component in path.iter() {
            let component = component.to_string_lossy();
            if is_numbered(&component, "usb") {
                return BusType::Usb;
            }
            if is_numbered(&component, "fw") || component == "firewire" {
                return BusType::FireWire;
            }
            if is_numbered(&component, "ata") {
                return BusType::Ata;
            }
        }
        match fs::canonicalize(device.join("subsystem")) {
            Ok(subsystem) if subsystem.file_name().is_some_and(|name| name == "scsi") => {
                BusType::Scsi
            }
            _ => BusType::Unknown,
        }
    }

    /// Whether `component` is `prefix` followed by a number, as in `usb2`.
    fn is_numbered(component: &str, prefix: &str) -> bool {
        component
            .strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(number: u8, start_sector: u64, is_data: bool) -> TocEntry {
        TocEntry {
            number,
            start_sector,
            is_data,
        }
    }

    #[test]
    fn test_single_session() {
        let entries = [entry(1, 0, false), entry(2, 15000, false), entry(3, 30000, true)];
        let toc = TableOfContents::from_entries(&entries, 40000, None).unwrap();

        assert_eq!(toc.sessions, vec![SectorRange::new(0, 40000)]);
        assert_eq!(toc.tracks.len(), 3);
        assert_eq!(
            toc.tracks[1],
            Track {
                number: 2,
                start_sector: 15000,
                number_of_sectors: 15000,
                track_type: TrackType::Audio,
            }
        );
        assert_eq!(toc.tracks[2].track_type, TrackType::Data);
        assert_eq!(toc.tracks[2].number_of_sectors, 10000);
    }

    #[test]
    fn test_multi_session() {
        let entries = [entry(1, 0, true), entry(2, 20000, true)];
        let toc = TableOfContents::from_entries(&entries, 25000, Some(20000)).unwrap();
        assert_eq!(
            toc.sessions,
            vec![SectorRange::new(0, 20000), SectorRange::new(20000, 5000)]
        );
        assert_eq!(toc.sessions[1].end_sector(), 25000);

        // A last session outside the disc is ignored.
        let toc = TableOfContents::from_entries(&entries, 25000, Some(30000)).unwrap();
        assert_eq!(toc.sessions, vec![SectorRange::new(0, 25000)]);
    }

    #[test]
    fn test_toc_out_of_order() {
        let entries = [entry(1, 500, true), entry(2, 100, true)];
        let err = TableOfContents::from_entries(&entries, 1000, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = TableOfContents::from_entries(&[entry(1, 500, true)], 100, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let toc = TableOfContents::from_entries(&[], 100, None).unwrap();
        assert_eq!(toc, TableOfContents::default());
    }

    #[test]
    fn test_msf_to_lba() {
        assert_eq!(msf_to_lba(0, 2, 0), 0);
        assert_eq!(msf_to_lba(0, 2, 16), 16);
        assert_eq!(msf_to_lba(1, 0, 0), 4350);
        assert_eq!(msf_to_lba(0, 0, 0), -150);
    }

    #[test]
    fn test_information_value() {
        let information = MediaInformation {
            vendor: Some("ATA".to_string()),
            model: Some("Samsung SSD".to_string()),
            ..Default::default()
        };
        assert_eq!(information.value("vendor"), Some("ATA"));
        assert_eq!(information.value("model"), Some("Samsung SSD"));
        assert_eq!(information.value("serial_number"), None);
        assert_eq!(information.value("firmware"), None);
        assert_eq!(information.media_type, MediaType::Unknown);
        assert_eq!(information.bus_type.to_string(), "Unknown");
        assert_eq!(MediaType::OpticalDisc.to_string(), "Optical");
    }

    #[cfg(target_os = "linux")]
    mod sysfs_tests {
        use super::super::sysfs::*;
        use super::super::*;
        use std::fs;
        use std::os::unix::fs::symlink;
        use std::path::Path;
        use tempfile::TempDir;

        fn write(path: &Path, contents: &[u8]) {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, contents).unwrap();
        }

        /// Create `block/<name>` with a `device` link to `devices/<device_path>`.
        fn disk(root: &Path, name: &str, device_path: &str) -> std::path::PathBuf {
            let device = root.join("devices").join(device_path);
            fs::create_dir_all(&device).unwrap();
            let dir = root.join("block").join(name);
            fs::create_dir_all(&dir).unwrap();
            symlink(&device, dir.join("device")).unwrap();
            dir
        }

        #[test]
        fn test_split_device_number() {
            assert_eq!(split_device_number((8 << 8) | 17), (8, 17));
            // Minor numbers above 255 use the extended encoding.
            assert_eq!(split_device_number((259 << 8) | (0x1 << 20) | 0x2), (259, 0x102));
        }

        #[test]
        fn test_usb_removable_disk() {
            let root = TempDir::new().unwrap();
            let dir = disk(
                root.path(),
                "sdb",
                "pci0000:00/0000:00:14.0/usb2/2-1/2-1:1.0/host6/target6:0:0/6:0:0:0",
            );
            write(&dir.join("removable"), b"1\n");
            write(&dir.join("device/vendor"), b"Kingston\n");
            write(&dir.join("device/model"), b"DataTraveler 3.0\n");
            write(&dir.join("device/type"), b"0\n");

            let information = read_information(&dir);
            assert_eq!(information.media_type, MediaType::Removable);
            assert_eq!(information.bus_type, BusType::Usb);
            assert_eq!(information.vendor.as_deref(), Some("Kingston"));
            assert_eq!(information.model.as_deref(), Some("DataTraveler 3.0"));
            assert_eq!(information.serial_number, None);
        }

        #[test]
        fn test_ata_fixed_disk() {
            let root = TempDir::new().unwrap();
            let dir = disk(
                root.path(),
                "sda",
                "pci0000:00/0000:00:17.0/ata1/host0/target0:0:0/0:0:0:0",
            );
            write(&dir.join("removable"), b"0\n");
            write(&dir.join("device/vendor"), b"ATA     \n");
            let mut page = vec![0x00, 0x80, 0x00, 0x0c];
            page.extend_from_slice(b"  S3Z9NB0K12\0\0");
            write(&dir.join("device/vpd_pg80"), &page);

            let information = read_information(&dir);
            assert_eq!(information.media_type, MediaType::Fixed);
            assert_eq!(information.bus_type, BusType::Ata);
            assert_eq!(information.vendor.as_deref(), Some("ATA"));
            assert_eq!(information.model, None);
            assert_eq!(information.serial_number.as_deref(), Some("S3Z9NB0K12"));
        }

        #[test]
        fn test_optical_scsi_drive() {
            let root = TempDir::new().unwrap();
            let dir = disk(root.path(), "sr0", "platform/host3/target3:0:0/3:0:0:0");
            let bus = root.path().join("bus/scsi");
            fs::create_dir_all(&bus).unwrap();
            symlink(&bus, dir.join("device/subsystem")).unwrap();
            write(&dir.join("removable"), b"1\n");
            write(&dir.join("device/type"), b"5\n");

            let information = read_information(&dir);
            assert_eq!(information.media_type, MediaType::OpticalDisc);
            assert_eq!(information.bus_type, BusType::Scsi);
        }

        #[test]
        fn test_memory_card() {
            let root = TempDir::new().unwrap();
            let dir = disk(root.path(), "mmcblk0", "platform/mmc0/mmc0:0001");
            write(&dir.join("removable"), b"0\n");
            write(&dir.join("device/serial"), b"0x1234abcd\n");

            let information = read_information(&dir);
            assert_eq!(information.media_type, MediaType::Memory);
            assert_eq!(information.bus_type, BusType::Unknown);
            assert_eq!(information.serial_number.as_deref(), Some("0x1234abcd"));

            // Nothing known about a bare directory.
            let bare = root.path().join("block/loop0");
            fs::create_dir_all(&bare).unwrap();
            assert_eq!(read_information(&bare), MediaInformation::default());
        }

        #[test]
        fn test_block_directory() {
            let root = TempDir::new().unwrap();
            let dir = disk(root.path(), "sdb", "usb1/1-1");
            let partition = dir.join("sdb1");
            write(&partition.join("partition"), b"1\n");

            fs::create_dir_all(root.path().join("dev/block")).unwrap();
            symlink(&dir, root.path().join("dev/block/8:16")).unwrap();
            symlink(&partition, root.path().join("dev/block/8:17")).unwrap();

            let disk_dir = fs::canonicalize(&dir).unwrap();
            assert_eq!(block_directory(root.path(), (8 << 8) | 16), Some(disk_dir.clone()));
            assert_eq!(block_directory(root.path(), (8 << 8) | 17), Some(disk_dir));
            assert_eq!(block_directory(root.path(), (8 << 8) | 18), None);
        }
    }
}
