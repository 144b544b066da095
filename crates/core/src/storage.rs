use std::str::FromStr;

use crate::error::Error;

/// Storage medium hint controlling worker parallelism.
///
/// Concurrent reads of sequential media thrash spinning disks, so HDD runs a
/// single digest worker. SSD and RAID scale with the core count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageClass {
    #[default]
    Hdd,
    Ssd,
    Raid,
}

impl StorageClass {
    /// Number of parallel digest workers for this medium.
    pub fn digest_workers(&self) -> usize {
        match self {
            StorageClass::Hdd => 1,
            StorageClass::Ssd => num_cpus::get(),
            StorageClass::Raid => num_cpus::get().max(4),
        }
    }

    /// Number of parallel exiftool workers for this medium.
    pub fn exif_workers(&self) -> usize {
        match self {
            StorageClass::Hdd => 1,
            StorageClass::Ssd => num_cpus::get(),
            StorageClass::Raid => num_cpus::get().max(4),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Hdd => "HDD",
            StorageClass::Ssd => "SSD",
            StorageClass::Raid => "RAID",
        }
    }
}

impl FromStr for StorageClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HDD" => Ok(StorageClass::Hdd),
            "SSD" => Ok(StorageClass::Ssd),
            "RAID" => Ok(StorageClass::Raid),
            other => Err(Error::UnknownStorageClass(other.to_string())),
        }
    }
}
