//! Target memory map: address ranges and region classification.
//!
//! The default map follows the C64 layout: zero page at `$00-$FF`, I/O at
//! `$D000-$DFFF`, BASIC and KERNAL ROM at `$A000-$BFFF` / `$E000-$FFFF`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Memory region a location lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryRegion {
    ZeroPage,
    Ram,
    Hardware,
    Rom,
    Unknown,
}

impl MemoryRegion {
    /// Whether two regions are provably distinct memory.
    pub fn is_disjoint_from(self, other: MemoryRegion) -> bool {
        self != other && self != MemoryRegion::Unknown && other != MemoryRegion::Unknown
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryRegion::ZeroPage => "zero page",
            MemoryRegion::Ram => "RAM",
            MemoryRegion::Hardware => "hardware",
            MemoryRegion::Rom => "ROM",
            MemoryRegion::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Inclusive address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u16,
    pub end: u16,
}

impl AddressRange {
    pub const fn new(start: u16, end: u16) -> Self {
        AddressRange { start, end }
    }

    pub fn contains(&self, address: u16) -> bool {
        self.start <= address && address <= self.end
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:04X}-${:04X}", self.start, self.end)
    }
}

/// Address ranges used to classify statically known addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMap {
    pub zero_page: AddressRange,
    pub hardware: Vec<AddressRange>,
    pub rom: Vec<AddressRange>,
}

impl Default for MemoryMap {
    fn default() -> Self {
        MemoryMap {
            zero_page: AddressRange::new(0x0000, 0x00FF),
            hardware: vec![AddressRange::new(0xD000, 0xDFFF)],
            rom: vec![
                AddressRange::new(0xA000, 0xBFFF),
                AddressRange::new(0xE000, 0xFFFF),
            ],
        }
    }
}

impl MemoryMap {
    /// Classify an absolute address. Hardware wins over ROM when ranges overlap.
    pub fn classify(&self, address: u16) -> MemoryRegion {
        if self.zero_page.contains(address) {
            MemoryRegion::ZeroPage
        } else if self.is_hardware(address) {
            MemoryRegion::Hardware
        } else if self.rom.iter().any(|r| r.contains(address)) {
            MemoryRegion::Rom
        } else {
            MemoryRegion::Ram
        }
    }

    pub fn is_hardware(&self, address: u16) -> bool {
        self.hardware.iter().any(|r| r.contains(address))
    }

    /// All ranges, for validation.
    pub fn ranges(&self) -> impl Iterator<Item = &AddressRange> {
        std::iter::once(&self.zero_page)
            .chain(self.hardware.iter())
            .chain(self.rom.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map_classification() {
        let map = MemoryMap::default();
        assert_eq!(map.classify(0x00FB), MemoryRegion::ZeroPage);
        assert_eq!(map.classify(0x0810), MemoryRegion::Ram);
        assert_eq!(map.classify(0xD020), MemoryRegion::Hardware);
        assert_eq!(map.classify(0xA000), MemoryRegion::Rom);
        assert_eq!(map.classify(0xFFFE), MemoryRegion::Rom);
    }

    #[test]
    fn test_unknown_region_never_disjoint() {
        assert!(MemoryRegion::ZeroPage.is_disjoint_from(MemoryRegion::Hardware));
        assert!(!MemoryRegion::ZeroPage.is_disjoint_from(MemoryRegion::ZeroPage));
        assert!(!MemoryRegion::Unknown.is_disjoint_from(MemoryRegion::Ram));
    }
}
