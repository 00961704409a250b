//! Address canonicalization.
//!
//! Different peers may load the same binary at different image bases, so
//! effective addresses are not comparable across sessions. Every address
//! that leaves the process is canonical:
//!
//! - `canonical = effective - image_base`
//! - `effective = canonical + image_base`
//!
//! Arithmetic wraps at 64 bits, so `to_effective(to_canonical(x)) == x`
//! holds for every address and every fixed image base.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An address in the local analysis session's live address space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectiveAddress(pub u64);

/// An address relative to the image base, stable across loads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalAddress(pub u64);

/// The load address of the binary in the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageBase(pub u64);

macro_rules! impl_address_fmt {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<u64> for $ty {
            fn from(addr: u64) -> Self {
                Self(addr)
            }
        }
    };
}

impl_address_fmt!(EffectiveAddress);
impl_address_fmt!(CanonicalAddress);

/// A half-open canonical address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: CanonicalAddress,
    pub end: CanonicalAddress,
}

impl AddressRange {
    /// Create a range. Returns `None` if `end < start`.
    pub fn new(start: CanonicalAddress, end: CanonicalAddress) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.end.0 - self.start.0
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Bidirectional mapping for one fixed image base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canonicalizer {
    image_base: ImageBase,
}

impl Canonicalizer {
    pub const fn new(image_base: ImageBase) -> Self {
        Self { image_base }
    }

    pub const fn image_base(&self) -> ImageBase {
        self.image_base
    }

    /// Convert an effective address to a canonical address.
    pub const fn to_canonical(&self, ea: EffectiveAddress) -> CanonicalAddress {
        CanonicalAddress(ea.0.wrapping_sub(self.image_base.0))
    }

    /// Convert a canonical address to an effective address.
    pub const fn to_effective(&self, addr: CanonicalAddress) -> EffectiveAddress {
        EffectiveAddress(addr.0.wrapping_add(self.image_base.0))
    }

    /// Canonicalize an effective `[start, end)` range.
    pub fn range_to_canonical(
        &self,
        start: EffectiveAddress,
        end: EffectiveAddress,
    ) -> AddressRange {
        AddressRange {
            start: self.to_canonical(start),
            end: self.to_canonical(end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_canonical_subtracts_base() {
        let c = Canonicalizer::new(ImageBase(0x400000));
        assert_eq!(c.to_canonical(EffectiveAddress(0x401000)), CanonicalAddress(0x1000));
        assert_eq!(c.to_effective(CanonicalAddress(0x1000)), EffectiveAddress(0x401000));
    }

    #[test]
    fn test_peers_with_different_bases_agree() {
        let a = Canonicalizer::new(ImageBase(0x400000));
        let b = Canonicalizer::new(ImageBase(0x1_4000_0000));
        let canonical = a.to_canonical(EffectiveAddress(0x401234));
        assert_eq!(b.to_effective(canonical), EffectiveAddress(0x1_4000_1234));
    }

    #[test]
    fn test_address_below_base_wraps() {
        let c = Canonicalizer::new(ImageBase(0x1000));
        let canonical = c.to_canonical(EffectiveAddress(0x10));
        assert_eq!(c.to_effective(canonical), EffectiveAddress(0x10));
    }

    #[test]
    fn test_range_rejects_inverted() {
        assert!(AddressRange::new(CanonicalAddress(0x20), CanonicalAddress(0x10)).is_none());
        let range = AddressRange::new(CanonicalAddress(0x10), CanonicalAddress(0x20)).unwrap();
        assert_eq!(range.len(), 0x10);
        assert!(!range.is_empty());
    }

    #[test]
    fn test_address_serializes_as_integer() {
        let json = serde_json::to_string(&CanonicalAddress(0x10)).unwrap();
        assert_eq!(json, "16");
    }

    proptest! {
        #[test]
        fn test_round_trip(x in any::<u64>(), base in any::<u64>()) {
            let c = Canonicalizer::new(ImageBase(base));
            prop_assert_eq!(c.to_effective(c.to_canonical(EffectiveAddress(x))), EffectiveAddress(x));
        }
    }
}
