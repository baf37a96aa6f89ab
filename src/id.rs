// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resource identifiers, registry ids and dependency handles.

use rustc_hash::FxHasher;
use slotmap::new_key_type;
use std::fmt;
use std::hash::Hasher;

new_key_type! {
    /// Identifier of a registry inside a [`Registries`](crate::Registries) hub.
    pub struct RegistryId;
}

/// Opaque, self-validating resource identifier.
///
/// Layout: `[valid:1 | generation:31 | name hash:32]`. The all-zero value is
/// the canonical invalid id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResId(u64);

impl ResId {
    const VALID_BIT: u64 = 1 << 63;
    const GENERATION_SHIFT: u32 = 32;
    const GENERATION_MASK: u32 = 0x7fff_ffff;

    pub const INVALID: ResId = ResId(0);

    pub const fn make_invalid() -> Self {
        Self::INVALID
    }

    /// Valid id carrying `hash` and generation zero.
    pub const fn make(hash: u32) -> Self {
        ResId(Self::VALID_BIT | hash as u64)
    }

    /// Id for `name` at generation zero.
    pub fn from_name(name: &str) -> Self {
        Self::make(hash_name(name))
    }

    /// Same hash, different generation. Generations wrap at 31 bits.
    pub const fn with_generation(self, generation: u32) -> Self {
        let cleared = self.0 & !((Self::GENERATION_MASK as u64) << Self::GENERATION_SHIFT);
        ResId(
            cleared | (((generation & Self::GENERATION_MASK) as u64) << Self::GENERATION_SHIFT),
        )
    }

    pub const fn is_valid(self) -> bool {
        self.0 & Self::VALID_BIT != 0
    }

    pub const fn hash(self) -> u32 {
        self.0 as u32
    }

    pub const fn generation(self) -> u32 {
        ((self.0 >> Self::GENERATION_SHIFT) as u32) & Self::GENERATION_MASK
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }

    pub const fn from_bits(bits: u64) -> Self {
        ResId(bits)
    }
}

impl fmt::Debug for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "ResId({:08x}#{})", self.hash(), self.generation())
        } else {
            write!(f, "ResId(invalid)")
        }
    }
}

impl fmt::Display for ResId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Deterministic 32-bit name hash (FxHash folded down from 64 bits).
pub fn hash_name(name: &str) -> u32 {
    let mut hasher = FxHasher::default();
    hasher.write(name.as_bytes());
    let wide = hasher.finish();
    (wide ^ (wide >> 32)) as u32
}

/// Dependency-graph edge endpoint: a resource in some registry.
///
/// Weak: holding a handle keeps nothing alive. Resolve it by asking the
/// registry it names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResHandle {
    pub registry: RegistryId,
    pub id: ResId,
}

impl ResHandle {
    pub fn new(registry: RegistryId, id: ResId) -> Self {
        Self { registry, id }
    }
}

impl fmt::Display for ResHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {:?})", self.registry, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_is_zero() {
        let id = ResId::make_invalid();
        assert_eq!(id.to_bits(), 0);
        assert!(!id.is_valid());
    }

    #[test]
    fn test_make_sets_valid_bit_and_hash() {
        let id = ResId::make(0xdead_beef);
        assert!(id.is_valid());
        assert_eq!(id.hash(), 0xdead_beef);
        assert_eq!(id.generation(), 0);
        assert_eq!(id.to_bits(), (1 << 63) | 0xdead_beef);
    }

    #[test]
    fn test_zero_hash_is_still_valid() {
        assert!(ResId::make(0).is_valid());
        assert_ne!(ResId::make(0), ResId::INVALID);
    }

    #[test]
    fn test_generation_keeps_hash() {
        let base = ResId::from_name("a.txt");
        let next = base.with_generation(3);
        assert_eq!(next.hash(), base.hash());
        assert_eq!(next.generation(), 3);
        assert!(next.is_valid());
        assert_ne!(next, base);
        assert_eq!(next.with_generation(0), base);
    }

    #[test]
    fn test_name_hash_is_deterministic() {
        assert_eq!(hash_name("textures/grass.png"), hash_name("textures/grass.png"));
        assert_ne!(hash_name("a.txt"), hash_name("b.txt"));
    }
}
