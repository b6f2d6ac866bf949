//! 1-indexed tag arrays with sparse valid ranges and per-slot policy.
//!
//! A [`Block`] is a named, typed address space. Slots materialize into
//! tags lazily: indexing a slot at program-build time freezes its policy,
//! and reconfiguring a frozen slot is an error. Sparse blocks restrict
//! indexing and iteration to their valid ranges; window iteration skips
//! the gaps.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::BuildError;
use crate::tag::{TagKind, TagMeta};
use crate::value::{TagType, Value};

/// Stable handle into the program's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockId(pub(crate) u32);

/// Block-wide default override. Plain function pointers keep blocks
/// cloneable and debuggable.
pub type DefaultFactory = fn(i32) -> Value;

/// Controls how slot addresses render into tag names.
///
/// `width` zero-pads the address (`X001`); zero width renders plain
/// (`X1`). The prefix defaults to the block name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressStyle {
    /// Name prefix override; the block name when `None`.
    pub prefix: Option<String>,
    /// Zero-pad width; 0 renders the bare address.
    pub width: u8,
}

/// Per-slot policy overrides, applied before block-wide fallbacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotConfig {
    /// Rename the materialized tag.
    pub name: Option<String>,
    /// Retention override.
    pub retentive: Option<bool>,
    /// Default value override.
    pub default: Option<Value>,
}

/// A named, typed, 1-indexed array of lazily materialized tags.
#[derive(Debug, Clone)]
pub struct Block {
    name: String,
    ty: TagType,
    kind: TagKind,
    start: i32,
    end: i32,
    valid_ranges: Option<Vec<(i32, i32)>>,
    style: AddressStyle,
    retentive: bool,
    default_factory: Option<DefaultFactory>,
    slots: BTreeMap<i32, SlotConfig>,
    materialized: BTreeSet<i32>,
}

impl Block {
    /// Declare a block covering `start..=end`.
    pub fn new(
        name: impl Into<String>,
        ty: TagType,
        start: i32,
        end: i32,
    ) -> Result<Self, BuildError> {
        let name = name.into();
        if start > end || start < 1 {
            return Err(BuildError::InvalidBounds { block: name, start, end });
        }
        Ok(Block {
            name,
            ty,
            kind: TagKind::Internal,
            start,
            end,
            valid_ranges: None,
            style: AddressStyle::default(),
            retentive: false,
            default_factory: None,
            slots: BTreeMap::new(),
            materialized: BTreeSet::new(),
        })
    }

    /// Restrict the block to a sparse set of inclusive address ranges.
    pub fn with_valid_ranges(mut self, ranges: Vec<(i32, i32)>) -> Result<Self, BuildError> {
        let mut ranges = ranges;
        ranges.sort_unstable();
        for &(lo, hi) in &ranges {
            if lo > hi || lo < self.start || hi > self.end {
                return Err(BuildError::InvalidBounds {
                    block: self.name.clone(),
                    start: lo,
                    end: hi,
                });
            }
        }
        self.valid_ranges = Some(ranges);
        Ok(self)
    }

    /// Set the address-to-name rendering style.
    pub fn with_style(mut self, style: AddressStyle) -> Self {
        self.style = style;
        self
    }

    /// Mark every slot retentive unless a slot override says otherwise.
    pub fn retentive(mut self) -> Self {
        self.retentive = true;
        self
    }

    /// Per-address default fallback, consulted after slot overrides.
    pub fn with_default_factory(mut self, factory: DefaultFactory) -> Self {
        self.default_factory = Some(factory);
        self
    }

    /// Mark every slot as a physical input.
    pub fn input(mut self) -> Self {
        self.kind = TagKind::Input;
        self
    }

    /// Mark every slot as a physical output.
    pub fn output(mut self) -> Self {
        self.kind = TagKind::Output;
        self
    }

    /// Block name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element type.
    pub const fn ty(&self) -> TagType {
        self.ty
    }

    /// Physical role of the block's slots.
    pub const fn kind(&self) -> TagKind {
        self.kind
    }

    /// First declared address.
    pub const fn start(&self) -> i32 {
        self.start
    }

    /// Last declared address, inclusive.
    pub const fn end(&self) -> i32 {
        self.end
    }

    /// True when `addr` is inside the declared bounds and, for sparse
    /// blocks, inside a valid range.
    pub fn contains(&self, addr: i32) -> bool {
        if addr < self.start || addr > self.end {
            return false;
        }
        match &self.valid_ranges {
            Some(ranges) => ranges.iter().any(|&(lo, hi)| addr >= lo && addr <= hi),
            None => true,
        }
    }

    /// Override slot policy. Fails once the slot has materialized.
    pub fn configure_slot(&mut self, addr: i32, config: SlotConfig) -> Result<(), BuildError> {
        if !self.contains(addr) {
            return Err(BuildError::AddressOutOfRange {
                block: self.name.clone(),
                addr,
            });
        }
        if self.materialized.contains(&addr) {
            return Err(BuildError::SlotAlreadyMaterialized {
                block: self.name.clone(),
                addr,
            });
        }
        self.slots.insert(addr, config);
        Ok(())
    }

    /// Index a slot at build time, freezing its policy.
    pub fn tag(&mut self, addr: i32) -> Result<TagMeta, BuildError> {
        let meta = self.slot(addr)?;
        self.materialized.insert(addr);
        Ok(meta)
    }

    /// Resolve a slot's effective descriptor without materializing it.
    pub fn slot(&self, addr: i32) -> Result<TagMeta, BuildError> {
        if !self.contains(addr) {
            return Err(BuildError::AddressOutOfRange {
                block: self.name.clone(),
                addr,
            });
        }
        let config = self.slots.get(&addr);
        let name = config
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| self.format_addr(addr));
        let retentive = config
            .and_then(|c| c.retentive)
            .unwrap_or(self.retentive);
        let default = config
            .and_then(|c| c.default.clone())
            .or_else(|| self.default_factory.map(|f| f(addr)))
            .unwrap_or_else(|| self.ty.default_value());
        Ok(TagMeta {
            name,
            ty: self.ty,
            kind: self.kind,
            retentive,
            default,
            read_only: false,
        })
    }

    /// Render an address into its tag name.
    pub fn format_addr(&self, addr: i32) -> String {
        let prefix = self.style.prefix.as_deref().unwrap_or(&self.name);
        if self.style.width > 0 {
            format!("{prefix}{addr:0width$}", width = self.style.width as usize)
        } else {
            format!("{prefix}{addr}")
        }
    }

    /// Reverse of [`Self::format_addr`], including slot renames. Used to
    /// recover retention policy from a state map key.
    pub fn parse_name(&self, name: &str) -> Option<i32> {
        if let Some((&addr, _)) = self
            .slots
            .iter()
            .find(|(_, c)| c.name.as_deref() == Some(name))
        {
            return Some(addr);
        }
        let prefix = self.style.prefix.as_deref().unwrap_or(&self.name);
        let digits = name.strip_prefix(prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let addr: i32 = digits.parse().ok()?;
        // A renamed slot no longer answers to its formatted name.
        if self
            .slots
            .get(&addr)
            .is_some_and(|c| c.name.is_some())
        {
            return None;
        }
        self.contains(addr).then_some(addr)
    }

    /// Ascending valid addresses of `lo..=hi`, skipping sparse gaps.
    pub fn iter_span(&self, lo: i32, hi: i32) -> impl Iterator<Item = i32> + '_ {
        (lo..=hi).filter(|&a| self.contains(a))
    }

    /// Count of valid addresses in `lo..=hi`.
    pub fn span_len(&self, lo: i32, hi: i32) -> usize {
        self.iter_span(lo, hi).count()
    }

    /// Collected ascending valid addresses of `lo..=hi`.
    pub fn span_addresses(&self, lo: i32, hi: i32) -> Vec<i32> {
        self.iter_span(lo, hi).collect()
    }
}
