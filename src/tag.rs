//! Tag descriptors and the reserved system namespace.
//!
//! A [`Tag`] holds no value; it declares the name, type and policy of a
//! cell whose value lives in the current [`crate::state::State`]. The
//! engine resolves both declared tags and lazily-addressed block slots
//! into a [`TagMeta`] runtime descriptor before touching the state maps.

use crate::value::{TagType, Value};

/// Stable handle into the program's tag arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagId(pub(crate) u32);

/// Physical role of a tag, consumed by the read-inputs and write-outputs
/// scan phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagKind {
    /// Plain memory cell.
    #[default]
    Internal,
    /// Physical input, refreshed in the read-inputs phase.
    Input,
    /// Physical output, pushed in the write-outputs phase.
    Output,
}

/// Declaration of a named, typed cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Unique tag name.
    pub name: String,
    /// Storage type.
    pub ty: TagType,
    /// Physical role.
    pub kind: TagKind,
    /// Survives a STOP to RUN transition.
    pub retentive: bool,
    /// Override of the type default.
    pub default: Option<Value>,
}

impl Tag {
    /// Declare an internal, non-retentive tag with the type default.
    pub fn new(name: impl Into<String>, ty: TagType) -> Self {
        Tag {
            name: name.into(),
            ty,
            kind: TagKind::Internal,
            retentive: false,
            default: None,
        }
    }

    /// Mark as a physical input.
    pub fn input(mut self) -> Self {
        self.kind = TagKind::Input;
        self
    }

    /// Mark as a physical output.
    pub fn output(mut self) -> Self {
        self.kind = TagKind::Output;
        self
    }

    /// Mark as retentive.
    pub fn retentive(mut self) -> Self {
        self.retentive = true;
        self
    }

    /// Set a per-tag default value. The value must match the tag type.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Effective default for a fresh or reset cell.
    pub fn default_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.ty.default_value())
    }

    pub(crate) fn meta(&self) -> TagMeta {
        TagMeta {
            name: self.name.clone(),
            ty: self.ty,
            kind: self.kind,
            retentive: self.retentive,
            default: self.default_value(),
            read_only: false,
        }
    }
}

/// Runtime descriptor of a resolved cell: a declared tag, a block slot or
/// a system tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagMeta {
    /// Resolved cell name as it appears in the state maps.
    pub name: String,
    /// Storage type.
    pub ty: TagType,
    /// Physical role.
    pub kind: TagKind,
    /// Survives a STOP to RUN transition.
    pub retentive: bool,
    /// Effective default value.
    pub default: Value,
    /// Rejects API writes (forces, patches). System tags only.
    pub read_only: bool,
}

/// Reserved system tag namespace.
///
/// Everything under the `sys.` prefix is owned by the engine, readable
/// like any tag and rejected for writes with
/// [`crate::error::ApiError::ReadOnlyTag`]. The division, range and
/// address flags auto-clear at scan start; the math fault flag latches.
pub mod sys {
    use super::{TagKind, TagMeta};
    use crate::value::TagType;

    /// Reserved namespace prefix.
    pub const PREFIX: &str = "sys.";

    /// Scan counter, incremented at scan start (DINT, wraps).
    pub const SCAN_COUNT: &str = "sys.scan_count";
    /// Set during the very first scan after a RUN transition.
    pub const FIRST_SCAN: &str = "sys.first_scan";
    /// Always true while in RUN.
    pub const ALWAYS_ON: &str = "sys.always_on";
    /// Always false.
    pub const ALWAYS_OFF: &str = "sys.always_off";
    /// Last scan duration in milliseconds (REAL).
    pub const SCAN_TIME: &str = "sys.scan_time";
    /// Minimum scan duration seen this session (REAL, ms).
    pub const SCAN_TIME_MIN: &str = "sys.scan_time_min";
    /// Maximum scan duration seen this session (REAL, ms).
    pub const SCAN_TIME_MAX: &str = "sys.scan_time_max";
    /// RTC civil year (INT).
    pub const RTC_YEAR: &str = "sys.rtc_year";
    /// RTC civil month 1-12 (INT).
    pub const RTC_MONTH: &str = "sys.rtc_month";
    /// RTC civil day 1-31 (INT).
    pub const RTC_DAY: &str = "sys.rtc_day";
    /// RTC hour 0-23 (INT).
    pub const RTC_HOUR: &str = "sys.rtc_hour";
    /// RTC minute 0-59 (INT).
    pub const RTC_MINUTE: &str = "sys.rtc_minute";
    /// RTC second 0-59 (INT).
    pub const RTC_SECOND: &str = "sys.rtc_second";
    /// Division-by-zero flag, auto-cleared at scan start.
    pub const ERR_DIV: &str = "sys.err_div";
    /// Out-of-range flag, auto-cleared at scan start.
    pub const ERR_RANGE: &str = "sys.err_range";
    /// Indirect address flag, auto-cleared at scan start.
    pub const ERR_ADDRESS: &str = "sys.err_address";
    /// Fatal math operation flag, latching until reset.
    pub const ERR_MATH: &str = "sys.err_math";

    /// All reserved names with their types.
    pub const ALL: &[(&str, TagType)] = &[
        (SCAN_COUNT, TagType::Dint),
        (FIRST_SCAN, TagType::Bool),
        (ALWAYS_ON, TagType::Bool),
        (ALWAYS_OFF, TagType::Bool),
        (SCAN_TIME, TagType::Real),
        (SCAN_TIME_MIN, TagType::Real),
        (SCAN_TIME_MAX, TagType::Real),
        (RTC_YEAR, TagType::Int),
        (RTC_MONTH, TagType::Int),
        (RTC_DAY, TagType::Int),
        (RTC_HOUR, TagType::Int),
        (RTC_MINUTE, TagType::Int),
        (RTC_SECOND, TagType::Int),
        (ERR_DIV, TagType::Bool),
        (ERR_RANGE, TagType::Bool),
        (ERR_ADDRESS, TagType::Bool),
        (ERR_MATH, TagType::Bool),
    ];

    /// True for any name under the reserved prefix.
    pub fn is_reserved(name: &str) -> bool {
        name.starts_with(PREFIX)
    }

    /// Descriptor for a reserved name, if it is a known system tag.
    pub fn meta(name: &str) -> Option<TagMeta> {
        let (name, ty) = ALL.iter().find(|(n, _)| *n == name)?;
        Some(TagMeta {
            name: (*name).to_owned(),
            ty: *ty,
            kind: TagKind::Internal,
            retentive: false,
            default: ty.default_value(),
            read_only: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_defaults_fall_back_to_type_default() {
        let t = Tag::new("Motor", TagType::Bool);
        assert_eq!(t.default_value(), Value::Bool(false));

        let t = Tag::new("Preset", TagType::Dint).with_default(Value::Dint(50));
        assert_eq!(t.default_value(), Value::Dint(50));
    }

    #[test]
    fn system_names_resolve_read_only() {
        assert!(sys::is_reserved("sys.scan_count"));
        assert!(!sys::is_reserved("scan_count"));

        let meta = sys::meta(sys::ERR_DIV).unwrap();
        assert!(meta.read_only);
        assert_eq!(meta.ty, TagType::Bool);
        assert!(sys::meta("sys.unknown").is_none());
    }
}
