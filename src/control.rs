use serde::{Deserialize, Serialize};

use crate::engine::RawControl;

/// Control value type, as reported by the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlType {
    Invalid,
    Integer,
    Boolean,
    Menu,
    Integer64,
    Class,
    String,
    Bitmask,
    IntegerMenu,
}

impl ControlType {
    /// Map the engine's numeric type code. Codes outside the known range
    /// come back as `Invalid`.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Integer,
            2 => Self::Boolean,
            3 => Self::Menu,
            4 => Self::Integer64,
            5 => Self::Class,
            6 => Self::String,
            7 => Self::Bitmask,
            8 => Self::IntegerMenu,
            _ => Self::Invalid,
        }
    }

    /// Display label for the type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Integer => "int",
            Self::Boolean => "bool",
            Self::Menu => "menu",
            Self::Integer64 => "int64",
            Self::Class => "class",
            Self::String => "string",
            Self::Bitmask => "bitmask",
            Self::IntegerMenu => "int_menu",
        }
    }
}

impl std::fmt::Display for ControlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Device-reported control flags. Independent booleans; the bit layout of
/// the raw word follows V4L2's `V4L2_CTRL_FLAG_*` constants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub disabled: bool,
    pub grabbed: bool,
    pub read_only: bool,
    pub update: bool,
    pub inactive: bool,
    pub slider: bool,
    pub write_only: bool,
    pub volatile: bool,
}

impl ControlFlags {
    /// Decode the raw flag word.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            disabled: bits & 0x0001 != 0,
            grabbed: bits & 0x0002 != 0,
            read_only: bits & 0x0004 != 0,
            update: bits & 0x0008 != 0,
            inactive: bits & 0x0010 != 0,
            slider: bits & 0x0020 != 0,
            write_only: bits & 0x0040 != 0,
            volatile: bits & 0x0080 != 0,
        }
    }
}

/// One entry of a menu-type control's value list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MenuItem {
    /// `Menu` controls enumerate display labels.
    Label(String),
    /// `IntegerMenu` controls enumerate integer values.
    Value(i64),
}

/// A device control, snapshotted at open time.
///
/// `min`/`max`/`step`/`default` are meaningful for integer-like types and
/// carried verbatim from the device for the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Stable numeric identifier used for get/set.
    pub id: u32,
    /// Device-reported display name.
    pub name: String,
    /// Value type.
    pub typ: ControlType,
    pub min: i64,
    pub max: i64,
    pub step: i64,
    pub default: i64,
    pub flags: ControlFlags,
    /// Menu entries: labels for `Menu`, integers for `IntegerMenu`,
    /// empty for every other type.
    pub menu: Vec<MenuItem>,
}

impl Control {
    /// Translate a raw engine descriptor into the public record.
    #[must_use]
    pub fn from_raw(raw: &RawControl) -> Self {
        let typ = ControlType::from_code(raw.type_code);
        let menu = match typ {
            ControlType::Menu => raw
                .menu
                .iter()
                .map(|item| MenuItem::Label(item.label.clone()))
                .collect(),
            ControlType::IntegerMenu => raw
                .menu
                .iter()
                .map(|item| MenuItem::Value(item.value))
                .collect(),
            _ => Vec::new(),
        };

        Self {
            id: raw.id,
            name: raw.name.clone(),
            typ,
            min: raw.min,
            max: raw.max,
            step: raw.step,
            default: raw.default,
            flags: ControlFlags::from_bits(raw.flags),
            menu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawMenuItem;

    fn raw_control(type_code: u32) -> RawControl {
        RawControl {
            id: 0x0098_0900,
            name: "Brightness".to_string(),
            type_code,
            min: -64,
            max: 64,
            step: 1,
            default: 0,
            flags: 0,
            menu: Vec::new(),
        }
    }

    #[test]
    fn test_type_codes_map_exhaustively() {
        let expected = [
            (0, ControlType::Invalid),
            (1, ControlType::Integer),
            (2, ControlType::Boolean),
            (3, ControlType::Menu),
            (4, ControlType::Integer64),
            (5, ControlType::Class),
            (6, ControlType::String),
            (7, ControlType::Bitmask),
            (8, ControlType::IntegerMenu),
        ];
        for (code, typ) in expected {
            assert_eq!(ControlType::from_code(code), typ);
        }
        // Out-of-range codes do not shift into neighboring entries
        assert_eq!(ControlType::from_code(9), ControlType::Invalid);
        assert_eq!(ControlType::from_code(u32::MAX), ControlType::Invalid);
    }

    #[test]
    fn test_type_names_are_distinct() {
        assert_eq!(ControlType::Class.name(), "class");
        assert_eq!(ControlType::String.name(), "string");
        assert_eq!(ControlType::Bitmask.name(), "bitmask");
        assert_eq!(ControlType::IntegerMenu.name(), "int_menu");
    }

    #[test]
    fn test_flag_decoding() {
        let flags = ControlFlags::from_bits(0x0004 | 0x0020 | 0x0080);
        assert!(flags.read_only);
        assert!(flags.slider);
        assert!(flags.volatile);
        assert!(!flags.disabled);
        assert!(!flags.write_only);
    }

    #[test]
    fn test_menu_control_takes_labels() {
        let mut raw = raw_control(3);
        raw.menu = vec![
            RawMenuItem {
                index: 0,
                label: "Disabled".to_string(),
                value: 0,
            },
            RawMenuItem {
                index: 1,
                label: "50 Hz".to_string(),
                value: 1,
            },
        ];
        let control = Control::from_raw(&raw);
        assert_eq!(control.typ, ControlType::Menu);
        assert_eq!(
            control.menu,
            vec![
                MenuItem::Label("Disabled".to_string()),
                MenuItem::Label("50 Hz".to_string()),
            ]
        );
    }

    #[test]
    fn test_integer_menu_control_takes_values() {
        let mut raw = raw_control(8);
        raw.menu = vec![
            RawMenuItem {
                index: 0,
                label: String::new(),
                value: 30,
            },
            RawMenuItem {
                index: 1,
                label: String::new(),
                value: 60,
            },
        ];
        let control = Control::from_raw(&raw);
        assert_eq!(control.typ, ControlType::IntegerMenu);
        assert_eq!(
            control.menu,
            vec![MenuItem::Value(30), MenuItem::Value(60)]
        );
    }

    #[test]
    fn test_non_menu_control_has_empty_menu() {
        let mut raw = raw_control(1);
        // A stray menu on a non-menu control is not carried over
        raw.menu = vec![RawMenuItem {
            index: 0,
            label: "ignored".to_string(),
            value: 0,
        }];
        let control = Control::from_raw(&raw);
        assert!(control.menu.is_empty());
        assert_eq!(control.min, -64);
        assert_eq!(control.max, 64);
    }
}
