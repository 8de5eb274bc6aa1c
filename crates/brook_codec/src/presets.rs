//! Built-in Compression Presets

/// Named compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub name: &'static str,
    pub level: i32,
}

/// Level used when the caller asks for nothing in particular
pub const PRESET_DEFAULT: Preset = Preset {
    name: "default",
    level: 3,
};

/// List of built-in presets
pub const PRESETS: &[Preset] = &[
    Preset { name: "fastest", level: 1 },
    PRESET_DEFAULT,
    Preset { name: "balanced", level: 9 },
    Preset { name: "best", level: 19 },
];

/// Look up a preset by name (case-insensitive)
pub fn preset(name: &str) -> Option<Preset> {
    PRESETS
        .iter()
        .copied()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}
