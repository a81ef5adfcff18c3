use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Left/right-discriminated modifier mask.
///
/// Two instances live in the engine: the logical mask (what the OS
/// currently believes is held) and the physical mask (what the user is
/// actually holding). They diverge whenever events are suppressed or
/// synthesized, and both states are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModMask(pub u8);

impl ModMask {
    pub const NONE: ModMask = ModMask(0);
    pub const LSHIFT: ModMask = ModMask(0x01);
    pub const RSHIFT: ModMask = ModMask(0x02);
    pub const LCTRL: ModMask = ModMask(0x04);
    pub const RCTRL: ModMask = ModMask(0x08);
    pub const LALT: ModMask = ModMask(0x10);
    pub const RALT: ModMask = ModMask(0x20);
    pub const LWIN: ModMask = ModMask(0x40);
    pub const RWIN: ModMask = ModMask(0x80);

    pub const SHIFT: ModMask = ModMask(0x01 | 0x02);
    pub const CTRL: ModMask = ModMask(0x04 | 0x08);
    pub const ALT: ModMask = ModMask(0x10 | 0x20);
    pub const WIN: ModMask = ModMask(0x40 | 0x80);

    pub fn any(self) -> bool {
        self.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when at least one bit of `other` is set in `self`.
    pub fn intersects(self, other: ModMask) -> bool {
        self.0 & other.0 != 0
    }

    /// True when no bits outside `other` are set.
    pub fn is_subset_of(self, other: ModMask) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn set(&mut self, bit: ModMask, on: bool) {
        if on {
            self.0 |= bit.0;
        } else {
            self.0 &= !bit.0;
        }
    }
}

impl BitOr for ModMask {
    type Output = ModMask;
    fn bitor(self, rhs: ModMask) -> ModMask {
        ModMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModMask {
    fn bitor_assign(&mut self, rhs: ModMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ModMask {
    type Output = ModMask;
    fn bitand(self, rhs: ModMask) -> ModMask {
        ModMask(self.0 & rhs.0)
    }
}

impl Not for ModMask {
    type Output = ModMask;
    fn not(self) -> ModMask {
        ModMask(!self.0)
    }
}

/// Which hook class delivered the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Keyboard,
    Pointer,
}

/// Sentinel placed in the extra-info field of events the engine sends
/// through the OS, so it can recognize its own replays.
pub const EXTRA_INFO_IGNORE: usize = 0x4B41_4749;
/// Variant that skips modifier tracking as well; for events that must be
/// completely invisible to the engine.
pub const EXTRA_INFO_IGNORE_ALL: usize = 0x4B41_474A;

/// Interpretation of an event's extra-info field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtraInfo {
    /// Anything that is not one of our sentinels, including zero.
    #[default]
    Plain,
    /// Skip dispatch entirely.
    IgnoreAll,
    /// Skip dispatch but still run modifier tracking.
    IgnoreAsModifier,
}

impl ExtraInfo {
    pub fn from_raw(raw: usize) -> ExtraInfo {
        match raw {
            EXTRA_INFO_IGNORE => ExtraInfo::IgnoreAsModifier,
            EXTRA_INFO_IGNORE_ALL => ExtraInfo::IgnoreAll,
            _ => ExtraInfo::Plain,
        }
    }

    pub fn to_raw(self) -> usize {
        match self {
            ExtraInfo::Plain => 0,
            ExtraInfo::IgnoreAsModifier => EXTRA_INFO_IGNORE,
            ExtraInfo::IgnoreAll => EXTRA_INFO_IGNORE_ALL,
        }
    }

    pub fn is_ignored(self) -> bool {
        !matches!(self, ExtraInfo::Plain)
    }
}

/// What the hook procedure should do with the original event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the event to the next hook / the system.
    Pass,
    /// Swallow the event.
    Suppress,
}

impl Verdict {
    pub fn is_suppress(self) -> bool {
        matches!(self, Verdict::Suppress)
    }
}

/// Kind argument for a synthesized key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Down,
    Up,
    DownAndUp,
}

/// One synthesized key transition queued for the OS layer to inject.
/// `DownAndUp` requests are expanded into two of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub vk: u8,
    pub sc: u16,
    pub key_up: bool,
}

/// Notification that a user-defined hotkey fired. `dismiss_menus` is set
/// for pointer hotkeys whose native click was not suppressed, so the host
/// can close any menu the click itself opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredHotkey {
    pub id: u16,
    pub dismiss_menus: bool,
}

/// Forced state for a toggleable key (Num/Caps/Scroll-Lock). `Neutral`
/// leaves the key under user control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToggleValue {
    #[default]
    Neutral,
    AlwaysOn,
    AlwaysOff,
}

/// Index into the engine's toggle-state array. Handed out by the table
/// builder when a key is registered as force-toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleHandle(pub usize);

/// A key selected either by virtual key or by scan code. Scan-code
/// selection exists because some physically distinct keys share a VK
/// (e.g. Numpad7 vs Home) and can only be told apart by scan code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySel {
    Vk(u8),
    Sc(u16),
}

/// Raw keyboard event as the hook layer hands it to the engine.
#[derive(Debug, Clone, Copy)]
pub struct KeyboardInput {
    pub vk: u8,
    pub scan: u16,
    pub key_up: bool,
    pub injected: bool,
    pub extended: bool,
    pub extra: ExtraInfo,
    pub time_ms: u32,
}

impl KeyboardInput {
    pub fn down(vk: u8, scan: u16) -> Self {
        Self {
            vk,
            scan,
            key_up: false,
            injected: false,
            extended: false,
            extra: ExtraInfo::Plain,
            time_ms: 0,
        }
    }

    pub fn up(vk: u8, scan: u16) -> Self {
        Self {
            key_up: true,
            ..Self::down(vk, scan)
        }
    }

    pub fn at(mut self, time_ms: u32) -> Self {
        self.time_ms = time_ms;
        self
    }

    pub fn injected(mut self) -> Self {
        self.injected = true;
        self
    }

    pub fn extended(mut self) -> Self {
        self.extended = true;
        self
    }

    pub fn tagged(mut self, extra: ExtraInfo) -> Self {
        self.extra = extra;
        self.injected = true;
        self
    }
}

/// Pointing-device button as seen by the low-level mouse hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Left,
    Right,
    Middle,
    X1,
    X2,
}

/// What the pointing device did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    Button { button: PointerButton, key_up: bool },
    /// One notch; positive is away from the user.
    Wheel { delta: i16 },
    Motion,
}

/// Raw pointer event as the hook layer hands it to the engine.
#[derive(Debug, Clone, Copy)]
pub struct PointerInput {
    pub action: PointerAction,
    pub injected: bool,
    pub extra: ExtraInfo,
    pub time_ms: u32,
}

impl PointerInput {
    pub fn button_down(button: PointerButton) -> Self {
        Self {
            action: PointerAction::Button {
                button,
                key_up: false,
            },
            injected: false,
            extra: ExtraInfo::Plain,
            time_ms: 0,
        }
    }

    pub fn button_up(button: PointerButton) -> Self {
        Self {
            action: PointerAction::Button {
                button,
                key_up: true,
            },
            ..Self::button_down(button)
        }
    }

    pub fn wheel(delta: i16) -> Self {
        Self {
            action: PointerAction::Wheel { delta },
            ..Self::button_down(PointerButton::Left)
        }
    }

    pub fn motion() -> Self {
        Self {
            action: PointerAction::Motion,
            ..Self::button_down(PointerButton::Left)
        }
    }

    pub fn at(mut self, time_ms: u32) -> Self {
        self.time_ms = time_ms;
        self
    }

    pub fn injected(mut self) -> Self {
        self.injected = true;
        self
    }
}
