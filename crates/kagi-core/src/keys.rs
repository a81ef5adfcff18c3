//! Virtual-key and scan-code knowledge: constants, the VK→SC fallback
//! used when a foreign injector sends a zero scan code, the dual-state
//! numpad key set, and the routing table that replaces a per-key modifier
//! switch with data.

use crate::types::ModMask;

pub const VK_LBUTTON: u8 = 0x01;
pub const VK_RBUTTON: u8 = 0x02;
pub const VK_MBUTTON: u8 = 0x04;
pub const VK_XBUTTON1: u8 = 0x05;
pub const VK_XBUTTON2: u8 = 0x06;
pub const VK_TAB: u8 = 0x09;
pub const VK_CLEAR: u8 = 0x0C;
pub const VK_RETURN: u8 = 0x0D;
pub const VK_SHIFT: u8 = 0x10;
pub const VK_CONTROL: u8 = 0x11;
pub const VK_MENU: u8 = 0x12;
pub const VK_PAUSE: u8 = 0x13;
pub const VK_CAPITAL: u8 = 0x14;
pub const VK_ESCAPE: u8 = 0x1B;
pub const VK_SPACE: u8 = 0x20;
pub const VK_PRIOR: u8 = 0x21;
pub const VK_NEXT: u8 = 0x22;
pub const VK_END: u8 = 0x23;
pub const VK_HOME: u8 = 0x24;
pub const VK_LEFT: u8 = 0x25;
pub const VK_UP: u8 = 0x26;
pub const VK_RIGHT: u8 = 0x27;
pub const VK_DOWN: u8 = 0x28;
pub const VK_INSERT: u8 = 0x2D;
pub const VK_DELETE: u8 = 0x2E;
pub const VK_LWIN: u8 = 0x5B;
pub const VK_RWIN: u8 = 0x5C;
pub const VK_APPS: u8 = 0x5D;
pub const VK_NUMPAD0: u8 = 0x60;
pub const VK_NUMPAD9: u8 = 0x69;
pub const VK_DECIMAL: u8 = 0x6E;
pub const VK_NUMLOCK: u8 = 0x90;
pub const VK_SCROLL: u8 = 0x91;
pub const VK_LSHIFT: u8 = 0xA0;
pub const VK_RSHIFT: u8 = 0xA1;
pub const VK_LCONTROL: u8 = 0xA2;
pub const VK_RCONTROL: u8 = 0xA3;
pub const VK_LMENU: u8 = 0xA4;
pub const VK_RMENU: u8 = 0xA5;

/// Pseudo virtual keys for wheel notches; chosen from an unassigned
/// range so they can index the same per-VK tables as real keys.
pub const VK_WHEEL_DOWN: u8 = 0x9E;
pub const VK_WHEEL_UP: u8 = 0x9F;

pub const SC_LSHIFT: u16 = 0x02A;
pub const SC_RSHIFT: u16 = 0x036;
pub const SC_LCONTROL: u16 = 0x01D;
pub const SC_RCONTROL: u16 = 0x11D;
pub const SC_LALT: u16 = 0x038;
pub const SC_RALT: u16 = 0x138;
pub const SC_NUMLOCK: u16 = 0x145;
pub const SC_TAB: u16 = 0x00F;
pub const SC_CAPSLOCK: u16 = 0x03A;
pub const SC_SCROLLLOCK: u16 = 0x046;

/// Scan-code fill-in for events that arrive with `scan == 0` and for
/// engine emissions addressed by VK only. Covers the keys the engine
/// itself synthesizes plus the common alphanumeric block; anything else
/// stays zero, which downstream code treats as "no scan code known".
pub fn fallback_scan(vk: u8) -> u16 {
    match vk {
        VK_LSHIFT | VK_SHIFT => SC_LSHIFT,
        VK_RSHIFT => SC_RSHIFT,
        VK_LCONTROL | VK_CONTROL => SC_LCONTROL,
        VK_RCONTROL => SC_RCONTROL,
        VK_LMENU | VK_MENU => SC_LALT,
        VK_RMENU => SC_RALT,
        VK_LWIN => 0x15B,
        VK_RWIN => 0x15C,
        VK_APPS => 0x15D,
        VK_TAB => SC_TAB,
        VK_RETURN => 0x01C,
        VK_ESCAPE => 0x001,
        VK_SPACE => 0x039,
        VK_CAPITAL => SC_CAPSLOCK,
        VK_NUMLOCK => SC_NUMLOCK,
        VK_SCROLL => SC_SCROLLLOCK,
        VK_PAUSE => 0x045,
        // Dual-state numpad block, non-extended: the numlock-off VKs and
        // the numlock-on VKs share these scan codes.
        VK_INSERT | VK_NUMPAD0 => 0x052,
        VK_END => 0x04F,
        VK_DOWN => 0x050,
        VK_NEXT => 0x051,
        VK_LEFT => 0x04B,
        VK_CLEAR => 0x04C,
        VK_RIGHT => 0x04D,
        VK_HOME => 0x047,
        VK_UP => 0x048,
        VK_PRIOR => 0x049,
        VK_DELETE | VK_DECIMAL => 0x053,
        0x61..=0x69 => [0x04F, 0x050, 0x051, 0x04B, 0x04C, 0x04D, 0x047, 0x048, 0x049]
            [(vk - 0x61) as usize],
        b'0' => 0x00B,
        b'1'..=b'9' => 0x002 + (vk - b'1') as u16,
        b'A'..=b'Z' => {
            const LETTERS: [u16; 26] = [
                0x01E, 0x030, 0x02E, 0x020, 0x012, 0x021, 0x022, 0x023, 0x017, 0x024, 0x025,
                0x026, 0x032, 0x031, 0x018, 0x019, 0x010, 0x013, 0x01F, 0x014, 0x016, 0x02F,
                0x011, 0x02D, 0x015, 0x02C,
            ];
            LETTERS[(vk - b'A') as usize]
        }
        _ => 0,
    }
}

/// Number of dual-state numpad keys tracked by the in-progress set.
pub const PAD_COUNT: usize = 11;

/// Slot in the numpad-in-progress set for `vk`, accepting both the
/// numlock-off navigation VK and the numlock-on digit VK of each key.
pub fn pad_index(vk: u8) -> Option<usize> {
    match vk {
        VK_DELETE | VK_DECIMAL => Some(0),
        VK_INSERT | VK_NUMPAD0 => Some(1),
        VK_END | 0x61 => Some(2),
        VK_DOWN | 0x62 => Some(3),
        VK_NEXT | 0x63 => Some(4),
        VK_LEFT | 0x64 => Some(5),
        VK_CLEAR | 0x65 => Some(6),
        VK_RIGHT | 0x66 => Some(7),
        VK_HOME | 0x67 => Some(8),
        VK_UP | 0x68 => Some(9),
        VK_PRIOR | 0x69 => Some(10),
        _ => None,
    }
}

/// A dual-state numpad key being *modified* by the shift key, i.e. one
/// whose VK flips with numlock. An extended scan code means the separate
/// navigation key elsewhere on the board, which does not qualify.
/// VK_DECIMAL and the digit VKs are deliberately excluded: callers want
/// the numlock-ON keys seen through their navigation VKs.
pub fn is_dual_state_numpad(vk: u8, sc: u16) -> bool {
    if sc & 0x100 != 0 {
        return false;
    }
    matches!(
        vk,
        VK_DELETE
            | VK_INSERT
            | VK_END
            | VK_DOWN
            | VK_NEXT
            | VK_LEFT
            | VK_CLEAR
            | VK_RIGHT
            | VK_HOME
            | VK_UP
            | VK_PRIOR
    )
}

/// Dual-state numpad key as seen with numlock active (digit/decimal VKs);
/// used when deciding whether to lift shift between alt-tab steps.
pub fn is_numpad_digit(vk: u8) -> bool {
    (VK_NUMPAD0..=VK_NUMPAD9).contains(&vk) || vk == VK_DECIMAL
}

pub fn is_shift_vk(vk: u8) -> bool {
    matches!(vk, VK_SHIFT | VK_LSHIFT | VK_RSHIFT)
}

pub fn is_control_vk(vk: u8) -> bool {
    matches!(vk, VK_CONTROL | VK_LCONTROL | VK_RCONTROL)
}

pub fn is_alt_vk(vk: u8) -> bool {
    matches!(vk, VK_MENU | VK_LMENU | VK_RMENU)
}

/// Neutral VK plus its two sides, for recomputing the derived neutral
/// entry of the physical key table.
#[derive(Debug, Clone, Copy)]
pub struct NeutralPair {
    pub neutral_vk: u8,
    pub left_vk: u8,
    pub right_vk: u8,
}

/// Where a modifier event lands: which mask bit, which per-key physical
/// entry, and which neutral entry to recompute afterwards.
#[derive(Debug, Clone, Copy)]
pub struct ModRoute {
    pub bit: ModMask,
    pub side_vk: u8,
    pub neutral: Option<NeutralPair>,
}

const SHIFT_PAIR: NeutralPair = NeutralPair {
    neutral_vk: VK_SHIFT,
    left_vk: VK_LSHIFT,
    right_vk: VK_RSHIFT,
};
const CTRL_PAIR: NeutralPair = NeutralPair {
    neutral_vk: VK_CONTROL,
    left_vk: VK_LCONTROL,
    right_vk: VK_RCONTROL,
};
const ALT_PAIR: NeutralPair = NeutralPair {
    neutral_vk: VK_MENU,
    left_vk: VK_LMENU,
    right_vk: VK_RMENU,
};

const fn route(bit: ModMask, side_vk: u8, neutral: Option<NeutralPair>) -> ModRoute {
    ModRoute {
        bit,
        side_vk,
        neutral,
    }
}

/// Resolve a modifier event to its routing entry. Side-specific VKs are
/// the normal case under a low-level hook; the neutral VKs only arrive
/// from injectors, and are routed by scan code with the left side as the
/// fallback (one of the two has to be picked).
pub fn modifier_route(vk: u8, sc: u16) -> Option<ModRoute> {
    let r = match vk {
        VK_LSHIFT => route(ModMask::LSHIFT, VK_LSHIFT, Some(SHIFT_PAIR)),
        VK_RSHIFT => route(ModMask::RSHIFT, VK_RSHIFT, Some(SHIFT_PAIR)),
        VK_LCONTROL => route(ModMask::LCTRL, VK_LCONTROL, Some(CTRL_PAIR)),
        VK_RCONTROL => route(ModMask::RCTRL, VK_RCONTROL, Some(CTRL_PAIR)),
        VK_LMENU => route(ModMask::LALT, VK_LMENU, Some(ALT_PAIR)),
        VK_RMENU => route(ModMask::RALT, VK_RMENU, Some(ALT_PAIR)),
        VK_LWIN => route(ModMask::LWIN, VK_LWIN, None),
        VK_RWIN => route(ModMask::RWIN, VK_RWIN, None),
        VK_SHIFT => {
            if sc == SC_RSHIFT {
                route(ModMask::RSHIFT, VK_RSHIFT, Some(SHIFT_PAIR))
            } else {
                route(ModMask::LSHIFT, VK_LSHIFT, Some(SHIFT_PAIR))
            }
        }
        VK_CONTROL => {
            if sc == SC_RCONTROL {
                route(ModMask::RCTRL, VK_RCONTROL, Some(CTRL_PAIR))
            } else {
                route(ModMask::LCTRL, VK_LCONTROL, Some(CTRL_PAIR))
            }
        }
        VK_MENU => {
            if sc == SC_RALT {
                route(ModMask::RALT, VK_RMENU, Some(ALT_PAIR))
            } else {
                route(ModMask::LALT, VK_LMENU, Some(ALT_PAIR))
            }
        }
        _ => return None,
    };
    Some(r)
}
