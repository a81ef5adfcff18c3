//! Hotkey lookup tables. The host's script compiler drives the builder;
//! the engine only ever reads the result. Per-key records are kept in
//! plain arrays indexed by VK and by scan code, with two mask-indexed id
//! tables for ordinarily-modified hotkeys.

use crate::keys::{
    VK_CONTROL, VK_LCONTROL, VK_LMENU, VK_LSHIFT, VK_LWIN, VK_MENU, VK_RCONTROL, VK_RMENU,
    VK_RSHIFT, VK_RWIN, VK_SHIFT,
};
use crate::types::{KeySel, ModMask, ToggleHandle, ToggleValue};
use serde::{Deserialize, Serialize};

/// Ids are packed with a high-bit flag for storage in the mask tables;
/// decode to [`HotkeyMatch`] at the boundary.
pub const RAW_NO_SUPPRESS: u16 = 0x8000;
pub const RAW_ID_MASK: u16 = 0x7FFF;
pub const RAW_INVALID: u16 = RAW_ID_MASK;

/// Built-in ids handled inline by the engine instead of being posted to
/// the host.
pub const HOTKEY_ID_ALT_TAB: u16 = 0x7FFE;
pub const HOTKEY_ID_ALT_TAB_SHIFT: u16 = 0x7FFD;
pub const HOTKEY_ID_ALT_TAB_MENU: u16 = 0x7FFC;
pub const HOTKEY_ID_ALT_TAB_AND_MENU: u16 = 0x7FFB;
pub const HOTKEY_ID_ALT_TAB_MENU_DISMISS: u16 = 0x7FFA;

/// Highest id available to user-defined hotkeys.
pub const HOTKEY_ID_USER_MAX: u16 = 0x7FF9;

pub fn is_alt_tab_id(id: u16) -> bool {
    (HOTKEY_ID_ALT_TAB_MENU_DISMISS..=HOTKEY_ID_ALT_TAB).contains(&id)
}

/// Unpacked lookup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyMatch {
    pub id: u16,
    pub no_suppress: bool,
}

impl HotkeyMatch {
    pub fn decode(raw: u16) -> Option<HotkeyMatch> {
        let id = raw & RAW_ID_MASK;
        if id == RAW_INVALID {
            return None;
        }
        Some(HotkeyMatch {
            id,
            no_suppress: raw & RAW_NO_SUPPRESS != 0,
        })
    }

    pub fn encode(id: u16, no_suppress: bool) -> u16 {
        debug_assert!(id <= RAW_ID_MASK);
        id | if no_suppress { RAW_NO_SUPPRESS } else { 0 }
    }
}

/// A `(prefix key, packed id)` pair on a suffix record. Checked in
/// registration order; the first prefix currently down wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixEntry<K> {
    pub key: K,
    pub raw: u16,
}

/// How a prefix key's release was spent since it went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JustUsed {
    #[default]
    Unused,
    AsPrefix,
    AsPrefixForHotkey,
}

/// Per-key record: immutable configuration written by the builder plus
/// runtime flags the dispatcher owns.
#[derive(Debug, Clone, Default)]
pub struct KeyRecord {
    // Configuration.
    pub used_as_prefix: bool,
    pub used_as_suffix: bool,
    /// Nonzero for the standard modifier keys; which LR bits this key
    /// contributes when held.
    pub as_modifiers_lr: ModMask,
    pub force_toggle: Option<ToggleHandle>,
    /// Pointer hotkeys only: request that the native button action not
    /// be suppressed when the hotkey fires unmodified.
    pub no_mouse_suppress: bool,
    /// In `ksc` records: route events for this scan code through the
    /// scan-code record instead of the VK record.
    pub sc_takes_precedence: bool,
    pub prefix_vks: Vec<PrefixEntry<u8>>,
    pub prefix_scs: Vec<PrefixEntry<u16>>,

    // Runtime.
    pub is_down: bool,
    pub down_performed_action: bool,
    pub was_just_used: JustUsed,
    pub it_put_alt_down: bool,
    pub it_put_shift_down: bool,
}

pub const VK_RECORDS: usize = 256;
pub const SC_RECORDS: usize = 512;

/// The complete read-only-after-build lookup structure.
pub struct HotkeyTable {
    pub kvk: Vec<KeyRecord>,
    pub ksc: Vec<KeyRecord>,
    kvkm: Vec<u16>,
    kscm: Vec<u16>,
    /// Initial values for the engine's toggle-state array; indexed by
    /// the handles stored in `force_toggle`.
    pub toggles: Vec<ToggleValue>,
}

impl Default for HotkeyTable {
    fn default() -> Self {
        let mut table = Self {
            kvk: vec![KeyRecord::default(); VK_RECORDS],
            ksc: vec![KeyRecord::default(); SC_RECORDS],
            kvkm: vec![RAW_INVALID; 256 * VK_RECORDS],
            kscm: vec![RAW_INVALID; 256 * SC_RECORDS],
            toggles: Vec::new(),
        };
        // The standard modifiers always participate in mask tracking,
        // hotkeys or not. Neutral VKs carry both side bits; the actual
        // side is resolved from the scan code at event time.
        let pairs: [(u8, ModMask); 11] = [
            (VK_LSHIFT, ModMask::LSHIFT),
            (VK_RSHIFT, ModMask::RSHIFT),
            (VK_SHIFT, ModMask::SHIFT),
            (VK_LCONTROL, ModMask::LCTRL),
            (VK_RCONTROL, ModMask::RCTRL),
            (VK_CONTROL, ModMask::CTRL),
            (VK_LMENU, ModMask::LALT),
            (VK_RMENU, ModMask::RALT),
            (VK_MENU, ModMask::ALT),
            (VK_LWIN, ModMask::LWIN),
            (VK_RWIN, ModMask::RWIN),
        ];
        for (vk, mask) in pairs {
            table.kvk[vk as usize].as_modifiers_lr = mask;
        }
        table
    }
}

impl HotkeyTable {
    pub fn vk_record(&self, vk: u8) -> &KeyRecord {
        &self.kvk[vk as usize]
    }

    pub fn sc_record(&self, sc: u16) -> &KeyRecord {
        &self.ksc[(sc as usize) & (SC_RECORDS - 1)]
    }

    /// Packed id for `mods` + virtual key.
    pub fn vk_match(&self, mods: ModMask, vk: u8) -> u16 {
        self.kvkm[mods.0 as usize * VK_RECORDS + vk as usize]
    }

    /// Packed id for `mods` + scan code.
    pub fn sc_match(&self, mods: ModMask, sc: u16) -> u16 {
        self.kscm[mods.0 as usize * SC_RECORDS + ((sc as usize) & (SC_RECORDS - 1))]
    }
}

/// Persistable hotkey definition, the unit the host's compiler emits.
/// Exactly one of `prefix` / `modifiers` is meaningful: a prefix makes a
/// custom-combination hotkey, otherwise the LR modifier mask is matched
/// against the logical state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyDef {
    pub modifiers: ModMask,
    pub prefix: Option<KeySel>,
    pub suffix: KeySel,
    pub id: u16,
    pub no_suppress: bool,
}

impl Default for HotkeyDef {
    fn default() -> Self {
        Self {
            modifiers: ModMask::NONE,
            prefix: None,
            suffix: KeySel::Vk(0),
            id: RAW_INVALID,
            no_suppress: false,
        }
    }
}

/// Builds a [`HotkeyTable`]. Consumed by `Engine::load_table`.
#[derive(Default)]
pub struct HotkeyTableBuilder {
    table: HotkeyTable,
}

impl HotkeyTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_mut(&mut self, sel: KeySel) -> &mut KeyRecord {
        match sel {
            KeySel::Vk(vk) => &mut self.table.kvk[vk as usize],
            KeySel::Sc(sc) => {
                let rec = &mut self.table.ksc[(sc as usize) & (SC_RECORDS - 1)];
                rec.sc_takes_precedence = true;
                rec
            }
        }
    }

    /// Hotkey matched by the logical modifier mask, e.g. `LCtrl+A`.
    /// The mask is exact; neutral-modifier expansion is the compiler's
    /// concern.
    pub fn modified(&mut self, mods: ModMask, suffix: KeySel, id: u16) -> &mut Self {
        self.modified_raw(mods, suffix, HotkeyMatch::encode(id, false))
    }

    pub fn modified_no_suppress(&mut self, mods: ModMask, suffix: KeySel, id: u16) -> &mut Self {
        self.modified_raw(mods, suffix, HotkeyMatch::encode(id, true))
    }

    fn modified_raw(&mut self, mods: ModMask, suffix: KeySel, raw: u16) -> &mut Self {
        self.record_mut(suffix).used_as_suffix = true;
        match suffix {
            KeySel::Vk(vk) => {
                self.table.kvkm[mods.0 as usize * VK_RECORDS + vk as usize] = raw;
            }
            KeySel::Sc(sc) => {
                self.table.kscm[mods.0 as usize * SC_RECORDS + ((sc as usize) & (SC_RECORDS - 1))] =
                    raw;
            }
        }
        self
    }

    /// Custom-combination hotkey: `prefix & suffix`. The prefix key is
    /// taken over by the engine for the duration of its hold.
    pub fn combo(&mut self, prefix: KeySel, suffix: KeySel, id: u16) -> &mut Self {
        self.combo_raw(prefix, suffix, HotkeyMatch::encode(id, false))
    }

    pub fn combo_no_suppress(&mut self, prefix: KeySel, suffix: KeySel, id: u16) -> &mut Self {
        self.combo_raw(prefix, suffix, HotkeyMatch::encode(id, true))
    }

    fn combo_raw(&mut self, prefix: KeySel, suffix: KeySel, raw: u16) -> &mut Self {
        self.record_mut(prefix).used_as_prefix = true;
        let suffix_rec = self.record_mut(suffix);
        suffix_rec.used_as_suffix = true;
        match prefix {
            KeySel::Vk(vk) => suffix_rec.prefix_vks.push(PrefixEntry { key: vk, raw }),
            KeySel::Sc(sc) => suffix_rec.prefix_scs.push(PrefixEntry {
                key: sc & (SC_RECORDS as u16 - 1),
                raw,
            }),
        }
        self
    }

    /// Apply a persisted definition.
    pub fn add(&mut self, def: &HotkeyDef) -> &mut Self {
        match def.prefix {
            Some(prefix) => self.combo_raw(
                prefix,
                def.suffix,
                HotkeyMatch::encode(def.id, def.no_suppress),
            ),
            None => self.modified_raw(
                def.modifiers,
                def.suffix,
                HotkeyMatch::encode(def.id, def.no_suppress),
            ),
        }
    }

    /// Register a toggleable key (Num/Caps/Scroll-Lock) whose state the
    /// engine manages. The returned handle addresses the engine's
    /// toggle array.
    pub fn force_toggle(&mut self, key: KeySel, initial: ToggleValue) -> ToggleHandle {
        let handle = ToggleHandle(self.table.toggles.len());
        self.table.toggles.push(initial);
        self.record_mut(key).force_toggle = Some(handle);
        handle
    }

    /// Mark a pointer suffix as not wanting its native button action
    /// suppressed when the hotkey fires unmodified.
    pub fn no_mouse_suppress(&mut self, vk: u8) -> &mut Self {
        self.table.kvk[vk as usize].no_mouse_suppress = true;
        self
    }

    pub fn build(self) -> HotkeyTable {
        self.table
    }
}
