//! The interception engine: classifies raw events, tracks logical and
//! physical modifier state, and runs the prefix/suffix dispatch that
//! decides pass-through, suppression, or a hotkey action per event.
//!
//! Everything here is single-threaded by contract: the OS delivers both
//! hooks' events to one thread, and every synthesized emission is
//! replayed through the engine before the event that caused it resolves,
//! exactly as the real injected events re-enter the hook. The OS-facing
//! layer drops events carrying our sentinel tag, so each emission's
//! state effect is applied once.

use crate::history::KeyHistory;
use crate::keys::{
    fallback_scan, is_alt_vk, is_control_vk, is_dual_state_numpad, is_numpad_digit, is_shift_vk,
    modifier_route, pad_index, PAD_COUNT, VK_DECIMAL, VK_DELETE, VK_LBUTTON, VK_LCONTROL,
    VK_LMENU, VK_LSHIFT, VK_LWIN, VK_MBUTTON, VK_MENU, VK_NUMLOCK, VK_RBUTTON, VK_RCONTROL,
    VK_RMENU, VK_RSHIFT, VK_RWIN, VK_SHIFT, VK_TAB, VK_WHEEL_DOWN, VK_WHEEL_UP, VK_XBUTTON1,
    VK_XBUTTON2,
};
use crate::table::{
    HotkeyMatch, HotkeyTable, JustUsed, KeyRecord, HOTKEY_ID_ALT_TAB, HOTKEY_ID_ALT_TAB_AND_MENU,
    HOTKEY_ID_ALT_TAB_MENU, HOTKEY_ID_ALT_TAB_MENU_DISMISS, HOTKEY_ID_ALT_TAB_SHIFT, RAW_INVALID,
};
use crate::types::{
    DeviceClass, Emission, ExtraInfo, FiredHotkey, KeyEventKind, KeyboardInput, ModMask,
    PointerAction, PointerButton, PointerInput, ToggleHandle, ToggleValue, Verdict,
};
use parking_lot::Mutex;
use tracing::debug;

lazy_static::lazy_static! {
    pub static ref ENGINE: Mutex<Engine> = Mutex::new(Engine::default());
}

/// Driver-generated shift events land within this many milliseconds of
/// the dual-state numpad event they accompany; 22 ms leaves headroom for
/// loaded systems.
pub const SHIFT_WORKAROUND_MS: u32 = 22;

/// A key record addressed by table slot rather than by pointer, so the
/// records can live in plain arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlot {
    Vk(u8),
    Sc(u16),
}

/// Snapshot of the previous event, kept for the driver-shift workaround.
#[derive(Debug, Default, Clone, Copy)]
struct PriorEvent {
    vk: u8,
    sc: u16,
    key_up: bool,
    physical: bool,
    tick_ms: u32,
    physical_mods: ModMask,
    shift_down: bool,
    lshift_down: bool,
}

/// Everything the verdict helpers need about the event being processed.
#[derive(Clone, Copy)]
struct EvCtx {
    device: DeviceClass,
    vk: u8,
    sc: u16,
    key_up: bool,
    extra: ExtraInfo,
    physical: bool,
    history_idx: usize,
}

enum MenuOutcome {
    Done,
    /// AltTabAndMenu with the menu already visible: advance one entry.
    Step,
}

pub struct Engine {
    table: HotkeyTable,
    toggles: Vec<ToggleValue>,

    logical_mods: ModMask,
    physical_mods: ModMask,
    physical_down: [bool; 256],

    /// Dual-state numpad keys currently held that went down while
    /// numlock was on; only those provoke driver shift events.
    pad_state: [bool; PAD_COUNT],
    next_phantom_shift_down_not_physical: bool,
    prior: PriorEvent,

    prefix: Option<KeySlot>,

    disguise_next_lwin_up: bool,
    disguise_next_rwin_up: bool,
    disguise_next_lalt_up: bool,
    disguise_next_ralt_up: bool,
    alt_tab_menu_is_visible: bool,

    numlock_on: bool,
    time_of_last_physical_input: u32,
    now_ms: u32,

    history: KeyHistory,
    title_provider: Option<Box<dyn Fn() -> String + Send + Sync>>,

    emissions: Vec<Emission>,
    fired: Vec<FiredHotkey>,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            table: HotkeyTable::default(),
            toggles: Vec::new(),
            logical_mods: ModMask::NONE,
            physical_mods: ModMask::NONE,
            physical_down: [false; 256],
            pad_state: [false; PAD_COUNT],
            next_phantom_shift_down_not_physical: false,
            prior: PriorEvent::default(),
            prefix: None,
            disguise_next_lwin_up: false,
            disguise_next_rwin_up: false,
            disguise_next_lalt_up: false,
            disguise_next_ralt_up: false,
            alt_tab_menu_is_visible: false,
            numlock_on: false,
            time_of_last_physical_input: 0,
            now_ms: 0,
            history: KeyHistory::default(),
            title_provider: None,
            emissions: Vec::new(),
            fired: Vec::new(),
        }
    }
}

impl Engine {
    /// Install the lookup tables. Runtime flags belonging to the old
    /// tables are abandoned with them.
    pub fn load_table(&mut self, table: HotkeyTable) {
        self.toggles = table.toggles.clone();
        self.table = table;
        self.prefix = None;
    }

    pub fn set_title_provider(&mut self, provider: impl Fn() -> String + Send + Sync + 'static) {
        self.title_provider = Some(Box::new(provider));
    }

    /// The hook layer refreshes this from the OS before each event;
    /// dual-state tracking depends on it.
    pub fn set_numlock_on(&mut self, on: bool) {
        self.numlock_on = on;
    }

    pub fn set_toggle(&mut self, handle: ToggleHandle, value: ToggleValue) {
        self.toggles[handle.0] = value;
    }

    pub fn toggle(&self, handle: ToggleHandle) -> ToggleValue {
        self.toggles[handle.0]
    }

    pub fn logical_mods(&self) -> ModMask {
        self.logical_mods
    }

    pub fn physical_mods(&self) -> ModMask {
        self.physical_mods
    }

    pub fn physical_key_down(&self, vk: u8) -> bool {
        self.physical_down[vk as usize]
    }

    pub fn alt_tab_menu_visible(&self) -> bool {
        self.alt_tab_menu_is_visible
    }

    pub fn prefix_active(&self) -> bool {
        self.prefix.is_some()
    }

    pub fn time_of_last_physical_input(&self) -> u32 {
        self.time_of_last_physical_input
    }

    pub fn history(&self) -> &KeyHistory {
        &self.history
    }

    /// Synthesized key transitions queued since the last drain, in
    /// emission order.
    pub fn take_emissions(&mut self) -> Vec<Emission> {
        std::mem::take(&mut self.emissions)
    }

    /// Hotkey firings queued since the last drain.
    pub fn take_fired(&mut self) -> Vec<FiredHotkey> {
        std::mem::take(&mut self.fired)
    }

    fn rec(&self, slot: KeySlot) -> &KeyRecord {
        match slot {
            KeySlot::Vk(vk) => &self.table.kvk[vk as usize],
            KeySlot::Sc(sc) => &self.table.ksc[sc as usize],
        }
    }

    fn rec_mut(&mut self, slot: KeySlot) -> &mut KeyRecord {
        match slot {
            KeySlot::Vk(vk) => &mut self.table.kvk[vk as usize],
            KeySlot::Sc(sc) => &mut self.table.ksc[sc as usize],
        }
    }

    fn any_pad_down(&self) -> bool {
        self.pad_state.iter().any(|&down| down)
    }

    fn window_title(&self) -> String {
        self.title_provider.as_ref().map(|f| f()).unwrap_or_default()
    }

    fn toggle_is_neutral(&self, slot: KeySlot) -> bool {
        match self.rec(slot).force_toggle {
            Some(handle) => self.toggles[handle.0] == ToggleValue::Neutral,
            None => false,
        }
    }

    /// Physical-or-not for a keyboard event. Injected events are never
    /// physical; a left/neutral shift **down** is reclassified as the
    /// driver's when the phantom flag is armed (and no qualified numpad
    /// key is held) or when it trails a dual-state numpad key-up inside
    /// the workaround window. Right shift is never faked by the driver.
    fn classify_keyboard(&mut self, input: &KeyboardInput) -> bool {
        if input.injected {
            return false;
        }
        if (input.vk == VK_LSHIFT || input.vk == VK_SHIFT) && !input.key_up {
            if self.next_phantom_shift_down_not_physical && !self.any_pad_down() {
                self.next_phantom_shift_down_not_physical = false;
                return false;
            }
            if self.prior.key_up
                && is_dual_state_numpad(self.prior.vk, self.prior.sc)
                && input.time_ms.wrapping_sub(self.prior.tick_ms) < SHIFT_WORKAROUND_MS
            {
                return false;
            }
        }
        self.time_of_last_physical_input = input.time_ms;
        true
    }

    /// Process one keyboard event and decide its fate.
    pub fn process_keyboard(&mut self, input: KeyboardInput) -> Verdict {
        self.now_ms = input.time_ms;
        let vk = input.vk;
        // Scan codes are normalized to 8 bits with the extended flag in
        // bit 8; a zero scan from a foreign injector is filled from the
        // VK so scan-addressed records still resolve.
        let mut sc = input.scan & 0xFF;
        if input.extended {
            sc |= 0x100;
        }
        if vk != 0 && sc == 0 {
            sc = fallback_scan(vk);
        }

        let physical = self.classify_keyboard(&input);

        let title = self.window_title();
        let initial_type = if input.extra.is_ignored() { 'i' } else { ' ' };
        let history_idx = self
            .history
            .push(vk, sc, input.key_up, initial_type, input.time_ms, title);

        // Extended scan codes are the separate navigation keys, not the
        // numpad; and with numlock off the driver never fakes shifts, so
        // the key does not qualify for the in-progress set.
        if sc & 0x100 == 0 && self.numlock_on {
            if let Some(i) = pad_index(vk) {
                self.pad_state[i] = !input.key_up;
            }
        }

        // The switcher can appear without any built-in of ours running;
        // these are the exact conditions under which the OS shows it.
        if vk == VK_TAB
            && !input.key_up
            && !self.alt_tab_menu_is_visible
            && self.logical_mods.intersects(ModMask::ALT)
            && !self.logical_mods.intersects(ModMask::CTRL)
        {
            self.alt_tab_menu_is_visible = true;
        }

        // Physical tracking for ordinary keys, even ones about to be
        // suppressed; the modifier keys are handled by the routing logic
        // because their neutral entries are derived.
        if self.table.kvk[vk as usize].as_modifiers_lr.is_empty() && physical {
            self.physical_down[vk as usize] = !input.key_up;
        }

        let mut ctx = EvCtx {
            device: DeviceClass::Keyboard,
            vk,
            sc,
            key_up: input.key_up,
            extra: input.extra,
            physical,
            history_idx,
        };

        match input.extra {
            ExtraInfo::IgnoreAll => return Verdict::Pass,
            // Our own replays skip dispatch but must keep the modifier
            // picture current. Never routed through suppression: a
            // suppressed Numlock replay would emit more Numlock replays.
            ExtraInfo::IgnoreAsModifier => return self.allow(&mut ctx, false),
            ExtraInfo::Plain => {}
        }

        // An armed disguise claims this specific key-up outright.
        if input.key_up && self.disguise_armed_for(vk) {
            self.clear_disguise_for(vk);
            self.key_event(KeyEventKind::Down, VK_SHIFT, 0);
            self.key_event(KeyEventKind::Up, vk, sc);
            self.key_event(KeyEventKind::Up, VK_SHIFT, 0);
            return self.suppress(&mut ctx);
        }

        self.dispatch(&mut ctx)
    }

    /// Process one pointing-device event. Motion only refreshes the
    /// physical-input clock; buttons and wheel notches run the same
    /// dispatch as keys under their pseudo-VKs.
    pub fn process_pointer(&mut self, input: PointerInput) -> Verdict {
        self.now_ms = input.time_ms;
        let physical = !input.injected;
        if physical {
            self.time_of_last_physical_input = input.time_ms;
        }

        let (vk, key_up) = match input.action {
            PointerAction::Motion => return Verdict::Pass,
            PointerAction::Wheel { delta } => (
                if delta < 0 { VK_WHEEL_DOWN } else { VK_WHEEL_UP },
                // Wheels have no up.
                false,
            ),
            PointerAction::Button { button, key_up } => (
                match button {
                    PointerButton::Left => VK_LBUTTON,
                    PointerButton::Right => VK_RBUTTON,
                    PointerButton::Middle => VK_MBUTTON,
                    PointerButton::X1 => VK_XBUTTON1,
                    PointerButton::X2 => VK_XBUTTON2,
                },
                key_up,
            ),
        };

        let title = self.window_title();
        let initial_type = if input.extra.is_ignored() { 'i' } else { ' ' };
        let history_idx = self
            .history
            .push(vk, 0, key_up, initial_type, input.time_ms, title);

        if physical {
            self.physical_down[vk as usize] = !key_up;
        }

        if input.extra.is_ignored() {
            return Verdict::Pass;
        }

        let mut ctx = EvCtx {
            device: DeviceClass::Pointer,
            vk,
            sc: 0,
            key_up,
            extra: input.extra,
            physical,
            history_idx,
        };
        self.dispatch(&mut ctx)
    }

    fn disguise_armed_for(&self, vk: u8) -> bool {
        match vk {
            VK_LWIN => self.disguise_next_lwin_up,
            VK_RWIN => self.disguise_next_rwin_up,
            // Assume a neutral MENU is the left key; a low-level hook
            // essentially never delivers the neutral form.
            VK_LMENU | VK_MENU => self.disguise_next_lalt_up,
            VK_RMENU => self.disguise_next_ralt_up,
            _ => false,
        }
    }

    fn clear_disguise_for(&mut self, vk: u8) {
        match vk {
            VK_LWIN => self.disguise_next_lwin_up = false,
            VK_RWIN => self.disguise_next_rwin_up = false,
            VK_LMENU | VK_MENU => self.disguise_next_lalt_up = false,
            VK_RMENU => self.disguise_next_ralt_up = false,
            _ => {}
        }
    }

    fn this_slot(&self, ctx: &EvCtx) -> KeySlot {
        match ctx.device {
            DeviceClass::Keyboard if self.table.sc_record(ctx.sc).sc_takes_precedence => {
                KeySlot::Sc(ctx.sc & 0x1FF)
            }
            _ => KeySlot::Vk(ctx.vk),
        }
    }

    /// `!no_mouse_suppress || modifiers || prefix`: a pointer hotkey's
    /// native action survives only when the hotkey fired bare. Crude when
    /// a user releases the modifier before the button, but preserved
    /// as-is; `no_mouse_suppress` is the knob.
    fn allow_pointer_suppress(&self, this: KeySlot) -> bool {
        !self.rec(this).no_mouse_suppress || self.logical_mods.any() || self.prefix.is_some()
    }

    /// The four-case decision tree.
    fn dispatch(&mut self, ctx: &mut EvCtx) -> Verdict {
        let this = self.this_slot(ctx);

        // A held prefix auto-repeats its down; short-circuit before any
        // bookkeeping. Repeats still reach the system for modifiers in
        // case an app relies on key repeat.
        if self.prefix == Some(this) && !ctx.key_up {
            return if ctx.device == DeviceClass::Keyboard && self.rec(this).as_modifiers_lr.any() {
                self.allow(ctx, false)
            } else {
                self.suppress(ctx)
            };
        }

        // Any key-down while a prefix is held counts as using the prefix
        // as a modifier, so a prefix that is also a suffix stays quiet on
        // release. On the pointer path only modifier prefixes are marked,
        // keeping native buttons (e.g. Ctrl-click) intact.
        if let Some(pfx) = self.prefix {
            if !ctx.key_up {
                let mark = match ctx.device {
                    DeviceClass::Keyboard => self.rec(this).as_modifiers_lr.is_empty(),
                    DeviceClass::Pointer => self.rec(pfx).as_modifiers_lr.any(),
                };
                if mark {
                    self.rec_mut(pfx).was_just_used = JustUsed::AsPrefix;
                }
            }
        }

        if !self.rec(this).used_as_prefix && !self.rec(this).used_as_suffix {
            return self.allow(ctx, false);
        }

        // Only meaningful alongside key_up below.
        let mut was_down_before_up = false;
        let mut down_performed_action = false;
        if ctx.key_up {
            let r = self.rec_mut(this);
            was_down_before_up = r.is_down;
            down_performed_action = r.down_performed_action;
            r.down_performed_action = false;
        }
        self.rec_mut(this).is_down = !ctx.key_up;

        // Case 1: prefix key pressed, and it is taken in its prefix
        // capacity (an already-active prefix keeps priority when this
        // key could also act as a suffix).
        if self.rec(this).used_as_prefix
            && !ctx.key_up
            && (self.prefix.is_none() || !self.rec(this).used_as_suffix)
        {
            self.prefix = Some(this);
            self.rec_mut(this).was_just_used = JustUsed::Unused;
            debug!(?this, "prefix acquired");
            // A key-down cannot trigger a suffix, so decide now: the
            // system still needs modifier downs, and a toggleable key
            // left under user control keeps its native toggle.
            return match ctx.device {
                DeviceClass::Keyboard => {
                    if self.rec(this).as_modifiers_lr.any() || self.toggle_is_neutral(this) {
                        self.allow(ctx, false)
                    } else {
                        self.suppress(ctx)
                    }
                }
                DeviceClass::Pointer => self.suppress(ctx),
            };
        }

        // Case 2: a suffix (not currently the active prefix) released.
        // If its down fired, the up is swallowed too: the down was
        // suppressed, so a lone up would confuse the foreground app.
        if self.rec(this).used_as_suffix && self.prefix != Some(this) && ctx.key_up {
            return match ctx.device {
                DeviceClass::Keyboard => {
                    if down_performed_action {
                        self.suppress(ctx)
                    } else {
                        self.allow(ctx, false)
                    }
                }
                DeviceClass::Pointer => {
                    if down_performed_action && self.allow_pointer_suppress(this) {
                        self.suppress(ctx)
                    } else {
                        self.allow(ctx, false)
                    }
                }
            };
        }

        // Case 3: prefix key released.
        if self.rec(this).used_as_prefix && ctx.key_up {
            if self.prefix == Some(this) {
                self.prefix = None;
                debug!(?this, "prefix released");
            }
            // Otherwise an older prefix stays in effect: prefix1 held,
            // prefix2 pressed and released. Keeping the newer one would
            // strand prefix1 until re-pressed.

            if self.rec(this).it_put_alt_down {
                self.rec_mut(this).it_put_alt_down = false;
                self.key_event(KeyEventKind::Up, VK_MENU, 0);
            }
            if self.rec(this).it_put_shift_down {
                self.rec_mut(this).it_put_shift_down = false;
                self.key_event(KeyEventKind::Up, VK_SHIFT, 0);
            }

            let neutral_toggle =
                ctx.device == DeviceClass::Keyboard && self.toggle_is_neutral(this);
            if neutral_toggle {
                // Toggleable keys flip on key-down so typing can resume
                // before the key is released. When the hold fired a
                // hotkey, replace this release with an up/down/up of our
                // own: firing a hotkey must not double as toggling.
                if self.rec(this).was_just_used == JustUsed::AsPrefixForHotkey {
                    self.key_event(KeyEventKind::Up, ctx.vk, ctx.sc);
                    self.key_event(KeyEventKind::Down, ctx.vk, ctx.sc);
                    self.key_event(KeyEventKind::Up, ctx.vk, ctx.sc);
                    return self.suppress(ctx);
                }
                if self.rec(this).was_just_used == JustUsed::AsPrefix {
                    return self.allow(ctx, false);
                }
            } else if self.rec(this).was_just_used != JustUsed::Unused {
                // The hold modified something. Modifier keys must still
                // release to the system (disguised if the hold fired a
                // hotkey, so WIN/ALT menus stay shut); anything else is
                // suppressed, which also keeps toggleable keys from
                // flipping when used purely as modifiers.
                return match ctx.device {
                    DeviceClass::Keyboard => {
                        if self.rec(this).as_modifiers_lr.any() {
                            let disguise =
                                self.rec(this).was_just_used == JustUsed::AsPrefixForHotkey;
                            self.allow(ctx, disguise)
                        } else {
                            self.suppress(ctx)
                        }
                    }
                    DeviceClass::Pointer => self.suppress(ctx),
                };
            }

            if !self.rec(this).used_as_suffix {
                // Unused and not a suffix: let modifiers and neutral
                // toggles do their native thing (their downs were not
                // suppressed), swallow the rest.
                return match ctx.device {
                    DeviceClass::Keyboard => {
                        if self.rec(this).as_modifiers_lr.any() || self.toggle_is_neutral(this) {
                            self.allow(ctx, false)
                        } else {
                            self.suppress(ctx)
                        }
                    }
                    DeviceClass::Pointer => self.suppress(ctx),
                };
            }

            if !was_down_before_up {
                // An up without a tracked down: some other hook sent a
                // stray up. Do not synthesize an action out of it.
                return self.allow(ctx, false);
            }

            // Fall through: the key is also a suffix in its own right
            // and nothing used it while held, so consider its key-up
            // hotkey next.
        }

        // Case 4: suffix pressed (or the key-up fall-through above).
        self.dispatch_suffix(ctx, this)
    }

    fn dispatch_suffix(&mut self, ctx: &mut EvCtx, this: KeySlot) -> Verdict {
        let mut raw = RAW_INVALID;

        if self.prefix.is_some() && !ctx.key_up {
            // Custom combinations take precedence over mask-modified
            // hotkeys: `a & b` fires regardless of which standard
            // modifiers happen to be down. First prefix found down wins,
            // and becomes the active prefix even if another was.
            let n = self.rec(this).prefix_vks.len();
            for i in 0..n {
                let entry = self.rec(this).prefix_vks[i];
                if self.table.kvk[entry.key as usize].is_down {
                    self.prefix = Some(KeySlot::Vk(entry.key));
                    self.table.kvk[entry.key as usize].was_just_used = JustUsed::AsPrefixForHotkey;
                    raw = entry.raw;
                    break;
                }
            }
            if raw == RAW_INVALID {
                let n = self.rec(this).prefix_scs.len();
                for i in 0..n {
                    let entry = self.rec(this).prefix_scs[i];
                    if self.table.ksc[entry.key as usize].is_down {
                        self.prefix = Some(KeySlot::Sc(entry.key));
                        self.table.ksc[entry.key as usize].was_just_used =
                            JustUsed::AsPrefixForHotkey;
                        raw = entry.raw;
                        break;
                    }
                }
            }

            if let Some(m) = HotkeyMatch::decode(raw) {
                if m.id == HOTKEY_ID_ALT_TAB || m.id == HOTKEY_ID_ALT_TAB_SHIFT {
                    // Driven inline: the host could not know when to
                    // release the substitute ALT key.
                    return self.alt_tab_with_prefix(ctx, this, m.id);
                }
            }
        }

        let mut matched = HotkeyMatch::decode(raw);
        if matched.is_none() {
            let mut mods_new = self.logical_mods;
            if ctx.device == DeviceClass::Keyboard {
                // A modifier suffix cannot also count itself.
                mods_new = mods_new & !self.rec(this).as_modifiers_lr;
            }
            matched = self.mask_lookup(ctx, mods_new);
            if matched.is_none() && self.alt_tab_menu_is_visible {
                // The user may be steering the switcher with a hotkey
                // whose definition has no ALT in it.
                matched = self.mask_lookup(ctx, mods_new & !ModMask::ALT);
            }
            if matched.is_none() {
                if ctx.key_up {
                    // A released prefix+suffix key with no key-up action:
                    // same policy as an unused prefix release. A prefix
                    // key's native function stays suppressed unless it is
                    // a modifier or a toggleable key under user control.
                    return match ctx.device {
                        DeviceClass::Keyboard => {
                            if self.rec(this).as_modifiers_lr.any() || self.toggle_is_neutral(this)
                            {
                                self.allow(ctx, false)
                            } else {
                                self.suppress(ctx)
                            }
                        }
                        DeviceClass::Pointer => self.suppress(ctx),
                    };
                }
                // A down with no matching combination passes through.
                return self.allow(ctx, false);
            }
        }
        let m = matched.unwrap();

        // When only WIN (or only ALT) is logically down, its upcoming
        // bare key-up would open the Start menu (or the window's menu
        // bar); arm a disguise unless the key is a configured prefix,
        // whose own release handling already disguises.
        if self.logical_mods.is_subset_of(ModMask::WIN) {
            if self.logical_mods.intersects(ModMask::LWIN)
                && !self.table.kvk[VK_LWIN as usize].used_as_prefix
            {
                self.disguise_next_lwin_up = true;
            }
            if self.logical_mods.intersects(ModMask::RWIN)
                && !self.table.kvk[VK_RWIN as usize].used_as_prefix
            {
                self.disguise_next_rwin_up = true;
            }
        } else if self.logical_mods.is_subset_of(ModMask::ALT) {
            if self.logical_mods.intersects(ModMask::LALT)
                && !self.table.kvk[VK_LMENU as usize].used_as_prefix
            {
                self.disguise_next_lalt_up = true;
            }
            if self.logical_mods.intersects(ModMask::RALT)
                && !self.table.kvk[VK_RMENU as usize].used_as_prefix
            {
                self.disguise_next_ralt_up = true;
            }
        }

        match m.id {
            id @ (HOTKEY_ID_ALT_TAB_MENU
            | HOTKEY_ID_ALT_TAB_AND_MENU
            | HOTKEY_ID_ALT_TAB_MENU_DISMISS) => {
                if id == HOTKEY_ID_ALT_TAB_MENU_DISMISS && !self.alt_tab_menu_is_visible {
                    // There is no reliable way to see a menu opened by
                    // other means; let the key act natively.
                    return self.allow(ctx, false);
                }
                match self.alt_tab_menu_family(ctx, this, id) {
                    MenuOutcome::Done => {}
                    MenuOutcome::Step => self.alt_tab_step(ctx, id),
                }
            }
            id @ (HOTKEY_ID_ALT_TAB | HOTKEY_ID_ALT_TAB_SHIFT) => {
                // Without a prefix these act only while the menu shows;
                // otherwise the key keeps its native function (the
                // wheel keeps scrolling until the menu is up).
                if !self.alt_tab_menu_is_visible {
                    return self.allow(ctx, false);
                }
                self.alt_tab_step(ctx, id);
            }
            id => {
                // User-defined: hand off to the host. For a pointer
                // hotkey whose native click survives, ask the host to
                // dismiss whatever menu that click opened.
                let dismiss =
                    ctx.device == DeviceClass::Pointer && !self.allow_pointer_suppress(this);
                debug!(id, dismiss, "hotkey fired");
                self.fired.push(FiredHotkey {
                    id,
                    dismiss_menus: dismiss,
                });
            }
        }

        self.history.set_event_type(ctx.history_idx, 'h');

        if ctx.device == DeviceClass::Keyboard {
            if self.toggle_is_neutral(this) && self.rec(this).used_as_prefix && ctx.key_up {
                // This key-up fired a hotkey and its down was passed
                // through (neutral-toggle prefix), so the key toggled.
                // Replace the up with up/down/up to toggle it back: the
                // key's natural function must not ride along with the
                // hotkey. Pressing it with a foreign modifier held still
                // toggles normally.
                self.key_event(KeyEventKind::Up, ctx.vk, ctx.sc);
                self.key_event(KeyEventKind::Down, ctx.vk, ctx.sc);
                self.key_event(KeyEventKind::Up, ctx.vk, ctx.sc);
                return self.suppress(ctx);
            }
            if self.rec(this).as_modifiers_lr.any() && ctx.key_up {
                // Suppressing a modifier's up would wedge the system's
                // view of it (its down went through); release it, but
                // disguised against WIN/ALT menus.
                return self.allow(ctx, true);
            }
        }

        if ctx.key_up {
            if ctx.device == DeviceClass::Keyboard && m.no_suppress {
                // Key-up hotkeys suppress their down by definition (the
                // key is a prefix); compensate with a down of our own
                // before letting the native up through.
                self.key_event(KeyEventKind::Down, ctx.vk, ctx.sc);
                return self.allow(ctx, false);
            }
        } else {
            self.rec_mut(this).down_performed_action = true;
            // The active prefix may be a plain modifier held before this
            // suffix, in which case no prefix list carried the mark.
            if let Some(pfx) = self.prefix {
                self.rec_mut(pfx).was_just_used = JustUsed::AsPrefixForHotkey;
            }
            if ctx.device == DeviceClass::Keyboard && m.no_suppress {
                // Native function requested: emit an ordered down+up and
                // still suppress the real down, whose up will be
                // suppressed when it arrives.
                self.key_event(KeyEventKind::DownAndUp, ctx.vk, ctx.sc);
            }
        }

        match ctx.device {
            DeviceClass::Keyboard => self.suppress(ctx),
            DeviceClass::Pointer => {
                if self.allow_pointer_suppress(this) {
                    self.suppress(ctx)
                } else {
                    self.allow(ctx, false)
                }
            }
        }
    }

    /// `prefix & suffix` bound to AltTab/ShiftAltTab: drive the switcher
    /// one step, holding a substitute ALT until the prefix releases.
    fn alt_tab_with_prefix(&mut self, ctx: &mut EvCtx, this: KeySlot, id: u16) -> Verdict {
        if !ctx.key_up {
            self.rec_mut(this).down_performed_action = true;
        }

        if !self.logical_mods.intersects(ModMask::ALT) {
            // Held down until the prefix key's release.
            self.key_event(KeyEventKind::Down, VK_MENU, 0);
        }
        if ctx.device == DeviceClass::Keyboard && is_control_vk(ctx.vk) {
            // Even suppressed, a control suffix reads as down to the
            // switcher and keeps the menu from appearing.
            self.key_event(KeyEventKind::Up, ctx.vk, ctx.sc);
        }

        // Always claim responsibility for ALT, even if it was already
        // down: a stuck ALT then rights itself on the prefix release.
        let pfx = self
            .prefix
            .expect("prefixed alt-tab requires an active prefix");
        self.rec_mut(pfx).it_put_alt_down = true;

        if id == HOTKEY_ID_ALT_TAB_SHIFT {
            if !self.logical_mods.intersects(ModMask::SHIFT) {
                self.key_event(KeyEventKind::Down, VK_SHIFT, 0);
            }
            self.rec_mut(pfx).it_put_shift_down = true;
        } else {
            // Plain alt-tab must not go shifted. A shift suffix needs
            // lifting every time; the switcher sees it as down despite
            // the suppression.
            if ctx.device == DeviceClass::Keyboard && is_shift_vk(ctx.vk) {
                self.key_event(KeyEventKind::Up, ctx.vk, ctx.sc);
            }
            if self.logical_mods.intersects(ModMask::SHIFT) {
                let side = if self.logical_mods.intersects(ModMask::RSHIFT) {
                    VK_RSHIFT
                } else {
                    VK_LSHIFT
                };
                self.key_event(KeyEventKind::Up, side, 0);
                // No need to restore: the user releases shift as part of
                // alt-tabbing, and the release cancels the prefix.
            }
        }
        if self.logical_mods.intersects(ModMask::CTRL) {
            // Any down control key blocks alt-tab outright.
            let side = if self.logical_mods.intersects(ModMask::RCTRL) {
                VK_RCONTROL
            } else {
                VK_LCONTROL
            };
            self.key_event(KeyEventKind::Up, side, 0);
        }

        self.key_event(KeyEventKind::DownAndUp, VK_TAB, 0);

        if id == HOTKEY_ID_ALT_TAB_SHIFT
            && self.rec(pfx).it_put_shift_down
            && is_numpad_digit(ctx.vk)
        {
            // Shift flips which VK a dual-state numpad key reports; lift
            // it between steps so the suffix release pairs with its
            // press.
            self.key_event(KeyEventKind::Up, VK_SHIFT, 0);
            self.rec_mut(pfx).it_put_shift_down = false;
        }

        self.history.set_event_type(ctx.history_idx, 'h');
        self.suppress(ctx)
    }

    /// AltTabMenu / AltTabAndMenu / AltTabMenuDismiss.
    fn alt_tab_menu_family(&mut self, ctx: &EvCtx, this: KeySlot, id: u16) -> MenuOutcome {
        let mut which_alt_down = 0u8;
        if self.logical_mods.intersects(ModMask::LALT) {
            which_alt_down = VK_LMENU;
        } else if self.logical_mods.intersects(ModMask::RALT) {
            which_alt_down = VK_RMENU;
        }

        if self.alt_tab_menu_is_visible {
            if id != HOTKEY_ID_ALT_TAB_AND_MENU {
                // Menu up, hotkey is Menu or Dismiss: dismiss it. The
                // menu can be visible with neither ALT down, so fall
                // back to the neutral key.
                self.key_event(
                    KeyEventKind::Up,
                    if which_alt_down != 0 {
                        which_alt_down
                    } else {
                        VK_MENU
                    },
                    0,
                );
                if self.rec(this).as_modifiers_lr.any() && ctx.vk != VK_LWIN && ctx.vk != VK_RWIN {
                    // The newly-activated app can otherwise still think
                    // this (entirely suppressed) modifier suffix is
                    // down. Not done for WIN, where an extra up could
                    // trigger the Start menu.
                    self.key_event(KeyEventKind::Up, ctx.vk, 0);
                }
                self.alt_tab_menu_is_visible = false;
                return MenuOutcome::Done;
            }
            return MenuOutcome::Step;
        }

        // Menu not visible (or not opened by us): bring it up.
        let vk_is_alt = is_alt_vk(ctx.vk);
        let vk_is_shift = is_shift_vk(ctx.vk);
        let vk_is_control = is_control_vk(ctx.vk);

        let mut which_shift_down = 0u8;
        if self.logical_mods.intersects(ModMask::LSHIFT) {
            which_shift_down = VK_LSHIFT;
        } else if self.logical_mods.intersects(ModMask::RSHIFT) {
            which_shift_down = VK_RSHIFT;
        } else if !ctx.key_up && vk_is_shift {
            // No chance to update the logical mask for this very event.
            which_shift_down = ctx.vk;
        }

        let mut which_control_down = 0u8;
        if self.logical_mods.intersects(ModMask::LCTRL) {
            which_control_down = VK_LCONTROL;
        } else if self.logical_mods.intersects(ModMask::RCTRL) {
            which_control_down = VK_RCONTROL;
        } else if !ctx.key_up && vk_is_control {
            which_control_down = ctx.vk;
        }

        let shift_put_up = which_shift_down != 0;
        if shift_put_up {
            self.key_event(KeyEventKind::Up, which_shift_down, 0);
        }
        if which_control_down != 0 {
            // Put control up and leave it up: putting it back down would
            // stick it, since the user's own release will be suppressed.
            self.key_event(KeyEventKind::Up, which_control_down, 0);
        }

        if vk_is_alt {
            which_alt_down = if ctx.key_up {
                // The system will not see this (suppressed) key as down
                // for alt-tab purposes. Needed for a LAlt that is both a
                // prefix (`LAlt & WheelDown::AltTab`) and a key-up menu
                // hotkey.
                0
            } else {
                ctx.vk
            };
        }
        if which_alt_down == 0 {
            self.key_event(KeyEventKind::Down, VK_MENU, 0);
        }

        self.key_event(KeyEventKind::Down, VK_TAB, 0);

        // Restore shift only if it was not the hotkey suffix itself:
        // its own down was suppressed, so the system never saw it, and
        // re-pressing it here would leave it down forever. Control is
        // never restored; a control down dismisses the menu instantly.
        if shift_put_up && !vk_is_shift {
            self.key_event(KeyEventKind::Down, which_shift_down, 0);
        }

        // The menu is up and already advanced one icon; leaving it there
        // suits the common forward direction.
        self.alt_tab_menu_is_visible = true;
        debug!("alt-tab menu opened");
        MenuOutcome::Done
    }

    /// One navigation step while the menu is visible (AltTab /
    /// ShiftAltTab without a prefix, and AltTabAndMenu's advance).
    fn alt_tab_step(&mut self, ctx: &EvCtx, id: u16) {
        if !ctx.key_up && (is_control_vk(ctx.vk) || is_shift_vk(ctx.vk)) {
            // Lift a conflicting suffix and never put it back down; the
            // user's physical release will be suppressed.
            self.key_event(KeyEventKind::Up, ctx.vk, 0);
        }
        if !self.logical_mods.intersects(ModMask::ALT) || (ctx.key_up && is_alt_vk(ctx.vk)) {
            // The menu can be visible with no ALT down; never put this
            // back up here, that would dismiss the menu.
            self.key_event(KeyEventKind::Down, VK_MENU, 0);
        }
        let mut shift_put_down = false;
        if id == HOTKEY_ID_ALT_TAB_SHIFT && !self.logical_mods.intersects(ModMask::SHIFT) {
            self.key_event(KeyEventKind::Down, VK_SHIFT, 0);
            shift_put_down = true;
        }
        self.key_event(KeyEventKind::DownAndUp, VK_TAB, 0);
        if shift_put_down {
            self.key_event(KeyEventKind::Up, VK_SHIFT, 0);
        }
    }

    /// Synthesize a key event: queue it for injection and replay it
    /// through the ignore path immediately, the way the real injected
    /// event re-enters the hook before the current event resolves.
    fn key_event(&mut self, kind: KeyEventKind, vk: u8, sc: u16) {
        match kind {
            KeyEventKind::DownAndUp => {
                self.key_event(KeyEventKind::Down, vk, sc);
                self.key_event(KeyEventKind::Up, vk, sc);
            }
            KeyEventKind::Down | KeyEventKind::Up => {
                let key_up = kind == KeyEventKind::Up;
                let scan = if sc == 0 { fallback_scan(vk) } else { sc };
                self.emissions.push(Emission { vk, sc: scan, key_up });
                let replay = KeyboardInput {
                    vk,
                    scan: scan & 0xFF,
                    key_up,
                    injected: true,
                    extended: scan & 0x100 != 0,
                    extra: ExtraInfo::IgnoreAsModifier,
                    time_ms: self.now_ms,
                };
                let _ = self.process_keyboard(replay);
            }
        }
    }

    fn mask_lookup(&self, ctx: &EvCtx, mods: ModMask) -> Option<HotkeyMatch> {
        let raw = match ctx.device {
            DeviceClass::Keyboard if self.table.sc_record(ctx.sc).sc_takes_precedence => {
                self.table.sc_match(mods, ctx.sc)
            }
            _ => self.table.vk_match(mods, ctx.vk),
        };
        HotkeyMatch::decode(raw)
    }

    /// Render a suppression verdict, with the state updates that must
    /// accompany it.
    fn suppress(&mut self, ctx: &mut EvCtx) -> Verdict {
        if self.history.event_type(ctx.history_idx) == ' ' {
            self.history.set_event_type(ctx.history_idx, 's');
        }
        if ctx.device == DeviceClass::Keyboard {
            // Most keyboards flip Numlock at the driver level even when
            // both its events are suppressed; replay a tagged
            // up/down/up/down to settle the LED and the OS state back
            // where they were. All four transitions are needed. Never
            // for tagged events, or these replays would chain forever.
            if ctx.vk == VK_NUMLOCK && !ctx.key_up && !ctx.extra.is_ignored() {
                self.key_event(KeyEventKind::Up, VK_NUMLOCK, 0);
                self.key_event(KeyEventKind::Down, VK_NUMLOCK, 0);
                self.key_event(KeyEventKind::Up, VK_NUMLOCK, 0);
                self.key_event(KeyEventKind::Down, VK_NUMLOCK, 0);
            }
            self.update_key_state(ctx, true);
        }
        Verdict::Suppress
    }

    /// Render a pass-through verdict. `disguise_win_alt` substitutes a
    /// shift-wrapped release for a WIN/ALT key-up that just fired a
    /// hotkey, so no system menu opens.
    fn allow(&mut self, ctx: &mut EvCtx, disguise_win_alt: bool) -> Verdict {
        if ctx.device == DeviceClass::Pointer {
            return Verdict::Pass;
        }

        // A force-toggled key's own events never reach the system, or
        // its observable state would drift from the forced one. Ignored
        // events are exempt or the Numlock replays would loop.
        if !ctx.extra.is_ignored() {
            if let Some(handle) = self.table.kvk[ctx.vk as usize].force_toggle {
                if self.toggles[handle.0] != ToggleValue::Neutral {
                    return self.suppress(ctx);
                }
            }
        }

        self.update_key_state(ctx, false);

        // Win-L is about to lock the workstation; the hook sleeps until
        // re-logon and misses the releases, so forget the holds now.
        // Win-L works simulated, hence logical rather than physical.
        if ctx.vk == b'L'
            && !ctx.key_up
            && self.logical_mods.any()
            && self.logical_mods.is_subset_of(ModMask::WIN)
        {
            self.logical_mods = ModMask::NONE;
            self.physical_mods = ModMask::NONE;
            self.physical_down[ctx.vk as usize] = false;
            self.physical_down[VK_LWIN as usize] = false;
            self.physical_down[VK_RWIN as usize] = false;
            debug!("win-l lock; modifier tracking reset");
        }

        // Ctrl-Alt-Del takes either Delete key, but only with CTRL and
        // ALT physically held and SHIFT up (WIN is fine). Same reset
        // rationale as Win-L before the secure desktop takes over.
        if (ctx.vk == VK_DELETE || ctx.vk == VK_DECIMAL)
            && !ctx.key_up
            && self.physical_mods.intersects(ModMask::CTRL)
            && self.physical_mods.intersects(ModMask::ALT)
            && !self.physical_mods.intersects(ModMask::SHIFT)
        {
            self.logical_mods = ModMask::NONE;
            self.physical_mods = ModMask::NONE;
            for vk in [ctx.vk, VK_LCONTROL, VK_RCONTROL, VK_LMENU, VK_RMENU] {
                self.physical_down[vk as usize] = false;
            }
            debug!("ctrl-alt-del; modifier tracking reset");
        }

        if self.table.kvk[ctx.vk as usize].as_modifiers_lr.is_empty() {
            return Verdict::Pass;
        }

        // A real ALT release dismisses the menu. Hotkey ('h') and
        // suppressed ('s') releases are exempt so an ALT that is itself
        // an alt-tab hotkey keeps working.
        if self.alt_tab_menu_is_visible
            && is_alt_vk(ctx.vk)
            && ctx.key_up
            && !matches!(self.history.event_type(ctx.history_idx), 'h' | 's')
        {
            self.alt_tab_menu_is_visible = false;
        }

        if disguise_win_alt
            && ctx.key_up
            && (matches!(ctx.vk, VK_LWIN | VK_RWIN) || is_alt_vk(ctx.vk))
        {
            // Suppress the real up and substitute a shift-wrapped one:
            // with shift held, neither the Start menu nor the window
            // menu bar activates. The up must still be sent in case the
            // original down went through (prefix but not suffix).
            self.key_event(KeyEventKind::Down, VK_SHIFT, 0);
            self.key_event(KeyEventKind::Up, ctx.vk, ctx.sc);
            self.key_event(KeyEventKind::Up, VK_SHIFT, 0);
            if self.history.event_type(ctx.history_idx) != 'h' {
                self.history.set_event_type(ctx.history_idx, 's');
            }
            return Verdict::Suppress;
        }

        Verdict::Pass
    }

    /// Post-verdict state maintenance for keyboard events: the
    /// driver-shift fix-up, the prior-event snapshot, and modifier
    /// tracking.
    fn update_key_state(&mut self, ctx: &EvCtx, suppressed: bool) {
        // If the immediately preceding event was a physical left/neutral
        // shift and this event implicates a dual-state numpad key, that
        // shift was the driver's, not the user's: undo its effect on
        // physical tracking, and when a restoring shift-down is still to
        // come, pre-classify it as non-physical too.
        if self.prior.physical
            && matches!(self.prior.vk, VK_LSHIFT | VK_SHIFT)
            && self.now_ms.wrapping_sub(self.prior.tick_ms) < SHIFT_WORKAROUND_MS
        {
            let current_is_dual_state = is_dual_state_numpad(ctx.vk, ctx.sc);
            // Down and up events of the current key both qualify: the
            // insertion case (shift snuck in while a numpad key is still
            // held) and the lazy-restore-on-up case.
            let fix_it = (!self.prior.key_up && self.any_pad_down())
                || (self.prior.key_up && ctx.key_up && current_is_dual_state);
            if fix_it {
                self.next_phantom_shift_down_not_physical = true;
            }
            if fix_it || (self.prior.key_up && current_is_dual_state) {
                self.physical_mods = self.prior.physical_mods;
                self.physical_down[VK_SHIFT as usize] = self.prior.shift_down;
                self.physical_down[VK_LSHIFT as usize] = self.prior.lshift_down;
            }
        }

        // Snapshot before this event's own effect: a later event may
        // prove this one was the driver's and need these to roll back.
        // Stored rather than inferred, since a shift-down does not
        // necessarily *change* the state to down.
        self.prior.physical_mods = self.physical_mods;
        self.prior.shift_down = self.physical_down[VK_SHIFT as usize];
        self.prior.lshift_down = self.physical_down[VK_LSHIFT as usize];

        // Modifier state is kept correct even for suppressed and ignored
        // events; substitutes for Alt-Tab and friends depend on it.
        if self.table.kvk[ctx.vk as usize].as_modifiers_lr.any() {
            self.update_modifier_state(ctx, suppressed);
        }

        self.prior.vk = ctx.vk;
        self.prior.sc = ctx.sc;
        self.prior.key_up = ctx.key_up;
        self.prior.physical = ctx.physical;
        self.prior.tick_ms = self.now_ms;
    }

    fn update_modifier_state(&mut self, ctx: &EvCtx, suppressed: bool) {
        let Some(route) = modifier_route(ctx.vk, ctx.sc) else {
            return;
        };
        if !suppressed {
            self.logical_mods.set(route.bit, !ctx.key_up);
        }
        if ctx.physical {
            self.physical_mods.set(route.bit, !ctx.key_up);
            self.physical_down[route.side_vk as usize] = !ctx.key_up;
            if let Some(pair) = route.neutral {
                // The neutral entry is derived: down iff either side is.
                self.physical_down[pair.neutral_vk as usize] = self.physical_down
                    [pair.left_vk as usize]
                    || self.physical_down[pair.right_vk as usize];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{SC_LSHIFT, VK_CAPITAL, VK_END, VK_HOME, VK_NUMPAD0, VK_SCROLL};
    use crate::table::HotkeyTableBuilder;
    use crate::types::KeySel;

    fn engine(build: impl FnOnce(&mut HotkeyTableBuilder)) -> Engine {
        let mut b = HotkeyTableBuilder::new();
        build(&mut b);
        let mut e = Engine::default();
        e.load_table(b.build());
        e
    }

    fn key(vk: u8, key_up: bool) -> KeyboardInput {
        let sc = fallback_scan(vk);
        let input = if key_up {
            KeyboardInput::up(vk, sc)
        } else {
            KeyboardInput::down(vk, sc)
        };
        if sc & 0x100 != 0 {
            input.extended()
        } else {
            input
        }
    }

    fn down(vk: u8) -> KeyboardInput {
        key(vk, false)
    }

    fn up(vk: u8) -> KeyboardInput {
        key(vk, true)
    }

    #[test]
    fn unconfigured_key_passes_through() {
        let mut e = engine(|_| {});
        assert_eq!(e.process_keyboard(down(b'Q')), Verdict::Pass);
        assert!(e.physical_key_down(b'Q'));
        assert_eq!(e.process_keyboard(up(b'Q')), Verdict::Pass);
        assert!(!e.physical_key_down(b'Q'));
        assert!(e.take_emissions().is_empty());
        assert!(e.take_fired().is_empty());
    }

    #[test]
    fn neutral_shift_entry_is_derived_from_sides() {
        let mut e = engine(|_| {});
        e.process_keyboard(down(VK_LSHIFT));
        assert!(e.physical_key_down(VK_SHIFT));
        e.process_keyboard(down(VK_RSHIFT));
        e.process_keyboard(up(VK_LSHIFT));
        // Right side still holds the neutral entry down.
        assert!(e.physical_key_down(VK_SHIFT));
        e.process_keyboard(up(VK_RSHIFT));
        assert!(!e.physical_key_down(VK_SHIFT));
        assert_eq!(e.physical_mods(), ModMask::NONE);
    }

    #[test]
    fn ignored_events_update_modifiers_but_not_records() {
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 1);
        });
        let tagged = KeyboardInput::down(VK_LSHIFT, SC_LSHIFT).tagged(ExtraInfo::IgnoreAsModifier);
        assert_eq!(e.process_keyboard(tagged), Verdict::Pass);
        assert!(e.logical_mods().intersects(ModMask::LSHIFT));
        // Injected: not physical.
        assert_eq!(e.physical_mods(), ModMask::NONE);

        let all = KeyboardInput::down(VK_CAPITAL, fallback_scan(VK_CAPITAL))
            .tagged(ExtraInfo::IgnoreAll);
        assert_eq!(e.process_keyboard(all), Verdict::Pass);
        assert!(!e.prefix_active());
        assert!(!e.table.kvk[VK_CAPITAL as usize].is_down);
        let up_tagged = KeyboardInput::up(VK_LSHIFT, SC_LSHIFT).tagged(ExtraInfo::IgnoreAsModifier);
        e.process_keyboard(up_tagged);
        assert_eq!(e.logical_mods(), ModMask::NONE);
    }

    #[test]
    fn phantom_shift_down_within_window_is_not_physical() {
        let mut e = engine(|_| {});
        e.set_numlock_on(true);
        // Numpad1 press/release with numlock on (END VK, non-extended).
        e.process_keyboard(down(VK_END).at(100));
        e.process_keyboard(up(VK_END).at(150));
        // Driver restores shift 5 ms later: must not count as physical.
        e.process_keyboard(down(VK_LSHIFT).at(155));
        assert_eq!(e.physical_mods(), ModMask::NONE);
        assert!(!e.physical_key_down(VK_LSHIFT));
        // But the OS still believes shift is down.
        assert!(e.logical_mods().intersects(ModMask::LSHIFT));
        e.process_keyboard(up(VK_LSHIFT).at(160));
    }

    #[test]
    fn shift_down_outside_window_is_physical() {
        let mut e = engine(|_| {});
        e.set_numlock_on(true);
        e.process_keyboard(down(VK_END).at(100));
        e.process_keyboard(up(VK_END).at(150));
        e.process_keyboard(down(VK_LSHIFT).at(200));
        assert!(e.physical_mods().intersects(ModMask::LSHIFT));
    }

    #[test]
    fn pad_state_requires_numlock_on() {
        let mut e = engine(|_| {});
        e.set_numlock_on(false);
        e.process_keyboard(down(VK_HOME).at(0));
        assert!(!e.any_pad_down());
        e.process_keyboard(up(VK_HOME).at(10));

        e.set_numlock_on(true);
        e.process_keyboard(down(VK_HOME).at(100));
        assert!(e.any_pad_down());
        e.process_keyboard(up(VK_HOME).at(120));
        assert!(!e.any_pad_down());
    }

    #[test]
    fn prefix_down_is_suppressed_and_repeat_short_circuits() {
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 9);
        });
        assert_eq!(e.process_keyboard(down(VK_CAPITAL)), Verdict::Suppress);
        assert!(e.prefix_active());
        // Auto-repeat of the held prefix.
        assert_eq!(e.process_keyboard(down(VK_CAPITAL)), Verdict::Suppress);
        assert_eq!(e.process_keyboard(up(VK_CAPITAL)), Verdict::Suppress);
        assert!(!e.prefix_active());
    }

    #[test]
    fn combo_fires_and_suppresses_all_four_events() {
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 42);
        });
        assert_eq!(e.process_keyboard(down(VK_CAPITAL)), Verdict::Suppress);
        assert_eq!(e.process_keyboard(down(b'A')), Verdict::Suppress);
        assert_eq!(e.process_keyboard(up(b'A')), Verdict::Suppress);
        assert_eq!(e.process_keyboard(up(VK_CAPITAL)), Verdict::Suppress);
        let fired = e.take_fired();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, 42);
    }

    #[test]
    fn modified_hotkey_fires_on_down_and_swallows_up() {
        let mut e = engine(|b| {
            b.modified(ModMask::LCTRL, KeySel::Vk(b'A'), 7);
        });
        e.process_keyboard(down(VK_LCONTROL));
        assert_eq!(e.process_keyboard(down(b'A')), Verdict::Suppress);
        assert_eq!(e.take_fired(), vec![FiredHotkey { id: 7, dismiss_menus: false }]);
        assert_eq!(e.process_keyboard(up(b'A')), Verdict::Suppress);
        assert_eq!(e.process_keyboard(up(VK_LCONTROL)), Verdict::Pass);
    }

    #[test]
    fn no_suppress_down_hotkey_replays_the_key() {
        let mut e = engine(|b| {
            b.modified_no_suppress(ModMask::LCTRL, KeySel::Vk(b'B'), 3);
        });
        e.process_keyboard(down(VK_LCONTROL));
        assert_eq!(e.process_keyboard(down(b'B')), Verdict::Suppress);
        let emitted = e.take_emissions();
        assert_eq!(
            emitted,
            vec![
                Emission { vk: b'B', sc: fallback_scan(b'B'), key_up: false },
                Emission { vk: b'B', sc: fallback_scan(b'B'), key_up: true },
            ]
        );
    }

    #[test]
    fn numlock_suppression_restores_toggle_state() {
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(VK_NUMLOCK), KeySel::Vk(VK_NUMPAD0), 5);
        });
        assert_eq!(e.process_keyboard(down(VK_NUMLOCK)), Verdict::Suppress);
        let emitted = e.take_emissions();
        let transitions: Vec<bool> = emitted
            .iter()
            .filter(|em| em.vk == VK_NUMLOCK)
            .map(|em| em.key_up)
            .collect();
        assert_eq!(transitions, vec![true, false, true, false]);
        // All four replays were recorded as ignored, not dispatched.
        assert_eq!(
            e.history().iter().filter(|s| s.event_type == 'i').count(),
            4
        );
    }

    #[test]
    fn capslock_toggle_restored_after_hotkey() {
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 11);
            b.force_toggle(KeySel::Vk(VK_CAPITAL), ToggleValue::Neutral);
        });
        // Neutral-toggle prefix passes through on down.
        assert_eq!(e.process_keyboard(down(VK_CAPITAL)), Verdict::Pass);
        assert_eq!(e.process_keyboard(down(b'A')), Verdict::Suppress);
        assert_eq!(e.process_keyboard(up(b'A')), Verdict::Suppress);
        // The release is replaced with up/down/up to undo the toggle.
        assert_eq!(e.process_keyboard(up(VK_CAPITAL)), Verdict::Suppress);
        let caps: Vec<bool> = e
            .take_emissions()
            .iter()
            .filter(|em| em.vk == VK_CAPITAL)
            .map(|em| em.key_up)
            .collect();
        assert_eq!(caps, vec![true, false, true]);
    }

    #[test]
    fn forced_toggle_key_is_suppressed_outside_ignore_path() {
        let mut e = engine(|b| {
            b.force_toggle(KeySel::Vk(VK_SCROLL), ToggleValue::AlwaysOff);
        });
        assert_eq!(e.process_keyboard(down(VK_SCROLL)), Verdict::Suppress);
        assert_eq!(e.process_keyboard(up(VK_SCROLL)), Verdict::Suppress);
    }

    #[test]
    fn wheel_maps_to_pseudo_keys() {
        let mut e = engine(|b| {
            b.modified(ModMask::NONE, KeySel::Vk(VK_WHEEL_DOWN), 21);
        });
        assert_eq!(e.process_pointer(PointerInput::wheel(-120)), Verdict::Suppress);
        assert_eq!(e.take_fired()[0].id, 21);
        // Upward wheel is unconfigured here.
        assert_eq!(e.process_pointer(PointerInput::wheel(120)), Verdict::Pass);
    }

    #[test]
    fn pointer_motion_only_touches_the_clock() {
        let mut e = engine(|_| {});
        let before = e.history().recorded();
        assert_eq!(
            e.process_pointer(PointerInput::motion().at(77)),
            Verdict::Pass
        );
        assert_eq!(e.time_of_last_physical_input(), 77);
        assert_eq!(e.history().recorded(), before);
    }

    #[test]
    fn stray_ups_without_downs() {
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(b'A'), KeySel::Vk(b'B'), 2);
        });
        // An unused non-modifier prefix release stays suppressed.
        assert_eq!(e.process_keyboard(up(b'A')), Verdict::Suppress);
        // A pure suffix up with no tracked down passes through.
        assert_eq!(e.process_keyboard(up(b'B')), Verdict::Pass);
    }

    #[test]
    fn prefix_fallthrough_fires_key_up_hotkey() {
        // RControl & RShift = id 1; RShift & RControl = id 2.
        // Pressing and releasing RShift alone must fire nothing from the
        // down, then fall through Case 3 into Case 4 on the up.
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(VK_RCONTROL), KeySel::Vk(VK_RSHIFT), 1);
            b.combo(KeySel::Vk(VK_RSHIFT), KeySel::Vk(VK_RCONTROL), 2);
            b.modified(ModMask::NONE, KeySel::Vk(VK_RSHIFT), 33);
        });
        assert_eq!(e.process_keyboard(down(VK_RSHIFT)), Verdict::Pass);
        assert!(e.prefix_active());
        // The up falls through into suffix lookup with RSHIFT's own bit
        // removed from the mask, matching the bare definition.
        let v = e.process_keyboard(up(VK_RSHIFT));
        assert_eq!(e.take_fired(), vec![FiredHotkey { id: 33, dismiss_menus: false }]);
        // Modifier key-up hotkey: passes through (disguise only for
        // WIN/ALT).
        assert_eq!(v, Verdict::Pass);
    }

    #[test]
    fn history_tags_hotkey_and_suppressed_events() {
        let mut e = engine(|b| {
            b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 4);
        });
        e.process_keyboard(down(VK_CAPITAL));
        e.process_keyboard(down(b'A'));
        let types: Vec<char> = e.history().iter().map(|s| s.event_type).collect();
        assert_eq!(types, vec!['s', 'h']);
    }

    #[test]
    fn title_provider_feeds_history() {
        let mut e = engine(|_| {});
        e.set_title_provider(|| "some window".to_string());
        e.process_keyboard(down(b'Q'));
        assert_eq!(e.history().latest().unwrap().window_title, "some window");
    }
}
