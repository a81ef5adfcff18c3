use kagi_core::engine::Engine;
use kagi_core::keys::{
    fallback_scan, VK_CAPITAL, VK_CONTROL, VK_END, VK_LCONTROL, VK_LMENU, VK_LSHIFT, VK_LWIN,
    VK_MBUTTON, VK_MENU, VK_NUMLOCK, VK_RBUTTON, VK_RCONTROL, VK_RMENU, VK_RSHIFT, VK_SHIFT,
    VK_TAB, VK_WHEEL_DOWN,
};
use kagi_core::table::{HotkeyTableBuilder, HOTKEY_ID_ALT_TAB, HOTKEY_ID_ALT_TAB_SHIFT};
use kagi_core::types::{
    Emission, ExtraInfo, KeyboardInput, PointerButton, PointerInput, ToggleValue,
};
use kagi_core::{KeySel, ModMask, Verdict};

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

fn down_at(e: &mut Engine, vk: u8, t: u32) -> Verdict {
    e.process_keyboard(key(vk, false).at(t))
}

fn up_at(e: &mut Engine, vk: u8, t: u32) -> Verdict {
    e.process_keyboard(key(vk, true).at(t))
}

fn em(vk: u8, key_up: bool) -> Emission {
    Emission {
        vk,
        sc: fallback_scan(vk),
        key_up,
    }
}

/// Physical neutral entries must always equal the OR of their sides.
fn assert_neutral_consistent(e: &Engine) {
    for (neutral, left, right) in [
        (VK_SHIFT, VK_LSHIFT, VK_RSHIFT),
        (VK_CONTROL, VK_LCONTROL, VK_RCONTROL),
        (VK_MENU, VK_LMENU, VK_RMENU),
    ] {
        assert_eq!(
            e.physical_key_down(neutral),
            e.physical_key_down(left) || e.physical_key_down(right),
            "neutral entry for {neutral:#x} out of sync"
        );
    }
}

// S1: the driver's shift events around a dual-state numpad key must not
// corrupt physical tracking.
#[test]
fn s1_numpad_with_shift_keeps_physical_state() {
    let mut e = engine(|_| {});
    e.set_numlock_on(true);

    // User presses and holds shift.
    assert_eq!(down_at(&mut e, VK_LSHIFT, 0), Verdict::Pass);
    assert!(e.physical_mods().intersects(ModMask::LSHIFT));

    // Driver releases shift for the numpad press; at this instant it is
    // indistinguishable from a real release.
    assert_eq!(up_at(&mut e, VK_LSHIFT, 100), Verdict::Pass);

    // Numpad1 arrives (as its navigation VK, shift defeats numlock)
    // 2 ms later: the workaround recognizes the release as the driver's
    // and rolls physical state back.
    assert_eq!(down_at(&mut e, VK_END, 102), Verdict::Pass);
    assert!(
        e.physical_mods().intersects(ModMask::LSHIFT),
        "driver shift-up must be undone"
    );
    assert_neutral_consistent(&e);

    assert_eq!(up_at(&mut e, VK_END, 150), Verdict::Pass);

    // Driver restores shift; classified non-physical via the window.
    assert_eq!(down_at(&mut e, VK_LSHIFT, 152), Verdict::Pass);
    assert!(
        e.physical_mods().intersects(ModMask::LSHIFT),
        "restore is not a new physical press"
    );
    assert!(e.logical_mods().intersects(ModMask::LSHIFT));

    // The real release, much later.
    assert_eq!(up_at(&mut e, VK_LSHIFT, 900), Verdict::Pass);
    assert_eq!(e.physical_mods(), ModMask::NONE);
    assert_eq!(e.logical_mods(), ModMask::NONE);
    assert_neutral_consistent(&e);
    assert!(e.take_emissions().is_empty());
}

// S2: CapsLock & A fires exactly once, all four events suppressed, and
// the CapsLock toggle state never changes (its down never reached the
// system).
#[test]
fn s2_prefix_suffix_hotkey_round_trip() {
    let mut e = engine(|b| {
        b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 42);
    });
    assert_eq!(down_at(&mut e, VK_CAPITAL, 0), Verdict::Suppress);
    assert_eq!(down_at(&mut e, b'A', 50), Verdict::Suppress);
    assert_eq!(up_at(&mut e, b'A', 120), Verdict::Suppress);
    assert_eq!(up_at(&mut e, VK_CAPITAL, 200), Verdict::Suppress);

    let fired = e.take_fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].id, 42);
    // No compensating events were needed: CapsLock never toggled.
    assert!(e.take_emissions().is_empty());
}

// S3a: a WIN key used as a custom prefix gets its release disguised
// after firing, so the Start menu stays closed.
#[test]
fn s3_win_prefix_release_is_disguised() {
    let mut e = engine(|b| {
        b.combo(KeySel::Vk(VK_LWIN), KeySel::Vk(b'E'), 8);
    });
    assert_eq!(down_at(&mut e, VK_LWIN, 0), Verdict::Pass);
    assert_eq!(down_at(&mut e, b'E', 40), Verdict::Suppress);
    assert_eq!(up_at(&mut e, b'E', 80), Verdict::Suppress);
    e.take_emissions();

    // The release is replaced by a shift-wrapped sequence.
    assert_eq!(up_at(&mut e, VK_LWIN, 120), Verdict::Suppress);
    assert_eq!(
        e.take_emissions(),
        vec![em(VK_SHIFT, false), em(VK_LWIN, true), em(VK_SHIFT, true)]
    );
    assert_eq!(e.take_fired().len(), 1);
}

// S3b: a WIN key that merely modified a mask-matched hotkey passes
// through on down, and its armed disguise claims the release.
#[test]
fn s3_win_mask_hotkey_arms_disguise() {
    let mut e = engine(|b| {
        b.modified(ModMask::LWIN, KeySel::Vk(b'E'), 9);
    });
    assert_eq!(down_at(&mut e, VK_LWIN, 0), Verdict::Pass);
    assert_eq!(down_at(&mut e, b'E', 40), Verdict::Suppress);
    assert_eq!(e.take_fired()[0].id, 9);
    assert_eq!(up_at(&mut e, b'E', 80), Verdict::Suppress);

    assert_eq!(up_at(&mut e, VK_LWIN, 120), Verdict::Suppress);
    assert_eq!(
        e.take_emissions(),
        vec![em(VK_SHIFT, false), em(VK_LWIN, true), em(VK_SHIFT, true)]
    );
}

// A bare WIN press with no hotkey activity is left entirely alone.
#[test]
fn s3_win_without_hotkey_is_untouched() {
    let mut e = engine(|b| {
        b.modified(ModMask::LWIN, KeySel::Vk(b'E'), 9);
    });
    assert_eq!(down_at(&mut e, VK_LWIN, 0), Verdict::Pass);
    assert_eq!(up_at(&mut e, VK_LWIN, 50), Verdict::Pass);
    assert!(e.take_emissions().is_empty());
}

// S4: middle button + wheel as an alt-tab driver. The first step puts
// the substitute ALT down and trips the menu-visible heuristic via its
// own injected TAB; the prefix release lifts ALT and clears it.
#[test]
fn s4_pointer_driven_alt_tab() {
    let mut e = engine(|b| {
        b.combo(
            KeySel::Vk(VK_MBUTTON),
            KeySel::Vk(VK_WHEEL_DOWN),
            HOTKEY_ID_ALT_TAB,
        );
    });

    assert_eq!(
        e.process_pointer(PointerInput::button_down(PointerButton::Middle).at(0)),
        Verdict::Suppress
    );
    assert!(e.prefix_active());

    assert_eq!(
        e.process_pointer(PointerInput::wheel(-120).at(20)),
        Verdict::Suppress
    );
    assert_eq!(
        e.take_emissions(),
        vec![em(VK_MENU, false), em(VK_TAB, false), em(VK_TAB, true)]
    );
    assert!(e.alt_tab_menu_visible());

    // Second notch: ALT is already held by us.
    assert_eq!(
        e.process_pointer(PointerInput::wheel(-120).at(40)),
        Verdict::Suppress
    );
    assert_eq!(e.take_emissions(), vec![em(VK_TAB, false), em(VK_TAB, true)]);

    // Releasing the prefix releases our ALT, which dismisses the menu.
    assert_eq!(
        e.process_pointer(PointerInput::button_up(PointerButton::Middle).at(60)),
        Verdict::Suppress
    );
    assert_eq!(e.take_emissions(), vec![em(VK_MENU, true)]);
    assert!(!e.alt_tab_menu_visible());
    assert!(!e.prefix_active());
    // Alt-tab is handled inline; nothing reaches the host.
    assert!(e.take_fired().is_empty());
}

// Shifted alt-tab from a numpad digit suffix lifts the transient shift
// between steps so the digit's release VK matches its press.
#[test]
fn s4_shift_alt_tab_numpad_restores_shift() {
    let mut e = engine(|b| {
        b.combo(
            KeySel::Vk(VK_MBUTTON),
            KeySel::Vk(0x61), // Numpad1
            HOTKEY_ID_ALT_TAB_SHIFT,
        );
    });
    e.process_pointer(PointerInput::button_down(PointerButton::Middle).at(0));
    assert_eq!(down_at(&mut e, 0x61, 20), Verdict::Suppress);
    assert_eq!(
        e.take_emissions(),
        vec![
            em(VK_MENU, false),
            em(VK_SHIFT, false),
            em(VK_TAB, false),
            em(VK_TAB, true),
            em(VK_SHIFT, true),
        ]
    );
}

// S5: a suppressed Numlock down is followed by a tagged up/down/up/down
// replay so the LED and OS state settle back where they were.
#[test]
fn s5_numlock_led_restore() {
    let mut e = engine(|b| {
        b.combo(KeySel::Vk(VK_NUMLOCK), KeySel::Vk(0x61), 5);
    });
    assert_eq!(down_at(&mut e, VK_NUMLOCK, 0), Verdict::Suppress);
    assert_eq!(
        e.take_emissions(),
        vec![
            em(VK_NUMLOCK, true),
            em(VK_NUMLOCK, false),
            em(VK_NUMLOCK, true),
            em(VK_NUMLOCK, false),
        ]
    );
}

// S6: Win-L is about to lock the workstation; tracking resets so no key
// reads as held after re-logon.
#[test]
fn s6_win_l_lock_resets_tracking() {
    let mut e = engine(|_| {});
    assert_eq!(down_at(&mut e, VK_LWIN, 0), Verdict::Pass);
    assert_eq!(down_at(&mut e, b'L', 30), Verdict::Pass);
    assert_eq!(e.logical_mods(), ModMask::NONE);
    assert_eq!(e.physical_mods(), ModMask::NONE);
    assert!(!e.physical_key_down(VK_LWIN));
    assert!(!e.physical_key_down(b'L'));
}

// Suppressing a modifier suffix must not leak into the logical mask.
#[test]
fn suppressed_modifier_leaves_logical_state_alone() {
    let mut e = engine(|b| {
        b.modified(ModMask::LCTRL, KeySel::Vk(VK_RSHIFT), 6);
    });
    assert_eq!(down_at(&mut e, VK_LCONTROL, 0), Verdict::Pass);
    assert_eq!(down_at(&mut e, VK_RSHIFT, 30), Verdict::Suppress);
    assert_eq!(e.take_fired()[0].id, 6);
    assert!(
        !e.logical_mods().intersects(ModMask::RSHIFT),
        "suppressed shift must not appear logically down"
    );
    // Physically it is down regardless.
    assert!(e.physical_mods().intersects(ModMask::RSHIFT));
    assert_eq!(up_at(&mut e, VK_RSHIFT, 60), Verdict::Suppress);
    assert_eq!(up_at(&mut e, VK_LCONTROL, 90), Verdict::Pass);
    assert_eq!(e.logical_mods(), ModMask::NONE);
}

// Self-tagged events pass through and leave dispatch state untouched.
#[test]
fn ignored_replays_are_idempotent() {
    let mut e = engine(|b| {
        b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 1);
    });
    let tagged =
        KeyboardInput::down(VK_CAPITAL, fallback_scan(VK_CAPITAL)).tagged(ExtraInfo::IgnoreAll);
    assert_eq!(e.process_keyboard(tagged), Verdict::Pass);
    assert!(!e.prefix_active());
    assert_eq!(e.history().latest().unwrap().event_type, 'i');
}

// The alt-tab visibility heuristic: a physical ALT+TAB shows the menu,
// the ALT release hides it.
#[test]
fn alt_tab_heuristic_tracks_menu_visibility() {
    let mut e = engine(|_| {});
    down_at(&mut e, VK_LMENU, 0);
    down_at(&mut e, VK_TAB, 20);
    assert!(e.alt_tab_menu_visible());
    up_at(&mut e, VK_TAB, 40);
    up_at(&mut e, VK_LMENU, 60);
    assert!(!e.alt_tab_menu_visible());
}

// A pointer hotkey marked no-mouse-suppress keeps its native click when
// fired bare, and the host is told to clean up after that click.
#[test]
fn no_mouse_suppress_lets_native_click_through() {
    let mut e = engine(|b| {
        b.modified(ModMask::NONE, KeySel::Vk(VK_RBUTTON), 13);
        b.no_mouse_suppress(VK_RBUTTON);
    });
    assert_eq!(
        e.process_pointer(PointerInput::button_down(PointerButton::Right).at(0)),
        Verdict::Pass
    );
    let fired = e.take_fired();
    assert_eq!(fired[0].id, 13);
    assert!(fired[0].dismiss_menus);
    assert_eq!(
        e.process_pointer(PointerInput::button_up(PointerButton::Right).at(40)),
        Verdict::Pass
    );

    // Modified, the same hotkey suppresses normally.
    let mut e = engine(|b| {
        b.modified(ModMask::LCTRL, KeySel::Vk(VK_RBUTTON), 14);
        b.no_mouse_suppress(VK_RBUTTON);
    });
    down_at(&mut e, VK_LCONTROL, 0);
    assert_eq!(
        e.process_pointer(PointerInput::button_down(PointerButton::Right).at(20)),
        Verdict::Suppress
    );
    assert!(!e.take_fired()[0].dismiss_menus);
}

// A prefix that is also a bare key-up suffix: the release falls through
// Case 3 into suffix lookup, and a no-suppress definition gets a
// compensating down for its suppressed press.
#[test]
fn key_up_hotkey_with_no_suppress_replays_the_down() {
    let mut e = engine(|b| {
        b.combo(KeySel::Vk(b'A'), KeySel::Vk(b'B'), 1);
        b.modified_no_suppress(ModMask::NONE, KeySel::Vk(b'A'), 2);
    });
    assert_eq!(down_at(&mut e, b'A', 0), Verdict::Suppress);
    let v = up_at(&mut e, b'A', 60);
    assert_eq!(e.take_fired(), vec![kagi_core::FiredHotkey { id: 2, dismiss_menus: false }]);
    assert_eq!(v, Verdict::Pass);
    assert_eq!(e.take_emissions(), vec![em(b'A', false)]);
}

// A toggleable prefix under user control: unused hold toggles normally,
// a hold that fired gets its toggle undone.
#[test]
fn neutral_toggle_prefix_preserves_toggle_semantics() {
    let mut e = engine(|b| {
        b.combo(KeySel::Vk(VK_CAPITAL), KeySel::Vk(b'A'), 3);
        b.force_toggle(KeySel::Vk(VK_CAPITAL), ToggleValue::Neutral);
    });
    // Tap without using it: down and up both pass, key toggles.
    assert_eq!(down_at(&mut e, VK_CAPITAL, 0), Verdict::Pass);
    assert_eq!(up_at(&mut e, VK_CAPITAL, 40), Verdict::Pass);
    assert!(e.take_emissions().is_empty());

    // Hold, fire, release: release replaced with up/down/up.
    assert_eq!(down_at(&mut e, VK_CAPITAL, 100), Verdict::Pass);
    assert_eq!(down_at(&mut e, b'A', 140), Verdict::Suppress);
    assert_eq!(up_at(&mut e, b'A', 180), Verdict::Suppress);
    assert_eq!(up_at(&mut e, VK_CAPITAL, 220), Verdict::Suppress);
    assert_eq!(
        e.take_emissions(),
        vec![em(VK_CAPITAL, true), em(VK_CAPITAL, false), em(VK_CAPITAL, true)]
    );
}
