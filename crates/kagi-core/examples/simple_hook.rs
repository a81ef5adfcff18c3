//! Minimal live demo: CapsLock & J fires hotkey 1, Win+E is intercepted
//! as hotkey 2, and the middle button + wheel drives alt-tab.

#[cfg(windows)]
fn main() -> anyhow::Result<()> {
    use kagi_core::keys::{VK_MBUTTON, VK_WHEEL_DOWN, VK_WHEEL_UP};
    use kagi_core::table::{HOTKEY_ID_ALT_TAB, HOTKEY_ID_ALT_TAB_SHIFT};
    use kagi_core::{engine, hook, HotkeyTableBuilder, KeySel, ModMask};

    tracing_subscriber::fmt::init();

    let mut b = HotkeyTableBuilder::new();
    b.combo(KeySel::Vk(0x14), KeySel::Vk(b'J'), 1); // CapsLock & J
    b.modified(ModMask::LWIN, KeySel::Vk(b'E'), 2);
    b.combo(
        KeySel::Vk(VK_MBUTTON),
        KeySel::Vk(VK_WHEEL_DOWN),
        HOTKEY_ID_ALT_TAB,
    );
    b.combo(
        KeySel::Vk(VK_MBUTTON),
        KeySel::Vk(VK_WHEEL_UP),
        HOTKEY_ID_ALT_TAB_SHIFT,
    );
    engine::ENGINE.lock().load_table(b.build());

    let fired = hook::fired_hotkeys();
    std::thread::spawn(move || {
        for f in fired.iter() {
            println!("hotkey fired: id={} dismiss_menus={}", f.id, f.dismiss_menus);
        }
    });

    hook::install_hooks()?;
    hook::run_event_loop();
    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("This example drives the OS hooks and only runs on Windows.");
}
