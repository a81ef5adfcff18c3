//! OS-facing layer: installs the low-level keyboard and mouse hooks,
//! feeds their events through the engine, injects the engine's
//! synthesized key events, and relays hotkey firings to the host.
//!
//! The hook procedures must return fast and never block; everything
//! heavier than the engine's own dispatch (which is allocation-light and
//! lock-free beyond the single engine mutex) is kept out of them.

use crate::engine::ENGINE;
use crate::types::{
    Emission, ExtraInfo, FiredHotkey, KeyboardInput, PointerAction, PointerButton, PointerInput,
    Verdict, EXTRA_INFO_IGNORE, EXTRA_INFO_IGNORE_ALL,
};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetKeyState, GetLastInputInfo, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, LASTINPUTINFO, VIRTUAL_KEY,
    VK_NUMLOCK,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetForegroundWindow, GetMessageW, GetWindowTextW,
    PeekMessageW, PostMessageW, PostThreadMessageW, SetWindowsHookExW, TranslateMessage,
    UnhookWindowsHookEx, HC_ACTION, HHOOK, KBDLLHOOKSTRUCT, LLKHF_EXTENDED, LLKHF_INJECTED,
    LLMHF_INJECTED, MSG, MSLLHOOKSTRUCT, PEEK_MESSAGE_REMOVE_TYPE, WH_KEYBOARD_LL, WH_MOUSE_LL,
    WM_APP, WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEMOVE,
    WM_MOUSEWHEEL, WM_NCXBUTTONDOWN, WM_NCXBUTTONUP, WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYUP,
    WM_XBUTTONDOWN, WM_XBUTTONUP, XBUTTON1,
};

/// Posted to the host window (if one is registered) for every fired
/// hotkey: `wparam` = hotkey id, `lparam` = 1 when the host should also
/// dismiss menus a surviving mouse click opened.
pub const WM_HOOK_HOTKEY_FIRED: u32 = WM_APP + 0x4B;

const WM_HOOK_REINSTALL: u32 = WM_APP + 0x4C;

const HOST_QUEUE_SIZE: usize = 64;
const WATCHDOG_INTERVAL_MS: u64 = 1000;
const HOOK_STALL_MS: u64 = 5000;
const INPUT_RECENT_MS: u64 = 2000;
const REINSTALL_BACKOFF_MS: u64 = 10000;

static KEYBOARD_HOOK: Mutex<Option<HHOOK>> = Mutex::new(None);
static MOUSE_HOOK: Mutex<Option<HHOOK>> = Mutex::new(None);
static HOOK_THREAD_ID: AtomicU32 = AtomicU32::new(0);
static HOST_WINDOW: AtomicIsize = AtomicIsize::new(0);
static WATCHDOG_STARTED: AtomicBool = AtomicBool::new(false);
static LAST_HOOK_MS: AtomicU64 = AtomicU64::new(0);
static LAST_REINSTALL_MS: AtomicU64 = AtomicU64::new(0);
static START_INSTANT: OnceLock<std::time::Instant> = OnceLock::new();

lazy_static::lazy_static! {
    static ref HOST_QUEUE: (Sender<FiredHotkey>, Receiver<FiredHotkey>) =
        crossbeam_channel::bounded(HOST_QUEUE_SIZE);
}

fn monotonic_ms() -> u64 {
    let start = START_INSTANT.get_or_init(std::time::Instant::now);
    start.elapsed().as_millis() as u64
}

/// Receiver side of the hotkey channel; the host drains this from its
/// own thread.
pub fn fired_hotkeys() -> Receiver<FiredHotkey> {
    HOST_QUEUE.1.clone()
}

/// Also post `WM_HOOK_HOTKEY_FIRED` to this window for every firing.
pub fn set_host_window(hwnd: isize) {
    HOST_WINDOW.store(hwnd, Ordering::Release);
}

/// Install both low-level hooks. Must be called from a thread that pumps
/// messages (`run_event_loop` or equivalent).
pub fn install_hooks() -> anyhow::Result<()> {
    ensure_watchdog_thread();

    {
        let mut engine = ENGINE.lock();
        engine.set_title_provider(foreground_window_title);
    }

    info!("Installing keyboard and mouse hooks...");

    // Avoid leaking old handles if this is a reinstall request.
    uninstall_hooks();

    let kb = unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), None, 0) }?;
    if kb.is_invalid() {
        return Err(anyhow::anyhow!("keyboard hook installation failed"));
    }
    *KEYBOARD_HOOK.lock().unwrap() = Some(kb);

    let mouse = unsafe { SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_proc), None, 0) };
    let mouse = match mouse {
        Ok(h) if !h.is_invalid() => h,
        other => {
            uninstall_hooks();
            return Err(anyhow::anyhow!("mouse hook installation failed: {:?}", other));
        }
    };
    *MOUSE_HOOK.lock().unwrap() = Some(mouse);

    info!("Hooks installed. keyboard={:?} mouse={:?}", kb, mouse);
    Ok(())
}

pub fn uninstall_hooks() {
    for (name, slot) in [("keyboard", &KEYBOARD_HOOK), ("mouse", &MOUSE_HOOK)] {
        let mut handle = slot.lock().unwrap();
        if let Some(h) = handle.take() {
            unsafe {
                let _ = UnhookWindowsHookEx(h);
            }
            info!("{name} hook uninstalled.");
        }
    }
}

/// Blocking message loop; a convenience helper for a dedicated hook
/// thread.
pub fn run_event_loop() {
    info!("Starting hook message loop...");
    HOOK_THREAD_ID.store(unsafe { GetCurrentThreadId() }, Ordering::Release);
    let mut msg = MSG::default();
    unsafe {
        // Force message queue creation before anything can post to us.
        let _ = PeekMessageW(&mut msg, None, 0, 0, PEEK_MESSAGE_REMOVE_TYPE(0));

        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            if msg.message == WM_HOOK_REINSTALL {
                if let Err(e) = install_hooks() {
                    error!("Failed to reinstall hooks: {e}");
                } else {
                    info!("Hooks reinstalled by watchdog.");
                }
                continue;
            }
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
    info!("Hook message loop exited.");
}

fn foreground_window_title() -> String {
    unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.is_invalid() {
            return String::new();
        }
        let mut buf = [0u16; 128];
        let len = GetWindowTextW(hwnd, &mut buf);
        String::from_utf16_lossy(&buf[..len.max(0) as usize])
    }
}

fn numlock_toggled_on() -> bool {
    unsafe { GetKeyState(VK_NUMLOCK.0 as i32) & 1 != 0 }
}

/// Inject one synthesized key transition, tagged so the hook drops it on
/// re-entry (its state effect was already applied at synthesis time).
fn inject_key(em: Emission) {
    let mut flags = KEYBD_EVENT_FLAGS(0);
    if em.sc & 0x100 != 0 {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }
    if em.key_up {
        flags |= KEYEVENTF_KEYUP;
    }
    let input = INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(em.vk as u16),
                wScan: em.sc & 0xFF,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: EXTRA_INFO_IGNORE,
            },
        },
    };
    unsafe {
        SendInput(&[input], std::mem::size_of::<INPUT>() as i32);
    }
}

fn deliver_fired(fired: Vec<FiredHotkey>) {
    let host = HOST_WINDOW.load(Ordering::Acquire);
    for f in fired {
        match HOST_QUEUE.0.try_send(f) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(id = f.id, "host queue full; hotkey dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
        if host != 0 {
            // Best effort; a vanished host window is its own problem.
            let _ = unsafe {
                PostMessageW(
                    Some(HWND(host as *mut _)),
                    WM_HOOK_HOTKEY_FIRED,
                    WPARAM(f.id as usize),
                    LPARAM(if f.dismiss_menus { 1 } else { 0 }),
                )
            };
        }
    }
}

fn drain_engine_output(emissions: Vec<Emission>, fired: Vec<FiredHotkey>) {
    for em in emissions {
        inject_key(em);
    }
    deliver_fired(fired);
}

unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let result = catch_unwind(AssertUnwindSafe(|| {
        LAST_HOOK_MS.store(monotonic_ms(), Ordering::Relaxed);

        if code < HC_ACTION as i32 {
            return CallNextHookEx(None, code, wparam, lparam);
        }

        let kbd = &*(lparam.0 as *const KBDLLHOOKSTRUCT);

        // Our own injections already had their state effect applied when
        // they were synthesized; hand them straight to the system.
        if kbd.dwExtraInfo == EXTRA_INFO_IGNORE || kbd.dwExtraInfo == EXTRA_INFO_IGNORE_ALL {
            return CallNextHookEx(None, code, wparam, lparam);
        }

        let msg = wparam.0 as u32;
        let input = KeyboardInput {
            vk: kbd.vkCode as u8,
            scan: kbd.scanCode as u16,
            key_up: msg == WM_KEYUP || msg == WM_SYSKEYUP,
            injected: kbd.flags.0 & LLKHF_INJECTED.0 != 0,
            extended: kbd.flags.0 & LLKHF_EXTENDED.0 != 0,
            extra: ExtraInfo::from_raw(kbd.dwExtraInfo),
            time_ms: kbd.time,
        };

        let (verdict, emissions, fired) = {
            let mut engine = ENGINE.lock();
            engine.set_numlock_on(numlock_toggled_on());
            let verdict = engine.process_keyboard(input);
            (verdict, engine.take_emissions(), engine.take_fired())
        };
        drain_engine_output(emissions, fired);

        match verdict {
            Verdict::Suppress => LRESULT(1),
            Verdict::Pass => CallNextHookEx(None, code, wparam, lparam),
        }
    }));

    match result {
        Ok(res) => res,
        Err(_) => {
            error!("Panic in keyboard_proc; falling back to CallNextHookEx");
            CallNextHookEx(None, code, wparam, lparam)
        }
    }
}

unsafe extern "system" fn mouse_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let result = catch_unwind(AssertUnwindSafe(|| {
        LAST_HOOK_MS.store(monotonic_ms(), Ordering::Relaxed);

        // Evaluate before touching wparam/lparam; they are untrustworthy
        // for negative codes.
        if code < HC_ACTION as i32 {
            return CallNextHookEx(None, code, wparam, lparam);
        }

        let mhs = &*(lparam.0 as *const MSLLHOOKSTRUCT);

        if mhs.dwExtraInfo == EXTRA_INFO_IGNORE || mhs.dwExtraInfo == EXTRA_INFO_IGNORE_ALL {
            return CallNextHookEx(None, code, wparam, lparam);
        }

        let action = match wparam.0 as u32 {
            WM_MOUSEMOVE => PointerAction::Motion,
            WM_MOUSEWHEEL => PointerAction::Wheel {
                delta: (mhs.mouseData >> 16) as i16,
            },
            WM_LBUTTONDOWN => button(PointerButton::Left, false),
            WM_LBUTTONUP => button(PointerButton::Left, true),
            WM_RBUTTONDOWN => button(PointerButton::Right, false),
            WM_RBUTTONUP => button(PointerButton::Right, true),
            WM_MBUTTONDOWN => button(PointerButton::Middle, false),
            WM_MBUTTONUP => button(PointerButton::Middle, true),
            WM_XBUTTONDOWN | WM_NCXBUTTONDOWN => button(xbutton(mhs.mouseData), false),
            WM_XBUTTONUP | WM_NCXBUTTONUP => button(xbutton(mhs.mouseData), true),
            _ => return CallNextHookEx(None, code, wparam, lparam),
        };

        let input = PointerInput {
            action,
            injected: mhs.flags & LLMHF_INJECTED != 0,
            extra: ExtraInfo::from_raw(mhs.dwExtraInfo),
            time_ms: mhs.time,
        };

        let (verdict, emissions, fired) = {
            let mut engine = ENGINE.lock();
            engine.set_numlock_on(numlock_toggled_on());
            let verdict = engine.process_pointer(input);
            (verdict, engine.take_emissions(), engine.take_fired())
        };
        drain_engine_output(emissions, fired);

        match verdict {
            Verdict::Suppress => LRESULT(1),
            Verdict::Pass => CallNextHookEx(None, code, wparam, lparam),
        }
    }));

    match result {
        Ok(res) => res,
        Err(_) => {
            error!("Panic in mouse_proc; falling back to CallNextHookEx");
            CallNextHookEx(None, code, wparam, lparam)
        }
    }
}

fn button(b: PointerButton, key_up: bool) -> PointerAction {
    PointerAction::Button { button: b, key_up }
}

/// XBUTTON1 is the only side distinguished explicitly; anything else in
/// the high word is treated as X2.
fn xbutton(mouse_data: u32) -> PointerButton {
    if (mouse_data >> 16) as u16 == XBUTTON1 {
        PointerButton::X1
    } else {
        PointerButton::X2
    }
}

fn ensure_watchdog_thread() {
    if WATCHDOG_STARTED.swap(true, Ordering::AcqRel) {
        return;
    }
    thread::Builder::new()
        .name("kagi-hook-watchdog".to_string())
        .spawn(watchdog_loop)
        .expect("failed to spawn hook watchdog thread");
}

fn request_reinstall() -> bool {
    let thread_id = HOOK_THREAD_ID.load(Ordering::Acquire);
    if thread_id == 0 {
        return false;
    }
    unsafe { PostThreadMessageW(thread_id, WM_HOOK_REINSTALL, WPARAM(0), LPARAM(0)).is_ok() }
}

fn last_input_age_ms() -> Option<u64> {
    let mut lii = LASTINPUTINFO {
        cbSize: std::mem::size_of::<LASTINPUTINFO>() as u32,
        dwTime: 0,
    };
    unsafe {
        if !GetLastInputInfo(&mut lii).as_bool() {
            return None;
        }
    }
    let now = unsafe { windows::Win32::System::SystemInformation::GetTickCount() };
    Some(now.wrapping_sub(lii.dwTime) as u64)
}

/// A hook that stops being called while the user is typing has been
/// silently dropped by the system (it happens under load); request a
/// reinstall from the hook thread, with backoff.
fn watchdog_loop() {
    loop {
        thread::sleep(Duration::from_millis(WATCHDOG_INTERVAL_MS));

        if KEYBOARD_HOOK.lock().unwrap().is_none() {
            continue;
        }
        let last_hook = LAST_HOOK_MS.load(Ordering::Relaxed);
        if last_hook == 0 {
            continue;
        }
        let now = monotonic_ms();
        if now.saturating_sub(last_hook) < HOOK_STALL_MS {
            continue;
        }
        let input_age = match last_input_age_ms() {
            Some(age) => age,
            None => {
                warn!("GetLastInputInfo failed; skipping watchdog cycle");
                continue;
            }
        };
        if input_age > INPUT_RECENT_MS {
            continue;
        }
        let last_reinstall = LAST_REINSTALL_MS.load(Ordering::Relaxed);
        if now.saturating_sub(last_reinstall) < REINSTALL_BACKOFF_MS {
            continue;
        }
        if request_reinstall() {
            LAST_REINSTALL_MS.store(now, Ordering::Relaxed);
            warn!(
                "Hook watchdog requested reinstall: last_hook={}ms ago, last_input={}ms ago",
                now.saturating_sub(last_hook),
                input_age
            );
        }
    }
}
