pub mod engine;
pub mod history;
#[cfg(windows)]
pub mod hook;
pub mod keys;
pub mod table;
pub mod types;

pub use engine::{Engine, ENGINE};
pub use table::{HotkeyDef, HotkeyMatch, HotkeyTable, HotkeyTableBuilder};
pub use types::{
    Emission, ExtraInfo, FiredHotkey, KeySel, KeyboardInput, ModMask, PointerButton, PointerInput,
    ToggleValue, Verdict,
};
