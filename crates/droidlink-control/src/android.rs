//! Android input constants understood by the device server.
//!
//! Values mirror `android.view.KeyEvent` / `android.view.MotionEvent`.

use std::ops::{BitOr, BitOrAssign};

// ── KeyAction ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
    Multiple = 2,
}

// ── MotionAction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MotionAction {
    Down = 0,
    Up = 1,
    Move = 2,
    Cancel = 3,
    Outside = 4,
    PointerDown = 5,
    PointerUp = 6,
    HoverMove = 7,
    Scroll = 8,
    HoverEnter = 9,
    HoverExit = 10,
    ButtonPress = 11,
    ButtonRelease = 12,
}

// ── CopyKey ───────────────────────────────────────────────────────────────────

/// Key the server injects before reading the clipboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CopyKey {
    #[default]
    None = 0,
    Copy = 1,
    Cut = 2,
}

// ── Pointer ids ───────────────────────────────────────────────────────────────

/// Pointer id of the mouse (`-1` on the wire).
pub const POINTER_ID_MOUSE: u64 = u64::MAX;
/// Pointer id of a generic finger (`-2` on the wire).
pub const POINTER_ID_GENERIC_FINGER: u64 = u64::MAX - 1;

// ── Bit sets ──────────────────────────────────────────────────────────────────

macro_rules! bit_set {
    ($name:ident { $($flag:ident = $value:expr,)* }) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self($value);)*

            pub fn bits(self) -> u32 {
                self.0
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

bit_set!(MotionButtons {
    PRIMARY = 1 << 0,
    SECONDARY = 1 << 1,
    TERTIARY = 1 << 2,
    BACK = 1 << 3,
    FORWARD = 1 << 4,
    STYLUS_PRIMARY = 1 << 5,
    STYLUS_SECONDARY = 1 << 6,
});

bit_set!(MetaState {
    SHIFT_ON = 0x1,
    ALT_ON = 0x2,
    SYM_ON = 0x4,
    FUNCTION_ON = 0x8,
    ALT_LEFT_ON = 0x10,
    ALT_RIGHT_ON = 0x20,
    SHIFT_LEFT_ON = 0x40,
    SHIFT_RIGHT_ON = 0x80,
    CTRL_ON = 0x1000,
    CTRL_LEFT_ON = 0x2000,
    CTRL_RIGHT_ON = 0x4000,
    META_ON = 0x10000,
    META_LEFT_ON = 0x20000,
    META_RIGHT_ON = 0x40000,
    CAPS_LOCK_ON = 0x100000,
    NUM_LOCK_ON = 0x200000,
    SCROLL_LOCK_ON = 0x400000,
});

// ── Keycode ───────────────────────────────────────────────────────────────────

/// Android key code. Only the codes the client commonly sends are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Keycode(pub u32);

impl Keycode {
    pub const UNKNOWN: Self = Self(0);
    pub const HOME: Self = Self(3);
    pub const BACK: Self = Self(4);
    pub const DPAD_UP: Self = Self(19);
    pub const DPAD_DOWN: Self = Self(20);
    pub const DPAD_LEFT: Self = Self(21);
    pub const DPAD_RIGHT: Self = Self(22);
    pub const VOLUME_UP: Self = Self(24);
    pub const VOLUME_DOWN: Self = Self(25);
    pub const POWER: Self = Self(26);
    pub const TAB: Self = Self(61);
    pub const SPACE: Self = Self(62);
    pub const ENTER: Self = Self(66);
    pub const DEL: Self = Self(67);
    pub const MENU: Self = Self(82);
    pub const ESCAPE: Self = Self(111);
    pub const FORWARD_DEL: Self = Self(112);
    pub const APP_SWITCH: Self = Self(187);
}
