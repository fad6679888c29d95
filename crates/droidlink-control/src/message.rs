//! Control message wire format.
//!
//! Every message is one type byte followed by a fixed body; variable-length
//! fields carry their own `u32` length. There is no outer framing.
//!
//! ```text
//! InjectKeycode    [0] action u8 | keycode u32 | repeat u32 | meta u32
//! InjectText       [1] len u32 | utf8
//! InjectTouch      [2] action u8 | pointer u64 | rect 12B | pressure u16fp
//!                      | action_buttons u32 | buttons u32
//! InjectScroll     [3] rect 12B | hscroll i16fp | vscroll i16fp | buttons u32
//! BackOrScreenOn   [4] action u8
//! panels           [5..7] (empty)
//! GetClipboard     [8] copy_key u8
//! SetClipboard     [9] sequence u64 | paste u8 | len u32 | utf8
//! SetDisplayPower  [10] on u8
//! RotateDevice     [11] (empty)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use droidlink_core::buffer::{write_rect, write_u16_be, write_u32_be, write_u64_be, RECT_SIZE};
use droidlink_core::Rect;
use tracing::trace;

use crate::android::{CopyKey, KeyAction, Keycode, MetaState, MotionAction, MotionButtons};

/// Maximum UTF-8 bytes of an injected text.
pub const INJECT_TEXT_MAX_LENGTH: usize = 300;

/// Largest control message the server accepts.
pub const CONTROL_MSG_MAX_SIZE: usize = 1 << 18;

/// Maximum UTF-8 bytes of clipboard text (message size minus the fixed part).
pub const CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_MSG_MAX_SIZE - 14;

// MARK: - ControlMessageType

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMessageType {
    InjectKeycode = 0,
    InjectText = 1,
    InjectTouch = 2,
    InjectScroll = 3,
    BackOrScreenOn = 4,
    ExpandNotificationPanel = 5,
    ExpandSettingsPanel = 6,
    CollapsePanels = 7,
    GetClipboard = 8,
    SetClipboard = 9,
    SetDisplayPower = 10,
    RotateDevice = 11,
}

// MARK: - ControlLimits

/// Text limits applied while encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLimits {
    pub inject_text_max: usize,
    pub clipboard_text_max: usize,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            inject_text_max: INJECT_TEXT_MAX_LENGTH,
            clipboard_text_max: CLIPBOARD_TEXT_MAX_LENGTH,
        }
    }
}

// MARK: - ControlCommand

/// A command sent to the device over the control socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    InjectKeycode {
        action: KeyAction,
        keycode: Keycode,
        repeat: u32,
        meta_state: MetaState,
    },

    /// Text typed on the device; longer input is cut to the text limit.
    InjectText { text: String },

    InjectTouch {
        pointer_id: u64,
        action: MotionAction,
        action_buttons: MotionButtons,
        buttons: MotionButtons,
        position: Rect,
        /// In `[0.0, 1.0]`.
        pressure: f32,
    },

    /// Scroll amounts are clamped to `-1..=1` before encoding.
    InjectScroll {
        position: Rect,
        h_scroll: i32,
        v_scroll: i32,
        buttons: MotionButtons,
    },

    /// Press BACK, or turn the screen on if it is off.
    BackOrScreenOn { down: bool },

    ExpandNotificationPanel,
    ExpandSettingsPanel,
    CollapsePanels,

    GetClipboard { copy_key: CopyKey },

    SetClipboard {
        sequence: u64,
        paste: bool,
        text: String,
    },

    SetDisplayPower { on: bool },

    RotateDevice,
}

impl ControlCommand {
    pub fn message_type(&self) -> ControlMessageType {
        match self {
            Self::InjectKeycode { .. } => ControlMessageType::InjectKeycode,
            Self::InjectText { .. } => ControlMessageType::InjectText,
            Self::InjectTouch { .. } => ControlMessageType::InjectTouch,
            Self::InjectScroll { .. } => ControlMessageType::InjectScroll,
            Self::BackOrScreenOn { .. } => ControlMessageType::BackOrScreenOn,
            Self::ExpandNotificationPanel => ControlMessageType::ExpandNotificationPanel,
            Self::ExpandSettingsPanel => ControlMessageType::ExpandSettingsPanel,
            Self::CollapsePanels => ControlMessageType::CollapsePanels,
            Self::GetClipboard { .. } => ControlMessageType::GetClipboard,
            Self::SetClipboard { .. } => ControlMessageType::SetClipboard,
            Self::SetDisplayPower { .. } => ControlMessageType::SetDisplayPower,
            Self::RotateDevice => ControlMessageType::RotateDevice,
        }
    }

    /// Encode with the default text limits.
    pub fn serialize(&self) -> Bytes {
        self.serialize_with(&ControlLimits::default())
    }

    pub fn serialize_with(&self, limits: &ControlLimits) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.fixed_size());
        self.write_to(&mut buf, limits);
        trace!("serialized {:?} ({} bytes)", self.message_type(), buf.len());
        buf.freeze()
    }

    /// Append the wire bytes of this command to `buf`.
    pub fn write_to(&self, buf: &mut impl BufMut, limits: &ControlLimits) {
        buf.put_u8(self.message_type() as u8);

        match self {
            Self::InjectKeycode { action, keycode, repeat, meta_state } => {
                buf.put_u8(*action as u8);
                write_u32_be(buf, keycode.0);
                write_u32_be(buf, *repeat);
                write_u32_be(buf, meta_state.bits());
            }
            Self::InjectText { text } => {
                write_string(buf, text, limits.inject_text_max);
            }
            Self::InjectTouch {
                pointer_id,
                action,
                action_buttons,
                buttons,
                position,
                pressure,
            } => {
                buf.put_u8(*action as u8);
                write_u64_be(buf, *pointer_id);
                write_rect(buf, position);
                write_u16_be(buf, float_to_u16_fixed(*pressure));
                write_u32_be(buf, action_buttons.bits());
                write_u32_be(buf, buttons.bits());
            }
            Self::InjectScroll { position, h_scroll, v_scroll, buttons } => {
                write_rect(buf, position);
                write_u16_be(buf, float_to_i16_fixed((*h_scroll).clamp(-1, 1) as f32) as u16);
                write_u16_be(buf, float_to_i16_fixed((*v_scroll).clamp(-1, 1) as f32) as u16);
                write_u32_be(buf, buttons.bits());
            }
            Self::BackOrScreenOn { down } => {
                let action = if *down { KeyAction::Down } else { KeyAction::Up };
                buf.put_u8(action as u8);
            }
            Self::GetClipboard { copy_key } => {
                buf.put_u8(*copy_key as u8);
            }
            Self::SetClipboard { sequence, paste, text } => {
                write_u64_be(buf, *sequence);
                buf.put_u8(u8::from(*paste));
                write_string(buf, text, limits.clipboard_text_max);
            }
            Self::SetDisplayPower { on } => {
                buf.put_u8(u8::from(*on));
            }
            Self::ExpandNotificationPanel
            | Self::ExpandSettingsPanel
            | Self::CollapsePanels
            | Self::RotateDevice => {}
        }
    }

    /// Capacity hint for the encoded message.
    fn fixed_size(&self) -> usize {
        1 + match self {
            Self::InjectKeycode { .. } => 13,
            Self::InjectText { text } => 4 + text.len().min(INJECT_TEXT_MAX_LENGTH),
            Self::InjectTouch { .. } => 1 + 8 + RECT_SIZE + 2 + 4 + 4,
            Self::InjectScroll { .. } => RECT_SIZE + 2 + 2 + 4,
            Self::BackOrScreenOn { .. }
            | Self::GetClipboard { .. }
            | Self::SetDisplayPower { .. } => 1,
            Self::SetClipboard { text, .. } => 8 + 1 + 4 + text.len(),
            _ => 0,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `len:u32 | bytes`, cut to `max` bytes on a char boundary.
fn write_string(buf: &mut impl BufMut, text: &str, max: usize) {
    let text = truncate_utf8(text, max);
    write_u32_be(buf, text.len() as u32);
    buf.put_slice(text.as_bytes());
}

/// Longest prefix of `text` that fits in `max` bytes without splitting a char.
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// `[0, 1]` → unsigned 16-bit fixed point; 1.0 saturates to `0xFFFF`.
pub fn float_to_u16_fixed(value: f32) -> u16 {
    let scaled = (value * 65_536.0).round();
    scaled.clamp(0.0, 65_535.0) as u16
}

/// `[-1, 1]` → signed 16-bit fixed point; 1.0 saturates to `0x7FFF`.
pub fn float_to_i16_fixed(value: f32) -> i16 {
    let scaled = (value * 32_768.0).round();
    scaled.clamp(-32_768.0, 32_767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::android::{POINTER_ID_GENERIC_FINGER, POINTER_ID_MOUSE};
    use droidlink_core::buffer::{read_u16_be, read_u32_be, read_u64_be};

    fn rect() -> Rect {
        Rect::new(100, 200, 1080, 1920)
    }

    #[test]
    fn inject_keycode_layout() {
        let msg = ControlCommand::InjectKeycode {
            action: KeyAction::Up,
            keycode: Keycode::ENTER,
            repeat: 5,
            meta_state: MetaState::SHIFT_ON | MetaState::SHIFT_LEFT_ON,
        };
        let bytes = msg.serialize();
        assert_eq!(
            bytes.as_ref(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x42, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x41]
        );
    }

    #[test]
    fn inject_text_layout() {
        let msg = ControlCommand::InjectText { text: "hello, world!".into() };
        let bytes = msg.serialize();
        assert_eq!(bytes[0], 1);
        assert_eq!(read_u32_be(&bytes, 1), Some(13));
        assert_eq!(&bytes[5..], b"hello, world!");
    }

    #[test]
    fn inject_text_is_cut_to_300_bytes() {
        let text = "a".repeat(INJECT_TEXT_MAX_LENGTH + 50);
        let bytes = ControlCommand::InjectText { text }.serialize();
        assert_eq!(read_u32_be(&bytes, 1), Some(300));
        assert_eq!(bytes.len(), 1 + 4 + 300);
    }

    #[test]
    fn truncation_keeps_char_boundaries() {
        // 'é' is two bytes; 151 of them straddle the 300-byte limit.
        let text = "é".repeat(151);
        let cut = truncate_utf8(&text, 301);
        assert_eq!(cut.len(), 300);
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn inject_touch_layout() {
        let msg = ControlCommand::InjectTouch {
            pointer_id: 0x1234_5678_8765_4321,
            action: MotionAction::Down,
            action_buttons: MotionButtons::PRIMARY,
            buttons: MotionButtons::PRIMARY | MotionButtons::SECONDARY,
            position: rect(),
            pressure: 1.0,
        };
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[0], 2);
        assert_eq!(bytes[1], MotionAction::Down as u8);
        assert_eq!(read_u64_be(&bytes, 2), Some(0x1234_5678_8765_4321));
        assert_eq!(read_u32_be(&bytes, 10), Some(100));
        assert_eq!(read_u32_be(&bytes, 14), Some(200));
        assert_eq!(read_u16_be(&bytes, 18), Some(1080));
        assert_eq!(read_u16_be(&bytes, 20), Some(1920));
        assert_eq!(read_u16_be(&bytes, 22), Some(0xFFFF));
        assert_eq!(read_u32_be(&bytes, 24), Some(1));
        assert_eq!(read_u32_be(&bytes, 28), Some(3));
    }

    #[test]
    fn mouse_pointer_id_encodes_as_minus_one() {
        let msg = ControlCommand::InjectTouch {
            pointer_id: POINTER_ID_MOUSE,
            action: MotionAction::Move,
            action_buttons: MotionButtons::NONE,
            buttons: MotionButtons::NONE,
            position: rect(),
            pressure: 0.5,
        };
        let bytes = msg.serialize();
        assert_eq!(&bytes[2..10], &[0xFF; 8]);
        assert_eq!(read_u16_be(&bytes, 22), Some(0x8000));

        let finger = ControlCommand::InjectTouch {
            pointer_id: POINTER_ID_GENERIC_FINGER,
            action: MotionAction::Up,
            action_buttons: MotionButtons::NONE,
            buttons: MotionButtons::NONE,
            position: rect(),
            pressure: 0.0,
        };
        let bytes = finger.serialize();
        assert_eq!(bytes[9], 0xFE);
        assert_eq!(read_u16_be(&bytes, 22), Some(0));
    }

    #[test]
    fn inject_scroll_layout() {
        let msg = ControlCommand::InjectScroll {
            position: Rect::new(260, 1026, 1080, 1920),
            h_scroll: 1,
            v_scroll: -1,
            buttons: MotionButtons::PRIMARY,
        };
        let bytes = msg.serialize();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x03, // type
                0x00, 0x00, 0x01, 0x04, // x
                0x00, 0x00, 0x04, 0x02, // y
                0x04, 0x38, 0x07, 0x80, // width, height
                0x7F, 0xFF, // hscroll 1.0
                0x80, 0x00, // vscroll -1.0
                0x00, 0x00, 0x00, 0x01, // buttons
            ]
        );
    }

    #[test]
    fn scroll_amounts_are_clamped() {
        let msg = ControlCommand::InjectScroll {
            position: rect(),
            h_scroll: 7,
            v_scroll: -42,
            buttons: MotionButtons::NONE,
        };
        let bytes = msg.serialize();
        assert_eq!(read_u16_be(&bytes, 13), Some(0x7FFF));
        assert_eq!(read_u16_be(&bytes, 15), Some(0x8000));
    }

    #[test]
    fn single_byte_bodies() {
        assert_eq!(ControlCommand::BackOrScreenOn { down: true }.serialize().as_ref(), &[4, 0]);
        assert_eq!(ControlCommand::BackOrScreenOn { down: false }.serialize().as_ref(), &[4, 1]);
        assert_eq!(
            ControlCommand::GetClipboard { copy_key: CopyKey::Cut }.serialize().as_ref(),
            &[8, 2]
        );
        assert_eq!(ControlCommand::SetDisplayPower { on: true }.serialize().as_ref(), &[10, 1]);
        assert_eq!(ControlCommand::SetDisplayPower { on: false }.serialize().as_ref(), &[10, 0]);
    }

    #[test]
    fn panel_commands_have_no_body() {
        assert_eq!(ControlCommand::ExpandNotificationPanel.serialize().as_ref(), &[5]);
        assert_eq!(ControlCommand::ExpandSettingsPanel.serialize().as_ref(), &[6]);
        assert_eq!(ControlCommand::CollapsePanels.serialize().as_ref(), &[7]);
        assert_eq!(ControlCommand::RotateDevice.serialize().as_ref(), &[11]);
    }

    #[test]
    fn set_clipboard_layout() {
        let msg = ControlCommand::SetClipboard {
            sequence: 0x0102_0304_0506_0708,
            paste: true,
            text: "hello".into(),
        };
        let bytes = msg.serialize();
        assert_eq!(bytes[0], 9);
        assert_eq!(read_u64_be(&bytes, 1), Some(0x0102_0304_0506_0708));
        assert_eq!(bytes[9], 1);
        assert_eq!(read_u32_be(&bytes, 10), Some(5));
        assert_eq!(&bytes[14..], b"hello");
    }

    #[test]
    fn empty_clipboard_encodes_zero_length() {
        let msg = ControlCommand::SetClipboard { sequence: 0, paste: false, text: String::new() };
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), 14);
        assert_eq!(read_u32_be(&bytes, 10), Some(0));
    }

    #[test]
    fn clipboard_respects_configured_limit() {
        let limits = ControlLimits { clipboard_text_max: 4, ..ControlLimits::default() };
        let msg =
            ControlCommand::SetClipboard { sequence: 1, paste: false, text: "abcdefgh".into() };
        let bytes = msg.serialize_with(&limits);
        assert_eq!(read_u32_be(&bytes, 10), Some(4));
        assert_eq!(&bytes[14..], b"abcd");
    }

    #[test]
    fn unsigned_fixed_point() {
        assert_eq!(float_to_u16_fixed(0.0), 0x0000);
        assert_eq!(float_to_u16_fixed(0.5), 0x8000);
        assert_eq!(float_to_u16_fixed(1.0), 0xFFFF);
        assert_eq!(float_to_u16_fixed(1.5), 0xFFFF);
        assert_eq!(float_to_u16_fixed(-0.1), 0x0000);

        let mut previous = 0;
        for step in 0..=100 {
            let value = float_to_u16_fixed(step as f32 / 100.0);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn signed_fixed_point() {
        assert_eq!(float_to_i16_fixed(0.0), 0);
        assert_eq!(float_to_i16_fixed(1.0), 0x7FFF);
        assert_eq!(float_to_i16_fixed(-1.0), i16::MIN);
        assert_eq!(float_to_i16_fixed(0.5), 0x4000);
        assert_eq!(float_to_i16_fixed(2.0), 0x7FFF);
        assert_eq!(float_to_i16_fixed(-2.0), i16::MIN);

        let mut previous = i16::MIN;
        for step in -100..=100 {
            let value = float_to_i16_fixed(step as f32 / 100.0);
            assert!(value >= previous);
            previous = value;
        }
    }
}
