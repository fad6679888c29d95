//! droidlink-control: control channel message encoding
//!
//! Commands originated by the application (key presses, touches, scrolls,
//! clipboard, display power) are serialized here into the compact binary
//! layout the device server parses. Encoding is pure: build a
//! [`ControlCommand`], call [`ControlCommand::serialize`], write the bytes.
//!
//! # Example
//! ```rust
//! use droidlink_control::{ControlCommand, KeyAction, Keycode, MetaState};
//!
//! let bytes = ControlCommand::InjectKeycode {
//!     action: KeyAction::Down,
//!     keycode: Keycode::HOME,
//!     repeat: 0,
//!     meta_state: MetaState::NONE,
//! }
//! .serialize();
//! assert_eq!(bytes.len(), 14);
//! ```

pub mod android;
pub mod message;

pub use android::{
    CopyKey, KeyAction, Keycode, MetaState, MotionAction, MotionButtons, POINTER_ID_GENERIC_FINGER,
    POINTER_ID_MOUSE,
};
pub use message::{
    float_to_i16_fixed, float_to_u16_fixed, truncate_utf8, ControlCommand, ControlLimits,
    ControlMessageType, CLIPBOARD_TEXT_MAX_LENGTH, CONTROL_MSG_MAX_SIZE, INJECT_TEXT_MAX_LENGTH,
};
