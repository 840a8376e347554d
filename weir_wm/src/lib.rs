//! Weir window manager interface.
//!
//! This library provides the message types spoken between the Weir compositor
//! and its window manager client, plus helpers for connecting to the
//! compositor's wm socket.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
#[cfg(feature = "clap")]
use std::str::FromStr;
use std::{env, process};

#[cfg(feature = "clap")]
use clap::error::{Error as ClapError, ErrorKind as ClapErrorKind};
use serde::{Deserialize, Serialize};

/// Handle of a toplevel window managed by the compositor.
#[derive(Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Copy, Clone, Debug)]
pub struct WindowId(pub u64);

/// Handle of a logical output.
#[derive(Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Copy, Clone, Debug)]
pub struct OutputId(pub u64);

/// Handle of an input seat.
#[derive(Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Copy, Clone, Debug)]
pub struct SeatId(pub u64);

/// Handle of a binding, allocated by the window manager.
#[derive(Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Copy, Clone, Debug)]
pub struct BindingId(pub u64);

impl Display for WindowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

impl Display for OutputId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "output-{}", self.0)
    }
}

impl Display for BindingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "binding-{}", self.0)
    }
}

/// Rectangle in logical pixels.
#[derive(Deserialize, Serialize, PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// Edges participating in an interactive resize.
#[derive(Deserialize, Serialize, PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct Edges {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

/// Modifier state for a binding trigger.
#[derive(Deserialize, Serialize, PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct Modifiers {
    pub control: bool,
    pub shift: bool,
    pub logo: bool,
    pub alt: bool,
}

#[cfg(feature = "clap")]
impl FromStr for Modifiers {
    type Err = ClapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut modifiers = Self::default();

        for modifier in s.split(',') {
            match modifier.trim().to_lowercase().as_str() {
                "control" | "ctrl" => modifiers.control = true,
                "super" | "logo" => modifiers.logo = true,
                "shift" => modifiers.shift = true,
                "alt" => modifiers.alt = true,
                invalid => {
                    return Err(ClapError::raw(
                        ClapErrorKind::InvalidValue,
                        format!(
                            "invalid modifier {invalid:?}, expected one of \"shift\", \
                             \"control\", \"alt\", or \"super\""
                        ),
                    ))
                },
            }
        }

        Ok(modifiers)
    }
}

/// XKB keysym wrapper.
#[derive(Deserialize, Serialize, PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub struct Keysym(pub u32);

#[cfg(feature = "clap")]
impl FromStr for Keysym {
    type Err = ClapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept raw keysym values in hex or decimal notation.
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => s.parse(),
        };

        match parsed {
            Ok(keysym) => Ok(Self(keysym)),
            Err(_) => {
                Err(ClapError::raw(ClapErrorKind::InvalidValue, format!("invalid keysym {s:?}")))
            },
        }
    }
}

/// Interaction a client asked its window manager for.
#[derive(Deserialize, Serialize, PartialEq, Eq, Copy, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum Interaction {
    Move,
    Resize,
}

/// Events sent from the compositor to the window manager.
///
/// Between two [`WmEvent::Update`] markers the compositor delivers one batch
/// of state deltas; the window manager must never act on a partially received
/// batch.
#[derive(Deserialize, Serialize, PartialEq, Debug)]
pub enum WmEvent {
    /// Seals a batched delta, requesting `ack_update` + `commit`.
    Update { serial: u32 },
    /// New toplevel window.
    WindowAdded { id: WindowId },
    /// Window is gone; its id must not be used afterwards.
    WindowRemoved { id: WindowId },
    /// Window title changed.
    WindowTitle { id: WindowId, title: Option<String> },
    /// Window App ID changed.
    WindowAppId { id: WindowId, app_id: Option<String> },
    /// Client-requested size bounds.
    WindowDimensionBounds {
        id: WindowId,
        min_width: i32,
        min_height: i32,
        max_width: i32,
        max_height: i32,
    },
    /// Client asked for fullscreen to be set or unset.
    WindowFullscreenRequested { id: WindowId, fullscreen: bool },
    /// Client asked for an interactive move/resize.
    WindowInteractionRequested { id: WindowId, seat: SeatId, interaction: Interaction },
    /// Window urgency changed.
    WindowUrgent { id: WindowId, urgent: bool },
    /// New logical output.
    OutputAdded { id: OutputId },
    /// Output is gone.
    OutputRemoved { id: OutputId },
    /// Output dimensions in logical pixels.
    OutputDimensions { id: OutputId, width: i32, height: i32 },
    /// Output position in the global layout space.
    OutputPosition { id: OutputId, x: i32, y: i32 },
    /// New input seat.
    SeatAdded { id: SeatId },
    /// A bound trigger was pressed.
    BindingPressed { id: BindingId },
    /// A bound trigger was released.
    BindingReleased { id: BindingId },
}

/// Requests sent from the window manager to the compositor.
///
/// Window and binding property changes are double-buffered: they take effect
/// only once sealed by [`WmRequest::Commit`].
#[derive(Deserialize, Serialize, PartialEq, Debug)]
pub enum WmRequest {
    /// Acknowledge the update batch with the matching serial.
    AckUpdate { serial: u32 },
    /// Seal the reply; all staged changes are applied atomically.
    Commit,
    /// Ask for an update batch even without pending deltas.
    ///
    /// Used to initiate a wm-driven reconfiguration outside the normal
    /// dirty-state cycle.
    RequestUpdate,
    /// Stage new window dimensions.
    SetWindowDimensions { id: WindowId, rect: Rect },
    /// Stage the window's fullscreen state.
    SetWindowFullscreen { id: WindowId, fullscreen: bool },
    /// Stage the window's decoration mode.
    SetWindowDecorations { id: WindowId, server_side: bool },
    /// Stage the keyboard focus of a seat.
    FocusWindow { seat: SeatId, id: Option<WindowId> },
    /// Ask the client to close its window.
    CloseWindow { id: WindowId },
    /// Start an interactive move driven by the seat's cursor.
    StartInteractiveMove { seat: SeatId, id: WindowId },
    /// Start an interactive resize driven by the seat's cursor.
    StartInteractiveResize { seat: SeatId, id: WindowId, edges: Edges },
    /// End the seat's interactive operation.
    EndInteraction { seat: SeatId },
    /// Register a pointer binding.
    CreatePointerBinding { id: BindingId, seat: SeatId, button: u32, mods: Modifiers },
    /// Register a keyboard binding.
    CreateKeyBinding { id: BindingId, seat: SeatId, keysym: Keysym, mods: Modifiers },
    /// Drop a binding; pending presses are released implicitly.
    DestroyBinding { id: BindingId },
    /// Stage binding activation.
    EnableBinding { id: BindingId },
    /// Stage binding deactivation.
    DisableBinding { id: BindingId },
    /// Stage an XKB layout override for keysym resolution.
    SetBindingLayoutOverride { id: BindingId, layout: Option<u32> },
}

/// Send a request to the Weir wm socket.
pub fn send_request(request: &WmRequest) -> Result<(), Box<dyn Error>> {
    let socket_name = match env::var("WAYLAND_DISPLAY") {
        Ok(socket_name) => socket_name,
        Err(_) => {
            eprintln!("Error: WAYLAND_DISPLAY is not set");
            process::exit(101);
        },
    };

    let socket_path = socket_path(&socket_name);

    // Ensure Weir's wm listener is running.
    if !socket_path.exists() {
        eprintln!("Error: wm socket not found, ensure Weir is running");
        process::exit(102);
    }

    let mut socket = UnixStream::connect(&socket_path)?;

    let mut json = serde_json::to_string(&request)?;
    json.push('\n');
    socket.write_all(json.as_bytes())?;
    socket.flush()?;

    Ok(())
}

/// Path for the wm socket file.
pub fn socket_path(socket_name: &str) -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(env::temp_dir).join(format!("weir-{socket_name}-wm.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_requests() {
        let request = WmRequest::SetWindowDimensions {
            id: WindowId(3),
            rect: Rect::new(100, 100, 800, 600),
        };

        let json = serde_json::to_string(&request).unwrap();
        let parsed: WmRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn roundtrip_events() {
        let event = WmEvent::WindowTitle { id: WindowId(7), title: Some("shell".into()) };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: WmEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
