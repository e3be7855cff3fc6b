//! Terminal UI module using ratatui.
//!
//! - `render`: frame layout (title bar, output log, prompt, status bar)
//! - `input`: keyboard event handling
//! - `styles`: colors and text styles

pub mod input;
pub mod render;
pub mod styles;
