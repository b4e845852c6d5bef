//! Standard Sinclair ULA (Uncommitted Logic Array).
//!
//! The ULA arbitrates the video memory bus and paints the frame. This crate
//! models the two halves the CPU can observe: the contention delays the ULA
//! imposes on bus accesses while fetching screen data, and the pixel stream
//! itself.
//!
//! # Standalone IC
//!
//! This crate has no dependencies — the ULA reads VRAM through a closure
//! passed by the caller, keeping it decoupled from any particular memory
//! model.
//!
//! # Timing (48K PAL)
//!
//! - 224 T-states per line, 69,888 T-states per frame
//! - two pixels emitted per T-state
//! - INT asserted for the first 32 T-states of the frame
//!
//! The renderer is driven lazily: the machine advances it to a target tick
//! whenever an observable (screen byte, attribute, border colour) is about
//! to change, so every pixel is painted from the values that were live when
//! the beam passed it.
//!
//! # Frame geometry
//!
//! The visible frame is 352×280: 48 pixels of border either side of the
//! 256×192 screen, 48 above and 40 below. The beam additionally sweeps 16
//! hidden lines above the visible area and a horizontal retrace of 48
//! T-states per line; the renderer counts them without painting.
//!
//! # Screen buffer
//!
//! Pixels are stored as 4-bit colour codes (bit 3 = bright, 2 = green,
//! 1 = red, 0 = blue), packed eight to a 32-bit chunk with the leftmost
//! pixel in the most significant nibble, 44 chunks per line.

mod render;

pub use render::Ula;

/// Screen area in pixels.
pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 192;

/// Border widths in pixels.
pub const BORDER_WIDTH: usize = 48;
pub const TOP_BORDER: usize = 48;
pub const BOTTOM_BORDER: usize = 40;

/// Visible frame dimensions.
pub const FRAME_WIDTH: usize = BORDER_WIDTH + SCREEN_WIDTH + BORDER_WIDTH;
pub const FRAME_HEIGHT: usize = TOP_BORDER + SCREEN_HEIGHT + BOTTOM_BORDER;

/// Eight 4-bit pixels per 32-bit chunk.
pub const PIXELS_PER_CHUNK: usize = 8;
pub const CHUNKS_PER_LINE: usize = FRAME_WIDTH / PIXELS_PER_CHUNK;

/// CPU T-states per scanline.
pub const TICKS_PER_LINE: u32 = 224;
/// CPU T-states per frame (224 × 312 lines).
pub const TICKS_PER_FRAME: u32 = 69_888;
/// INT is asserted for the first 32 T-states of each frame.
pub const TICKS_PER_ACTIVE_INT: u32 = 32;

/// First tick of the contended/painted screen area.
pub const CONTENTION_BASE: u32 = 14_336;

/// Frames between FLASH toggles.
pub const FLASH_FRAME_COUNT: u32 = 16;

/// Base of the pixel-pattern map in the address space.
pub const PATTERN_BASE: u16 = 0x4000;
/// Base of the attribute map.
pub const ATTR_BASE: u16 = 0x5800;

/// Contention delay the ULA imposes at the given frame tick.
///
/// Non-zero only while the beam is in the screen-fetch part of a screen
/// line: ticks `CONTENTION_BASE .. CONTENTION_BASE + 192·224` with a line
/// offset below 128. Within the window the delay repeats every 8 ticks:
/// 6, 5, 4, 3, 2, 1, 0, 0.
///
/// Whether a given bus access is subject to this delay at all (contended
/// RAM page, ULA port) is the caller's concern.
#[must_use]
pub fn contention_delay(tick: u32) -> u32 {
    if tick < CONTENTION_BASE
        || tick >= CONTENTION_BASE + SCREEN_HEIGHT as u32 * TICKS_PER_LINE
    {
        return 0;
    }
    let x = (tick - CONTENTION_BASE) % TICKS_PER_LINE;
    if x >= 128 {
        return 0;
    }
    let u = x % 8;
    if u == 7 { 0 } else { 6 - u }
}

/// Expand a chunk buffer into 32-bit RGB pixels, `FRAME_WIDTH` per line.
///
/// Each 4-bit code becomes `(R << 16) | (G << 8) | B` with a component
/// byte of 0xFF for bright colours and 0xCC for normal ones.
#[must_use]
pub fn chunks_to_rgb(chunks: &[u32]) -> Vec<u32> {
    let mut pixels = Vec::with_capacity(chunks.len() * PIXELS_PER_CHUNK);
    for &chunk in chunks {
        for slot in 0..PIXELS_PER_CHUNK {
            let code = (chunk >> ((PIXELS_PER_CHUNK - 1 - slot) * 4)) & 0xF;
            pixels.push(code_to_rgb(code as u8));
        }
    }
    pixels
}

/// Expand a single 4-bit colour code to packed RGB.
#[must_use]
pub fn code_to_rgb(code: u8) -> u32 {
    let level: u32 = if code & 0x08 != 0 { 0xFF } else { 0xCC };
    let g = if code & 0x04 != 0 { level } else { 0 };
    let r = if code & 0x02 != 0 { level } else { 0 };
    let b = if code & 0x01 != 0 { level } else { 0 };
    (r << 16) | (g << 8) | b
}
