//! Ticks-to-pixels frame renderer.

use crate::{
    ATTR_BASE, BORDER_WIDTH, CHUNKS_PER_LINE, FLASH_FRAME_COUNT, FRAME_HEIGHT,
    PATTERN_BASE, PIXELS_PER_CHUNK, TICKS_PER_FRAME, TICKS_PER_LINE, TOP_BORDER,
};

/// Lines the beam sweeps above the visible area.
const HIDDEN_TOP_LINES: usize = 16;
/// First frame line of the screen area (hidden lines + top border).
const FIRST_SCREEN_LINE: usize = HIDDEN_TOP_LINES + TOP_BORDER;
/// One line past the visible area.
const LAST_VISIBLE_LINE: usize = HIDDEN_TOP_LINES + FRAME_HEIGHT;

/// The beam-chasing renderer.
///
/// `render_to` advances an internal tick cursor towards a target, painting
/// two pixels per tick. The machine calls it just before any change to a
/// tick-sensitive observable, so the painted frame always reflects the
/// memory and border values that were live when the beam passed.
pub struct Ula {
    /// Next tick to be rendered; monotonic within a frame.
    render_tick: u32,
    /// Screen chunk buffer, `FRAME_HEIGHT` rows × `CHUNKS_PER_LINE`.
    screen: Vec<u32>,
    /// FLASH inversion mask: all-zero or all-one.
    flash_mask: u16,
    /// Frame counter for the FLASH cadence.
    flash_counter: u32,
    /// Border colour as last sampled by the beam (every 4 ticks).
    border_latch: u8,
    /// Pattern/attribute pairs fetched one byte-pair cycle ahead.
    pattern_latch: u16,
    attr_latch: u16,
    /// The pair currently being shifted out.
    pattern_active: u16,
    attr_active: u16,
}

impl Ula {
    #[must_use]
    pub fn new() -> Self {
        Self {
            render_tick: 0,
            screen: vec![0; FRAME_HEIGHT * CHUNKS_PER_LINE],
            flash_mask: 0,
            flash_counter: 0,
            border_latch: 0,
            pattern_latch: 0,
            attr_latch: 0,
            pattern_active: 0,
            attr_active: 0,
        }
    }

    /// Start a new frame: rewind the beam and advance the FLASH cadence.
    pub fn begin_frame(&mut self) {
        self.render_tick = 0;
        self.flash_counter += 1;
        if self.flash_counter >= FLASH_FRAME_COUNT {
            self.flash_counter = 0;
            self.flash_mask ^= 0xFFFF;
        }
    }

    /// Next tick the renderer will paint.
    #[must_use]
    pub fn render_tick(&self) -> u32 {
        self.render_tick
    }

    /// Current FLASH inversion mask.
    #[must_use]
    pub fn flash_mask(&self) -> u16 {
        self.flash_mask
    }

    /// The chunk buffer: `FRAME_HEIGHT` rows of `CHUNKS_PER_LINE` chunks.
    #[must_use]
    pub fn screen_chunks(&self) -> &[u32] {
        &self.screen
    }

    /// Advance the beam up to (not including) `end_tick`.
    ///
    /// `border` is the live border latch; the beam re-samples it every
    /// 4 ticks. `read_vram` reads pattern/attribute bytes without side
    /// effects. Ticks past the end of the frame are ignored.
    pub fn render_to(&mut self, end_tick: u32, border: u8, read_vram: impl Fn(u16) -> u8) {
        let end = end_tick.min(TICKS_PER_FRAME);
        while self.render_tick < end {
            self.render_one(border, &read_vram);
            self.render_tick += 1;
        }
    }

    /// Paint the two pixels of the current tick.
    fn render_one(&mut self, border: u8, read_vram: &impl Fn(u16) -> u8) {
        let tick = self.render_tick;
        // Align the beam to the top-left corner of the frame: the first
        // rendered tick sits 4 ticks into the left border of line 0.
        let frame_tick = tick + BORDER_WIDTH as u32 / 2 - 4;
        let line = (frame_tick / TICKS_PER_LINE) as usize;
        let px = ((frame_tick % TICKS_PER_LINE) * 2) as usize;

        // Fetch the next byte pair one cycle ahead of its 16-pixel window.
        if tick % 8 == 0
            && (FIRST_SCREEN_LINE..FIRST_SCREEN_LINE + 192).contains(&line)
            && (BORDER_WIDTH - 8..BORDER_WIDTH + 248).contains(&px)
        {
            let pattern = PATTERN_BASE + pattern_offset(line, px + 8);
            let attr = ATTR_BASE + attr_offset(line, px + 8);
            self.pattern_latch = (u16::from(read_vram(pattern)) << 8)
                | u16::from(read_vram(pattern.wrapping_add(1)));
            self.attr_latch = (u16::from(read_vram(attr)) << 8)
                | u16::from(read_vram(attr.wrapping_add(1)));
        }

        let in_screen = (FIRST_SCREEN_LINE..FIRST_SCREEN_LINE + 192).contains(&line)
            && (BORDER_WIDTH..BORDER_WIDTH + 256).contains(&px);

        if in_screen {
            let cycle_px = (px - BORDER_WIDTH) % 16;
            if cycle_px == 0 {
                self.pattern_active = self.pattern_latch;
                self.attr_active = self.attr_latch;
            }
            let attr = if cycle_px < 8 {
                (self.attr_active >> 8) as u8
            } else {
                self.attr_active as u8
            };
            let mut pattern = self.pattern_active;
            if attr & 0x80 != 0 {
                pattern ^= self.flash_mask;
            }
            let bright = (attr & 0x40) >> 3;
            let ink = (attr & 0x07) | bright;
            let paper = ((attr >> 3) & 0x07) | bright;

            let y = line - HIDDEN_TOP_LINES;
            for i in 0..2 {
                let bit = 15 - (cycle_px + i);
                let code = if pattern & (1 << bit) != 0 { ink } else { paper };
                self.put_pixel(px + i, y, code);
            }
        } else if (HIDDEN_TOP_LINES..LAST_VISIBLE_LINE).contains(&line)
            && px < CHUNKS_PER_LINE * PIXELS_PER_CHUNK
        {
            // Border: re-sample the live colour every 4 ticks, paint the
            // latched value.
            if tick % 4 == 0 {
                self.border_latch = border & 0x07;
            }
            let y = line - HIDDEN_TOP_LINES;
            self.put_pixel(px, y, self.border_latch);
            self.put_pixel(px + 1, y, self.border_latch);
        }
        // Hidden area (top lines, horizontal retrace): beam advances only.
    }

    fn put_pixel(&mut self, x: usize, y: usize, code: u8) {
        let chunk = &mut self.screen[y * CHUNKS_PER_LINE + x / PIXELS_PER_CHUNK];
        let shift = (PIXELS_PER_CHUNK - 1 - x % PIXELS_PER_CHUNK) * 4;
        *chunk = (*chunk & !(0xF << shift)) | (u32::from(code) << shift);
    }
}

impl Default for Ula {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset of a pattern byte within the pixel-pattern map.
///
/// The bitmap interleaves line bits: `010T TSSS LLLC CCCC` where T is the
/// screen third, L the line-in-character, S the character row and C the
/// column.
fn pattern_offset(line: usize, px: usize) -> u16 {
    let line0 = line - FIRST_SCREEN_LINE;
    (0x800 * (line0 / 64)
        + 0x20 * (line0 % 64 / 8)
        + 0x100 * (line0 % 8)
        + (px - BORDER_WIDTH) / 8) as u16
}

/// Offset of an attribute byte within the attribute map.
fn attr_offset(line: usize, px: usize) -> u16 {
    (0x20 * ((line - FIRST_SCREEN_LINE) / 8) + (px - BORDER_WIDTH) / 8) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FRAME_WIDTH, chunks_to_rgb};

    /// 64K backing store for VRAM reads.
    struct TestMemory {
        data: Vec<u8>,
    }

    impl TestMemory {
        fn new() -> Self {
            Self {
                data: vec![0; 0x10000],
            }
        }

        fn write(&mut self, addr: u16, value: u8) {
            self.data[addr as usize] = value;
        }

        fn peek(&self, addr: u16) -> u8 {
            self.data[addr as usize]
        }
    }

    /// First render tick of visible row `y` (left border pixel 0).
    fn row_start_tick(y: usize) -> u32 {
        ((HIDDEN_TOP_LINES + y) * TICKS_PER_LINE as usize) as u32 - 20
    }

    #[test]
    fn pattern_offsets_interleave() {
        // Line 0 column 0 is the map origin; line 1 jumps 0x100; line 8
        // steps 0x20; line 64 starts the second third at 0x800.
        assert_eq!(pattern_offset(FIRST_SCREEN_LINE, BORDER_WIDTH), 0x0000);
        assert_eq!(pattern_offset(FIRST_SCREEN_LINE + 1, BORDER_WIDTH), 0x0100);
        assert_eq!(pattern_offset(FIRST_SCREEN_LINE + 8, BORDER_WIDTH), 0x0020);
        assert_eq!(pattern_offset(FIRST_SCREEN_LINE + 64, BORDER_WIDTH), 0x0800);
        assert_eq!(pattern_offset(FIRST_SCREEN_LINE, BORDER_WIDTH + 255), 0x001F);
        assert_eq!(pattern_offset(FIRST_SCREEN_LINE + 191, BORDER_WIDTH + 255), 0x17FF);
    }

    #[test]
    fn attr_offsets_are_linear_per_character_row() {
        assert_eq!(attr_offset(FIRST_SCREEN_LINE, BORDER_WIDTH), 0x0000);
        assert_eq!(attr_offset(FIRST_SCREEN_LINE + 7, BORDER_WIDTH), 0x0000);
        assert_eq!(attr_offset(FIRST_SCREEN_LINE + 8, BORDER_WIDTH), 0x0020);
        assert_eq!(attr_offset(FIRST_SCREEN_LINE + 191, BORDER_WIDTH + 255), 0x02FF);
    }

    #[test]
    fn render_tick_is_monotonic_and_clamped() {
        let mut ula = Ula::new();
        let mem = TestMemory::new();
        ula.render_to(100, 0, |a| mem.peek(a));
        assert_eq!(ula.render_tick(), 100);
        ula.render_to(50, 0, |a| mem.peek(a));
        assert_eq!(ula.render_tick(), 100, "renderer never rewinds");
        ula.render_to(TICKS_PER_FRAME + 500, 0, |a| mem.peek(a));
        assert_eq!(ula.render_tick(), TICKS_PER_FRAME);
    }

    #[test]
    fn begin_frame_rewinds_beam() {
        let mut ula = Ula::new();
        let mem = TestMemory::new();
        ula.render_to(1000, 0, |a| mem.peek(a));
        ula.begin_frame();
        assert_eq!(ula.render_tick(), 0);
    }

    #[test]
    fn flash_toggles_every_16_frames() {
        let mut ula = Ula::new();
        assert_eq!(ula.flash_mask(), 0);
        for _ in 0..15 {
            ula.begin_frame();
            assert_eq!(ula.flash_mask(), 0);
        }
        ula.begin_frame();
        assert_eq!(ula.flash_mask(), 0xFFFF);
        for _ in 0..16 {
            ula.begin_frame();
        }
        assert_eq!(ula.flash_mask(), 0);
    }

    #[test]
    fn border_paints_visible_rows() {
        let mut ula = Ula::new();
        let mem = TestMemory::new();
        ula.render_to(TICKS_PER_FRAME, 2, |a| mem.peek(a));

        let chunks = ula.screen_chunks();
        // Top-left and bottom-right border chunks
        assert_eq!(chunks[0], 0x2222_2222);
        assert_eq!(chunks[(FRAME_HEIGHT - 1) * CHUNKS_PER_LINE + CHUNKS_PER_LINE - 1], 0x2222_2222);
        // Left border of a screen row
        assert_eq!(chunks[(TOP_BORDER + 10) * CHUNKS_PER_LINE], 0x2222_2222);
    }

    #[test]
    fn border_resamples_every_4_ticks() {
        let mut ula = Ula::new();
        let mem = TestMemory::new();
        let row0 = row_start_tick(0);

        // Paint the first 2 ticks of row 0 red, the rest of the line cyan.
        ula.render_to(row0 + 2, 2, |a| mem.peek(a));
        ula.render_to(row0 + 88, 5, |a| mem.peek(a));

        let chunks = ula.screen_chunks();
        // Ticks row0..row0+4 latched red (sample point was row0 itself)
        assert_eq!(chunks[0], 0x2222_2222);
        // The next sample point picks up the new colour
        assert_eq!(chunks[1], 0x5555_5555);
    }

    #[test]
    fn screen_pattern_and_attribute_decode() {
        let mut ula = Ula::new();
        let mut mem = TestMemory::new();
        // Top-left character cell: alternating pixels, white ink on black.
        mem.write(0x4000, 0xAA);
        mem.write(0x5800, 0x07);
        ula.render_to(TICKS_PER_FRAME, 0, |a| mem.peek(a));

        let chunks = ula.screen_chunks();
        let chunk = chunks[TOP_BORDER * CHUNKS_PER_LINE + BORDER_WIDTH / 8];
        assert_eq!(chunk, 0x7070_7070);
    }

    #[test]
    fn bright_attribute_lifts_both_ink_and_paper() {
        let mut ula = Ula::new();
        let mut mem = TestMemory::new();
        // Bright, yellow ink (6), blue paper (1)
        mem.write(0x4000, 0xF0);
        mem.write(0x5800, 0x40 | (1 << 3) | 6);
        ula.render_to(TICKS_PER_FRAME, 0, |a| mem.peek(a));

        let chunk = ula.screen_chunks()[TOP_BORDER * CHUNKS_PER_LINE + BORDER_WIDTH / 8];
        assert_eq!(chunk, 0xEEEE_9999, "ink 6|8=0xE, paper 1|8=0x9");
    }

    #[test]
    fn flash_swaps_ink_and_paper_when_mask_active() {
        let mut mem = TestMemory::new();
        mem.write(0x4000, 0xFF);
        mem.write(0x5800, 0x80 | 0x07); // flash, white ink, black paper

        let mut ula = Ula::new();
        ula.render_to(TICKS_PER_FRAME, 0, |a| mem.peek(a));
        let normal = ula.screen_chunks()[TOP_BORDER * CHUNKS_PER_LINE + BORDER_WIDTH / 8];
        assert_eq!(normal, 0x7777_7777);

        // Advance 16 frames so the mask flips, then re-render.
        for _ in 0..16 {
            ula.begin_frame();
        }
        ula.render_to(TICKS_PER_FRAME, 0, |a| mem.peek(a));
        let inverted = ula.screen_chunks()[TOP_BORDER * CHUNKS_PER_LINE + BORDER_WIDTH / 8];
        assert_eq!(inverted, 0x0000_0000, "set pixels now show paper");
    }

    #[test]
    fn late_memory_write_misses_painted_area() {
        let mut ula = Ula::new();
        let mut mem = TestMemory::new();
        mem.write(0x5800, 0x07);

        // Render past the first screen row, then set the pattern.
        let past_first_row = row_start_tick(TOP_BORDER + 1);
        ula.render_to(past_first_row, 0, |a| mem.peek(a));
        mem.write(0x4000, 0xFF);
        ula.render_to(TICKS_PER_FRAME, 0, |a| mem.peek(a));

        let chunk = ula.screen_chunks()[TOP_BORDER * CHUNKS_PER_LINE + BORDER_WIDTH / 8];
        assert_eq!(chunk, 0, "already-painted pixels keep the old pattern");
    }

    #[test]
    fn rgb_round_trip_of_screen_cell() {
        let mut ula = Ula::new();
        let mut mem = TestMemory::new();
        mem.write(0x4000, 0x80); // leftmost pixel only
        mem.write(0x5800, (2 << 3) | 7); // white ink, red paper
        ula.render_to(TICKS_PER_FRAME, 0, |a| mem.peek(a));

        let rgb = chunks_to_rgb(ula.screen_chunks());
        let row = TOP_BORDER * FRAME_WIDTH;
        assert_eq!(rgb[row + BORDER_WIDTH], 0x00CCCCCC, "ink pixel");
        assert_eq!(rgb[row + BORDER_WIDTH + 1], 0x00CC0000, "paper pixel");
    }
}
