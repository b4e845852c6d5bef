//! Machine-level scenarios: frame sequencing, contention, interrupts,
//! breakpoints, and the host-visible views.

use emu_zx48::{Events, Marks, Observable, Spectrum, StateError, Value, offsets};

/// A machine with `program` loaded at `addr` and PC pointing at it.
fn machine_with_program(addr: u16, program: &[u8]) -> Spectrum {
    let mut machine = Spectrum::new();
    for (i, &byte) in program.iter().enumerate() {
        machine.write_memory(addr.wrapping_add(i as u16), byte);
    }
    machine.state_image_mut().set_u16_at(offsets::PC, addr);
    machine.state_image_mut().set_u16_at(offsets::SP, 0xFF00);
    machine
}

#[test]
fn cold_reset_memory_fill() {
    // S1: the power-on fill is part of the contract. The seed's low byte
    // lands in cell 0; each successive cell takes the advanced seed.
    let machine = Spectrum::new();
    assert_eq!(machine.read_memory(0x0000), 0x01);

    let mut seed: u32 = 0xDE34_7A01;
    for addr in 0..16u16 {
        assert_eq!(machine.read_memory(addr), seed as u8, "cell {addr}");
        seed = seed.wrapping_mul(0x7439_2CEF) ^ (seed >> 16);
    }
}

#[test]
fn rom_write_protect() {
    // S2: writes below 0x4000 are dropped.
    let mut machine = Spectrum::new();
    let original = machine.read_memory(0x0000);
    machine.write_memory(0x0000, 0x00);
    assert_eq!(machine.read_memory(0x0000), original);
}

#[test]
fn border_stripe_and_port_log() {
    // S3: LD A,2; OUT (0xFE),A; HALT — one logged write, red border.
    let mut machine = machine_with_program(0x8000, &[0x3E, 0x02, 0xD3, 0xFE, 0x76]);
    let events = machine.run().expect("valid state");
    assert_eq!(events, Events::END_OF_FRAME);

    let log = machine.port_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].addr, 0x02FE, "A rides the high address byte");
    assert_eq!(log[0].addr & 0xFF, 0xFE);
    assert_eq!(log[0].value, 0x02);
    assert_eq!(log[0].tick, 14, "OUT reaches the port after LD(7)+M1(4)+n(3)");

    // The whole visible border is red: top-left corner and bottom-right.
    let chunks = machine.screen_chunks();
    assert_eq!(chunks[0], 0x2222_2222);
    assert_eq!(chunks[280 * 44 - 1], 0x2222_2222);

    // Chunk-to-RGB agrees: non-bright red.
    let rgb = machine.screen_rgb();
    assert_eq!(rgb[0], 0x00CC_0000);
}

#[test]
fn contended_read_loop() {
    // S4: sixteen LD A,(0x4000) starting exactly at the contention base.
    // Base cost 16×13; the ULA adds 4+3×7 while the beam crosses the
    // drawable half of the first line.
    let program: Vec<u8> = (0..16).flat_map(|_| [0x3A, 0x00, 0x40]).collect();
    let mut machine = machine_with_program(0x8000, &program);
    machine
        .state_image_mut()
        .set_u32_at(offsets::TICKS_SINCE_INT, 14_336);
    machine
        .state_image_mut()
        .set_u32_at(offsets::FETCHES_TO_STOP, 16);

    let events = machine.run().expect("valid state");
    assert_eq!(events, Events::FETCHES_LIMIT_HIT);

    let ticks = machine.state_image().u32_at(offsets::TICKS_SINCE_INT);
    assert_eq!(ticks - 14_336, 16 * 13 + 25);
    assert_eq!(machine.state_image().u32_at(offsets::FETCHES_TO_STOP), 0);

    // Every instruction start got a visited mark.
    assert!(machine.is_marked(0x8000, Marks::VISITED));
    assert!(machine.is_marked(0x8000 + 15 * 3, Marks::VISITED));
    assert!(!machine.is_marked(0x8000 + 16 * 3, Marks::VISITED));
}

#[test]
fn uncontended_read_loop_runs_at_base_speed() {
    // The same loop against 0x8000-page memory pays no contention.
    let program: Vec<u8> = (0..16).flat_map(|_| [0x3A, 0x00, 0x90]).collect();
    let mut machine = machine_with_program(0x8000, &program);
    machine
        .state_image_mut()
        .set_u32_at(offsets::TICKS_SINCE_INT, 14_336);
    machine
        .state_image_mut()
        .set_u32_at(offsets::FETCHES_TO_STOP, 16);

    machine.run().expect("valid state");
    let ticks = machine.state_image().u32_at(offsets::TICKS_SINCE_INT);
    assert_eq!(ticks - 14_336, 16 * 13);
}

#[test]
fn breakpoint_on_jump_target() {
    // S5: the jump lands on a marked address; the loop stops before
    // executing anything there.
    let mut machine = machine_with_program(0x8000, &[0xC3, 0x00, 0x90]); // JP 0x9000
    machine.write_memory(0x9000, 0x3C); // INC A, must not run
    machine.mark_range(0x9000, 1, Marks::BREAKPOINT);

    let events = machine.run().expect("valid state");
    assert_eq!(events, Events::BREAKPOINT_HIT);
    assert_eq!(machine.state_image().u16_at(offsets::PC), 0x9000);
    assert_eq!(machine.state_image().u32_at(offsets::TICKS_SINCE_INT), 10);
    assert_eq!(machine.state_image().u16_at(offsets::AF) >> 8, 0, "INC A did not run");
    assert!(!machine.is_marked(0x9000, Marks::VISITED));

    // Clearing the mark lets the frame complete.
    machine.clear_marks(0x9000, Marks::BREAKPOINT);
    let events = machine.run().expect("valid state");
    assert!(events.contains(Events::END_OF_FRAME));
    assert!(machine.is_marked(0x9000, Marks::VISITED));
}

#[test]
fn im2_interrupt_at_frame_start() {
    // S6: IFF1 set, IM 2, vector table at (I<<8)|0xFF. Entering run()
    // just past the frame boundary accepts before the first instruction.
    let mut machine = machine_with_program(0x8000, &[0x00]);
    machine.write_memory(0x80FF, 0x00);
    machine.write_memory(0x8100, 0x91); // vector word 0x9100
    machine.mark_range(0x9100, 1, Marks::BREAKPOINT);

    let image = machine.state_image_mut();
    image.set_flag_at(offsets::IFF1, true);
    image.set_flag_at(offsets::IFF2, true);
    image.set_u8_at(offsets::IM, 2);
    image.set_u16_at(offsets::IR, 0x8000); // I = 0x80
    // Simulate the previous instruction ending 4 ticks into the new frame.
    image.set_u32_at(offsets::TICKS_SINCE_INT, 69_888 + 4);

    let events = machine.run().expect("valid state");
    assert_eq!(events, Events::BREAKPOINT_HIT);

    let image = machine.state_image();
    assert_eq!(image.u16_at(offsets::PC), 0x9100, "PC follows the vector");
    assert_eq!(image.u16_at(offsets::SP), 0xFEFE, "return address pushed");
    assert_eq!(machine.read_memory(0xFEFE), 0x00);
    assert_eq!(machine.read_memory(0xFEFF), 0x80);
    assert!(!image.flag_at(offsets::IFF1), "acceptance clears IFF1");
    assert_eq!(image.u32_at(offsets::TICKS_SINCE_INT), 4 + 19);
}

#[test]
fn int_suppressed_blocks_acceptance() {
    // With the suppression flag installed (the boundary right after an EI
    // or a prefix), the window check is skipped for the first instruction.
    let mut machine = machine_with_program(0x8000, &[0x00, 0x00]);
    machine.mark_range(0x0038, 1, Marks::BREAKPOINT);

    let image = machine.state_image_mut();
    image.set_flag_at(offsets::IFF1, true);
    image.set_u8_at(offsets::IM, 1);
    image.set_flag_at(offsets::INT_SUPPRESSED, true);
    image.set_u32_at(offsets::TICKS_SINCE_INT, 69_888 + 4);
    image.set_u32_at(offsets::FETCHES_TO_STOP, 1);

    let events = machine.run().expect("valid state");
    // The first NOP ran uninterrupted and the fetch limit stopped the
    // machine before the second boundary could sample the line.
    assert_eq!(events, Events::FETCHES_LIMIT_HIT);
    assert_eq!(machine.state_image().u16_at(offsets::PC), 0x8001);
    assert!(!machine.is_marked(0x0038, Marks::VISITED));
}

#[test]
fn invalid_state_image_refuses_to_run() {
    let mut machine = machine_with_program(0x8000, &[0x00]);
    machine.state_image_mut().set_u8_at(offsets::IM, 3);
    assert_eq!(machine.run(), Err(StateError::InvalidIm(3)));

    machine.state_image_mut().set_u8_at(offsets::IM, 1);
    machine.state_image_mut().set_u8_at(offsets::IREGP, 9);
    assert_eq!(machine.run(), Err(StateError::InvalidIregp(9)));

    // Repairing the image recovers the machine.
    machine.state_image_mut().set_u8_at(offsets::IREGP, 0);
    assert!(machine.run().is_ok());
}

#[test]
fn input_defaults_to_floating_bus_value() {
    // IN A,(0x7F) with no hook installed: 0xBF, no stop.
    let mut machine = machine_with_program(0x8000, &[0xDB, 0x7F, 0x76]);
    let events = machine.run().expect("valid state");
    assert_eq!(events, Events::END_OF_FRAME);
    assert_eq!(machine.state_image().u16_at(offsets::AF) >> 8, 0xBF);
}

#[test]
fn input_hook_supplies_value() {
    let mut machine = machine_with_program(0x8000, &[0xDB, 0x7F, 0x76]);
    machine.set_input_hook(|port| {
        assert_eq!(port & 0xFF, 0x7F);
        Some(0x5A)
    });
    machine.run().expect("valid state");
    assert_eq!(machine.state_image().u16_at(offsets::AF) >> 8, 0x5A);
}

#[test]
fn failing_input_hook_stops_machine() {
    let mut machine = machine_with_program(0x8000, &[0xDB, 0x7F, 0x00, 0x76]);
    machine.set_input_hook(|_| None);
    let events = machine.run().expect("valid state");
    assert!(events.contains(Events::MACHINE_STOPPED));
    // The IN itself completed with the default value; the next
    // instruction did not run.
    assert_eq!(machine.state_image().u16_at(offsets::AF) >> 8, 0xBF);
    assert_eq!(machine.state_image().u16_at(offsets::PC), 0x8002);
}

#[test]
fn stop_handle_fires_from_output_hook() {
    let mut machine = machine_with_program(0x8000, &[0x3E, 0x02, 0xD3, 0xFE, 0x76]);
    let handle = machine.stop_handle();
    machine.set_output_hook(move |_, _| handle.stop());

    let events = machine.run().expect("valid state");
    assert_eq!(events, Events::MACHINE_STOPPED);
    // OUT finished, HALT never started.
    assert_eq!(machine.state_image().u16_at(offsets::PC), 0x8004);
    assert_eq!(machine.query("cpu.halted"), Some(Value::Bool(false)));
}

#[test]
fn ticks_limit_stops_after_current_instruction() {
    let mut machine = machine_with_program(0x8000, &[0x00; 8]);
    machine.set_ticks_to_stop(10);
    let events = machine.run().expect("valid state");
    assert_eq!(events, Events::TICKS_LIMIT_HIT);
    // The limit lapsed inside the third NOP, which still completed.
    assert_eq!(machine.state_image().u32_at(offsets::TICKS_SINCE_INT), 12);
    assert_eq!(machine.state_image().u16_at(offsets::PC), 0x8003);
}

#[test]
fn frames_are_deterministic() {
    // Invariant 1: identical machines produce byte-identical observables.
    let build = || machine_with_program(0x8000, &[0x3E, 0x05, 0xD3, 0xFE, 0x76]);
    let mut first = build();
    let mut second = build();

    let events_a = first.run().expect("valid state");
    let events_b = second.run().expect("valid state");
    assert_eq!(events_a, events_b);
    assert_eq!(first.port_log(), second.port_log());
    assert_eq!(first.screen_chunks(), second.screen_chunks());
    assert_eq!(
        first.state_image().as_bytes(),
        second.state_image().as_bytes()
    );

    // And across further frames.
    for _ in 0..3 {
        first.run().expect("valid state");
        second.run().expect("valid state");
    }
    assert_eq!(first.screen_chunks(), second.screen_chunks());
    assert_eq!(
        first.state_image().as_bytes(),
        second.state_image().as_bytes()
    );
}

#[test]
fn screen_round_trip() {
    // Invariant 9: a pattern written before the frame paints per the
    // attribute rules and survives the chunks→RGB conversion.
    let mut machine = machine_with_program(0x8000, &[0x76]);
    machine.write_memory(0x4000, 0xAA); // alternating pixels, top-left cell
    machine.write_memory(0x5800, 0x07); // white ink, black paper

    machine.run().expect("valid state");

    let chunks = machine.screen_chunks();
    assert_eq!(chunks[48 * 44 + 6], 0x7070_7070);

    let rgb = machine.screen_rgb();
    let row = 48 * 352;
    assert_eq!(rgb[row + 48], 0x00CC_CCCC, "ink pixel");
    assert_eq!(rgb[row + 49], 0x0000_0000, "paper pixel");
}

#[test]
fn flash_advances_every_16_frames() {
    // Invariant 7, observed through the query interface.
    let mut machine = machine_with_program(0x8000, &[0x76]);
    assert_eq!(machine.query("ula.flash"), Some(Value::U16(0)));

    while machine.frame_count() < 16 {
        machine.run().expect("valid state");
    }
    assert_eq!(machine.query("ula.flash"), Some(Value::U16(0xFFFF)));

    while machine.frame_count() < 32 {
        machine.run().expect("valid state");
    }
    assert_eq!(machine.query("ula.flash"), Some(Value::U16(0)));
}

#[test]
fn render_tick_is_monotonic_and_frame_bounded() {
    // Invariant 2: a breakpoint mid-frame leaves the beam parked; resuming
    // completes the frame exactly.
    let mut machine = machine_with_program(0x8000, &[0xC3, 0x00, 0x90]);
    machine.write_memory(0x9000, 0x76);
    machine.mark_range(0x9000, 1, Marks::BREAKPOINT);

    machine.run().expect("valid state");
    let parked = match machine.query("ula.render_tick") {
        Some(Value::U32(tick)) => tick,
        other => panic!("unexpected query result {other:?}"),
    };
    assert!(parked <= 69_888);

    machine.clear_marks(0x9000, Marks::BREAKPOINT);
    let events = machine.run().expect("valid state");
    assert!(events.contains(Events::END_OF_FRAME));
    assert_eq!(machine.query("ula.render_tick"), Some(Value::U32(69_888)));
}

#[test]
fn port_7ffd_writes_are_logged_but_inert() {
    // 48K open question resolved: the paging port is a plain logged OUT
    // with no machine effect.
    let mut machine = machine_with_program(
        0x8000,
        &[0x01, 0xFD, 0x7F, 0x3E, 0x10, 0xED, 0x79, 0x76], // LD BC,0x7FFD; LD A,0x10; OUT (C),A; HALT
    );
    let before: Vec<u8> = (0..16).map(|i| machine.read_memory(0xC000 + i)).collect();

    let events = machine.run().expect("valid state");
    assert!(events.contains(Events::END_OF_FRAME));
    assert_eq!(machine.port_log().len(), 1);
    assert_eq!(machine.port_log()[0].addr, 0x7FFD);

    let after: Vec<u8> = (0..16).map(|i| machine.read_memory(0xC000 + i)).collect();
    assert_eq!(before, after, "no banking on a 48K");
}

#[test]
fn state_image_round_trips_host_edits() {
    let mut machine = machine_with_program(0x8000, &[0x00]);
    {
        let image = machine.state_image_mut();
        image.set_u16_at(offsets::BC, 0x1234);
        image.set_u16_at(offsets::IX, 0xBEEF);
        image.set_u8_at(offsets::BORDER_COLOUR, 5);
        image.set_u32_at(offsets::FETCHES_TO_STOP, 1);
    }
    machine.run().expect("valid state");

    let image = machine.state_image();
    assert_eq!(image.u16_at(offsets::BC), 0x1234, "untouched registers survive");
    assert_eq!(image.u16_at(offsets::IX), 0xBEEF);
    assert_eq!(image.u8_at(offsets::BORDER_COLOUR), 5);
    assert_eq!(image.u16_at(offsets::PC), 0x8001);
}

#[test]
fn observable_queries() {
    let mut machine = machine_with_program(0x8000, &[0x00]);
    machine
        .state_image_mut()
        .set_u32_at(offsets::FETCHES_TO_STOP, 1);
    machine.run().expect("valid state");

    assert_eq!(machine.query("cpu.pc"), Some(Value::U16(0x8001)));
    assert_eq!(machine.query("ticks"), Some(Value::U32(4)));
    assert_eq!(machine.query("frame"), Some(Value::U32(0)));
    assert_eq!(machine.query("memory.0x8000"), Some(Value::U8(0x00)));
    assert_eq!(machine.query("memory.32768"), Some(Value::U8(0x00)));
    assert_eq!(machine.query("nonsense"), None);
    assert!(machine.query_paths().contains(&"cpu.pc"));
}

#[test]
fn reset_restores_power_on_state() {
    let mut machine = machine_with_program(0x8000, &[0x3E, 0x02, 0xD3, 0xFE, 0x76]);
    machine.run().expect("valid state");
    assert!(!machine.port_log().is_empty());

    machine.reset();
    assert_eq!(machine.read_memory(0x8000), Spectrum::new().read_memory(0x8000));
    assert!(machine.port_log().is_empty());
    assert_eq!(machine.state_image().u16_at(offsets::PC), 0);
    assert_eq!(machine.state_image().u32_at(offsets::TICKS_SINCE_INT), 0);
}
