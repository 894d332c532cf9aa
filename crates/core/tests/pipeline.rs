use std::{cell::RefCell, rc::Rc};

use cdg_player_core::{
    parse, ClutBank, FrameBuffer, Instruction, ManualTime, PlayerConfig, PlayerState, Renderer, Scheduler,
    Surface, TileBlock, HEIGHT, WIDTH,
};

/// Surface that keeps the last presented frame where the test can see it.
#[derive(Clone, Default)]
struct SharedSurface {
    last: Rc<RefCell<Vec<u8>>>,
}

impl SharedSurface {
    fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let last = self.last.borrow();
        let offset = 4 * (y * WIDTH + x);
        [last[offset], last[offset + 1], last[offset + 2], last[offset + 3]]
    }
}

impl Surface for SharedSurface {
    fn present(&mut self, rgba: &[u8], width: usize, height: usize) {
        assert_eq!((width, height), (WIDTH, HEIGHT));
        *self.last.borrow_mut() = rgba.to_vec();
    }
}

fn clut(entries: &[(usize, [u8; 3])]) -> Instruction {
    let mut colors = [[0u8; 3]; 8];
    for &(slot, color) in entries {
        colors[slot] = color;
    }
    Instruction::LoadClut { bank: ClutBank::Low, colors }
}

fn solid_tile(colors: [u8; 2]) -> Instruction {
    Instruction::Tile(TileBlock {
        row: 0,
        column: 0,
        colors,
        rows: [0b11_1111; 12],
        xor: false,
    })
}

fn encode(instructions: &[Instruction]) -> Vec<u8> {
    instructions.iter().flat_map(|i| i.encode()).collect()
}

fn player(surface: &SharedSurface, time: &ManualTime) -> Scheduler {
    Scheduler::new(
        PlayerConfig::default(),
        Renderer::new(Box::new(surface.clone())),
        Box::new(time.clone()),
    )
}

#[test]
fn renders_tiles_with_the_loaded_palette() {
    let bytes = encode(&[
        clut(&[(1, [0x0, 0x0, 0xf]), (2, [0xf, 0x0, 0x0]), (3, [0x0, 0xf, 0x0])]),
        Instruction::MemoryPreset { color: 1 },
        solid_tile([2, 3]),
    ]);

    let surface = SharedSurface::default();
    let time = ManualTime::new();
    let mut scheduler = player(&surface, &time);
    scheduler.load(&bytes);
    scheduler.play();
    scheduler.tick(10.0);

    assert_eq!(scheduler.pc(), Some(3));
    assert_eq!(surface.pixel(0, 0), [0, 255, 0, 255]);
    assert_eq!(surface.pixel(10, 20), [0, 0, 255, 255]);
}

#[test]
fn key_colour_is_transparent_at_scanout() {
    let bytes = encode(&[
        clut(&[(1, [0x0, 0x0, 0xf]), (3, [0xf, 0xf, 0xf])]),
        Instruction::MemoryPreset { color: 1 },
        solid_tile([1, 3]),
        Instruction::SetKeyColor { index: 1 },
    ]);

    let surface = SharedSurface::default();
    let time = ManualTime::new();
    let mut scheduler = player(&surface, &time);
    scheduler.load(&bytes);
    scheduler.play();
    scheduler.tick(20.0);

    assert_eq!(surface.pixel(3, 3), [255, 255, 255, 255]);
    assert_eq!(surface.pixel(100, 100), [0, 0, 255, 0]);
    assert_eq!(scheduler.frame().background_index(), 1);
}

#[test]
fn load_resets_to_a_blank_loaded_state() {
    let surface = SharedSurface::default();
    let time = ManualTime::new();
    let mut scheduler = player(&surface, &time);
    assert_eq!(scheduler.state(), PlayerState::Idle);

    scheduler.load(&encode(&[Instruction::MemoryPreset { color: 9 }]));

    assert_eq!(scheduler.state(), PlayerState::Loaded);
    assert_eq!(scheduler.pc(), Some(0));
    assert_eq!(surface.pixel(150, 100), [0, 0, 0, 255]);
}

#[test]
fn unknown_and_foreign_packets_keep_timing_alignment() {
    let mut bytes = vec![0u8; 24];
    let mut unknown = Instruction::MemoryPreset { color: 2 }.encode();
    unknown[1] = 0x3e;
    bytes.extend_from_slice(&unknown);
    bytes.extend_from_slice(&Instruction::MemoryPreset { color: 7 }.encode());

    let parsed = parse(&bytes);
    assert_eq!(parsed.instructions.len(), 3);
    assert_eq!(parsed.diagnostics.len(), 1);

    let surface = SharedSurface::default();
    let time = ManualTime::new();
    let mut scheduler = player(&surface, &time);
    scheduler.load_parsed(parsed);
    scheduler.play();

    scheduler.tick(7.0);
    assert_eq!(scheduler.pc(), Some(2));
    assert!(scheduler.frame().pixels().iter().all(|&p| p == 0));

    scheduler.tick(10.0);
    assert!(scheduler.frame().pixels().iter().all(|&p| p == 7));
}

#[test]
fn seeking_back_and_forth_matches_direct_replay() {
    let mut instructions = vec![Instruction::MemoryPreset { color: 0 }];
    for i in 1..600usize {
        instructions.push(Instruction::Tile(TileBlock {
            row: (i % 18) as u8,
            column: ((i * 7) % 50) as u8,
            colors: [(i % 5) as u8, (i % 11) as u8],
            rows: [(i % 64) as u8; 12],
            xor: i % 2 == 1,
        }));
    }
    let bytes = encode(&instructions);

    let mut expected = FrameBuffer::new();
    for instruction in &instructions[..240] {
        instruction.apply(&mut expected);
    }

    let surface = SharedSurface::default();
    let time = ManualTime::new();
    let mut scheduler = player(&surface, &time);
    scheduler.load(&bytes);
    scheduler.play();

    for position in [1900.0, 300.0, 1200.0, 800.0] {
        scheduler.sync(position);
        scheduler.pump();
    }

    assert_eq!(scheduler.pc(), Some(240));
    assert_eq!(scheduler.frame().pixels(), expected.pixels());
}
