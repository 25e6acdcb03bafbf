use ecat::directory::{
    build_directory, read_directory, write_directory, DirectoryBlock, DirectoryEntry,
    ENTRIES_PER_BLOCK, TERMINAL_POINTER,
};
use ecat::MatrixId;
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn round_trip(frames: usize) -> (Vec<DirectoryBlock>, Vec<DirectoryEntry>) {
    let blocks = build_directory(frames, [32, 32, 4], 2).unwrap();
    let mut file = Cursor::new(vec![0u8; 512]);
    write_directory(&mut file, &blocks).unwrap();
    let table = read_directory(&mut file, 512).unwrap();
    (blocks, table.entries().to_vec())
}

#[test]
fn exactly_one_full_block() {
    let (blocks, entries) = round_trip(ENTRIES_PER_BLOCK);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].used(), 31);
    assert_eq!(blocks[0].next(), TERMINAL_POINTER);
    assert_eq!(entries.len(), 31);
    // 32 * 32 * 4 * 2 bytes = 16 blocks of pixels after each subheader
    assert_eq!(entries[0].start_block, 3);
    assert_eq!(entries[30].end_block, 3 + 31 * 17 - 1);
}

#[test]
fn one_past_a_full_block() {
    let (blocks, entries) = round_trip(ENTRIES_PER_BLOCK + 1);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].used(), 31);
    assert_eq!(blocks[0].next(), 3);
    assert_eq!(blocks[1].used(), 1);
    assert_eq!(blocks[1].next(), TERMINAL_POINTER);
    assert_eq!(blocks[1].previous(), 2);
    assert_eq!(entries.len(), 32);
    // frames start after both directory blocks
    assert_eq!(entries[0].start_block, 4);
    assert_eq!(entries[31].matrix(), MatrixId::volume(32));
    assert_eq!(entries[31].start_block, entries[30].end_block + 1);
}

#[test]
fn entries_come_back_sorted() {
    for &frames in &[1, 5, 30, 31, 32, 62, 63, 100] {
        let (blocks, entries) = round_trip(frames);
        assert_eq!(blocks.len(), (frames + 30) / 31);
        assert_eq!(entries.len(), frames);
        assert!(entries.windows(2).all(|w| w[0].matrix_id <= w[1].matrix_id));
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.matrix().frame as usize, i + 1);
        }
    }
}

fn entry(frame: u16) -> DirectoryEntry {
    let start_block = 10 + 3 * i32::from(frame);
    DirectoryEntry {
        matrix_id: MatrixId::volume(frame).encode(),
        start_block,
        end_block: start_block + 2,
        status: 1,
    }
}

#[test]
fn block_order_on_disk_does_not_matter() {
    let first = [entry(9), entry(2), entry(5)];
    let second = [entry(1), entry(8)];
    let third = [entry(4), entry(3), entry(7), entry(6)];

    // chain 2 -> 3 -> 4
    let mut sequential = Cursor::new(vec![0u8; 512 * 8]);
    DirectoryBlock::new(&first, 3, 0)
        .unwrap()
        .write_at(&mut sequential, 2)
        .unwrap();
    DirectoryBlock::new(&second, 4, 2)
        .unwrap()
        .write_at(&mut sequential, 3)
        .unwrap();
    DirectoryBlock::new(&third, TERMINAL_POINTER, 3)
        .unwrap()
        .write_at(&mut sequential, 4)
        .unwrap();

    // the same blocks scattered: chain 2 -> 7 -> 5
    let mut scattered = Cursor::new(vec![0u8; 512 * 8]);
    DirectoryBlock::new(&first, 7, 0)
        .unwrap()
        .write_at(&mut scattered, 2)
        .unwrap();
    DirectoryBlock::new(&second, 5, 2)
        .unwrap()
        .write_at(&mut scattered, 7)
        .unwrap();
    DirectoryBlock::new(&third, TERMINAL_POINTER, 7)
        .unwrap()
        .write_at(&mut scattered, 5)
        .unwrap();

    let a = read_directory(&mut sequential, 512).unwrap();
    let b = read_directory(&mut scattered, 512).unwrap();
    assert_eq!(a, b);
    let frames: Vec<u16> = a.iter().map(|e| e.matrix().frame).collect();
    assert_eq!(frames, (1..=9).collect::<Vec<_>>());
}

#[test]
fn empty_block_ends_the_chain() {
    let mut file = Cursor::new(vec![0u8; 512 * 4]);
    DirectoryBlock::new(&[entry(1)], 3, 0)
        .unwrap()
        .write_at(&mut file, 2)
        .unwrap();
    // block 3 is left zeroed: no entries, so the scan stops there
    let table = read_directory(&mut file, 512).unwrap();
    assert_eq!(table.len(), 1);
}
