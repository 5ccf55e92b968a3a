//! Rolling-checksum block matching for bandwidth-efficient file transfer.
//!
//! Matching is block-aligned: the new file is read in non-overlapping
//! `BLOCK_SIZE` chunks rather than scanned with a sliding window. This
//! forfeits matches under a byte-level insertion or deletion that shifts
//! block boundaries, trading match quality for the simplicity of never
//! needing an overlapping read; this is the shipped behavior rather than a
//! stepping stone to a rolling window.

use crate::adler32::adler32;
use crate::error::{DeltaError, DeltaResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use swarm_core::{BlockSignature, DeltaInstruction};
use tracing::debug;

/// Fixed block size for both signature computation and delta matching.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Read `path` in `BLOCK_SIZE` chunks and emit one [`BlockSignature`] per
/// chunk, in order.
pub fn compute_signatures(path: &Path) -> DeltaResult<Vec<BlockSignature>> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut signatures = Vec::new();
    let mut index = 0u32;

    loop {
        let n = read_chunk(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        signatures.push(BlockSignature {
            index,
            weak: adler32(chunk),
            strong: Sha256::digest(chunk).into(),
        });
        index += 1;
    }
    Ok(signatures)
}

/// Compute the ordered delta instructions that reconstruct `new_path` from
/// a base file described by `base_signatures`.
///
/// On multiple strong-hash matches for one chunk, the candidate with the
/// lowest block index is preferred, making the result deterministic for a
/// base file containing duplicate blocks.
pub fn compute_delta(
    new_path: &Path,
    base_signatures: &[BlockSignature],
) -> DeltaResult<Vec<DeltaInstruction>> {
    let mut buckets: HashMap<u32, Vec<&BlockSignature>> = HashMap::new();
    for sig in base_signatures {
        buckets.entry(sig.weak).or_default().push(sig);
    }
    for candidates in buckets.values_mut() {
        candidates.sort_by_key(|s| s.index);
    }

    let mut file = File::open(new_path)?;
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut instructions = Vec::new();
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = read_chunk(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        let weak = adler32(chunk);

        let matched = buckets.get(&weak).and_then(|candidates| {
            let strong = Sha256::digest(chunk);
            candidates
                .iter()
                .find(|c| c.strong.as_slice() == strong.as_slice())
                .copied()
        });

        match matched {
            Some(base_block) => {
                flush_insert(&mut pending, &mut instructions);
                instructions.push(DeltaInstruction::Copy {
                    source_block_index: base_block.index,
                    length: n as u32,
                });
            }
            None => {
                pending.extend_from_slice(chunk);
                if pending.len() > 2 * BLOCK_SIZE {
                    flush_insert(&mut pending, &mut instructions);
                }
            }
        }
    }
    flush_insert(&mut pending, &mut instructions);

    debug!(
        instructions = instructions.len(),
        "computed delta for {}",
        new_path.display()
    );
    Ok(instructions)
}

/// Flush `pending` as one or more `Insert` instructions of at most
/// `BLOCK_SIZE` bytes each, bounding insert-buffer memory.
fn flush_insert(pending: &mut Vec<u8>, instructions: &mut Vec<DeltaInstruction>) {
    if pending.is_empty() {
        return;
    }
    let data = std::mem::take(pending);
    for chunk in data.chunks(BLOCK_SIZE) {
        instructions.push(DeltaInstruction::Insert {
            bytes: chunk.to_vec(),
            length: chunk.len() as u32,
        });
    }
}

/// Reconstruct `target_path` from `base_path` plus `instructions`.
pub fn apply_delta(base_path: &Path, target_path: &Path, instructions: &[DeltaInstruction]) -> DeltaResult<()> {
    let mut base = File::open(base_path)?;
    let base_len = base.metadata()?.len();
    let available_blocks = base_len.div_ceil(BLOCK_SIZE as u64) as u32;

    let mut target = File::create(target_path)?;
    for instruction in instructions {
        match instruction {
            DeltaInstruction::Copy { source_block_index, length } => {
                if *source_block_index >= available_blocks {
                    return Err(DeltaError::BlockOutOfRange {
                        index: *source_block_index,
                        available: available_blocks,
                    });
                }
                base.seek(SeekFrom::Start(u64::from(*source_block_index) * BLOCK_SIZE as u64))?;
                let mut buf = vec![0u8; *length as usize];
                base.read_exact(&mut buf)?;
                target.write_all(&buf)?;
            }
            DeltaInstruction::Insert { bytes, .. } => {
                target.write_all(bytes)?;
            }
        }
    }
    Ok(())
}

fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, content: &[u8]) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn identity_delta_is_all_copies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.bin");
        write(&path, &vec![7u8; BLOCK_SIZE * 3 + 10]);

        let sigs = compute_signatures(&path).unwrap();
        let delta = compute_delta(&path, &sigs).unwrap();

        assert!(delta.iter().all(|i| matches!(i, DeltaInstruction::Copy { .. })));
    }

    #[test]
    fn delta_roundtrip_reconstructs_target() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.bin");
        let target_path = dir.path().join("target.bin");
        let output_path = dir.path().join("output.bin");

        let mut base_content = vec![0u8; BLOCK_SIZE * 4];
        for (i, b) in base_content.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        write(&base_path, &base_content);

        // Target: same first two blocks, then novel bytes, then the base's
        // last block again (to exercise a non-sequential copy match).
        let mut target_content = base_content[..BLOCK_SIZE * 2].to_vec();
        target_content.extend(std::iter::repeat_n(0xABu8, 12_345));
        target_content.extend_from_slice(&base_content[BLOCK_SIZE * 3..]);
        write(&target_path, &target_content);

        let base_sigs = compute_signatures(&base_path).unwrap();
        let delta = compute_delta(&target_path, &base_sigs).unwrap();
        apply_delta(&base_path, &output_path, &delta).unwrap();

        let output = std::fs::read(&output_path).unwrap();
        assert_eq!(output, target_content);
    }

    #[test]
    fn tie_break_prefers_lowest_block_index() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.bin");
        let target_path = dir.path().join("target.bin");

        // Two identical blocks in the base file.
        let block = vec![0x42u8; BLOCK_SIZE];
        let mut base_content = block.clone();
        base_content.extend_from_slice(&block);
        write(&base_path, &base_content);
        write(&target_path, &block);

        let base_sigs = compute_signatures(&base_path).unwrap();
        let delta = compute_delta(&target_path, &base_sigs).unwrap();

        assert_eq!(
            delta,
            vec![DeltaInstruction::Copy { source_block_index: 0, length: BLOCK_SIZE as u32 }]
        );
    }

    #[test]
    fn insert_buffer_splits_at_block_size() {
        let dir = tempdir().unwrap();
        let base_path = dir.path().join("base.bin");
        let target_path = dir.path().join("target.bin");

        write(&base_path, b"");
        // Larger than 2 * BLOCK_SIZE worth of unmatched bytes across
        // multiple read chunks.
        write(&target_path, &vec![0x11u8; BLOCK_SIZE * 3]);

        let base_sigs = compute_signatures(&base_path).unwrap();
        let delta = compute_delta(&target_path, &base_sigs).unwrap();

        assert!(delta.iter().all(|i| matches!(i, DeltaInstruction::Insert { .. })));
        for instr in &delta {
            if let DeltaInstruction::Insert { length, .. } = instr {
                assert!(*length as usize <= BLOCK_SIZE);
            }
        }
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Delta round-trip — for any pair of (small) base and
        /// target byte strings, `apply_delta(base, compute_delta(target,
        /// signatures(base)))` reconstructs `target` byte-for-byte.
        #[test]
        fn delta_roundtrip_arbitrary_content(
            base_bytes in prop::collection::vec(any::<u8>(), 0..4096),
            target_bytes in prop::collection::vec(any::<u8>(), 0..4096),
        ) {
            let dir = tempdir().unwrap();
            let base_path = dir.path().join("base.bin");
            let target_path = dir.path().join("target.bin");
            let output_path = dir.path().join("output.bin");

            std::fs::write(&base_path, &base_bytes).unwrap();
            std::fs::write(&target_path, &target_bytes).unwrap();

            let base_sigs = compute_signatures(&base_path).unwrap();
            let delta = compute_delta(&target_path, &base_sigs).unwrap();
            apply_delta(&base_path, &output_path, &delta).unwrap();

            let output = std::fs::read(&output_path).unwrap();
            prop_assert_eq!(output, target_bytes);
        }
    }
}
