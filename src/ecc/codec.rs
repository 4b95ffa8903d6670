//! XOR Fragment Codec
//!
//! Builds and reads the on-disk fragment files of one block. Encoding splits
//! a serialized block into `N` equal data segment files and derives `N`
//! parity segment files by XOR-ing the data segments listed in the scheme
//! matrix. Reading walks the scheme the other way: any present parity whose
//! inputs miss exactly one data segment regenerates that segment, repeated
//! until the block is whole, then the data segments are concatenated back
//! into one file.
//!
//! Files are word-aligned: the source is padded with spaces to a multiple of
//! `data_segments * WORD_SIZE` before splitting, so every segment holds an
//! integral number of 4-byte words. The pad survives into the concatenated
//! output; the length prefix inside the block payload is what trims it off.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::ecc::map::EccMap;
use crate::error::{Error, Result};
use crate::fragments::id::{local_file_name, FragmentKind};

/// Word size the fragment files are aligned to.
pub const WORD_SIZE: usize = 4;

/// Byte used to pad the source up to word alignment.
pub const PAD_BYTE: u8 = b' ';

/// XOR `src` into `acc`. Byte-wise XOR of aligned segments is identical to
/// the word-wise XOR the file format is framed around.
fn xor_into(acc: &mut [u8], src: &[u8]) {
    for (a, b) in acc.iter_mut().zip(src.iter()) {
        *a ^= b;
    }
}

/// Fragment encoder/decoder for one parity scheme.
pub struct XorCodec {
    map: EccMap,
}

impl XorCodec {
    pub fn new(map: EccMap) -> Self {
        Self { map }
    }

    pub fn map(&self) -> &EccMap {
        &self.map
    }

    fn data_path(&self, dir: &Path, block: u64, slot: usize) -> PathBuf {
        dir.join(local_file_name(block, slot, FragmentKind::Data))
    }

    fn parity_path(&self, dir: &Path, block: u64, slot: usize) -> PathBuf {
        dir.join(local_file_name(block, slot, FragmentKind::Parity))
    }

    /// Split `source` into fragment files under `target_dir`.
    ///
    /// Writes `block-<slot>-Data` and `block-<slot>-Parity` files for every
    /// slot of the scheme and returns how many of each were produced.
    #[instrument(skip(self, source, target_dir), fields(scheme = self.map.name(), block))]
    pub fn make_fragments(
        &self,
        source: &Path,
        block: u64,
        target_dir: &Path,
    ) -> Result<(usize, usize)> {
        let mut whole = fs::read(source)?;
        let step = self.map.data_segments() * WORD_SIZE;
        let rem = whole.len() % step;
        if rem > 0 {
            whole.resize(whole.len() + (step - rem), PAD_BYTE);
        }
        let seg_len = whole.len() / self.map.data_segments();

        for slot in 0..self.map.data_segments() {
            fs::write(
                self.data_path(target_dir, block, slot),
                &whole[slot * seg_len..(slot + 1) * seg_len],
            )?;
        }

        let mut parities = vec![vec![0u8; seg_len]; self.map.parity_segments()];
        for slot in 0..self.map.data_segments() {
            let segment = &whole[slot * seg_len..(slot + 1) * seg_len];
            for &parity_num in self.map.parities_using(slot) {
                xor_into(&mut parities[parity_num], segment);
            }
        }
        for (slot, parity) in parities.iter().enumerate() {
            fs::write(self.parity_path(target_dir, block, slot), parity)?;
        }

        debug!(
            "split {} bytes into {} data + {} parity segments of {} bytes",
            whole.len(),
            self.map.data_segments(),
            self.map.parity_segments(),
            seg_len
        );
        Ok((self.map.data_segments(), self.map.parity_segments()))
    }

    /// XOR all `sources` together into `target`.
    ///
    /// This is the single repair step: parity file plus the other data files
    /// of that parity row yields the missing data file. Shorter inputs are
    /// zero-extended so a stray length mismatch cannot shift the result.
    pub fn rebuild_one(sources: &[PathBuf], target: &Path) -> Result<()> {
        let mut acc: Vec<u8> = Vec::new();
        for source in sources {
            let bytes = fs::read(source)?;
            if bytes.len() > acc.len() {
                acc.resize(bytes.len(), 0);
            }
            xor_into(&mut acc, &bytes);
        }
        fs::write(target, &acc)?;
        Ok(())
    }

    /// Reassemble one block from the fragment files in `fragment_dir`.
    ///
    /// Missing data segments are regenerated from parities where possible;
    /// regenerated files are written back into `fragment_dir` so later
    /// passes (and the cleanup that follows the restore) see them. The data
    /// segments are then concatenated into `target`. Returns the number of
    /// bytes written, padding included.
    #[instrument(skip(self, fragment_dir, target), fields(scheme = self.map.name(), block))]
    pub fn read_block(&self, block: u64, fragment_dir: &Path, target: &Path) -> Result<u64> {
        let mut data_present: Vec<bool> = (0..self.map.data_segments())
            .map(|slot| self.data_path(fragment_dir, block, slot).is_file())
            .collect();
        let parity_present: Vec<bool> = (0..self.map.parity_segments())
            .map(|slot| self.parity_path(fragment_dir, block, slot).is_file())
            .collect();

        let mut made_progress = true;
        while made_progress && data_present.iter().any(|p| !p) {
            made_progress = false;
            for slot in 0..self.map.data_segments() {
                if data_present[slot] {
                    continue;
                }
                let (parity_num, inputs) =
                    match self.map.data_fix_path(&data_present, &parity_present, slot) {
                        Some(path) => path,
                        None => continue,
                    };
                let mut sources = vec![self.parity_path(fragment_dir, block, parity_num)];
                for &other in inputs {
                    if other != slot {
                        sources.push(self.data_path(fragment_dir, block, other));
                    }
                }
                debug!(slot, parity_num, "rebuilding data segment from {} files", sources.len());
                Self::rebuild_one(&sources, &self.data_path(fragment_dir, block, slot))?;
                data_present[slot] = true;
                made_progress = true;
            }
        }

        if let Some(missing) = data_present.iter().position(|p| !p) {
            let available = data_present.iter().filter(|p| **p).count();
            debug!(missing, available, "block not recoverable");
            return Err(Error::DecodeFailed {
                block_id: block.to_string(),
                reason: format!("data segment {missing} not recoverable"),
            });
        }

        let mut out = fs::File::create(target)?;
        let mut total = 0u64;
        for slot in 0..self.map.data_segments() {
            let bytes = fs::read(self.data_path(fragment_dir, block, slot))?;
            out.write_all(&bytes)?;
            total += bytes.len() as u64;
        }
        debug!("assembled {} bytes for block {}", total, block);
        Ok(total)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn codec(name: &str) -> XorCodec {
        XorCodec::new(EccMap::by_name(name).unwrap())
    }

    fn write_source(dir: &Path, content: &[u8]) -> PathBuf {
        let path = dir.join("source.bin");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_make_produces_all_fragments() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), b"some serialized block content here");
        let codec = codec("ecc/4x4");

        let (data, parity) = codec.make_fragments(&source, 0, dir.path()).unwrap();
        assert_eq!((data, parity), (4, 4));
        for slot in 0..4 {
            assert!(dir.path().join(format!("0-{slot}-Data")).is_file());
            assert!(dir.path().join(format!("0-{slot}-Parity")).is_file());
        }
    }

    #[test]
    fn test_segments_are_word_aligned_and_cover_source() {
        let dir = tempdir().unwrap();
        let content = b"0123456789abcde"; // 15 bytes, forces padding
        let source = write_source(dir.path(), content);
        let codec = codec("ecc/2x2");

        codec.make_fragments(&source, 3, dir.path()).unwrap();

        let seg0 = fs::read(dir.path().join("3-0-Data")).unwrap();
        let seg1 = fs::read(dir.path().join("3-1-Data")).unwrap();
        assert_eq!(seg0.len(), seg1.len());
        assert_eq!(seg0.len() % WORD_SIZE, 0);

        let mut joined = seg0.clone();
        joined.extend_from_slice(&seg1);
        assert_eq!(&joined[..content.len()], content);
        assert!(joined[content.len()..].iter().all(|&b| b == PAD_BYTE));
    }

    #[test]
    fn test_read_block_with_all_fragments() {
        let dir = tempdir().unwrap();
        let content = b"full set of fragments, nothing to repair";
        let source = write_source(dir.path(), content);
        let codec = codec("ecc/4x4");
        codec.make_fragments(&source, 0, dir.path()).unwrap();

        let target = dir.path().join("out.raid");
        let written = codec.read_block(0, dir.path(), &target).unwrap();

        let out = fs::read(&target).unwrap();
        assert_eq!(out.len() as u64, written);
        assert_eq!(&out[..content.len()], content);
    }

    #[test]
    fn test_read_block_repairs_lost_segments() {
        let dir = tempdir().unwrap();
        let content = b"the codec should survive losing two whole suppliers";
        let source = write_source(dir.path(), content);
        let codec = codec("ecc/4x4");
        codec.make_fragments(&source, 0, dir.path()).unwrap();

        // lose both files of suppliers 0 and 1: within the correctable budget
        for slot in 0..2 {
            fs::remove_file(dir.path().join(format!("0-{slot}-Data"))).unwrap();
            fs::remove_file(dir.path().join(format!("0-{slot}-Parity"))).unwrap();
        }

        let target = dir.path().join("out.raid");
        codec.read_block(0, dir.path(), &target).unwrap();

        let out = fs::read(&target).unwrap();
        assert_eq!(&out[..content.len()], content);
        // repaired segment files are left behind in the fragment dir
        assert!(dir.path().join("0-0-Data").is_file());
        assert!(dir.path().join("0-1-Data").is_file());
    }

    #[test]
    fn test_read_block_fails_beyond_budget() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), b"too much loss for a 2x2 scheme");
        let codec = codec("ecc/2x2");
        codec.make_fragments(&source, 0, dir.path()).unwrap();

        fs::remove_file(dir.path().join("0-0-Data")).unwrap();
        fs::remove_file(dir.path().join("0-1-Parity")).unwrap();

        let target = dir.path().join("out.raid");
        let result = codec.read_block(0, dir.path(), &target);
        assert!(matches!(result, Err(Error::DecodeFailed { .. })));
    }

    #[test]
    fn test_rebuild_one_is_xor() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, [0b1100_1100u8, 0xFF, 0x00, 0x0F]).unwrap();
        fs::write(&b, [0b1010_1010u8, 0x0F, 0xFF, 0x0F]).unwrap();

        let out = dir.path().join("out");
        XorCodec::rebuild_one(&[a, b], &out).unwrap();
        assert_eq!(fs::read(&out).unwrap(), vec![0b0110_0110u8, 0xF0, 0xFF, 0x00]);
    }

    #[test]
    fn test_empty_source_roundtrip() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), b"");
        let codec = codec("ecc/2x2");
        codec.make_fragments(&source, 0, dir.path()).unwrap();

        let target = dir.path().join("out.raid");
        let written = codec.read_block(0, dir.path(), &target).unwrap();
        assert_eq!(written, 0);
    }
}
